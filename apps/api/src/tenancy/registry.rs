use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::tenancy::membership_query::MembershipQuery;
use crate::tenancy::resolver::{ActiveTenantResolver, FetchOutcome, ResolverSnapshot};
use crate::tenancy::selection_store::{FileSelectionStore, SelectionStore};

fn poisoned() -> AppError {
    AppError::Internal(anyhow::anyhow!("resolver lock poisoned"))
}

/// Shared access to one profile's resolver.
///
/// The lock is only held for the synchronous steps; the membership query runs
/// unlocked, and ordering between overlapping requests is left to the
/// resolver's fetch tickets. Callers only ever get back state resolved for
/// the identity they asked about.
pub struct ResolverHandle<S> {
    inner: Arc<Mutex<ActiveTenantResolver<S>>>,
}

impl<S> Clone for ResolverHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> ResolverHandle<S> {
    /// True while a request other than the registry holds this handle.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }
}

impl<S: SelectionStore> ResolverHandle<S> {
    pub fn new(resolver: ActiveTenantResolver<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(resolver)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ActiveTenantResolver<S>>, AppError> {
        self.inner.lock().map_err(|_| poisoned())
    }

    /// Runs `f` against the resolver under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut ActiveTenantResolver<S>) -> R) -> Result<R, AppError> {
        let mut guard = self.lock()?;
        Ok(f(&mut *guard))
    }

    /// Like [`with`](Self::with), but only while the resolver still serves
    /// `user_id`; otherwise `SessionSuperseded`.
    pub fn with_identity<R>(
        &self,
        user_id: Uuid,
        f: impl FnOnce(&mut ActiveTenantResolver<S>) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        self.with(|r| {
            if r.identity() != Some(user_id) {
                return Err(AppError::SessionSuperseded);
            }
            f(r)
        })?
    }

    pub fn snapshot(&self) -> Result<ResolverSnapshot, AppError> {
        self.with(|r| r.snapshot())
    }

    /// Refetches memberships for `user_id` and reconciles. A query error is
    /// returned unchanged; the resolver keeps its previous active company.
    ///
    /// If another identity took the profile over while the query ran, the
    /// caller gets `SessionSuperseded` rather than that identity's state.
    pub async fn refresh(
        &self,
        query: &dyn MembershipQuery,
        user_id: Option<Uuid>,
    ) -> Result<ResolverSnapshot, AppError> {
        let Some(ticket) = self.with(|r| r.begin_fetch(user_id))? else {
            return self.snapshot();
        };

        let result = query.fetch_memberships(ticket.user_id()).await;

        self.with(|r| -> Result<ResolverSnapshot, AppError> {
            let outcome = r.apply_fetch(ticket, result)?;
            if !r.is_resolved_for(ticket.user_id()) {
                debug!(
                    "Profile no longer resolved for user {}, dropping response",
                    ticket.user_id()
                );
                return Err(AppError::SessionSuperseded);
            }
            if outcome == FetchOutcome::Discarded {
                debug!("Newer memberships already applied for user {}", ticket.user_id());
            }
            Ok(r.snapshot())
        })?
    }

    /// Fetches only when nothing has been applied yet for `user_id`.
    pub async fn ensure_resolved(
        &self,
        query: &dyn MembershipQuery,
        user_id: Uuid,
    ) -> Result<ResolverSnapshot, AppError> {
        // check and snapshot under one lock so the answer is about `user_id`
        let cached = self.with(|r| r.is_resolved_for(user_id).then(|| r.snapshot()))?;
        match cached {
            Some(snapshot) => Ok(snapshot),
            None => self.refresh(query, Some(user_id)).await,
        }
    }
}

struct CachedResolver {
    handle: ResolverHandle<FileSelectionStore>,
    last_used: Instant,
}

/// One resolver per client profile, each persisting to its own slot under `root`.
///
/// At most `capacity` idle resolvers are kept; the least recently used idle
/// one is dropped to make room. Nothing is lost by dropping: the slot file
/// outlives the resolver and is read again when the profile comes back.
pub struct ResolverRegistry {
    root: PathBuf,
    capacity: usize,
    resolvers: Mutex<HashMap<Uuid, CachedResolver>>,
}

impl ResolverRegistry {
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            root: root.into(),
            capacity,
            resolvers: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self, profile_id: Uuid) -> Result<ResolverHandle<FileSelectionStore>, AppError> {
        let mut resolvers = self.resolvers.lock().map_err(|_| poisoned())?;
        let now = Instant::now();

        if let Some(cached) = resolvers.get_mut(&profile_id) {
            cached.last_used = now;
            return Ok(cached.handle.clone());
        }

        if resolvers.len() >= self.capacity {
            evict_least_recent(&mut resolvers);
        }

        let store = FileSelectionStore::new(self.root.join(profile_id.to_string()));
        debug!("Resolver created for profile {profile_id} at {}", store.path().display());
        let handle = ResolverHandle::new(ActiveTenantResolver::new(store));
        resolvers.insert(
            profile_id,
            CachedResolver {
                handle: handle.clone(),
                last_used: now,
            },
        );
        Ok(handle)
    }

    #[cfg(test)]
    fn cached_profiles(&self) -> usize {
        self.resolvers.lock().unwrap().len()
    }
}

/// Handles held by in-flight requests are never evicted, so one profile can
/// not end up with two live resolvers writing the same slot.
fn evict_least_recent(resolvers: &mut HashMap<Uuid, CachedResolver>) {
    let victim = resolvers
        .iter()
        .filter(|(_, cached)| !cached.handle.in_use())
        .min_by_key(|(_, cached)| cached.last_used)
        .map(|(profile_id, _)| *profile_id);

    match victim {
        Some(profile_id) => {
            resolvers.remove(&profile_id);
            debug!("Evicted idle resolver for profile {profile_id}");
        }
        None => warn!(
            "All {} cached resolvers are in use; growing past capacity",
            resolvers.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::company::MembershipRole;
    use crate::tenancy::resolver::ResolutionState;
    use crate::tenancy::test_support::{
        company_id, membership, FakeMembershipQuery, GatedMembershipQuery,
    };

    fn two_companies() -> Vec<crate::models::company::CompanyMembership> {
        vec![
            membership(1, MembershipRole::Owner),
            membership(2, MembershipRole::Member),
        ]
    }

    #[tokio::test]
    async fn test_refresh_resolves_first_membership() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 16);
        let query = FakeMembershipQuery::new(two_companies());

        let handle = registry.handle(Uuid::new_v4()).unwrap();
        let snapshot = handle.refresh(&query, Some(Uuid::new_v4())).await.unwrap();

        assert_eq!(snapshot.state, ResolutionState::Active);
        assert_eq!(snapshot.active.unwrap().company_id, company_id(1));
        assert_eq!(query.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_identity_skips_query() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 16);
        let query = FakeMembershipQuery::new(two_companies());

        let snapshot = registry
            .handle(Uuid::new_v4())
            .unwrap()
            .refresh(&query, None)
            .await
            .unwrap();

        assert_eq!(snapshot.state, ResolutionState::NoMemberships);
        assert_eq!(query.calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_resolved_fetches_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 16);
        let query = FakeMembershipQuery::new(two_companies());
        let handle = registry.handle(Uuid::new_v4()).unwrap();
        let user = Uuid::new_v4();

        handle.ensure_resolved(&query, user).await.unwrap();
        handle.ensure_resolved(&query, user).await.unwrap();
        assert_eq!(query.calls(), 1);

        // another identity on the same profile triggers a new fetch
        handle.ensure_resolved(&query, Uuid::new_v4()).await.unwrap();
        assert_eq!(query.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_error_propagates_and_keeps_active() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 16);
        let query = FakeMembershipQuery::new(two_companies());
        let handle = registry.handle(Uuid::new_v4()).unwrap();
        let user = Uuid::new_v4();

        handle.refresh(&query, Some(user)).await.unwrap();
        query.set_failing(true);
        let err = handle.refresh(&query, Some(user)).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        let snapshot = handle.snapshot().unwrap();
        assert_eq!(snapshot.active.unwrap().company_id, company_id(1));
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_selection_persists_across_registries() {
        let dir = tempfile::tempdir().unwrap();
        let profile = Uuid::new_v4();
        let user = Uuid::new_v4();
        let query = FakeMembershipQuery::new(two_companies());

        {
            let registry = ResolverRegistry::new(dir.path(), 16);
            let handle = registry.handle(profile).unwrap();
            handle.refresh(&query, Some(user)).await.unwrap();
            handle.with(|r| r.select(company_id(2))).unwrap().unwrap();
        }

        let registry = ResolverRegistry::new(dir.path(), 16);
        let snapshot = registry
            .handle(profile)
            .unwrap()
            .refresh(&query, Some(user))
            .await
            .unwrap();
        assert_eq!(snapshot.active.unwrap().company_id, company_id(2));
    }

    #[tokio::test]
    async fn test_profiles_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 16);
        let query = FakeMembershipQuery::new(two_companies());
        let user = Uuid::new_v4();

        let laptop = registry.handle(Uuid::new_v4()).unwrap();
        let phone = registry.handle(Uuid::new_v4()).unwrap();
        laptop.refresh(&query, Some(user)).await.unwrap();
        phone.refresh(&query, Some(user)).await.unwrap();
        laptop.with(|r| r.select(company_id(2))).unwrap().unwrap();

        assert_eq!(
            phone.snapshot().unwrap().active.unwrap().company_id,
            company_id(1)
        );
    }

    #[tokio::test]
    async fn test_refresh_superseded_by_other_user_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 16);
        let handle = registry.handle(Uuid::new_v4()).unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let query = Arc::new(GatedMembershipQuery::new());
        query.set_memberships(alice, vec![membership(1, MembershipRole::Owner)]);
        query.set_memberships(bob, vec![membership(2, MembershipRole::Admin)]);
        query.gate_next(alice);

        let alice_task = {
            let handle = handle.clone();
            let query = Arc::clone(&query);
            tokio::spawn(async move { handle.refresh(&*query, Some(alice)).await })
        };
        query.wait_until_parked().await;

        let bob_snapshot = handle.refresh(&*query, Some(bob)).await.unwrap();
        assert_eq!(bob_snapshot.active.unwrap().company_id, company_id(2));

        query.release();
        let alice_result = alice_task.await.unwrap();
        assert!(matches!(alice_result, Err(AppError::SessionSuperseded)));

        // bob's resolution is untouched by alice's late response
        let current = handle.snapshot().unwrap();
        assert_eq!(current.active.unwrap().company_id, company_id(2));
        assert_eq!(current.memberships.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_resolved_never_returns_other_users_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 16);
        let handle = registry.handle(Uuid::new_v4()).unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let query = GatedMembershipQuery::new();
        query.set_memberships(alice, vec![membership(1, MembershipRole::Member)]);
        query.set_memberships(bob, vec![membership(2, MembershipRole::Owner)]);

        handle.ensure_resolved(&query, bob).await.unwrap();
        let snapshot = handle.ensure_resolved(&query, alice).await.unwrap();

        let active = snapshot.active.unwrap();
        assert_eq!(active.company_id, company_id(1));
        assert_eq!(active.role, MembershipRole::Member);
    }

    #[tokio::test]
    async fn test_overlapping_refresh_same_user_returns_newest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 16);
        let handle = registry.handle(Uuid::new_v4()).unwrap();
        let user = Uuid::new_v4();

        let query = Arc::new(GatedMembershipQuery::new());
        query.set_memberships(user, vec![membership(1, MembershipRole::Owner)]);
        query.gate_next(user);

        let slow = {
            let handle = handle.clone();
            let query = Arc::clone(&query);
            tokio::spawn(async move { handle.refresh(&*query, Some(user)).await })
        };
        query.wait_until_parked().await;

        query.set_memberships(user, vec![membership(3, MembershipRole::Admin)]);
        let fast = handle.refresh(&*query, Some(user)).await.unwrap();
        assert_eq!(fast.active.unwrap().company_id, company_id(3));

        query.release();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.active.unwrap().company_id, company_id(3));
        assert_eq!(slow.memberships.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_stays_within_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 4);
        let query = FakeMembershipQuery::new(vec![]);

        for _ in 0..100 {
            registry
                .handle(Uuid::new_v4())
                .unwrap()
                .refresh(&query, None)
                .await
                .unwrap();
        }
        assert_eq!(registry.cached_profiles(), 4);
    }

    #[tokio::test]
    async fn test_eviction_skips_handles_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 1);
        let busy_profile = Uuid::new_v4();

        let busy = registry.handle(busy_profile).unwrap();
        registry.handle(Uuid::new_v4()).unwrap();
        assert_eq!(registry.cached_profiles(), 2);

        let again = registry.handle(busy_profile).unwrap();
        assert!(Arc::ptr_eq(&busy.inner, &again.inner));
    }

    #[tokio::test]
    async fn test_evicted_profile_restores_selection_from_slot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ResolverRegistry::new(dir.path(), 1);
        let query = FakeMembershipQuery::new(two_companies());
        let profile = Uuid::new_v4();
        let user = Uuid::new_v4();

        {
            let handle = registry.handle(profile).unwrap();
            handle.refresh(&query, Some(user)).await.unwrap();
            handle.with(|r| r.select(company_id(2))).unwrap().unwrap();
        }
        // pushes the idle profile out
        registry.handle(Uuid::new_v4()).unwrap();

        let snapshot = registry
            .handle(profile)
            .unwrap()
            .refresh(&query, Some(user))
            .await
            .unwrap();
        assert_eq!(snapshot.active.unwrap().company_id, company_id(2));
    }
}
