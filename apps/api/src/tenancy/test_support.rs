//! Fakes shared by the tenancy, company and route tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::company::{Company, CompanyMembership, MembershipRole};
use crate::state::AppState;
use crate::tenancy::membership_query::MembershipQuery;
use crate::tenancy::registry::ResolverRegistry;

/// Company id `n`, stable across calls.
pub fn company_id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn membership(n: u128, role: MembershipRole) -> CompanyMembership {
    let id = company_id(n);
    CompanyMembership {
        company_id: id,
        role,
        created_at: Utc::now(),
        company: Company {
            id,
            name: format!("Company {n}"),
            description: None,
            industry: None,
            website: None,
            logo_url: None,
            location: None,
            size: None,
            created_at: Utc::now(),
        },
    }
}

/// Returns the same list for every user; can be switched into a failing mode.
#[derive(Default)]
pub struct FakeMembershipQuery {
    memberships: Mutex<Vec<CompanyMembership>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeMembershipQuery {
    pub fn new(memberships: Vec<CompanyMembership>) -> Self {
        Self {
            memberships: Mutex::new(memberships),
            ..Default::default()
        }
    }

    pub fn set_memberships(&self, memberships: Vec<CompanyMembership>) {
        *self.memberships.lock().unwrap() = memberships;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipQuery for FakeMembershipQuery {
    async fn fetch_memberships(&self, _user_id: Uuid) -> Result<Vec<CompanyMembership>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.memberships.lock().unwrap().clone())
    }
}

/// Per-user lists; the next fetch for one chosen user parks until released.
/// The list is captured before parking, like a response already in flight.
pub struct GatedMembershipQuery {
    lists: Mutex<HashMap<Uuid, Vec<CompanyMembership>>>,
    gated_user: Mutex<Option<Uuid>>,
    entered: Notify,
    release: Semaphore,
}

impl GatedMembershipQuery {
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
            gated_user: Mutex::new(None),
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    pub fn set_memberships(&self, user_id: Uuid, memberships: Vec<CompanyMembership>) {
        self.lists.lock().unwrap().insert(user_id, memberships);
    }

    pub fn gate_next(&self, user_id: Uuid) {
        *self.gated_user.lock().unwrap() = Some(user_id);
    }

    /// Resolves once the gated fetch is parked.
    pub async fn wait_until_parked(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

#[async_trait]
impl MembershipQuery for GatedMembershipQuery {
    async fn fetch_memberships(&self, user_id: Uuid) -> Result<Vec<CompanyMembership>, AppError> {
        let memberships = self
            .lists
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        let gated = {
            let mut gated_user = self.gated_user.lock().unwrap();
            if *gated_user == Some(user_id) {
                *gated_user = None;
                true
            } else {
                false
            }
        };
        if gated {
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
        }
        Ok(memberships)
    }
}

/// App state over `query` with selections under `selections`. The pool is
/// lazy and never connects unless a handler reaches the database.
pub fn test_state(query: Arc<dyn MembershipQuery>, selections: &Path) -> AppState {
    AppState {
        db: PgPoolOptions::new()
            .connect_lazy("postgres://localhost/hireboard_test")
            .unwrap(),
        memberships: query,
        resolvers: Arc::new(ResolverRegistry::new(selections, 64)),
    }
}
