// Active company resolution: which company a client profile is currently working in.
// Company-scoped screens go through `require_active` and never query memberships directly.

pub mod handlers;
pub mod membership_query;
pub mod registry;
pub mod resolver;
pub mod selection_store;
#[cfg(test)]
pub mod test_support;

use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::company::{CompanyMembership, MembershipRole};
use crate::state::AppState;

/// Who is asking, and from which client profile.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Session {
    pub profile_id: Uuid,
    pub user_id: Uuid,
}

/// Resolves the session's active company and checks the caller's role in it.
/// Memberships are fetched only if this profile has not resolved the user yet.
pub async fn require_active(
    state: &AppState,
    session: &Session,
    min_role: MembershipRole,
) -> Result<CompanyMembership, AppError> {
    let handle = state.resolvers.handle(session.profile_id)?;
    let snapshot = handle
        .ensure_resolved(state.memberships.as_ref(), session.user_id)
        .await?;

    let active = snapshot.active.ok_or(AppError::NoActiveCompany)?;
    if !active.role.satisfies(min_role) {
        warn!(
            "User {} is {} in company {}, needs {}",
            session.user_id,
            active.role.as_str(),
            active.company_id,
            min_role.as_str()
        );
        return Err(AppError::Forbidden);
    }
    Ok(active)
}

/// Refetches after a committed write so the switcher shows fresh company data.
/// The write already succeeded, so a failure here is only logged; the next
/// `GET /api/v1/tenancy` recomputes the snapshot.
pub async fn refresh_after_write(state: &AppState, session: &Session) {
    let result = match state.resolvers.handle(session.profile_id) {
        Ok(handle) => handle
            .refresh(state.memberships.as_ref(), Some(session.user_id))
            .await
            .map(|_| ()),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!("Resolver refreshed for profile {}", session.profile_id),
        Err(e) => warn!(
            "Resolver refresh after write failed for profile {}: {e}",
            session.profile_id
        ),
    }
}
