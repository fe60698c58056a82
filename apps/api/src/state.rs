use std::sync::Arc;

use sqlx::PgPool;

use crate::tenancy::membership_query::MembershipQuery;
use crate::tenancy::registry::ResolverRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Pluggable membership source. Default: PgMembershipQuery over `db`.
    pub memberships: Arc<dyn MembershipQuery>,
    /// Active company resolvers, one per client profile.
    pub resolvers: Arc<ResolverRegistry>,
}
