//! Membership Query — the caller's companies, each with the caller's role.
//!
//! Read-only. Visibility of rows is the database's concern; this layer never
//! filters, re-sorts or caches. Retries belong to the caller.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::company::{CompanyMembership, CompanyMembershipRow};

/// Carried in `AppState` as `Arc<dyn MembershipQuery>` so tests can swap in a fake.
#[async_trait]
pub trait MembershipQuery: Send + Sync {
    /// Memberships in backend order. Empty when the user belongs nowhere.
    async fn fetch_memberships(&self, user_id: Uuid) -> Result<Vec<CompanyMembership>, AppError>;
}

pub struct PgMembershipQuery {
    pool: PgPool,
}

impl PgMembershipQuery {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipQuery for PgMembershipQuery {
    async fn fetch_memberships(&self, user_id: Uuid) -> Result<Vec<CompanyMembership>, AppError> {
        let rows = sqlx::query_as::<_, CompanyMembershipRow>(
            r#"
            SELECT m.company_id, m.role, m.created_at AS member_since,
                   c.id, c.name, c.description, c.industry, c.website,
                   c.logo_url, c.location, c.size, c.created_at
            FROM company_members m
            JOIN companies c ON c.id = m.company_id
            WHERE m.user_id = $1
            ORDER BY m.created_at ASC, m.company_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        debug!("Fetched {} memberships for user {user_id}", rows.len());

        let memberships = rows
            .into_iter()
            .map(CompanyMembership::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(memberships)
    }
}
