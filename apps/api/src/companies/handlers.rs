use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::companies::service::{create_company, get_company, update_company, CompanyUpdate, NewCompany};
use crate::errors::AppError;
use crate::models::company::{Company, MembershipRole};
use crate::state::AppState;
use crate::tenancy::resolver::ResolverSnapshot;
use crate::tenancy::{refresh_after_write, require_active, Session};

#[derive(Deserialize)]
pub struct CreateCompanyRequest {
    pub profile_id: Uuid,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub company: NewCompany,
}

#[derive(Serialize)]
pub struct CreateCompanyResponse {
    pub company: Company,
    /// `None` when the company exists but could not be made active yet.
    pub tenancy: Option<ResolverSnapshot>,
}

async fn try_activate(
    state: &AppState,
    session: &Session,
    company_id: Uuid,
) -> Result<ResolverSnapshot, AppError> {
    let handle = state.resolvers.handle(session.profile_id)?;
    handle
        .refresh(state.memberships.as_ref(), Some(session.user_id))
        .await?;
    handle.with_identity(session.user_id, |r| {
        r.select(company_id)?;
        Ok(r.snapshot())
    })
}

/// Makes a freshly created company the profile's active one. The company is
/// already committed, so a failure is logged and never turned into an error.
async fn activate_created_company(
    state: &AppState,
    session: &Session,
    company_id: Uuid,
) -> Option<ResolverSnapshot> {
    match try_activate(state, session, company_id).await {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(
                "Company {company_id} created but not activated for profile {}: {e}",
                session.profile_id
            );
            None
        }
    }
}

/// POST /api/v1/companies
pub async fn handle_create_company(
    State(state): State<AppState>,
    Json(req): Json<CreateCompanyRequest>,
) -> Result<(StatusCode, Json<CreateCompanyResponse>), AppError> {
    let company = create_company(&state.db, req.user_id, &req.company).await?;

    let session = Session {
        profile_id: req.profile_id,
        user_id: req.user_id,
    };
    let tenancy = activate_created_company(&state, &session, company.id).await;

    Ok((StatusCode::CREATED, Json(CreateCompanyResponse { company, tenancy })))
}

/// GET /api/v1/companies/active
pub async fn handle_get_active_company(
    State(state): State<AppState>,
    Query(session): Query<Session>,
) -> Result<Json<Company>, AppError> {
    let active = require_active(&state, &session, MembershipRole::Member).await?;
    let company = get_company(&state.db, active.company_id, session.user_id).await?;
    Ok(Json(company))
}

/// PATCH /api/v1/companies/active
pub async fn handle_update_active_company(
    State(state): State<AppState>,
    Query(session): Query<Session>,
    Json(update): Json<CompanyUpdate>,
) -> Result<Json<Company>, AppError> {
    let active = require_active(&state, &session, MembershipRole::Admin).await?;
    let company = update_company(&state.db, active.company_id, session.user_id, &update).await?;

    refresh_after_write(&state, &session).await;

    Ok(Json(company))
}
