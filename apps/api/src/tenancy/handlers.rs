use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;
use crate::tenancy::resolver::ResolverSnapshot;

#[derive(Deserialize)]
pub struct TenancyQuery {
    pub profile_id: Uuid,
    /// Absent when signed out.
    pub user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct ProfileQuery {
    pub profile_id: Uuid,
}

#[derive(Deserialize)]
pub struct SelectCompanyRequest {
    pub profile_id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
}

/// GET /api/v1/tenancy
pub async fn handle_get_tenancy(
    State(state): State<AppState>,
    Query(params): Query<TenancyQuery>,
) -> Result<Json<ResolverSnapshot>, AppError> {
    let handle = state.resolvers.handle(params.profile_id)?;
    let snapshot = handle
        .refresh(state.memberships.as_ref(), params.user_id)
        .await?;
    Ok(Json(snapshot))
}

/// PUT /api/v1/tenancy/active
pub async fn handle_select_company(
    State(state): State<AppState>,
    Json(req): Json<SelectCompanyRequest>,
) -> Result<Json<ResolverSnapshot>, AppError> {
    let handle = state.resolvers.handle(req.profile_id)?;
    handle
        .ensure_resolved(state.memberships.as_ref(), req.user_id)
        .await?;
    let snapshot = handle.with_identity(req.user_id, |r| {
        r.select(req.company_id)?;
        Ok(r.snapshot())
    })?;
    Ok(Json(snapshot))
}

/// DELETE /api/v1/tenancy/active
pub async fn handle_sign_out(
    State(state): State<AppState>,
    Query(params): Query<ProfileQuery>,
) -> Result<StatusCode, AppError> {
    state
        .resolvers
        .handle(params.profile_id)?
        .with(|r| r.sign_out())?;
    Ok(StatusCode::NO_CONTENT)
}
