use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use crate::errors::AppError;
use crate::jobs::service::{create_job, list_jobs, NewJobPosting};
use crate::models::company::MembershipRole;
use crate::models::job::JobPosting;
use crate::state::AppState;
use crate::tenancy::{require_active, Session};

/// GET /api/v1/jobs
pub async fn handle_list_jobs(
    State(state): State<AppState>,
    Query(session): Query<Session>,
) -> Result<Json<Vec<JobPosting>>, AppError> {
    let active = require_active(&state, &session, MembershipRole::Member).await?;
    let jobs = list_jobs(&state.db, active.company_id, session.user_id).await?;
    Ok(Json(jobs))
}

/// POST /api/v1/jobs
pub async fn handle_create_job(
    State(state): State<AppState>,
    Query(session): Query<Session>,
    Json(req): Json<NewJobPosting>,
) -> Result<(StatusCode, Json<JobPosting>), AppError> {
    let active = require_active(&state, &session, MembershipRole::Admin).await?;
    let job = create_job(&state.db, active.company_id, session.user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(job)))
}
