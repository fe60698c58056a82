pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::companies::handlers as companies;
use crate::jobs::handlers as jobs;
use crate::state::AppState;
use crate::tenancy::handlers as tenancy;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Active company resolution
        .route("/api/v1/tenancy", get(tenancy::handle_get_tenancy))
        .route(
            "/api/v1/tenancy/active",
            put(tenancy::handle_select_company).delete(tenancy::handle_sign_out),
        )
        // Companies
        .route("/api/v1/companies", post(companies::handle_create_company))
        .route(
            "/api/v1/companies/active",
            get(companies::handle_get_active_company).patch(companies::handle_update_active_company),
        )
        // Job postings of the active company
        .route(
            "/api/v1/jobs",
            get(jobs::handle_list_jobs).post(jobs::handle_create_job),
        )
        .with_state(state)
}
