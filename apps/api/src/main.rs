mod companies;
mod config;
mod db;
mod errors;
mod jobs;
mod models;
mod routes;
mod state;
mod tenancy;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;
use crate::tenancy::membership_query::PgMembershipQuery;
use crate::tenancy::registry::ResolverRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Hireboard API v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;

    let memberships = Arc::new(PgMembershipQuery::new(db.clone()));
    let resolvers = Arc::new(ResolverRegistry::new(
        config.selection_store_dir.clone(),
        config.max_cached_profiles,
    ));
    info!(
        "Company selections persisted under {} (up to {} profiles cached)",
        config.selection_store_dir.display(),
        config.max_cached_profiles
    );

    let state = AppState {
        db,
        memberships,
        resolvers,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client's domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
