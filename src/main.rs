use anyhow::Context;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod config;
mod db;
mod engine;
mod error;
mod handlers;
mod models;

use config::Config;
use db::memory::MemoryStore;
use db::postgres::PgStore;
use engine::penalty::{LogPenaltySender, PenaltySender, WebhookPenaltySender};
use engine::progress::ProgressResolver;
use engine::recurrence::Evaluator;
use engine::store::{CheckinStore, GoalStore, MissMarkerStore};
use engine::sweep::MissSweep;

#[derive(Clone)]
pub struct AppState {
    pub goals: Arc<dyn GoalStore>,
    pub checkins: Arc<dyn CheckinStore>,
    pub resolver: ProgressResolver,
    pub sweep: Arc<MissSweep>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new<S>(store: S, sender: Arc<dyn PenaltySender>, config: Arc<Config>) -> Self
    where
        S: GoalStore + CheckinStore + MissMarkerStore + 'static,
    {
        let resolver = ProgressResolver::new(Evaluator::new(config.recurrence_policy()));
        let store = Arc::new(store);
        let sweep = MissSweep::new(
            store.clone(),
            store.clone(),
            store.clone(),
            sender,
            resolver,
            config.sweep_options(),
        );
        Self {
            goals: store.clone(),
            checkins: store,
            resolver,
            sweep: Arc::new(sweep),
            config,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz));

    let sweep_routes = Router::new()
        .route("/api/sweep", post(handlers::sweep::trigger_sweep))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_sweep_token,
        ));

    let protected_routes = Router::new()
        // Goals
        .route("/api/goals", get(handlers::goals::list_goals))
        .route("/api/goals", post(handlers::goals::create_goal))
        .route("/api/goals/overview", get(handlers::goals::overview))
        .route("/api/goals/:id", get(handlers::goals::get_goal))
        .route("/api/goals/:id", put(handlers::goals::update_goal))
        .route("/api/goals/:id", delete(handlers::goals::delete_goal))
        .route("/api/goals/:id/progress", get(handlers::goals::get_progress))
        // Check-ins
        .route(
            "/api/goals/:id/checkins",
            post(handlers::checkins::set_checkin),
        )
        .route(
            "/api/goals/:id/checkins",
            get(handlers::checkins::list_checkins),
        )
        .layer(middleware::from_fn(auth::middleware::require_user));

    let allowed_origins: Vec<axum::http::HeaderValue> = state
        .config
        .frontend_url
        .split(',')
        .filter_map(|o| o.trim().parse::<axum::http::HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static(auth::middleware::USER_ID_HEADER),
            axum::http::HeaderName::from_static(auth::middleware::SWEEP_TOKEN_HEADER),
        ]);

    Router::new()
        .merge(public_routes)
        .merge(sweep_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "goalstakes_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env().context("Invalid configuration")?);

    let sender: Arc<dyn PenaltySender> = match &config.penalty_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Penalties delivered by webhook");
            Arc::new(WebhookPenaltySender::new(
                url.clone(),
                Duration::from_secs(config.penalty_timeout_secs),
            )?)
        }
        None => Arc::new(LogPenaltySender),
    };

    let state = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");

            AppState::new(PgStore::new(pool), sender, config.clone())
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            AppState::new(MemoryStore::new(), sender, config.clone())
        }
    };

    if config.sweep_enabled {
        handlers::sweep::spawn_sweep_worker(state.sweep.clone(), config.sweep_interval_secs);
    }

    let app = build_router(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}
