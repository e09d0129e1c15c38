pub mod args;
pub mod auth;
pub mod clock;
pub mod court;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod occupancy;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod sweep;

use crate::{
    args::Args,
    auth::{AuthSecret, Claims, CredentialVerifier},
    clock::SystemClock,
    error::SchedulerError,
    state::ServerState,
    store::SqliteStore,
};
use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

pub fn setup_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courtside_server=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(false)
                .with_target(false),
        )
        .init();
}

#[derive(Clone)]
pub struct AppState {
    pub state: ServerState,
    pub secret: AuthSecret,
}

impl FromRef<AppState> for AuthSecret {
    fn from_ref(input: &AppState) -> Self {
        input.secret.clone()
    }
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    if args.jwt_secret == "secret" {
        warn!("JWT_SECRET not set, using the insecure default");
    }

    let store = SqliteStore::connect(&args.database_url).await?;
    let state = ServerState::new(Arc::new(store), Arc::new(SystemClock));
    let sweeper = sweep::spawn(state.scheduler.clone(), args.sweep_interval());

    let app_state = AppState {
        state,
        secret: AuthSecret(args.jwt_secret.clone()),
    };

    let listener = TcpListener::bind(args.host).await?;
    info!("listening on {}", args.host);
    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    sweeper.shutdown().await;
    Ok(())
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route(
            "/courts",
            get(handlers::list_courts).post(handlers::create_court),
        )
        .route(
            "/courts/:court_id",
            get(handlers::get_court).delete(handlers::delete_court),
        )
        .route("/courts/:court_id/locks", post(handlers::add_lock))
        .route(
            "/courts/:court_id/locks/:lock_id",
            delete(handlers::remove_lock),
        )
        .route("/courts/:court_id/queue", post(handlers::queue))
        .route("/courts/:court_id/leave", post(handlers::leave))
        .route(
            "/players",
            get(handlers::list_players)
                .post(handlers::register_player)
                .delete(handlers::clear_players),
        )
        .route("/players/:player_id", delete(handlers::delete_player))
        .route("/players/:player_id/mark", put(handlers::mark_player))
        .route("/players/:player_id/flag", put(handlers::flag_player))
        .route("/players/:player_id/toggle-mark", post(handlers::toggle_mark))
        .route("/players/:player_id/toggle-flag", post(handlers::toggle_flag))
        .route("/players/:player_id/package", put(handlers::set_package))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    username: String,
    password: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

/// Open until the first administrator exists, admin-only afterwards.
async fn register_handler(
    State(state): State<AppState>,
    claims: Option<Claims>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let registry = &state.state.registry;
    if claims.is_none()
        && registry
            .admin_exists()
            .await
            .map_err(IntoResponse::into_response)?
    {
        return Err(auth::AuthError::InvalidToken.into_response());
    }

    let admin = registry
        .register_admin(
            &payload.username,
            &payload.password,
            &payload.first_name,
            &payload.last_name,
        )
        .await
        .map_err(IntoResponse::into_response)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": admin.id, "username": admin.username })),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

async fn login_handler(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, axum::response::Response> {
    let admin_id = state
        .state
        .admins
        .verify(&payload.username, &payload.password)
        .await
        .map_err(|e| SchedulerError::from(e).into_response())?;

    let token = auth::issue_jwt(admin_id.to_string(), payload.username, &state.secret)
        .map_err(IntoResponse::into_response)?;
    Ok(Json(json!({ "token": token })))
}
