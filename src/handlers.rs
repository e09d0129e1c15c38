//! Court and player routes. All of them require an administrator token.

use crate::auth::{verify_group, Claims, Credentials};
use crate::court::{CourtId, LockId, PlayerId, PlayerTag};
use crate::error::SchedulerError;
use crate::occupancy::CAPACITY;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

type Result<T> = std::result::Result<T, SchedulerError>;

pub async fn list_courts(State(app): State<AppState>, _: Claims) -> Result<impl IntoResponse> {
    Ok(Json(app.state.scheduler.snapshots().await?))
}

#[derive(Deserialize)]
pub struct CreateCourtRequest {
    name: String,
}

pub async fn create_court(
    State(app): State<AppState>,
    _: Claims,
    Json(payload): Json<CreateCourtRequest>,
) -> Result<impl IntoResponse> {
    let scheduler = &app.state.scheduler;
    let court = scheduler.create_court(&payload.name).await?;
    Ok((StatusCode::CREATED, Json(scheduler.snapshot(court.id).await?)))
}

pub async fn get_court(
    State(app): State<AppState>,
    Path(court_id): Path<Uuid>,
    _: Claims,
) -> Result<impl IntoResponse> {
    Ok(Json(app.state.scheduler.snapshot(CourtId(court_id)).await?))
}

pub async fn delete_court(
    State(app): State<AppState>,
    Path(court_id): Path<Uuid>,
    _: Claims,
) -> Result<impl IntoResponse> {
    app.state.scheduler.delete_court(CourtId(court_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct AddLockRequest {
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    reason: String,
}

pub async fn add_lock(
    State(app): State<AppState>,
    Path(court_id): Path<Uuid>,
    _: Claims,
    Json(payload): Json<AddLockRequest>,
) -> Result<impl IntoResponse> {
    let lock = app
        .state
        .scheduler
        .add_lock(
            CourtId(court_id),
            payload.starts_at,
            payload.ends_at,
            &payload.reason,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(lock)))
}

pub async fn remove_lock(
    State(app): State<AppState>,
    Path((court_id, lock_id)): Path<(Uuid, Uuid)>,
    _: Claims,
) -> Result<impl IntoResponse> {
    app.state
        .scheduler
        .remove_lock(CourtId(court_id), LockId(lock_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct GroupRequest {
    players: Vec<Credentials>,
}

impl GroupRequest {
    /// Rejects a bad group size before any password is hashed.
    fn checked(&self) -> Result<&[Credentials]> {
        let len = self.players.len();
        if len == 0 || len > CAPACITY {
            return Err(SchedulerError::InvalidGroupSize(len));
        }
        Ok(&self.players)
    }
}

pub async fn queue(
    State(app): State<AppState>,
    Path(court_id): Path<Uuid>,
    _: Claims,
    Json(payload): Json<GroupRequest>,
) -> Result<impl IntoResponse> {
    let court = CourtId(court_id);
    let scheduler = &app.state.scheduler;
    let players = verify_group(app.state.players.as_ref(), payload.checked()?).await?;
    let placement = scheduler.admit(court, &players).await?;
    Ok(Json(json!({
        "placement": placement,
        "court": scheduler.snapshot(court).await?,
    })))
}

pub async fn leave(
    State(app): State<AppState>,
    Path(court_id): Path<Uuid>,
    _: Claims,
    Json(payload): Json<GroupRequest>,
) -> Result<impl IntoResponse> {
    let court = CourtId(court_id);
    let scheduler = &app.state.scheduler;
    let players = verify_group(app.state.players.as_ref(), payload.checked()?).await?;
    scheduler.remove(court, &players).await?;
    Ok(Json(scheduler.snapshot(court).await?))
}

pub async fn list_players(State(app): State<AppState>, _: Claims) -> Result<impl IntoResponse> {
    Ok(Json(app.state.registry.list_players().await?))
}

#[derive(Deserialize)]
pub struct RegisterPlayerRequest {
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    package_uses: Option<u32>,
}

pub async fn register_player(
    State(app): State<AppState>,
    _: Claims,
    Json(payload): Json<RegisterPlayerRequest>,
) -> Result<impl IntoResponse> {
    let player = app
        .state
        .registry
        .register_player(&payload.first_name, &payload.last_name, payload.package_uses)
        .await?;
    Ok((StatusCode::CREATED, Json(player)))
}

pub async fn delete_player(
    State(app): State<AppState>,
    Path(player_id): Path<Uuid>,
    _: Claims,
) -> Result<impl IntoResponse> {
    app.state
        .registry
        .delete_player(PlayerId(player_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_players(State(app): State<AppState>, _: Claims) -> Result<impl IntoResponse> {
    let deleted = app.state.registry.clear_players().await?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Deserialize)]
pub struct MarkRequest {
    is_marked: bool,
}

pub async fn mark_player(
    State(app): State<AppState>,
    Path(player_id): Path<Uuid>,
    _: Claims,
    Json(payload): Json<MarkRequest>,
) -> Result<impl IntoResponse> {
    let player = app
        .state
        .registry
        .set_tag(PlayerId(player_id), PlayerTag::Marked, payload.is_marked)
        .await?;
    Ok(Json(player))
}

#[derive(Deserialize)]
pub struct FlagRequest {
    is_flagged: bool,
}

pub async fn flag_player(
    State(app): State<AppState>,
    Path(player_id): Path<Uuid>,
    _: Claims,
    Json(payload): Json<FlagRequest>,
) -> Result<impl IntoResponse> {
    let player = app
        .state
        .registry
        .set_tag(PlayerId(player_id), PlayerTag::Flagged, payload.is_flagged)
        .await?;
    Ok(Json(player))
}

pub async fn toggle_mark(
    State(app): State<AppState>,
    Path(player_id): Path<Uuid>,
    _: Claims,
) -> Result<impl IntoResponse> {
    let is_marked = app
        .state
        .registry
        .toggle_tag(PlayerId(player_id), PlayerTag::Marked)
        .await?;
    Ok(Json(json!({ "is_marked": is_marked })))
}

pub async fn toggle_flag(
    State(app): State<AppState>,
    Path(player_id): Path<Uuid>,
    _: Claims,
) -> Result<impl IntoResponse> {
    let is_flagged = app
        .state
        .registry
        .toggle_tag(PlayerId(player_id), PlayerTag::Flagged)
        .await?;
    Ok(Json(json!({ "is_flagged": is_flagged })))
}

#[derive(Deserialize)]
pub struct PackageRequest {
    package_uses: Option<u32>,
    #[serde(default)]
    use_drop_in_package: bool,
}

pub async fn set_package(
    State(app): State<AppState>,
    Path(player_id): Path<Uuid>,
    _: Claims,
    Json(payload): Json<PackageRequest>,
) -> Result<impl IntoResponse> {
    let player = app
        .state
        .registry
        .set_package(
            PlayerId(player_id),
            payload.package_uses,
            payload.use_drop_in_package,
        )
        .await?;
    Ok(Json(player))
}
