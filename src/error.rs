use crate::court::{CourtId, LockId, PlayerId, ScheduledLock};
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("court {0} not found")]
    CourtNotFound(CourtId),
    #[error("player {0} not found")]
    PlayerNotFound(PlayerId),
    #[error("lock {0} not found")]
    LockNotFound(LockId),
    #[error("invalid credentials for {username}")]
    AuthFailure { username: String },
    #[error("player {0} is already active or waiting on a court")]
    AlreadyActive(PlayerId),
    #[error("court {court} is locked: {}", .lock.reason)]
    CourtLocked { court: CourtId, lock: ScheduledLock },
    #[error("a group must have between 1 and 4 players, got {0}")]
    InvalidGroupSize(usize),
    #[error("invalid lock interval: {0}")]
    InvalidInterval(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("username {0} is already taken")]
    UsernameTaken(String),
    #[error("storage unavailable: {0}")]
    Persistence(StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CourtMissing(id) => SchedulerError::CourtNotFound(id),
            StoreError::PlayerMissing(id) => SchedulerError::PlayerNotFound(id),
            StoreError::PlayerAlreadyPlaced(id) => SchedulerError::AlreadyActive(id),
            StoreError::UsernameTaken(name) => SchedulerError::UsernameTaken(name),
            StoreError::Corrupt(detail) => SchedulerError::Internal(detail),
            other => SchedulerError::Persistence(other),
        }
    }
}

impl SchedulerError {
    pub fn status(&self) -> StatusCode {
        match self {
            SchedulerError::CourtNotFound(_)
            | SchedulerError::PlayerNotFound(_)
            | SchedulerError::LockNotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::AuthFailure { .. } => StatusCode::UNAUTHORIZED,
            SchedulerError::AlreadyActive(_) | SchedulerError::UsernameTaken(_) => {
                StatusCode::CONFLICT
            }
            SchedulerError::CourtLocked { .. } => StatusCode::LOCKED,
            SchedulerError::InvalidGroupSize(_)
            | SchedulerError::InvalidInterval(_)
            | SchedulerError::Invalid(_) => StatusCode::BAD_REQUEST,
            SchedulerError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            SchedulerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            SchedulerError::Persistence(e) => {
                error!("Storage error: {e}");
                json!({ "error": "storage unavailable, try again", "retryable": true })
            }
            SchedulerError::Internal(e) => {
                error!("Internal error: {e}");
                json!({ "error": "internal error" })
            }
            SchedulerError::AuthFailure { username } => {
                json!({ "error": self.to_string(), "username": username })
            }
            SchedulerError::AlreadyActive(player) => {
                json!({ "error": self.to_string(), "player": player })
            }
            SchedulerError::CourtLocked { lock, .. } => {
                json!({ "error": self.to_string(), "lock": lock })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_rows_are_not_retryable() {
        let err = SchedulerError::from(StoreError::Corrupt("role superuser".into()));
        assert!(matches!(err, SchedulerError::Internal(ref d) if d == "role superuser"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn database_failures_are_retryable() {
        let err = SchedulerError::from(StoreError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(err, SchedulerError::Persistence(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn missing_rows_map_to_not_found() {
        let court = CourtId::new();
        let err = SchedulerError::from(StoreError::CourtMissing(court));
        assert!(matches!(err, SchedulerError::CourtNotFound(id) if id == court));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
