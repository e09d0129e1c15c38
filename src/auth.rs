use crate::court::{PlayerId, Role};
use crate::error::SchedulerError;
use crate::store::{CourtStore, StoreError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use courtside_auth_common::{
    hash_password, issue_jwt, verify_password, AuthError, AuthSecret, Claims,
};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid credentials for {0}")]
    Rejected(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("credential check failed: {0}")]
    Internal(String),
}

impl From<VerifyError> for SchedulerError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Rejected(username) => SchedulerError::AuthFailure { username },
            VerifyError::Store(e) => e.into(),
            VerifyError::Internal(e) => SchedulerError::Internal(e),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    async fn verify(&self, username: &str, password: &str) -> Result<PlayerId, VerifyError>;
}

/// Checks username/password pairs against the account table, accepting only
/// accounts of one role.
#[derive(Clone)]
pub struct StoreVerifier {
    store: Arc<dyn CourtStore>,
    role: Role,
}

impl StoreVerifier {
    pub fn players(store: Arc<dyn CourtStore>) -> Self {
        Self {
            store,
            role: Role::Player,
        }
    }

    pub fn admins(store: Arc<dyn CourtStore>) -> Self {
        Self {
            store,
            role: Role::Admin,
        }
    }
}

#[async_trait]
impl CredentialVerifier for StoreVerifier {
    async fn verify(&self, username: &str, password: &str) -> Result<PlayerId, VerifyError> {
        let rejected = || VerifyError::Rejected(username.to_string());

        let account = match self.store.find_account(username).await? {
            Some(account) if account.role == self.role => account,
            _ => {
                debug!(username, "Unknown account");
                return Err(rejected());
            }
        };

        let password = password.to_string();
        let phc = account.password_hash;
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &phc))
            .await
            .map_err(|e| VerifyError::Internal(e.to_string()))?
            .map_err(|e| VerifyError::Internal(e.to_string()))?;

        if matches {
            Ok(account.id)
        } else {
            debug!(username, "Password mismatch");
            Err(rejected())
        }
    }
}

/// Verifies every pair in order and stops at the first failure.
pub async fn verify_group(
    verifier: &dyn CredentialVerifier,
    credentials: &[Credentials],
) -> Result<Vec<PlayerId>, VerifyError> {
    let mut ids = Vec::with_capacity(credentials.len());
    for c in credentials {
        ids.push(verifier.verify(&c.username, &c.password).await?);
    }
    Ok(ids)
}
