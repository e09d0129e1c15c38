//! Player and administrator accounts.

use crate::auth::hash_password;
use crate::clock::Clock;
use crate::court::{Player, PlayerId, PlayerTag, Role};
use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::store::{CourtStore, NewAccount, StoreError};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub const TEMP_PASSWORD_LEN: usize = 8;

/// A freshly registered player. The temporary password is only ever shown here.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredPlayer {
    pub id: PlayerId,
    pub username: String,
    pub temp_password: String,
}

#[derive(Clone)]
pub struct PlayerRegistry {
    store: Arc<dyn CourtStore>,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
}

fn temp_password() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn base_username(first_name: &str) -> String {
    first_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

async fn hash(password: String) -> Result<String, SchedulerError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| SchedulerError::Internal(e.to_string()))?
        .map_err(|e| SchedulerError::Internal(e.to_string()))
}

impl PlayerRegistry {
    pub fn new(store: Arc<dyn CourtStore>, scheduler: Scheduler, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            scheduler,
            clock,
        }
    }

    /// First free username of the form `mia`, `mia2`, `mia3`, ...
    async fn free_username(&self, base: &str) -> Result<String, SchedulerError> {
        let mut candidate = base.to_string();
        let mut suffix = 2;
        while self.store.username_exists(&candidate).await? {
            candidate = format!("{base}{suffix}");
            suffix += 1;
        }
        Ok(candidate)
    }

    pub async fn register_player(
        &self,
        first_name: &str,
        last_name: &str,
        package_uses: Option<u32>,
    ) -> Result<RegisteredPlayer, SchedulerError> {
        let first_name = first_name.trim();
        let last_name = last_name.trim();
        let base = base_username(first_name);
        if base.is_empty() {
            return Err(SchedulerError::Invalid("first name must not be empty".into()));
        }

        let password = temp_password();
        let password_hash = hash(password.clone()).await?;

        // a concurrent registration may take the name between check and insert
        loop {
            let username = self.free_username(&base).await?;
            let account = NewAccount {
                username: username.clone(),
                password_hash: password_hash.clone(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                role: Role::Player,
                package_uses,
                created_at: self.clock.now(),
            };
            match self.store.create_account(account).await {
                Ok(player) => {
                    info!(player = %player.id, username = %player.username, "Player registered");
                    return Ok(RegisteredPlayer {
                        id: player.id,
                        username,
                        temp_password: password,
                    });
                }
                Err(StoreError::UsernameTaken(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn register_admin(
        &self,
        username: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Player, SchedulerError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SchedulerError::Invalid(
                "username and password are required".into(),
            ));
        }
        let password_hash = hash(password.to_string()).await?;
        let admin = self
            .store
            .create_account(NewAccount {
                username: username.to_string(),
                password_hash,
                first_name: first_name.trim().to_string(),
                last_name: last_name.trim().to_string(),
                role: Role::Admin,
                package_uses: None,
                created_at: self.clock.now(),
            })
            .await?;
        info!(admin = %admin.id, username = %admin.username, "Administrator registered");
        Ok(admin)
    }

    pub async fn admin_exists(&self) -> Result<bool, SchedulerError> {
        Ok(self.store.has_admin().await?)
    }

    pub async fn list_players(&self) -> Result<Vec<Player>, SchedulerError> {
        Ok(self.store.list_players().await?)
    }

    pub async fn set_tag(
        &self,
        id: PlayerId,
        tag: PlayerTag,
        value: bool,
    ) -> Result<Player, SchedulerError> {
        let player = self
            .store
            .set_tag(id, tag, value)
            .await?
            .ok_or(SchedulerError::PlayerNotFound(id))?;
        info!(player = %id, ?tag, value, "Player tag set");
        Ok(player)
    }

    pub async fn toggle_tag(&self, id: PlayerId, tag: PlayerTag) -> Result<bool, SchedulerError> {
        let value = self
            .store
            .toggle_tag(id, tag)
            .await?
            .ok_or(SchedulerError::PlayerNotFound(id))?;
        info!(player = %id, ?tag, value, "Player tag toggled");
        Ok(value)
    }

    pub async fn set_package(
        &self,
        id: PlayerId,
        package_uses: Option<u32>,
        use_drop_in_package: bool,
    ) -> Result<Player, SchedulerError> {
        self.store
            .set_package(id, package_uses, use_drop_in_package)
            .await?
            .ok_or(SchedulerError::PlayerNotFound(id))
    }

    pub async fn delete_player(&self, id: PlayerId) -> Result<(), SchedulerError> {
        self.scheduler.delete_player(id).await
    }

    /// Deletes every player account, taking each one off its court first.
    /// Returns how many were deleted.
    pub async fn clear_players(&self) -> Result<usize, SchedulerError> {
        let mut deleted = 0;
        for player in self.store.list_players().await? {
            match self.scheduler.delete_player(player.id).await {
                Ok(()) => deleted += 1,
                // deleted concurrently
                Err(SchedulerError::PlayerNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(deleted, "Players cleared");
        Ok(deleted)
    }
}
