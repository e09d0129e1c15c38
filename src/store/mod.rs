//! Persistence port for courts, placements, locks and accounts.
//!
//! Implementations must apply every mutating call atomically: either all of
//! its writes land or none do. [`CourtStore::admit`] must in addition make the
//! "player is not placed anywhere" check and the insert a single critical
//! section across all courts.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::court::{
    Account, Court, CourtId, LockId, Placement, Player, PlayerId, PlayerTag, Role,
    ScheduledLock,
};
use crate::occupancy::{Admission, Occupancy, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("court {0} does not exist")]
    CourtMissing(CourtId),
    #[error("player {0} does not exist")]
    PlayerMissing(PlayerId),
    #[error("player {0} is already active or waiting on a court")]
    PlayerAlreadyPlaced(PlayerId),
    #[error("username {0} is taken")]
    UsernameTaken(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Everything the scheduler needs to know about one court, read consistently.
#[derive(Debug, Clone)]
pub struct CourtRecord {
    pub court: Court,
    pub occupancy: Occupancy,
    pub locks: Vec<ScheduledLock>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub package_uses: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`CourtStore::delete_player`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerDeletion {
    Deleted,
    /// No player-role account has this id.
    Missing,
    /// Nothing was deleted: the player still holds a placement on this court.
    Placed(CourtId),
}

#[async_trait]
pub trait CourtStore: Send + Sync + 'static {
    async fn create_court(&self, name: &str, now: DateTime<Utc>) -> Result<Court, StoreError>;

    /// Cascades to the court's locks and placements.
    async fn delete_court(&self, id: CourtId) -> Result<bool, StoreError>;

    async fn list_courts(&self) -> Result<Vec<Court>, StoreError>;

    async fn set_locked_flag(&self, id: CourtId, locked: bool) -> Result<(), StoreError>;

    async fn load_record(&self, id: CourtId) -> Result<Option<CourtRecord>, StoreError>;

    /// All courts in creation order.
    async fn list_records(&self) -> Result<Vec<CourtRecord>, StoreError>;

    /// Places `players` on `court` as decided by `admission`, all sharing the
    /// join timestamp `now`.
    ///
    /// Fails with [`StoreError::PlayerAlreadyPlaced`] without writing anything
    /// if any of them is active or waiting on any court.
    async fn admit(
        &self,
        court: CourtId,
        players: &[PlayerId],
        admission: Admission,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn apply(&self, court: CourtId, transition: &Transition) -> Result<(), StoreError>;

    async fn placement_of(
        &self,
        player: PlayerId,
    ) -> Result<Option<(CourtId, Placement)>, StoreError>;

    async fn add_lock(&self, lock: &ScheduledLock) -> Result<(), StoreError>;

    async fn remove_lock(&self, court: CourtId, lock: LockId) -> Result<bool, StoreError>;

    async fn create_account(&self, account: NewAccount) -> Result<Player, StoreError>;

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError>;

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError>;

    async fn has_admin(&self) -> Result<bool, StoreError>;

    async fn list_players(&self) -> Result<Vec<Player>, StoreError>;

    async fn get_players(&self, ids: &[PlayerId]) -> Result<Vec<Player>, StoreError>;

    /// Sets a tag on a player-role account. `None` if there is no such player.
    async fn set_tag(
        &self,
        id: PlayerId,
        tag: PlayerTag,
        value: bool,
    ) -> Result<Option<Player>, StoreError>;

    /// Flips a tag and returns its new value.
    async fn toggle_tag(&self, id: PlayerId, tag: PlayerTag) -> Result<Option<bool>, StoreError>;

    async fn set_package(
        &self,
        id: PlayerId,
        package_uses: Option<u32>,
        use_drop_in_package: bool,
    ) -> Result<Option<Player>, StoreError>;

    /// Deletes a player-role account, but only while it holds no placement.
    ///
    /// The placement check and the delete are one critical section with
    /// [`CourtStore::admit`], so a placement is never dropped behind the
    /// scheduler's back.
    async fn delete_player(&self, id: PlayerId) -> Result<PlayerDeletion, StoreError>;
}
