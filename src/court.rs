use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(CourtId);
id_type!(PlayerId);
id_type!(LockId);

#[derive(Debug, Clone, Serialize)]
pub struct Court {
    pub id: CourtId,
    pub name: String,
    /// Written only by the sweep; never consulted for admission.
    pub locked_flag: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Player,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Player => "player",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "player" => Some(Role::Player),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_marked: bool,
    pub is_flagged: bool,
    /// Sessions left on a prepaid package, if the player bought one.
    pub package_uses: Option<u32>,
    pub use_drop_in_package: bool,
    pub created_at: DateTime<Utc>,
}

/// Desk-side markers an administrator can put on a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerTag {
    Marked,
    Flagged,
}

/// A user row together with its password hash. Never serialized.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: PlayerId,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitingEntry {
    pub player_id: PlayerId,
    pub joined_at: DateTime<Utc>,
    /// Insertion order, breaks ties between entries sharing a join timestamp.
    #[serde(skip)]
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledLock {
    pub id: LockId,
    pub court_id: CourtId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: String,
}

impl ScheduledLock {
    /// Half-open: `starts_at <= at < ends_at`.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }
}

/// Where a group ended up after a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Active,
    Waiting,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::Active => "active",
            Placement::Waiting => "waiting",
        }
    }
}
