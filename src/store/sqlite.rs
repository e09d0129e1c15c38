use super::{CourtRecord, CourtStore, NewAccount, PlayerDeletion, StoreError};
use crate::clock::{from_millis, to_millis};
use crate::court::{
    Account, Court, CourtId, LockId, Placement, Player, PlayerId, PlayerTag, Role,
    ScheduledLock, WaitingEntry,
};
use crate::occupancy::{Admission, Occupancy, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

const MAX_CONNECTIONS: u32 = 10;

#[derive(sqlx::FromRow)]
struct CourtRow {
    id: Uuid,
    name: String,
    timer_started_at: Option<i64>,
    is_locked: bool,
    created_at: i64,
}

#[derive(sqlx::FromRow)]
struct PlacementRow {
    player_id: Uuid,
    status: String,
    joined_at: i64,
    seq: i64,
}

#[derive(sqlx::FromRow)]
struct LockRow {
    id: Uuid,
    court_id: Uuid,
    starts_at: i64,
    ends_at: i64,
    reason: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    role: String,
    is_marked: bool,
    is_flagged: bool,
    package_uses: Option<i64>,
    use_drop_in_package: bool,
    created_at: i64,
}

fn instant(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    from_millis(ms).ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

impl TryFrom<CourtRow> for Court {
    type Error = StoreError;

    fn try_from(row: CourtRow) -> Result<Self, Self::Error> {
        Ok(Court {
            id: CourtId(row.id),
            name: row.name,
            locked_flag: row.is_locked,
            created_at: instant(row.created_at)?,
        })
    }
}

impl TryFrom<LockRow> for ScheduledLock {
    type Error = StoreError;

    fn try_from(row: LockRow) -> Result<Self, Self::Error> {
        Ok(ScheduledLock {
            id: LockId(row.id),
            court_id: CourtId(row.court_id),
            starts_at: instant(row.starts_at)?,
            ends_at: instant(row.ends_at)?,
            reason: row.reason,
        })
    }
}

impl UserRow {
    fn role(&self) -> Result<Role, StoreError> {
        Role::parse(&self.role).ok_or_else(|| StoreError::Corrupt(format!("role {}", self.role)))
    }

    fn into_player(self) -> Result<Player, StoreError> {
        let package_uses = self
            .package_uses
            .map(|uses| {
                u32::try_from(uses).map_err(|_| StoreError::Corrupt(format!("package uses {uses}")))
            })
            .transpose()?;
        Ok(Player {
            id: PlayerId(self.id),
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            is_marked: self.is_marked,
            is_flagged: self.is_flagged,
            package_uses,
            use_drop_in_package: self.use_drop_in_package,
            created_at: instant(self.created_at)?,
        })
    }
}

fn tag_column(tag: PlayerTag) -> &'static str {
    match tag {
        PlayerTag::Marked => "is_marked",
        PlayerTag::Flagged => "is_flagged",
    }
}

fn placement(status: &str) -> Result<Placement, StoreError> {
    match status {
        "active" => Ok(Placement::Active),
        "waiting" => Ok(Placement::Waiting),
        other => Err(StoreError::Corrupt(format!("placement status {other}"))),
    }
}

/// SQLite-backed store.
///
/// Writes from this process are funnelled through one async mutex so that
/// transactions never race for SQLite's write lock; the `placements` primary
/// key still rejects a second placement of the same player.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations complete.");

        Ok(Self {
            pool,
            writer: Default::default(),
        })
    }

    async fn read_record(
        conn: &mut SqliteConnection,
        row: CourtRow,
    ) -> Result<CourtRecord, StoreError> {
        let placements: Vec<PlacementRow> = sqlx::query_as(
            "SELECT player_id, status, joined_at, seq FROM placements
            WHERE court_id = ? ORDER BY joined_at, seq",
        )
        .bind(row.id)
        .fetch_all(&mut *conn)
        .await?;

        let locks: Vec<LockRow> = sqlx::query_as(
            "SELECT id, court_id, starts_at, ends_at, reason FROM court_locks
            WHERE court_id = ? ORDER BY starts_at",
        )
        .bind(row.id)
        .fetch_all(&mut *conn)
        .await?;

        let mut active = Vec::new();
        let mut waiting = Vec::new();
        for p in placements {
            match placement(&p.status)? {
                Placement::Active => active.push(PlayerId(p.player_id)),
                Placement::Waiting => waiting.push(WaitingEntry {
                    player_id: PlayerId(p.player_id),
                    joined_at: instant(p.joined_at)?,
                    seq: p.seq,
                }),
            }
        }

        let timer_started_at = row.timer_started_at.map(instant).transpose()?;
        Ok(CourtRecord {
            occupancy: Occupancy::new(active, waiting, timer_started_at),
            locks: locks
                .into_iter()
                .map(ScheduledLock::try_from)
                .collect::<Result<_, _>>()?,
            court: row.try_into()?,
        })
    }
}

fn classify_insert(err: sqlx::Error, player: PlayerId) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::PlayerAlreadyPlaced(player)
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::PlayerMissing(player)
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl CourtStore for SqliteStore {
    async fn create_court(&self, name: &str, now: DateTime<Utc>) -> Result<Court, StoreError> {
        let _writer = self.writer.lock().await;
        let court = Court {
            id: CourtId::new(),
            name: name.to_string(),
            locked_flag: false,
            created_at: now,
        };
        sqlx::query("INSERT INTO courts (id, name, created_at) VALUES (?, ?, ?)")
            .bind(court.id.0)
            .bind(&court.name)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;
        Ok(court)
    }

    async fn delete_court(&self, id: CourtId) -> Result<bool, StoreError> {
        let _writer = self.writer.lock().await;
        sqlx::query("DELETE FROM courts WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(Into::into)
    }

    async fn list_courts(&self) -> Result<Vec<Court>, StoreError> {
        let rows: Vec<CourtRow> = sqlx::query_as(
            "SELECT id, name, timer_started_at, is_locked, created_at FROM courts
            ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Court::try_from).collect()
    }

    async fn set_locked_flag(&self, id: CourtId, locked: bool) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let updated = sqlx::query("UPDATE courts SET is_locked = ? WHERE id = ?")
            .bind(locked)
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::CourtMissing(id));
        }
        Ok(())
    }

    async fn load_record(&self, id: CourtId) -> Result<Option<CourtRecord>, StoreError> {
        let mut transaction = self.pool.begin().await?;
        let row: Option<CourtRow> = sqlx::query_as(
            "SELECT id, name, timer_started_at, is_locked, created_at FROM courts WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&mut *transaction)
        .await?;

        let record = match row {
            Some(row) => Some(Self::read_record(&mut *transaction, row).await?),
            None => None,
        };
        transaction.commit().await?;
        Ok(record)
    }

    async fn list_records(&self) -> Result<Vec<CourtRecord>, StoreError> {
        let mut transaction = self.pool.begin().await?;
        let rows: Vec<CourtRow> = sqlx::query_as(
            "SELECT id, name, timer_started_at, is_locked, created_at FROM courts
            ORDER BY created_at, rowid",
        )
        .fetch_all(&mut *transaction)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(Self::read_record(&mut *transaction, row).await?);
        }
        transaction.commit().await?;
        Ok(records)
    }

    async fn admit(
        &self,
        court: CourtId,
        players: &[PlayerId],
        admission: Admission,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let mut transaction = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM courts WHERE id = ?")
            .bind(court.0)
            .fetch_optional(&mut *transaction)
            .await?;
        if exists.is_none() {
            return Err(StoreError::CourtMissing(court));
        }

        for player in players {
            let placed: Option<Uuid> =
                sqlx::query_scalar("SELECT court_id FROM placements WHERE player_id = ?")
                    .bind(player.0)
                    .fetch_optional(&mut *transaction)
                    .await?;
            if placed.is_some() {
                return Err(StoreError::PlayerAlreadyPlaced(*player));
            }
        }

        let mut seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM placements")
            .fetch_one(&mut *transaction)
            .await?;
        for player in players {
            seq += 1;
            sqlx::query(
                "INSERT INTO placements (player_id, court_id, status, joined_at, seq)
                VALUES (?, ?, ?, ?, ?)",
            )
            .bind(player.0)
            .bind(court.0)
            .bind(admission.placement.as_str())
            .bind(to_millis(now))
            .bind(seq)
            .execute(&mut *transaction)
            .await
            .map_err(|e| classify_insert(e, *player))?;
        }

        if let Some(started) = admission.start_timer {
            sqlx::query("UPDATE courts SET timer_started_at = ? WHERE id = ?")
                .bind(to_millis(started))
                .bind(court.0)
                .execute(&mut *transaction)
                .await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn apply(&self, court: CourtId, transition: &Transition) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        let mut transaction = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE courts SET timer_started_at = ? WHERE id = ?")
            .bind(transition.timer_started_at.map(to_millis))
            .bind(court.0)
            .execute(&mut *transaction)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::CourtMissing(court));
        }

        for player in &transition.removed {
            sqlx::query("DELETE FROM placements WHERE player_id = ? AND court_id = ?")
                .bind(player.0)
                .bind(court.0)
                .execute(&mut *transaction)
                .await?;
        }
        for player in &transition.promoted {
            sqlx::query(
                "UPDATE placements SET status = 'active' WHERE player_id = ? AND court_id = ?",
            )
            .bind(player.0)
            .bind(court.0)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn placement_of(
        &self,
        player: PlayerId,
    ) -> Result<Option<(CourtId, Placement)>, StoreError> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT court_id, status FROM placements WHERE player_id = ?")
                .bind(player.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(court, status)| Ok((CourtId(court), placement(&status)?)))
            .transpose()
    }

    async fn add_lock(&self, lock: &ScheduledLock) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        sqlx::query(
            "INSERT INTO court_locks (id, court_id, starts_at, ends_at, reason)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(lock.id.0)
        .bind(lock.court_id.0)
        .bind(to_millis(lock.starts_at))
        .bind(to_millis(lock.ends_at))
        .bind(&lock.reason)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::CourtMissing(lock.court_id)
            }
            _ => StoreError::Database(e),
        })?;
        Ok(())
    }

    async fn remove_lock(&self, court: CourtId, lock: LockId) -> Result<bool, StoreError> {
        let _writer = self.writer.lock().await;
        sqlx::query("DELETE FROM court_locks WHERE id = ? AND court_id = ?")
            .bind(lock.0)
            .bind(court.0)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(Into::into)
    }

    async fn create_account(&self, account: NewAccount) -> Result<Player, StoreError> {
        let _writer = self.writer.lock().await;
        let id = PlayerId::new();
        sqlx::query(
            "INSERT INTO users
            (id, username, password_hash, first_name, last_name, role, package_uses, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.0)
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.role.as_str())
        .bind(account.package_uses.map(i64::from))
        .bind(to_millis(account.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::UsernameTaken(account.username.clone())
            }
            _ => StoreError::Database(e),
        })?;

        Ok(Player {
            id,
            username: account.username,
            first_name: account.first_name,
            last_name: account.last_name,
            is_marked: false,
            is_flagged: false,
            package_uses: account.package_uses,
            use_drop_in_package: false,
            created_at: account.created_at,
        })
    }

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Account {
                role: row.role()?,
                id: PlayerId(row.id),
                username: row.username,
                password_hash: row.password_hash,
            })
        })
        .transpose()
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn has_admin(&self) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn list_players(&self) -> Result<Vec<Player>, StoreError> {
        let rows: Vec<UserRow> =
            sqlx::query_as("SELECT * FROM users WHERE role = 'player' ORDER BY created_at, username")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(UserRow::into_player).collect()
    }

    async fn get_players(&self, ids: &[PlayerId]) -> Result<Vec<Player>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM users WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(")");

        let rows: Vec<UserRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(UserRow::into_player).collect()
    }

    async fn set_tag(
        &self,
        id: PlayerId,
        tag: PlayerTag,
        value: bool,
    ) -> Result<Option<Player>, StoreError> {
        let _writer = self.writer.lock().await;
        let sql = format!(
            "UPDATE users SET {} = ? WHERE id = ? AND role = 'player' RETURNING *",
            tag_column(tag)
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(value)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(UserRow::into_player).transpose()
    }

    async fn toggle_tag(&self, id: PlayerId, tag: PlayerTag) -> Result<Option<bool>, StoreError> {
        let _writer = self.writer.lock().await;
        let column = tag_column(tag);
        let sql = format!(
            "UPDATE users SET {column} = NOT {column} WHERE id = ? AND role = 'player'
            RETURNING {column}"
        );
        sqlx::query_scalar(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn set_package(
        &self,
        id: PlayerId,
        package_uses: Option<u32>,
        use_drop_in_package: bool,
    ) -> Result<Option<Player>, StoreError> {
        let _writer = self.writer.lock().await;
        let row: Option<UserRow> = sqlx::query_as(
            "UPDATE users SET package_uses = ?, use_drop_in_package = ?
            WHERE id = ? AND role = 'player' RETURNING *",
        )
        .bind(package_uses.map(i64::from))
        .bind(use_drop_in_package)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_player).transpose()
    }

    async fn delete_player(&self, id: PlayerId) -> Result<PlayerDeletion, StoreError> {
        let _writer = self.writer.lock().await;
        let mut transaction = self.pool.begin().await?;

        let is_player: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ? AND role = 'player'")
                .bind(id.0)
                .fetch_one(&mut *transaction)
                .await?;
        if is_player == 0 {
            return Ok(PlayerDeletion::Missing);
        }

        let placed: Option<Uuid> =
            sqlx::query_scalar("SELECT court_id FROM placements WHERE player_id = ?")
                .bind(id.0)
                .fetch_optional(&mut *transaction)
                .await?;
        if let Some(court) = placed {
            return Ok(PlayerDeletion::Placed(CourtId(court)));
        }

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.0)
            .execute(&mut *transaction)
            .await?;
        transaction.commit().await?;
        Ok(PlayerDeletion::Deleted)
    }
}
