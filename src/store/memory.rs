use super::{CourtRecord, CourtStore, NewAccount, PlayerDeletion, StoreError};
use crate::court::{
    Account, Court, CourtId, LockId, Placement, Player, PlayerId, PlayerTag, Role,
    ScheduledLock, WaitingEntry,
};
use crate::occupancy::{Admission, Occupancy, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct CourtRow {
    court: Court,
    timer_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct PlacementRow {
    court_id: CourtId,
    status: Placement,
    joined_at: DateTime<Utc>,
    seq: i64,
}

#[derive(Debug, Clone)]
struct AccountRow {
    account: Account,
    first_name: String,
    last_name: String,
    is_marked: bool,
    is_flagged: bool,
    package_uses: Option<u32>,
    use_drop_in_package: bool,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn player(&self) -> Player {
        Player {
            id: self.account.id,
            username: self.account.username.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            is_marked: self.is_marked,
            is_flagged: self.is_flagged,
            package_uses: self.package_uses,
            use_drop_in_package: self.use_drop_in_package,
            created_at: self.created_at,
        }
    }

    fn tag_mut(&mut self, tag: PlayerTag) -> &mut bool {
        match tag {
            PlayerTag::Marked => &mut self.is_marked,
            PlayerTag::Flagged => &mut self.is_flagged,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    courts: Vec<CourtRow>,
    placements: HashMap<PlayerId, PlacementRow>,
    locks: Vec<ScheduledLock>,
    accounts: Vec<AccountRow>,
    next_seq: i64,
}

impl Tables {
    fn court_mut(&mut self, id: CourtId) -> Option<&mut CourtRow> {
        self.courts.iter_mut().find(|row| row.court.id == id)
    }

    fn player_mut(&mut self, id: PlayerId) -> Option<&mut AccountRow> {
        self.accounts
            .iter_mut()
            .find(|a| a.account.id == id && a.account.role == Role::Player)
    }

    fn record(&self, row: &CourtRow) -> CourtRecord {
        let id = row.court.id;
        let mut active = Vec::new();
        let mut waiting = Vec::new();
        for (player_id, placement) in self.placements.iter().filter(|(_, p)| p.court_id == id) {
            match placement.status {
                Placement::Active => active.push((placement.seq, *player_id)),
                Placement::Waiting => waiting.push(WaitingEntry {
                    player_id: *player_id,
                    joined_at: placement.joined_at,
                    seq: placement.seq,
                }),
            }
        }
        active.sort();

        let mut locks: Vec<ScheduledLock> =
            self.locks.iter().filter(|l| l.court_id == id).cloned().collect();
        locks.sort_by_key(|l| l.starts_at);

        CourtRecord {
            court: row.court.clone(),
            occupancy: Occupancy::new(
                active.into_iter().map(|(_, p)| p).collect(),
                waiting,
                row.timer_started_at,
            ),
            locks,
        }
    }
}

/// Keeps every table behind one mutex, so each call is trivially atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CourtStore for MemoryStore {
    async fn create_court(&self, name: &str, now: DateTime<Utc>) -> Result<Court, StoreError> {
        let court = Court {
            id: CourtId::new(),
            name: name.to_string(),
            locked_flag: false,
            created_at: now,
        };
        self.tables().courts.push(CourtRow {
            court: court.clone(),
            timer_started_at: None,
        });
        Ok(court)
    }

    async fn delete_court(&self, id: CourtId) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        let before = tables.courts.len();
        tables.courts.retain(|row| row.court.id != id);
        if tables.courts.len() == before {
            return Ok(false);
        }
        tables.locks.retain(|l| l.court_id != id);
        tables.placements.retain(|_, p| p.court_id != id);
        Ok(true)
    }

    async fn list_courts(&self) -> Result<Vec<Court>, StoreError> {
        Ok(self.tables().courts.iter().map(|r| r.court.clone()).collect())
    }

    async fn set_locked_flag(&self, id: CourtId, locked: bool) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let row = tables.court_mut(id).ok_or(StoreError::CourtMissing(id))?;
        row.court.locked_flag = locked;
        Ok(())
    }

    async fn load_record(&self, id: CourtId) -> Result<Option<CourtRecord>, StoreError> {
        let tables = self.tables();
        Ok(tables
            .courts
            .iter()
            .find(|row| row.court.id == id)
            .map(|row| tables.record(row)))
    }

    async fn list_records(&self) -> Result<Vec<CourtRecord>, StoreError> {
        let tables = self.tables();
        Ok(tables.courts.iter().map(|row| tables.record(row)).collect())
    }

    async fn admit(
        &self,
        court: CourtId,
        players: &[PlayerId],
        admission: Admission,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.court_mut(court).is_none() {
            return Err(StoreError::CourtMissing(court));
        }
        for (i, player) in players.iter().enumerate() {
            if tables.placements.contains_key(player) || players[..i].contains(player) {
                return Err(StoreError::PlayerAlreadyPlaced(*player));
            }
            if !tables.accounts.iter().any(|a| a.account.id == *player) {
                return Err(StoreError::PlayerMissing(*player));
            }
        }

        for player in players {
            tables.next_seq += 1;
            let seq = tables.next_seq;
            tables.placements.insert(
                *player,
                PlacementRow {
                    court_id: court,
                    status: admission.placement,
                    joined_at: now,
                    seq,
                },
            );
        }
        if let Some(started) = admission.start_timer {
            if let Some(row) = tables.court_mut(court) {
                row.timer_started_at = Some(started);
            }
        }
        Ok(())
    }

    async fn apply(&self, court: CourtId, transition: &Transition) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let row = tables.court_mut(court).ok_or(StoreError::CourtMissing(court))?;
        row.timer_started_at = transition.timer_started_at;

        for player in &transition.removed {
            if tables.placements.get(player).is_some_and(|p| p.court_id == court) {
                tables.placements.remove(player);
            }
        }
        for player in &transition.promoted {
            if let Some(p) = tables.placements.get_mut(player) {
                if p.court_id == court {
                    p.status = Placement::Active;
                }
            }
        }
        Ok(())
    }

    async fn placement_of(
        &self,
        player: PlayerId,
    ) -> Result<Option<(CourtId, Placement)>, StoreError> {
        Ok(self
            .tables()
            .placements
            .get(&player)
            .map(|p| (p.court_id, p.status)))
    }

    async fn add_lock(&self, lock: &ScheduledLock) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.court_mut(lock.court_id).is_none() {
            return Err(StoreError::CourtMissing(lock.court_id));
        }
        tables.locks.push(lock.clone());
        Ok(())
    }

    async fn remove_lock(&self, court: CourtId, lock: LockId) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        let before = tables.locks.len();
        tables.locks.retain(|l| !(l.id == lock && l.court_id == court));
        Ok(tables.locks.len() != before)
    }

    async fn create_account(&self, account: NewAccount) -> Result<Player, StoreError> {
        let mut tables = self.tables();
        if tables
            .accounts
            .iter()
            .any(|a| a.account.username == account.username)
        {
            return Err(StoreError::UsernameTaken(account.username));
        }
        let row = AccountRow {
            account: Account {
                id: PlayerId::new(),
                username: account.username,
                password_hash: account.password_hash,
                role: account.role,
            },
            first_name: account.first_name,
            last_name: account.last_name,
            is_marked: false,
            is_flagged: false,
            package_uses: account.package_uses,
            use_drop_in_package: false,
            created_at: account.created_at,
        };
        let player = row.player();
        tables.accounts.push(row);
        Ok(player)
    }

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .tables()
            .accounts
            .iter()
            .find(|a| a.account.username == username)
            .map(|a| a.account.clone()))
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables()
            .accounts
            .iter()
            .any(|a| a.account.username == username))
    }

    async fn has_admin(&self) -> Result<bool, StoreError> {
        Ok(self
            .tables()
            .accounts
            .iter()
            .any(|a| a.account.role == Role::Admin))
    }

    async fn list_players(&self) -> Result<Vec<Player>, StoreError> {
        Ok(self
            .tables()
            .accounts
            .iter()
            .filter(|a| a.account.role == Role::Player)
            .map(AccountRow::player)
            .collect())
    }

    async fn get_players(&self, ids: &[PlayerId]) -> Result<Vec<Player>, StoreError> {
        Ok(self
            .tables()
            .accounts
            .iter()
            .filter(|a| ids.contains(&a.account.id))
            .map(AccountRow::player)
            .collect())
    }

    async fn set_tag(
        &self,
        id: PlayerId,
        tag: PlayerTag,
        value: bool,
    ) -> Result<Option<Player>, StoreError> {
        let mut tables = self.tables();
        Ok(tables.player_mut(id).map(|row| {
            *row.tag_mut(tag) = value;
            row.player()
        }))
    }

    async fn toggle_tag(&self, id: PlayerId, tag: PlayerTag) -> Result<Option<bool>, StoreError> {
        let mut tables = self.tables();
        Ok(tables.player_mut(id).map(|row| {
            let value = row.tag_mut(tag);
            *value = !*value;
            *value
        }))
    }

    async fn set_package(
        &self,
        id: PlayerId,
        package_uses: Option<u32>,
        use_drop_in_package: bool,
    ) -> Result<Option<Player>, StoreError> {
        let mut tables = self.tables();
        Ok(tables.player_mut(id).map(|row| {
            row.package_uses = package_uses;
            row.use_drop_in_package = use_drop_in_package;
            row.player()
        }))
    }

    async fn delete_player(&self, id: PlayerId) -> Result<PlayerDeletion, StoreError> {
        let mut tables = self.tables();
        if tables.player_mut(id).is_none() {
            return Ok(PlayerDeletion::Missing);
        }
        if let Some(placement) = tables.placements.get(&id) {
            return Ok(PlayerDeletion::Placed(placement.court_id));
        }
        tables.accounts.retain(|a| a.account.id != id);
        Ok(PlayerDeletion::Deleted)
    }
}
