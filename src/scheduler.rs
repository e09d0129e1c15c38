//! Court occupancy scheduler.
//!
//! Every mutation of a court's players, timer or locks runs while holding that
//! court's guard, so admissions, removals, rotations and lock edits on one court
//! are serialized while different courts proceed in parallel. Cross-court player
//! uniqueness is left to [`CourtStore::admit`], which checks and inserts in one
//! critical section.

use crate::clock::Clock;
use crate::court::{Court, CourtId, LockId, Placement, PlayerId, ScheduledLock};
use crate::error::SchedulerError;
use crate::locks;
use crate::occupancy::{Transition, CAPACITY};
use crate::snapshot::{self, CourtSnapshot};
use crate::store::{CourtRecord, CourtStore, PlayerDeletion};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct CourtGuards(Arc<Mutex<HashMap<CourtId, Arc<AsyncMutex<()>>>>>);

/// Held while a court is being mutated. Dropping the last holder of a court's
/// lock removes its map entry, so ids of unknown or deleted courts never pile up.
struct CourtGuard {
    held: Option<OwnedMutexGuard<()>>,
    court: CourtId,
    guards: CourtGuards,
}

impl Drop for CourtGuard {
    fn drop(&mut self) {
        drop(self.held.take());
        self.guards.release(&self.court);
    }
}

impl CourtGuards {
    async fn acquire(&self, court: CourtId) -> CourtGuard {
        let lock = {
            let mut guards = self.0.lock().unwrap_or_else(|e| e.into_inner());
            guards.entry(court).or_default().clone()
        };
        CourtGuard {
            held: Some(lock.lock_owned().await),
            court,
            guards: self.clone(),
        }
    }

    /// Drops the entry once nobody holds or waits on it. Clones are only taken
    /// under the map lock, so a count of one cannot rise while we look.
    fn release(&self, court: &CourtId) {
        let mut guards = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if guards.get(court).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            guards.remove(court);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// What one sweep pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rotated: Vec<CourtId>,
    pub locks_refreshed: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn CourtStore>,
    clock: Arc<dyn Clock>,
    guards: CourtGuards,
}

impl Scheduler {
    pub fn new(store: Arc<dyn CourtStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            guards: CourtGuards::default(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn record(&self, court: CourtId) -> Result<CourtRecord, SchedulerError> {
        self.store
            .load_record(court)
            .await?
            .ok_or(SchedulerError::CourtNotFound(court))
    }

    pub async fn create_court(&self, name: &str) -> Result<Court, SchedulerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchedulerError::Invalid("court name must not be empty".into()));
        }
        let court = self.store.create_court(name, self.now()).await?;
        info!(court = %court.id, name = %court.name, "Court created");
        Ok(court)
    }

    pub async fn delete_court(&self, court: CourtId) -> Result<(), SchedulerError> {
        let _held = self.guards.acquire(court).await;
        if !self.store.delete_court(court).await? {
            return Err(SchedulerError::CourtNotFound(court));
        }
        info!(court = %court, "Court deleted");
        Ok(())
    }

    pub async fn add_lock(
        &self,
        court: CourtId,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<ScheduledLock, SchedulerError> {
        if ends_at <= starts_at {
            return Err(SchedulerError::InvalidInterval(
                "lock must end after it starts".into(),
            ));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SchedulerError::InvalidInterval("a reason is required".into()));
        }

        let lock = ScheduledLock {
            id: LockId::new(),
            court_id: court,
            starts_at,
            ends_at,
            reason: reason.to_string(),
        };

        let _held = self.guards.acquire(court).await;
        self.store.add_lock(&lock).await?;
        info!(court = %court, lock = %lock.id, %starts_at, %ends_at, "Lock scheduled");
        Ok(lock)
    }

    pub async fn remove_lock(&self, court: CourtId, lock: LockId) -> Result<(), SchedulerError> {
        let _held = self.guards.acquire(court).await;
        if !self.store.remove_lock(court, lock).await? {
            return Err(SchedulerError::LockNotFound(lock));
        }
        info!(court = %court, lock = %lock, "Lock removed");
        Ok(())
    }

    /// Places a group of already verified players on `court`, all or nothing.
    ///
    /// The group merges onto the court if it fits and enough session time is
    /// left, otherwise it joins the back of the queue as one unit.
    pub async fn admit(
        &self,
        court: CourtId,
        players: &[PlayerId],
    ) -> Result<Placement, SchedulerError> {
        if players.is_empty() || players.len() > CAPACITY {
            return Err(SchedulerError::InvalidGroupSize(players.len()));
        }
        let mut seen = HashSet::with_capacity(players.len());
        if let Some(dup) = players.iter().find(|p| !seen.insert(**p)) {
            return Err(SchedulerError::AlreadyActive(*dup));
        }

        let _held = self.guards.acquire(court).await;
        let record = self.record(court).await?;
        let now = self.now();

        if let Some(lock) = locks::evaluate(&record.locks, now).current_lock {
            debug!(court = %court, lock = %lock.id, "Admission rejected, court locked");
            return Err(SchedulerError::CourtLocked { court, lock });
        }

        let admission = record.occupancy.admission(players.len(), now);
        self.store.admit(court, players, admission, now).await?;

        info!(
            court = %court,
            players = players.len(),
            placement = admission.placement.as_str(),
            "Group admitted"
        );
        Ok(admission.placement)
    }

    /// Takes the listed players off `court` and backfills from the queue.
    /// Players not on the court are ignored.
    pub async fn remove(
        &self,
        court: CourtId,
        players: &[PlayerId],
    ) -> Result<Transition, SchedulerError> {
        let _held = self.guards.acquire(court).await;
        let mut record = self.record(court).await?;
        let transition = record.occupancy.remove(players, self.now());

        if transition.changes_players() {
            self.store.apply(court, &transition).await?;
            info!(
                court = %court,
                removed = transition.removed.len(),
                promoted = transition.promoted.len(),
                "Players removed"
            );
        }
        Ok(transition)
    }

    /// Moves queued players onto free seats in join order.
    pub async fn promote(&self, court: CourtId) -> Result<Vec<PlayerId>, SchedulerError> {
        let _held = self.guards.acquire(court).await;
        let mut record = self.record(court).await?;
        let promoted = record.occupancy.promote(self.now());

        if !promoted.is_empty() {
            let transition = Transition {
                removed: Vec::new(),
                promoted: promoted.clone(),
                timer_started_at: record.occupancy.timer_started_at,
            };
            self.store.apply(court, &transition).await?;
            info!(court = %court, promoted = promoted.len(), "Players promoted");
        }
        Ok(promoted)
    }

    /// Evicts the whole active set and refills from the queue.
    pub async fn rotate(&self, court: CourtId) -> Result<Transition, SchedulerError> {
        let _held = self.guards.acquire(court).await;
        let mut record = self.record(court).await?;
        self.apply_rotation(&mut record).await
    }

    async fn apply_rotation(&self, record: &mut CourtRecord) -> Result<Transition, SchedulerError> {
        let court = record.court.id;
        let transition = record.occupancy.rotate(self.now());
        self.store.apply(court, &transition).await?;
        info!(
            court = %court,
            evicted = transition.removed.len(),
            promoted = transition.promoted.len(),
            "Court rotated"
        );
        Ok(transition)
    }

    /// Rotates `court` if its session is over when looked at under the guard.
    async fn rotate_if_expired(&self, court: CourtId) -> Result<bool, SchedulerError> {
        let _held = self.guards.acquire(court).await;
        let mut record = match self.store.load_record(court).await? {
            Some(record) => record,
            None => return Ok(false),
        };
        if !record.occupancy.is_expired(self.now()) {
            return Ok(false);
        }
        self.apply_rotation(&mut record).await?;
        Ok(true)
    }

    /// One background pass: rotate every expired court, then refresh the
    /// cached lock flags.
    pub async fn sweep(&self) -> Result<SweepReport, SchedulerError> {
        let records = self.store.list_records().await?;
        let now = self.now();
        let mut report = SweepReport::default();

        for record in &records {
            let court = record.court.id;
            if record.occupancy.is_expired(now) {
                match self.rotate_if_expired(court).await {
                    Ok(true) => report.rotated.push(court),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(court = %court, "Rotation failed: {e}");
                        report.failures += 1;
                    }
                }
            }

            let locked = locks::is_locked(&record.locks, now);
            if locked != record.court.locked_flag {
                match self.store.set_locked_flag(court, locked).await {
                    Ok(()) => {
                        debug!(court = %court, locked, "Lock flag refreshed");
                        report.locks_refreshed += 1;
                    }
                    Err(e) => {
                        warn!(court = %court, "Lock flag refresh failed: {e}");
                        report.failures += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Deletes a player account, first taking the player off their court
    /// with backfill.
    ///
    /// The store refuses to delete a placed player, so the account delete is
    /// retried under the guard of whichever court last held them until it
    /// lands on an unplaced account.
    pub async fn delete_player(&self, player: PlayerId) -> Result<(), SchedulerError> {
        let mut outcome = self.store.delete_player(player).await?;
        loop {
            let court = match outcome {
                PlayerDeletion::Deleted => {
                    info!(player = %player, "Player deleted");
                    return Ok(());
                }
                PlayerDeletion::Missing => return Err(SchedulerError::PlayerNotFound(player)),
                PlayerDeletion::Placed(court) => court,
            };

            let _held = self.guards.acquire(court).await;
            if let Some(mut record) = self.store.load_record(court).await? {
                let transition = record.occupancy.remove(&[player], self.now());
                if transition.changes_players() {
                    self.store.apply(court, &transition).await?;
                    info!(
                        court = %court,
                        player = %player,
                        promoted = transition.promoted.len(),
                        "Deleted player taken off court"
                    );
                }
            }
            outcome = self.store.delete_player(player).await?;
        }
    }

    pub async fn snapshot(&self, court: CourtId) -> Result<CourtSnapshot, SchedulerError> {
        let record = self.record(court).await?;
        let players = self.player_names(std::slice::from_ref(&record)).await?;
        Ok(snapshot::build(&record, &players, self.now()))
    }

    pub async fn snapshots(&self) -> Result<Vec<CourtSnapshot>, SchedulerError> {
        let records = self.store.list_records().await?;
        let players = self.player_names(&records).await?;
        let now = self.now();
        Ok(records
            .iter()
            .map(|record| snapshot::build(record, &players, now))
            .collect())
    }

    async fn player_names(
        &self,
        records: &[CourtRecord],
    ) -> Result<HashMap<PlayerId, crate::court::Player>, SchedulerError> {
        let ids: Vec<PlayerId> = records.iter().flat_map(snapshot::referenced_players).collect();
        let players = self.store.get_players(&ids).await?;
        Ok(players.into_iter().map(|p| (p.id, p)).collect())
    }
}
