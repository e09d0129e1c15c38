//! The per-court occupancy state machine.
//!
//! A court is either empty (no active players, no timer) or occupied (1 to
//! [`CAPACITY`] active players, timer running). Everything here is pure: the
//! scheduler loads an [`Occupancy`], asks it for a [`Transition`], and hands the
//! transition to the store to apply atomically.

use crate::clock::to_millis;
use crate::court::{Placement, PlayerId, WaitingEntry};
use chrono::{DateTime, Utc};

pub const CAPACITY: usize = 4;

/// Length of one occupancy session.
pub const SESSION_LENGTH_MS: i64 = 15 * 60 * 1000;

/// A group only merges onto a running court if more than this is left.
pub const MERGE_MIN_REMAINING_MS: i64 = 10 * 60 * 1000;

/// Waiting entries joined less than this far apart display as one group.
pub const GROUP_WINDOW_MS: i64 = 1000;

/// Milliseconds left in a session started at `started_at`, floored at zero.
///
/// Every remaining-time figure in the crate goes through here.
pub fn remaining_ms(started_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed = to_millis(now) - to_millis(started_at);
    (SESSION_LENGTH_MS - elapsed).clamp(0, SESSION_LENGTH_MS)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub active: Vec<PlayerId>,
    /// FIFO by `(joined_at, seq)`.
    pub waiting: Vec<WaitingEntry>,
    pub timer_started_at: Option<DateTime<Utc>>,
}

/// Outcome of an admission decision for one submitted group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub placement: Placement,
    /// Set when the group merges onto an empty court.
    pub start_timer: Option<DateTime<Utc>>,
}

/// The writes needed to move a court from one occupancy to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    /// Players whose placement on this court is deleted.
    pub removed: Vec<PlayerId>,
    /// Players moved from waiting to active, in promotion order.
    pub promoted: Vec<PlayerId>,
    /// Timer value after the transition.
    pub timer_started_at: Option<DateTime<Utc>>,
}

impl Transition {
    pub fn changes_players(&self) -> bool {
        !self.removed.is_empty() || !self.promoted.is_empty()
    }
}

impl Occupancy {
    pub fn new(
        active: Vec<PlayerId>,
        mut waiting: Vec<WaitingEntry>,
        timer_started_at: Option<DateTime<Utc>>,
    ) -> Self {
        waiting.sort_by_key(|entry| (entry.joined_at, entry.seq));
        Self {
            active,
            waiting,
            timer_started_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn free_seats(&self) -> usize {
        CAPACITY.saturating_sub(self.active.len())
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.active.contains(player) || self.waiting.iter().any(|e| &e.player_id == player)
    }

    /// `None` while nobody is on court.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.active.is_empty() {
            return None;
        }
        self.timer_started_at.map(|started| remaining_ms(started, now))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining_ms(now) == Some(0)
    }

    /// Decides merge-vs-queue for a whole group. Never splits the group.
    pub fn admission(&self, group_len: usize, now: DateTime<Utc>) -> Admission {
        let fits = self.active.len() + group_len <= CAPACITY;
        let enough_time = match self.remaining_ms(now) {
            None => true,
            Some(left) => left > MERGE_MIN_REMAINING_MS,
        };

        if fits && enough_time {
            Admission {
                placement: Placement::Active,
                start_timer: self.active.is_empty().then_some(now),
            }
        } else {
            Admission {
                placement: Placement::Waiting,
                start_timer: None,
            }
        }
    }

    /// Applies an admission decided by [`Occupancy::admission`].
    pub fn admit(&mut self, players: &[PlayerId], admission: Admission, now: DateTime<Utc>, first_seq: i64) {
        match admission.placement {
            Placement::Active => {
                self.active.extend_from_slice(players);
                if let Some(started) = admission.start_timer {
                    self.timer_started_at = Some(started);
                }
            }
            Placement::Waiting => {
                self.waiting.extend(players.iter().enumerate().map(|(i, player)| WaitingEntry {
                    player_id: *player,
                    joined_at: now,
                    seq: first_seq + i as i64,
                }));
            }
        }
    }

    /// Fills free seats from the head of the queue, one entry at a time.
    ///
    /// Group boundaries are ignored: a group larger than the free seats is
    /// split and its tail stays queued.
    pub fn promote(&mut self, now: DateTime<Utc>) -> Vec<PlayerId> {
        let take = self.free_seats().min(self.waiting.len());
        let promoted: Vec<PlayerId> = self.waiting.drain(..take).map(|e| e.player_id).collect();

        self.active.extend_from_slice(&promoted);
        if !promoted.is_empty() && self.timer_started_at.is_none() {
            self.timer_started_at = Some(now);
        }
        promoted
    }

    /// Removes the listed players from either set, then backfills.
    ///
    /// Absent players are ignored; if none of the listed players were here the
    /// court is left untouched, queue included.
    pub fn remove(&mut self, players: &[PlayerId], now: DateTime<Utc>) -> Transition {
        let mut removed = Vec::new();
        self.active.retain(|p| {
            let leaving = players.contains(p);
            if leaving {
                removed.push(*p);
            }
            !leaving
        });
        self.waiting.retain(|e| {
            let leaving = players.contains(&e.player_id);
            if leaving {
                removed.push(e.player_id);
            }
            !leaving
        });

        if removed.is_empty() {
            return Transition {
                timer_started_at: self.timer_started_at,
                ..Transition::default()
            };
        }

        if self.active.is_empty() {
            self.timer_started_at = None;
        }
        let promoted = self.promote(now);

        Transition {
            removed,
            promoted,
            timer_started_at: self.timer_started_at,
        }
    }

    /// Evicts every active player (they are not requeued) and refills from
    /// the queue with a fresh timer.
    pub fn rotate(&mut self, now: DateTime<Utc>) -> Transition {
        let removed = std::mem::take(&mut self.active);
        self.timer_started_at = None;
        let promoted = self.promote(now);

        Transition {
            removed,
            promoted,
            timer_started_at: self.timer_started_at,
        }
    }
}
