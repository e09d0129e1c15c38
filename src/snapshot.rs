//! Read-only projections of court state for display.

use crate::court::{CourtId, Player, PlayerId, ScheduledLock, WaitingEntry};
use crate::locks;
use crate::occupancy::{CAPACITY, GROUP_WINDOW_MS};
use crate::store::CourtRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl PlayerSummary {
    fn lookup(id: PlayerId, players: &HashMap<PlayerId, Player>) -> Self {
        match players.get(&id) {
            Some(p) => PlayerSummary {
                id,
                username: p.username.clone(),
                first_name: p.first_name.clone(),
                last_name: p.last_name.clone(),
            },
            // deleted between the two reads
            None => PlayerSummary {
                id,
                username: String::new(),
                first_name: String::new(),
                last_name: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CourtSnapshot {
    pub id: CourtId,
    pub name: String,
    pub capacity: usize,
    pub is_locked: bool,
    pub current_lock: Option<ScheduledLock>,
    pub future_locks: Vec<ScheduledLock>,
    pub active_players: Vec<PlayerSummary>,
    pub waiting_groups: Vec<Vec<PlayerSummary>>,
    /// Milliseconds, `None` while the court is empty.
    pub remaining_time_ms: Option<i64>,
}

/// Clusters FIFO waiting entries for display.
///
/// An entry joins the current cluster if it was queued less than
/// [`GROUP_WINDOW_MS`] after the cluster's first entry. Promotion never looks
/// at these clusters.
pub fn waiting_groups(entries: &[WaitingEntry]) -> Vec<Vec<&WaitingEntry>> {
    let mut groups: Vec<Vec<&WaitingEntry>> = Vec::new();
    for entry in entries {
        match groups.last_mut() {
            Some(group)
                if (entry.joined_at - group[0].joined_at).num_milliseconds() < GROUP_WINDOW_MS =>
            {
                group.push(entry)
            }
            _ => groups.push(vec![entry]),
        }
    }
    groups
}

/// Player ids a snapshot of `record` needs names for.
pub fn referenced_players(record: &CourtRecord) -> impl Iterator<Item = PlayerId> + '_ {
    record
        .occupancy
        .active
        .iter()
        .copied()
        .chain(record.occupancy.waiting.iter().map(|e| e.player_id))
}

pub fn build(
    record: &CourtRecord,
    players: &HashMap<PlayerId, Player>,
    now: DateTime<Utc>,
) -> CourtSnapshot {
    let lock_status = locks::evaluate(&record.locks, now);
    let occupancy = &record.occupancy;

    CourtSnapshot {
        id: record.court.id,
        name: record.court.name.clone(),
        capacity: CAPACITY,
        is_locked: lock_status.is_locked,
        current_lock: lock_status.current_lock,
        future_locks: lock_status.future_locks,
        active_players: occupancy
            .active
            .iter()
            .map(|id| PlayerSummary::lookup(*id, players))
            .collect(),
        waiting_groups: waiting_groups(&occupancy.waiting)
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .map(|e| PlayerSummary::lookup(e.player_id, players))
                    .collect()
            })
            .collect(),
        remaining_time_ms: occupancy.remaining_ms(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::court::{Court, LockId};
    use crate::occupancy::{Occupancy, SESSION_LENGTH_MS};
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn entry(joined_ms: i64, seq: i64) -> WaitingEntry {
        WaitingEntry {
            player_id: PlayerId::new(),
            joined_at: t0() + TimeDelta::milliseconds(joined_ms),
            seq,
        }
    }

    fn record(occupancy: Occupancy, locks: Vec<ScheduledLock>) -> CourtRecord {
        CourtRecord {
            court: Court {
                id: CourtId::new(),
                name: "Court 1".into(),
                locked_flag: false,
                created_at: t0(),
            },
            occupancy,
            locks,
        }
    }

    #[test]
    fn entries_within_window_cluster() {
        let entries = vec![entry(0, 1), entry(0, 2), entry(400, 3), entry(5_000, 4), entry(5_999, 5)];
        let groups = waiting_groups(&entries);
        let sizes: Vec<_> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, [3, 2]);
    }

    #[test]
    fn window_is_anchored_on_first_entry() {
        // 0, 600, 1200: the third is 1.2s after the first and starts a new group
        let entries = vec![entry(0, 1), entry(600, 2), entry(1_200, 3)];
        let sizes: Vec<_> = waiting_groups(&entries).iter().map(Vec::len).collect();
        assert_eq!(sizes, [2, 1]);
    }

    #[test]
    fn empty_court_has_no_remaining_time() {
        let snap = build(&record(Occupancy::default(), vec![]), &HashMap::new(), t0());
        assert_eq!(snap.remaining_time_ms, None);
        assert!(snap.active_players.is_empty());
        assert!(snap.waiting_groups.is_empty());
    }

    #[test]
    fn remaining_time_is_computed_at_build_time() {
        let active = vec![PlayerId::new()];
        let rec = record(Occupancy::new(active, vec![], Some(t0())), vec![]);

        let early = build(&rec, &HashMap::new(), t0() + TimeDelta::seconds(30));
        assert_eq!(early.remaining_time_ms, Some(SESSION_LENGTH_MS - 30_000));

        let late = build(&rec, &HashMap::new(), t0() + TimeDelta::hours(1));
        assert_eq!(late.remaining_time_ms, Some(0));
    }

    #[test]
    fn lock_fields_reflect_intervals() {
        let mut rec = record(Occupancy::default(), vec![]);
        let court_id = rec.court.id;
        rec.locks = vec![ScheduledLock {
            id: LockId::new(),
            court_id,
            starts_at: t0(),
            ends_at: t0() + TimeDelta::hours(1),
            reason: "resurfacing".into(),
        }];

        let during = build(&rec, &HashMap::new(), t0() + TimeDelta::minutes(5));
        assert!(during.is_locked);
        assert_eq!(during.current_lock.as_ref().map(|l| l.reason.as_str()), Some("resurfacing"));

        let before = build(&rec, &HashMap::new(), t0() - TimeDelta::minutes(5));
        assert!(!before.is_locked);
        assert_eq!(before.future_locks.len(), 1);
    }

    #[test]
    fn names_are_resolved_from_registry() {
        let id = PlayerId::new();
        let rec = record(Occupancy::new(vec![id], vec![], Some(t0())), vec![]);
        let mut players = HashMap::new();
        players.insert(
            id,
            Player {
                id,
                username: "mia".into(),
                first_name: "Mia".into(),
                last_name: "Wong".into(),
                is_marked: false,
                is_flagged: false,
                package_uses: None,
                use_drop_in_package: false,
                created_at: t0(),
            },
        );

        let snap = build(&rec, &players, t0());
        assert_eq!(snap.active_players[0].first_name, "Mia");
    }
}
