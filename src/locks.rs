//! Scheduled maintenance locks.
//!
//! Lock state is always derived from the stored intervals and a query time.
//! The `is_locked` column on courts is a read cache refreshed by the sweep and
//! is never an input here.

use crate::court::ScheduledLock;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub is_locked: bool,
    pub current_lock: Option<ScheduledLock>,
    /// Locks with `starts_at > now`, earliest first.
    pub future_locks: Vec<ScheduledLock>,
}

/// Evaluates a court's locks at `now`.
///
/// When several locks cover `now` the one reported as `current_lock` is the
/// first covering lock in `locks` order. Which one that is carries no meaning.
pub fn evaluate(locks: &[ScheduledLock], now: DateTime<Utc>) -> LockStatus {
    let current_lock = locks.iter().find(|lock| lock.covers(now)).cloned();

    let mut future_locks: Vec<ScheduledLock> = locks
        .iter()
        .filter(|lock| lock.starts_at > now)
        .cloned()
        .collect();
    future_locks.sort_by_key(|lock| lock.starts_at);

    LockStatus {
        is_locked: current_lock.is_some(),
        current_lock,
        future_locks,
    }
}

pub fn is_locked(locks: &[ScheduledLock], now: DateTime<Utc>) -> bool {
    locks.iter().any(|lock| lock.covers(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::court::{CourtId, LockId};
    use chrono::TimeDelta;

    fn at(min: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::minutes(min)
    }

    fn lock(court_id: CourtId, start: i64, end: i64, reason: &str) -> ScheduledLock {
        ScheduledLock {
            id: LockId::new(),
            court_id,
            starts_at: at(start),
            ends_at: at(end),
            reason: reason.into(),
        }
    }

    #[test]
    fn interval_is_half_open() {
        let court = CourtId::new();
        let locks = vec![lock(court, 10, 20, "net repair")];

        assert!(!evaluate(&locks, at(9)).is_locked);
        assert!(evaluate(&locks, at(10)).is_locked);
        assert!(evaluate(&locks, at(19)).is_locked);
        assert!(!evaluate(&locks, at(20)).is_locked);
    }

    #[test]
    fn future_locks_sorted_by_start() {
        let court = CourtId::new();
        let locks = vec![
            lock(court, 90, 100, "late"),
            lock(court, 0, 5, "past"),
            lock(court, 30, 40, "soon"),
        ];

        let status = evaluate(&locks, at(10));
        assert!(!status.is_locked);
        assert!(status.current_lock.is_none());
        let reasons: Vec<_> = status.future_locks.iter().map(|l| l.reason.as_str()).collect();
        assert_eq!(reasons, ["soon", "late"]);
    }

    #[test]
    fn current_lock_is_not_listed_as_future() {
        let court = CourtId::new();
        let locks = vec![lock(court, 0, 60, "tournament"), lock(court, 70, 80, "cleaning")];

        let status = evaluate(&locks, at(30));
        assert_eq!(status.current_lock.map(|l| l.reason), Some("tournament".to_string()));
        assert_eq!(status.future_locks.len(), 1);
    }

    #[test]
    fn overlapping_locks_report_some_covering_lock() {
        let court = CourtId::new();
        let locks = vec![lock(court, 0, 60, "a"), lock(court, 30, 90, "b")];

        let status = evaluate(&locks, at(45));
        assert!(status.is_locked);
        assert!(status.current_lock.unwrap().covers(at(45)));
        assert!(is_locked(&locks, at(75)));
    }

    #[test]
    fn no_locks_means_unlocked() {
        let status = evaluate(&[], at(0));
        assert_eq!(
            status,
            LockStatus {
                is_locked: false,
                current_lock: None,
                future_locks: vec![],
            }
        );
    }
}
