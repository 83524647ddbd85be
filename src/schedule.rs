/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: schedule.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 11:05:19
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-04 17:22:48
 */

use crate::models::FetcherRecord;

/// What a pass should do with a fetcher at a given moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Unlocked and due.
    Run,
    /// Locked, but the lock is older than the check interval.
    ReclaimStaleLock { held_for: f64 },
    /// Locked by a run that is presumably still in flight.
    Locked,
    /// Unlocked, but the last check was too recent.
    TooSoon { elapsed: f64, interval: f64 },
}

impl Decision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Decision::Run | Decision::ReclaimStaleLock { .. })
    }
}

/// Decides whether a fetcher is due and whether its lock is stale.
///
/// "Too soon" is `elapsed < interval` and "stale" is `elapsed > interval`, both
/// in seconds, so a record can never be both. An unlocked record that was never
/// checked is always due. A locked record with no interval
/// of its own uses `default_interval_minutes` as its stale window; when that is
/// not positive either, the lock is never reclaimed.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleGate {
    default_interval_minutes: i64,
}

impl ScheduleGate {
    pub fn new(default_interval_minutes: i64) -> Self {
        Self {
            default_interval_minutes,
        }
    }

    pub fn decide(&self, record: &FetcherRecord, now: f64) -> Decision {
        let elapsed = now - record.last_check_epoch_seconds;

        if record.locked {
            return match self.stale_window_seconds(record) {
                Some(window) if elapsed > window => Decision::ReclaimStaleLock { held_for: elapsed },
                _ => Decision::Locked,
            };
        }

        if record.last_check_epoch_seconds <= 0.0 {
            return Decision::Run;
        }

        let interval = interval_seconds(record.check_interval_minutes);
        if interval > 0.0 && elapsed < interval {
            Decision::TooSoon { elapsed, interval }
        } else {
            Decision::Run
        }
    }

    #[allow(dead_code)]
    pub fn should_run(&self, record: &FetcherRecord, now: f64) -> bool {
        self.decide(record, now).is_eligible()
    }

    #[allow(dead_code)]
    pub fn should_reclaim_stale_lock(&self, record: &FetcherRecord, now: f64) -> bool {
        matches!(self.decide(record, now), Decision::ReclaimStaleLock { .. })
    }

    /// Seconds after which a held lock counts as abandoned, if ever.
    pub fn stale_window_seconds(&self, record: &FetcherRecord) -> Option<f64> {
        [record.check_interval_minutes, self.default_interval_minutes]
            .into_iter()
            .find(|minutes| *minutes > 0)
            .map(interval_seconds)
    }
}

fn interval_seconds(minutes: i64) -> f64 {
    minutes as f64 * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(locked: bool, interval: i64, last_check: f64) -> FetcherRecord {
        FetcherRecord {
            id: 7,
            locked,
            check_interval_minutes: interval,
            last_check_epoch_seconds: last_check,
            ..Default::default()
        }
    }

    #[test]
    fn test_unlocked_and_due_runs() {
        let gate = ScheduleGate::new(20);
        assert_eq!(gate.decide(&record(false, 20, 0.0), 1000.0), Decision::Run);
    }

    #[test]
    fn test_unlocked_too_soon() {
        let gate = ScheduleGate::new(20);
        let decision = gate.decide(&record(false, 20, 1000.0), 1100.0);
        assert_eq!(
            decision,
            Decision::TooSoon {
                elapsed: 100.0,
                interval: 1200.0
            }
        );
        assert!(!gate.should_run(&record(false, 20, 1000.0), 1100.0));
    }

    #[test]
    fn test_never_checked_runs_regardless_of_interval() {
        let gate = ScheduleGate::new(20);
        for now in [1.0, 1000.0, 1199.0] {
            assert_eq!(gate.decide(&record(false, 20, 0.0), now), Decision::Run);
        }
    }

    #[test]
    fn test_unlocked_exactly_at_interval_runs() {
        let gate = ScheduleGate::new(0);
        assert!(gate.should_run(&record(false, 5, 100.0), 400.0));
        assert!(!gate.should_run(&record(false, 5, 100.0), 399.0));
    }

    #[test]
    fn test_zero_interval_always_eligible_when_unlocked() {
        let gate = ScheduleGate::new(20);
        for last_check in [0.0, 999.0, 1000.0, 5000.0] {
            assert!(gate.should_run(&record(false, 0, last_check), 1000.0));
            assert!(gate.should_run(&record(false, -3, last_check), 1000.0));
        }
    }

    #[test]
    fn test_locked_within_interval_is_skipped() {
        let gate = ScheduleGate::new(20);
        for elapsed in [0.0, 1.0, 299.0, 300.0] {
            let r = record(true, 5, 1000.0);
            assert!(!gate.should_run(&r, 1000.0 + elapsed));
            assert!(!gate.should_reclaim_stale_lock(&r, 1000.0 + elapsed));
        }
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let gate = ScheduleGate::new(20);
        let now = 10_000.0;
        let r = record(true, 5, now - 400.0);
        assert!(gate.should_run(&r, now));
        assert!(gate.should_reclaim_stale_lock(&r, now));

        let r = record(true, 5, 500.0);
        assert_eq!(
            gate.decide(&r, 950.0),
            Decision::ReclaimStaleLock { held_for: 450.0 }
        );
    }

    #[test]
    fn test_locked_without_interval_uses_default_window() {
        let gate = ScheduleGate::new(20);
        assert!(!gate.should_run(&record(true, 0, 0.0), 1200.0));
        assert!(gate.should_run(&record(true, 0, 0.0), 1201.0));
    }

    #[test]
    fn test_locked_without_any_window_never_reclaimed() {
        let gate = ScheduleGate::new(0);
        assert_eq!(gate.stale_window_seconds(&record(true, 0, 0.0)), None);
        assert!(!gate.should_run(&record(true, 0, 0.0), 1.0e9));
    }

    #[test]
    fn test_too_soon_and_stale_never_overlap() {
        let gate = ScheduleGate::new(20);
        for elapsed in [0.0, 299.0, 300.0, 301.0, 900.0] {
            let unlocked = gate.decide(&record(false, 5, 1000.0), 1000.0 + elapsed);
            let locked = gate.decide(&record(true, 5, 1000.0), 1000.0 + elapsed);
            let too_soon = matches!(unlocked, Decision::TooSoon { .. });
            let stale = matches!(locked, Decision::ReclaimStaleLock { .. });
            assert!(!(too_soon && stale), "elapsed {}", elapsed);
        }
    }
}
