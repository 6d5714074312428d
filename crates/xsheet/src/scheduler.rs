use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::warn;

/// Most firings a single [`ManualScheduler::advance`] reports. Periods missed
/// beyond this are skipped, keeping each timer's phase.
pub const MAX_FIRINGS_PER_ADVANCE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// Recurring callbacks on the control thread.
///
/// The scheduler only hands out tokens; whoever drives the event loop passes
/// each fired token back to its owner (see [`crate::Sheet::tick`]).
pub trait Scheduler {
    fn schedule_repeating(&mut self, interval: Duration) -> TimerToken;
    /// Returns `false` if the token was not registered.
    fn cancel(&mut self, token: TimerToken) -> bool;
}

#[derive(Debug)]
struct Timer {
    interval: Duration,
    next_due: Duration,
}

#[derive(Debug, Default)]
struct TimerTable {
    now: Duration,
    next_token: u64,
    timers: BTreeMap<TimerToken, Timer>,
}

/// Virtual-time scheduler. Clones share the same timer table, so one clone
/// can live inside a [`crate::Sheet`] while the event loop advances another.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    table: Rc<RefCell<TimerTable>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.table.borrow().now
    }

    pub fn active_timers(&self) -> usize {
        self.table.borrow().timers.len()
    }

    /// Moves virtual time forward and returns the firings in due order, at
    /// most [`MAX_FIRINGS_PER_ADVANCE`] of them.
    pub fn advance(&self, elapsed: Duration) -> Vec<TimerToken> {
        let mut guard = self.table.borrow_mut();
        let table = &mut *guard;
        let target = table.now + elapsed;
        let mut fired = Vec::new();
        while fired.len() < MAX_FIRINGS_PER_ADVANCE {
            let next = table
                .timers
                .iter()
                .filter(|(_, t)| t.next_due <= target)
                .min_by_key(|(token, t)| (t.next_due, **token))
                .map(|(token, _)| *token);
            let Some(token) = next else { break };
            if let Some(timer) = table.timers.get_mut(&token) {
                let due = timer.next_due;
                timer.next_due += timer.interval;
                table.now = due;
            }
            fired.push(token);
        }

        let mut skipped = 0u64;
        for timer in table.timers.values_mut().filter(|t| t.next_due <= target) {
            let step = timer.interval.as_nanos();
            let behind = (target - timer.next_due).as_nanos();
            skipped = skipped.saturating_add(u64::try_from(behind / step + 1).unwrap_or(u64::MAX));
            let phase = u64::try_from(behind % step).unwrap_or(u64::MAX);
            timer.next_due = target + timer.interval - Duration::from_nanos(phase);
        }
        if skipped > 0 {
            warn!(skipped, "timer fell behind, missed periods dropped");
        }

        table.now = target;
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&mut self, interval: Duration) -> TimerToken {
        let mut table = self.table.borrow_mut();
        table.next_token += 1;
        let token = TimerToken(table.next_token);
        let interval = interval.max(Duration::from_millis(1));
        let next_due = table.now + interval;
        table.timers.insert(token, Timer { interval, next_due });
        token
    }

    fn cancel(&mut self, token: TimerToken) -> bool {
        self.table.borrow_mut().timers.remove(&token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_fires_in_due_order() {
        let mut scheduler = ManualScheduler::new();
        let fast = scheduler.schedule_repeating(Duration::from_millis(10));
        let slow = scheduler.schedule_repeating(Duration::from_millis(25));

        let fired = scheduler.advance(Duration::from_millis(30));
        assert_eq!(fired, vec![fast, fast, slow, fast]);
        assert_eq!(scheduler.now(), Duration::from_millis(30));

        assert!(scheduler.advance(Duration::from_millis(9)).is_empty());
        assert_eq!(scheduler.advance(Duration::from_millis(1)), vec![fast]);
    }

    #[test]
    fn test_long_advance_is_capped() {
        let mut scheduler = ManualScheduler::new();
        let token = scheduler.schedule_repeating(Duration::from_millis(42));

        let fired = scheduler.advance(Duration::from_secs(1_000_000));
        assert_eq!(fired.len(), MAX_FIRINGS_PER_ADVANCE);
        assert!(fired.iter().all(|t| *t == token));
        assert_eq!(scheduler.now(), Duration::from_secs(1_000_000));

        // 1_000_000_000 ms is 34 ms past a multiple of 42.
        assert!(scheduler.advance(Duration::from_millis(7)).is_empty());
        assert_eq!(scheduler.advance(Duration::from_millis(1)), vec![token]);
        assert_eq!(scheduler.advance(Duration::from_millis(42)), vec![token]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut scheduler = ManualScheduler::new();
        let token = scheduler.schedule_repeating(Duration::from_millis(42));
        let shared = scheduler.clone();
        assert_eq!(shared.active_timers(), 1);
        assert!(scheduler.cancel(token));
        assert!(!scheduler.cancel(token));
        assert!(shared.advance(Duration::from_secs(1)).is_empty());
    }
}
