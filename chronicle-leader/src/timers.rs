//! Named cancellable timers and election backoff.
//!
//! The FSM owns a small set of named deadlines and sleeps until the earliest
//! one. Scheduling a name again replaces its previous deadline; cancelling a
//! name that is not scheduled is a no-op.

use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// The timers the FSM runs. `State` and `SendHeartbeat` are state-scoped and
/// cancelled on every state exit; `CheckMember` survives transitions and is
/// managed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    State,
    SendHeartbeat,
    CheckMember,
}

#[derive(Debug, Default)]
pub(crate) struct TimerSet {
    deadlines: HashMap<TimerKind, Instant>,
}

impl TimerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Schedules (or reschedules) `kind` to fire `after` from now.
    pub(crate) fn schedule(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines.insert(kind, Instant::now() + after);
    }

    pub(crate) fn cancel(&mut self, kind: TimerKind) {
        self.deadlines.remove(&kind);
    }

    /// The earliest scheduled deadline, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().copied().min()
    }

    /// Removes and returns the earliest timer that is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerKind> {
        let due = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by_key(|(_, at)| **at)
            .map(|(kind, _)| *kind)?;
        self.deadlines.remove(&due);
        Some(due)
    }
}

/// Exponential election backoff.
///
/// Only the observer wait's randomized upper bound is stretched by the
/// factor; it doubles on every failed election and snaps back to one when
/// leadership is established or acknowledged.
#[derive(Debug)]
pub(crate) struct Backoff {
    factor: u32,
    max: u32,
}

impl Backoff {
    pub(crate) fn new(max: u32) -> Self {
        Self {
            factor: 1,
            max: max.max(1),
        }
    }

    pub(crate) fn factor(&self) -> u32 {
        self.factor
    }

    pub(crate) fn double(&mut self) {
        self.factor = (self.factor.saturating_mul(2)).min(self.max);
    }

    pub(crate) fn reset(&mut self) {
        self.factor = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_replaces_previous_deadline() {
        let mut timers = TimerSet::new();
        timers.schedule(TimerKind::State, Duration::from_secs(10));
        timers.schedule(TimerKind::State, Duration::from_millis(1));

        let now = Instant::now() + Duration::from_millis(5);
        assert_eq!(timers.pop_due(now), Some(TimerKind::State));
        assert_eq!(timers.pop_due(now), None);
    }

    #[test]
    fn pop_due_returns_earliest_first() {
        let mut timers = TimerSet::new();
        timers.schedule(TimerKind::CheckMember, Duration::from_millis(2));
        timers.schedule(TimerKind::State, Duration::from_millis(1));
        timers.schedule(TimerKind::SendHeartbeat, Duration::from_secs(60));

        let now = Instant::now() + Duration::from_millis(10);
        assert_eq!(timers.pop_due(now), Some(TimerKind::State));
        assert_eq!(timers.pop_due(now), Some(TimerKind::CheckMember));
        assert_eq!(timers.pop_due(now), None);
        assert!(timers.next_deadline().is_some());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut timers = TimerSet::new();
        timers.schedule(TimerKind::State, Duration::from_millis(1));
        timers.cancel(TimerKind::State);
        timers.cancel(TimerKind::State);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn backoff_doubles_to_ceiling_and_resets() {
        let mut backoff = Backoff::new(8);
        assert_eq!(backoff.factor(), 1);
        backoff.double();
        backoff.double();
        assert_eq!(backoff.factor(), 4);
        backoff.double();
        backoff.double();
        assert_eq!(backoff.factor(), 8);
        backoff.reset();
        assert_eq!(backoff.factor(), 1);
    }
}
