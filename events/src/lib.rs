//! Provides [`SimTime`] and the [`EventQueue`], the discrete-event scheduler
//! that drives a simulation.

//! Time is kept with nanosecond resolution as a plain integer, so that event
//! ordering is exact and runs are reproducible. Events scheduled for the same
//! instant fire in the order they were scheduled.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Sub};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point in simulated time, with nanosecond resolution.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs * NANOS_PER_SEC)
    }

    /// Panics if `secs` is negative or not finite.
    pub fn from_secs_f64(secs: f64) -> Self {
        assert!(secs.is_finite() && secs >= 0.0, "invalid time: {secs}");
        SimTime((secs * NANOS_PER_SEC as f64) as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_secs(self) -> u64 {
        self.0 / NANOS_PER_SEC
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub const fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(other.0))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, other: SimTime) -> SimTime {
        SimTime(self.0 + other.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, other: SimTime) {
        self.0 += other.0;
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, other: SimTime) -> SimTime {
        SimTime(self.0 - other.0)
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// An ordered queue of pending events.
///
/// `pop` advances the clock to the next event and returns it. Once a stop
/// bound is set with [`stop`](EventQueue::stop), events past the bound are
/// never returned; the queue reports itself as drained instead.
#[derive(Debug)]
pub struct EventQueue<E> {
    queue: BTreeMap<(SimTime, u64), E>,
    seq: u64,
    now: SimTime,
    horizon: Option<SimTime>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        EventQueue {
            queue: BTreeMap::new(),
            seq: 0,
            now: SimTime::ZERO,
            horizon: None,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` to fire `delay` after the current time.
    pub fn schedule(&mut self, delay: SimTime, event: E) {
        self.schedule_at(self.now + delay, event);
    }

    /// Schedule `event` at an absolute instant, clamped to the present.
    pub fn schedule_at(&mut self, at: SimTime, event: E) {
        let at = at.max(self.now);
        self.queue.insert((at, self.seq), event);
        self.seq += 1;
    }

    /// Events strictly after `at` are discarded instead of fired.
    pub fn stop(&mut self, at: SimTime) {
        self.horizon = Some(at);
    }

    /// Advance to the next event and return it, or `None` when the queue is
    /// empty or the next event lies past the stop bound.
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        let (&(at, seq), _) = self.queue.first_key_value()?;
        if let Some(horizon) = self.horizon {
            if at > horizon {
                return None;
            }
        }
        let event = self.queue.remove(&(at, seq)).unwrap();
        self.now = at;
        Some((at, event))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventQueue, SimTime};

    #[test]
    fn time_conversions() {
        assert_eq!(SimTime::from_secs(3).as_secs_f64(), 3.0);
        assert_eq!(SimTime::from_secs_f64(0.5).as_nanos(), 500_000_000);
        assert_eq!(SimTime::from_secs(90).as_secs(), 90);
        assert_eq!(
            SimTime::from_secs(5).saturating_sub(SimTime::from_secs(7)),
            SimTime::ZERO
        );
    }

    #[test]
    fn pops_in_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(SimTime::from_secs(3), "c");
        queue.schedule(SimTime::from_secs(1), "a");
        queue.schedule(SimTime::from_secs(2), "b");

        assert_eq!(queue.pop(), Some((SimTime::from_secs(1), "a")));
        assert_eq!(queue.now(), SimTime::from_secs(1));
        assert_eq!(queue.pop(), Some((SimTime::from_secs(2), "b")));
        assert_eq!(queue.pop(), Some((SimTime::from_secs(3), "c")));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn same_instant_is_fifo() {
        let mut queue = EventQueue::new();
        for i in 0..100 {
            queue.schedule(SimTime::from_secs(1), i);
        }
        for i in 0..100 {
            assert_eq!(queue.pop(), Some((SimTime::from_secs(1), i)));
        }
    }

    #[test]
    fn relative_delays_accumulate() {
        let mut queue = EventQueue::new();
        queue.schedule(SimTime::from_secs(1), "a");
        queue.pop();
        // scheduled relative to the advanced clock
        queue.schedule(SimTime::from_secs(1), "b");
        assert_eq!(queue.pop(), Some((SimTime::from_secs(2), "b")));
    }

    #[test]
    fn horizon_discards_late_events() {
        let mut queue = EventQueue::new();
        queue.schedule(SimTime::from_secs(1), "a");
        queue.schedule(SimTime::from_secs(10), "late");
        queue.stop(SimTime::from_secs(5));

        assert_eq!(queue.pop(), Some((SimTime::from_secs(1), "a")));
        assert_eq!(queue.pop(), None);
        assert!(!queue.is_empty());
    }

    #[test]
    fn schedule_in_the_past_is_clamped() {
        let mut queue = EventQueue::new();
        queue.schedule(SimTime::from_secs(2), "a");
        queue.pop();
        queue.schedule_at(SimTime::from_secs(1), "b");
        assert_eq!(queue.pop(), Some((SimTime::from_secs(2), "b")));
    }
}
