//! Time sources and the timer queue the sequencer arms its cues on.
//!
//! Nothing here sleeps. The queue only answers "what is due at `now`", the
//! driver decides how to wait for the next deadline.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

#[cfg(test)]
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Monotonic time since an arbitrary epoch.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall clock backed by tokio's `Instant`, so paused test runtimes advance it
/// together with their timers.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    epoch: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }

    pub fn instant_at(&self, at: Duration) -> tokio::time::Instant {
        self.epoch + at
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Virtual clock that only moves when told to. Clones share the same time.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, at: Duration) {
        self.now_ms.store(at.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Deadline-ordered set of pending tasks. Tasks due at the same instant come
/// out in the order they were scheduled.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    entries: BTreeMap<(Duration, u64), T>,
    deadlines: HashMap<u64, Duration>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, due: Duration, task: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert((due, id), task);
        self.deadlines.insert(id, due);
        TimerHandle(id)
    }

    /// Removes the timer and hands back its task, or `None` if it already
    /// fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        let due = self.deadlines.remove(&handle.0)?;
        self.entries.remove(&(due, handle.0))
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.keys().next().map(|(due, _)| *due)
    }

    /// Pops the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(TimerHandle, T)> {
        let (&(due, id), _) = self.entries.first_key_value()?;
        if due > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.entries
            .remove(&(due, id))
            .map(|task| (TimerHandle(id), task))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn pops_in_deadline_then_insertion_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(ms(30), "late");
        queue.schedule_at(ms(10), "first");
        queue.schedule_at(ms(10), "second");

        assert_eq!(queue.next_deadline(), Some(ms(10)));
        assert!(queue.pop_due(ms(9)).is_none());

        let fired = std::iter::from_fn(|| queue.pop_due(ms(30)))
            .map(|(_, task)| task)
            .collect::<Vec<_>>();
        assert_eq!(fired, vec!["first", "second", "late"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut queue = TimerQueue::new();
        let keep = queue.schedule_at(ms(5), 1);
        let drop = queue.schedule_at(ms(5), 2);

        assert_eq!(queue.cancel(drop), Some(2));
        assert_eq!(queue.cancel(drop), None);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_due(ms(5)), Some((keep, 1)));
        assert_eq!(queue.cancel(keep), None);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let observer = clock.clone();
        clock.advance(ms(250));
        clock.advance(ms(250));
        assert_eq!(observer.now(), ms(500));
        clock.set(ms(42));
        assert_eq!(observer.now(), ms(42));
    }
}
