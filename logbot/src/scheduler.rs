//! Timer capability.
//!
//! The protocol client never touches the runtime clock directly; it asks an
//! injected [`Scheduler`] to run a callback later. Production uses the tokio
//! timer, tests use [`ManualScheduler`] and move time by hand.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A callback run once when its delay has elapsed.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    fn now(&self) -> Instant;

    /// Run `task` once after `delay`. Must return without waiting.
    fn after(&self, delay: Duration, task: Task);
}

/// Schedules onto the ambient tokio runtime.
///
/// Calling [`after`](Scheduler::after) outside a runtime panics, same as
/// `tokio::spawn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn after(&self, delay: Duration, task: Task) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}

/// A scheduler driven by explicit [`advance`](ManualScheduler::advance)
/// calls. Nothing fires on its own.
pub struct ManualScheduler {
    inner: Mutex<ManualState>,
}

struct ManualState {
    now: Instant,
    seq: u64,
    pending: Vec<(Instant, u64, Task)>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ManualState {
                now: Instant::now(),
                seq: 0,
                pending: Vec::new(),
            }),
        }
    }

    /// Number of tasks that have not fired yet.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Move the clock forward and run every task that became due, earliest
    /// first. Returns how many ran.
    pub fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut state = self.lock();
            state.now += by;
            let now = state.now;
            let (mut due, rest): (Vec<_>, Vec<_>) =
                state.pending.drain(..).partition(|(at, _, _)| *at <= now);
            state.pending = rest;
            due.sort_by_key(|(at, seq, _)| (*at, *seq));
            due
        };
        // Tasks may schedule more work; the lock must be free while they run.
        let ran = due.len();
        for (_, _, task) in due {
            task();
        }
        ran
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A panicking task poisons the lock; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.lock().now
    }

    fn after(&self, delay: Duration, task: Task) {
        let mut state = self.lock();
        let at = state.now + delay;
        let seq = state.seq;
        state.seq += 1;
        state.pending.push((at, seq, task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_fires_after_delay_once() {
        let scheduler = ManualScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.after(Duration::from_millis(3500), counter_task(&fired));

        assert_eq!(scheduler.advance(Duration::from_millis(3499)), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.advance(Duration::from_secs(60)), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn manual_runs_in_due_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, ms) in [("late", 300), ("early", 100), ("tie", 100)] {
            let order = Arc::clone(&order);
            scheduler.after(Duration::from_millis(ms), Box::new(move || {
                order.lock().unwrap().push(name);
            }));
        }
        scheduler.advance(Duration::from_secs(1));
        assert_eq!(*order.lock().unwrap(), vec!["early", "tie", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_waits_for_the_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();
        TokioScheduler.after(Duration::from_millis(3500), counter_task(&fired));

        tokio::time::sleep(Duration::from_millis(3400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(3500));
    }
}
