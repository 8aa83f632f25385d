// SPDX-License-Identifier: MIT
//! Periodic task scheduler.
//!
//! Each scheduled task fires once per period, independently of the others.
//! The first firing happens at `offset + uniform(0, jitter)` after scheduling;
//! every later firing happens exactly `delay` after the previous one — jitter
//! de-synchronizes agents without disturbing the steady-state period.
//!
//! Firings are delivered through a single bounded queue in firing order.
//! A full queue drops the firing (logged at warn) and the task still re-arms:
//! a slow consumer loses firings, it never builds unbounded backlog and never
//! stalls the timing discipline.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::warn;

/// Wiring errors. These indicate a bug in the caller, not a runtime
/// condition, and are surfaced synchronously.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("task `{0}` is already scheduled")]
    DuplicateTask(String),
    #[error("task `{0}` is not scheduled")]
    UnknownTask(String),
}

/// Draw the random phase shift for a first firing: uniform over `[0, jitter)`.
fn draw_jitter(jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return Duration::ZERO;
    }
    jitter.mul_f64(rand::random::<f64>())
}

/// A set of independently-timed periodic tasks delivering firings through
/// one bounded queue.
pub struct Scheduler {
    tasks: HashMap<String, JoinHandle<()>>,
    due_tx: mpsc::Sender<String>,
    due_rx: mpsc::Receiver<String>,
}

impl Scheduler {
    /// Create a scheduler whose delivery queue holds at most `queue_depth`
    /// undelivered firings.
    pub fn new(queue_depth: usize) -> Self {
        let (due_tx, due_rx) = mpsc::channel(queue_depth);
        Self {
            tasks: HashMap::new(),
            due_tx,
            due_rx,
        }
    }

    /// Register a new periodic task.
    ///
    /// The first firing is armed for `offset + uniform(0, jitter)` from now;
    /// each subsequent firing for exactly `delay` after the previous one.
    /// Re-arming happens on firing, unconditionally — even when the delivery
    /// queue is full and the firing itself is dropped.
    pub fn schedule(
        &mut self,
        task_id: impl Into<String>,
        delay: Duration,
        offset: Duration,
        jitter: Duration,
    ) -> Result<(), SchedulerError> {
        let task_id = task_id.into();
        if self.tasks.contains_key(&task_id) {
            return Err(SchedulerError::DuplicateTask(task_id));
        }

        let first = offset + draw_jitter(jitter);
        let tx = self.due_tx.clone();
        let id = task_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(first).await;
            loop {
                match tx.try_send(id.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(task = %id, "delivery queue full — firing dropped");
                    }
                    // Receiver gone: the scheduler itself was torn down.
                    Err(TrySendError::Closed(_)) => break,
                }
                tokio::time::sleep(delay).await;
            }
        });

        self.tasks.insert(task_id, handle);
        Ok(())
    }

    /// Cancel a task's timer and remove it.
    ///
    /// Firings already placed on the delivery queue are still delivered;
    /// no new firings will be.
    pub fn unschedule(&mut self, task_id: &str) -> Result<(), SchedulerError> {
        match self.tasks.remove(task_id) {
            Some(handle) => {
                handle.abort();
                Ok(())
            }
            None => Err(SchedulerError::UnknownTask(task_id.to_string())),
        }
    }

    /// Cancel every scheduled task. Used at shutdown.
    pub fn unschedule_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    /// Number of currently scheduled tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next fired task and return its id.
    ///
    /// Tasks are delivered in firing order; ties at the same instant are
    /// delivered in unspecified order, each exactly once per firing.
    pub async fn next_due(&mut self) -> Option<String> {
        self.due_rx.recv().await
    }

    /// Non-blocking variant of [`next_due`](Self::next_due); used at teardown
    /// to drain firings that were already delivered before cancellation.
    pub fn try_next_due(&mut self) -> Option<String> {
        self.due_rx.try_recv().ok()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.unschedule_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn duplicate_schedule_is_an_error() {
        let mut sched = Scheduler::new(8);
        sched
            .schedule("a", Duration::from_secs(10), Duration::ZERO, Duration::ZERO)
            .unwrap();
        let err = sched
            .schedule("a", Duration::from_secs(10), Duration::ZERO, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, SchedulerError::DuplicateTask("a".into()));
    }

    #[tokio::test]
    async fn unschedule_unknown_is_an_error() {
        let mut sched = Scheduler::new(8);
        assert_eq!(
            sched.unschedule("ghost").unwrap_err(),
            SchedulerError::UnknownTask("ghost".into())
        );
    }

    #[tokio::test]
    async fn fires_at_steady_period() {
        let mut sched = Scheduler::new(8);
        let period = Duration::from_millis(100);
        sched.schedule("tick", period, Duration::ZERO, Duration::ZERO).unwrap();

        // First firing is immediate (offset 0, no jitter).
        let start = Instant::now();
        assert_eq!(sched.next_due().await.as_deref(), Some("tick"));
        assert!(start.elapsed() < Duration::from_millis(50), "first firing late");

        // Successive firings are one period apart, within scheduler overhead.
        let mut prev = Instant::now();
        for _ in 0..3 {
            assert_eq!(sched.next_due().await.as_deref(), Some("tick"));
            let gap = prev.elapsed();
            assert!(
                gap >= period - Duration::from_millis(20) && gap < period + Duration::from_millis(80),
                "steady period off: {gap:?}"
            );
            prev = Instant::now();
        }
    }

    #[tokio::test]
    async fn first_firing_respects_offset_and_jitter_window() {
        let mut sched = Scheduler::new(8);
        let offset = Duration::from_millis(100);
        let jitter = Duration::from_millis(100);
        sched
            .schedule("j", Duration::from_secs(10), offset, jitter)
            .unwrap();

        let start = Instant::now();
        assert_eq!(sched.next_due().await.as_deref(), Some("j"));
        let elapsed = start.elapsed();
        assert!(elapsed >= offset - Duration::from_millis(5), "fired before offset: {elapsed:?}");
        assert!(
            elapsed < offset + jitter + Duration::from_millis(80),
            "fired past jitter window: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn unschedule_stops_delivery() {
        let mut sched = Scheduler::new(8);
        sched
            .schedule("t", Duration::from_millis(30), Duration::ZERO, Duration::ZERO)
            .unwrap();

        // Let it fire at least once, then cancel.
        assert_eq!(sched.next_due().await.as_deref(), Some("t"));
        sched.unschedule("t").unwrap();

        // Drain anything already on the queue, then verify silence.
        while sched.try_next_due().is_some() {}
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(sched.try_next_due().is_none(), "firing delivered after unschedule");
    }

    #[tokio::test]
    async fn full_queue_drops_but_keeps_rearming() {
        // Depth 1 and a consumer that sleeps through several periods: some
        // firings must be dropped, and delivery must resume once we drain.
        let mut sched = Scheduler::new(1);
        sched
            .schedule("d", Duration::from_millis(25), Duration::ZERO, Duration::ZERO)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        // Queue held at most one firing the whole time.
        assert_eq!(sched.next_due().await.as_deref(), Some("d"));
        // The task kept re-arming: a fresh firing arrives promptly.
        let next = tokio::time::timeout(Duration::from_millis(100), sched.next_due()).await;
        assert_eq!(next.unwrap().as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn unschedule_all_clears_every_task() {
        let mut sched = Scheduler::new(8);
        for id in ["a", "b", "c"] {
            sched
                .schedule(id, Duration::from_secs(10), Duration::ZERO, Duration::ZERO)
                .unwrap();
        }
        assert_eq!(sched.len(), 3);
        sched.unschedule_all();
        assert!(sched.is_empty());
    }
}
