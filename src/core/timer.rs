use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::lock;

/// A deferred callback.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Clock and delayed-task scheduler.
///
/// Everything in the SDK that waits (reconnect backoff, local quote expiry)
/// goes through this trait so tests can drive time with [`FakeTimer`].
pub trait Timer: Send + Sync {
    /// Run `task` once after `after` has elapsed.
    fn schedule(&self, task: Task, after: Duration) -> TaskHandle;

    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Cancellation handle for a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    // set when the task lives in its own spawned future
    abort: Option<Arc<AbortHandle>>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also abort `task` on cancel, releasing it before its deadline.
    #[must_use]
    pub fn with_abort(mut self, task: AbortHandle) -> Self {
        self.abort = Some(Arc::new(task));
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = &self.abort {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Wait for `duration` on the given timer.
pub async fn sleep(timer: &dyn Timer, duration: Duration) {
    let (tx, rx) = oneshot::channel();
    let _handle = timer.schedule(
        Box::new(move || {
            let _ = tx.send(());
        }),
        duration,
    );
    let _ = rx.await;
}

/// Wall-clock timer backed by the Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule(&self, task: Task, after: Duration) -> TaskHandle {
        let handle = TaskHandle::new();
        let guard = handle.clone();
        let spawned = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if !guard.is_cancelled() {
                task();
            }
        });
        handle.with_abort(spawned.abort_handle())
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
    }
}

struct FakeTask {
    due_ms: u64,
    seq: u64,
    handle: TaskHandle,
    run: Task,
}

#[derive(Default)]
struct FakeClock {
    now_ms: u64,
    seq: u64,
    tasks: Vec<FakeTask>,
}

/// Manually driven timer for deterministic tests.
///
/// Tasks run synchronously inside [`FakeTimer::advance`] and
/// [`FakeTimer::set_time`], in due-time order, ties broken by scheduling order.
#[derive(Default)]
pub struct FakeTimer {
    clock: Mutex<FakeClock>,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now_ms: u64) -> Self {
        let timer = Self::default();
        lock(&timer.clock).now_ms = now_ms;
        timer
    }

    pub fn advance(&self, by: Duration) {
        {
            let mut clock = lock(&self.clock);
            clock.now_ms = clock.now_ms.saturating_add(by.as_millis() as u64);
        }
        self.run_due();
    }

    pub fn set_time(&self, now_ms: u64) {
        lock(&self.clock).now_ms = now_ms;
        self.run_due();
    }

    /// Number of scheduled tasks that have neither run nor been cancelled.
    pub fn pending_tasks(&self) -> usize {
        lock(&self.clock)
            .tasks
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .count()
    }

    fn run_due(&self) {
        loop {
            let next = {
                let mut clock = lock(&self.clock);
                let now = clock.now_ms;
                clock.tasks.retain(|t| !t.handle.is_cancelled());
                let position = clock
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due_ms <= now)
                    .min_by_key(|(_, t)| (t.due_ms, t.seq))
                    .map(|(i, _)| i);
                position.map(|i| clock.tasks.swap_remove(i))
            };

            // run outside the lock, tasks may schedule more tasks
            match next {
                Some(task) => (task.run)(),
                None => break,
            }
        }
    }
}

impl Timer for FakeTimer {
    fn schedule(&self, task: Task, after: Duration) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut clock = lock(&self.clock);
        clock.seq += 1;
        let fake = FakeTask {
            due_ms: clock.now_ms.saturating_add(after.as_millis() as u64),
            seq: clock.seq,
            handle: handle.clone(),
            run: task,
        };
        clock.tasks.push(fake);
        handle
    }

    fn now_ms(&self) -> u64 {
        lock(&self.clock).now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |name: &'static str| -> Task {
            let log = log_clone.clone();
            Box::new(move || log.lock().unwrap().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_fake_timer_runs_tasks_in_due_order() {
        let timer = FakeTimer::new();
        let (log, task) = recorder();

        timer.schedule(task("late"), Duration::from_millis(300));
        timer.schedule(task("early"), Duration::from_millis(100));
        timer.schedule(task("tie"), Duration::from_millis(100));

        timer.advance(Duration::from_millis(99));
        assert!(log.lock().unwrap().is_empty());

        timer.advance(Duration::from_millis(1));
        assert_eq!(*log.lock().unwrap(), vec!["early", "tie"]);

        timer.set_time(1_000);
        assert_eq!(*log.lock().unwrap(), vec!["early", "tie", "late"]);
        assert_eq!(timer.now_ms(), 1_000);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let timer = FakeTimer::new();
        let (log, task) = recorder();

        let handle = timer.schedule(task("cancelled"), Duration::from_millis(10));
        timer.schedule(task("kept"), Duration::from_millis(10));
        handle.cancel();
        assert_eq!(timer.pending_tasks(), 1);

        timer.advance(Duration::from_millis(10));
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
        assert_eq!(timer.pending_tasks(), 0);
    }

    #[test]
    fn test_task_scheduled_from_task_runs_when_due() {
        let timer = Arc::new(FakeTimer::new());
        let (log, task) = recorder();
        let inner = task("nested");
        let timer_clone = timer.clone();

        timer.schedule(
            Box::new(move || {
                timer_clone.schedule(inner, Duration::ZERO);
            }),
            Duration::from_millis(5),
        );

        timer.advance(Duration::from_millis(5));
        assert_eq!(*log.lock().unwrap(), vec!["nested"]);
    }

    #[tokio::test]
    async fn test_sleep_completes_when_time_advances() {
        let timer = Arc::new(FakeTimer::new());
        let timer_clone = timer.clone();
        let sleeper = tokio::spawn(async move {
            sleep(timer_clone.as_ref(), Duration::from_millis(50)).await;
        });

        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        timer.advance(Duration::from_millis(50));
        sleeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_tokio_timer_cancel_releases_task() {
        let captured = Arc::new(());
        let held = captured.clone();
        let handle = TokioTimer.schedule(
            Box::new(move || drop(held)),
            Duration::from_secs(3600),
        );
        tokio::task::yield_now().await;
        assert_eq!(Arc::strong_count(&captured), 2);

        handle.cancel();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&captured), 1);
        assert!(handle.is_cancelled());
    }
}
