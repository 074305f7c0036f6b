use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::lock;
use super::timer::{Task, TaskHandle, Timer};

/// Owns a group of timer tasks and cancels them together.
///
/// All outstanding tasks are cancelled when the scheduler is dropped.
pub struct Scheduler {
    timer: Arc<dyn Timer>,
    tasks: Arc<Mutex<HashMap<u64, TaskHandle>>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            timer,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn schedule(&self, task: Task, after: Duration) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ran = Arc::new(AtomicBool::new(false));
        let tasks = Arc::downgrade(&self.tasks);
        let ran_flag = ran.clone();
        let wrapped: Task = Box::new(move || {
            ran_flag.store(true, Ordering::SeqCst);
            if let Some(tasks) = tasks.upgrade() {
                lock(&tasks).remove(&id);
            }
            task();
        });

        let handle = self.timer.schedule(wrapped, after);
        let mut tasks = lock(&self.tasks);
        // a task may run before `schedule` returns; it must not be tracked then
        if !ran.load(Ordering::SeqCst) {
            tasks.insert(id, handle.clone());
        }
        handle
    }

    pub fn cancel_all(&self) {
        for (_, handle) in lock(&self.tasks).drain() {
            handle.cancel();
        }
    }

    /// Tasks scheduled through this scheduler that have not run yet.
    pub fn pending(&self) -> usize {
        lock(&self.tasks)
            .values()
            .filter(|h| !h.is_cancelled())
            .count()
    }

    pub fn now_ms(&self) -> u64 {
        self.timer.now_ms()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
