pub mod config;
pub mod errors;
pub mod kernel;
pub mod scheduler;
pub mod stream;
pub mod timer;
pub mod types;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// These locks guard plain bookkeeping and are never held across an await.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
