//! Lock helpers that recover from poisoning.
//!
//! A worker panicking while it holds a lock must not take the rest of the
//! batch down with it. The guarded state here (token counts, queue contents,
//! result lists) stays usable after such a panic, so the guard is recovered
//! and the event logged.

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex, recovering the guard if a previous holder panicked.
#[inline]
pub(crate) fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Mutex was poisoned by a panicking holder; recovering state");
            poisoned.into_inner()
        }
    }
}
