//! Cooperative cancellation for pipeline runs.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::error::PbrError;

/// Shared flag checked by every stage between row chunks.
///
/// Cloning yields a handle to the same flag.  The default token is never
/// cancelled unless [`cancel`](Self::cancel) is called on it or a clone.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the flag is set.
    #[inline]
    pub fn check(&self) -> Result<(), PbrError> {
        if self.is_cancelled() {
            Err(PbrError::Cancelled)
        } else {
            Ok(())
        }
    }
}
