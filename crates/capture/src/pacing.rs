use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Sleep between two ticks for a source reporting `fps`.
///
/// Rates at or below 1 (including NaN) clamp to 1 fps.
pub fn frame_interval(fps: f64) -> Duration {
    let fps = fps.max(1.0);
    Duration::from_millis((1000.0 / fps).round() as u64)
}

/// Cooperative cancellation shared between the controller and its worker.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for up to `timeout`. Returns true as soon as the token is
    /// cancelled, false if the full interval elapsed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = self
                .signal
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
