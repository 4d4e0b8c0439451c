//! Trailing-edge debouncing of rapidly changing input

use std::future::pending;
use std::pin::Pin;
use tokio::time::{sleep, Duration, Instant, Sleep};

/// Holds the latest pushed value until it has been left alone for `delay`.
///
/// One timer is reused for the lifetime of the debouncer; pushing re-arms it,
/// so an earlier value is replaced and never emitted.
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<T>,
    timer: Pin<Box<Sleep>>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            timer: Box::pin(sleep(delay)),
        }
    }

    /// Replace the pending value and restart the quiet period
    pub fn push(&mut self, value: T) {
        self.pending = Some(value);
        self.timer.as_mut().reset(Instant::now() + self.delay);
    }

    /// Drop the pending value, if any
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Resolve with the pending value once it has been stable for the full delay.
    ///
    /// Never resolves while nothing is pending. Cancel-safe: dropping the
    /// future keeps both the value and the deadline.
    pub async fn settled(&mut self) -> T {
        if self.pending.is_none() {
            return pending().await;
        }

        self.timer.as_mut().await;

        match self.pending.take() {
            Some(value) => value,
            None => pending().await,
        }
    }
}
