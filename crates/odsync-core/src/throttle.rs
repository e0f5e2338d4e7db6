//! Shared call-rate limiter.
//!
//! A [`Throttle`] grants at most `limit` permits per fixed window. Callers past the
//! budget wait for the next window instead of failing, and are served in arrival
//! order: the window state sits behind a `tokio::sync::Mutex`, whose waiters are
//! queued FIFO, and the sleeping caller holds the lock.
//!
//! The handle is cheap to clone; every clone draws from the same budget. Clients
//! receive it by injection rather than reaching for a global.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::ThrottleConfig;

#[derive(Debug)]
struct Window {
    started: Instant,
    granted: u32,
}

#[derive(Debug)]
struct Inner {
    limit: u32,
    window: Duration,
    state: Mutex<Window>,
}

/// Handle to a shared call budget.
#[derive(Debug, Clone)]
pub struct Throttle {
    inner: Option<Arc<Inner>>,
}

impl Throttle {
    /// A throttle granting `limit` calls per `window`.
    ///
    /// A zero limit or zero window disables throttling.
    pub fn new(limit: u32, window: Duration) -> Self {
        if limit == 0 || window.is_zero() {
            return Self::unlimited();
        }
        Self {
            inner: Some(Arc::new(Inner {
                limit,
                window,
                state: Mutex::new(Window {
                    started: Instant::now(),
                    granted: 0,
                }),
            })),
        }
    }

    /// A throttle that never waits. Used by tests and read-only tools.
    pub fn unlimited() -> Self {
        Self { inner: None }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.calls, config.window())
    }

    /// Waits until a call may be issued.
    pub async fn acquire(&self) {
        let Some(inner) = &self.inner else {
            return;
        };

        let mut window = inner.state.lock().await;
        let now = Instant::now();
        if now.duration_since(window.started) >= inner.window {
            window.started = now;
            window.granted = 0;
        }

        if window.granted >= inner.limit {
            let next = window.started + inner.window;
            let wait_ms = next.saturating_duration_since(now).as_millis() as u64;
            tracing::trace!(wait_ms, "Throttled");
            tokio::time::sleep_until(next).await;
            window.started = Instant::now();
            window.granted = 0;
        }

        window.granted += 1;
    }
}
