//! Time provider abstraction.
//!
//! Membership heartbeats, idle timers and retry backoff all read the clock
//! through [`TimeProvider`] so that tests can drive time with tokio's paused
//! clock (`#[tokio::test(start_paused = true)]` + `tokio::time::advance`).

use std::time::Duration;

use async_trait::async_trait;

/// Provider trait for time operations.
///
/// Object safe so it can be shared as `Rc<dyn TimeProvider>` between the
/// membership agent, the actor host and the router of a node.
#[async_trait(?Send)]
pub trait TimeProvider {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);

    /// Time elapsed since the provider was created.
    ///
    /// All nodes of an in-process cluster share one provider, which makes
    /// heartbeat timestamps comparable across nodes.
    fn now(&self) -> Duration;
}

/// Time provider backed by tokio's clock.
///
/// Uses [`tokio::time::Instant`], so it follows the paused test clock.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    start_time: tokio::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new provider whose epoch is "now".
    pub fn new() -> Self {
        Self {
            start_time: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }
}
