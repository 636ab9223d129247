//! Restartable liveness deadline for the user stream.

use std::time::Duration;

use tokio::time::Instant;

/// Single-shot deadline re-armed on every inbound frame.
///
/// [`HeartbeatMonitor::expired`] resolves once per arm cycle; after firing
/// the monitor stays disarmed until the next [`HeartbeatMonitor::arm`].
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending deadline with one `timeout` from now.
    pub fn arm(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Waits for the current deadline and disarms the monitor.
    ///
    /// Pends forever while disarmed. Cancel-safe: dropping the future before
    /// it resolves leaves the deadline in place.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
