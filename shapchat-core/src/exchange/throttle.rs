//! Render refresh throttling

use std::time::Duration;
use tokio::time::Instant;

/// Limits how often a streamed response is redrawn.
///
/// Only presentation is throttled; the accumulated text is never affected.
#[derive(Debug, Clone)]
pub struct RefreshThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl RefreshThrottle {
    /// At most `refresh_per_second` refreshes per second (minimum 1)
    pub fn per_second(refresh_per_second: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / refresh_per_second.max(1),
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a refresh is due now. A `true` answer starts a new interval.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
