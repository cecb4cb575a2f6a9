//! Rate pacing for batches of transport calls
//!
//! Providers throttle bursts of forwards and deletes. A `Pacer` counts
//! operations and sleeps for the configured pause after every full batch.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Pacer {
    batch_size: usize,
    pause: Duration,
    count: usize,
}

impl Pacer {
    /// A `batch_size` of 0 disables pausing
    pub fn new(batch_size: usize, pause: Duration) -> Self {
        Self {
            batch_size,
            pause,
            count: 0,
        }
    }

    /// Record one completed operation, pausing at batch boundaries
    pub async fn tick(&mut self) {
        self.count += 1;
        if self.batch_size > 0 && self.count % self.batch_size == 0 && !self.pause.is_zero() {
            tracing::debug!("Pacing after {} transport operation(s)", self.count);
            tokio::time::sleep(self.pause).await;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pauses_after_each_batch() {
        let mut pacer = Pacer::new(2, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        pacer.tick().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        pacer.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        pacer.tick().await;
        pacer.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(pacer.count(), 4);
    }
}
