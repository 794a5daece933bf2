//! Minimum spacing between consecutive model calls.

use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

/// Enforces a minimum gap between the end of one call and the start of the
/// next. The first call never waits.
#[derive(Debug, Clone)]
pub struct Pacer {
    gap: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(gap: Duration) -> Self {
        Self { gap, last: None }
    }

    pub fn gap(&self) -> Duration {
        self.gap
    }

    /// Record that a call just finished.
    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }

    /// A copy whose wait ends `slots` extra gaps after this one's.
    ///
    /// Concurrent callers take one slot each, so their starts stay at least
    /// one gap apart.
    pub fn staggered(&self, slots: u32) -> Self {
        let offset = self.gap.saturating_mul(slots);
        let last = match self.last {
            Some(last) => last + offset,
            None if slots == 0 => return self.clone(),
            None => Instant::now() + offset - self.gap,
        };
        Self {
            gap: self.gap,
            last: Some(last),
        }
    }

    /// Block until the gap since the last [`Pacer::mark`] has elapsed.
    pub async fn wait(&mut self) {
        let Some(last) = self.last else {
            return;
        };
        let ready = last + self.gap;
        let now = Instant::now();
        if ready > now {
            debug!("Pacing: waiting {:?} before next call", ready - now);
            sleep_until(ready).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_wait_is_immediate() {
        let mut pacer = Pacer::new(Duration::from_secs(25));
        let start = Instant::now();
        pacer.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_enforces_gap_after_mark() {
        let mut pacer = Pacer::new(Duration::from_secs(25));
        pacer.mark();
        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_counts_toward_gap() {
        let mut pacer = Pacer::new(Duration::from_secs(25));
        pacer.mark();
        tokio::time::advance(Duration::from_secs(20)).await;
        let start = Instant::now();
        pacer.wait().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn staggered_copies_wait_one_gap_apart() {
        let mut pacer = Pacer::new(Duration::from_secs(5));
        pacer.mark();
        let start = Instant::now();
        let waits = (0..3u32).map(|slot| {
            let mut p = pacer.staggered(slot);
            async move {
                p.wait().await;
                start.elapsed()
            }
        });
        let elapsed = futures::future::join_all(waits).await;
        for (waited, secs) in elapsed.into_iter().zip([5, 10, 15]) {
            assert!(waited >= Duration::from_secs(secs), "{waited:?}");
            assert!(waited < Duration::from_secs(secs + 1), "{waited:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn staggered_without_mark_starts_first_slot_now() {
        let pacer = Pacer::new(Duration::from_secs(5));
        let start = Instant::now();
        pacer.staggered(0).wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        pacer.staggered(2).wait().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
    }
}
