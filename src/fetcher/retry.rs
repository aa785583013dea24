//! Retry decorator for [`VideoSource`] implementations.
//!
//! Only transient failures (`rate_limited`, `network`) are retried. The
//! default policy is a single immediate retry; with a non-zero base delay the
//! wait doubles per attempt and is capped.
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay)
//! ```

use super::{FetchError, VideoSource};
use crate::models::{Query, RawVideo};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

pub struct RetrySearch<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetrySearch<T>
where
    T: VideoSource,
{
    /// Wrap `inner`, retrying transient failures up to `max_retries` times.
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn delay_for(&self, attempt: usize) -> StdDuration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1) as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl<T> fmt::Debug for RetrySearch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySearch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> VideoSource for RetrySearch<T>
where
    T: VideoSource,
{
    #[instrument(level = "debug", skip_all, fields(%query))]
    async fn search(
        &self,
        query: &Query,
        published_after: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<RawVideo>, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.search(query, published_after, max_results).await {
                Ok(videos) => return Ok(videos),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if !e.kind.is_transient() {
                        return Err(e);
                    }
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "search exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "search attempt failed; retrying"
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}
