// retry.rs — retry/backoff policy for destination-venue calls.
//
// Built by hand rather than via a backoff crate: connect, sleep, double
// the delay up to a ceiling. Two presets: API calls that aren't safe to
// hammer get three attempts, calls the mirror can't skip (placing or
// closing a position) get five.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const API: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(5),
    };

    pub const CRITICAL: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(10),
    };

    /// Transient and rate-limited venue errors are worth another try;
    /// everything else (business rejects, size skips, filter skips,
    /// internal errors) won't succeed on a replay.
    pub fn classify_default(err: &MirrorError) -> RetryDecision {
        match err {
            MirrorError::VenueTransient(_) | MirrorError::VenueRateLimited(_) => RetryDecision::Retry,
            _ => RetryDecision::Stop,
        }
    }

    pub async fn run<F, Fut, T>(&self, classify: fn(&MirrorError) -> RetryDecision, mut make_future: F) -> Result<T, MirrorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MirrorError>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match make_future().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts || classify(&e) == RetryDecision::Stop {
                        return Err(e);
                    }
                    let jitter_ms = rand::thread_rng().gen_range(0..50);
                    tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
                    delay = std::cmp::min(delay * 2, self.max_delay);
                }
            }
        }
    }
}
