// Rate limiting for XRPC calls made while enriching firehose events.
//
// The AppView allows roughly 3000 requests per 5 minutes per account. A busy
// firehose can trigger far more profile lookups than that, so every lookup
// and snapshot fetch goes through a shared sliding-window limiter, and 429
// responses are retried with exponential backoff and jitter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::StatusCode;
use tracing::{info, warn};

use super::client::has_status;

/// Requests allowed per window against the AppView.
pub const DEFAULT_MAX_REQUESTS: u32 = 3000;
/// Window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// A sliding-window rate limiter shared across pipeline workers.
pub struct RateLimiter {
    window: Mutex<Window>,
    max_requests: u32,
    span: Duration,
    min_delay: Duration,
}

#[derive(Default)]
struct Window {
    /// Start times of requests still inside the window.
    requests: VecDeque<Instant>,
    last_request: Option<Instant>,
}

impl RateLimiter {
    /// - `max_requests_per_window`: how many requests fit in one window
    /// - `window_seconds`: the sliding window duration
    /// - `min_delay_ms`: minimum spacing between consecutive requests
    pub fn new(max_requests_per_window: u32, window_seconds: u64, min_delay_ms: u64) -> Self {
        Self::with_window(
            max_requests_per_window,
            Duration::from_secs(window_seconds),
            Duration::from_millis(min_delay_ms),
        )
    }

    fn with_window(max_requests: u32, span: Duration, min_delay: Duration) -> Self {
        Self {
            window: Mutex::new(Window::default()),
            max_requests,
            span,
            min_delay,
        }
    }

    /// The limiter used for AppView and PDS calls.
    pub fn appview() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS, 0)
    }

    /// Wait until a request slot is available and claim it.
    pub async fn acquire(&self) {
        loop {
            // Decide under the lock, sleep without it.
            let wait = {
                let now = Instant::now();
                let mut window = self.lock();

                while let Some(&oldest) = window.requests.front() {
                    if now.duration_since(oldest) > self.span {
                        window.requests.pop_front();
                    } else {
                        break;
                    }
                }

                let spacing = window
                    .last_request
                    .map(|last| self.min_delay.saturating_sub(now.duration_since(last)))
                    .unwrap_or(Duration::ZERO);

                if !spacing.is_zero() {
                    spacing
                } else if (window.requests.len() as u32) < self.max_requests {
                    window.requests.push_back(now);
                    window.last_request = Some(now);
                    return;
                } else {
                    window
                        .requests
                        .front()
                        .map(|&oldest| (oldest + self.span).saturating_duration_since(now))
                        .unwrap_or(Duration::ZERO)
                }
            };

            if wait >= Duration::from_secs(1) {
                info!(
                    delay_ms = wait.as_millis() as u64,
                    "Rate limit: waiting before next request"
                );
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests currently counted in the window.
    pub fn in_window(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        // A poisoned window only means another task panicked mid-update;
        // the timestamps are still usable.
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Maximum number of retry attempts on rate-limit (429) errors.
const MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff (doubles each retry).
const BASE_BACKOFF: Duration = Duration::from_secs(2);

/// Cap on a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Whether an error is a rate-limit rejection.
///
/// Typed XRPC errors are checked by status; anything else falls back to
/// looking for "429" or "rate limit" in the error text.
pub fn is_rate_limit_error(err: &anyhow::Error) -> bool {
    if has_status(err, StatusCode::TOO_MANY_REQUESTS) {
        return true;
    }
    let text = format!("{err:?}").to_lowercase();
    text.contains("429") || text.contains("rate limit") || text.contains("ratelimit")
}

/// Run `operation` under the limiter, retrying 429s with backoff.
///
/// Non-rate-limit errors are returned immediately.
pub async fn with_retry<F, Fut, T>(rate_limiter: &RateLimiter, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        rate_limiter.acquire().await;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_rate_limit_error(&err) || attempt >= MAX_RETRIES {
            return Err(err);
        }

        attempt += 1;
        let backoff = BASE_BACKOFF
            .saturating_mul(1u32 << attempt)
            .min(MAX_BACKOFF);

        // +/- 25% jitter from the clock's sub-second nanos.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let jitter = 0.75 + (nanos % 500) as f64 / 1000.0;
        let delay = Duration::from_secs_f64(backoff.as_secs_f64() * jitter);

        warn!(
            attempt = attempt,
            max_retries = MAX_RETRIES,
            backoff_secs = delay.as_secs_f64(),
            "Rate limited (429), backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
