//! C9: a generic bounded exponential-backoff runner (spec §4.8).
//!
//! Used both by the Stream Orchestrator around startup (manifest fetch +
//! `sourceopen`) and by the Segment Pipeline around a single segment
//! download, with different [`RetryConfig`]s but the same harness.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
	pub total_retry: u32,
	pub retry_delay: Duration,
	pub reset_delay: Duration,
}

impl Default for RetryConfig {
	/// `totalRetry=3, retryDelay=250ms, resetDelay=60s` -- the defaults spec
	/// §4.7 wraps around orchestrator startup.
	fn default() -> Self {
		Self {
			total_retry: 3,
			retry_delay: Duration::from_millis(250),
			reset_delay: Duration::from_secs(60),
		}
	}
}

/// Bounded exponential-backoff runner with known-vs-unknown-error policy.
///
/// A single harness instance can be reused across many logical operations
/// (e.g. one per Segment Pipeline track): `reset_delay` governs whether the
/// failure streak from a stale operation still counts against a fresh one.
pub struct RetryHarness {
	config: RetryConfig,
	consecutive_failures: AtomicU32,
	last_success: Mutex<Option<Instant>>,
}

impl RetryHarness {
	pub fn new(config: RetryConfig) -> Self {
		Self {
			config,
			consecutive_failures: AtomicU32::new(0),
			last_success: Mutex::new(None),
		}
	}

	/// Run `op`, retrying on failure per `should_retry`. `on_retry` is called
	/// before each sleep (for logging); `error_selector` maps the raw error
	/// into the one that's actually tested/returned (spec's `errorSelector`,
	/// used to wrap unknown errors as `Other`).
	pub async fn run<T, E, Fut>(
		&self,
		mut op: impl FnMut(u32) -> Fut,
		should_retry: impl Fn(&E) -> bool,
		mut on_retry: impl FnMut(&E, u32),
		error_selector: impl Fn(E) -> E,
	) -> Result<T, E>
	where
		Fut: Future<Output = Result<T, E>>,
	{
		let mut attempt = self.starting_attempt();

		loop {
			match op(attempt).await {
				Ok(value) => {
					self.record_success();
					return Ok(value);
				}
				Err(err) => {
					let err = error_selector(err);
					if !should_retry(&err) || attempt >= self.config.total_retry {
						self.record_failure(attempt);
						return Err(err);
					}

					on_retry(&err, attempt + 1);
					let delay = self.backoff_delay(attempt);
					self.record_failure(attempt);
					attempt += 1;
					tokio::time::sleep(delay).await;
				}
			}
		}
	}

	fn starting_attempt(&self) -> u32 {
		let last_success = self.last_success.lock().unwrap();
		if let Some(t) = *last_success {
			if t.elapsed() > self.config.reset_delay {
				self.consecutive_failures.store(0, Ordering::SeqCst);
			}
		}
		self.consecutive_failures.load(Ordering::SeqCst)
	}

	fn record_success(&self) {
		self.consecutive_failures.store(0, Ordering::SeqCst);
		*self.last_success.lock().unwrap() = Some(Instant::now());
	}

	fn record_failure(&self, attempt: u32) {
		self.consecutive_failures.store(attempt + 1, Ordering::SeqCst);
	}

	/// `retryDelay x 2^(n-1)` with 20% jitter, where `n` is the 1-indexed
	/// retry number (`attempt` here is 0-indexed).
	fn backoff_delay(&self, attempt: u32) -> Duration {
		let factor = 1u32.wrapping_shl(attempt.min(16));
		let base = self.config.retry_delay.saturating_mul(factor.max(1));
		let jitter = rand::rng().random_range(-0.2..0.2);
		let millis = (base.as_millis() as f64 * (1.0 + jitter)).max(0.0);
		Duration::from_millis(millis as u64)
	}
}
