//! C4: the Segment Pipeline (spec §4.3) -- per-(track, representation)
//! downloader with retry/backoff and an init-segment cache, emitting
//! progress metrics the ABR Coordinator can observe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use streamkit_core::error::NetworkErrorKind;
use streamkit_core::model::manifest::Segment;
use streamkit_core::transport::{Loader, SegmentParser};
use streamkit_core::{Error, Result, RetryConfig, RetryHarness};

/// A completed fetch's throughput sample, fed to the ABR Coordinator.
#[derive(Debug, Clone, Copy)]
pub struct SegmentMetrics {
	pub bytes: u64,
	pub elapsed: Duration,
}

impl SegmentMetrics {
	pub fn throughput_bits_per_sec(&self) -> f64 {
		if self.elapsed.is_zero() {
			return 0.0;
		}
		(self.bytes as f64 * 8.0) / self.elapsed.as_secs_f64()
	}
}

/// Per-(track, representation) downloader. One outstanding request at a
/// time: a new request cancels the prior one (spec §4.3 ordering).
pub struct SegmentPipeline {
	loader: Arc<dyn Loader>,
	parser: Arc<dyn SegmentParser>,
	retry: RetryHarness,
	init_cache: Mutex<HashMap<String, Bytes>>,
	in_flight: Mutex<Option<CancellationToken>>,
}

impl SegmentPipeline {
	pub fn new(loader: Arc<dyn Loader>, parser: Arc<dyn SegmentParser>) -> Self {
		Self {
			loader,
			parser,
			retry: RetryHarness::new(RetryConfig::default()),
			init_cache: Mutex::new(HashMap::new()),
			in_flight: Mutex::new(None),
		}
	}

	/// Fetch and parse one segment, retrying transient failures with
	/// backoff and surfacing fatal ones immediately. Cancels whatever this
	/// pipeline previously had in flight.
	pub async fn request(&self, base_url: &url::Url, segment: &Segment) -> Result<(Bytes, SegmentMetrics)> {
		if segment.is_init {
			if let Some(cached) = self.init_cache.lock().unwrap().get(&segment.id).cloned() {
				return Ok((cached, SegmentMetrics { bytes: 0, elapsed: Duration::ZERO }));
			}
		}

		let token = CancellationToken::new();
		if let Some(previous) = self.in_flight.lock().unwrap().replace(token.clone()) {
			previous.cancel();
		}

		let url = base_url.clone();
		let result = self
			.retry
			.run(
				|_attempt| {
					let url = url.clone();
					let token = token.clone();
					let segment = segment.to_request();
					async move {
						let started = Instant::now();
						let bytes = tokio::select! {
							biased;
							_ = token.cancelled() => return Err(Error::network(NetworkErrorKind::Timeout, "segment request cancelled", true)),
							result = self.loader.load(&url, segment.range) => result?,
						};
						let parsed = self.parser.parse(bytes).await?;
						Ok((parsed, SegmentMetrics {
							bytes: segment.byte_len(),
							elapsed: started.elapsed(),
						}))
					}
				},
				Error::should_retry,
				|err, attempt| warn!(attempt, error = %err, "segment request failed, retrying"),
				|err| err,
			)
			.await;

		self.in_flight.lock().unwrap().take();

		let (bytes, metrics) = result?;

		if segment.is_init {
			self.init_cache.lock().unwrap().insert(segment.id.clone(), bytes.clone());
		}
		debug!(segment = %segment.id, bytes = metrics.bytes, "segment fetched");

		Ok((bytes, metrics))
	}

	/// Cancel whatever this pipeline currently has in flight, if anything.
	pub fn cancel_in_flight(&self) {
		if let Some(token) = self.in_flight.lock().unwrap().take() {
			token.cancel();
		}
	}
}

/// A minimal request descriptor extracted from a [`Segment`], kept separate
/// from the model type so the pipeline doesn't need to hold a borrow across
/// the `async move` closure above.
struct SegmentRequest {
	range: Option<(u64, u64)>,
}

impl SegmentRequest {
	fn byte_len(&self) -> u64 {
		self.range.map(|(start, end)| end.saturating_sub(start)).unwrap_or(0)
	}
}

trait SegmentExt {
	fn to_request(&self) -> SegmentRequest;
}

impl SegmentExt for Segment {
	fn to_request(&self) -> SegmentRequest {
		SegmentRequest {
			range: self.media_range.or(self.index_range),
		}
	}
}
