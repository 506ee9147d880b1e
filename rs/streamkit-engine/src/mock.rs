//! In-memory implementations of every trait in `streamkit_core::transport`,
//! used by this crate's and `streamkit-orchestrator`'s scenario tests and by
//! `streamkit-cli`'s `demo` subcommand (spec §6 ambient addition) -- the
//! same role the teacher's dev-dependency on `moq-native` plays for
//! `hang`'s own tests.
//!
//! Segment bytes here are not real media: a mock segment's "bytes" are
//! just its buffered range, little-endian-encoded, so [`MockPresentationElement`]
//! can report back exactly the range the test expects without a demuxer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use streamkit_core::error::{MediaErrorKind, NetworkErrorKind};
use streamkit_core::model::manifest::{Manifest, Representation, Segment, SegmentIndex};
use streamkit_core::transport::{Loader, LicenseRequester, LicenseStorage, ManifestSource, PresentationElement, SegmentParser};
use streamkit_core::{Error, Result, TimeRange};

/// Build a [`Segment`] whose `media_range` encodes `[time, time + duration)`
/// so [`MockLoader`]/[`MockPresentationElement`] can round-trip it without a
/// real container demux.
pub fn mock_segment(id: impl Into<String>, time: f64, duration: f64, is_init: bool) -> Segment {
	Segment {
		id: id.into(),
		time,
		duration,
		media_range: Some((time.to_bits(), (time + duration).to_bits())),
		index_range: None,
		is_init,
	}
}

fn encode_range(start: f64, end: f64) -> Bytes {
	let mut buf = BytesMut::with_capacity(16);
	buf.extend_from_slice(&start.to_le_bytes());
	buf.extend_from_slice(&end.to_le_bytes());
	buf.freeze()
}

fn decode_range(bytes: &[u8]) -> Result<(f64, f64)> {
	if bytes.len() != 16 {
		return Err(Error::network(NetworkErrorKind::ParseFailed, "mock segment payload was not 16 bytes", false));
	}
	let start = f64::from_le_bytes(bytes[0..8].try_into().unwrap());
	let end = f64::from_le_bytes(bytes[8..16].try_into().unwrap());
	Ok((start, end))
}

/// A fixed-duration, unbounded (or `count`-limited) segment timeline: segment
/// `n` covers `[n * segment_duration, (n + 1) * segment_duration)`. Good
/// enough for scenario tests that only care about buffering behavior, not
/// real segment-template/timeline semantics (spec §1 Out of scope).
#[derive(Debug)]
pub struct FixedSegmentIndex {
	segment_duration: f64,
	count: Option<u32>,
}

impl FixedSegmentIndex {
	pub fn new(segment_duration: f64) -> Self {
		Self {
			segment_duration,
			count: None,
		}
	}

	pub fn with_count(segment_duration: f64, count: u32) -> Self {
		Self {
			segment_duration,
			count: Some(count),
		}
	}

	fn segment_at(&self, index: u32) -> Option<Segment> {
		if self.count.is_some_and(|count| index >= count) {
			return None;
		}
		let time = index as f64 * self.segment_duration;
		Some(mock_segment(format!("seg-{index}"), time, self.segment_duration, false))
	}
}

impl SegmentIndex for FixedSegmentIndex {
	fn segment_for_time(&self, time: f64) -> Option<Segment> {
		if time < 0.0 {
			return self.segment_at(0);
		}
		self.segment_at((time / self.segment_duration).floor() as u32)
	}

	fn segment_after(&self, segment: &Segment) -> Option<Segment> {
		let index = (segment.time / self.segment_duration).round() as u32;
		self.segment_at(index + 1)
	}

	fn segments_in_range(&self, range: TimeRange) -> Vec<Segment> {
		let first = (range.start / self.segment_duration).floor() as u32;
		let last = (range.end / self.segment_duration).ceil() as u32;
		(first..last).filter_map(|index| self.segment_at(index)).collect()
	}
}

/// A representation backed by a [`FixedSegmentIndex`] and a synthetic init
/// segment, named/bitrated/widthed by the caller.
pub fn mock_representation(id: impl Into<String>, bitrate: u64, width: Option<u32>, segment_duration: f64, period_duration: Option<f64>) -> Representation {
	let indexer: std::sync::Arc<dyn SegmentIndex> = match period_duration {
		Some(duration) => std::sync::Arc::new(FixedSegmentIndex::with_count(segment_duration, (duration / segment_duration).ceil() as u32)),
		None => std::sync::Arc::new(FixedSegmentIndex::new(segment_duration)),
	};
	let id = id.into();
	Representation {
		init_segment: Some(mock_segment(format!("{id}-init"), 0.0, 0.0, true)),
		id,
		bitrate,
		mime_type: "video/mp4".to_string(),
		codecs: "avc1.64001f".to_string(),
		width,
		indexer,
	}
}

/// Serves bytes for whatever `media_range`/`index_range` a [`Segment`]
/// carries by re-encoding the bit-packed `(start, end)` pair -- see module
/// docs. Can be configured to fail the first `fail_times` requests per URL,
/// exercising the Segment Pipeline's retry path.
#[derive(Default)]
pub struct MockLoader {
	fail_times: u32,
	attempts: Mutex<HashMap<String, u32>>,
}

impl MockLoader {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fail the first `times` requests for each distinct byte range with a
	/// retryable network error, then succeed.
	pub fn failing(times: u32) -> Self {
		Self {
			fail_times: times,
			attempts: Mutex::new(HashMap::new()),
		}
	}
}

#[async_trait]
impl Loader for MockLoader {
	async fn load(&self, url: &url::Url, range: Option<(u64, u64)>) -> Result<Bytes> {
		let Some((start_bits, end_bits)) = range else {
			return Err(Error::network(NetworkErrorKind::SegmentRequestFailed, "mock loader requires a byte range", true));
		};

		let key = format!("{url}#{start_bits}-{end_bits}");
		let mut attempts = self.attempts.lock().unwrap();
		let count = attempts.entry(key).or_insert(0);
		*count += 1;
		if *count <= self.fail_times {
			return Err(Error::network(NetworkErrorKind::SegmentRequestFailed, "mock loader injected failure", false));
		}

		Ok(encode_range(f64::from_bits(start_bits), f64::from_bits(end_bits)))
	}
}

/// Pass-through segment parser: mock payloads are already sink-ready.
pub struct MockSegmentParser;

#[async_trait]
impl SegmentParser for MockSegmentParser {
	async fn parse(&self, bytes: Bytes) -> Result<Bytes> {
		Ok(bytes)
	}
}

/// Hands back a pre-built [`Manifest`] on every fetch. Tests drive a live
/// refresh scenario by calling [`MockManifestSource::set`] between
/// `fetch` calls.
pub struct MockManifestSource {
	current: Mutex<Manifest>,
	fetch_count: std::sync::atomic::AtomicU32,
}

impl MockManifestSource {
	pub fn new(manifest: Manifest) -> Self {
		Self {
			current: Mutex::new(manifest),
			fetch_count: std::sync::atomic::AtomicU32::new(0),
		}
	}

	pub fn set(&self, manifest: Manifest) {
		*self.current.lock().unwrap() = manifest;
	}

	pub fn fetch_count(&self) -> u32 {
		self.fetch_count.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl ManifestSource for MockManifestSource {
	async fn fetch(&self, _url: &url::Url) -> Result<Manifest> {
		self.fetch_count.fetch_add(1, Ordering::SeqCst);
		Ok(self.current.lock().unwrap().clone())
	}
}

/// An in-memory stand-in for a native source-buffer-backed presentation
/// element: tracks buffered ranges by decoding the mock payload, coalesces
/// them, and optionally enforces a quota so Adaptation Buffer GC can be
/// exercised.
pub struct MockPresentationElement {
	buffered: Mutex<Vec<(f64, f64)>>,
	quota_seconds: Option<f64>,
	ended: AtomicBool,
}

impl MockPresentationElement {
	pub fn new() -> Self {
		Self {
			buffered: Mutex::new(Vec::new()),
			quota_seconds: None,
			ended: AtomicBool::new(false),
		}
	}

	pub fn with_quota(quota_seconds: f64) -> Self {
		Self {
			buffered: Mutex::new(Vec::new()),
			quota_seconds: Some(quota_seconds),
			ended: AtomicBool::new(false),
		}
	}

	pub fn is_ended(&self) -> bool {
		self.ended.load(Ordering::SeqCst)
	}

	fn coalesce(ranges: &mut Vec<(f64, f64)>) {
		ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
		let mut merged: Vec<(f64, f64)> = Vec::with_capacity(ranges.len());
		for &(start, end) in ranges.iter() {
			match merged.last_mut() {
				Some(last) if start <= last.1 + 0.05 => last.1 = last.1.max(end),
				_ => merged.push((start, end)),
			}
		}
		*ranges = merged;
	}
}

impl Default for MockPresentationElement {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl PresentationElement for MockPresentationElement {
	async fn append(&self, bytes: Bytes) -> Result<(f64, f64)> {
		let (start, end) = decode_range(&bytes)?;

		let mut buffered = self.buffered.lock().unwrap();
		if let Some(quota) = self.quota_seconds {
			let total: f64 = buffered.iter().map(|(s, e)| e - s).sum();
			if total + (end - start) > quota {
				return Err(Error::media(MediaErrorKind::BufferFull, "mock sink quota exceeded", false));
			}
		}

		buffered.push((start, end));
		Self::coalesce(&mut buffered);
		Ok((start, end))
	}

	async fn remove(&self, outside: (f64, f64)) -> Result<()> {
		let mut buffered = self.buffered.lock().unwrap();
		let mut next = Vec::new();
		for &(start, end) in buffered.iter() {
			if let Some(clipped) = TimeRange::new(start, end).unwrap().clip(&TimeRange::new(outside.0, outside.1).unwrap()) {
				next.push((clipped.start, clipped.end));
			}
		}
		*buffered = next;
		Ok(())
	}

	fn buffered(&self) -> Vec<(f64, f64)> {
		self.buffered.lock().unwrap().clone()
	}

	async fn end_of_stream(&self) -> Result<()> {
		self.ended.store(true, Ordering::SeqCst);
		Ok(())
	}
}

/// Echoes the CDM message back as the "license", and never fails.
pub struct MockLicenseRequester;

#[async_trait]
impl LicenseRequester for MockLicenseRequester {
	async fn get_license(&self, _key_system: &str, message: Bytes) -> Result<Bytes> {
		Ok(message)
	}
}

/// In-memory license storage keyed by session id.
#[derive(Default)]
pub struct MockLicenseStorage {
	records: Mutex<HashMap<String, Bytes>>,
}

impl MockLicenseStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl LicenseStorage for MockLicenseStorage {
	async fn load(&self, key: &str) -> Result<Option<Bytes>> {
		Ok(self.records.lock().unwrap().get(key).cloned())
	}

	async fn store(&self, key: &str, license: Bytes) -> Result<()> {
		self.records.lock().unwrap().insert(key.to_string(), license);
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<()> {
		self.records.lock().unwrap().remove(key);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn loader_round_trips_the_encoded_range() {
		let loader = MockLoader::new();
		let url = url::Url::parse("https://example.com/seg").unwrap();
		let bytes = loader.load(&url, Some((2.0_f64.to_bits(), 4.0_f64.to_bits()))).await.unwrap();
		assert_eq!(decode_range(&bytes).unwrap(), (2.0, 4.0));
	}

	#[tokio::test]
	async fn loader_fails_the_configured_number_of_times_then_succeeds() {
		let loader = MockLoader::failing(2);
		let url = url::Url::parse("https://example.com/seg").unwrap();
		let range = Some((0.0_f64.to_bits(), 2.0_f64.to_bits()));

		assert!(loader.load(&url, range).await.is_err());
		assert!(loader.load(&url, range).await.is_err());
		assert!(loader.load(&url, range).await.is_ok());
	}

	#[tokio::test]
	async fn sink_quota_rejects_overflowing_append() {
		let sink = MockPresentationElement::with_quota(3.0);
		sink.append(encode_range(0.0, 2.0)).await.unwrap();
		let result = sink.append(encode_range(2.0, 5.0)).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn sink_coalesces_abutting_ranges() {
		let sink = MockPresentationElement::new();
		sink.append(encode_range(0.0, 2.0)).await.unwrap();
		sink.append(encode_range(2.0, 4.0)).await.unwrap();
		assert_eq!(sink.buffered(), vec![(0.0, 4.0)]);
	}
}
