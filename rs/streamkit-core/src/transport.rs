//! The seams the orchestrator depends on but never implements (spec §6):
//! fetching bytes, parsing a manifest, writing into a presentation element,
//! and persisting license blobs.
//!
//! Native `async fn` in traits isn't dyn-compatible, and the orchestrator
//! needs to hold these behind `Arc<dyn Trait>` to stay agnostic of the host
//! environment (browser DOM vs. a native player), so each trait here is
//! boxed via `async_trait`.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::model::manifest::Manifest;

/// Fetches bytes over whatever transport the host wires up (HTTP range
/// requests in practice, but the orchestrator only ever sees this trait).
#[async_trait]
pub trait Loader: Send + Sync {
	/// Fetch `range` (byte-inclusive, as the segment/index ranges in
	/// [`crate::model::manifest::Segment`] are expressed) from `url`. `None`
	/// fetches the whole resource.
	async fn load(&self, url: &url::Url, range: Option<(u64, u64)>) -> Result<Bytes>;
}

/// Parses a manifest document into the in-memory model. Format-specific
/// (DASH/HLS/Smooth) parsing lives entirely behind implementors of this
/// trait (spec §1 Out of scope).
#[async_trait]
pub trait ManifestParser: Send + Sync {
	async fn parse(&self, url: &url::Url, bytes: Bytes) -> Result<Manifest>;
}

/// Validates/transforms a segment's raw bytes before they reach the sink
/// (container demux, bitstream fixups, ...). A pass-through implementation
/// is valid when the loader already hands back sink-ready bytes.
#[async_trait]
pub trait SegmentParser: Send + Sync {
	async fn parse(&self, bytes: Bytes) -> Result<Bytes>;
}

/// Combines fetch + parse for a manifest URL, since live manifests are
/// re-fetched on a schedule the orchestrator drives (spec §4.1).
#[async_trait]
pub trait ManifestSource: Send + Sync {
	async fn fetch(&self, url: &url::Url) -> Result<Manifest>;
}

/// The host's presentation sink for one native track (audio or video),
/// standing in for a source-buffer-backed media element.
#[async_trait]
pub trait PresentationElement: Send + Sync {
	/// Append a segment's bytes, returning the buffered range it produced.
	async fn append(&self, bytes: Bytes) -> Result<(f64, f64)>;

	/// Remove everything outside `keep`, for garbage collection under
	/// buffer pressure (spec §4.6 Adaptation Buffer GC policy).
	async fn remove(&self, outside: (f64, f64)) -> Result<()>;

	/// Currently buffered ranges, coalesced, in ascending order.
	fn buffered(&self) -> Vec<(f64, f64)>;

	/// Signal that no more segments will ever be appended for this track
	/// (end of stream reached).
	async fn end_of_stream(&self) -> Result<()>;
}

/// Persists content-protection sessions across page loads when
/// `persistentLicense` is configured (spec §4.6).
#[async_trait]
pub trait LicenseStorage: Send + Sync {
	async fn load(&self, key: &str) -> Result<Option<Bytes>>;
	async fn store(&self, key: &str, license: Bytes) -> Result<()>;
	async fn remove(&self, key: &str) -> Result<()>;
}

/// Requests a license for a key system given a CDM-produced message (the
/// `getLicense` callback of spec §6's `keySystems[]` configuration).
#[async_trait]
pub trait LicenseRequester: Send + Sync {
	async fn get_license(&self, key_system: &str, message: Bytes) -> Result<Bytes>;

	/// Provision a `serverCertificate` (spec §4.6) before the first license
	/// request. Idempotent: the Protection Driver calls this at most once
	/// per established key system. The default no-op fits key systems/hosts
	/// that never configure a certificate.
	async fn set_server_certificate(&self, _certificate: &Bytes) -> Result<()> {
		Ok(())
	}
}
