//! Error taxonomy shared by every crate in the workspace.
//!
//! Mirrors spec §7: one flat enum, each variant carrying a `fatal` flag and
//! an optional opaque cause, rather than encoding severity into the variant
//! name. `fatal()`/`should_retry()` are pure functions over the variant so
//! callers never have to match out business logic by hand.

use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// A type-erased cause, kept `Clone` (like `libmoq::Error`'s `Arc<anyhow::Error>`
/// fields) so `Error` itself can be cloned and broadcast on the event bus.
pub type Cause = Arc<anyhow::Error>;

fn wrap(err: impl Into<anyhow::Error>) -> Cause {
	Arc::new(err.into())
}

/// `MediaError` kinds (surface / presentation element failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorKind {
	/// No period in the manifest contains the computed initial playback time.
	MediaStartingTimeNotFound,
	/// The sink rejected an append because it ran out of buffer quota and GC didn't help.
	BufferFull,
	/// The presentation source extension rejected an append.
	SourceBufferError,
	/// The presentation element itself reported an error event.
	ElementError,
}

/// `NetworkError` kinds (transport failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
	SegmentRequestFailed,
	ManifestRequestFailed,
	Timeout,
	ParseFailed,
}

/// `EncryptedMediaError` kinds (protection driver failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptedMediaErrorKind {
	/// No candidate key system was accepted by the environment, a later
	/// `encrypted` event required a configuration switch mid-playback, or a
	/// candidate configured `persistentLicense=true` without a
	/// `licenseStorage` pair (spec §8 S5).
	InvalidKeySystem,
	LicenseRequestFailed,
	SessionCreationFailed,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
	#[error("media error ({kind:?}): {message}")]
	Media {
		kind: MediaErrorKind,
		message: String,
		fatal: bool,
		cause: Option<Cause>,
	},

	#[error("network error ({kind:?}): {message}")]
	Network {
		kind: NetworkErrorKind,
		message: String,
		fatal: bool,
		cause: Option<Cause>,
	},

	#[error("encrypted media error ({kind:?}): {message}")]
	EncryptedMedia {
		kind: EncryptedMediaErrorKind,
		message: String,
		fatal: bool,
		cause: Option<Cause>,
	},

	#[error("other error: {message}")]
	Other { message: String, fatal: bool, cause: Option<Cause> },

	/// A time value or range failed to validate (e.g. `end <= start`).
	#[error("invalid time range")]
	InvalidRange,

	/// A subscription's broker/channel was dropped.
	#[error("closed")]
	Closed,
}

impl Error {
	pub fn media(kind: MediaErrorKind, message: impl Into<String>, fatal: bool) -> Self {
		Self::Media {
			kind,
			message: message.into(),
			fatal,
			cause: None,
		}
	}

	pub fn network(kind: NetworkErrorKind, message: impl Into<String>, fatal: bool) -> Self {
		Self::Network {
			kind,
			message: message.into(),
			fatal,
			cause: None,
		}
	}

	pub fn encrypted_media(kind: EncryptedMediaErrorKind, message: impl Into<String>, fatal: bool) -> Self {
		Self::EncryptedMedia {
			kind,
			message: message.into(),
			fatal,
			cause: None,
		}
	}

	/// Wrap an unknown error as `Other`, non-fatal by default until a retry
	/// budget proves otherwise (see `streamkit_core::retry`).
	pub fn other(err: impl Into<anyhow::Error>) -> Self {
		Self::Other {
			message: "unexpected error".to_string(),
			fatal: false,
			cause: Some(wrap(err)),
		}
	}

	pub fn with_cause(mut self, err: impl Into<anyhow::Error>) -> Self {
		let cause = Some(wrap(err));
		match &mut self {
			Self::Media { cause: c, .. }
			| Self::Network { cause: c, .. }
			| Self::EncryptedMedia { cause: c, .. }
			| Self::Other { cause: c, .. } => *c = cause,
			_ => {}
		}
		self
	}

	pub fn make_fatal(mut self) -> Self {
		match &mut self {
			Self::Media { fatal, .. }
			| Self::Network { fatal, .. }
			| Self::EncryptedMedia { fatal, .. }
			| Self::Other { fatal, .. } => *fatal = true,
			_ => {}
		}
		self
	}

	/// Whether this error should terminate the orchestrator (spec §7).
	pub fn fatal(&self) -> bool {
		match self {
			Self::Media { fatal, .. } => *fatal,
			Self::Network { fatal, .. } => *fatal,
			Self::EncryptedMedia { fatal, .. } => *fatal,
			Self::Other { fatal, .. } => *fatal,
			Self::InvalidRange | Self::Closed => true,
		}
	}

	/// Pure `shouldRetry(err)` used by the Retry Harness (spec §4.8): known,
	/// permanent failures short-circuit; everything else is retryable until
	/// the budget is exhausted.
	pub fn should_retry(&self) -> bool {
		match self {
			Self::Network { fatal, .. } => !fatal,
			Self::Other { fatal, .. } => !fatal,
			_ => false,
		}
	}
}
