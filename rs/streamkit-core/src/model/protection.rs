//! Content-protection state (spec §3, §4.6): the protection singleton's
//! session table and the stable fingerprint used to dedupe `encrypted`
//! events carrying identical init data.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A content-protection session's lifecycle, mirroring EME's
/// `MediaKeySession` states closely enough for the orchestrator to decide
/// when a license request or session close is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionState {
	Uninitialized,
	KeySystemSelected,
	SessionCreated,
	LicenseRequested,
	Ready,
	Closed,
}

/// A stable hash of an `encrypted` event's `(init_data_type, init_data)`
/// pair, used to recognize a repeat event and skip a redundant session
/// creation (spec §4.6 edge case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InitDataFingerprint(u64);

impl InitDataFingerprint {
	pub fn new(init_data_type: &str, init_data: &[u8]) -> Self {
		let mut hasher = DefaultHasher::new();
		init_data_type.hash(&mut hasher);
		init_data.hash(&mut hasher);
		Self(hasher.finish())
	}

	/// A stable string form of the fingerprint, used as the `initData` key
	/// into a [`crate::transport::LicenseStorage`] (spec §4.6:
	/// `load(initData)`/`save(initData, sessionId)`).
	pub fn storage_key(&self) -> String {
		format!("{:016x}", self.0)
	}
}

/// A persisted license record, round-tripped through a [`crate::transport::LicenseStorage`]
/// when `persistentLicense` is configured (spec §4.6).
#[derive(Debug, Clone)]
pub struct StoredSession {
	pub key_system: String,
	pub session_id: String,
	pub fingerprint: InitDataFingerprint,
	pub license: Vec<u8>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fingerprint_is_stable_and_distinguishes_payloads() {
		let a = InitDataFingerprint::new("cenc", b"abc");
		let b = InitDataFingerprint::new("cenc", b"abc");
		let c = InitDataFingerprint::new("cenc", b"xyz");
		assert_eq!(a, b);
		assert_ne!(a, c);
	}
}
