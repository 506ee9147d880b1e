//! C7: the Protection Driver (spec §4.6) -- handles the first and every
//! subsequent `encrypted` event, session creation, persistent-license
//! storage, and server-certificate provisioning.
//!
//! Mirrors the design note's process-wide singleton as an explicitly
//! constructed `ProtectionManager` behind an `Arc`, guarded by a sentinel
//! rather than hidden global state.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::info;

use streamkit_core::error::EncryptedMediaErrorKind;
use streamkit_core::model::protection::{InitDataFingerprint, ProtectionState, StoredSession};
use streamkit_core::transport::{LicenseRequester, LicenseStorage};
use streamkit_core::{Error, Result};

/// One candidate key system, in the order the host wants them tried.
pub struct KeySystemConfig {
	pub key_system: String,
	pub requester: Arc<dyn LicenseRequester>,
	pub server_certificate: Option<Bytes>,
	pub persistent_license: bool,
	pub license_storage: Option<Arc<dyn LicenseStorage>>,
}

impl KeySystemConfig {
	/// Spec §4.6: `persistentLicense=true` without a storage pair fails at
	/// configuration time, before any sink exists. Spec §8 S5 requires this
	/// to surface as `EncryptedMediaError(INVALID_KEY_SYSTEM, fatal=true)`.
	fn validate(&self) -> Result<()> {
		if self.persistent_license && self.license_storage.is_none() {
			return Err(Error::encrypted_media(
				EncryptedMediaErrorKind::InvalidKeySystem,
				format!("key system {} configured persistentLicense without licenseStorage", self.key_system),
				true,
			));
		}
		Ok(())
	}
}

struct Established {
	key_system: String,
	sessions: Vec<StoredSession>,
	/// Whether `set_server_certificate` has already run for this key system
	/// (spec §4.6: "optionally provisions a server certificate
	/// (idempotent)").
	certificate_provisioned: bool,
}

/// Process-wide-in-spirit, explicitly-constructed protection state holder.
/// Only the Protection Driver mutates the inner [`ProtectionState`]; one
/// instance is expected per active orchestrator (asserted via
/// [`ProtectionManager::acquire`]).
pub struct ProtectionManager {
	candidates: Vec<KeySystemConfig>,
	state: Mutex<ProtectionState>,
	established: Mutex<Option<Established>>,
	in_use: std::sync::atomic::AtomicBool,
}

impl ProtectionManager {
	pub fn new(candidates: Vec<KeySystemConfig>) -> Result<Self> {
		for candidate in &candidates {
			candidate.validate()?;
		}
		Ok(Self {
			candidates,
			state: Mutex::new(ProtectionState::Uninitialized),
			established: Mutex::new(None),
			in_use: std::sync::atomic::AtomicBool::new(false),
		})
	}

	/// At most one orchestrator may hold this manager active at a time
	/// (spec §5 shared-resource rule).
	pub fn acquire(&self) -> Result<ProtectionGuard<'_>> {
		if self.in_use.swap(true, std::sync::atomic::Ordering::SeqCst) {
			return Err(Error::other(anyhow::anyhow!("protection manager already in use by another session")));
		}
		Ok(ProtectionGuard { manager: self })
	}

	pub async fn state(&self) -> ProtectionState {
		*self.state.lock().await
	}

	/// Handle an `encrypted` event. First call selects a key system from
	/// the candidate list and creates a session; subsequent calls with a
	/// previously-seen fingerprint are a no-op, and a configuration switch
	/// mid-playback fails fatally.
	pub async fn handle_encrypted(&self, init_data_type: &str, init_data: &[u8]) -> Result<()> {
		let fingerprint = InitDataFingerprint::new(init_data_type, init_data);

		let mut established = self.established.lock().await;
		if let Some(session_set) = established.as_ref() {
			if session_set.sessions.iter().any(|s| s.fingerprint == fingerprint) {
				return Ok(());
			}
		}

		if established.is_none() {
			*self.state.lock().await = ProtectionState::KeySystemSelected;
			let candidate = self
				.candidates
				.first()
				.ok_or_else(|| Error::encrypted_media(EncryptedMediaErrorKind::InvalidKeySystem, "no key system candidates configured", true))?;
			info!(key_system = candidate.key_system, "key system selected");
			*established = Some(Established {
				key_system: candidate.key_system.clone(),
				sessions: Vec::new(),
				certificate_provisioned: false,
			});
		}

		let session_set = established.as_mut().unwrap();
		let candidate = self
			.candidates
			.iter()
			.find(|c| c.key_system == session_set.key_system)
			.expect("established key system always present in candidate list");

		if !session_set.certificate_provisioned {
			if let Some(certificate) = &candidate.server_certificate {
				candidate
					.requester
					.set_server_certificate(certificate)
					.await
					.map_err(|err| Error::encrypted_media(EncryptedMediaErrorKind::SessionCreationFailed, err.to_string(), true))?;
				info!(key_system = candidate.key_system, "server certificate provisioned");
			}
			session_set.certificate_provisioned = true;
		}

		*self.state.lock().await = ProtectionState::SessionCreated;
		let storage_key = fingerprint.storage_key();
		let session_id = format!("session-{storage_key}");

		// Spec §4.6 `StoredSessions`: `initData -> {sessionId, keySystem}`.
		// Probe persistent storage before requesting a fresh license so a
		// previously-persisted session is restored instead of re-issued.
		let restored = match &candidate.license_storage {
			Some(storage) if candidate.persistent_license => storage.load(&storage_key).await?,
			_ => None,
		};

		let license = match restored {
			Some(license) => {
				info!(key_system = candidate.key_system, "restored persisted license session");
				license
			}
			None => {
				*self.state.lock().await = ProtectionState::LicenseRequested;
				let message = Bytes::copy_from_slice(init_data);
				let license = candidate
					.requester
					.get_license(&candidate.key_system, message)
					.await
					.map_err(|err| Error::encrypted_media(EncryptedMediaErrorKind::LicenseRequestFailed, err.to_string(), false))?;

				if let Some(storage) = &candidate.license_storage {
					storage.store(&storage_key, license.clone()).await?;
				}
				license
			}
		};

		session_set.sessions.push(StoredSession {
			key_system: candidate.key_system.clone(),
			session_id,
			fingerprint,
			license: license.to_vec(),
		});
		*self.state.lock().await = ProtectionState::Ready;
		info!(key_system = candidate.key_system, "protection session ready");
		Ok(())
	}

	/// Close every session and clear state. Idempotent.
	pub async fn dispose(&self) {
		*self.established.lock().await = None;
		*self.state.lock().await = ProtectionState::Closed;
	}
}

/// Proof that this session holds exclusive use of a [`ProtectionManager`];
/// releases it on drop.
pub struct ProtectionGuard<'a> {
	manager: &'a ProtectionManager,
}

impl Drop for ProtectionGuard<'_> {
	fn drop(&mut self) {
		self.manager.in_use.store(false, std::sync::atomic::Ordering::SeqCst);
	}
}

impl std::ops::Deref for ProtectionGuard<'_> {
	type Target = ProtectionManager;
	fn deref(&self) -> &Self::Target {
		self.manager
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicU32, Ordering};

	struct EchoRequester;

	#[async_trait]
	impl LicenseRequester for EchoRequester {
		async fn get_license(&self, _key_system: &str, message: Bytes) -> Result<Bytes> {
			Ok(message)
		}
	}

	/// Counts `get_license`/`set_server_certificate` calls so tests can
	/// assert provisioning happens exactly once and a restored session
	/// skips a fresh license request.
	#[derive(Default)]
	struct CountingRequester {
		license_calls: AtomicU32,
		certificate_calls: AtomicU32,
	}

	#[async_trait]
	impl LicenseRequester for CountingRequester {
		async fn get_license(&self, _key_system: &str, message: Bytes) -> Result<Bytes> {
			self.license_calls.fetch_add(1, Ordering::SeqCst);
			Ok(message)
		}

		async fn set_server_certificate(&self, _certificate: &Bytes) -> Result<()> {
			self.certificate_calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	#[derive(Default)]
	struct InMemoryLicenseStorage {
		records: tokio::sync::Mutex<HashMap<String, Bytes>>,
	}

	#[async_trait]
	impl LicenseStorage for InMemoryLicenseStorage {
		async fn load(&self, key: &str) -> Result<Option<Bytes>> {
			Ok(self.records.lock().await.get(key).cloned())
		}

		async fn store(&self, key: &str, license: Bytes) -> Result<()> {
			self.records.lock().await.insert(key.to_string(), license);
			Ok(())
		}

		async fn remove(&self, key: &str) -> Result<()> {
			self.records.lock().await.remove(key);
			Ok(())
		}
	}

	fn candidate() -> KeySystemConfig {
		KeySystemConfig {
			key_system: "widevine".to_string(),
			requester: Arc::new(EchoRequester),
			server_certificate: None,
			persistent_license: false,
			license_storage: None,
		}
	}

	#[test]
	fn persistent_license_without_storage_is_rejected_at_construction() {
		let mut missing_storage = candidate();
		missing_storage.persistent_license = true;
		let result = ProtectionManager::new(vec![missing_storage]);
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn repeat_encrypted_event_with_same_fingerprint_is_a_no_op() {
		let manager = ProtectionManager::new(vec![candidate()]).unwrap();
		manager.handle_encrypted("cenc", b"abc").await.unwrap();
		assert_eq!(manager.state().await, ProtectionState::Ready);

		manager.handle_encrypted("cenc", b"abc").await.unwrap();
		assert_eq!(manager.established.lock().await.as_ref().unwrap().sessions.len(), 1);
	}

	#[tokio::test]
	async fn acquiring_twice_fails() {
		let manager = ProtectionManager::new(vec![candidate()]).unwrap();
		let first = manager.acquire().unwrap();
		assert!(manager.acquire().is_err());
		drop(first);
		assert!(manager.acquire().is_ok());
	}

	#[test]
	fn persistent_license_without_storage_fails_as_invalid_key_system() {
		let mut missing_storage = candidate();
		missing_storage.persistent_license = true;
		let err = ProtectionManager::new(vec![missing_storage]).unwrap_err();
		assert!(matches!(
			err,
			Error::EncryptedMedia {
				kind: EncryptedMediaErrorKind::InvalidKeySystem,
				fatal: true,
				..
			}
		));
	}

	#[tokio::test]
	async fn server_certificate_is_provisioned_exactly_once() {
		let requester = Arc::new(CountingRequester::default());
		let candidate = KeySystemConfig {
			key_system: "widevine".to_string(),
			requester: requester.clone(),
			server_certificate: Some(Bytes::from_static(b"cert")),
			persistent_license: false,
			license_storage: None,
		};
		let manager = ProtectionManager::new(vec![candidate]).unwrap();

		manager.handle_encrypted("cenc", b"abc").await.unwrap();
		manager.handle_encrypted("cenc", b"xyz").await.unwrap();

		assert_eq!(requester.certificate_calls.load(Ordering::SeqCst), 1);
		assert_eq!(requester.license_calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn persisted_session_is_restored_without_a_fresh_license_request() {
		let storage = Arc::new(InMemoryLicenseStorage::default());
		let requester = Arc::new(CountingRequester::default());
		let candidate = KeySystemConfig {
			key_system: "widevine".to_string(),
			requester: requester.clone(),
			server_certificate: None,
			persistent_license: true,
			license_storage: Some(storage.clone()),
		};
		let manager = ProtectionManager::new(vec![candidate]).unwrap();
		manager.handle_encrypted("cenc", b"abc").await.unwrap();
		assert_eq!(requester.license_calls.load(Ordering::SeqCst), 1);

		let fingerprint = InitDataFingerprint::new("cenc", b"abc");
		assert!(storage.load(&fingerprint.storage_key()).await.unwrap().is_some());

		// A fresh manager (simulating a new session) restores the persisted
		// license instead of requesting a new one.
		let candidate = KeySystemConfig {
			key_system: "widevine".to_string(),
			requester: requester.clone(),
			server_certificate: None,
			persistent_license: true,
			license_storage: Some(storage),
		};
		let manager = ProtectionManager::new(vec![candidate]).unwrap();
		manager.handle_encrypted("cenc", b"abc").await.unwrap();

		assert_eq!(requester.license_calls.load(Ordering::SeqCst), 1, "restored session must not re-request a license");
		assert_eq!(manager.state().await, ProtectionState::Ready);
	}
}
