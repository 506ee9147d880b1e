//! Playback configuration, following the teacher's `clap::Parser` +
//! `serde::{Serialize,Deserialize}` dual derive
//! (`moq_relay::ObservabilityConfig`) so the same struct doubles as a CLI
//! flag set and a config-file shape.

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use streamkit_core::model::manifest::TrackType;

/// `startAt` initial time policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum StartAt {
	Position(f64),
	WallClockTime(f64),
	FromFirstPosition(f64),
	FromLastPosition(f64),
	Percentage(f64),
}

impl Default for StartAt {
	fn default() -> Self {
		Self::Position(0.0)
	}
}

/// Per-track throughput/ABR knobs (`initialBitrates`, `manualBitrates`,
/// `maxAutoBitrates`, `throttle`, `limitWidth`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TrackBitrateConfig {
	pub initial_bitrate: Option<u64>,
	pub manual_bitrate: Option<u64>,
	pub max_auto_bitrate: Option<u64>,
	pub throttle: Option<u64>,
	pub limit_width: Option<u32>,
}

/// `textTrackOptions`: the custom sink variant plus rendering region handed
/// to the host's overlay implementation. The region itself is opaque here
/// (DOM integration is out of scope) -- we only carry the update cadence
/// the Overlay/Text Sink needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TextTrackOptions {
	pub max_update_interval_ms: u64,
}

impl Default for TextTrackOptions {
	fn default() -> Self {
		Self {
			max_update_interval_ms: 500,
		}
	}
}

/// One `keySystems[]` entry. `get_license`/`server_certificate`/
/// `license_storage` are wired at construction time in `streamkit-engine`'s
/// `ProtectionManager`, not carried here -- this struct is the
/// serializable/CLI-facing half (type, persistence flag), the callbacks are
/// supplied programmatically by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct KeySystemOption {
	pub key_system_type: String,
	pub persistent_license: bool,
}

impl Default for KeySystemOption {
	fn default() -> Self {
		Self {
			key_system_type: String::new(),
			persistent_license: false,
		}
	}
}

/// Every playback option the orchestrator recognizes. Primitive fields double as CLI flags
/// (`clap::Parser`); nested/list fields (`key_systems`,
/// `supplementary_text_tracks`, `supplementary_image_tracks`,
/// per-track bitrate maps) are config-file-only, following
/// `moq_relay::ObservabilityConfig`'s split between flag-bearing and
/// structural fields.
#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Config {
	/// Start playback once the `Loaded` event fires.
	#[arg(long, default_value_t = false)]
	pub auto_play: bool,

	/// Use the native source extension rather than setting `src` directly.
	#[arg(long, default_value_t = true)]
	pub with_media_source: bool,

	/// Seconds of buffer the Adaptation Buffer tries to keep ahead of
	/// `currentTime`.
	#[arg(long, default_value_t = 10.0)]
	pub wanted_buffer_ahead: f64,

	/// Seconds of buffer kept ahead of `currentTime` before GC considers
	/// trimming it.
	#[arg(long, default_value_t = 30.0)]
	pub max_buffer_ahead: f64,

	/// Seconds of buffer kept behind `currentTime` before GC trims it.
	#[arg(long, default_value_t = 30.0)]
	pub max_buffer_behind: f64,

	/// Threshold (seconds from the end) at which the orchestrator
	/// terminates.
	#[arg(long, default_value_t = 0.5)]
	pub end_of_play: f64,

	/// `MAXIMUM_OVERLAY_TRACK_UPDATE_INTERVAL` (ms).
	#[arg(long, default_value_t = 500)]
	pub maximum_overlay_track_update_interval_ms: u64,

	/// Retry budget around orchestrator startup.
	#[arg(long, default_value_t = 3)]
	pub startup_total_retry: u32,

	/// Base delay (ms) for the startup Retry Harness.
	#[arg(long, default_value_t = 250)]
	pub startup_retry_delay_ms: u64,

	#[arg(skip)]
	pub start_at: StartAt,

	#[arg(skip)]
	pub bitrates: std::collections::BTreeMap<TrackType, TrackBitrateConfig>,

	#[arg(skip)]
	pub text_track_options: Option<TextTrackOptions>,

	#[arg(skip)]
	pub key_systems: Vec<KeySystemOption>,

	/// Manually-injected text tracks, augmenting whatever the manifest
	/// declares (`supplementaryTextTracks`).
	#[arg(skip)]
	pub supplementary_text_tracks: Vec<url::Url>,

	/// Manually-injected image tracks (`supplementaryImageTracks`).
	#[arg(skip)]
	pub supplementary_image_tracks: Vec<url::Url>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			auto_play: false,
			with_media_source: true,
			wanted_buffer_ahead: 10.0,
			max_buffer_ahead: 30.0,
			max_buffer_behind: 30.0,
			end_of_play: 0.5,
			maximum_overlay_track_update_interval_ms: 500,
			startup_total_retry: 3,
			startup_retry_delay_ms: 250,
			start_at: StartAt::default(),
			bitrates: Default::default(),
			text_track_options: None,
			key_systems: Vec::new(),
			supplementary_text_tracks: Vec::new(),
			supplementary_image_tracks: Vec::new(),
		}
	}
}

impl Config {
	pub fn buffer_config(&self) -> streamkit_engine::buffer::BufferConfig {
		streamkit_engine::buffer::BufferConfig {
			wanted_ahead: self.wanted_buffer_ahead,
			max_ahead: self.max_buffer_ahead,
			max_behind: self.max_buffer_behind,
		}
	}

	pub fn startup_retry(&self) -> streamkit_core::RetryConfig {
		streamkit_core::RetryConfig {
			total_retry: self.startup_total_retry,
			retry_delay: Duration::from_millis(self.startup_retry_delay_ms),
			reset_delay: Duration::from_secs(60),
		}
	}

	pub fn abr_config(&self, track: TrackType) -> streamkit_engine::abr::AbrConfig {
		let bitrate = self.bitrates.get(&track).cloned().unwrap_or_default();
		streamkit_engine::abr::AbrConfig {
			manual_bitrate: bitrate.manual_bitrate,
			initial_bitrate: bitrate.initial_bitrate,
			max_auto_bitrate: bitrate.max_auto_bitrate,
			throttle: bitrate.throttle,
			limit_width: bitrate.limit_width,
			debounce: Duration::from_millis(500),
		}
	}

	/// `ValueEnum`-free helper for `startAt` wired up outside `clap`
	/// (structural config fields aren't CLI-representable, see the struct
	/// doc comment) -- kept here rather than in `main.rs` so programmatic
	/// embedders get the same defaults the CLI does.
	pub fn with_start_at(mut self, start_at: StartAt) -> Self {
		self.start_at = start_at;
		self
	}
}

