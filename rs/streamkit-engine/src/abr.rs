//! C5: the ABR Coordinator (spec §4.4) -- consumes throughput metrics and
//! picks a representation per track, honoring manual overrides, throttles,
//! and `limitWidth`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use streamkit_core::model::manifest::{Adaptation, Representation};

use crate::pipeline::SegmentMetrics;

/// How many recent throughput samples feed the windowed estimate.
const WINDOW_SIZE: usize = 4;

/// Safety factor applied to the throughput estimate before selecting a
/// representation (pick highest bitrate <= estimate * factor).
const SAFETY_FACTOR: f64 = 0.8;

#[derive(Debug, Clone, Default)]
pub struct AbrConfig {
	/// Exact-or-closest-below manual override; when set, automatic
	/// estimation is bypassed entirely.
	pub manual_bitrate: Option<u64>,
	/// `initialBitrates` (spec §6): the estimate ceiling to use before the
	/// throughput window has any real samples.
	pub initial_bitrate: Option<u64>,
	pub max_auto_bitrate: Option<u64>,
	/// Hard ceiling regardless of manual/auto mode.
	pub throttle: Option<u64>,
	/// Maximum representation width to consider (video only).
	pub limit_width: Option<u32>,
	pub debounce: Duration,
}

/// Per-track ABR state: a throughput window and the last decision made, so
/// repeated calls with an unchanged estimate don't re-emit a change.
pub struct AbrCoordinator {
	config: Mutex<AbrConfig>,
	window: Mutex<VecDeque<f64>>,
	last_decision: Mutex<Option<LastDecision>>,
}

struct LastDecision {
	representation_id: String,
	at: Instant,
}

impl AbrCoordinator {
	pub fn new(config: AbrConfig) -> Self {
		Self {
			config: Mutex::new(config),
			window: Mutex::new(VecDeque::with_capacity(WINDOW_SIZE)),
			last_decision: Mutex::new(None),
		}
	}

	pub fn set_config(&self, config: AbrConfig) {
		*self.config.lock().unwrap() = config;
	}

	pub fn record_metrics(&self, metrics: SegmentMetrics) {
		if metrics.elapsed.is_zero() {
			return;
		}
		let mut window = self.window.lock().unwrap();
		if window.len() == WINDOW_SIZE {
			window.pop_front();
		}
		window.push_back(metrics.throughput_bits_per_sec());
	}

	/// Select a representation for `adaptation`, returning `None` when the
	/// chosen representation is unchanged from the last call within the
	/// debounce window (spec: "emits a change only when the decision
	/// differs ... debounces within a configurable interval").
	pub fn select(&self, adaptation: &Adaptation) -> Option<&Representation> {
		let config = self.config.lock().unwrap().clone();
		let candidates = self.clip_candidates(adaptation, &config);
		let chosen = candidates
			.last()
			.copied()
			.or_else(|| adaptation.representations.iter().min_by_key(|r| r.bitrate))?;

		let mut last = self.last_decision.lock().unwrap();
		let changed = last.as_ref().is_none_or(|d| d.representation_id != chosen.id);
		let past_debounce = last.as_ref().is_none_or(|d| d.at.elapsed() >= config.debounce);

		if changed && past_debounce {
			*last = Some(LastDecision {
				representation_id: chosen.id.clone(),
				at: Instant::now(),
			});
			Some(chosen)
		} else {
			None
		}
	}

	fn clip_candidates<'a>(&self, adaptation: &'a Adaptation, config: &AbrConfig) -> Vec<&'a Representation> {
		let mut candidates: Vec<&Representation> = adaptation
			.representations
			.iter()
			.filter(|r| config.limit_width.is_none_or(|limit| r.width.is_none_or(|w| w <= limit)))
			.filter(|r| config.throttle.is_none_or(|ceiling| r.bitrate <= ceiling))
			.collect();
		candidates.sort_by_key(|r| r.bitrate);

		if let Some(manual) = config.manual_bitrate {
			if let Some(exact) = candidates.iter().position(|r| r.bitrate == manual) {
				return vec![candidates[exact]];
			}
			let closest = candidates.iter().rev().find(|r| r.bitrate <= manual).copied();
			return closest.into_iter().collect();
		}

		let ceiling = self.estimate_bitrate(config.initial_bitrate).min(config.max_auto_bitrate.unwrap_or(u64::MAX) as f64);
		candidates.into_iter().filter(|r| r.bitrate as f64 <= ceiling).collect()
	}

	/// Windowed average throughput scaled by [`SAFETY_FACTOR`]. An empty
	/// window (no samples yet) falls back to `initialBitrates` as the
	/// estimate ceiling so the very first selection isn't starved to the
	/// lowest representation; with no initial bitrate configured either, the
	/// first pick is unconstrained (`f64::MAX`) and `max_auto_bitrate`/
	/// candidate clipping are the only ceilings left.
	fn estimate_bitrate(&self, initial_bitrate: Option<u64>) -> f64 {
		let window = self.window.lock().unwrap();
		if window.is_empty() {
			return initial_bitrate.map(|b| b as f64).unwrap_or(f64::MAX);
		}
		let average = window.iter().sum::<f64>() / window.len() as f64;
		average * SAFETY_FACTOR
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use streamkit_core::model::manifest::{SegmentIndex, TrackType};
	use streamkit_core::time::TimeRange;

	#[derive(Debug)]
	struct EmptyIndex;
	impl SegmentIndex for EmptyIndex {
		fn segment_for_time(&self, _time: f64) -> Option<streamkit_core::model::manifest::Segment> {
			None
		}
		fn segment_after(&self, _segment: &streamkit_core::model::manifest::Segment) -> Option<streamkit_core::model::manifest::Segment> {
			None
		}
		fn segments_in_range(&self, _range: TimeRange) -> Vec<streamkit_core::model::manifest::Segment> {
			Vec::new()
		}
	}

	fn representation(id: &str, bitrate: u64, width: Option<u32>) -> Representation {
		Representation {
			id: id.to_string(),
			bitrate,
			mime_type: "video/mp4".to_string(),
			codecs: "avc1.64001f".to_string(),
			width,
			init_segment: None,
			indexer: Arc::new(EmptyIndex),
		}
	}

	fn video_adaptation() -> Adaptation {
		Adaptation::new(
			"a0",
			TrackType::Video,
			vec![
				representation("lo", 500_000, Some(640)),
				representation("mid", 1_500_000, Some(1280)),
				representation("hi", 3_000_000, Some(1920)),
			],
		)
		.unwrap()
	}

	#[test]
	fn manual_bitrate_picks_exact_match() {
		let coordinator = AbrCoordinator::new(AbrConfig {
			manual_bitrate: Some(1_500_000),
			..Default::default()
		});
		assert_eq!(coordinator.select(&video_adaptation()).unwrap().id, "mid");
	}

	#[test]
	fn manual_bitrate_falls_back_to_closest_below() {
		let coordinator = AbrCoordinator::new(AbrConfig {
			manual_bitrate: Some(2_000_000),
			..Default::default()
		});
		assert_eq!(coordinator.select(&video_adaptation()).unwrap().id, "mid");
	}

	#[test]
	fn limit_width_excludes_larger_representations() {
		let coordinator = AbrCoordinator::new(AbrConfig {
			manual_bitrate: Some(3_000_000),
			limit_width: Some(1280),
			..Default::default()
		});
		assert_eq!(coordinator.select(&video_adaptation()).unwrap().id, "mid");
	}

	#[test]
	fn automatic_selection_downshifts_under_low_throughput() {
		let coordinator = AbrCoordinator::new(AbrConfig::default());
		coordinator.record_metrics(SegmentMetrics {
			bytes: 100_000,
			elapsed: Duration::from_secs(1),
		});
		let chosen = coordinator.select(&video_adaptation()).unwrap();
		assert_eq!(chosen.id, "lo");
	}

	#[test]
	fn initial_bitrate_caps_the_first_selection_before_any_samples() {
		let coordinator = AbrCoordinator::new(AbrConfig {
			initial_bitrate: Some(1_000_000),
			..Default::default()
		});
		assert_eq!(coordinator.select(&video_adaptation()).unwrap().id, "lo");
	}

	#[test]
	fn unchanged_decision_within_debounce_is_suppressed() {
		let coordinator = AbrCoordinator::new(AbrConfig {
			manual_bitrate: Some(1_500_000),
			debounce: Duration::from_secs(60),
			..Default::default()
		});
		assert!(coordinator.select(&video_adaptation()).is_some());
		assert!(coordinator.select(&video_adaptation()).is_none());
	}
}
