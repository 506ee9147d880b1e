//! Manifest / Period / Adaptation / Representation / Segment (spec §3).

use std::collections::BTreeMap;

use crate::time::{TimeRange, PLATFORM_MAX_DURATION};

/// The four track kinds a period can carry (spec GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackType {
	Audio,
	Video,
	Text,
	Image,
}

impl TrackType {
	/// Native sinks (backed by the presentation source extension) are used
	/// for audio/video; custom (in-process) sinks for text/image (spec §3).
	pub fn is_native(self) -> bool {
		matches!(self, Self::Audio | Self::Video)
	}
}

/// A segment descriptor. Bytes flow separately -- this is metadata only.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
	pub id: String,
	pub time: f64,
	pub duration: f64,
	pub media_range: Option<(u64, u64)>,
	pub index_range: Option<(u64, u64)>,
	pub is_init: bool,
}

impl Segment {
	/// Spec §4.5 edge policy: a segment with `duration <= 0` is skipped with
	/// a warning rather than appended.
	pub fn is_playable(&self) -> bool {
		self.duration > 0.0
	}

	pub fn range(&self) -> Option<TimeRange> {
		TimeRange::new(self.time, self.time + self.duration)
	}
}

/// A concrete encoding (bitrate/codec) within an [`Adaptation`].
#[derive(Debug, Clone)]
pub struct Representation {
	pub id: String,
	pub bitrate: u64,
	pub mime_type: String,
	pub codecs: String,
	/// Pixel width, for video representations. Used by the ABR Coordinator's
	/// `limitWidth` clipping; `None` for audio/text/image.
	pub width: Option<u32>,
	pub init_segment: Option<Segment>,
	pub indexer: std::sync::Arc<dyn SegmentIndex>,
}

/// Maps time ranges to segment descriptors for one representation.
///
/// A trait rather than a concrete type because indexing strategy (segment
/// template, segment timeline, single-file byte-range index, ...) is a
/// manifest-parser concern this crate doesn't own (spec §1 Out of scope);
/// we only need to consume whatever the parser hands back.
pub trait SegmentIndex: Send + Sync + std::fmt::Debug {
	/// The segment covering (or starting at/after) `time`, if any.
	fn segment_for_time(&self, time: f64) -> Option<Segment>;

	/// The segment immediately following `segment` in presentation order.
	fn segment_after(&self, segment: &Segment) -> Option<Segment>;

	/// All known segments overlapping `range`, in presentation order.
	fn segments_in_range(&self, range: TimeRange) -> Vec<Segment>;
}

/// A selectable variant group (language, role) for a track type within a
/// period.
#[derive(Debug, Clone)]
pub struct Adaptation {
	pub id: String,
	pub kind: TrackType,
	pub representations: Vec<Representation>,
}

impl Adaptation {
	/// Spec §3 invariant: non-empty.
	pub fn new(id: impl Into<String>, kind: TrackType, representations: Vec<Representation>) -> Option<Self> {
		if representations.is_empty() {
			return None;
		}
		Some(Self {
			id: id.into(),
			kind,
			representations,
		})
	}

	pub fn representation(&self, id: &str) -> Option<&Representation> {
		self.representations.iter().find(|r| r.id == id)
	}

	/// The highest-bitrate representation no greater than `max_bitrate`,
	/// falling back to the lowest representation available. Used by the ABR
	/// Coordinator (§4.4) for both manual and automatic selection.
	pub fn best_representation_under(&self, max_bitrate: u64) -> &Representation {
		self.representations
			.iter()
			.filter(|r| r.bitrate <= max_bitrate)
			.max_by_key(|r| r.bitrate)
			.unwrap_or_else(|| self.representations.iter().min_by_key(|r| r.bitrate).unwrap())
	}
}

/// A contiguous time interval of the presentation with a fixed adaptation
/// set.
#[derive(Debug, Clone)]
pub struct Period {
	pub id: String,
	pub start: f64,
	pub duration: Option<f64>,
	pub adaptations: BTreeMap<TrackType, Vec<Adaptation>>,
}

impl Period {
	pub fn end(&self) -> Option<f64> {
		self.duration.map(|d| self.start + d)
	}

	pub fn contains(&self, t: f64) -> bool {
		t >= self.start && self.end().is_none_or(|end| t < end)
	}

	pub fn adaptations_for(&self, kind: TrackType) -> &[Adaptation] {
		self.adaptations.get(&kind).map(Vec::as_slice).unwrap_or(&[])
	}
}

/// An immutable per-fetch snapshot containing an ordered sequence of
/// periods. `update` merges a refreshed snapshot in place, preserving
/// identity (by `id`) of already-seen periods (spec §3 invariant).
#[derive(Debug, Clone)]
pub struct Manifest {
	pub url: url::Url,
	pub is_live: bool,
	periods: Vec<Period>,
	/// `None` means unbounded/live; a finite duration is otherwise stored
	/// directly. `f64::INFINITY` is never stored here -- see
	/// [`PLATFORM_MAX_DURATION`] and invariant 8.
	duration: Option<f64>,
}

impl Manifest {
	pub fn new(url: url::Url, is_live: bool, periods: Vec<Period>, duration: Option<f64>) -> Self {
		Self {
			url,
			is_live,
			periods,
			duration: duration.map(|d| if d.is_infinite() { PLATFORM_MAX_DURATION } else { d }),
		}
	}

	pub fn periods(&self) -> &[Period] {
		&self.periods
	}

	pub fn get_duration(&self) -> f64 {
		self.duration.unwrap_or(PLATFORM_MAX_DURATION)
	}

	pub fn get_url(&self) -> &url::Url {
		&self.url
	}

	pub fn get_period_for_time(&self, t: f64) -> Option<&Period> {
		self.periods.iter().find(|p| p.contains(t))
	}

	pub fn period_after(&self, period_id: &str) -> Option<&Period> {
		let index = self.periods.iter().position(|p| p.id == period_id)?;
		self.periods.get(index + 1)
	}

	/// Merge a refreshed manifest into this one, preserving the identity of
	/// already-seen periods (matched by `id`) and appending genuinely new
	/// ones. Idempotent: applying the same `new` twice is a no-op the second
	/// time (spec §8 property 7).
	pub fn update(&mut self, new: Manifest) {
		self.is_live = new.is_live;
		self.duration = new.duration;

		for period in new.periods {
			match self.periods.iter_mut().find(|p| p.id == period.id) {
				Some(existing) => *existing = period,
				None => self.periods.push(period),
			}
		}
		self.periods.sort_by(|a, b| a.start.total_cmp(&b.start));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[derive(Debug)]
	struct EmptyIndex;
	impl SegmentIndex for EmptyIndex {
		fn segment_for_time(&self, _time: f64) -> Option<Segment> {
			None
		}
		fn segment_after(&self, _segment: &Segment) -> Option<Segment> {
			None
		}
		fn segments_in_range(&self, _range: TimeRange) -> Vec<Segment> {
			Vec::new()
		}
	}

	fn representation(id: &str, bitrate: u64) -> Representation {
		Representation {
			id: id.to_string(),
			bitrate,
			mime_type: "video/mp4".to_string(),
			codecs: "avc1.64001f".to_string(),
			width: None,
			init_segment: None,
			indexer: Arc::new(EmptyIndex),
		}
	}

	#[test]
	fn infinite_duration_is_persisted_as_platform_max() {
		let manifest = Manifest::new(
			url::Url::parse("https://example.com/manifest.mpd").unwrap(),
			true,
			Vec::new(),
			Some(f64::INFINITY),
		);
		assert_eq!(manifest.get_duration(), PLATFORM_MAX_DURATION);
		assert!(manifest.get_duration().is_finite());
	}

	#[test]
	fn update_preserves_identity_and_is_idempotent() {
		let mut manifest = Manifest::new(
			url::Url::parse("https://example.com/manifest.mpd").unwrap(),
			true,
			vec![Period {
				id: "p0".to_string(),
				start: 0.0,
				duration: Some(30.0),
				adaptations: BTreeMap::new(),
			}],
			None,
		);

		let refreshed = Manifest::new(
			manifest.url.clone(),
			true,
			vec![
				Period {
					id: "p0".to_string(),
					start: 0.0,
					duration: Some(30.0),
					adaptations: BTreeMap::new(),
				},
				Period {
					id: "p1".to_string(),
					start: 30.0,
					duration: Some(30.0),
					adaptations: BTreeMap::new(),
				},
			],
			None,
		);

		manifest.update(refreshed.clone());
		assert_eq!(manifest.periods().len(), 2);

		manifest.update(refreshed);
		assert_eq!(manifest.periods().len(), 2);
		assert_eq!(manifest.periods()[1].id, "p1");
	}

	#[test]
	fn best_representation_under_falls_back_to_lowest() {
		let adaptation = Adaptation::new(
			"a0",
			TrackType::Video,
			vec![representation("lo", 500_000), representation("hi", 3_000_000)],
		)
		.unwrap();

		assert_eq!(adaptation.best_representation_under(800_000).id, "lo");
		assert_eq!(adaptation.best_representation_under(10).id, "lo");
		assert_eq!(adaptation.best_representation_under(5_000_000).id, "hi");
	}

	#[test]
	fn adaptation_rejects_empty_representations() {
		assert!(Adaptation::new("a0", TrackType::Video, Vec::new()).is_none());
	}
}
