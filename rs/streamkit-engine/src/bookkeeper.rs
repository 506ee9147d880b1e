//! C3: the Segment Bookkeeper (spec §4.2) -- a per-sink ledger of which time
//! ranges are covered by which segment, used for gap/overlap detection by
//! the Adaptation Buffer.

use streamkit_core::model::LedgerEntry;
use streamkit_core::TimeRange;

/// Epsilon below which two ranges are considered abutting rather than
/// leaving a gap, matching the Bookkeeper's coalescing tolerance.
const COALESCE_EPSILON: f64 = 0.05;

/// Lazily constructed per-track; no global state (design note: "Lazy"
/// Bookkeeper per type).
#[derive(Debug, Default)]
pub struct Bookkeeper {
	entries: Vec<LedgerEntry>,
}

impl Bookkeeper {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a newly-appended range. Newest wins on overlap: any existing
	/// entry's range is clipped to remove the overlap, and dropped entirely
	/// if nothing remains. Abutting entries from the same
	/// `(period, adaptation, representation)` tuple are merged.
	pub fn insert(&mut self, mut entry: LedgerEntry) {
		let mut merged = Vec::with_capacity(self.entries.len() + 1);

		for existing in self.entries.drain(..) {
			if existing.range.overlaps(&entry.range) {
				if let Some(clipped) = clip_outside(&existing.range, &entry.range) {
					merged.push(LedgerEntry { range: clipped, ..existing });
				}
				continue;
			}

			if existing.same_source(&entry) && existing.range.abuts(&entry.range, COALESCE_EPSILON) {
				entry.range = existing.range.union(&entry.range);
				continue;
			}

			merged.push(existing);
		}

		merged.push(entry);
		merged.sort_by(|a, b| a.range.start.total_cmp(&b.range.start));
		self.entries = merged;
	}

	/// The ledger entry covering `time`, if any.
	pub fn get(&self, time: f64) -> Option<&LedgerEntry> {
		self.entries.iter().find(|e| e.range.contains(time))
	}

	/// Union of covered ranges, ascending.
	pub fn covered_ranges(&self) -> Vec<TimeRange> {
		self.entries.iter().map(|e| e.range).collect()
	}

	/// Largest time such that `[from, result)` is fully covered without
	/// gaps, starting the scan at `from`. Returns `from` if nothing is
	/// covered there at all.
	pub fn covered_until(&self, from: f64) -> f64 {
		let mut frontier = from;
		loop {
			match self.entries.iter().find(|e| e.range.contains(frontier) || (e.range.start - frontier).abs() <= COALESCE_EPSILON) {
				Some(e) if e.range.end > frontier => frontier = e.range.end,
				_ => return frontier,
			}
		}
	}

	/// Drop entries no longer backed by the sink's buffered ranges (spec
	/// §4.2 `synchronize`), handling browser/element-side eviction.
	pub fn synchronize(&mut self, sink_buffered: &[(f64, f64)]) {
		self.entries.retain(|entry| {
			sink_buffered
				.iter()
				.any(|&(start, end)| start <= entry.range.start + COALESCE_EPSILON && entry.range.end <= end + COALESCE_EPSILON)
		});
	}
}

/// Clip `base` to the portion that does not overlap `cut`, keeping only the
/// larger remaining side if `cut` splits `base` into two pieces (the
/// Bookkeeper doesn't model split entries, matching the non-goal of
/// producing gapless coverage under overlapping appends from different
/// representations).
fn clip_outside(base: &TimeRange, cut: &TimeRange) -> Option<TimeRange> {
	let left = TimeRange::new(base.start, base.end.min(cut.start));
	let right = TimeRange::new(base.start.max(cut.end), base.end);

	match (left, right) {
		(Some(l), Some(r)) => Some(if l.duration() >= r.duration() { l } else { r }),
		(Some(l), None) => Some(l),
		(None, Some(r)) => Some(r),
		(None, None) => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use streamkit_core::model::manifest::Segment;

	fn entry(start: f64, end: f64, representation: &str) -> LedgerEntry {
		LedgerEntry {
			range: TimeRange::new(start, end).unwrap(),
			segment: Segment {
				id: format!("{start}"),
				time: start,
				duration: end - start,
				media_range: None,
				index_range: None,
				is_init: false,
			},
			representation_id: representation.to_string(),
			adaptation_id: "a0".to_string(),
			period_id: "p0".to_string(),
		}
	}

	#[test]
	fn abutting_entries_from_same_source_are_coalesced() {
		let mut bookkeeper = Bookkeeper::new();
		bookkeeper.insert(entry(0.0, 2.0, "r0"));
		bookkeeper.insert(entry(2.0, 4.0, "r0"));

		let ranges = bookkeeper.covered_ranges();
		assert_eq!(ranges.len(), 1);
		assert_eq!(ranges[0], TimeRange::new(0.0, 4.0).unwrap());
	}

	#[test]
	fn newest_overlapping_insert_clips_the_older_entry() {
		let mut bookkeeper = Bookkeeper::new();
		bookkeeper.insert(entry(0.0, 4.0, "lo"));
		bookkeeper.insert(entry(2.0, 6.0, "hi"));

		let entry_at_1 = bookkeeper.get(1.0).unwrap();
		assert_eq!(entry_at_1.representation_id, "lo");
		let entry_at_3 = bookkeeper.get(3.0).unwrap();
		assert_eq!(entry_at_3.representation_id, "hi");
	}

	#[test]
	fn synchronize_prunes_entries_not_backed_by_sink() {
		let mut bookkeeper = Bookkeeper::new();
		bookkeeper.insert(entry(0.0, 2.0, "r0"));
		bookkeeper.insert(entry(10.0, 12.0, "r0"));

		bookkeeper.synchronize(&[(0.0, 2.0)]);

		assert!(bookkeeper.get(1.0).is_some());
		assert!(bookkeeper.get(11.0).is_none());
	}

	#[test]
	fn covered_until_reports_gapless_frontier() {
		let mut bookkeeper = Bookkeeper::new();
		bookkeeper.insert(entry(0.0, 2.0, "r0"));
		bookkeeper.insert(entry(2.0, 4.0, "r0"));
		bookkeeper.insert(entry(5.0, 6.0, "r0"));

		assert_eq!(bookkeeper.covered_until(0.0), 4.0);
	}
}
