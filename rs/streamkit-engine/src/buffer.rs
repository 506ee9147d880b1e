//! C6: the Adaptation Buffer (spec §4.5) -- the core per-(period, track)
//! engine. Consumes the clock, ABR decisions, and the pipeline to keep a
//! sink's wanted range covered, switching representation as directed and
//! honoring garbage-collect windows under buffer pressure.

use std::sync::Arc;

use tracing::{debug, info, warn};

use streamkit_core::error::MediaErrorKind;
use streamkit_core::model::manifest::{Adaptation, Period, Segment};
use streamkit_core::model::LedgerEntry;
use streamkit_core::transport::PresentationElement;
use streamkit_core::{Error, Result, TimeRange};

use crate::abr::AbrCoordinator;
use crate::bookkeeper::Bookkeeper;
use crate::pipeline::SegmentPipeline;

/// Buffering window configuration (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
	pub wanted_ahead: f64,
	pub max_ahead: f64,
	pub max_behind: f64,
}

impl Default for BufferConfig {
	fn default() -> Self {
		Self {
			wanted_ahead: 10.0,
			max_ahead: 30.0,
			max_behind: 30.0,
		}
	}
}

/// Outcome of one [`AdaptationBuffer::step`] call, driving the
/// orchestrator's period-transition and event-emission logic.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferOutcome {
	/// More of the wanted range remains uncovered; no terminal condition
	/// reached yet.
	SegmentsQueued,
	/// The wanted range `[currentTime, currentTime + wantedBufferAhead)`,
	/// clipped to the period, is fully covered.
	Filled { wanted_range: (f64, f64) },
	/// The period's end has been reached and is covered.
	Finished { wanted_range: (f64, f64) },
	/// A segment or append was skipped; playback continues.
	Warning(Error),
}

/// The active representation switch this buffer is mid-flight on, if any.
struct PendingSwitch {
	representation_id: String,
	init_appended: bool,
}

/// Per-(period, track) buffering engine. One instance is spawned per track
/// present in a period and retired once the next period's buffer has taken
/// over (spec §4.7 step 8).
pub struct AdaptationBuffer {
	period: Period,
	adaptation: Adaptation,
	sink: Arc<dyn PresentationElement>,
	pipeline: Arc<SegmentPipeline>,
	abr: Arc<AbrCoordinator>,
	bookkeeper: Bookkeeper,
	config: BufferConfig,
	manifest_url: url::Url,
	active_representation: Option<String>,
	pending_switch: Option<PendingSwitch>,
}

impl AdaptationBuffer {
	pub fn new(
		period: Period,
		adaptation: Adaptation,
		sink: Arc<dyn PresentationElement>,
		pipeline: Arc<SegmentPipeline>,
		abr: Arc<AbrCoordinator>,
		manifest_url: url::Url,
		config: BufferConfig,
	) -> Self {
		Self {
			period,
			adaptation,
			sink,
			pipeline,
			abr,
			bookkeeper: Bookkeeper::new(),
			config,
			manifest_url,
			active_representation: None,
			pending_switch: None,
		}
	}

	pub fn period_id(&self) -> &str {
		&self.period.id
	}

	pub fn adaptation_id(&self) -> &str {
		&self.adaptation.id
	}

	/// The representation currently considered active, i.e. the one whose
	/// init segment has been appended and is being fed segments. `None`
	/// before the first segment of the period has resolved (spec §4.5
	/// Selecting -> Fetching transition).
	pub fn active_representation(&self) -> Option<&str> {
		self.active_representation.as_deref()
	}

	/// Contiguous seconds covered starting at `current_time`, per the
	/// Bookkeeper -- fed back to the clock so stall detection (spec §3
	/// `bufferedGap`) doesn't need its own tracking of append history.
	pub fn buffered_ahead(&self, current_time: f64) -> f64 {
		(self.bookkeeper.covered_until(current_time) - current_time).max(0.0)
	}

	/// One iteration of the state machine, given the current playback time.
	/// `Idle -> Selecting -> Fetching -> Appending -> Filled/Finished`,
	/// collapsed into a single call since each step is already async and
	/// cooperative (spec §5: suspension points are stream-emission
	/// boundaries, not explicit state objects).
	pub async fn step(&mut self, current_time: f64) -> Result<BufferOutcome> {
		self.bookkeeper.synchronize(&self.sink.buffered());

		let period_end = self.period.end().unwrap_or(f64::INFINITY);
		let wanted_end = (current_time + self.config.wanted_ahead).min(period_end);
		let Some(wanted_range) = TimeRange::new(current_time, wanted_end) else {
			return Ok(BufferOutcome::Finished {
				wanted_range: (current_time, current_time),
			});
		};

		// Selecting: consult ABR, schedule a switch if the decision changed.
		if let Some(representation) = self.abr.select(&self.adaptation) {
			if self.active_representation.as_deref() != Some(representation.id.as_str()) {
				info!(representation = %representation.id, "representation switch scheduled");
				self.pipeline.cancel_in_flight();
				self.pending_switch = Some(PendingSwitch {
					representation_id: representation.id.clone(),
					init_appended: false,
				});
			}
		}

		let Some(representation_id) = self
			.pending_switch
			.as_ref()
			.map(|p| p.representation_id.clone())
			.or_else(|| self.active_representation.clone())
		else {
			return Ok(BufferOutcome::SegmentsQueued);
		};

		let representation = self
			.adaptation
			.representation(&representation_id)
			.ok_or_else(|| Error::other(anyhow::anyhow!("representation {representation_id} no longer in adaptation")))?;

		// Init segment always prepended after any representation change.
		if let Some(pending) = &self.pending_switch {
			if !pending.init_appended {
				if let Some(init) = &representation.init_segment {
					match self.fetch_and_append(init, &representation_id).await {
						Ok(_) => self.pending_switch.as_mut().unwrap().init_appended = true,
						Err(err) if !err.fatal() => return Ok(BufferOutcome::Warning(err)),
						Err(err) => return Err(err),
					}
				} else {
					self.pending_switch.as_mut().unwrap().init_appended = true;
				}
			}
		}

		let covered_until = self.bookkeeper.covered_until(wanted_range.start);
		if covered_until >= wanted_range.end {
			if let Some(pending) = self.pending_switch.take() {
				self.active_representation = Some(pending.representation_id);
			}

			return Ok(if wanted_range.end >= period_end {
				BufferOutcome::Finished {
					wanted_range: (wanted_range.start, wanted_range.end),
				}
			} else {
				BufferOutcome::Filled {
					wanted_range: (wanted_range.start, wanted_range.end),
				}
			});
		}

		let Some(range) = TimeRange::new(covered_until, wanted_range.end) else {
			return Ok(BufferOutcome::SegmentsQueued);
		};
		let Some(segment) = representation.indexer.segment_for_time(range.start) else {
			return Ok(BufferOutcome::SegmentsQueued);
		};

		if !segment.is_playable() {
			warn!(segment = %segment.id, "segment with non-positive duration skipped");
			return Ok(BufferOutcome::Warning(Error::media(
				MediaErrorKind::SourceBufferError,
				format!("segment {} has non-positive duration", segment.id),
				false,
			)));
		}

		match self.fetch_and_append(&segment, &representation_id).await {
			Ok(_) => {
				if let Some(pending) = &self.pending_switch {
					if pending.init_appended && pending.representation_id == representation_id {
						self.active_representation = Some(representation_id);
						self.pending_switch = None;
					}
				}
				Ok(BufferOutcome::SegmentsQueued)
			}
			Err(err) if !err.fatal() => Ok(BufferOutcome::Warning(err)),
			Err(err) => Err(err),
		}
	}

	async fn fetch_and_append(&mut self, segment: &Segment, representation_id: &str) -> Result<()> {
		let (bytes, metrics) = self.pipeline.request(&self.manifest_url, segment).await?;
		self.abr.record_metrics(metrics);

		let range = match self.sink.append(bytes.clone()).await {
			Ok(range) => range,
			Err(err) if matches!(err, Error::Media { kind: MediaErrorKind::BufferFull, .. }) => {
				self.garbage_collect(segment.time).await?;
				self.sink.append(bytes).await.map_err(|err| {
					warn!(segment = %segment.id, "buffer still full after GC");
					err
				})?
			}
			Err(err) => return Err(err),
		};

		debug!(segment = %segment.id, start = range.0, end = range.1, "segment appended");

		if let Some(entry_range) = TimeRange::new(range.0, range.1) {
			self.bookkeeper.insert(LedgerEntry {
				range: entry_range,
				segment: segment.clone(),
				representation_id: representation_id.to_string(),
				adaptation_id: self.adaptation.id.clone(),
				period_id: self.period.id.clone(),
			});
		}
		Ok(())
	}

	/// GC window `[currentTime - maxBufferBehind, currentTime + maxBufferAhead]`
	/// (spec §4.5 Appending state).
	async fn garbage_collect(&self, current_time: f64) -> Result<()> {
		let keep = (
			(current_time - self.config.max_behind).max(0.0),
			current_time + self.config.max_ahead,
		);
		self.sink.remove(keep).await
	}
}
