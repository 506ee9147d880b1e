//! Events the Stream Orchestrator broadcasts to the host application
//! (spec §3, §6): manifest/track/buffer lifecycle, periodic timing ticks,
//! and the `Stalled`/`Warning`/`Fatal` trio that mirror `waiting`/non-fatal
//! `error`/fatal `error` on a native media element.

use std::time::Duration;

use crate::error::Error;

use super::manifest::TrackType;

/// Mirrors the readyState progression of a native presentation element
/// (spec GLOSSARY), driven by how much of the current position is buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
	HaveNothing,
	HaveMetadata,
	HaveCurrentData,
	HaveFutureData,
	HaveEnoughData,
}

/// A periodic snapshot of playback timing, emitted at the cadence configured
/// on the orchestrator (spec §4.1 Timing Coordinator).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingsTick {
	pub current_time: f64,
	pub duration: f64,
	pub buffered_ahead: f64,
	pub playback_rate: f64,
	pub paused: bool,
	pub ready_state: ReadyState,
}

/// Everything the orchestrator pushes onto its public event broker. Each
/// variant corresponds to one of the host-facing notifications in spec §6.
#[derive(Debug, Clone)]
pub enum StreamEvent {
	/// A period/adaptation structural change was detected (new period
	/// entered, or an adaptation set appeared/disappeared on refresh).
	ManifestChange,
	/// A live manifest refresh completed, independent of whether it changed
	/// structure.
	ManifestUpdate,
	/// The active adaptation for a track type changed (e.g. a period
	/// boundary switched the selected language).
	AdaptationChange { track: TrackType, adaptation_id: String },
	/// The ABR Coordinator (or a manual override) switched representations.
	RepresentationChange { track: TrackType, representation_id: String },
	/// A segment was appended to a sink, growing its buffered range.
	BufferFilled { track: TrackType, range: (f64, f64) },
	/// A track's buffer reached the end of its available periods.
	BufferFinished { track: TrackType },
	/// Enough of every native track is buffered at the current position to
	/// reach [`ReadyState::HaveEnoughData`] for the first time.
	Loaded,
	/// The presentation element's playback rate changed (including the
	/// implicit 0 <-> previous-rate transitions around pause/play).
	Speed { rate: f64 },
	/// Playback starved: buffered ahead of the current position dropped to
	/// zero while not at the end of the presentation.
	Stalled,
	/// A non-fatal error was recorded; playback continues.
	Warning { error: Error },
	/// A fatal error tore down the session. This is the terminal event on
	/// this broker -- no further events follow for the session.
	Fatal { error: Error },
}

impl StreamEvent {
	pub fn warning(error: Error) -> Self {
		debug_assert!(!error.fatal(), "fatal error reported as a warning");
		Self::Warning { error }
	}

	pub fn fatal(error: Error) -> Self {
		Self::Fatal { error }
	}
}

/// Default cadence for [`TimingsTick`] emission (spec §4.1).
pub const DEFAULT_TIMING_INTERVAL: Duration = Duration::from_millis(250);
