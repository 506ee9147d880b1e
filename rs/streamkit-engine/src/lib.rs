//! The hard logic of the adaptive playback orchestrator: bookkeeping,
//! ABR, the adaptation buffer state machine, the presentation surface,
//! the protection driver, and the overlay/text sink (spec §4.2-4.6, §4.9).
//!
//! `streamkit-orchestrator` composes these into the Stream Orchestrator
//! (C8); this crate only ever runs one (period, track) or one
//! cross-cutting concern at a time and has no notion of period sequencing.

pub mod abr;
pub mod bookkeeper;
pub mod buffer;
pub mod overlay;
pub mod protection;
pub mod surface;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub mod pipeline;
pub use pipeline::{SegmentMetrics, SegmentPipeline};
