//! Timing Source, configuration, and the Stream Orchestrator that compose
//! `streamkit-engine` into a full playback session.

pub mod config;
pub mod orchestrator;
pub mod timing;

pub use config::{Config, StartAt};
pub use orchestrator::{Orchestrator, SessionFactory};
pub use timing::{PlaybackClock, TimingSource};
