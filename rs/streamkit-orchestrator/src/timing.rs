//! C1: the Timing Source (spec §4.1, §3 `TimingsTick`) -- produces the
//! `{currentTime, duration, readyState, playbackRate, stalled}` clock the
//! rest of the orchestrator reacts to, plus seek events.
//!
//! There is no real media element in this workspace (spec §1 Out of
//! scope: "the presentation element"), so [`PlaybackClock`] stands in for
//! it: the orchestrator's own tick loop advances it, and a host-provided
//! `PresentationElement` implementation is expected to mirror its own
//! clock into the same shape for a real deployment.

use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use streamkit_core::model::{ReadyState, TimingsTick, DEFAULT_TIMING_INTERVAL};

struct ClockState {
	current_time: f64,
	duration: f64,
	playback_rate: f64,
	paused: bool,
	ready_state: ReadyState,
	buffered_ahead: f64,
}

/// The mutable clock the Stream Orchestrator drives and the Timing Source
/// samples. `seek`/`set_playback_rate`/`set_paused` are the user-intent
/// entry points spec §4.7/§6 route through the orchestrator.
pub struct PlaybackClock {
	state: Mutex<ClockState>,
}

impl PlaybackClock {
	pub fn new(initial_time: f64, duration: f64) -> Self {
		Self {
			state: Mutex::new(ClockState {
				current_time: initial_time,
				duration,
				playback_rate: 1.0,
				paused: true,
				ready_state: ReadyState::HaveNothing,
				buffered_ahead: 0.0,
			}),
		}
	}

	pub fn current_time(&self) -> f64 {
		self.state.lock().unwrap().current_time
	}

	pub fn duration(&self) -> f64 {
		self.state.lock().unwrap().duration
	}

	pub fn set_duration(&self, duration: f64) {
		self.state.lock().unwrap().duration = duration;
	}

	/// A discontinuous jump in `currentTime`, as opposed to the continuous
	/// advance `advance` performs during normal playback.
	pub fn seek(&self, to: f64) {
		let mut state = self.state.lock().unwrap();
		state.current_time = to.max(0.0);
	}

	pub fn set_paused(&self, paused: bool) {
		self.state.lock().unwrap().paused = paused;
	}

	pub fn set_playback_rate(&self, rate: f64) {
		self.state.lock().unwrap().playback_rate = rate;
	}

	pub fn set_ready_state(&self, ready_state: ReadyState) {
		self.state.lock().unwrap().ready_state = ready_state;
	}

	/// Fed by the Adaptation Buffers via the Bookkeeper: how far past
	/// `currentTime` is contiguously covered. Zero means starved.
	pub fn set_buffered_ahead(&self, seconds: f64) {
		self.state.lock().unwrap().buffered_ahead = seconds.max(0.0);
	}

	/// Advance `currentTime` by `elapsed * playbackRate` if not paused.
	/// Called by the orchestrator's own tick loop -- this is the stand-in
	/// for a real element's native playback advance.
	pub fn advance(&self, elapsed: Duration) {
		let mut state = self.state.lock().unwrap();
		if !state.paused {
			state.current_time += elapsed.as_secs_f64() * state.playback_rate;
		}
	}

	pub fn snapshot(&self) -> TimingsTick {
		let state = self.state.lock().unwrap();
		TimingsTick {
			current_time: state.current_time,
			duration: state.duration,
			buffered_ahead: state.buffered_ahead,
			playback_rate: state.playback_rate,
			paused: state.paused,
			ready_state: state.ready_state,
		}
	}
}

/// Samples a [`PlaybackClock`] at >= 4 Hz (spec §3) and calls `on_tick` for
/// each sample, including a final sample right before the cancellation
/// token fires so the orchestrator never misses the tick that satisfies
/// its end-of-play check.
pub struct TimingSource {
	clock: std::sync::Arc<PlaybackClock>,
	interval: Duration,
}

impl TimingSource {
	pub fn new(clock: std::sync::Arc<PlaybackClock>) -> Self {
		Self {
			clock,
			interval: DEFAULT_TIMING_INTERVAL,
		}
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	#[tracing::instrument(skip_all)]
	pub async fn run(&self, cancel: CancellationToken, mut on_tick: impl FnMut(TimingsTick)) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return,
				_ = ticker.tick() => {
					self.clock.advance(self.interval);
					on_tick(self.clock.snapshot());
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn advance_is_scaled_by_playback_rate() {
		let clock = PlaybackClock::new(0.0, 60.0);
		clock.set_paused(false);
		clock.set_playback_rate(2.0);
		clock.advance(Duration::from_secs(1));
		assert_eq!(clock.current_time(), 2.0);
	}

	#[test]
	fn paused_clock_does_not_advance() {
		let clock = PlaybackClock::new(5.0, 60.0);
		clock.advance(Duration::from_secs(10));
		assert_eq!(clock.current_time(), 5.0);
	}

	#[test]
	fn seek_overrides_current_time() {
		let clock = PlaybackClock::new(0.0, 60.0);
		clock.seek(45.0);
		assert_eq!(clock.current_time(), 45.0);
	}

	#[tokio::test(start_paused = true)]
	async fn timing_source_ticks_at_configured_interval() {
		let clock = std::sync::Arc::new(PlaybackClock::new(0.0, 60.0));
		clock.set_paused(false);
		let source = TimingSource::new(clock.clone()).with_interval(Duration::from_millis(10));
		let cancel = CancellationToken::new();
		let cancel_clone = cancel.clone();

		let mut ticks = 0;
		let run = async {
			source
				.run(cancel_clone, |_tick| {
					ticks += 1;
				})
				.await;
		};

		tokio::select! {
			_ = run => {},
			_ = tokio::time::sleep(Duration::from_millis(55)) => cancel.cancel(),
		}

		assert!(ticks >= 4, "expected at least 4 ticks, got {ticks}");
	}
}
