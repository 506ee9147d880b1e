//! The Stream Orchestrator: composes the Presentation Surface, Segment
//! Pipelines, ABR Coordinators, Adaptation Buffers, and Protection Driver
//! into one playback session, and drives period transitions, live refresh,
//! speed, stall, and end-of-play.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use streamkit_core::error::MediaErrorKind;
use streamkit_core::model::manifest::{Adaptation, Manifest, Period, TrackType};
use streamkit_core::model::{ReadyState, StreamEvent};
use streamkit_core::transport::{ManifestSource, PresentationElement};
use streamkit_core::{Broker, Error, Result, RetryHarness, Subscription};

use streamkit_engine::abr::AbrCoordinator;
use streamkit_engine::buffer::{AdaptationBuffer, BufferOutcome};
use streamkit_engine::pipeline::SegmentPipeline;
use streamkit_engine::protection::ProtectionManager;
use streamkit_engine::surface::Surface;

use crate::config::{Config, StartAt};
use crate::timing::{PlaybackClock, TimingSource};

/// Gap, in seconds, added past a buffer's `wantedRange.end` before probing
/// the manifest for the next period.
const PERIOD_TRANSITION_EPSILON: f64 = 2.0;

/// Builds the host-side resources a session needs per track type: the
/// appendable sink and the transport pair feeding its Segment Pipeline.
/// The orchestrator is otherwise transport/DOM-agnostic.
pub trait SessionFactory: Send + Sync {
	fn create_element(&self, track: TrackType) -> Arc<dyn PresentationElement>;
	fn create_pipeline(&self, track: TrackType) -> Arc<SegmentPipeline>;
}

/// Composes the full playback pipeline into one session. One
/// `Orchestrator` drives one session to completion; build a new one for
/// the next `load()` call the host makes, same as the teacher's
/// `Connection` is one-shot per accepted request.
pub struct Orchestrator {
	config: Config,
	manifest_source: Arc<dyn ManifestSource>,
	factory: Arc<dyn SessionFactory>,
	protection: Option<Arc<ProtectionManager>>,
	events: Broker<StreamEvent>,
	protection_pending: AtomicBool,
	clock: std::sync::Mutex<Option<Arc<PlaybackClock>>>,
}

impl Orchestrator {
	pub fn new(config: Config, manifest_source: Arc<dyn ManifestSource>, factory: Arc<dyn SessionFactory>, protection: Option<Arc<ProtectionManager>>) -> Self {
		Self {
			config,
			manifest_source,
			factory,
			protection,
			events: Broker::new(),
			protection_pending: AtomicBool::new(false),
			clock: std::sync::Mutex::new(None),
		}
	}

	/// The host-facing stream of [`StreamEvent`]s (spec §6).
	pub fn subscribe(&self) -> Subscription<StreamEvent> {
		self.events.subscribe()
	}

	fn current_clock(&self) -> Option<Arc<PlaybackClock>> {
		self.clock.lock().unwrap().clone()
	}

	/// Host-driven seek (spec §6 `seek`). A no-op before `run()`'s startup
	/// has installed a clock.
	pub fn seek(&self, to: f64) {
		if let Some(clock) = self.current_clock() {
			clock.seek(to);
		}
	}

	pub fn play(&self) {
		if let Some(clock) = self.current_clock() {
			clock.set_paused(false);
		}
	}

	pub fn pause(&self) {
		if let Some(clock) = self.current_clock() {
			clock.set_paused(true);
		}
	}

	pub fn set_playback_rate(&self, rate: f64) {
		if let Some(clock) = self.current_clock() {
			clock.set_playback_rate(rate);
		}
	}

	/// Called by the host when the presentation element fires `encrypted`.
	/// Gates further segment appends until the Protection Driver reaches
	/// `Ready` (spec §5: "the first append is gated on protection
	/// `Configured`").
	pub async fn handle_encrypted(&self, init_data_type: &str, init_data: &[u8]) -> Result<()> {
		let Some(protection) = &self.protection else {
			return Ok(());
		};
		self.protection_pending.store(true, Ordering::SeqCst);
		let result = protection.handle_encrypted(init_data_type, init_data).await;
		if result.is_ok() {
			self.protection_pending.store(false, Ordering::SeqCst);
		}
		result
	}

	fn protection_blocked(&self) -> bool {
		self.protection_pending.load(Ordering::SeqCst)
	}

	/// Run one playback session against `url` to completion: startup
	/// (steps 1-8), the main tick loop (step 9), and termination (step
	/// 10). Scoped acquisition: Surface and Protection are torn down on
	/// every exit path, success or failure, matching spec §4.7 step 1 and
	/// invariant 5.
	#[tracing::instrument(skip_all, fields(url = %url))]
	pub async fn run(&self, url: url::Url) -> Result<()> {
		let protection_guard = match &self.protection {
			Some(manager) => Some(manager.acquire()?),
			None => None,
		};

		let mut surface = Surface::open(url.clone(), self.config.with_media_source);
		let result = self.run_session(&url, &mut surface).await;

		*self.clock.lock().unwrap() = None;
		surface.teardown().await;
		if let Some(manager) = &self.protection {
			manager.dispose().await;
		}
		drop(protection_guard);

		match &result {
			Ok(()) => info!("session ended"),
			Err(err) => {
				self.events.publish(StreamEvent::fatal(err.clone()));
				warn!(error = %err, "session ended with a fatal error");
			}
		}
		result
	}

	async fn run_session(&self, url: &url::Url, surface: &mut Surface) -> Result<()> {
		// Steps 2-3: fetch manifest (retried per spec §4.7) and capture duration.
		let mut manifest = self.fetch_manifest(url).await?;
		let clock = Arc::new(PlaybackClock::new(0.0, manifest.get_duration()));
		clock.set_ready_state(ReadyState::HaveNothing);
		*self.clock.lock().unwrap() = Some(clock.clone());

		// Step 5-6: compute initial time, locate the first period.
		let start_time = Self::resolve_start_at(&self.config.start_at, &manifest);
		clock.seek(start_time);
		let Some(first_period) = manifest.get_period_for_time(start_time).cloned() else {
			return Err(Error::media(
				MediaErrorKind::MediaStartingTimeNotFound,
				format!("no period contains start time {start_time}"),
				true,
			));
		};

		// Step 4: pre-create every native sink before HAVE_METADATA, then
		// custom sinks for the remaining track types in the first period.
		for track in first_period.adaptations.keys().copied().filter(|t| t.is_native()) {
			surface.add_native_sink(track, self.factory.create_element(track))?;
		}
		surface.mark_metadata_reached();
		clock.set_ready_state(ReadyState::HaveMetadata);
		for track in first_period.adaptations.keys().copied().filter(|t| !t.is_native()) {
			surface.add_custom_sink(track, self.factory.create_element(track));
		}

		// Step 7-8: one Adaptation Buffer per track present in the first period.
		let pipelines: HashMap<TrackType, Arc<SegmentPipeline>> =
			first_period.adaptations.keys().map(|&track| (track, self.factory.create_pipeline(track))).collect();
		let abrs: HashMap<TrackType, Arc<AbrCoordinator>> = first_period
			.adaptations
			.keys()
			.map(|&track| (track, Arc::new(AbrCoordinator::new(self.config.abr_config(track)))))
			.collect();

		let mut active: HashMap<TrackType, AdaptationBuffer> = HashMap::new();
		for (track, sink) in first_period.adaptations.keys().map(|&t| (t, surface.sink_element(t).expect("sink just created"))) {
			if let Some(adaptation) = Self::pick_adaptation(&first_period, track) {
				active.insert(
					track,
					AdaptationBuffer::new(
						first_period.clone(),
						adaptation.clone(),
						sink,
						pipelines[&track].clone(),
						abrs[&track].clone(),
						url.clone(),
						self.config.buffer_config(),
					),
				);
			}
		}

		if self.config.auto_play {
			clock.set_paused(false);
		}

		let mut announced_periods = HashSet::new();
		announced_periods.insert(first_period.id.clone());

		self.drive(clock, &mut manifest, url, surface, &mut active, &pipelines, &abrs, &mut announced_periods).await
	}

	/// Step 9-10: the main tick loop. Steps every active buffer, reacts to
	/// `Filled`/`Finished` by spawning the next period's buffer or retiring
	/// the track, triggers a throttled live refresh, and terminates on
	/// end-of-play or a fatal buffer error.
	async fn drive(
		&self,
		clock: Arc<PlaybackClock>,
		manifest: &mut Manifest,
		url: &url::Url,
		surface: &mut Surface,
		active: &mut HashMap<TrackType, AdaptationBuffer>,
		pipelines: &HashMap<TrackType, Arc<SegmentPipeline>>,
		abrs: &HashMap<TrackType, Arc<AbrCoordinator>>,
		announced_periods: &mut HashSet<String>,
	) -> Result<()> {
		let cancel = CancellationToken::new();
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let ticker_clock = clock.clone();
		let ticker_cancel = cancel.clone();
		let ticker = tokio::spawn(async move {
			TimingSource::new(ticker_clock).run(ticker_cancel, |tick| {
				let _ = tx.send(tick);
			}).await;
		});

		let mut loaded_emitted = false;
		let mut stalled = false;
		let mut last_rate = clock_rate(&clock);
		let mut finished_tracks: HashSet<TrackType> = HashSet::new();
		let mut refresh_in_flight = false;
		let mut representation_seen: HashMap<TrackType, String> = HashMap::new();

		let outcome = 'outer: loop {
			let Some(tick) = rx.recv().await else {
				break 'outer Ok(());
			};

			if tick.duration - tick.current_time < self.config.end_of_play {
				break 'outer Ok(());
			}

			if (tick.playback_rate - last_rate).abs() > f64::EPSILON {
				self.events.publish(StreamEvent::Speed { rate: tick.playback_rate });
				last_rate = tick.playback_rate;
			}

			if self.protection_blocked() {
				continue;
			}

			let mut min_buffered_ahead = f64::MAX;
			let mut to_retire: Vec<(TrackType, f64)> = Vec::new();

			for (&track, buffer) in active.iter_mut() {
				match buffer.step(tick.current_time).await {
					Ok(BufferOutcome::SegmentsQueued) => {}
					Ok(BufferOutcome::Warning(err)) => self.events.publish(StreamEvent::warning(err)),
					Ok(BufferOutcome::Filled { wanted_range }) => {
						self.events.publish(StreamEvent::BufferFilled {
							track,
							range: wanted_range,
						});
					}
					Ok(BufferOutcome::Finished { wanted_range }) => {
						self.events.publish(StreamEvent::BufferFinished { track });
						to_retire.push((track, wanted_range.1));
					}
					Err(err) if !err.fatal() => self.events.publish(StreamEvent::warning(err)),
					Err(err) => break 'outer Err(err),
				}

				if let Some(representation_id) = buffer.active_representation() {
					if representation_seen.get(&track).map(String::as_str) != Some(representation_id) {
						let representation_id = representation_id.to_string();
						representation_seen.insert(track, representation_id.clone());
						self.events.publish(StreamEvent::RepresentationChange { track, representation_id });
					}
				}

				min_buffered_ahead = min_buffered_ahead.min(buffer.buffered_ahead(tick.current_time));
			}

			for (track, wanted_end) in to_retire {
				self.retire_or_advance(track, wanted_end, manifest, url, surface, active, pipelines, abrs, &mut finished_tracks, announced_periods);
			}

			if active.is_empty() && !finished_tracks.is_empty() {
				break 'outer Ok(());
			}

			clock.set_buffered_ahead(if min_buffered_ahead == f64::MAX { 0.0 } else { min_buffered_ahead });

			let is_stalled = min_buffered_ahead <= 0.0 && !tick.paused && min_buffered_ahead != f64::MAX;
			if is_stalled != stalled {
				stalled = is_stalled;
				if stalled {
					self.events.publish(StreamEvent::Stalled);
				}
			}

			if !loaded_emitted && !active.is_empty() && min_buffered_ahead > 0.0 {
				loaded_emitted = true;
				clock.set_ready_state(ReadyState::HaveEnoughData);
				self.events.publish(StreamEvent::Loaded);
			}

			if manifest.is_live && !refresh_in_flight && self.needs_live_refresh(manifest, tick.current_time) {
				refresh_in_flight = true;
				if let Ok(refreshed) = self.manifest_source.fetch(url).await {
					manifest.update(refreshed);
					self.events.publish(StreamEvent::ManifestUpdate);
				}
				refresh_in_flight = false;
			}
		};

		cancel.cancel();
		ticker.abort();
		outcome
	}

	/// Live-edge heuristic (spec §4.7): refresh once the clock is within
	/// one period-transition epsilon of the manifest's known end.
	fn needs_live_refresh(&self, manifest: &Manifest, current_time: f64) -> bool {
		current_time + PERIOD_TRANSITION_EPSILON >= manifest.get_duration()
	}

	#[allow(clippy::too_many_arguments)]
	fn retire_or_advance(
		&self,
		track: TrackType,
		wanted_end: f64,
		manifest: &Manifest,
		url: &url::Url,
		surface: &mut Surface,
		active: &mut HashMap<TrackType, AdaptationBuffer>,
		pipelines: &HashMap<TrackType, Arc<SegmentPipeline>>,
		abrs: &HashMap<TrackType, Arc<AbrCoordinator>>,
		finished_tracks: &mut HashSet<TrackType>,
		announced_periods: &mut HashSet<String>,
	) {
		let probe_time = wanted_end + PERIOD_TRANSITION_EPSILON;
		let current_period_id = active.get(&track).map(|b| b.period_id().to_string());
		let current_adaptation_id = active.get(&track).map(|b| b.adaptation_id().to_string());

		let next_period = manifest.get_period_for_time(probe_time).filter(|p| Some(p.id.as_str()) != current_period_id.as_deref());

		match next_period {
			Some(period) if Self::pick_adaptation(period, track).is_some() => {
				let adaptation = Self::pick_adaptation(period, track).unwrap().clone();
				info!(?track, period = %period.id, "spawning next period buffer");
				let sink = surface.sink_element(track).unwrap_or_else(|| self.factory.create_element(track));
				if surface.sink(track).is_none() {
					if track.is_native() {
						let _ = surface.add_native_sink(track, sink.clone());
					} else {
						surface.add_custom_sink(track, sink.clone());
					}
				}

				if announced_periods.insert(period.id.clone()) {
					self.events.publish(StreamEvent::ManifestChange);
				}
				if current_adaptation_id.as_deref() != Some(adaptation.id.as_str()) {
					self.events.publish(StreamEvent::AdaptationChange {
						track,
						adaptation_id: adaptation.id.clone(),
					});
				}

				active.insert(
					track,
					AdaptationBuffer::new(
						period.clone(),
						adaptation,
						sink,
						pipelines[&track].clone(),
						abrs[&track].clone(),
						url.clone(),
						self.config.buffer_config(),
					),
				);
			}
			_ => {
				info!(?track, "no further period for track, retiring");
				active.remove(&track);
				surface.remove_sink(track);
				finished_tracks.insert(track);
			}
		}
	}

	async fn fetch_manifest(&self, url: &url::Url) -> Result<Manifest> {
		let retry = RetryHarness::new(self.config.startup_retry());
		retry
			.run(
				|_attempt| self.manifest_source.fetch(url),
				Error::should_retry,
				|err, attempt| warn!(attempt, error = %err, "manifest fetch failed, retrying"),
				|err| err,
			)
			.await
	}

	fn pick_adaptation(period: &Period, track: TrackType) -> Option<&Adaptation> {
		period.adaptations_for(track).first()
	}

	/// Resolve `startAt` (spec §6) against the manifest. `WallClockTime` is
	/// treated as an absolute presentation-time position: this crate has no
	/// independent notion of real-world clock skew against the manifest's
	/// `availabilityStartTime` (that belongs to the manifest parser, out of
	/// scope per spec §1), so both variants compute the same way.
	fn resolve_start_at(start_at: &StartAt, manifest: &Manifest) -> f64 {
		let duration = manifest.get_duration();
		let first_start = manifest.periods().first().map(|p| p.start).unwrap_or(0.0);
		match *start_at {
			StartAt::Position(t) | StartAt::WallClockTime(t) => t,
			StartAt::FromFirstPosition(offset) => first_start + offset,
			StartAt::FromLastPosition(offset) => (duration - offset).max(first_start),
			StartAt::Percentage(pct) => first_start + duration * (pct / 100.0),
		}
	}
}

fn clock_rate(clock: &PlaybackClock) -> f64 {
	clock.snapshot().playback_rate
}
