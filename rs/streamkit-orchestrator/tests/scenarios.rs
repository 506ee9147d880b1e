//! End-to-end scenario tests driving the full Stream Orchestrator against
//! the in-memory mock transport (no real network or media parsing).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use streamkit_core::model::manifest::{Adaptation, Manifest, Period, TrackType};
use streamkit_core::model::StreamEvent;
use streamkit_core::transport::PresentationElement;
use streamkit_engine::mock::{mock_representation, MockLoader, MockManifestSource, MockPresentationElement, MockSegmentParser};
use streamkit_engine::pipeline::SegmentPipeline;
use streamkit_orchestrator::{Config, Orchestrator, SessionFactory};

struct MockFactory;

impl SessionFactory for MockFactory {
	fn create_element(&self, _track: TrackType) -> Arc<dyn PresentationElement> {
		Arc::new(MockPresentationElement::new())
	}

	fn create_pipeline(&self, _track: TrackType) -> Arc<SegmentPipeline> {
		Arc::new(SegmentPipeline::new(Arc::new(MockLoader::new()), Arc::new(MockSegmentParser)))
	}
}

fn manifest_url() -> url::Url {
	url::Url::parse("https://example.com/manifest.mpd").unwrap()
}

fn single_period_manifest(period_duration: f64) -> Manifest {
	let mut adaptations = BTreeMap::new();
	adaptations.insert(
		TrackType::Video,
		vec![Adaptation::new("video-a0", TrackType::Video, vec![mock_representation("v-lo", 500_000, Some(640), 1.0, Some(period_duration))]).unwrap()],
	);
	adaptations.insert(
		TrackType::Audio,
		vec![Adaptation::new("audio-a0", TrackType::Audio, vec![mock_representation("a-lo", 96_000, None, 1.0, Some(period_duration))]).unwrap()],
	);

	Manifest::new(
		manifest_url(),
		false,
		vec![Period {
			id: "p0".to_string(),
			start: 0.0,
			duration: Some(period_duration),
			adaptations,
		}],
		Some(period_duration),
	)
}

fn two_period_manifest(period_duration: f64) -> Manifest {
	let mut first = BTreeMap::new();
	first.insert(
		TrackType::Video,
		vec![Adaptation::new("video-a0", TrackType::Video, vec![mock_representation("v-lo", 500_000, Some(640), 1.0, Some(period_duration))]).unwrap()],
	);
	let mut second = BTreeMap::new();
	second.insert(
		TrackType::Video,
		vec![Adaptation::new("video-a1", TrackType::Video, vec![mock_representation("v2-lo", 500_000, Some(640), 1.0, Some(period_duration))]).unwrap()],
	);

	Manifest::new(
		manifest_url(),
		false,
		vec![
			Period {
				id: "p0".to_string(),
				start: 0.0,
				duration: Some(period_duration),
				adaptations: first,
			},
			Period {
				id: "p1".to_string(),
				start: period_duration,
				duration: Some(period_duration),
				adaptations: second,
			},
		],
		Some(period_duration * 2.0),
	)
}

fn fast_config() -> Config {
	Config {
		auto_play: true,
		wanted_buffer_ahead: 3.0,
		max_buffer_ahead: 10.0,
		max_buffer_behind: 10.0,
		end_of_play: 0.5,
		startup_total_retry: 1,
		startup_retry_delay_ms: 1,
		..Default::default()
	}
}

/// S1: a VOD asset with a single period/representation plays from start to
/// end, emits `Loaded` once, and terminates cleanly at end-of-play.
#[tokio::test(start_paused = true)]
async fn vod_single_period_plays_to_completion() {
	let manifest_source = Arc::new(MockManifestSource::new(single_period_manifest(6.0)));
	let orchestrator = Orchestrator::new(fast_config(), manifest_source, Arc::new(MockFactory), None);
	let events = orchestrator.subscribe();

	let run = tokio::time::timeout(Duration::from_secs(30), orchestrator.run(manifest_url()));
	let result = run.await.expect("session should finish within the timeout");
	assert!(result.is_ok(), "session ended with an error: {result:?}");

	let mut saw_loaded = false;
	let mut saw_fatal = false;
	while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(1), events.recv()).await {
		match event {
			StreamEvent::Loaded => saw_loaded = true,
			StreamEvent::Fatal { .. } => saw_fatal = true,
			_ => {}
		}
	}
	assert!(saw_loaded, "expected a Loaded event once buffering caught up");
	assert!(!saw_fatal, "VOD playback should not end in a fatal error");
}

/// S6: when the clock lands within `endOfPlay` of the manifest's duration
/// the orchestrator terminates instead of stalling forever.
#[tokio::test(start_paused = true)]
async fn session_terminates_at_end_of_play() {
	let manifest_source = Arc::new(MockManifestSource::new(single_period_manifest(2.0)));
	let mut config = fast_config();
	config.end_of_play = 1.0;
	let orchestrator = Orchestrator::new(config, manifest_source, Arc::new(MockFactory), None);

	let result = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(manifest_url()))
		.await
		.expect("session should finish within the timeout");
	assert!(result.is_ok());
}

/// A two-period manifest: the orchestrator must spawn a fresh buffer for
/// the second period once the first is exhausted, without the host seeing
/// more than one `Fatal` event (there should be none).
#[tokio::test(start_paused = true)]
async fn period_boundary_is_crossed_without_error() {
	let manifest_source = Arc::new(MockManifestSource::new(two_period_manifest(3.0)));
	let orchestrator = Orchestrator::new(fast_config(), manifest_source, Arc::new(MockFactory), None);
	let events = orchestrator.subscribe();

	let result = tokio::time::timeout(Duration::from_secs(30), orchestrator.run(manifest_url()))
		.await
		.expect("session should finish within the timeout");
	assert!(result.is_ok(), "session ended with an error: {result:?}");

	let mut saw_finished = false;
	while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(1), events.recv()).await {
		if matches!(event, StreamEvent::Fatal { .. }) {
			panic!("unexpected fatal event during period transition");
		}
		if matches!(event, StreamEvent::BufferFinished { .. }) {
			saw_finished = true;
		}
	}
	assert!(saw_finished, "expected the first period's video buffer to finish before the second takes over");
}

/// S2: with two video representations and a manual override pinned to the
/// lower one, the orchestrator's event stream carries exactly one
/// `RepresentationChange` naming that representation -- never the higher one.
#[tokio::test(start_paused = true)]
async fn representation_change_event_fires_once_for_the_selected_rendition() {
	let mut adaptations = BTreeMap::new();
	adaptations.insert(
		TrackType::Video,
		vec![Adaptation::new(
			"video-a0",
			TrackType::Video,
			vec![
				mock_representation("v-lo", 500_000, Some(640), 1.0, Some(4.0)),
				mock_representation("v-hi", 3_000_000, Some(1920), 1.0, Some(4.0)),
			],
		)
		.unwrap()],
	);
	let manifest = Manifest::new(
		manifest_url(),
		false,
		vec![Period {
			id: "p0".to_string(),
			start: 0.0,
			duration: Some(4.0),
			adaptations,
		}],
		Some(4.0),
	);
	let manifest_source = Arc::new(MockManifestSource::new(manifest));

	let mut config = fast_config();
	config.bitrates.insert(
		TrackType::Video,
		streamkit_orchestrator::config::TrackBitrateConfig {
			manual_bitrate: Some(500_000),
			..Default::default()
		},
	);

	let orchestrator = Orchestrator::new(config, manifest_source, Arc::new(MockFactory), None);
	let events = orchestrator.subscribe();

	let result = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(manifest_url()))
		.await
		.expect("session should finish within the timeout");
	assert!(result.is_ok(), "session ended with an error: {result:?}");

	let mut changes = Vec::new();
	while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(1), events.recv()).await {
		if let StreamEvent::RepresentationChange { representation_id, .. } = event {
			changes.push(representation_id);
		}
	}
	assert_eq!(changes, vec!["v-lo".to_string()], "expected exactly one RepresentationChange, naming the low rendition");
}

/// A `manual_bitrate` outside the adaptation's range still resolves to a
/// representation (closest-below fallback) rather than stalling startup.
#[tokio::test(start_paused = true)]
async fn manual_bitrate_override_does_not_block_startup() {
	let manifest_source = Arc::new(MockManifestSource::new(single_period_manifest(2.0)));
	let mut config = fast_config();
	config.bitrates.insert(
		TrackType::Video,
		streamkit_orchestrator::config::TrackBitrateConfig {
			manual_bitrate: Some(10_000_000),
			..Default::default()
		},
	);
	let orchestrator = Orchestrator::new(config, manifest_source, Arc::new(MockFactory), None);

	let result = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(manifest_url()))
		.await
		.expect("session should finish within the timeout");
	assert!(result.is_ok());
}
