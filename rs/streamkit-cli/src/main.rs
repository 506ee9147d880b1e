//! Demo binary: drives the Stream Orchestrator against a synthetic manifest
//! served by the in-memory mock transport, mirroring `hang-cli`'s role
//! against `hang`.

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use streamkit_core::model::manifest::{Adaptation, Manifest, Period, TrackType};
use streamkit_core::model::StreamEvent;
use streamkit_core::transport::PresentationElement;
use streamkit_engine::mock::{mock_representation, MockLoader, MockManifestSource, MockPresentationElement, MockSegmentParser};
use streamkit_engine::pipeline::SegmentPipeline;
use streamkit_orchestrator::{Config, Orchestrator, SessionFactory};

/// Plays a synthetic VOD asset through the orchestrator and prints every
/// [`StreamEvent`] as it arrives, so the full startup/buffering/teardown
/// sequence can be observed without a real manifest or server.
#[derive(Parser, Clone)]
struct Cli {
	#[command(flatten)]
	config: Config,

	/// Number of periods in the synthetic manifest.
	#[arg(long, default_value_t = 2)]
	periods: u32,

	/// Seconds per synthetic period.
	#[arg(long, default_value_t = 12.0)]
	period_duration: f64,

	/// Segment duration (seconds) in the synthetic manifest.
	#[arg(long, default_value_t = 2.0)]
	segment_duration: f64,
}

struct DemoFactory;

impl SessionFactory for DemoFactory {
	fn create_element(&self, _track: TrackType) -> Arc<dyn PresentationElement> {
		Arc::new(MockPresentationElement::new())
	}

	fn create_pipeline(&self, _track: TrackType) -> Arc<SegmentPipeline> {
		Arc::new(SegmentPipeline::new(Arc::new(MockLoader::new()), Arc::new(MockSegmentParser)))
	}
}

fn synthetic_manifest(url: url::Url, periods: u32, period_duration: f64, segment_duration: f64) -> Manifest {
	let built_periods = (0..periods)
		.map(|n| {
			let mut adaptations = BTreeMap::new();
			adaptations.insert(
				TrackType::Video,
				vec![Adaptation::new(
					format!("video-p{n}"),
					TrackType::Video,
					vec![
						mock_representation(format!("v{n}-lo"), 500_000, Some(640), segment_duration, Some(period_duration)),
						mock_representation(format!("v{n}-hi"), 3_000_000, Some(1920), segment_duration, Some(period_duration)),
					],
				)
				.expect("at least one representation")],
			);
			adaptations.insert(
				TrackType::Audio,
				vec![Adaptation::new(
					format!("audio-p{n}"),
					TrackType::Audio,
					vec![mock_representation(format!("a{n}-lo"), 96_000, None, segment_duration, Some(period_duration))],
				)
				.expect("at least one representation")],
			);

			Period {
				id: format!("p{n}"),
				start: n as f64 * period_duration,
				duration: Some(period_duration),
				adaptations,
			}
		})
		.collect();

	Manifest::new(url, false, built_periods, Some(period_duration * periods as f64))
}

fn log_event(event: &StreamEvent) {
	match event {
		StreamEvent::Loaded => info!("loaded"),
		StreamEvent::Stalled => info!("stalled"),
		StreamEvent::Speed { rate } => info!(rate, "speed changed"),
		StreamEvent::BufferFilled { track, range } => info!(?track, start = range.0, end = range.1, "buffer filled"),
		StreamEvent::BufferFinished { track } => info!(?track, "buffer finished"),
		StreamEvent::Warning { error } => info!(error = %error, "warning"),
		StreamEvent::Fatal { error } => info!(error = %error, "fatal"),
		StreamEvent::ManifestChange => info!("manifest change"),
		StreamEvent::ManifestUpdate => info!("manifest refreshed"),
		StreamEvent::AdaptationChange { track, adaptation_id } => info!(?track, adaptation_id, "adaptation changed"),
		StreamEvent::RepresentationChange { track, representation_id } => info!(?track, representation_id, "representation changed"),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

	let cli = Cli::parse();
	let url = url::Url::parse("memory://demo/manifest")?;
	let manifest = synthetic_manifest(url.clone(), cli.periods, cli.period_duration, cli.segment_duration);
	let manifest_source = Arc::new(MockManifestSource::new(manifest));

	let mut config = cli.config;
	config.auto_play = true;

	let orchestrator = Arc::new(Orchestrator::new(config, manifest_source, Arc::new(DemoFactory), None));
	let events = orchestrator.subscribe();

	let printer = {
		let orchestrator = orchestrator.clone();
		tokio::spawn(async move {
			while let Some(event) = events.recv().await {
				log_event(&event);
				if matches!(event, StreamEvent::Fatal { .. }) {
					break;
				}
			}
			drop(orchestrator);
		})
	};

	orchestrator.run(url).await?;
	printer.await.ok();
	Ok(())
}
