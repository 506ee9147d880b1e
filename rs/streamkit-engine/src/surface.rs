//! C2: the Presentation Surface (spec §4.1) -- wraps the media element +
//! media-source lifecycle and owns every sink created for a session.

use std::collections::HashMap;
use std::sync::Arc;

use streamkit_core::model::manifest::TrackType;
use streamkit_core::transport::PresentationElement;
use streamkit_core::{Error, Result};
use streamkit_core::error::MediaErrorKind;

/// A sink is either backed by the host's native source-buffer extension
/// (audio/video) or lives entirely in-process (text/image). Both variants
/// carry an appendable [`PresentationElement`] handle -- the Adaptation
/// Buffer (C6) only ever appends bytes and tracks buffered ranges, so it
/// doesn't need to know which kind of sink it's feeding; the distinction
/// only matters for the Surface's own pre-`HAVE_METADATA` gating.
pub enum Sink {
	Native(Arc<dyn PresentationElement>),
	Custom(Arc<dyn PresentationElement>),
}

impl Sink {
	pub fn element(&self) -> &Arc<dyn PresentationElement> {
		match self {
			Self::Native(element) | Self::Custom(element) => element,
		}
	}
}

/// Tracks which readyState-gating a native sink is still subject to.
/// Invariant (spec §4.1): native sinks may only be added while the source
/// extension is open and before playback has reached `HAVE_METADATA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
	Open,
	MetadataReached,
}

/// Owns every sink for one playback session. Exclusively responsible for
/// sink lifetime -- buffers only ever borrow a handle.
pub struct Surface {
	url: url::Url,
	with_media_source: bool,
	state: SourceState,
	sinks: HashMap<TrackType, Sink>,
}

impl Surface {
	/// `open(url, needsMediaSource)`. Resets any prior state: the caller is
	/// expected to have already torn down a previous `Surface` (the
	/// orchestrator owns at most one at a time).
	pub fn open(url: url::Url, with_media_source: bool) -> Self {
		Self {
			url,
			with_media_source,
			state: SourceState::Open,
			sinks: HashMap::new(),
		}
	}

	pub fn attached_url(&self) -> &url::Url {
		&self.url
	}

	/// Record that the element reached `HAVE_METADATA`; native sinks can no
	/// longer be added afterward.
	pub fn mark_metadata_reached(&mut self) {
		self.state = SourceState::MetadataReached;
	}

	pub fn add_native_sink(&mut self, kind: TrackType, element: Arc<dyn PresentationElement>) -> Result<()> {
		if !self.with_media_source {
			return Err(Error::media(
				MediaErrorKind::SourceBufferError,
				"native sink requested without a media source extension",
				true,
			));
		}
		if self.state != SourceState::Open {
			return Err(Error::media(
				MediaErrorKind::SourceBufferError,
				"native sinks cannot be added after HAVE_METADATA",
				true,
			));
		}
		self.sinks.insert(kind, Sink::Native(element));
		Ok(())
	}

	pub fn add_custom_sink(&mut self, kind: TrackType, element: Arc<dyn PresentationElement>) {
		self.sinks.insert(kind, Sink::Custom(element));
	}

	pub fn sink(&self, kind: TrackType) -> Option<&Sink> {
		self.sinks.get(&kind)
	}

	pub fn sink_element(&self, kind: TrackType) -> Option<Arc<dyn PresentationElement>> {
		self.sinks.get(&kind).map(|sink| sink.element().clone())
	}

	pub fn remove_sink(&mut self, kind: TrackType) {
		self.sinks.remove(&kind);
	}

	pub fn native_sink_types(&self) -> impl Iterator<Item = TrackType> + '_ {
		self.sinks
			.iter()
			.filter(|(_, sink)| matches!(sink, Sink::Native(_)))
			.map(|(kind, _)| *kind)
	}

	/// Guaranteed teardown on every exit path (spec §4.1): all sinks
	/// dropped, element `src` conceptually cleared (the caller's
	/// `PresentationElement` impl owns the actual DOM/element operation, so
	/// here we only need to drop our handles to release them).
	pub async fn teardown(&mut self) {
		for (_, sink) in self.sinks.drain() {
			let _ = sink.element().end_of_stream().await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock::MockPresentationElement;

	fn url() -> url::Url {
		url::Url::parse("https://example.com/manifest.mpd").unwrap()
	}

	#[test]
	fn native_sink_rejected_without_media_source() {
		let mut surface = Surface::open(url(), false);
		let result = surface.add_native_sink(TrackType::Video, Arc::new(MockPresentationElement::new()));
		assert!(result.is_err());
	}

	#[test]
	fn native_sink_rejected_after_metadata_reached() {
		let mut surface = Surface::open(url(), true);
		surface.mark_metadata_reached();
		let result = surface.add_native_sink(TrackType::Video, Arc::new(MockPresentationElement::new()));
		assert!(result.is_err());
	}

	#[test]
	fn native_sink_types_excludes_custom_sinks() {
		let mut surface = Surface::open(url(), true);
		surface.add_native_sink(TrackType::Video, Arc::new(MockPresentationElement::new())).unwrap();
		surface.add_custom_sink(TrackType::Text, Arc::new(MockPresentationElement::new()));

		let natives: Vec<_> = surface.native_sink_types().collect();
		assert_eq!(natives, vec![TrackType::Video]);
	}

	#[tokio::test]
	async fn teardown_drops_every_sink_and_ends_its_stream() {
		let mut surface = Surface::open(url(), true);
		surface.add_native_sink(TrackType::Audio, Arc::new(MockPresentationElement::new())).unwrap();
		surface.add_custom_sink(TrackType::Text, Arc::new(MockPresentationElement::new()));

		surface.teardown().await;

		assert!(surface.sink(TrackType::Audio).is_none());
		assert!(surface.sink(TrackType::Text).is_none());
	}
}
