//! C10: the Overlay/Text Sink (spec §4.9) -- a custom sink variant that
//! renders time-bounded elements (subtitle cues, thumbnail tiles, ...) into
//! a host-owned region, driven by the same clock as the native sinks
//! rather than by sink-internal buffering.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use streamkit_core::{Result, TimeRange};

/// One time-bounded renderable: a subtitle cue, a thumbnail tile, or
/// whatever the host's custom sink variant wants to show. Kept generic
/// over the element payload -- this crate doesn't know what a cue or tile
/// looks like, only when it should be on screen (spec §1 Out of scope:
/// text/overlay parsers and DOM integration).
#[derive(Debug, Clone)]
pub struct TimedElement<T> {
	pub range: TimeRange,
	pub element: T,
}

/// The host's rendering surface for one overlay/text sink. Attaching is
/// exclusive: at most one element is attached at a time (spec §4.9
/// switching semantics).
#[async_trait]
pub trait OverlayHost<T>: Send + Sync {
	async fn attach(&self, element: &T) -> Result<()>;
	async fn detach(&self) -> Result<()>;
}

/// Per-sink ledger of renderable elements plus the currently-attached one,
/// if any. A periodic tick (or a seek/seeked/ended event, per spec §4.9)
/// drives [`OverlaySink::on_tick`], which selects the element whose
/// `[start, end)` contains `current_time - epsilon` and attaches/detaches
/// as needed.
pub struct OverlaySink<T: Clone + PartialEq + Send + Sync> {
	host: std::sync::Arc<dyn OverlayHost<T>>,
	entries: Mutex<Vec<TimedElement<T>>>,
	attached: Mutex<Option<T>>,
	/// `MAXIMUM_OVERLAY_TRACK_UPDATE_INTERVAL` (spec §6), used only to
	/// derive `epsilon` -- this sink doesn't own its own polling loop, the
	/// clock driving `on_tick` does.
	update_interval: std::time::Duration,
}

impl<T: Clone + PartialEq + Send + Sync + std::fmt::Debug> OverlaySink<T> {
	pub fn new(host: std::sync::Arc<dyn OverlayHost<T>>, update_interval: std::time::Duration) -> Self {
		Self {
			host,
			entries: Mutex::new(Vec::new()),
			attached: Mutex::new(None),
			update_interval,
		}
	}

	/// Add a renderable for `range`. Entries aren't required to be
	/// non-overlapping (unlike the Bookkeeper's segment ledger) -- the host
	/// controls which elements are mutually exclusive by how it builds the
	/// ledger.
	pub fn insert(&self, range: TimeRange, element: T) {
		self.entries.lock().unwrap().push(TimedElement { range, element });
	}

	/// `epsilon = interval / 3000` (spec §4.9), spreading rounding error
	/// from the tick cadence across sub-intervals rather than landing
	/// exactly on a cue boundary.
	fn epsilon(&self) -> f64 {
		self.update_interval.as_secs_f64() / 3.0
	}

	/// Select the element whose range contains `current_time - epsilon`
	/// and attach/detach to match. Equal elements (by `PartialEq`) are a
	/// no-op; switching always detaches the previous element before
	/// attaching the new one.
	pub async fn on_tick(&self, current_time: f64) -> Result<()> {
		let probe = current_time - self.epsilon();
		let wanted = self.entries.lock().unwrap().iter().find(|e| e.range.contains(probe)).map(|e| e.element.clone());

		let mut attached = self.attached.lock().unwrap();
		if *attached == wanted {
			return Ok(());
		}

		if attached.is_some() {
			self.host.detach().await?;
		}
		if let Some(element) = &wanted {
			debug!(element = ?element, "overlay element attached");
			self.host.attach(element).await?;
		}
		*attached = wanted;
		Ok(())
	}

	/// Abort: remove whatever's currently attached (spec §4.9).
	pub async fn abort(&self) -> Result<()> {
		let mut attached = self.attached.lock().unwrap();
		if attached.take().is_some() {
			self.host.detach().await?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	#[derive(Default)]
	struct RecordingHost {
		attaches: AtomicU32,
		detaches: AtomicU32,
	}

	#[async_trait]
	impl OverlayHost<String> for RecordingHost {
		async fn attach(&self, _element: &String) -> Result<()> {
			self.attaches.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
		async fn detach(&self) -> Result<()> {
			self.detaches.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	fn sink(host: Arc<RecordingHost>) -> OverlaySink<String> {
		OverlaySink::new(host, std::time::Duration::from_millis(300))
	}

	#[tokio::test]
	async fn attaches_the_element_covering_current_time() {
		let host = Arc::new(RecordingHost::default());
		let sink = sink(host.clone());
		sink.insert(TimeRange::new(0.0, 2.0).unwrap(), "cue-a".to_string());
		sink.insert(TimeRange::new(2.0, 4.0).unwrap(), "cue-b".to_string());

		sink.on_tick(1.0).await.unwrap();
		assert_eq!(host.attaches.load(Ordering::SeqCst), 1);

		sink.on_tick(3.0).await.unwrap();
		assert_eq!(host.attaches.load(Ordering::SeqCst), 2);
		assert_eq!(host.detaches.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn equal_elements_are_a_no_op() {
		let host = Arc::new(RecordingHost::default());
		let sink = sink(host.clone());
		sink.insert(TimeRange::new(0.0, 10.0).unwrap(), "cue-a".to_string());

		sink.on_tick(1.0).await.unwrap();
		sink.on_tick(2.0).await.unwrap();

		assert_eq!(host.attaches.load(Ordering::SeqCst), 1);
		assert_eq!(host.detaches.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn no_element_covers_current_time_detaches() {
		let host = Arc::new(RecordingHost::default());
		let sink = sink(host.clone());
		sink.insert(TimeRange::new(0.0, 2.0).unwrap(), "cue-a".to_string());

		sink.on_tick(1.0).await.unwrap();
		sink.on_tick(5.0).await.unwrap();

		assert_eq!(host.attaches.load(Ordering::SeqCst), 1);
		assert_eq!(host.detaches.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn abort_detaches_current_element() {
		let host = Arc::new(RecordingHost::default());
		let sink = sink(host.clone());
		sink.insert(TimeRange::new(0.0, 2.0).unwrap(), "cue-a".to_string());
		sink.on_tick(1.0).await.unwrap();

		sink.abort().await.unwrap();
		assert_eq!(host.detaches.load(Ordering::SeqCst), 1);

		sink.abort().await.unwrap();
		assert_eq!(host.detaches.load(Ordering::SeqCst), 1);
	}
}
