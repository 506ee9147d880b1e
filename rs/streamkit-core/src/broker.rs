//! The cyclic observable graph (orchestrator <-> buffers <-> ABR <-> pipeline
//! metrics) is expressed, per spec §9, as a DAG of typed stream sources plus
//! a broker that any component can publish into and any component can
//! subscribe from -- the same role `async_channel` plays throughout the
//! teacher workspace (`moq-lite`'s producer/consumer pairs), generalized
//! here to fan-out instead of a single consumer.

use std::sync::Mutex;

/// A fan-out publish/subscribe hub. Cloning a `Broker` shares the same set
/// of subscribers; dropping every `Subscription` for a given `subscribe()`
/// call is the unit of unsubscription (cancellation == drop, as spec §5
/// requires).
pub struct Broker<T: Clone + Send + 'static> {
	subscribers: Mutex<Vec<async_channel::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Default for Broker<T> {
	fn default() -> Self {
		Self {
			subscribers: Mutex::new(Vec::new()),
		}
	}
}

impl<T: Clone + Send + 'static> Broker<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Subscribe to future publications. Past events are not replayed.
	pub fn subscribe(&self) -> Subscription<T> {
		let (tx, rx) = async_channel::unbounded();
		self.subscribers.lock().unwrap().push(tx);
		Subscription { rx }
	}

	/// Publish to every live subscriber, dropping any whose receiver has
	/// gone away.
	pub fn publish(&self, value: T) {
		let mut subscribers = self.subscribers.lock().unwrap();
		subscribers.retain(|tx| tx.try_send(value.clone()).is_ok());
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers.lock().unwrap().len()
	}
}

/// A cancellable handle to future publications on a [`Broker`].
pub struct Subscription<T> {
	rx: async_channel::Receiver<T>,
}

impl<T> Subscription<T> {
	pub async fn recv(&self) -> Option<T> {
		self.rx.recv().await.ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn fan_out_to_multiple_subscribers() {
		let broker = Broker::<u32>::new();
		let a = broker.subscribe();
		let b = broker.subscribe();

		broker.publish(7);

		assert_eq!(a.recv().await, Some(7));
		assert_eq!(b.recv().await, Some(7));
	}

	#[tokio::test]
	async fn dropped_subscription_is_pruned_on_next_publish() {
		let broker = Broker::<u32>::new();
		let sub = broker.subscribe();
		assert_eq!(broker.subscriber_count(), 1);

		drop(sub);
		broker.publish(1);
		broker.publish(2);

		assert_eq!(broker.subscriber_count(), 0);
	}
}
