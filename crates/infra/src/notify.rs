//! Hand-off of read-model change notifications to the pub/sub transport.

use std::sync::Arc;

use tracing::warn;

use projector_events::{MessageBus, ReadModelUpdatedMessage};

/// Sink for change notifications.
///
/// `send` is called synchronously after a durable write and must return
/// without waiting for subscribers. Failures are the sink's business: the
/// write already happened and is never rolled back because of a notification.
pub trait NotifyToSubscribers: Send + Sync {
    fn send(&self, message: ReadModelUpdatedMessage);
}

impl<N> NotifyToSubscribers for Arc<N>
where
    N: NotifyToSubscribers + ?Sized,
{
    fn send(&self, message: ReadModelUpdatedMessage) {
        (**self).send(message)
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyToNobody;

impl NotifyToSubscribers for NotifyToNobody {
    fn send(&self, _message: ReadModelUpdatedMessage) {}
}

/// Publishes notifications on a [`MessageBus`]; publish failures are logged.
#[derive(Debug, Clone)]
pub struct BusNotifier<B> {
    bus: B,
}

impl<B> BusNotifier<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> NotifyToSubscribers for BusNotifier<B>
where
    B: MessageBus<ReadModelUpdatedMessage>,
{
    fn send(&self, message: ReadModelUpdatedMessage) {
        let model_type = message.model_type.clone();
        let kind = message.kind;
        if let Err(err) = self.bus.publish(message) {
            warn!(model_type = %model_type, kind = ?kind, error = ?err, "read model notification dropped");
        }
    }
}
