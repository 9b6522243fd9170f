use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::error::ErrorEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Per-`Simulator` publish/subscribe channel for [`ErrorEvent`]s. Each
/// `Simulator` instance owns its own bus rather than sharing a global one.
#[derive(Clone)]
pub struct ErrorBus {
    sender: broadcast::Sender<ErrorEvent>,
    subscriber_count: Arc<AtomicUsize>,
}

impl ErrorBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, event: ErrorEvent) {
        match self.sender.send(event) {
            Ok(n) => debug!(subscribers = n, "error event published"),
            Err(_) => debug!("error event published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> ErrorSubscriber {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        ErrorSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for ErrorBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ErrorSubscriber {
    receiver: broadcast::Receiver<ErrorEvent>,
}

impl ErrorSubscriber {
    pub async fn recv(&mut self) -> Option<ErrorEvent> {
        self.receiver.recv().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    #[tokio::test]
    async fn fans_out_to_multiple_subscribers() {
        let bus = ErrorBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(ErrorEvent {
            description: "boom".into(),
            kind: ErrorKind::UnknownException,
        });

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert_eq!(got_a.description, "boom");
        assert_eq!(got_b.kind, ErrorKind::UnknownException);
    }
}
