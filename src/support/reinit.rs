use tokio::sync::broadcast;

/// Requests that the owning `Simulator` perform `re_initialize()` (close +
/// reopen the connection, re-send BootNotification and Heartbeat), without
/// tearing down the process the way `ShutdownSignal` does. Used by the
/// Reset/action-42 inbound handlers, which must survive their own request.
#[derive(Clone)]
pub struct ReinitSignal {
    sender: broadcast::Sender<()>,
}

impl ReinitSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(8);
        Self { sender }
    }

    /// Not idempotent: every call is a distinct request, unlike
    /// `ShutdownSignal::trigger`'s one-shot latch.
    pub fn request(&self) {
        let _ = self.sender.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Default for ReinitSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_observes_request() {
        let signal = ReinitSignal::new();
        let mut rx = signal.subscribe();
        signal.request();
        rx.recv().await.expect("request delivered");
    }

    #[tokio::test]
    async fn supports_repeated_requests() {
        let signal = ReinitSignal::new();
        let mut rx = signal.subscribe();
        signal.request();
        signal.request();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
    }
}
