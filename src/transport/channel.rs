use tokio::sync::mpsc;
use tokio::sync::Mutex;

use super::{Transport, TransportError};

/// In-memory transport backed by two mpsc channels, used to drive
/// `ProtocolEngine` in tests without opening real sockets. `peer()` returns
/// the other end so a test can play the role of the central system.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

pub struct ChannelPeer {
    pub to_device: mpsc::UnboundedSender<String>,
    pub from_device: mpsc::UnboundedReceiver<String>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, ChannelPeer) {
        let (to_device_tx, to_device_rx) = mpsc::unbounded_channel();
        let (from_device_tx, from_device_rx) = mpsc::unbounded_channel();
        let transport = Self {
            outbound: from_device_tx,
            inbound: Mutex::new(to_device_rx),
        };
        let peer = ChannelPeer {
            to_device: to_device_tx,
            from_device: from_device_rx,
        };
        (transport, peer)
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send_frame(&self, frame: &str) -> Result<(), TransportError> {
        self.outbound
            .send(frame.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn receive_frame(&self) -> Result<String, TransportError> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
