use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound WebSocket client transport for OCPP-J. Dials out to the central
/// system (unlike a server that accepts connections), negotiating the
/// dialect's sub-protocol list.
pub struct WebSocketTransport {
    write: Mutex<futures_util::stream::SplitSink<WsStream, WsMessage>>,
    read: Mutex<futures_util::stream::SplitStream<WsStream>>,
}

impl WebSocketTransport {
    pub async fn connect(server_address: &str, device_id: &str, subprotocols: &[&str]) -> Result<Self, TransportError> {
        let encoded_id: String = url::form_urlencoded::byte_serialize(device_id.as_bytes()).collect();
        let url = format!("{}/{}", server_address.trim_end_matches('/'), encoded_id);

        let mut request = url
            .into_client_request()
            .map_err(tokio_tungstenite::tungstenite::Error::from)?;
        if let Some(first) = subprotocols.first() {
            let joined = subprotocols.join(", ");
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_str(&joined).unwrap_or_else(|_| HeaderValue::from_static("")),
            );
            debug!(protocol = first, "negotiating OCPP-J subprotocol");
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws.split();
        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn send_frame(&self, frame: &str) -> Result<(), TransportError> {
        let mut write = self.write.lock().await;
        write.send(WsMessage::Text(frame.to_string())).await?;
        Ok(())
    }

    async fn receive_frame(&self) -> Result<String, TransportError> {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text),
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(frame))) => {
                    warn!(?frame, "peer closed websocket");
                    return Err(TransportError::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(TransportError::WebSocket(err)),
                None => return Err(TransportError::Closed),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut write = self.write.lock().await;
        write.close().await?;
        Ok(())
    }
}
