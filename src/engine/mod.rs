use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::codec::CodecError;
use crate::domain::error::{ErrorEvent, ErrorKind};
use crate::domain::message::Message;
use crate::support::{ErrorBus, ShutdownSignal};
use crate::transport::{Transport, TransportError};

pub const DEFAULT_RESPONSE_TIMEOUT_SECONDS: u64 = 10;

/// What an outbound `request()` resolves to.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Response(Value),
    Error { code: String, description: String },
    /// The distinguished "TimeoutSentinel" value from SPEC_FULL.md §4.3.
    Timeout { seconds: u64 },
    ConnectionClosed,
}

impl RequestOutcome {
    pub fn success_payload(&self) -> Option<&Value> {
        match self {
            RequestOutcome::Response(value) => Some(value),
            _ => None,
        }
    }

    pub fn timeout_message(action: &str, seconds: u64) -> String {
        format!("Action {action} Response Failed: response timeout, {seconds} seconds passed")
    }
}

enum PendingOutcome {
    Response(Value),
    Error { code: String, description: String },
    ConnectionClosed,
}

struct PendingRequest {
    valid_alternate_ids: Vec<String>,
    completion: oneshot::Sender<PendingOutcome>,
}

/// Dialect-specific wire encode/decode plumbed behind one engine interface,
/// per SPEC_FULL.md §9 ("one engine interface + three codec/action
/// implementations dispatched by dialect").
pub trait EngineCodec: Send + Sync {
    fn encode_request(&self, id: &str, action: &str, payload: &Value) -> Result<String, CodecError>;
    fn encode_response(&self, id: &str, payload: &Value) -> Result<String, CodecError>;
    fn decode(&self, frame: &str) -> Result<Message, CodecError>;
}

/// Invoked for every server-initiated request. Returning `None` suppresses
/// the automatic response (used only by dialects that never receive
/// inbound requests).
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, id: &str, action: &str, payload: Value) -> Option<Value>;
}

/// Couples a `Transport` and an `EngineCodec`: maintains the pending-request
/// table, schedules timeouts, routes responses back to waiters, and
/// dispatches server-initiated requests to the registered `InboundHandler`.
pub struct ProtocolEngine {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn EngineCodec>,
    pending: DashMap<String, VecDeque<PendingRequest>>,
    response_timeout: Duration,
    inbound_handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    shutdown: ShutdownSignal,
    errors: ErrorBus,
}

impl ProtocolEngine {
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn EngineCodec>, response_timeout: Duration, errors: ErrorBus) -> Self {
        Self {
            transport,
            codec,
            pending: DashMap::new(),
            response_timeout,
            inbound_handler: Mutex::new(None),
            shutdown: ShutdownSignal::new(),
            errors,
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub async fn set_inbound_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.inbound_handler.lock().await = Some(handler);
    }

    pub fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Sends `action`/`payload` under the given wire id and suspends until a
    /// matching response, error, timeout, or connection close.
    pub async fn request(
        &self,
        id: String,
        action: &str,
        payload: Value,
        valid_alternate_ids: Vec<String>,
    ) -> RequestOutcome {
        let (tx, rx) = oneshot::channel();
        self.pending
            .entry(id.clone())
            .or_default()
            .push_back(PendingRequest {
                valid_alternate_ids,
                completion: tx,
            });

        let frame = match self.codec.encode_request(&id, action, &payload) {
            Ok(frame) => frame,
            Err(err) => {
                self.remove_pending(&id);
                warn!(%err, action, "failed to encode outbound request");
                return RequestOutcome::Error {
                    code: "EncodingError".into(),
                    description: err.to_string(),
                };
            }
        };

        if let Err(err) = self.transport.send_frame(&frame).await {
            self.remove_pending(&id);
            warn!(%err, action, "failed to send outbound request");
            return RequestOutcome::ConnectionClosed;
        }

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(PendingOutcome::Response(value))) => RequestOutcome::Response(value),
            Ok(Ok(PendingOutcome::Error { code, description })) => RequestOutcome::Error { code, description },
            Ok(Ok(PendingOutcome::ConnectionClosed)) => RequestOutcome::ConnectionClosed,
            Ok(Err(_)) => RequestOutcome::ConnectionClosed,
            Err(_) => {
                self.remove_pending(&id);
                let seconds = self.response_timeout.as_secs();
                warn!(action, seconds, "request timed out");
                RequestOutcome::Timeout { seconds }
            }
        }
    }

    /// Triggers shutdown of the reader loop and closes the underlying
    /// transport. Used by `re_initialize` before rebuilding a fresh engine.
    pub async fn close(&self) {
        self.shutdown.trigger();
        let _ = self.transport.close().await;
        self.fail_all_pending();
    }

    /// Emits the standalone `ConnectionError` event per SPEC_FULL.md §4.1's
    /// asymmetric-close requirement, then fails every pending waiter — this
    /// covers a drop with nothing in flight, which `fail_all_pending` alone
    /// would pass silently.
    fn report_connection_closed(&self, description: &str) {
        self.errors.publish(ErrorEvent::new(description.to_string(), ErrorKind::ConnectionError));
        self.fail_all_pending();
    }

    fn remove_pending(&self, id: &str) {
        if let Some(mut entry) = self.pending.get_mut(id) {
            entry.pop_front();
        }
    }

    /// Runs the reader loop until shutdown is triggered or the connection
    /// closes. On close, all pending waiters are failed.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    debug!("engine reader shutting down");
                    break;
                }
                frame = self.transport.receive_frame() => {
                    match frame {
                        Ok(text) => self.handle_frame(&text).await,
                        Err(TransportError::Closed) => {
                            self.report_connection_closed("peer closed the connection");
                            break;
                        }
                        Err(err) => {
                            warn!(%err, "transport read error");
                            self.report_connection_closed(&err.to_string());
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                return;
            }
        };

        match message {
            Message::Req { id, action, payload } => self.handle_inbound_request(id, action, payload).await,
            Message::Resp { id, payload } => {
                if !self.resolve(&id, PendingOutcome::Response(payload)) {
                    warn!(id, "received response with no matching pending request");
                }
            }
            Message::Err {
                id,
                code,
                description,
                ..
            } => {
                if !self.resolve(&id, PendingOutcome::Error { code, description }) {
                    warn!(id, "received error with no matching pending request");
                }
            }
            Message::Ambiguous { id, payload } => {
                if !self.resolve(&id, PendingOutcome::Response(payload.clone())) {
                    // No pending request matches: the original id doubles as
                    // the inbound action tag (Ensto numeric message type).
                    self.handle_inbound_request(id.clone(), id, payload).await;
                }
            }
        }
    }

    async fn handle_inbound_request(&self, id: String, action: String, payload: Value) {
        let handler = self.inbound_handler.lock().await.clone();
        let Some(handler) = handler else {
            warn!(action, "no inbound handler registered, dropping server request");
            return;
        };
        if let Some(response) = handler.handle(&id, &action, payload).await {
            match self.codec.encode_response(&id, &response) {
                Ok(frame) => {
                    if let Err(err) = self.transport.send_frame(&frame).await {
                        warn!(%err, action, "failed to send response to server request");
                    }
                }
                Err(err) => warn!(%err, action, "failed to encode response"),
            }
        }
    }

    /// Resolves the given id against the exact-match queue first, then
    /// falls back to scanning every entry's `valid_alternate_ids` (Ensto
    /// only; OCPP-J ids never collide so this is a no-op there). Returns
    /// whether a waiter was actually found and resolved.
    fn resolve(&self, id: &str, outcome: PendingOutcome) -> bool {
        if let Some(mut entry) = self.pending.get_mut(id) {
            if let Some(pending) = entry.pop_front() {
                let _ = pending.completion.send(outcome);
                return true;
            }
        }

        for mut entry in self.pending.iter_mut() {
            if let Some(pos) = entry
                .iter()
                .position(|p| p.valid_alternate_ids.iter().any(|alt| alt == id))
            {
                let pending = entry.remove(pos).expect("position just found");
                let _ = pending.completion.send(outcome);
                return true;
            }
        }

        false
    }

    /// Fails every pending waiter with `ConnectionClosed` rather than
    /// `Error`, so the device layer reports `ErrorKind::ConnectionError`
    /// instead of `InvalidResponse` on a mid-session drop.
    fn fail_all_pending(&self) {
        for mut entry in self.pending.iter_mut() {
            while let Some(pending) = entry.pop_front() {
                let _ = pending.completion.send(PendingOutcome::ConnectionClosed);
            }
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ocpp_j;
    use crate::transport::channel::ChannelTransport;
    use serde_json::json;

    struct OcppJEngineCodec;
    impl EngineCodec for OcppJEngineCodec {
        fn encode_request(&self, id: &str, action: &str, payload: &Value) -> Result<String, CodecError> {
            ocpp_j::encode(&Message::Req {
                id: id.to_string(),
                action: action.to_string(),
                payload: payload.clone(),
            })
        }
        fn encode_response(&self, id: &str, payload: &Value) -> Result<String, CodecError> {
            ocpp_j::encode(&Message::Resp {
                id: id.to_string(),
                payload: payload.clone(),
            })
        }
        fn decode(&self, frame: &str) -> Result<Message, CodecError> {
            ocpp_j::decode(frame)
        }
    }

    #[tokio::test]
    async fn correlates_response_by_id() {
        let (transport, mut peer) = ChannelTransport::pair();
        let engine = Arc::new(ProtocolEngine::new(
            Arc::new(transport),
            Arc::new(OcppJEngineCodec),
            Duration::from_secs(5),
            ErrorBus::new(),
        ));

        let engine_run = engine.clone();
        let reader = tokio::spawn(async move { engine_run.run().await });

        let id = engine.generate_id();
        let request_id = id.clone();
        let engine_req = engine.clone();
        let requester = tokio::spawn(async move {
            engine_req
                .request(request_id, "Heartbeat", json!({}), vec![])
                .await
        });

        let sent = peer.from_device.recv().await.unwrap();
        let decoded = ocpp_j::decode(&sent).unwrap();
        assert_eq!(decoded.id(), id);

        peer.to_device
            .send(serde_json::to_string(&json!([3, id, {"currentTime": "now"}])).unwrap())
            .unwrap();

        let outcome = requester.await.unwrap();
        match outcome {
            RequestOutcome::Response(payload) => assert_eq!(payload["currentTime"], "now"),
            other => panic!("unexpected outcome: {other:?}"),
        }

        engine.shutdown_signal().trigger();
        let _ = reader.await;
    }

    #[tokio::test]
    async fn times_out_when_no_response_arrives() {
        let (transport, _peer) = ChannelTransport::pair();
        let engine = Arc::new(ProtocolEngine::new(
            Arc::new(transport),
            Arc::new(OcppJEngineCodec),
            Duration::from_millis(20),
            ErrorBus::new(),
        ));
        let id = engine.generate_id();
        let outcome = engine.request(id, "Heartbeat", json!({}), vec![]).await;
        assert!(matches!(outcome, RequestOutcome::Timeout { .. }));
    }

    #[tokio::test]
    async fn fifo_resolves_alternate_ids() {
        let (transport, mut peer) = ChannelTransport::pair();
        let engine = Arc::new(ProtocolEngine::new(
            Arc::new(transport),
            Arc::new(OcppJEngineCodec),
            Duration::from_secs(5),
            ErrorBus::new(),
        ));

        let engine_run = engine.clone();
        let reader = tokio::spawn(async move { engine_run.run().await });

        let engine_req = engine.clone();
        let requester = tokio::spawn(async move {
            engine_req
                .request("24".to_string(), "Heartbeat", json!({}), vec!["alt-24".to_string()])
                .await
        });

        let _ = peer.from_device.recv().await.unwrap();
        peer.to_device
            .send(serde_json::to_string(&json!([3, "alt-24", {"ok": true}])).unwrap())
            .unwrap();

        let outcome = requester.await.unwrap();
        assert!(matches!(outcome, RequestOutcome::Response(_)));

        engine.shutdown_signal().trigger();
        let _ = reader.await;
    }
}
