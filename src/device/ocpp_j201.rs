use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::domain::error::{ErrorEvent, ErrorKind};
use crate::domain::identity::DeviceIdentity;
use crate::domain::session::ChargeSession;
use crate::engine::{ProtocolEngine, RequestOutcome};
use crate::flow::{self, OngoingMode};
use crate::support::ErrorBus;

use super::{ChargeOptions, Device};

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// OCPP 2.0.1 action set. `StartTransaction`/`StopTransaction` are folded
/// into `TransactionEvent` with `eventType` Started/Updated/Ended, per
/// SPEC_FULL.md §4.4; `transactionId` is assigned client-side since the
/// 2.0.1 wire protocol does not return one.
pub struct OcppJ201Device {
    identity: DeviceIdentity,
    engine: Arc<ProtocolEngine>,
    session: Mutex<ChargeSession>,
    errors: ErrorBus,
    stop_requested: AtomicBool,
}

impl OcppJ201Device {
    pub fn new(identity: DeviceIdentity, engine: Arc<ProtocolEngine>, errors: ErrorBus) -> Self {
        Self {
            identity,
            engine,
            session: Mutex::new(ChargeSession::default()),
            errors,
            stop_requested: AtomicBool::new(false),
        }
    }

    async fn report(&self, description: impl Into<String>, kind: ErrorKind) {
        let event = ErrorEvent::new(description, kind);
        error!(%event, "action failed");
        self.errors.publish(event);
    }

    async fn call(&self, action: &str, payload: Value) -> Option<Value> {
        let id = self.engine.generate_id();
        match self.engine.request(id, action, payload, vec![]).await {
            RequestOutcome::Response(payload) => Some(payload),
            RequestOutcome::Error { code, description } => {
                self.report(
                    format!("Action {action} Response Failed: {code} {description}"),
                    ErrorKind::InvalidResponse,
                )
                .await;
                None
            }
            RequestOutcome::Timeout { seconds } => {
                self.report(RequestOutcome::timeout_message(action, seconds), ErrorKind::InvalidResponse)
                    .await;
                None
            }
            RequestOutcome::ConnectionClosed => {
                self.report(format!("Action {action} lost connection"), ErrorKind::ConnectionError)
                    .await;
                None
            }
        }
    }

    /// See DESIGN.md Open Question #2: absence of `idTokenInfo` in a
    /// `TransactionEvent` response is acceptance; an explicit non-Accepted
    /// status rejects.
    fn accepted(response: &Value) -> bool {
        match response.get("idTokenInfo") {
            None | Some(Value::Null) => true,
            Some(info) => info["status"].as_str() == Some("Accepted"),
        }
    }
}

#[async_trait]
impl Device for OcppJ201Device {
    async fn action_register(&self) -> bool {
        let action = "BootNotification";
        info!(action, "start");
        let mut charging_station = json!({});
        if let Some(v) = &self.identity.vendor {
            charging_station["vendorName"] = json!(v);
        }
        if let Some(v) = &self.identity.model {
            charging_station["model"] = json!(v);
        }
        if let Some(v) = &self.identity.firmware_version {
            charging_station["firmwareVersion"] = json!(v);
        }
        let payload = json!({
            "chargingStation": charging_station,
            "reason": "RemoteReset",
        });

        let Some(response) = self.call(action, payload).await else {
            return false;
        };
        if response["status"].as_str() != Some("Accepted") {
            self.report(format!("Action {action} Response Failed"), ErrorKind::InvalidResponse)
                .await;
            return false;
        }
        info!(action, "end");
        true
    }

    async fn action_heart_beat(&self) -> bool {
        self.call("Heartbeat", json!({})).await.is_some()
    }

    async fn action_authorize(&self, options: &ChargeOptions) -> bool {
        let action = "Authorize";
        info!(action, "start");
        let id_token = options.id_tag.clone().unwrap_or_else(|| "-".to_string());
        let payload = json!({
            "idToken": {"idToken": id_token, "type": "ISO14443"},
        });
        let Some(response) = self.call(action, payload).await else {
            return false;
        };
        if response["idTokenInfo"]["status"].as_str() != Some("Accepted") {
            self.report(format!("Action {action} Response Failed"), ErrorKind::InvalidResponse)
                .await;
            return false;
        }
        info!(action, "end");
        true
    }

    async fn action_status_update(&self, status: &str, options: &ChargeOptions) -> bool {
        let action = "StatusNotification";
        let connector_id = options.connector_id.unwrap_or(1);
        let payload = json!({
            "timestamp": now_iso(),
            "connectorId": connector_id,
            "evseId": connector_id,
            "connectorStatus": status,
        });
        self.call(action, payload).await.is_some()
    }

    async fn action_charge_start(&self, options: &ChargeOptions) -> bool {
        let action = "TransactionEvent";
        info!(action, "start");
        let id_token = options.id_tag.clone().unwrap_or_else(|| "-".to_string());
        let connector_id = options.connector_id.unwrap_or(1);
        let meter_start = options.meter_start.unwrap_or(1000);
        let transaction_id = uuid::Uuid::new_v4().to_string();

        let payload = json!({
            "eventType": "Started",
            "timestamp": now_iso(),
            "triggerReason": "Authorized",
            "seqNo": 0,
            "transactionInfo": {"transactionId": transaction_id},
            "evse": {"id": connector_id, "connectorId": connector_id},
            "idToken": {"idToken": id_token, "type": "ISO14443"},
            "meterValue": [{
                "timestamp": now_iso(),
                "sampledValue": [{"value": meter_start}],
            }],
        });

        let Some(response) = self.call(action, payload).await else {
            return false;
        };
        if !Self::accepted(&response) {
            self.report(format!("Action {action} Response Failed"), ErrorKind::InvalidResponse)
                .await;
            return false;
        }

        let mut session = self.session.lock().await;
        session.transaction_id = Some(transaction_id);
        session.id_tag = id_token;
        session.connector_id = connector_id;
        session.meter_start = meter_start;
        session.start_time = chrono::Utc::now();
        session.seq_no = 1;
        session.charged_kwh_per_minute = options.charged_kwh_per_minute.unwrap_or(0);
        session.in_progress = true;
        info!(action, "end");
        true
    }

    async fn action_meter_value(&self, options: &ChargeOptions) -> bool {
        let action = "TransactionEvent";
        let connector_id = options.connector_id.unwrap_or(1);
        let (transaction_id, value, seq_no) = {
            let mut session = self.session.lock().await;
            session.seq_no += 1;
            (
                session.transaction_id.clone(),
                session.meter_now(chrono::Utc::now()),
                session.seq_no,
            )
        };
        let payload = json!({
            "eventType": "Updated",
            "timestamp": now_iso(),
            "triggerReason": "ChargingStateChanged",
            "seqNo": seq_no,
            "transactionInfo": {"transactionId": transaction_id},
            "evse": {"id": connector_id, "connectorId": connector_id},
            "meterValue": [{
                "timestamp": now_iso(),
                "sampledValue": [{"value": value}],
            }],
        });
        self.call(action, payload).await.is_some()
    }

    async fn action_charge_stop(&self, options: &ChargeOptions) -> bool {
        let action = "TransactionEvent";
        info!(action, "start");
        let connector_id = options.connector_id.unwrap_or(1);
        let (transaction_id, value, seq_no) = {
            let mut session = self.session.lock().await;
            session.seq_no += 1;
            (
                session.transaction_id.clone(),
                session.meter_now(chrono::Utc::now()),
                session.seq_no,
            )
        };
        let payload = json!({
            "eventType": "Ended",
            "timestamp": now_iso(),
            "triggerReason": "StopAuthorized",
            "seqNo": seq_no,
            "transactionInfo": {
                "transactionId": transaction_id,
                "stoppedReason": options.stop_reason.clone().unwrap_or_else(|| "Local".to_string()),
            },
            "evse": {"id": connector_id, "connectorId": connector_id},
            "meterValue": [{
                "timestamp": now_iso(),
                "sampledValue": [{"value": value}],
            }],
        });

        let Some(response) = self.call(action, payload).await else {
            return false;
        };
        if !Self::accepted(&response) {
            self.report(format!("Action {action} Response Failed"), ErrorKind::InvalidResponse)
                .await;
            return false;
        }
        info!(action, "end");
        true
    }

    async fn flow_charge(&self, auto_stop: bool, options: &ChargeOptions) -> bool {
        info!("flow_charge start");
        self.clear_stop_request();
        let mut ok = self.action_authorize(options).await;
        ok = ok && self.action_charge_start(options).await;
        ok = ok && self.action_status_update("Occupied", options).await;
        ok = ok
            && flow::charge_ongoing_loop(self, auto_stop, &OngoingMode::Periodic, options).await;
        ok = ok && self.action_charge_stop(options).await;
        ok = ok && self.action_status_update("Available", options).await;
        self.mark_idle().await;
        if ok {
            info!("flow_charge end");
        }
        ok
    }

    fn charge_can_start(&self) -> bool {
        self.session.try_lock().map(|s| s.can_start()).unwrap_or(false)
    }

    fn charge_can_stop(&self, req_id: i64) -> bool {
        self.session.try_lock().map(|s| s.can_stop(req_id)).unwrap_or(false)
    }

    fn session_snapshot(&self) -> ChargeSession {
        self.session
            .try_lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    async fn mark_idle(&self) {
        self.session.lock().await.in_progress = false;
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn clear_stop_request(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }
}
