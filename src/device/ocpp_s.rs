use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::codec::soap;
use crate::domain::error::{ErrorEvent, ErrorKind};
use crate::domain::identity::DeviceIdentity;
use crate::domain::session::ChargeSession;
use crate::flow::{self, OngoingMode};
use crate::support::ErrorBus;
use crate::transport::soap::SoapTransport;

use super::{ChargeOptions, Device};

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Synchronous SOAP (OCPP-S) action set. No inbound request pump exists
/// (see DESIGN.md Open Question #3): every action is a single call/response
/// round-trip, and this device is never registered with an
/// `InboundHandler`.
pub struct OcppSDevice {
    identity: DeviceIdentity,
    from_address: Option<String>,
    transport: SoapTransport,
    session: Mutex<ChargeSession>,
    errors: ErrorBus,
    stop_requested: AtomicBool,
}

impl OcppSDevice {
    pub fn new(identity: DeviceIdentity, from_address: Option<String>, transport: SoapTransport, errors: ErrorBus) -> Self {
        Self {
            identity,
            from_address,
            transport,
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
        let envelope = soap::wrap(action, self.from_address.as_deref(), &payload);
        match self.transport.call(&envelope).await {
            Ok(body) => match soap::unwrap(&body) {
                Ok(value) => Some(value),
                Err(err) => {
                    self.report(format!("Action {action} Response Failed: {err}"), ErrorKind::InvalidResponse)
                        .await;
                    None
                }
            },
            Err(err) => {
                self.report(format!("Action {action} lost connection: {err}"), ErrorKind::ConnectionError)
                    .await;
                None
            }
        }
    }
}

#[async_trait]
impl Device for OcppSDevice {
    async fn action_register(&self) -> bool {
        let action = "BootNotification";
        let mut payload = json!({});
        if let Some(v) = &self.identity.vendor {
            payload["chargePointVendor"] = json!(v);
        }
        if let Some(v) = &self.identity.model {
            payload["chargePointModel"] = json!(v);
        }
        let Some(response) = self.call(action, payload).await else {
            return false;
        };
        if response["status"].as_str() != Some("Accepted") {
            self.report(format!("Action {action} Response Failed"), ErrorKind::InvalidResponse)
                .await;
            return false;
        }
        true
    }

    async fn action_heart_beat(&self) -> bool {
        self.call("HeartBeat", json!({})).await.is_some()
    }

    async fn action_authorize(&self, options: &ChargeOptions) -> bool {
        let action = "Authorize";
        let id_tag = options.id_tag.clone().unwrap_or_else(|| "-".to_string());
        let Some(response) = self.call(action, json!({"idTag": id_tag})).await else {
            return false;
        };
        if response["idTagInfo"]["status"].as_str() != Some("Accepted") {
            self.report(format!("Action {action} Response Failed"), ErrorKind::InvalidResponse)
                .await;
            return false;
        }
        true
    }

    async fn action_status_update(&self, status: &str, options: &ChargeOptions) -> bool {
        let connector_id = options.connector_id.unwrap_or(1);
        let payload = json!({"connectorId": connector_id, "errorCode": "NoError", "status": status});
        self.call("StatusNotification", payload).await.is_some()
    }

    async fn action_charge_start(&self, options: &ChargeOptions) -> bool {
        let action = "StartTransaction";
        let id_tag = options.id_tag.clone().unwrap_or_else(|| "-".to_string());
        let connector_id = options.connector_id.unwrap_or(1);
        let meter_start = options.meter_start.unwrap_or(1000);
        let payload = json!({
            "timestamp": now_iso(),
            "connectorId": connector_id,
            "meterStart": meter_start,
            "idTag": id_tag,
        });
        let Some(response) = self.call(action, payload).await else {
            return false;
        };
        if response["idTagInfo"]["status"].as_str() != Some("Accepted") {
            self.report(format!("Action {action} Response Failed"), ErrorKind::InvalidResponse)
                .await;
            return false;
        }
        let transaction_id = response["transactionId"].as_i64().map(|v| v.to_string());
        let mut session = self.session.lock().await;
        session.transaction_id = transaction_id;
        session.id_tag = id_tag;
        session.connector_id = connector_id;
        session.meter_start = meter_start;
        session.start_time = chrono::Utc::now();
        session.charged_kwh_per_minute = options.charged_kwh_per_minute.unwrap_or(0);
        session.in_progress = true;
        true
    }

    async fn action_meter_value(&self, options: &ChargeOptions) -> bool {
        let connector_id = options.connector_id.unwrap_or(1);
        let (transaction_id, value) = {
            let session = self.session.lock().await;
            (session.transaction_id.clone(), session.meter_now(chrono::Utc::now()))
        };
        let payload = json!({
            "connectorId": connector_id,
            "transactionId": transaction_id,
            "meterValue": [{"timestamp": now_iso(), "sampledValue": [{"value": value.to_string()}]}],
        });
        self.call("MeterValues", payload).await.is_some()
    }

    async fn action_charge_stop(&self, options: &ChargeOptions) -> bool {
        let action = "StopTransaction";
        let id_tag = options.id_tag.clone().unwrap_or_else(|| "-".to_string());
        let reason = options.stop_reason.clone().unwrap_or_else(|| "Local".to_string());
        let (transaction_id, meter_stop) = {
            let session = self.session.lock().await;
            (session.transaction_id.clone(), session.meter_now(chrono::Utc::now()))
        };
        let payload = json!({
            "timestamp": now_iso(),
            "transactionId": transaction_id,
            "meterStop": meter_stop,
            "idTag": id_tag,
            "reason": reason,
        });
        let Some(response) = self.call(action, payload).await else {
            return false;
        };
        response["idTagInfo"]["status"].as_str() == Some("Accepted")
    }

    async fn flow_charge(&self, auto_stop: bool, options: &ChargeOptions) -> bool {
        info!("flow_charge start");
        self.clear_stop_request();
        let mut ok = self.action_authorize(options).await;
        ok = ok && self.action_charge_start(options).await;
        ok = ok && self.action_status_update("Preparing", options).await;
        ok = ok && self.action_status_update("Charging", options).await;
        ok = ok
            && flow::charge_ongoing_loop(self, auto_stop, &OngoingMode::Periodic, options).await;
        ok = ok && self.action_status_update("Finishing", options).await;
        ok = ok && self.action_charge_stop(options).await;
        ok = ok && self.action_status_update("Available", options).await;
        self.mark_idle().await;
        ok
    }

    fn charge_can_start(&self) -> bool {
        self.session.try_lock().map(|s| s.can_start()).unwrap_or(false)
    }

    fn charge_can_stop(&self, req_id: i64) -> bool {
        self.session.try_lock().map(|s| s.can_stop(req_id)).unwrap_or(false)
    }

    fn session_snapshot(&self) -> ChargeSession {
        self.session.try_lock().map(|s| s.clone()).unwrap_or_default()
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
