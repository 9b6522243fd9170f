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

// Numeric Ensto message-type ids, grounded on device_ensto.py.
const ID_REGISTER: &str = "1";
const ID_STATUS_UPDATE: &str = "2";
const ID_AUTHORIZE: &str = "10";
const ID_CHARGE_START: &str = "5";
const ID_CHARGE_STOP: &str = "6";
const ID_METER_VALUE: &str = "43";
const ID_HEARTBEAT: &str = "24";

/// Ensto action set and inbound numeric-action table, grounded on
/// `original_source/device/ensto/device_ensto.py`.
pub struct EnstoDevice {
    identity: DeviceIdentity,
    engine: Arc<ProtocolEngine>,
    session: Mutex<ChargeSession>,
    errors: ErrorBus,
    stop_requested: AtomicBool,
}

impl EnstoDevice {
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

    async fn call(&self, action_id: &str, payload: Value) -> Option<Value> {
        match self.engine.request(action_id.to_string(), action_id, payload, vec![]).await {
            RequestOutcome::Response(payload) => Some(payload),
            RequestOutcome::Error { code, description } => {
                self.report(
                    format!("Action {action_id} Response Failed: {code} {description}"),
                    ErrorKind::InvalidResponse,
                )
                .await;
                None
            }
            RequestOutcome::Timeout { seconds } => {
                self.report(RequestOutcome::timeout_message(action_id, seconds), ErrorKind::InvalidResponse)
                    .await;
                None
            }
            RequestOutcome::ConnectionClosed => {
                self.report(format!("Action {action_id} lost connection"), ErrorKind::ConnectionError)
                    .await;
                None
            }
        }
    }
}

#[async_trait]
impl Device for EnstoDevice {
    async fn action_register(&self) -> bool {
        info!(action = ID_REGISTER, "start");
        let payload = json!({
            "vendor": self.identity.vendor.clone().unwrap_or_default(),
            "model": self.identity.model.clone().unwrap_or_default(),
            "sw": self.identity.firmware_version.clone().unwrap_or_default(),
            "isLoadTest": "1",
            "settings": Value::Null,
        });
        self.call(ID_REGISTER, payload).await.is_some()
    }

    async fn action_heart_beat(&self) -> bool {
        self.call(ID_HEARTBEAT, json!({"time": "1"})).await.is_some()
    }

    async fn action_authorize(&self, options: &ChargeOptions) -> bool {
        let rfid = options.id_tag.clone().unwrap_or_else(|| "-".to_string());
        let Some(response) = self.call(ID_AUTHORIZE, json!({"rfid": rfid})).await else {
            return false;
        };
        if response.get("chk").is_none() || response.get("success").is_none() {
            self.report(
                format!("Action {ID_AUTHORIZE} Response Failed"),
                ErrorKind::InvalidResponse,
            )
            .await;
            return false;
        }
        true
    }

    async fn action_status_update(&self, status: &str, _options: &ChargeOptions) -> bool {
        self.call(ID_STATUS_UPDATE, json!({"status": status})).await.is_some()
    }

    async fn action_charge_start(&self, options: &ChargeOptions) -> bool {
        info!(action = ID_CHARGE_START, "start");
        let rfid = options.id_tag.clone().unwrap_or_else(|| "-".to_string());
        let connector_id = options.connector_id.unwrap_or(1);
        let meter_start = options.meter_start.unwrap_or(1000);
        let payload = json!({
            "rfid": rfid,
            "chg": "2",
            "out": connector_id.to_string(),
        });

        let Some(_response) = self.call(ID_CHARGE_START, payload).await else {
            return false;
        };

        let mut session = self.session.lock().await;
        session.transaction_id = Some(ID_CHARGE_START.to_string());
        session.id_tag = rfid;
        session.connector_id = connector_id;
        session.meter_start = meter_start;
        session.start_time = chrono::Utc::now();
        session.charged_kwh_per_minute = options.charged_kwh_per_minute.unwrap_or(0);
        session.in_progress = true;
        true
    }

    async fn action_meter_value(&self, options: &ChargeOptions) -> bool {
        let connector_id = options.connector_id.unwrap_or(1);
        let value = {
            let session = self.session.lock().await;
            session.meter_now(chrono::Utc::now())
        };
        let payload = json!({
            "out": connector_id.to_string(),
            "time": "1",
            "t": "382",
            "eem": value.to_string(),
        });
        self.call(ID_METER_VALUE, payload).await.is_some()
    }

    async fn action_charge_stop(&self, options: &ChargeOptions) -> bool {
        info!(action = ID_CHARGE_STOP, "start");
        let rfid = options.id_tag.clone().unwrap_or_else(|| "-".to_string());
        let connector_id = options.connector_id.unwrap_or(1);
        let (kwh, timestamp) = {
            let session = self.session.lock().await;
            (session.meter_now(chrono::Utc::now()), chrono::Utc::now().timestamp())
        };
        let payload = json!({
            "rfid": rfid,
            "chg": "0",
            "out": connector_id.to_string(),
            "kwh": kwh.to_string(),
            "timestamp": timestamp.to_string(),
        });
        self.call(ID_CHARGE_STOP, payload).await.is_some()
    }

    async fn flow_charge(&self, auto_stop: bool, options: &ChargeOptions) -> bool {
        info!("flow_charge start");
        self.clear_stop_request();
        let mut ok = self.action_authorize(options).await;
        ok = ok && self.action_charge_start(options).await;
        ok = ok && self.action_status_update("1", options).await;
        ok = ok
            && flow::charge_ongoing_loop(self, auto_stop, &OngoingMode::Periodic, options).await;
        ok = ok && self.action_charge_stop(options).await;
        ok = ok && self.action_status_update("0", options).await;
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

/// The numeric inbound-action table from `by_middleware_req`/
/// `__by_device_req_resp_ready` in device_ensto.py, driving
/// `RemoteStart`/`RemoteStop`-equivalent and config-get/set requests.
pub mod inbound {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tracing::info;

    use crate::device::{ChargeOptions, Device};
    use crate::engine::InboundHandler;
    use crate::support::ReinitSignal;

    pub struct EnstoInboundHandler {
        pub device: Arc<dyn Device>,
        pub reinitialize: ReinitSignal,
        pub server_host: String,
        pub server_port: u16,
        pub identifier: String,
    }

    #[async_trait]
    impl InboundHandler for EnstoInboundHandler {
        async fn handle(&self, _id: &str, action: &str, payload: Value) -> Option<Value> {
            match action {
                "20" | "17" => Some(json!({"ack": "1"})),
                "11" => {
                    let scmd = payload.get("scmd").and_then(Value::as_str).unwrap_or("");
                    match scmd {
                        "1" => {
                            if !self.device.charge_can_start() {
                                return Some(json!({"nack": "1"}));
                            }
                            let device = self.device.clone();
                            let options = ChargeOptions::default();
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_secs(2)).await;
                                device.flow_charge(false, &options).await;
                            });
                            Some(json!({"ack": "1"}))
                        }
                        "0" => {
                            if !self.device.charge_can_stop(-1) {
                                return Some(json!({"nack": "1"}));
                            }
                            self.device.request_stop();
                            Some(json!({"ack": "1"}))
                        }
                        _ => Some(json!({"nack": "1"})),
                    }
                }
                "14" | "15" => {
                    let is_set_request = payload.get("gprs").and_then(Value::as_str) == Some("2")
                        || payload.get("settings").and_then(Value::as_str) == Some("2");
                    if is_set_request {
                        if payload.get("upd").and_then(Value::as_str) == Some("1") {
                            Some(json!({"upd": "1"}))
                        } else {
                            Some(json!({"ack": "1"}))
                        }
                    } else {
                        Some(json!({
                            "type": "device-simulator",
                            "server_host": self.server_host,
                            "server_port": self.server_port.to_string(),
                            "identifier": self.identifier,
                        }))
                    }
                }
                "42" => {
                    let signal = self.reinitialize.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        info!("requesting re-initialize after action 42");
                        signal.request();
                    });
                    Some(json!({"ack": "1"}))
                }
                other => {
                    info!(action = other, "unhandled Ensto inbound action, default ack");
                    Some(json!({"ack": "1"}))
                }
            }
        }
    }
}
