use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::engine::InboundHandler;
use crate::support::ReinitSignal;

use super::{ChargeOptions, Device};

/// The default-Accepted inbound action table shared by OCPP-J 1.6 and
/// 2.0.1, grounded on `abstract_device_ocpp_j.py`'s `by_middleware_req`.
/// Overrides: `RemoteStartTransaction`/`RemoteStopTransaction`/`Reset` per
/// SPEC_FULL.md §4.4.
pub struct OcppJInboundHandler {
    pub device: Arc<dyn Device>,
    pub reinitialize: ReinitSignal,
    pub configuration_keys: Vec<(String, String)>,
}

const DEFAULT_ACCEPTED: &[&str] = &[
    "ClearCache",
    "ChangeAvailability",
    "SetChargingProfile",
    "ChangeConfiguration",
    "UnlockConnector",
    "UpdateFirmware",
    "SendLocalList",
    "CancelReservation",
    "ReserveNow",
    "DataTransfer",
    "RequestStartTransaction",
    "RequestStopTransaction",
];

#[async_trait]
impl InboundHandler for OcppJInboundHandler {
    async fn handle(&self, _id: &str, action: &str, payload: Value) -> Option<Value> {
        match action {
            a if DEFAULT_ACCEPTED.contains(&a) => Some(json!({"status": "Accepted"})),
            "RemoteStartTransaction" => {
                if !self.device.charge_can_start() {
                    return Some(json!({"status": "Rejected"}));
                }
                let device = self.device.clone();
                let options = ChargeOptions {
                    id_tag: payload["idTag"].as_str().map(str::to_string),
                    connector_id: payload["connectorId"].as_u64().map(|v| v as u32),
                    ..Default::default()
                };
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    device.flow_charge(false, &options).await;
                });
                Some(json!({"status": "Accepted"}))
            }
            "RemoteStopTransaction" => {
                let transaction_id = payload["transactionId"].as_i64().unwrap_or(-1);
                if !self.device.charge_can_stop(transaction_id) {
                    return Some(json!({"status": "Rejected"}));
                }
                let device = self.device.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    device.request_stop();
                });
                Some(json!({"status": "Accepted"}))
            }
            "Reset" => {
                let signal = self.reinitialize.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    info!("requesting re-initialize after Reset");
                    signal.request();
                });
                Some(json!({"status": "Accepted"}))
            }
            "GetConfiguration" => {
                let configuration_key: Vec<Value> = self
                    .configuration_keys
                    .iter()
                    .map(|(key, value)| json!({"key": key, "value": value, "readonly": false}))
                    .collect();
                Some(json!({"configurationKey": configuration_key}))
            }
            "GetDiagnostics" => Some(json!({"fileName": "fake_file_name.log"})),
            "TriggerMessage" => {
                let requested = payload["requestedMessage"].as_str().unwrap_or("").to_string();
                let device = self.device.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    let options = ChargeOptions::default();
                    match requested.as_str() {
                        "MeterValues" => {
                            device.action_meter_value(&options).await;
                        }
                        "BootNotification" => {
                            device.action_register().await;
                        }
                        "Heartbeat" => {
                            device.action_heart_beat().await;
                        }
                        "StatusNotification" => {
                            let status = if device.session_snapshot().in_progress {
                                "Charging"
                            } else {
                                "Available"
                            };
                            device.action_status_update(status, &options).await;
                        }
                        other => info!(requested = other, "unsupported TriggerMessage target"),
                    }
                });
                Some(json!({"status": "Accepted"}))
            }
            other => {
                info!(action = other, "unhandled OCPP-J inbound action, default ack");
                Some(json!({"status": "Accepted"}))
            }
        }
    }
}
