pub mod ensto;
pub mod ocpp_j16;
pub mod ocpp_j201;
pub mod ocpp_j_inbound;
pub mod ocpp_s;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::session::ChargeSession;

/// Mirrors `flow_charge_options`, the opaque map forwarded from
/// `SimulationConfig` into every flow call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChargeOptions {
    pub id_tag: Option<String>,
    pub connector_id: Option<u32>,
    pub meter_start: Option<i64>,
    pub stop_reason: Option<String>,
    #[serde(alias = "chargedKwhPerMinute")]
    pub charged_kwh_per_minute: Option<i64>,
}

/// The action/flow surface every dialect implements, per SPEC_FULL.md §4.4.
/// The scheduler and the inbound-request bridge talk only to this trait;
/// they never know which dialect is underneath.
#[async_trait]
pub trait Device: Send + Sync {
    async fn action_register(&self) -> bool;
    async fn action_heart_beat(&self) -> bool;
    async fn action_authorize(&self, options: &ChargeOptions) -> bool;
    async fn action_status_update(&self, status: &str, options: &ChargeOptions) -> bool;
    async fn action_charge_start(&self, options: &ChargeOptions) -> bool;
    async fn action_meter_value(&self, options: &ChargeOptions) -> bool;
    async fn action_charge_stop(&self, options: &ChargeOptions) -> bool;

    /// Dialect-specific 8 (or fewer)-step sequence, per SPEC_FULL.md §4.5.
    /// Shares the ongoing meter-value loop via `flow::charge_ongoing_loop`.
    async fn flow_charge(&self, auto_stop: bool, options: &ChargeOptions) -> bool;

    fn charge_can_start(&self) -> bool;
    fn charge_can_stop(&self, req_id: i64) -> bool;
    fn session_snapshot(&self) -> ChargeSession;

    /// Resets `in_progress` to false. Called by `flow_charge` on any failed
    /// step and after a clean stop.
    async fn mark_idle(&self);

    /// Signals the in-flight `chargeOngoingLoop` to end early, used by the
    /// RemoteStopTransaction/`scmd=0` inbound path.
    fn request_stop(&self);
    fn stop_requested(&self) -> bool;
    fn clear_stop_request(&self);
}
