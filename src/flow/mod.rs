use std::time::Duration;

use tracing::info;

use crate::device::{ChargeOptions, Device};

const PERIODIC_TICK: Duration = Duration::from_secs(15);
const PERIODIC_AUTO_STOP_TICKS: u32 = 5;
const DRAIN: Duration = Duration::from_secs(5);

/// One scripted meter-value tick: a fixed reading emitted after a fixed
/// sleep, independent of wall-clock `meterNow`.
#[derive(Debug, Clone)]
pub struct ScriptedTick {
    pub seconds_to_sleep: u64,
}

/// Scripted mode iterates a fixed list of ticks; Periodic mode runs until
/// `auto_stop`'s counter is reached or `device.stop_requested()` fires.
#[derive(Debug, Clone)]
pub enum OngoingMode {
    Scripted(Vec<ScriptedTick>),
    Periodic,
}

/// Shared ongoing-charge loop, grounded on `abstract.py`'s
/// `flow_charge_ongoing_loop`: emits MeterValues (and a "Charging" status
/// ping in Periodic mode) on a cadence, then drains for 5s before
/// returning. Every dialect's `flow_charge` delegates its "ongoing" step to
/// this function.
pub async fn charge_ongoing_loop(device: &dyn Device, auto_stop: bool, mode: &OngoingMode, options: &ChargeOptions) -> bool {
    match mode {
        OngoingMode::Scripted(ticks) => {
            for tick in ticks {
                tokio::time::sleep(Duration::from_secs(tick.seconds_to_sleep)).await;
                if !device.action_meter_value(options).await {
                    return false;
                }
                if device.stop_requested() {
                    break;
                }
            }
        }
        OngoingMode::Periodic => {
            let mut counter = 0u32;
            while device.session_snapshot().in_progress && !device.stop_requested() {
                tokio::time::sleep(PERIODIC_TICK).await;
                counter += 1;
                if !device.action_meter_value(options).await {
                    return false;
                }
                if !device.action_status_update("Charging", options).await {
                    return false;
                }
                if auto_stop && counter >= PERIODIC_AUTO_STOP_TICKS {
                    break;
                }
            }
        }
    }
    info!("ongoing loop draining");
    tokio::time::sleep(DRAIN).await;
    device.clear_stop_request();
    true
}

/// Thin wrapper kept for symmetry with `flow_charge`/`flow_authorize` naming
/// in SPEC_FULL.md §4.5; scheduling frequency lives in `scheduler`.
pub async fn flow_heartbeat(device: &dyn Device) -> bool {
    device.action_heart_beat().await
}

pub async fn flow_authorize(device: &dyn Device, options: &ChargeOptions) -> bool {
    device.action_authorize(options).await
}
