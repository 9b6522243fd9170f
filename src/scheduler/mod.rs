//! Frequent-flow scheduler, grounded on `original_source/device/simulator.py`'s
//! `loop_flow_frequent` and on the teacher's `heartbeat_monitor.rs` interval
//! + `select!` + `ShutdownSignal` shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::device::{ChargeOptions, Device};
use crate::domain::error::{ErrorEvent, ErrorKind};
use crate::support::{ErrorBus, ShutdownSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Flow {
    Heartbeat,
    Authorize,
    Charge,
}

/// One scheduled entry. `run_last_time`/`run_counter` track a logical tick
/// count, not wall-clock time, per SPEC_FULL.md §4.6.
#[derive(Debug, Clone)]
pub struct FrequentFlowOptions {
    pub flow: Flow,
    pub delay_seconds: i64,
    pub count: i64,
    pub run_last_time: i64,
    pub run_counter: i64,
}

impl FrequentFlowOptions {
    pub fn new(flow: Flow, delay_seconds: i64, count: i64) -> Self {
        Self {
            flow,
            delay_seconds,
            count,
            run_last_time: -1,
            run_counter: 0,
        }
    }

    fn effective_delay(&self) -> i64 {
        if self.delay_seconds <= 0 {
            60
        } else {
            self.delay_seconds
        }
    }

    fn due(&self, tick: i64) -> bool {
        self.run_last_time < 0 || tick - self.run_last_time >= self.effective_delay()
    }

    fn exhausted(&self) -> bool {
        self.count >= 0 && self.run_counter >= self.count
    }
}

/// Drives `FrequentFlowOptions` entries against a `Device` on a 1 Hz clock.
/// One logical task per entry runs at a time; a still-running task for the
/// same flow suppresses that tick's attempt (no self-overlap).
pub struct FrequentScheduler {
    device: Arc<dyn Device>,
    options: ChargeOptions,
    entries: Vec<FrequentFlowOptions>,
    errors: ErrorBus,
    shutdown: ShutdownSignal,
}

impl FrequentScheduler {
    pub fn new(
        device: Arc<dyn Device>,
        options: ChargeOptions,
        entries: Vec<FrequentFlowOptions>,
        errors: ErrorBus,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            device,
            options,
            entries,
            errors,
            shutdown,
        }
    }

    /// Runs until every entry exhausts its count (joining in-flight tasks
    /// first) or shutdown is triggered.
    pub async fn run(mut self) {
        let mut tick: i64 = 0;
        let mut tasks: HashMap<Flow, JoinHandle<()>> = HashMap::new();
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick += 1;
                    self.fire_due(tick, &mut tasks);

                    if self.entries.iter().all(|e| e.exhausted()) {
                        info!("no more frequent flows to run, waiting for in-flight tasks");
                        for (_, handle) in tasks.drain() {
                            let _ = handle.await;
                        }
                        info!("frequent scheduler exiting");
                        break;
                    }
                }
                _ = self.shutdown.notified().wait() => {
                    info!("frequent scheduler shutting down");
                    break;
                }
            }
        }
    }

    fn fire_due(&mut self, tick: i64, tasks: &mut HashMap<Flow, JoinHandle<()>>) {
        for entry in &mut self.entries {
            if let Some(handle) = tasks.get(&entry.flow) {
                if !handle.is_finished() {
                    continue;
                }
            }
            if entry.due(tick) && !entry.exhausted() {
                let device = self.device.clone();
                let options = self.options.clone();
                let errors = self.errors.clone();
                let flow = entry.flow;
                info!(?flow, tick, "frequent flow started");
                let handle = tokio::spawn(async move {
                    run_guarded(device, flow, options, errors).await;
                });
                tasks.insert(flow, handle);
                entry.run_counter += 1;
                entry.run_last_time = tick;
            }
        }
    }
}

async fn run_guarded(device: Arc<dyn Device>, flow: Flow, options: ChargeOptions, errors: ErrorBus) {
    let ok = match flow {
        Flow::Heartbeat => device.action_heart_beat().await,
        Flow::Authorize => device.action_authorize(&options).await,
        Flow::Charge => device.flow_charge(true, &options).await,
    };
    if !ok {
        warn!(?flow, "frequent flow task reported failure");
        errors.publish(ErrorEvent::new(
            format!("Frequent flow {flow:?} raised an exception"),
            ErrorKind::UnknownException,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_when_never_run() {
        let entry = FrequentFlowOptions::new(Flow::Heartbeat, 30, -1);
        assert!(entry.due(0));
    }

    #[test]
    fn not_due_before_delay_elapses() {
        let mut entry = FrequentFlowOptions::new(Flow::Heartbeat, 30, -1);
        entry.run_last_time = 10;
        assert!(!entry.due(20));
        assert!(entry.due(40));
    }

    #[test]
    fn zero_delay_defaults_to_sixty() {
        let mut entry = FrequentFlowOptions::new(Flow::Heartbeat, 0, -1);
        entry.run_last_time = 10;
        assert!(!entry.due(50));
        assert!(entry.due(70));
    }

    #[test]
    fn exhausted_once_count_reached() {
        let mut entry = FrequentFlowOptions::new(Flow::Charge, 10, 2);
        assert!(!entry.exhausted());
        entry.run_counter = 2;
        assert!(entry.exhausted());
    }

    #[test]
    fn negative_count_never_exhausts() {
        let mut entry = FrequentFlowOptions::new(Flow::Charge, 10, -1);
        entry.run_counter = 1000;
        assert!(!entry.exhausted());
    }
}
