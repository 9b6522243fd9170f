use chrono::{DateTime, Utc};

/// The single in-flight (or idle) charging session for a device. Only one
/// transaction can be active at a time; `in_progress` is the authoritative
/// flag checked by `charge_can_start`/`charge_can_stop`.
#[derive(Debug, Clone)]
pub struct ChargeSession {
    pub transaction_id: Option<String>,
    pub id_tag: String,
    pub connector_id: u32,
    pub evse_id: Option<u32>,
    pub meter_start: i64,
    pub start_time: DateTime<Utc>,
    pub in_progress: bool,
    pub seq_no: u64,
    pub charged_kwh_per_minute: i64,
}

impl Default for ChargeSession {
    fn default() -> Self {
        Self {
            transaction_id: None,
            id_tag: String::new(),
            connector_id: 1,
            evse_id: None,
            meter_start: 0,
            start_time: Utc::now(),
            in_progress: false,
            seq_no: 0,
            charged_kwh_per_minute: 0,
        }
    }
}

impl ChargeSession {
    /// `meterStart + floor(elapsed_minutes * chargedKwhPerMinute * 1000)`
    /// (kWh/minute converted to the Wh meter unit), monotonic in `now`.
    pub fn meter_now(&self, now: DateTime<Utc>) -> i64 {
        let elapsed_seconds = (now - self.start_time).num_seconds().max(0);
        let elapsed_minutes = elapsed_seconds / 60;
        self.meter_start + elapsed_minutes * self.charged_kwh_per_minute * 1000
    }

    pub fn can_start(&self) -> bool {
        !self.in_progress
    }

    /// `reqId == -1` is a wildcard matching any in-progress transaction id.
    pub fn can_stop(&self, req_id: i64) -> bool {
        if !self.in_progress {
            return false;
        }
        if req_id == -1 {
            return true;
        }
        self.transaction_id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok())
            == Some(req_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn meter_now_is_monotonic() {
        let mut session = ChargeSession {
            meter_start: 1000,
            charged_kwh_per_minute: 1,
            start_time: Utc::now(),
            ..Default::default()
        };
        session.in_progress = true;
        let t1 = session.start_time + Duration::seconds(30);
        let t2 = session.start_time + Duration::minutes(3);
        assert!(session.meter_now(t1) <= session.meter_now(t2));
        assert_eq!(session.meter_now(t1), 1000);
        assert_eq!(session.meter_now(t2), 4000);
    }

    #[test]
    fn can_stop_wildcard() {
        let session = ChargeSession {
            transaction_id: Some("42".into()),
            in_progress: true,
            ..Default::default()
        };
        assert!(session.can_stop(-1));
        assert!(session.can_stop(42));
        assert!(!session.can_stop(7));
    }

    #[test]
    fn cannot_stop_when_idle() {
        let session = ChargeSession::default();
        assert!(!session.can_stop(-1));
        assert!(session.can_start());
    }
}
