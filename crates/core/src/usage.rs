//! API usage counters, keyed by calendar month.
//!
//! The core only produces increments; persisting the serialized shape is the
//! caller's concern.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageBucket {
    pub requests: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub total: UsageBucket,
    /// Keyed by "YYYY-MM".
    pub monthly: BTreeMap<String, UsageBucket>,
}

#[derive(Debug, Default)]
pub struct UsageStats {
    inner: Mutex<UsageSnapshot>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, cost: f64) {
        self.record_for_month(cost, &Utc::now().format("%Y-%m").to_string());
    }

    fn record_for_month(&self, cost: f64, month: &str) {
        let mut stats = self.inner.lock().expect("usage stats lock");
        stats.total.requests += 1;
        stats.total.cost += cost;
        let bucket = stats.monthly.entry(month.to_string()).or_default();
        bucket.requests += 1;
        bucket.cost += cost;
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.inner.lock().expect("usage stats lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_total_and_month() {
        let stats = UsageStats::new();
        stats.record_for_month(0.006, "2026-08");
        stats.record_for_month(0.006, "2026-08");
        stats.record_for_month(0.006, "2026-09");

        let snap = stats.snapshot();
        assert_eq!(snap.total.requests, 3);
        assert!((snap.total.cost - 0.018).abs() < 1e-9);
        assert_eq!(snap.monthly["2026-08"].requests, 2);
        assert_eq!(snap.monthly["2026-09"].requests, 1);
    }

    #[test]
    fn serializes_to_persisted_shape() {
        let stats = UsageStats::new();
        stats.record_for_month(0.006, "2026-08");
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["total"]["requests"], 1);
        assert!(json["monthly"]["2026-08"]["cost"].as_f64().unwrap() > 0.0);
    }
}
