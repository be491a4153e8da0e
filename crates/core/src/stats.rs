// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Service Statistics Module
// Cumulative traffic counters and the rates derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live counter values reported by a running forwarding service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub current_conns: u64,
    pub total_conns: u64,
    pub total_errs: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

/// Statistics snapshot attached to a tunnel or entrypoint
///
/// Cumulative fields are copied from the forwarding service, rate fields are
/// derived from the difference between two consecutive snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceStats {
    /// When this snapshot was taken. `None` until the first refresh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub total_conns: u64,
    pub current_conns: u64,
    pub total_errs: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// Connections per second
    pub request_rate: f64,
    pub input_rate_bytes: f64,
    pub output_rate_bytes: f64,
}

impl ServiceStats {
    /// Build the next snapshot from live counters taken at `now`.
    ///
    /// Returns `None` when no time has passed since this snapshot (or the
    /// clock went backwards), in which case the entry keeps its old stats.
    pub fn advance(&self, live: &CounterSnapshot, now: DateTime<Utc>) -> Option<ServiceStats> {
        let elapsed = match self.time {
            Some(prev) => {
                let secs = (now - prev).to_std().ok()?.as_secs_f64();
                if secs <= 0.0 {
                    return None;
                }
                Some(secs)
            }
            None => None,
        };

        let rate = |new: u64, old: u64| match elapsed {
            // Counter resets (restart) clamp to zero
            Some(secs) => new.saturating_sub(old) as f64 / secs,
            None => 0.0,
        };

        Some(ServiceStats {
            time: Some(now),
            total_conns: live.total_conns,
            current_conns: live.current_conns,
            total_errs: live.total_errs,
            input_bytes: live.input_bytes,
            output_bytes: live.output_bytes,
            request_rate: rate(live.total_conns, self.total_conns),
            input_rate_bytes: rate(live.input_bytes, self.input_bytes),
            output_rate_bytes: rate(live.output_bytes, self.output_bytes),
        })
    }

    /// Cumulative counters to continue from when a service is started again
    pub fn seed(&self) -> CounterSnapshot {
        CounterSnapshot {
            current_conns: 0,
            total_conns: self.total_conns,
            total_errs: self.total_errs,
            input_bytes: self.input_bytes,
            output_bytes: self.output_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stats_at(time: DateTime<Utc>, input_bytes: u64) -> ServiceStats {
        ServiceStats {
            time: Some(time),
            input_bytes,
            ..Default::default()
        }
    }

    #[test]
    fn test_input_rate_over_two_seconds() {
        let t = Utc::now();
        let old = stats_at(t, 100);
        let live = CounterSnapshot {
            input_bytes: 150,
            ..Default::default()
        };

        let new = old.advance(&live, t + Duration::seconds(2)).unwrap();
        assert_eq!(new.input_rate_bytes, 25.0);
        assert_eq!(new.input_bytes, 150);
        assert_eq!(new.time, Some(t + Duration::seconds(2)));
    }

    #[test]
    fn test_counter_reset_clamps_to_zero() {
        let t = Utc::now();
        let old = stats_at(t, 100);
        let live = CounterSnapshot {
            input_bytes: 50,
            ..Default::default()
        };

        let new = old.advance(&live, t + Duration::seconds(2)).unwrap();
        assert_eq!(new.input_rate_bytes, 0.0);
        assert_eq!(new.input_bytes, 50);
    }

    #[test]
    fn test_non_positive_elapsed_is_skipped() {
        let t = Utc::now();
        let old = stats_at(t, 100);
        let live = CounterSnapshot::default();

        assert!(old.advance(&live, t).is_none());
        assert!(old.advance(&live, t - Duration::seconds(1)).is_none());
    }

    #[test]
    fn test_first_snapshot_has_no_rates() {
        let live = CounterSnapshot {
            current_conns: 2,
            total_conns: 10,
            total_errs: 1,
            input_bytes: 400,
            output_bytes: 800,
        };

        let new = ServiceStats::default().advance(&live, Utc::now()).unwrap();
        assert_eq!(new.total_conns, 10);
        assert_eq!(new.current_conns, 2);
        assert_eq!(new.request_rate, 0.0);
        assert_eq!(new.output_rate_bytes, 0.0);
    }

    #[test]
    fn test_all_rates() {
        let t = Utc::now();
        let old = ServiceStats {
            time: Some(t),
            total_conns: 4,
            input_bytes: 1000,
            output_bytes: 2000,
            ..Default::default()
        };
        let live = CounterSnapshot {
            total_conns: 8,
            input_bytes: 1400,
            output_bytes: 3000,
            ..Default::default()
        };

        let new = old.advance(&live, t + Duration::seconds(4)).unwrap();
        assert_eq!(new.request_rate, 1.0);
        assert_eq!(new.input_rate_bytes, 100.0);
        assert_eq!(new.output_rate_bytes, 250.0);
    }

    #[test]
    fn test_seed_drops_current_conns() {
        let stats = ServiceStats {
            current_conns: 3,
            total_conns: 9,
            total_errs: 2,
            input_bytes: 10,
            output_bytes: 20,
            ..Default::default()
        };

        let seed = stats.seed();
        assert_eq!(seed.current_conns, 0);
        assert_eq!(seed.total_conns, 9);
        assert_eq!(seed.total_errs, 2);
        assert_eq!(seed.output_bytes, 20);
    }
}
