// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Lock-free traffic counters kept by a forwarding service

use std::sync::atomic::{AtomicU64, Ordering};

use crate::stats::CounterSnapshot;

#[derive(Debug, Default)]
pub struct Counters {
    current_conns: AtomicU64,
    total_conns: AtomicU64,
    total_errs: AtomicU64,
    input_bytes: AtomicU64,
    output_bytes: AtomicU64,
}

impl Counters {
    /// Counters continuing from previously persisted totals
    pub fn seeded(seed: CounterSnapshot) -> Self {
        Self {
            current_conns: AtomicU64::new(0),
            total_conns: AtomicU64::new(seed.total_conns),
            total_errs: AtomicU64::new(seed.total_errs),
            input_bytes: AtomicU64::new(seed.input_bytes),
            output_bytes: AtomicU64::new(seed.output_bytes),
        }
    }

    pub fn conn_opened(&self) {
        self.total_conns.fetch_add(1, Ordering::Relaxed);
        self.current_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conn_closed(&self) {
        // Never wrap below zero
        let _ = self
            .current_conns
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn error(&self) {
        self.total_errs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_input(&self, bytes: u64) {
        self.input_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_output(&self, bytes: u64) {
        self.output_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            current_conns: self.current_conns.load(Ordering::Relaxed),
            total_conns: self.total_conns.load(Ordering::Relaxed),
            total_errs: self.total_errs.load(Ordering::Relaxed),
            input_bytes: self.input_bytes.load(Ordering::Relaxed),
            output_bytes: self.output_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_accounting() {
        let counters = Counters::default();
        counters.conn_opened();
        counters.conn_opened();
        counters.conn_closed();
        counters.add_input(10);
        counters.add_output(20);
        counters.error();

        let snap = counters.snapshot();
        assert_eq!(snap.total_conns, 2);
        assert_eq!(snap.current_conns, 1);
        assert_eq!(snap.total_errs, 1);
        assert_eq!(snap.input_bytes, 10);
        assert_eq!(snap.output_bytes, 20);
    }

    #[test]
    fn test_current_conns_never_underflows() {
        let counters = Counters::default();
        counters.conn_closed();
        assert_eq!(counters.snapshot().current_conns, 0);
    }

    #[test]
    fn test_seeded_continues_totals() {
        let counters = Counters::seeded(CounterSnapshot {
            current_conns: 5,
            total_conns: 100,
            total_errs: 3,
            input_bytes: 1000,
            output_bytes: 2000,
        });
        counters.conn_opened();
        counters.add_input(1);

        let snap = counters.snapshot();
        assert_eq!(snap.current_conns, 1);
        assert_eq!(snap.total_conns, 101);
        assert_eq!(snap.input_bytes, 1001);
        assert_eq!(snap.output_bytes, 2000);
    }
}
