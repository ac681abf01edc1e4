//! Turns cumulative per-interface byte counters into per-interval deltas and
//! rates.
//!
//! The baseline lives behind an async mutex. Callers hold a [`RateWindow`]
//! across the counter read and the update so concurrent requests cannot
//! interleave their read-modify-write.

use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::types::NetworkMetric;

/// Samples older than this are discarded instead of spanning the gap.
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub rx: u64,
    pub tx: u64,
}

#[derive(Debug, Clone)]
struct Baseline {
    rx: u64,
    tx: u64,
    at: Instant,
    interface: String,
}

#[derive(Debug)]
pub struct NetworkRateTracker {
    baseline: Mutex<Option<Baseline>>,
    staleness: Duration,
}

impl Default for NetworkRateTracker {
    fn default() -> Self {
        Self::new(STALENESS_THRESHOLD)
    }
}

impl NetworkRateTracker {
    pub fn new(staleness: Duration) -> Self {
        Self {
            baseline: Mutex::new(None),
            staleness,
        }
    }

    /// Locks the baseline until the returned window is dropped.
    pub async fn window(&self) -> RateWindow<'_> {
        RateWindow {
            baseline: self.baseline.lock().await,
            staleness: self.staleness,
        }
    }

    pub async fn observe(&self, interface: &str, counters: Counters, now: Instant) -> NetworkMetric {
        self.window().await.advance(interface, counters, now)
    }
}

pub struct RateWindow<'a> {
    baseline: MutexGuard<'a, Option<Baseline>>,
    staleness: Duration,
}

impl RateWindow<'_> {
    /// Folds a new reading into the window and reports the interval since the
    /// previous one. The baseline always moves to `counters`/`now`.
    pub fn advance(&mut self, interface: &str, counters: Counters, now: Instant) -> NetworkMetric {
        let previous = self.baseline.replace(Baseline {
            rx: counters.rx,
            tx: counters.tx,
            at: now,
            interface: interface.to_string(),
        });

        let last = match previous {
            Some(last)
                if last.interface == interface
                    && now.saturating_duration_since(last.at) <= self.staleness =>
            {
                last
            }
            Some(last) => {
                debug!(
                    interface,
                    previous = %last.interface,
                    age_ms = now.saturating_duration_since(last.at).as_millis() as u64,
                    "network baseline reset"
                );
                return zero_delta(interface);
            }
            None => {
                debug!(interface, "network baseline recorded");
                return zero_delta(interface);
            }
        };

        let elapsed = now.saturating_duration_since(last.at).as_secs_f64();
        // A counter that went backwards was reset; report nothing for this interval.
        let rx_delta = counters.rx.saturating_sub(last.rx);
        let tx_delta = counters.tx.saturating_sub(last.tx);
        let (rx_bps, tx_bps) = if elapsed > 0.0 {
            (rx_delta as f64 / elapsed, tx_delta as f64 / elapsed)
        } else {
            (0.0, 0.0)
        };

        NetworkMetric {
            rx_bytes: rx_delta,
            tx_bytes: tx_delta,
            rx_bps: Some(rx_bps.round()),
            tx_bps: Some(tx_bps.round()),
            rx_mbps: Some(to_mbps(rx_bps)),
            tx_mbps: Some(to_mbps(tx_bps)),
            interface: Some(interface.to_string()),
            error: None,
        }
    }
}

fn zero_delta(interface: &str) -> NetworkMetric {
    NetworkMetric {
        rx_bytes: 0,
        tx_bytes: 0,
        rx_bps: Some(0.0),
        tx_bps: Some(0.0),
        rx_mbps: Some(0.0),
        tx_mbps: Some(0.0),
        interface: Some(interface.to_string()),
        error: None,
    }
}

fn to_mbps(bps: f64) -> f64 {
    (bps * 8.0 / 1_000_000.0 * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(rx: u64, tx: u64) -> Counters {
        Counters { rx, tx }
    }

    #[tokio::test]
    async fn first_sample_only_records_a_baseline() {
        let t = NetworkRateTracker::default();
        let m = t.observe("eth0", c(9_000_000_000, 42), Instant::now()).await;
        assert_eq!((m.rx_bytes, m.tx_bytes), (0, 0));
        assert_eq!(m.rx_bps, Some(0.0));
        assert_eq!(m.rx_mbps, Some(0.0));
        assert_eq!(m.interface.as_deref(), Some("eth0"));
    }

    #[tokio::test]
    async fn one_megabyte_over_one_second_is_eight_mbps() {
        let t = NetworkRateTracker::default();
        let t0 = Instant::now();
        t.observe("eth0", c(5_000, 100), t0).await;
        let m = t
            .observe("eth0", c(1_005_000, 100), t0 + Duration::from_secs(1))
            .await;
        assert_eq!(m.rx_bytes, 1_000_000);
        assert_eq!(m.tx_bytes, 0);
        assert_eq!(m.rx_bps, Some(1_000_000.0));
        assert_eq!(m.rx_mbps, Some(8.0));
        assert_eq!(m.tx_mbps, Some(0.0));
    }

    #[tokio::test]
    async fn rates_are_rounded() {
        let t = NetworkRateTracker::default();
        let t0 = Instant::now();
        t.observe("eth0", c(0, 0), t0).await;
        let m = t
            .observe("eth0", c(1_000, 1), t0 + Duration::from_secs(3))
            .await;
        // 333.33 B/s -> 333; 0.00266 Mbps -> 0.003
        assert_eq!(m.rx_bps, Some(333.0));
        assert_eq!(m.rx_mbps, Some(0.003));
        assert_eq!(m.tx_bps, Some(0.0));
    }

    #[tokio::test]
    async fn counter_reset_clamps_to_zero_and_rebases() {
        let t = NetworkRateTracker::default();
        let t0 = Instant::now();
        t.observe("eth0", c(10_000, 10_000), t0).await;
        let m = t
            .observe("eth0", c(500, 20_000), t0 + Duration::from_secs(1))
            .await;
        assert_eq!(m.rx_bytes, 0);
        assert_eq!(m.tx_bytes, 10_000);

        // The reset reading became the new baseline.
        let m = t
            .observe("eth0", c(1_500, 20_000), t0 + Duration::from_secs(2))
            .await;
        assert_eq!(m.rx_bytes, 1_000);
    }

    #[tokio::test]
    async fn stale_baseline_is_replaced_not_spanned() {
        let t = NetworkRateTracker::default();
        let t0 = Instant::now();
        t.observe("eth0", c(0, 0), t0).await;
        let t1 = t0 + Duration::from_secs(15);
        let m = t.observe("eth0", c(15_000_000, 0), t1).await;
        assert_eq!((m.rx_bytes, m.tx_bytes), (0, 0));
        assert_eq!(m.rx_bps, Some(0.0));

        let m = t
            .observe("eth0", c(16_000_000, 0), t1 + Duration::from_secs(1))
            .await;
        assert_eq!(m.rx_bytes, 1_000_000);
    }

    #[tokio::test]
    async fn exactly_at_threshold_still_counts() {
        let t = NetworkRateTracker::default();
        let t0 = Instant::now();
        t.observe("eth0", c(0, 0), t0).await;
        let m = t
            .observe("eth0", c(10_000, 0), t0 + STALENESS_THRESHOLD)
            .await;
        assert_eq!(m.rx_bytes, 10_000);
        assert_eq!(m.rx_bps, Some(1_000.0));
    }

    #[tokio::test]
    async fn interface_switch_starts_a_new_baseline() {
        let t = NetworkRateTracker::default();
        let t0 = Instant::now();
        t.observe("eth0", c(1_000, 1_000), t0).await;
        let m = t
            .observe("wlan0", c(900_000, 900_000), t0 + Duration::from_secs(1))
            .await;
        assert_eq!((m.rx_bytes, m.tx_bytes), (0, 0));
        assert_eq!(m.interface.as_deref(), Some("wlan0"));
    }

    #[tokio::test]
    async fn zero_elapsed_reports_delta_without_rate() {
        let t = NetworkRateTracker::default();
        let t0 = Instant::now();
        t.observe("eth0", c(0, 0), t0).await;
        let m = t.observe("eth0", c(64, 0), t0).await;
        assert_eq!(m.rx_bytes, 64);
        assert_eq!(m.rx_bps, Some(0.0));
    }

    #[tokio::test]
    async fn concurrent_observers_never_lose_an_update() {
        use std::sync::Arc;

        let t = Arc::new(NetworkRateTracker::default());
        let t0 = Instant::now();
        t.observe("eth0", c(0, 0), t0).await;

        let mut handles = Vec::new();
        for i in 1..=8u64 {
            let t = Arc::clone(&t);
            handles.push(tokio::spawn(async move {
                let mut w = t.window().await;
                // Each reader sees the counter grow by 100 relative to whatever it replaces.
                let last = w.baseline.as_ref().map(|b| b.rx).unwrap_or(0);
                w.advance("eth0", c(last + 100, 0), t0 + Duration::from_millis(i * 10))
                    .rx_bytes
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 800);
    }
}
