//! # Bandwidth Statistics
//!
//! Rolling time series of compact block traffic.
//!
//! Every series is a [`StatsWindow`] that drops samples older than the
//! window on each insert and before each report. All series live behind
//! one lock; readers prune too, so they take the same lock as writers.
//!
//! ## Reports
//!
//! - Bandwidth saved: lifetime `Σoriginal - Σcompact`
//! - Compression: `100 - 100 × Σcompact / Σoriginal` over the window
//! - Re-request rate: re-request events per inbound block, as a percentage
//! - Latency: mean and 95th percentile over the window

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Time-keyed samples with expiry.
///
/// Keys are `(timestamp_ms, sequence)` so samples in the same millisecond
/// do not overwrite each other.
#[derive(Debug, Clone)]
pub struct StatsWindow<T> {
    entries: BTreeMap<(u64, u64), T>,
    next_seq: u64,
}

impl<T> Default for StatsWindow<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> StatsWindow<T> {
    pub fn record(&mut self, now_ms: u64, window_ms: u64, value: T) {
        self.expire(now_ms, window_ms);
        self.entries.insert((now_ms, self.next_seq), value);
        self.next_seq += 1;
    }

    /// Drop samples older than `now_ms - window_ms`.
    pub fn expire(&mut self, now_ms: u64, window_ms: u64) {
        let cutoff = now_ms.saturating_sub(window_ms);
        self.entries = self.entries.split_off(&(cutoff, 0));
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Mean and 95th percentile of a latency series, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean: f64,
    pub p95: f64,
}

impl LatencySummary {
    pub fn from_samples(samples: impl Iterator<Item = f64>) -> Self {
        let mut sorted: Vec<f64> = samples.collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let index = ((n as f64 * 0.95 + 0.5) as usize).saturating_sub(1).min(n - 1);
        Self {
            samples: n,
            mean,
            p95: sorted[index],
        }
    }
}

/// Quick snapshot for diagnostics, taken under a single lock.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_inbound: u64,
    pub total_outbound: u64,
    pub total_bandwidth_saved: u64,
    pub last_24h_inbound: usize,
    pub last_24h_inbound_compression: f64,
    pub last_24h_outbound: usize,
    pub last_24h_outbound_compression: f64,
    pub last_24h_rerequests: usize,
    pub last_24h_rerequest_percent: f64,
}

#[derive(Debug, Default)]
struct LifetimeTotals {
    inbound_blocks: u64,
    outbound_blocks: u64,
    original_bytes: u64,
    compact_bytes: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    inbound: StatsWindow<(u64, u64)>,
    outbound: StatsWindow<(u64, u64)>,
    response_time: StatsWindow<f64>,
    validation_time: StatsWindow<f64>,
    rerequested_tx: StatsWindow<usize>,
    compact_block_size: StatsWindow<u64>,
    full_tx_size: StatsWindow<u64>,
    totals: LifetimeTotals,
}

impl StatsInner {
    fn bandwidth_saved(&self) -> u64 {
        self.totals
            .original_bytes
            .saturating_sub(self.totals.compact_bytes)
    }

    fn compression(window: &mut StatsWindow<(u64, u64)>, now: u64, span: u64) -> f64 {
        window.expire(now, span);
        let (compact, original) = window
            .values()
            .fold((0u64, 0u64), |(c, o), (cs, os)| (c + cs, o + os));
        if original == 0 {
            0.0
        } else {
            100.0 - 100.0 * compact as f64 / original as f64
        }
    }

    fn rerequest_percent(&mut self, now: u64, span: u64) -> f64 {
        self.inbound.expire(now, span);
        self.rerequested_tx.expire(now, span);
        if self.inbound.is_empty() {
            0.0
        } else {
            100.0 * self.rerequested_tx.len() as f64 / self.inbound.len() as f64
        }
    }
}

/// Rolling bandwidth statistics shared by all peers.
#[derive(Debug)]
pub struct BandwidthStatsTracker {
    inner: Mutex<StatsInner>,
    window_ms: u64,
}

impl BandwidthStatsTracker {
    pub fn new(window_ms: u64) -> Self {
        Self {
            inner: Mutex::new(StatsInner::default()),
            window_ms,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    // =========================================================================
    // RECORDING
    // =========================================================================

    pub fn record_inbound(&self, now_ms: u64, compact_size: u64, original_size: u64) {
        let mut inner = self.inner.lock();
        inner.totals.inbound_blocks += 1;
        inner.totals.original_bytes += original_size;
        inner.totals.compact_bytes += compact_size;
        inner
            .inbound
            .record(now_ms, self.window_ms, (compact_size, original_size));
    }

    pub fn record_outbound(&self, now_ms: u64, compact_size: u64, original_size: u64) {
        let mut inner = self.inner.lock();
        inner.totals.outbound_blocks += 1;
        inner.totals.original_bytes += original_size;
        inner.totals.compact_bytes += compact_size;
        inner
            .outbound
            .record(now_ms, self.window_ms, (compact_size, original_size));
    }

    pub fn record_response_time(&self, now_ms: u64, seconds: f64) {
        self.inner
            .lock()
            .response_time
            .record(now_ms, self.window_ms, seconds);
    }

    pub fn record_validation_time(&self, now_ms: u64, seconds: f64) {
        self.inner
            .lock()
            .validation_time
            .record(now_ms, self.window_ms, seconds);
    }

    pub fn record_rerequested_tx(&self, now_ms: u64, count: usize) {
        self.inner
            .lock()
            .rerequested_tx
            .record(now_ms, self.window_ms, count);
    }

    pub fn record_compact_block_size(&self, now_ms: u64, bytes: u64) {
        self.inner
            .lock()
            .compact_block_size
            .record(now_ms, self.window_ms, bytes);
    }

    pub fn record_full_tx_size(&self, now_ms: u64, bytes: u64) {
        self.inner
            .lock()
            .full_tx_size
            .record(now_ms, self.window_ms, bytes);
    }

    // =========================================================================
    // REPORTS
    // =========================================================================

    pub fn total_bandwidth_saved(&self) -> u64 {
        self.inner.lock().bandwidth_saved()
    }

    /// `(blocks, compression %)` for inbound blocks in the window.
    pub fn inbound_compression(&self, now_ms: u64) -> (usize, f64) {
        let mut inner = self.inner.lock();
        let rate = StatsInner::compression(&mut inner.inbound, now_ms, self.window_ms);
        (inner.inbound.len(), rate)
    }

    pub fn outbound_compression(&self, now_ms: u64) -> (usize, f64) {
        let mut inner = self.inner.lock();
        let rate = StatsInner::compression(&mut inner.outbound, now_ms, self.window_ms);
        (inner.outbound.len(), rate)
    }

    /// `(re-request events, % of inbound blocks)` in the window.
    pub fn rerequest_rate(&self, now_ms: u64) -> (usize, f64) {
        let mut inner = self.inner.lock();
        let rate = inner.rerequest_percent(now_ms, self.window_ms);
        (inner.rerequested_tx.len(), rate)
    }

    pub fn response_time(&self, now_ms: u64) -> LatencySummary {
        let mut inner = self.inner.lock();
        inner.response_time.expire(now_ms, self.window_ms);
        LatencySummary::from_samples(inner.response_time.values().copied())
    }

    pub fn validation_time(&self, now_ms: u64) -> LatencySummary {
        let mut inner = self.inner.lock();
        inner.validation_time.expire(now_ms, self.window_ms);
        LatencySummary::from_samples(inner.validation_time.values().copied())
    }

    pub fn average_compact_block_size(&self, now_ms: u64) -> f64 {
        let mut inner = self.inner.lock();
        average(&mut inner.compact_block_size, now_ms, self.window_ms)
    }

    pub fn average_full_tx_size(&self, now_ms: u64) -> f64 {
        let mut inner = self.inner.lock();
        average(&mut inner.full_tx_size, now_ms, self.window_ms)
    }

    /// Samples left in the response time series after expiry.
    pub fn response_time_samples(&self, now_ms: u64) -> usize {
        self.response_time(now_ms).samples
    }

    pub fn snapshot(&self, now_ms: u64) -> StatsSnapshot {
        let mut inner = self.inner.lock();
        let span = self.window_ms;
        let inbound_rate = StatsInner::compression(&mut inner.inbound, now_ms, span);
        let outbound_rate = StatsInner::compression(&mut inner.outbound, now_ms, span);
        let rerequest_rate = inner.rerequest_percent(now_ms, span);
        StatsSnapshot {
            total_inbound: inner.totals.inbound_blocks,
            total_outbound: inner.totals.outbound_blocks,
            total_bandwidth_saved: inner.bandwidth_saved(),
            last_24h_inbound: inner.inbound.len(),
            last_24h_inbound_compression: inbound_rate,
            last_24h_outbound: inner.outbound.len(),
            last_24h_outbound_compression: outbound_rate,
            last_24h_rerequests: inner.rerequested_tx.len(),
            last_24h_rerequest_percent: rerequest_rate,
        }
    }

    pub fn clear(&self) {
        *self.inner.lock() = StatsInner::default();
    }

    // =========================================================================
    // TEXT REPORTS
    // =========================================================================

    pub fn summary_string(&self) -> String {
        let inner = self.inner.lock();
        format!(
            "{} inbound and {} outbound compactblocks have saved {} of bandwidth",
            inner.totals.inbound_blocks,
            inner.totals.outbound_blocks,
            format_info_unit(inner.bandwidth_saved() as f64)
        )
    }

    pub fn inbound_percent_string(&self, now_ms: u64) -> String {
        let (count, rate) = self.inbound_compression(now_ms);
        format!(
            "Compression for {} Inbound  compactblocks (last 24hrs): {:.1}%",
            count, rate
        )
    }

    pub fn outbound_percent_string(&self, now_ms: u64) -> String {
        let (count, rate) = self.outbound_compression(now_ms);
        format!(
            "Compression for {} Outbound compactblocks (last 24hrs): {:.1}%",
            count, rate
        )
    }

    pub fn response_time_string(&self, now_ms: u64) -> String {
        let s = self.response_time(now_ms);
        format!(
            "Response time   (last 24hrs) AVG:{:.2}, 95th pcntl:{:.2}",
            s.mean, s.p95
        )
    }

    pub fn validation_time_string(&self, now_ms: u64) -> String {
        let s = self.validation_time(now_ms);
        format!(
            "Validation time (last 24hrs) AVG:{:.2}, 95th pcntl:{:.2}",
            s.mean, s.p95
        )
    }

    pub fn rerequested_tx_string(&self, now_ms: u64) -> String {
        let (count, rate) = self.rerequest_rate(now_ms);
        format!(
            "Tx re-request rate (last 24hrs): {:.1}% Total re-requests:{}",
            rate, count
        )
    }

    pub fn compact_block_size_string(&self, now_ms: u64) -> String {
        format!(
            "CompactBlock size (last 24hrs) AVG: {}",
            format_info_unit(self.average_compact_block_size(now_ms))
        )
    }

    pub fn full_tx_size_string(&self, now_ms: u64) -> String {
        format!(
            "compactblock full transactions size (last 24hrs) AVG: {}",
            format_info_unit(self.average_full_tx_size(now_ms))
        )
    }
}

fn average(window: &mut StatsWindow<u64>, now_ms: u64, span: u64) -> f64 {
    window.expire(now_ms, span);
    if window.is_empty() {
        return 0.0;
    }
    window.values().sum::<u64>() as f64 / window.len() as f64
}

/// Human-readable byte count with decimal units.
pub fn format_info_unit(bytes: f64) -> String {
    const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    let mut value = bytes;
    let mut unit = 0;
    while value > 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;
    const HOUR_MS: u64 = 60 * 60 * 1000;

    #[test]
    fn test_samples_expire_after_window() {
        let stats = BandwidthStatsTracker::new(DAY_MS);
        let start = 10 * DAY_MS;
        for i in 0..100 {
            stats.record_response_time(start, i as f64);
        }
        assert_eq!(stats.response_time_samples(start), 100);
        assert_eq!(stats.response_time_samples(start + 25 * HOUR_MS), 0);
    }

    #[test]
    fn test_insert_purges_same_series() {
        let mut window = StatsWindow::default();
        window.record(0, 1_000, 1u64);
        window.record(500, 1_000, 2u64);
        window.record(1_600, 1_000, 3u64);
        let left: Vec<u64> = window.values().copied().collect();
        assert_eq!(left, vec![3]);
    }

    #[test]
    fn test_compression_and_savings() {
        let stats = BandwidthStatsTracker::new(DAY_MS);
        stats.record_inbound(1_000, 100, 1_000);
        stats.record_inbound(1_000, 300, 1_000);

        let (count, rate) = stats.inbound_compression(2_000);
        assert_eq!(count, 2);
        assert!((rate - 80.0).abs() < 1e-9);
        assert_eq!(stats.total_bandwidth_saved(), 1_600);
        assert_eq!(
            stats.inbound_percent_string(2_000),
            "Compression for 2 Inbound  compactblocks (last 24hrs): 80.0%"
        );
    }

    #[test]
    fn test_rerequest_percent() {
        let stats = BandwidthStatsTracker::new(DAY_MS);
        for _ in 0..4 {
            stats.record_inbound(1_000, 10, 100);
        }
        stats.record_rerequested_tx(1_000, 3);
        let (count, rate) = stats.rerequest_rate(1_000);
        assert_eq!(count, 1);
        assert!((rate - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_latency_percentile() {
        let summary = LatencySummary::from_samples((1..=20).map(f64::from));
        assert_eq!(summary.samples, 20);
        assert!((summary.mean - 10.5).abs() < 1e-9);
        // index = (20 * 0.95 + 0.5) as usize - 1 = 18
        assert_eq!(summary.p95, 19.0);

        let single = LatencySummary::from_samples(std::iter::once(4.0));
        assert_eq!(single.p95, 4.0);
        assert_eq!(LatencySummary::from_samples(std::iter::empty()).samples, 0);
    }

    #[test]
    fn test_snapshot_and_clear() {
        let stats = BandwidthStatsTracker::new(DAY_MS);
        stats.record_inbound(0, 10, 100);
        stats.record_outbound(0, 20, 100);
        let snap = stats.snapshot(0);
        assert_eq!(snap.total_inbound, 1);
        assert_eq!(snap.total_outbound, 1);
        assert_eq!(snap.total_bandwidth_saved, 170);
        assert!((snap.last_24h_outbound_compression - 80.0).abs() < 1e-9);

        stats.clear();
        assert_eq!(stats.snapshot(0), StatsSnapshot::default());
    }

    #[test]
    fn test_format_info_unit() {
        assert_eq!(format_info_unit(512.0), "512.00B");
        assert_eq!(format_info_unit(1_500_000.0), "1.50MB");
    }
}
