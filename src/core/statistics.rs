//! Per-connection traffic statistics
//!
//! Throughput is a running average since the connection started
//! (cumulative bytes divided by elapsed seconds), recomputed on every
//! recorded event and on every refresh tick.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Link quality derived from the error ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityStatus {
    /// No traffic yet
    Idle,
    /// Error ratio below 2%
    Excellent,
    /// Error ratio below 10%
    Good,
    /// Error ratio 10% or more
    Warning,
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Excellent => write!(f, "Excellent"),
            Self::Good => write!(f, "Good"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatistics {
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    bytes_received: u64,
    bytes_sent: u64,
    messages_received: u64,
    messages_sent: u64,
    error_count: u64,
    rate_received: f64,
    rate_sent: f64,
    peak_received: f64,
    peak_sent: f64,
}

/// Point-in-time copy of the statistics, published on each refresh tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    /// Connection is live (started and not ended)
    pub is_connected: bool,
    /// Connection duration
    pub duration: Duration,
    /// Bytes received
    pub bytes_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Messages sent
    pub messages_sent: u64,
    /// Errors recorded
    pub error_count: u64,
    /// Receive throughput (bytes/s)
    pub bytes_per_second_received: f64,
    /// Send throughput (bytes/s)
    pub bytes_per_second_sent: f64,
    /// Peak receive throughput (bytes/s)
    pub peak_bytes_per_second_received: f64,
    /// Peak send throughput (bytes/s)
    pub peak_bytes_per_second_sent: f64,
    /// Link quality
    pub quality: QualityStatus,
}

impl ConnectionStatistics {
    /// Create empty statistics (not started)
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all counters and peaks, and start timing now
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    /// Clear all counters and peaks, and start timing at `now`
    pub fn reset_at(&mut self, now: Instant) {
        *self = Self {
            started_at: Some(now),
            ..Self::default()
        };
    }

    /// Freeze the statistics at disconnect
    pub fn end_connection(&mut self) {
        self.end_connection_at(Instant::now());
    }

    /// Freeze the statistics at `now`
    pub fn end_connection_at(&mut self, now: Instant) {
        if self.started_at.is_some() && self.ended_at.is_none() {
            self.recompute(now);
            self.ended_at = Some(now);
        }
    }

    /// Record an inbound chunk
    pub fn record_received(&mut self, byte_count: usize) {
        self.record_received_at(byte_count, Instant::now());
    }

    /// Record an inbound chunk observed at `now`
    pub fn record_received_at(&mut self, byte_count: usize, now: Instant) {
        if !self.is_live() {
            return;
        }
        self.bytes_received += byte_count as u64;
        self.messages_received += 1;
        self.recompute(now);
    }

    /// Record an outbound message
    pub fn record_sent(&mut self, byte_count: usize) {
        self.record_sent_at(byte_count, Instant::now());
    }

    /// Record an outbound message sent at `now`
    pub fn record_sent_at(&mut self, byte_count: usize, now: Instant) {
        if !self.is_live() {
            return;
        }
        self.bytes_sent += byte_count as u64;
        self.messages_sent += 1;
        self.recompute(now);
    }

    /// Record a failed operation
    pub fn record_error(&mut self) {
        if self.is_live() {
            self.error_count += 1;
        }
    }

    /// Recompute rates for the refresh timer
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Recompute rates as of `now`
    pub fn tick_at(&mut self, now: Instant) {
        if self.is_live() {
            self.recompute(now);
        }
    }

    fn recompute(&mut self, now: Instant) {
        let elapsed = self.elapsed_until(now).as_secs_f64();

        if elapsed > 0.0 {
            self.rate_received = self.bytes_received as f64 / elapsed;
            self.rate_sent = self.bytes_sent as f64 / elapsed;
        } else {
            self.rate_received = 0.0;
            self.rate_sent = 0.0;
        }

        self.peak_received = self.peak_received.max(self.rate_received);
        self.peak_sent = self.peak_sent.max(self.rate_sent);
    }

    fn elapsed_until(&self, now: Instant) -> Duration {
        match self.started_at {
            Some(start) => self.ended_at.unwrap_or(now).saturating_duration_since(start),
            None => Duration::ZERO,
        }
    }

    /// Started and not yet ended
    pub fn is_live(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    /// Connection duration (frozen after disconnect)
    pub fn duration(&self) -> Duration {
        self.elapsed_until(Instant::now())
    }

    /// Bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes in both directions
    pub fn total_bytes(&self) -> u64 {
        self.bytes_received + self.bytes_sent
    }

    /// Messages received
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Messages sent
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Total messages in both directions
    pub fn total_messages(&self) -> u64 {
        self.messages_received + self.messages_sent
    }

    /// Errors recorded
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Receive throughput at the last recompute
    pub fn bytes_per_second_received(&self) -> f64 {
        self.rate_received
    }

    /// Send throughput at the last recompute
    pub fn bytes_per_second_sent(&self) -> f64 {
        self.rate_sent
    }

    /// Highest receive throughput seen this connection
    pub fn peak_bytes_per_second_received(&self) -> f64 {
        self.peak_received
    }

    /// Highest send throughput seen this connection
    pub fn peak_bytes_per_second_sent(&self) -> f64 {
        self.peak_sent
    }

    /// Messages per second in both directions
    pub fn messages_per_second(&self) -> f64 {
        let elapsed = self.duration().as_secs_f64();
        if elapsed > 0.0 {
            self.total_messages() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Average inbound message size
    pub fn average_message_size_received(&self) -> f64 {
        average(self.bytes_received, self.messages_received)
    }

    /// Average outbound message size
    pub fn average_message_size_sent(&self) -> f64 {
        average(self.bytes_sent, self.messages_sent)
    }

    /// Link quality from the error ratio
    pub fn quality(&self) -> QualityStatus {
        let total = self.total_messages();
        if total == 0 {
            return QualityStatus::Idle;
        }

        let score = (1.0 - self.error_count as f64 / total as f64).max(0.0);
        if score > 0.98 {
            QualityStatus::Excellent
        } else if score > 0.9 {
            QualityStatus::Good
        } else {
            QualityStatus::Warning
        }
    }

    /// Copy the current values
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            is_connected: self.is_live(),
            duration: self.duration(),
            bytes_received: self.bytes_received,
            bytes_sent: self.bytes_sent,
            messages_received: self.messages_received,
            messages_sent: self.messages_sent,
            error_count: self.error_count,
            bytes_per_second_received: self.rate_received,
            bytes_per_second_sent: self.rate_sent,
            peak_bytes_per_second_received: self.peak_received,
            peak_bytes_per_second_sent: self.peak_sent,
            quality: self.quality(),
        }
    }

    /// Multi-line human-readable summary
    pub fn summary(&self) -> String {
        let secs = self.duration().as_secs();
        format!(
            "Duration: {:02}:{:02}:{:02}\n\
             Total Bytes: {} (RX: {}, TX: {})\n\
             Total Messages: {} (RX: {}, TX: {})\n\
             Throughput: RX {} / TX {} (peak RX {} / TX {})\n\
             Message Rate: {:.2} msg/sec\n\
             Errors: {} ({})",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            format_bytes(self.total_bytes() as f64),
            format_bytes(self.bytes_received as f64),
            format_bytes(self.bytes_sent as f64),
            self.total_messages(),
            self.messages_received,
            self.messages_sent,
            format_rate(self.rate_received),
            format_rate(self.rate_sent),
            format_rate(self.peak_received),
            format_rate(self.peak_sent),
            self.messages_per_second(),
            self.error_count,
            self.quality(),
        )
    }
}

fn average(bytes: u64, messages: u64) -> f64 {
    if messages > 0 {
        bytes as f64 / messages as f64
    } else {
        0.0
    }
}

/// Format a byte count as `"1.5 KB"`
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format a throughput as `"1.5 KB/s"`
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
