use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::entities::connection_state::ConnectionState;

/// Traffic counters for the current connection.
///
/// Reset on every successful open; monotonically updated in between.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatistics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub average_latency_ms: f64,
    pub last_message_sent_at: Option<DateTime<Utc>>,
    pub last_message_received_at: Option<DateTime<Utc>>,
    pub last_ping_sent_at: Option<DateTime<Utc>>,
    pub last_pong_received_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    latency_samples: u64,
    #[serde(skip)]
    outstanding_ping: Option<DateTime<Utc>>,
}

impl ConnectionStatistics {
    pub fn reset(&mut self, connected_at: DateTime<Utc>) {
        *self = Self {
            connected_at: Some(connected_at),
            ..Self::default()
        };
    }

    pub fn record_sent(&mut self, bytes: usize, at: DateTime<Utc>) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
        self.last_message_sent_at = Some(at);
    }

    pub fn record_received(&mut self, bytes: usize, at: DateTime<Utc>) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
        self.last_message_received_at = Some(at);
    }

    pub fn record_ping(&mut self, at: DateTime<Utc>) {
        self.last_ping_sent_at = Some(at);
        self.outstanding_ping = Some(at);
    }

    /// Folds the ping/pong round trip into the running latency mean.
    /// Each ping yields at most one sample; a pong with no outstanding
    /// ping only updates the timestamp.
    pub fn record_pong(&mut self, at: DateTime<Utc>) {
        self.last_pong_received_at = Some(at);

        let Some(ping_at) = self.outstanding_ping.take() else {
            return;
        };
        let sample = (at - ping_at).num_milliseconds().max(0) as f64;
        self.latency_samples += 1;
        self.average_latency_ms +=
            (sample - self.average_latency_ms) / self.latency_samples as f64;
    }
}

/// Read-only snapshot handed to consumers; the manager owns the live copy.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub url: Option<String>,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub maximum_reconnect_delay_ms: u64,
    pub statistics: ConnectionStatistics,
    pub created_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(url: Option<String>, base_delay_ms: u64, maximum_delay_ms: u64) -> Self {
        Self {
            url,
            state: ConnectionState::Idle,
            reconnect_attempts: 0,
            reconnect_delay_ms: base_delay_ms,
            maximum_reconnect_delay_ms: maximum_delay_ms,
            statistics: ConnectionStatistics::default(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_sent_and_received() {
        let mut stats = ConnectionStatistics::default();
        let now = Utc::now();
        stats.record_sent(10, now);
        stats.record_sent(5, now);
        stats.record_received(7, now);

        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 15);
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.bytes_received, 7);
        assert_eq!(stats.last_message_sent_at, Some(now));
        assert_eq!(stats.last_message_received_at, Some(now));
    }

    #[test]
    fn test_reset_keeps_only_connected_at() {
        let mut stats = ConnectionStatistics::default();
        let now = Utc::now();
        stats.record_sent(10, now);
        stats.record_received(10, now);
        stats.reset(now);

        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.messages_received, 0);
        assert_eq!(stats.connected_at, Some(now));
        assert!(stats.last_message_sent_at.is_none());
    }

    #[test]
    fn test_latency_running_mean() {
        let mut stats = ConnectionStatistics::default();
        let t0 = Utc::now();

        stats.record_ping(t0);
        stats.record_pong(t0 + Duration::milliseconds(100));
        assert_eq!(stats.average_latency_ms, 100.0);

        let t1 = t0 + Duration::seconds(10);
        stats.record_ping(t1);
        stats.record_pong(t1 + Duration::milliseconds(50));
        assert_eq!(stats.average_latency_ms, 75.0);
    }

    #[test]
    fn test_pong_without_ping_only_stamps_time() {
        let mut stats = ConnectionStatistics::default();
        let now = Utc::now();
        stats.record_pong(now);

        assert_eq!(stats.last_pong_received_at, Some(now));
        assert_eq!(stats.average_latency_ms, 0.0);
    }

    #[test]
    fn test_duplicate_pong_counts_once() {
        let mut stats = ConnectionStatistics::default();
        let t0 = Utc::now();
        let late = t0 + Duration::milliseconds(300);

        stats.record_ping(t0);
        stats.record_pong(t0 + Duration::milliseconds(100));
        stats.record_pong(late);

        assert_eq!(stats.average_latency_ms, 100.0);
        assert_eq!(stats.last_pong_received_at, Some(late));
        assert_eq!(stats.last_ping_sent_at, Some(t0));
    }

    #[test]
    fn test_info_serializes_camel_case() {
        let info = ConnectionInfo::new(Some("wss://example.test/ws".to_string()), 1000, 30000);
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(json["url"], "wss://example.test/ws");
        assert_eq!(json["state"], "Idle");
        assert_eq!(json["reconnectAttempts"], 0);
        assert_eq!(json["maximumReconnectDelayMs"], 30000);
        assert_eq!(json["statistics"]["messagesSent"], 0);
    }
}
