//! Per-transport statistics.
//!
//! Counters are monotonically non-decreasing between resets.  Each
//! transport keeps its own struct behind its own lock; the coordinator
//! aggregates snapshots into [`CommsStats`].

use serde::Serialize;

/// Counters common to every transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkCounters {
    pub messages_sent: u32,
    pub bytes_sent: u64,
    pub messages_received: u32,
    pub bytes_received: u64,
    pub send_errors: u32,
    pub receive_errors: u32,
}

impl LinkCounters {
    pub fn record_sent(&mut self, len: usize) {
        self.messages_sent = self.messages_sent.saturating_add(1);
        self.bytes_sent = self.bytes_sent.saturating_add(len as u64);
    }

    pub fn record_received(&mut self, len: usize) {
        self.messages_received = self.messages_received.saturating_add(1);
        self.bytes_received = self.bytes_received.saturating_add(len as u64);
    }

    pub fn record_send_error(&mut self) {
        self.send_errors = self.send_errors.saturating_add(1);
    }

    pub fn record_receive_error(&mut self) {
        self.receive_errors = self.receive_errors.saturating_add(1);
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RadioStats {
    pub link: LinkCounters,
    pub crc_errors: u32,
    /// dBm of the most recent packet.
    pub last_rssi: f32,
    /// dB of the most recent packet.
    pub last_snr: f32,
    /// Hz of the most recent packet.
    pub last_freq_error: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WifiStats {
    pub link: LinkCounters,
    pub connect_attempts: u32,
    pub successful_connections: u32,
    pub disconnections: u32,
    pub reconnections: u32,
    pub scan_count: u32,
    pub last_rssi: i8,
    pub last_channel: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CellularStats {
    pub link: LinkCounters,
    pub connect_attempts: u32,
    pub successful_connections: u32,
    pub disconnections: u32,
    pub sms_sent: u32,
    pub sms_received: u32,
    /// dBm derived from `AT+CSQ`; 0 when unknown.
    pub last_rssi: i16,
    /// Raw CSQ value (0-31, 99 = unknown).
    pub last_signal_quality: u8,
}

/// Aggregate snapshot across all transports plus coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CommsStats {
    pub radio: RadioStats,
    pub wifi: WifiStats,
    pub cellular: CellularStats,
    /// Active-interface changes made by selection.
    pub interface_switches: u32,
    /// Sends rescued by failover.
    pub failovers: u32,
}

impl CommsStats {
    /// Every counter zero (signal readings included).
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Total messages sent over all transports.
    pub fn total_sent(&self) -> u32 {
        self.radio
            .link
            .messages_sent
            .saturating_add(self.wifi.link.messages_sent)
            .saturating_add(self.cellular.link.messages_sent)
    }

    /// Compact JSON rendering for diagnostics logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert!(CommsStats::default().is_zero());
        assert!(LinkCounters::default().is_zero());
    }

    #[test]
    fn total_sent_saturates() {
        let mut stats = CommsStats::default();
        stats.radio.link.messages_sent = u32::MAX;
        stats.cellular.link.messages_sent = 1;
        assert_eq!(stats.total_sent(), u32::MAX);
    }

    #[test]
    fn counters_accumulate() {
        let mut c = LinkCounters::default();
        c.record_sent(16);
        c.record_sent(4);
        c.record_send_error();
        assert_eq!(c.messages_sent, 2);
        assert_eq!(c.bytes_sent, 20);
        assert_eq!(c.send_errors, 1);
        assert!(!c.is_zero());
    }

    #[test]
    fn json_report_contains_transport_sections() {
        let mut s = CommsStats::default();
        s.wifi.scan_count = 2;
        let json = s.to_json();
        assert!(json.contains("\"radio\""));
        assert!(json.contains("\"scan_count\":2"));
    }
}
