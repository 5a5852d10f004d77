//! WiFi driver port and its event channel.
//!
//! The driver raises association, addressing and scan events from whatever
//! context the platform uses (the ESP-IDF system event task on hardware).
//! They land in a bounded [`WifiEventSink`]; the transport's worker drains
//! it and owns all state transitions.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;
use serde::Serialize;

use crate::config::{Ssid, WifiApConfig, WifiStationConfig};

/// Scan entries retained per scan.
pub const MAX_SCAN_RESULTS: usize = 24;
/// Driver events buffered between the platform and the worker.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Disconnect reason posted when the station leaves on request.
pub const REASON_ASSOC_LEAVE: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiDriverError {
    InvalidArg,
    /// Radio not started or wrong mode for the request.
    NotStarted,
    Timeout,
    /// Socket-level failure on the datagram path.
    Io,
    /// Raw platform error code.
    Esp(i32),
}

impl fmt::Display for WifiDriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArg => write!(f, "invalid argument"),
            Self::NotStarted => write!(f, "driver not started"),
            Self::Timeout => write!(f, "timed out"),
            Self::Io => write!(f, "socket error"),
            Self::Esp(code) => write!(f, "esp error {code}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WifiMode {
    Off,
    Station,
    AccessPoint,
    StationAndAccessPoint,
}

impl WifiMode {
    pub const fn has_station(self) -> bool {
        matches!(self, Self::Station | Self::StationAndAccessPoint)
    }

    pub const fn has_ap(self) -> bool {
        matches!(self, Self::AccessPoint | Self::StationAndAccessPoint)
    }

    pub const fn from_parts(station: bool, ap: bool) -> Self {
        match (station, ap) {
            (true, true) => Self::StationAndAccessPoint,
            (true, false) => Self::Station,
            (false, true) => Self::AccessPoint,
            (false, false) => Self::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WifiSecurity {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa3Psk,
    Wpa2Wpa3Psk,
    Wpa2Enterprise,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub ssid: Ssid,
    pub rssi: i8,
    pub channel: u8,
    pub security: WifiSecurity,
    /// Broadcast with an empty SSID.
    pub hidden: bool,
}

pub type ScanResults = Vec<ScanResult, MAX_SCAN_RESULTS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEvent {
    StaConnected { rssi: i8, channel: u8 },
    StaDisconnected { reason: u16 },
    GotIp([u8; 4]),
    ScanDone,
    ApStarted,
    ApStopped,
    ApClientJoined,
    ApClientLeft,
}

// ── Event sink ────────────────────────────────────────────────

type EventChannel = Channel<CriticalSectionRawMutex, WifiEvent, EVENT_QUEUE_DEPTH>;

/// Producer/consumer handle on the driver event queue.  Never blocks.
#[derive(Clone)]
pub struct WifiEventSink {
    channel: Arc<EventChannel>,
    dropped: Arc<AtomicU32>,
}

impl WifiEventSink {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Channel::new()),
            dropped: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Queue `event`.  Returns `false` and counts a drop when full.
    pub fn post(&self, event: WifiEvent) -> bool {
        if self.channel.try_send(event).is_ok() {
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn next(&self) -> Option<WifiEvent> {
        self.channel.try_receive().ok()
    }

    pub fn clear(&self) {
        self.channel.clear();
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for WifiEventSink {
    fn default() -> Self {
        Self::new()
    }
}

// ── Driver port ───────────────────────────────────────────────

pub trait WifiDriver: Send + 'static {
    /// Route platform events to `sink`.  Called once by `initialize`.
    fn attach_events(&mut self, sink: WifiEventSink) -> Result<(), WifiDriverError>;

    fn set_mode(&mut self, mode: WifiMode) -> Result<(), WifiDriverError>;

    /// Start association; the outcome arrives as an event.
    fn begin_connect(&mut self, config: &WifiStationConfig) -> Result<(), WifiDriverError>;
    fn disconnect(&mut self) -> Result<(), WifiDriverError>;
    /// Retry association with the last station configuration.
    fn reconnect(&mut self) -> Result<(), WifiDriverError>;

    fn start_ap(&mut self, config: &WifiApConfig) -> Result<(), WifiDriverError>;
    fn stop_ap(&mut self) -> Result<(), WifiDriverError>;

    /// Start a scan; completion posts [`WifiEvent::ScanDone`].
    fn start_scan(&mut self) -> Result<(), WifiDriverError>;
    /// Results of the last completed asynchronous scan.
    fn scan_results(&mut self) -> Result<ScanResults, WifiDriverError>;
    /// Scan and wait for the result.
    fn scan_blocking(&mut self) -> Result<ScanResults, WifiDriverError>;

    /// Bind the local datagram port.
    fn bind_datagram(&mut self, local_port: u16) -> Result<(), WifiDriverError>;
    fn close_datagram(&mut self);
    fn send_datagram(&mut self, host: &str, port: u16, data: &[u8]) -> Result<(), WifiDriverError>;
    /// Non-blocking; `Ok(None)` when nothing is pending.
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Option<usize>, WifiDriverError>;

    fn ip_address(&self) -> Option<[u8; 4]>;
    fn mac_address(&self) -> [u8; 6];
    fn rssi(&self) -> Option<i8>;
    fn channel(&self) -> Option<u8>;
    fn ap_client_count(&self) -> u8;

    fn set_power_save(&mut self, enabled: bool) -> Result<(), WifiDriverError>;
    fn set_tx_power(&mut self, dbm: i8) -> Result<(), WifiDriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_is_bounded_and_counts_drops() {
        let sink = WifiEventSink::new();
        for _ in 0..EVENT_QUEUE_DEPTH {
            assert!(sink.post(WifiEvent::ScanDone));
        }
        assert!(!sink.post(WifiEvent::ApStarted));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(sink.next(), Some(WifiEvent::ScanDone));
    }

    #[test]
    fn mode_composition() {
        assert_eq!(WifiMode::from_parts(true, true), WifiMode::StationAndAccessPoint);
        assert!(WifiMode::AccessPoint.has_ap());
        assert!(!WifiMode::AccessPoint.has_station());
    }
}
