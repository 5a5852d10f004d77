//! Simulated WiFi radio for host builds and tests.
//!
//! Networks are registered on the [`SimWifiHandle`]; association succeeds
//! when the SSID is in range and the passphrase matches.  Events are
//! posted straight into the transport's sink, so the transport sees the
//! same asynchronous flow as on hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use heapless::String;
use log::info;

use super::driver::{
    REASON_ASSOC_LEAVE, ScanResult, ScanResults, WifiDriver, WifiDriverError, WifiEvent, WifiEventSink, WifiMode,
    WifiSecurity,
};
use crate::config::{WifiApConfig, WifiStationConfig};

/// Reason codes as reported by ESP-IDF.
const REASON_BEACON_TIMEOUT: u16 = 200;
const REASON_NO_AP_FOUND: u16 = 201;
const REASON_AUTH_FAIL: u16 = 202;

struct Network {
    ssid: std::string::String,
    password: std::string::String,
    rssi: i8,
    channel: u8,
}

/// A datagram handed to `send_datagram`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub host: std::string::String,
    pub port: u16,
    pub data: Vec<u8>,
}

struct SimState {
    sink: Option<WifiEventSink>,
    mode: WifiMode,
    networks: Vec<Network>,
    reachable: bool,
    last_station: Option<WifiStationConfig>,
    associated: Option<usize>,
    ap_clients: u8,
    begin_calls: u32,
    reconnect_calls: u32,
    bound_port: Option<u16>,
    sent: Vec<SentDatagram>,
    inbound: VecDeque<Vec<u8>>,
    fail_sends: bool,
    power_save: bool,
    tx_power: Option<i8>,
    hold_scans: bool,
}

#[derive(Clone)]
struct Shared(Arc<Mutex<SimState>>);

impl Shared {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub struct SimWifi {
    shared: Shared,
}

/// Test-side control of a [`SimWifi`].
#[derive(Clone)]
pub struct SimWifiHandle {
    shared: Shared,
}

impl SimWifi {
    pub fn new() -> (Self, SimWifiHandle) {
        let shared = Shared(Arc::new(Mutex::new(SimState {
            sink: None,
            mode: WifiMode::Off,
            networks: Vec::new(),
            reachable: true,
            last_station: None,
            associated: None,
            ap_clients: 0,
            begin_calls: 0,
            reconnect_calls: 0,
            bound_port: None,
            sent: Vec::new(),
            inbound: VecDeque::new(),
            fail_sends: false,
            power_save: false,
            tx_power: None,
            hold_scans: false,
        })));
        (Self { shared: shared.clone() }, SimWifiHandle { shared })
    }

    fn associate(&self) {
        let mut s = self.shared.state();
        let Some(cfg) = s.last_station.clone() else {
            return;
        };
        let found = s.networks.iter().position(|n| n.ssid == cfg.ssid.as_str());
        let outcome = match found {
            Some(i) if s.reachable && s.networks[i].password == cfg.password.as_str() => Ok(i),
            Some(_) if s.reachable => Err(REASON_AUTH_FAIL),
            _ => Err(REASON_NO_AP_FOUND),
        };
        match outcome {
            Ok(i) => {
                s.associated = Some(i);
                let (rssi, channel) = (s.networks[i].rssi, s.networks[i].channel);
                if let Some(sink) = &s.sink {
                    sink.post(WifiEvent::StaConnected { rssi, channel });
                    sink.post(WifiEvent::GotIp([192, 168, 1, 50]));
                }
                info!("WiFi(sim): associated with '{}'", cfg.ssid);
            }
            Err(reason) => {
                if let Some(sink) = &s.sink {
                    sink.post(WifiEvent::StaDisconnected { reason });
                }
                info!("WiFi(sim): association with '{}' failed (reason {})", cfg.ssid, reason);
            }
        }
    }

    fn scan(&self) -> ScanResults {
        let s = self.shared.state();
        let mut out = ScanResults::new();
        for n in &s.networks {
            let Ok(ssid) = String::try_from(n.ssid.as_str()) else {
                continue;
            };
            let security = if n.password.is_empty() { WifiSecurity::Open } else { WifiSecurity::Wpa2Psk };
            if out
                .push(ScanResult { ssid, rssi: n.rssi, channel: n.channel, security, hidden: false })
                .is_err()
            {
                break;
            }
        }
        out
    }
}

impl WifiDriver for SimWifi {
    fn attach_events(&mut self, sink: WifiEventSink) -> Result<(), WifiDriverError> {
        self.shared.state().sink = Some(sink);
        Ok(())
    }

    fn set_mode(&mut self, mode: WifiMode) -> Result<(), WifiDriverError> {
        let mut s = self.shared.state();
        if !mode.has_station() {
            s.associated = None;
        }
        s.mode = mode;
        Ok(())
    }

    fn begin_connect(&mut self, config: &WifiStationConfig) -> Result<(), WifiDriverError> {
        {
            let mut s = self.shared.state();
            if !s.mode.has_station() {
                return Err(WifiDriverError::NotStarted);
            }
            s.begin_calls += 1;
            s.last_station = Some(config.clone());
        }
        self.associate();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), WifiDriverError> {
        let mut s = self.shared.state();
        if s.associated.take().is_some() {
            if let Some(sink) = &s.sink {
                sink.post(WifiEvent::StaDisconnected { reason: REASON_ASSOC_LEAVE });
            }
        }
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), WifiDriverError> {
        self.shared.state().reconnect_calls += 1;
        self.associate();
        Ok(())
    }

    fn start_ap(&mut self, config: &WifiApConfig) -> Result<(), WifiDriverError> {
        let s = self.shared.state();
        if !s.mode.has_ap() {
            return Err(WifiDriverError::NotStarted);
        }
        if let Some(sink) = &s.sink {
            sink.post(WifiEvent::ApStarted);
        }
        info!("WiFi(sim): AP '{}' started", config.ssid);
        Ok(())
    }

    fn stop_ap(&mut self) -> Result<(), WifiDriverError> {
        let mut s = self.shared.state();
        s.ap_clients = 0;
        if let Some(sink) = &s.sink {
            sink.post(WifiEvent::ApStopped);
        }
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), WifiDriverError> {
        let s = self.shared.state();
        if s.hold_scans {
            return Ok(());
        }
        if let Some(sink) = &s.sink {
            sink.post(WifiEvent::ScanDone);
        }
        Ok(())
    }

    fn scan_results(&mut self) -> Result<ScanResults, WifiDriverError> {
        Ok(self.scan())
    }

    fn scan_blocking(&mut self) -> Result<ScanResults, WifiDriverError> {
        Ok(self.scan())
    }

    fn bind_datagram(&mut self, local_port: u16) -> Result<(), WifiDriverError> {
        self.shared.state().bound_port = Some(local_port);
        Ok(())
    }

    fn close_datagram(&mut self) {
        self.shared.state().bound_port = None;
    }

    fn send_datagram(&mut self, host: &str, port: u16, data: &[u8]) -> Result<(), WifiDriverError> {
        let mut s = self.shared.state();
        if s.fail_sends || s.associated.is_none() {
            return Err(WifiDriverError::Io);
        }
        s.sent.push(SentDatagram { host: host.into(), port, data: data.to_vec() });
        Ok(())
    }

    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Option<usize>, WifiDriverError> {
        let mut s = self.shared.state();
        if s.bound_port.is_none() {
            return Ok(None);
        }
        let Some(data) = s.inbound.pop_front() else {
            return Ok(None);
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(Some(len))
    }

    fn ip_address(&self) -> Option<[u8; 4]> {
        self.shared.state().associated.map(|_| [192, 168, 1, 50])
    }

    fn mac_address(&self) -> [u8; 6] {
        [0x02, 0x00, 0x5E, 0x10, 0x20, 0x30]
    }

    fn rssi(&self) -> Option<i8> {
        let s = self.shared.state();
        s.associated.map(|i| s.networks[i].rssi)
    }

    fn channel(&self) -> Option<u8> {
        let s = self.shared.state();
        s.associated.map(|i| s.networks[i].channel)
    }

    fn ap_client_count(&self) -> u8 {
        self.shared.state().ap_clients
    }

    fn set_power_save(&mut self, enabled: bool) -> Result<(), WifiDriverError> {
        self.shared.state().power_save = enabled;
        Ok(())
    }

    fn set_tx_power(&mut self, dbm: i8) -> Result<(), WifiDriverError> {
        self.shared.state().tx_power = Some(dbm);
        Ok(())
    }
}

impl SimWifiHandle {
    /// Put a network in range.  An empty password makes it open.
    pub fn add_network(&self, ssid: &str, password: &str, rssi: i8, channel: u8) {
        self.shared.state().networks.push(Network {
            ssid: ssid.into(),
            password: password.into(),
            rssi,
            channel,
        });
    }

    /// Make every network unreachable (or reachable again).
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state().reachable = reachable;
    }

    /// Drop the current association as if the AP vanished.
    pub fn drop_link(&self) -> bool {
        let mut s = self.shared.state();
        if s.associated.take().is_none() {
            return false;
        }
        if let Some(sink) = &s.sink {
            sink.post(WifiEvent::StaDisconnected { reason: REASON_BEACON_TIMEOUT });
        }
        true
    }

    /// Queue a datagram for the bound local port.
    pub fn inject_datagram(&self, data: &[u8]) {
        self.shared.state().inbound.push_back(data.to_vec());
    }

    /// Leave background scans running until [`Self::finish_scan`].
    pub fn hold_scans(&self, hold: bool) {
        self.shared.state().hold_scans = hold;
    }

    pub fn finish_scan(&self) {
        if let Some(sink) = &self.shared.state().sink {
            sink.post(WifiEvent::ScanDone);
        }
    }

    pub fn fail_sends(&self, fail: bool) {
        self.shared.state().fail_sends = fail;
    }

    /// A station joins the soft-AP.
    pub fn join_ap_client(&self) {
        let mut s = self.shared.state();
        s.ap_clients = s.ap_clients.saturating_add(1);
        if let Some(sink) = &s.sink {
            sink.post(WifiEvent::ApClientJoined);
        }
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.shared.state().sent.clone()
    }

    pub fn bound_port(&self) -> Option<u16> {
        self.shared.state().bound_port
    }

    pub fn begin_calls(&self) -> u32 {
        self.shared.state().begin_calls
    }

    pub fn reconnect_calls(&self) -> u32 {
        self.shared.state().reconnect_calls
    }

    pub fn mode(&self) -> WifiMode {
        self.shared.state().mode
    }

    pub fn power_save(&self) -> bool {
        self.shared.state().power_save
    }

    pub fn tx_power(&self) -> Option<i8> {
        self.shared.state().tx_power
    }
}
