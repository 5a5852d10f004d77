//! WiFi station / access-point transport.
//!
//! ```text
//!  connect() ──▶ Connecting ──connected──▶ Connected ──disconnected──▶ LostConnection
//!                    │                                                   │   ▲
//!                    └─disconnected─▶ Failed          retry (interval) ──┘   │
//!                                       ▲                   │ disconnected ──┘
//!                                       └── retries spent ──┘
//! ```
//!
//! Driver events are drained by the `wifi` worker thread, which also owns
//! the reconnection policy and polls the datagram socket while connected.
//! Opaque payloads travel as UDP datagrams to the configured endpoint.

pub mod driver;
#[cfg(not(target_os = "espidf"))]
pub mod sim;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{Ssid, WifiApConfig, WifiStationConfig};
use crate::drivers::task_pin::{Core, RunFlag, TaskSpec, Worker};
use crate::error::{ConfigParam, ConnectionError, Error, Result, TransmitError};
use crate::stats::{LinkCounters, WifiStats};
use crate::sync::TimedMutex;
use crate::transport::{InboundQueue, Transport, TransportKind};

use driver::{REASON_ASSOC_LEAVE, ScanResult, WifiDriver, WifiEvent, WifiEventSink, WifiMode};

/// Largest datagram accepted for send or queued on receive.
pub const MAX_DATAGRAM: usize = 1024;
const INBOUND_DEPTH: usize = 8;

const LOCK_TIMEOUT: Duration = Duration::from_millis(1_000);
const POLL_LOCK_TIMEOUT: Duration = Duration::from_millis(100);
const WORKER_TICK: Duration = Duration::from_millis(10);

const WIFI_TASK: TaskSpec = TaskSpec {
    name: "wifi\0",
    core: Core::Pro,
    priority: 5,
    stack_kb: 8,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
    LostConnection,
}

/// Station status change notification.
pub type StatusCallback = Box<dyn FnMut(WifiStatus) + Send>;
/// Scan completion; runs once per `scan_networks` call.
pub type ScanCallback = Box<dyn FnOnce(&[ScanResult]) + Send>;

struct WifiCore<D> {
    driver: D,
    mode: WifiMode,
    status: WifiStatus,
    station: Option<WifiStationConfig>,
    ap: Option<WifiApConfig>,
    /// Current `Connecting` is an automatic retry.
    reconnecting: bool,
    retries: u8,
    /// Start of the current association or of the wait for the next retry.
    since: Instant,
    ip: Option<[u8; 4]>,
    connected_at: Option<Instant>,
    datagram_bound: bool,
    status_cb: Option<StatusCallback>,
    scan_cb: Option<ScanCallback>,
}

impl<D: WifiDriver> WifiCore<D> {
    fn apply_mode(&mut self, mode: WifiMode) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        self.driver.set_mode(mode).map_err(|e| {
            warn!("WiFi: mode change to {:?} failed: {}", mode, e);
            Error::Init("wifi mode change failed")
        })?;
        self.mode = mode;
        Ok(())
    }

    fn close_datagram(&mut self) {
        if self.datagram_bound {
            self.driver.close_datagram();
            self.datagram_bound = false;
        }
    }
}

struct Shared<D> {
    core: TimedMutex<WifiCore<D>>,
    stats: TimedMutex<WifiStats>,
    inbound: TimedMutex<InboundQueue<MAX_DATAGRAM, INBOUND_DEPTH>>,
    events: WifiEventSink,
    initialized: AtomicBool,
}

pub struct WifiTransport<D: WifiDriver> {
    shared: Arc<Shared<D>>,
    worker: TimedMutex<Option<Worker>>,
}

impl<D: WifiDriver> WifiTransport<D> {
    pub fn new(driver: D) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: TimedMutex::new(WifiCore {
                    driver,
                    mode: WifiMode::Off,
                    status: WifiStatus::Disconnected,
                    station: None,
                    ap: None,
                    reconnecting: false,
                    retries: 0,
                    since: Instant::now(),
                    ip: None,
                    connected_at: None,
                    datagram_bound: false,
                    status_cb: None,
                    scan_cb: None,
                }),
                stats: TimedMutex::new(WifiStats::default()),
                inbound: TimedMutex::new(InboundQueue::new()),
                events: WifiEventSink::new(),
                initialized: AtomicBool::new(false),
            }),
            worker: TimedMutex::new(None),
        }
    }

    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        {
            let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
            core.driver.attach_events(self.shared.events.clone()).map_err(|e| {
                warn!("WiFi: event hookup failed: {}", e);
                Error::Init("wifi event hookup failed")
            })?;
            core.driver.set_mode(WifiMode::Off).map_err(|e| {
                warn!("WiFi: driver start failed: {}", e);
                Error::Init("wifi driver start failed")
            })?;
            core.mode = WifiMode::Off;
        }
        let shared = Arc::clone(&self.shared);
        let worker = Worker::spawn(&WIFI_TASK, move |run| worker_loop(&shared, &run))?;
        *self.worker.lock_for(LOCK_TIMEOUT)? = Some(worker);
        self.shared.initialized.store(true, Ordering::Release);
        info!("WiFi: initialised");
        Ok(())
    }

    pub fn deinitialize(&self) {
        if let Ok(mut slot) = self.worker.lock_for(LOCK_TIMEOUT) {
            slot.take();
        }
        self.shared.initialized.store(false, Ordering::Release);
        if let Ok(mut core) = self.shared.core.lock_for(LOCK_TIMEOUT) {
            core.close_datagram();
            if core.mode.has_station() {
                let _ = core.driver.disconnect();
            }
            if core.mode.has_ap() {
                let _ = core.driver.stop_ap();
            }
            let _ = core.apply_mode(WifiMode::Off);
            core.status = WifiStatus::Disconnected;
            core.ap = None;
            core.status_cb = None;
            core.scan_cb = None;
        }
        self.shared.events.clear();
        info!("WiFi: deinitialised");
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() { Ok(()) } else { Err(Error::NotInitialized) }
    }

    // ── Station ───────────────────────────────────────────────

    /// Start associating with `config.ssid`.  The outcome is reported via
    /// `callback` and [`status`](Self::status).
    pub fn connect(&self, config: &WifiStationConfig, callback: Option<StatusCallback>) -> Result<()> {
        if config.ssid.is_empty() {
            warn!("WiFi: connect rejected, empty SSID");
            return Err(ConnectionError::EmptySsid.into());
        }
        self.require_initialized()?;
        config.validate()?;

        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        let mode = WifiMode::from_parts(true, core.ap.is_some());
        core.apply_mode(mode)?;
        core.close_datagram();

        let started = core.driver.begin_connect(config);
        self.shared.with_stats(|s| s.connect_attempts = s.connect_attempts.saturating_add(1));
        core.station = Some(config.clone());
        core.retries = 0;
        core.reconnecting = false;
        core.ip = None;
        core.connected_at = None;
        core.since = Instant::now();
        core.status_cb = callback;

        if let Err(e) = started {
            core.status = WifiStatus::Failed;
            warn!("WiFi: association with '{}' could not start: {}", config.ssid, e);
            return Err(ConnectionError::AssociationFailed.into());
        }
        core.status = WifiStatus::Connecting;
        info!("WiFi: connecting to '{}'", config.ssid);
        Ok(())
    }

    /// Leave the network.  Not counted as an error or a disconnection.
    pub fn disconnect(&self) -> Result<()> {
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        core.close_datagram();
        if core.mode.has_station() {
            if let Err(e) = core.driver.disconnect() {
                warn!("WiFi: disconnect failed: {}", e);
            }
        }
        core.status = WifiStatus::Disconnected;
        core.reconnecting = false;
        core.ip = None;
        core.connected_at = None;
        let mode = WifiMode::from_parts(false, core.ap.is_some());
        core.apply_mode(mode)?;
        info!("WiFi: disconnected");
        Ok(())
    }

    // ── Access point ──────────────────────────────────────────

    pub fn start_ap(&self, config: &WifiApConfig) -> Result<()> {
        if config.ssid.is_empty() {
            return Err(ConnectionError::EmptyApSsid.into());
        }
        self.require_initialized()?;
        config.validate()?;

        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        let station = core.mode.has_station();
        core.apply_mode(WifiMode::from_parts(station, true))?;
        core.driver.start_ap(config).map_err(|e| {
            warn!("WiFi: AP '{}' failed to start: {}", config.ssid, e);
            Error::Init("access point start failed")
        })?;
        core.ap = Some(config.clone());
        info!("WiFi: AP '{}' up on channel {}", config.ssid, config.channel);
        Ok(())
    }

    pub fn stop_ap(&self) -> Result<()> {
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        if core.ap.is_none() {
            return Ok(());
        }
        if let Err(e) = core.driver.stop_ap() {
            warn!("WiFi: AP stop failed: {}", e);
        }
        core.ap = None;
        let station = core.mode.has_station();
        core.apply_mode(WifiMode::from_parts(station, false))?;
        info!("WiFi: AP stopped");
        Ok(())
    }

    // ── Scanning ──────────────────────────────────────────────

    /// Scan for networks.  Synchronous mode blocks until the driver has
    /// results; asynchronous mode returns at once and `callback` runs on
    /// the worker thread when the scan completes.  Only one scan may be
    /// outstanding; another request fails with `ScanInProgress` until the
    /// pending callback has run.
    pub fn scan_networks(&self, callback: ScanCallback, async_mode: bool) -> Result<()> {
        self.require_initialized()?;
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        if core.scan_cb.is_some() {
            debug!("WiFi: scan requested while one is pending");
            return Err(ConnectionError::ScanInProgress.into());
        }
        if !core.mode.has_station() {
            let ap = core.ap.is_some();
            core.apply_mode(WifiMode::from_parts(true, ap))?;
        }
        self.shared.with_stats(|s| s.scan_count = s.scan_count.saturating_add(1));

        if async_mode {
            core.driver.start_scan().map_err(|e| {
                warn!("WiFi: scan start failed: {}", e);
                Error::Connection(ConnectionError::CommandRejected)
            })?;
            core.scan_cb = Some(callback);
            return Ok(());
        }

        let results = core.driver.scan_blocking().map_err(|e| {
            warn!("WiFi: scan failed: {}", e);
            Error::Connection(ConnectionError::CommandRejected)
        })?;
        drop(core);
        debug!("WiFi: scan found {} networks", results.len());
        callback(&results);
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self) -> WifiStatus {
        self.shared
            .core
            .lock_for(POLL_LOCK_TIMEOUT)
            .map_or(WifiStatus::Disconnected, |c| c.status)
    }

    pub fn is_connected(&self) -> bool {
        self.status() == WifiStatus::Connected
    }

    pub fn mode(&self) -> WifiMode {
        self.shared.core.lock_for(POLL_LOCK_TIMEOUT).map_or(WifiMode::Off, |c| c.mode)
    }

    pub fn is_ap_active(&self) -> bool {
        self.shared.core.lock_for(POLL_LOCK_TIMEOUT).is_ok_and(|c| c.ap.is_some())
    }

    pub fn ip_address(&self) -> Option<[u8; 4]> {
        let core = self.shared.core.lock_for(POLL_LOCK_TIMEOUT).ok()?;
        core.ip.or_else(|| core.driver.ip_address())
    }

    pub fn mac_address(&self) -> Option<[u8; 6]> {
        self.shared.core.lock_for(POLL_LOCK_TIMEOUT).ok().map(|c| c.driver.mac_address())
    }

    /// SSID of the connected network.
    pub fn ssid(&self) -> Option<Ssid> {
        let core = self.shared.core.lock_for(POLL_LOCK_TIMEOUT).ok()?;
        if core.status != WifiStatus::Connected {
            return None;
        }
        core.station.as_ref().map(|s| s.ssid.clone())
    }

    pub fn rssi(&self) -> Option<i8> {
        let core = self.shared.core.lock_for(POLL_LOCK_TIMEOUT).ok()?;
        if core.status == WifiStatus::Connected { core.driver.rssi() } else { None }
    }

    pub fn channel(&self) -> Option<u8> {
        self.shared.core.lock_for(POLL_LOCK_TIMEOUT).ok()?.driver.channel()
    }

    pub fn ap_client_count(&self) -> u8 {
        self.shared
            .core
            .lock_for(POLL_LOCK_TIMEOUT)
            .map_or(0, |c| if c.ap.is_some() { c.driver.ap_client_count() } else { 0 })
    }

    /// Time connected to the current network.
    pub fn uptime(&self) -> Duration {
        self.shared
            .core
            .lock_for(POLL_LOCK_TIMEOUT)
            .ok()
            .and_then(|c| c.connected_at)
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    pub fn set_power_save(&self, enabled: bool) -> Result<()> {
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        core.driver.set_power_save(enabled).map_err(|e| {
            warn!("WiFi: power save change failed: {}", e);
            Error::Connection(ConnectionError::CommandRejected)
        })
    }

    /// Transmit power, 2 – 20 dBm.
    pub fn set_tx_power(&self, dbm: i8) -> Result<()> {
        if !(2..=20).contains(&dbm) {
            return Err(ConfigParam::OutputPower.into());
        }
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        core.driver.set_tx_power(dbm).map_err(|e| {
            warn!("WiFi: tx power change failed: {}", e);
            Error::Connection(ConnectionError::CommandRejected)
        })
    }

    pub fn stats(&self) -> Result<WifiStats> {
        Ok(*self.shared.stats.lock_for(POLL_LOCK_TIMEOUT)?)
    }

    pub fn reset_stats(&self) -> Result<()> {
        *self.shared.stats.lock_for(LOCK_TIMEOUT)? = WifiStats::default();
        Ok(())
    }
}

#[cfg(test)]
impl<D: WifiDriver> WifiTransport<D> {
    pub(crate) fn stats_lock(&self) -> &TimedMutex<WifiStats> {
        &self.shared.stats
    }
}

impl<D: WifiDriver> Drop for WifiTransport<D> {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.deinitialize();
        }
    }
}

impl<D: WifiDriver> Transport for WifiTransport<D> {
    fn kind(&self) -> TransportKind {
        TransportKind::Wifi
    }

    fn is_available(&self) -> bool {
        self.is_initialized() && self.is_connected()
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(TransmitError::EmptyPayload.into());
        }
        if payload.len() > MAX_DATAGRAM {
            return Err(TransmitError::PayloadTooLarge { len: payload.len(), max: MAX_DATAGRAM }.into());
        }
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        if core.status != WifiStatus::Connected {
            drop(core);
            self.shared.with_stats(|s| s.link.record_send_error());
            return Err(TransmitError::NotConnected.into());
        }
        let Some(endpoint) = core.station.as_ref().and_then(|s| s.endpoint.clone()) else {
            return Err(ConfigParam::Endpoint.into());
        };
        let sent = core.driver.send_datagram(&endpoint.host, endpoint.port, payload);
        drop(core);

        match sent {
            Ok(()) => {
                self.shared.with_stats(|s| s.link.record_sent(payload.len()));
                Ok(())
            }
            Err(e) => {
                self.shared.with_stats(|s| s.link.record_send_error());
                warn!("WiFi: datagram to {}:{} failed: {}", endpoint.host, endpoint.port, e);
                Err(TransmitError::Driver(-1).into())
            }
        }
    }

    fn receive(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let popped = self.shared.inbound.lock_for(POLL_LOCK_TIMEOUT)?.pop_into(buf);
        if popped.is_err() {
            self.shared.with_stats(|s| s.link.record_receive_error());
        }
        popped
    }

    fn counters(&self) -> Result<LinkCounters> {
        self.stats().map(|s| s.link)
    }

    fn max_payload(&self) -> usize {
        MAX_DATAGRAM
    }
}

// ── Worker side ───────────────────────────────────────────────

fn worker_loop<D: WifiDriver>(shared: &Shared<D>, run: &RunFlag) {
    while run.is_set() {
        while let Some(event) = shared.events.next() {
            shared.handle_event(event);
        }
        shared.check_timers();
        shared.poll_datagrams();
        run.sleep(WORKER_TICK);
    }
}

impl<D: WifiDriver> Shared<D> {
    fn with_stats(&self, f: impl FnOnce(&mut WifiStats)) {
        match self.stats.lock_for(LOCK_TIMEOUT) {
            Ok(mut s) => f(&mut s),
            Err(_) => warn!("WiFi: stats lock timeout, update lost"),
        }
    }

    /// Run the status callback outside the core lock.
    fn notify(&self, status: WifiStatus) {
        let cb = match self.core.lock_for(LOCK_TIMEOUT) {
            Ok(mut core) => core.status_cb.take(),
            Err(_) => None,
        };
        let Some(mut cb) = cb else {
            return;
        };
        cb(status);
        if let Ok(mut core) = self.core.lock_for(LOCK_TIMEOUT) {
            if core.status_cb.is_none() {
                core.status_cb = Some(cb);
            }
        }
    }

    fn handle_event(&self, event: WifiEvent) {
        match event {
            WifiEvent::StaConnected { rssi, channel } => self.on_connected(rssi, channel),
            WifiEvent::StaDisconnected { reason } => self.on_disconnected(reason),
            WifiEvent::GotIp(ip) => {
                if let Ok(mut core) = self.core.lock_for(LOCK_TIMEOUT) {
                    core.ip = Some(ip);
                }
                info!("WiFi: got IP {}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
            }
            WifiEvent::ScanDone => self.on_scan_done(),
            WifiEvent::ApStarted => debug!("WiFi: AP started"),
            WifiEvent::ApStopped => debug!("WiFi: AP stopped"),
            WifiEvent::ApClientJoined => info!("WiFi: station joined AP"),
            WifiEvent::ApClientLeft => info!("WiFi: station left AP"),
        }
    }

    fn on_connected(&self, rssi: i8, channel: u8) {
        {
            let Ok(mut core) = self.core.lock_for(LOCK_TIMEOUT) else {
                warn!("WiFi: lock timeout handling connect event");
                return;
            };
            if core.status != WifiStatus::Connecting {
                return;
            }
            core.status = WifiStatus::Connected;
            core.retries = 0;
            core.reconnecting = false;
            core.connected_at = Some(Instant::now());
            let local_port = core.station.as_ref().and_then(|s| s.endpoint.as_ref()).map(|e| e.local_port);
            if let Some(port) = local_port {
                match core.driver.bind_datagram(port) {
                    Ok(()) => core.datagram_bound = true,
                    Err(e) => warn!("WiFi: datagram bind on port {} failed: {}", port, e),
                }
            }
            if let Some(cfg) = core.station.as_ref() {
                info!("WiFi: connected to '{}' (RSSI {} dBm, ch {})", cfg.ssid, rssi, channel);
            }
        }
        self.with_stats(|s| {
            s.successful_connections = s.successful_connections.saturating_add(1);
            s.last_rssi = rssi;
            s.last_channel = channel;
        });
        self.notify(WifiStatus::Connected);
    }

    fn on_disconnected(&self, reason: u16) {
        let next = {
            let Ok(mut core) = self.core.lock_for(LOCK_TIMEOUT) else {
                warn!("WiFi: lock timeout handling disconnect event");
                return;
            };
            let status = core.status;
            let next = match status {
                WifiStatus::Connected => {
                    self.with_stats(|s| s.disconnections = s.disconnections.saturating_add(1));
                    warn!("WiFi: connection lost (reason {})", reason);
                    WifiStatus::LostConnection
                }
                WifiStatus::Connecting if reason == REASON_ASSOC_LEAVE => return,
                WifiStatus::Connecting if core.reconnecting => {
                    debug!("WiFi: reconnect attempt {} failed (reason {})", core.retries, reason);
                    WifiStatus::LostConnection
                }
                WifiStatus::Connecting => {
                    warn!("WiFi: association failed (reason {})", reason);
                    WifiStatus::Failed
                }
                _ => return,
            };
            core.close_datagram();
            core.status = next;
            core.ip = None;
            core.connected_at = None;
            core.since = Instant::now();
            next
        };
        self.notify(next);
    }

    fn on_scan_done(&self) {
        let (cb, results) = {
            let Ok(mut core) = self.core.lock_for(LOCK_TIMEOUT) else {
                return;
            };
            let Some(cb) = core.scan_cb.take() else {
                return;
            };
            (cb, core.driver.scan_results())
        };
        match results {
            Ok(results) => {
                debug!("WiFi: async scan found {} networks", results.len());
                cb(&results);
            }
            Err(e) => {
                warn!("WiFi: scan results unavailable: {}", e);
                cb(&[]);
            }
        }
    }

    /// Association timeout and the reconnection policy.
    fn check_timers(&self) {
        let Some(mut core) = self.core.try_lock() else {
            return;
        };
        let Some(cfg) = core.station.clone() else {
            return;
        };
        let status = core.status;
        let notify = match status {
            WifiStatus::Connecting
                if core.since.elapsed() >= Duration::from_millis(u64::from(cfg.connect_timeout_ms)) =>
            {
                let _ = core.driver.disconnect();
                core.since = Instant::now();
                if core.reconnecting {
                    debug!("WiFi: reconnect attempt {} timed out", core.retries);
                    core.status = WifiStatus::LostConnection;
                } else {
                    warn!("WiFi: association with '{}' timed out", cfg.ssid);
                    core.status = WifiStatus::Failed;
                }
                Some(core.status)
            }
            WifiStatus::LostConnection if cfg.auto_reconnect => {
                if core.since.elapsed() < Duration::from_millis(u64::from(cfg.reconnect_interval_ms)) {
                    None
                } else if core.retries >= cfg.max_retries {
                    warn!("WiFi: giving up after {} reconnect attempts", core.retries);
                    core.status = WifiStatus::Failed;
                    Some(WifiStatus::Failed)
                } else {
                    core.retries += 1;
                    core.reconnecting = true;
                    core.since = Instant::now();
                    info!("WiFi: reconnect attempt {}/{}", core.retries, cfg.max_retries);
                    self.with_stats(|s| s.reconnections = s.reconnections.saturating_add(1));
                    match core.driver.reconnect() {
                        Ok(()) => {
                            core.status = WifiStatus::Connecting;
                            Some(WifiStatus::Connecting)
                        }
                        Err(e) => {
                            warn!("WiFi: reconnect failed to start: {}", e);
                            None
                        }
                    }
                }
            }
            _ => None,
        };
        drop(core);
        if let Some(status) = notify {
            self.notify(status);
        }
    }

    fn poll_datagrams(&self) {
        let Some(mut core) = self.core.try_lock() else {
            return;
        };
        if !core.datagram_bound {
            return;
        }
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match core.driver.recv_datagram(&mut buf) {
                Ok(Some(len)) => {
                    self.with_stats(|s| s.link.record_received(len));
                    match self.inbound.lock_for(LOCK_TIMEOUT) {
                        Ok(mut q) => {
                            if q.push(&buf[..len]) {
                                warn!("WiFi: inbound queue full, oldest datagram dropped");
                            }
                        }
                        Err(_) => warn!("WiFi: inbound lock timeout, datagram dropped"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.with_stats(|s| s.link.record_receive_error());
                    debug!("WiFi: datagram receive failed: {}", e);
                    break;
                }
            }
        }
    }
}
