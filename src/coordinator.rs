//! Transport coordinator: one send/receive API over three transports.
//!
//! ```text
//!               send_message(data, Auto)
//!                        │
//!                        ▼
//!   ┌──────────────── Selection ─────────────────┐
//!   │ active · preferred · priority · failover    │◀── reassess worker (every N s)
//!   └──────┬──────────────┬──────────────┬────────┘
//!          ▼              ▼              ▼
//!     WifiTransport  CellularTransport  RadioTransport
//! ```
//!
//! The selection lock guards only the selection itself.  A send copies its
//! route out and releases the lock before touching a transport, so a slow
//! modem exchange never stalls polling or reassessment.  Transports never
//! take it, which keeps the lock order one-way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::cellular::CellularTransport;
use crate::cellular::port::ModemPort;
use crate::config::CommsConfig;
use crate::drivers::task_pin::{Core, RunFlag, TaskSpec, Worker};
use crate::error::{ConfigParam, Error, Result};
use crate::radio::RadioTransport;
use crate::radio::driver::RadioDriver;
use crate::stats::CommsStats;
use crate::sync::TimedMutex;
use crate::transport::{Transport, TransportKind};
use crate::wifi::WifiTransport;
use crate::wifi::driver::WifiDriver;

const SEND_LOCK_TIMEOUT: Duration = Duration::from_millis(1_000);
const POLL_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

const REASSESS_TASK: TaskSpec = TaskSpec {
    name: "comms\0",
    core: Core::Pro,
    priority: 3,
    stack_kb: 4,
};

/// Index into per-transport arrays.
const fn slot(kind: TransportKind) -> Option<usize> {
    match kind {
        TransportKind::Radio => Some(0),
        TransportKind::Wifi => Some(1),
        TransportKind::Cellular => Some(2),
        TransportKind::None | TransportKind::Auto => None,
    }
}

struct Selection {
    active: TransportKind,
    preferred: TransportKind,
    auto_failover: bool,
    priority: [TransportKind; 3],
    /// Initialised successfully, by [`slot`].
    up: [bool; 3],
    interface_switches: u32,
    failovers: u32,
}

/// What a send needs from the selection, copied out so the lock is not
/// held while a transport blocks.
#[derive(Clone, Copy)]
struct Route {
    first: TransportKind,
    failover: bool,
    priority: [TransportKind; 3],
    up: [bool; 3],
}

struct Inner<R: RadioDriver, W: WifiDriver, M: ModemPort> {
    config: CommsConfig,
    radio: RadioTransport<R>,
    wifi: WifiTransport<W>,
    cellular: CellularTransport<M>,
    selection: TimedMutex<Selection>,
    initialized: AtomicBool,
}

/// JSON-serialisable status for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub active: TransportKind,
    pub preferred: TransportKind,
    pub auto_failover: bool,
    pub radio_available: bool,
    pub wifi_available: bool,
    pub cellular_available: bool,
    pub stats: CommsStats,
}

pub struct TransportCoordinator<R: RadioDriver, W: WifiDriver, M: ModemPort> {
    inner: Arc<Inner<R, W, M>>,
    worker: TimedMutex<Option<Worker>>,
}

impl<R: RadioDriver, W: WifiDriver, M: ModemPort> TransportCoordinator<R, W, M> {
    /// Build the three transports from `config`.  Nothing touches hardware
    /// until [`initialize`](Self::initialize).
    pub fn new(config: CommsConfig, radio: R, wifi: W, modem: M) -> Self {
        let selection = Selection {
            active: TransportKind::None,
            preferred: config.preferred,
            auto_failover: config.auto_failover,
            priority: config.priority,
            up: [false; 3],
            interface_switches: 0,
            failovers: 0,
        };
        Self {
            inner: Arc::new(Inner {
                radio: RadioTransport::new(radio, config.radio),
                wifi: WifiTransport::new(wifi),
                cellular: CellularTransport::new(modem, config.cellular.clone()),
                config,
                selection: TimedMutex::new(selection),
                initialized: AtomicBool::new(false),
            }),
            worker: TimedMutex::new(None),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Bring up every enabled transport.  Individual failures are logged
    /// and leave that transport unavailable; only total failure is an error.
    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let inner = &self.inner;
        inner.config.validate()?;

        let up = [inner.init_radio(), inner.init_wifi(), inner.init_cellular()];
        if !up.iter().any(|u| *u) {
            error!("Comms: no transport could be initialised");
            return Err(Error::Init("no transport available"));
        }
        inner.selection.lock_for(SEND_LOCK_TIMEOUT)?.up = up;

        let shared = Arc::clone(inner);
        let worker = Worker::spawn(&REASSESS_TASK, move |run| reassess_loop(&shared, &run))?;
        *self.worker.lock_for(SEND_LOCK_TIMEOUT)? = Some(worker);
        inner.initialized.store(true, Ordering::Release);

        let active = self.select_best_interface();
        info!(
            "Comms: initialised (radio {}, wifi {}, cellular {}), active {}",
            up[0], up[1], up[2], active
        );
        Ok(())
    }

    pub fn deinitialize(&self) {
        if let Ok(mut slot) = self.worker.lock_for(SEND_LOCK_TIMEOUT) {
            slot.take();
        }
        self.inner.initialized.store(false, Ordering::Release);
        let up = match self.inner.selection.lock_for(SEND_LOCK_TIMEOUT) {
            Ok(mut sel) => {
                sel.active = TransportKind::None;
                core::mem::take(&mut sel.up)
            }
            Err(_) => [true; 3],
        };
        if up[0] {
            self.inner.radio.deinitialize();
        }
        if up[1] {
            self.inner.wifi.deinitialize();
        }
        if up[2] {
            self.inner.cellular.deinitialize();
        }
        info!("Comms: deinitialised");
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    // ── Data path ─────────────────────────────────────────────

    /// Send `data` on `target`, or on the active interface for `Auto`.
    /// A failed `Auto` send fails over in priority order when enabled.
    pub fn send_message(&self, data: &[u8], target: TransportKind) -> bool {
        if data.is_empty() || !self.is_initialized() {
            return false;
        }
        let inner = &self.inner;
        let route = {
            let Ok(sel) = inner.selection.lock_for(SEND_LOCK_TIMEOUT) else {
                warn!("Comms: coordinator lock timeout, send dropped");
                return false;
            };
            Route {
                first: if target == TransportKind::Auto { sel.active } else { target },
                failover: target == TransportKind::Auto && sel.auto_failover,
                priority: sel.priority,
                up: sel.up,
            }
        };
        let Some(transport) = inner.transport(route.first) else {
            debug!("Comms: no interface for {} send", target);
            return false;
        };

        match transport.send(data) {
            Ok(()) => return true,
            Err(e) => warn!("Comms: send on {} failed: {}", route.first, e),
        }
        if !route.failover {
            return false;
        }

        for kind in route.priority {
            if kind == route.first || !inner.available_in(&route.up, kind) {
                continue;
            }
            let Some(next) = inner.transport(kind) else {
                continue;
            };
            match next.send(data) {
                Ok(()) => {
                    info!("Comms: failed over {} -> {}", route.first, kind);
                    match inner.selection.lock_for(SEND_LOCK_TIMEOUT) {
                        Ok(mut sel) => {
                            sel.failovers = sel.failovers.saturating_add(1);
                            set_active(&mut sel, kind);
                        }
                        Err(e) => warn!("Comms: failover to {} not recorded: {}", kind, e),
                    }
                    return true;
                }
                Err(e) => warn!("Comms: failover send on {} failed: {}", kind, e),
            }
        }
        inner.reassess();
        false
    }

    /// Non-blocking poll of every transport in priority order.
    pub fn receive_message(&self, buf: &mut [u8]) -> Option<(usize, TransportKind)> {
        if !self.is_initialized() {
            return None;
        }
        let inner = &self.inner;
        let sel = inner.selection.lock_for(POLL_LOCK_TIMEOUT).ok()?;
        for kind in sel.priority {
            if !slot(kind).is_some_and(|i| sel.up[i]) {
                continue;
            }
            let Some(transport) = inner.transport(kind) else {
                continue;
            };
            match transport.receive(buf) {
                Ok(Some(len)) => return Some((len, kind)),
                Ok(None) => {}
                Err(e) => warn!("Comms: {} message dropped: {}", kind, e),
            }
        }
        None
    }

    // ── Selection ─────────────────────────────────────────────

    pub fn is_interface_available(&self, kind: TransportKind) -> bool {
        let Ok(sel) = self.inner.selection.lock_for(POLL_LOCK_TIMEOUT) else {
            return false;
        };
        self.inner.available(&sel, kind)
    }

    /// Re-evaluate the active interface.  Returns the (possibly unchanged)
    /// choice.
    pub fn select_best_interface(&self) -> TransportKind {
        self.inner.reassess()
    }

    pub fn get_active_interface(&self) -> TransportKind {
        self.inner
            .selection
            .lock_for(POLL_LOCK_TIMEOUT)
            .map_or(TransportKind::None, |s| s.active)
    }

    /// Prefer `kind` whenever it is available; `None` clears the
    /// preference.  Switches at once if `kind` is available now.
    pub fn set_preferred_interface(&self, kind: TransportKind) -> Result<()> {
        if kind == TransportKind::Auto {
            return Err(ConfigParam::Priority.into());
        }
        let inner = &self.inner;
        let mut sel = inner.selection.lock_for(SEND_LOCK_TIMEOUT)?;
        sel.preferred = kind;
        info!("Comms: preferred interface {}", kind);
        if inner.available(&sel, kind) {
            set_active(&mut sel, kind);
        }
        Ok(())
    }

    pub fn preferred_interface(&self) -> TransportKind {
        self.inner
            .selection
            .lock_for(POLL_LOCK_TIMEOUT)
            .map_or(TransportKind::None, |s| s.preferred)
    }

    pub fn set_auto_failover(&self, enabled: bool) -> Result<()> {
        self.inner.selection.lock_for(SEND_LOCK_TIMEOUT)?.auto_failover = enabled;
        info!("Comms: auto-failover {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    pub fn auto_failover(&self) -> bool {
        self.inner
            .selection
            .lock_for(POLL_LOCK_TIMEOUT)
            .is_ok_and(|s| s.auto_failover)
    }

    // ── Statistics ────────────────────────────────────────────

    /// Snapshot of every transport's counters plus coordinator counters.
    pub fn get_statistics(&self) -> Result<CommsStats> {
        let inner = &self.inner;
        let radio = inner.radio.stats().map_err(|_| Error::StatsUnavailable(TransportKind::Radio))?;
        let wifi = inner.wifi.stats().map_err(|_| Error::StatsUnavailable(TransportKind::Wifi))?;
        let cellular = inner
            .cellular
            .stats()
            .map_err(|_| Error::StatsUnavailable(TransportKind::Cellular))?;
        let sel = inner.selection.lock_for(POLL_LOCK_TIMEOUT)?;
        Ok(CommsStats {
            radio,
            wifi,
            cellular,
            interface_switches: sel.interface_switches,
            failovers: sel.failovers,
        })
    }

    /// Zero every counter.  A transport whose counters stay locked is
    /// skipped and named in the returned error; the others are still reset.
    pub fn reset_statistics(&self) -> Result<()> {
        let inner = &self.inner;
        let results = [
            (TransportKind::Radio, inner.radio.reset_stats()),
            (TransportKind::Wifi, inner.wifi.reset_stats()),
            (TransportKind::Cellular, inner.cellular.reset_stats()),
        ];
        let mut skipped = None;
        for (kind, result) in results {
            if let Err(e) = result {
                warn!("Comms: {} statistics not reset: {}", kind, e);
                skipped.get_or_insert(kind);
            }
        }
        {
            let mut sel = inner.selection.lock_for(SEND_LOCK_TIMEOUT)?;
            sel.interface_switches = 0;
            sel.failovers = 0;
        }
        if let Some(kind) = skipped {
            return Err(Error::StatsUnavailable(kind));
        }
        info!("Comms: statistics reset");
        Ok(())
    }

    pub fn status_report(&self) -> Result<StatusReport> {
        let stats = self.get_statistics()?;
        let sel = self.inner.selection.lock_for(POLL_LOCK_TIMEOUT)?;
        Ok(StatusReport {
            active: sel.active,
            preferred: sel.preferred,
            auto_failover: sel.auto_failover,
            radio_available: self.inner.available(&sel, TransportKind::Radio),
            wifi_available: self.inner.available(&sel, TransportKind::Wifi),
            cellular_available: self.inner.available(&sel, TransportKind::Cellular),
            stats,
        })
    }

    /// [`status_report`](Self::status_report) rendered as JSON.
    pub fn status_json(&self) -> Result<std::string::String> {
        let report = self.status_report()?;
        serde_json::to_string(&report).map_err(|_| Error::Init("status serialisation failed"))
    }

    // ── Transport access ──────────────────────────────────────

    pub fn radio(&self) -> &RadioTransport<R> {
        &self.inner.radio
    }

    pub fn wifi(&self) -> &WifiTransport<W> {
        &self.inner.wifi
    }

    pub fn cellular(&self) -> &CellularTransport<M> {
        &self.inner.cellular
    }

    pub fn config(&self) -> &CommsConfig {
        &self.inner.config
    }
}

impl<R: RadioDriver, W: WifiDriver, M: ModemPort> Drop for TransportCoordinator<R, W, M> {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.deinitialize();
        }
    }
}

fn set_active(sel: &mut Selection, kind: TransportKind) {
    if sel.active == kind {
        return;
    }
    info!("Comms: active interface {} -> {}", sel.active, kind);
    sel.active = kind;
    sel.interface_switches = sel.interface_switches.saturating_add(1);
}

fn reassess_loop<R: RadioDriver, W: WifiDriver, M: ModemPort>(inner: &Inner<R, W, M>, run: &RunFlag) {
    let period = Duration::from_millis(u64::from(inner.config.reassess_interval_ms));
    loop {
        run.sleep(period);
        if !run.is_set() {
            break;
        }
        inner.reassess();
    }
}

impl<R: RadioDriver, W: WifiDriver, M: ModemPort> Inner<R, W, M> {
    fn transport(&self, kind: TransportKind) -> Option<&dyn Transport> {
        match kind {
            TransportKind::Radio => Some(&self.radio as &dyn Transport),
            TransportKind::Wifi => Some(&self.wifi as &dyn Transport),
            TransportKind::Cellular => Some(&self.cellular as &dyn Transport),
            TransportKind::None | TransportKind::Auto => None,
        }
    }

    fn available(&self, sel: &Selection, kind: TransportKind) -> bool {
        self.available_in(&sel.up, kind)
    }

    fn available_in(&self, up: &[bool; 3], kind: TransportKind) -> bool {
        let Some(i) = slot(kind) else {
            return false;
        };
        up[i] && self.transport(kind).is_some_and(|t| t.is_available())
    }

    /// Preferred if available, else first available by priority.
    fn choose(&self, sel: &Selection) -> TransportKind {
        if self.available(sel, sel.preferred) {
            return sel.preferred;
        }
        sel.priority
            .into_iter()
            .find(|k| self.available(sel, *k))
            .unwrap_or(TransportKind::None)
    }

    fn reassess(&self) -> TransportKind {
        let Ok(mut sel) = self.selection.lock_for(SEND_LOCK_TIMEOUT) else {
            warn!("Comms: coordinator lock timeout, reassessment skipped");
            return TransportKind::None;
        };
        let best = self.choose(&sel);
        set_active(&mut sel, best);
        best
    }

    fn init_radio(&self) -> bool {
        if !self.config.enable_radio {
            return false;
        }
        if let Err(e) = self.radio.initialize() {
            warn!("Comms: radio unavailable: {}", e);
            return false;
        }
        if self.config.radio_listen {
            if let Err(e) = self.radio.start_receive(None) {
                warn!("Comms: radio listen failed: {}", e);
            }
        }
        true
    }

    fn init_wifi(&self) -> bool {
        if !self.config.enable_wifi {
            return false;
        }
        if let Err(e) = self.wifi.initialize() {
            warn!("Comms: wifi unavailable: {}", e);
            return false;
        }
        if let Some(ap) = &self.config.wifi_ap {
            if let Err(e) = self.wifi.start_ap(ap) {
                warn!("Comms: access point failed: {}", e);
            }
        }
        if let Some(station) = &self.config.wifi_station {
            if let Err(e) = self.wifi.connect(station, None) {
                warn!("Comms: wifi connect failed: {}", e);
            }
        }
        true
    }

    fn init_cellular(&self) -> bool {
        if !self.config.enable_cellular {
            return false;
        }
        match self.cellular.initialize() {
            Ok(()) => true,
            Err(e) => {
                warn!("Comms: cellular unavailable: {}", e);
                false
            }
        }
    }
}
