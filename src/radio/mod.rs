//! Long-range radio transport (SX1262 LoRa).
//!
//! ```text
//!            transmit()/start_receive()            DIO1 edge
//!  caller ───────────────▶ RadioCore ──▶ driver ─────────────▶ IrqLine::fire()
//!                              ▲                                     │ token
//!                              │ finish / read / re-arm              ▼
//!                              └──────────────────────────── lora worker thread
//!                                                             stats · callbacks
//! ```
//!
//! ## Modes
//!
//! `Idle` (standby) → `Transmit` → back to `Idle`, or to `Receive` when
//! continuous listening is enabled.  `Sleep` is the low-power quiescent
//! mode; entering it drops whatever was in flight.
//!
//! ## Interrupt handling
//!
//! The interrupt path only posts a token (see [`crate::irq`]).  Reading
//! the frame, updating statistics and invoking callbacks all happen on the
//! `lora` worker thread, never in interrupt context.

pub mod driver;
#[cfg(not(target_os = "espidf"))]
pub mod sim;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use heapless::Vec;
use log::{debug, info, warn};

use crate::config::RadioConfig;
use crate::drivers::task_pin::{Core, RunFlag, TaskSpec, Worker};
use crate::error::{ConfigParam, Error, ReceiveError, Result, TransmitError};
use crate::irq::{IrqLine, IrqToken};
use crate::stats::{LinkCounters, RadioStats};
use crate::sync::TimedMutex;
use crate::transport::{InboundQueue, Transport, TransportKind};

use driver::{DriverError, PacketStatus, RadioDriver};

pub const MAX_PAYLOAD: usize = RadioConfig::MAX_PAYLOAD;

/// Received packets held for [`Transport::receive`].
const INBOUND_DEPTH: usize = 8;
/// Lock budget for control operations.
const LOCK_TIMEOUT: Duration = Duration::from_millis(1_000);
/// Lock budget for stats and inbound polling.
const POLL_LOCK_TIMEOUT: Duration = Duration::from_millis(100);
/// Worker sleep when no token is pending.
const IDLE_POLL: Duration = Duration::from_millis(2);

const RADIO_TASK: TaskSpec = TaskSpec {
    name: "lora\0",
    core: Core::App,
    priority: 6,
    stack_kb: 8,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Idle,
    Transmit,
    Receive,
    Sleep,
}

/// One received frame plus its signal quality.
#[derive(Debug, Clone, PartialEq)]
pub struct RxPacket {
    pub data: Vec<u8, MAX_PAYLOAD>,
    pub rssi: f32,
    pub snr: f32,
    pub freq_error: f32,
}

/// Completion callback; invoked exactly once per accepted `transmit`.
pub type TxCallback = Box<dyn FnOnce(core::result::Result<(), TransmitError>) + Send>;
/// Per-packet receive callback.
pub type RxCallback = Box<dyn FnMut(&RxPacket) + Send>;

struct PendingTx {
    len: usize,
    started: Instant,
    callback: Option<TxCallback>,
}

struct RadioCore<D> {
    driver: D,
    config: RadioConfig,
    mode: RadioMode,
    /// Re-arm reception after each transmission.
    listening: bool,
    tx: Option<PendingTx>,
    rx_callback: Option<RxCallback>,
    started: Option<Instant>,
}

struct Shared<D> {
    core: TimedMutex<RadioCore<D>>,
    stats: TimedMutex<RadioStats>,
    inbound: TimedMutex<InboundQueue<MAX_PAYLOAD, INBOUND_DEPTH>>,
    irq: IrqLine,
    initialized: AtomicBool,
}

pub struct RadioTransport<D: RadioDriver> {
    shared: Arc<Shared<D>>,
    worker: TimedMutex<Option<Worker>>,
}

// ── Configuration application ─────────────────────────────────

/// Push every parameter of `cfg` to the driver, in hardware order.
fn write_params<D: RadioDriver>(driver: &mut D, cfg: &RadioConfig) -> core::result::Result<(), ConfigParam> {
    driver.set_frequency(cfg.frequency_mhz).map_err(|_| ConfigParam::Frequency)?;
    driver.set_bandwidth(cfg.bandwidth_khz).map_err(|_| ConfigParam::Bandwidth)?;
    driver
        .set_spreading_factor(cfg.spreading_factor)
        .map_err(|_| ConfigParam::SpreadingFactor)?;
    driver.set_coding_rate(cfg.coding_rate).map_err(|_| ConfigParam::CodingRate)?;
    driver.set_sync_word(cfg.sync_word).map_err(|_| ConfigParam::SyncWord)?;
    driver
        .set_output_power(cfg.output_power_dbm)
        .map_err(|_| ConfigParam::OutputPower)?;
    driver
        .set_current_limit(cfg.current_limit_ma)
        .map_err(|_| ConfigParam::CurrentLimit)?;
    driver
        .set_preamble_length(cfg.preamble_length)
        .map_err(|_| ConfigParam::PreambleLength)?;
    driver.set_crc(cfg.crc_enabled).map_err(|_| ConfigParam::Crc)?;
    driver.set_tcxo_voltage(cfg.tcxo_voltage).map_err(|_| ConfigParam::TcxoVoltage)?;
    if let Err(e) = driver.set_rf_switch(true) {
        warn!("Radio: DIO2 RF switch setup failed: {}", e);
    }
    Ok(())
}

/// Validate `new` then apply it.  On a hardware refusal the previous
/// configuration is written back so the chip never runs a mixed set.
fn apply_config<D: RadioDriver>(driver: &mut D, new: &RadioConfig, previous: &RadioConfig) -> Result<()> {
    new.validate()?;
    if let Err(param) = write_params(driver, new) {
        warn!("Radio: hardware rejected {}, restoring previous configuration", param);
        if let Err(p) = write_params(driver, previous) {
            warn!("Radio: restore failed at {}", p);
        }
        return Err(Error::Config(param));
    }
    Ok(())
}

// ── Transport ─────────────────────────────────────────────────

impl<D: RadioDriver> RadioTransport<D> {
    pub fn new(driver: D, config: RadioConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: TimedMutex::new(RadioCore {
                    driver,
                    config,
                    mode: RadioMode::Idle,
                    listening: false,
                    tx: None,
                    rx_callback: None,
                    started: None,
                }),
                stats: TimedMutex::new(RadioStats::default()),
                inbound: TimedMutex::new(InboundQueue::new()),
                irq: IrqLine::new(),
                initialized: AtomicBool::new(false),
            }),
            worker: TimedMutex::new(None),
        }
    }

    /// Bring up the chip, apply the configuration, and start the worker.
    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        {
            let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
            let core = &mut *core;
            let cfg = core.config;
            core.driver.begin(cfg.frequency_mhz).map_err(|e| {
                warn!("Radio: begin failed: {}", e);
                Error::Init("radio begin failed")
            })?;
            apply_config(&mut core.driver, &cfg, &cfg)?;
            core.driver.attach_irq(self.shared.irq.clone()).map_err(|e| {
                warn!("Radio: IRQ attach failed: {}", e);
                Error::Init("radio IRQ attach failed")
            })?;
            if let Err(e) = core.driver.standby() {
                warn!("Radio: standby failed: {}", e);
            }
            core.mode = RadioMode::Idle;
            core.started = Some(Instant::now());
        }

        let shared = Arc::clone(&self.shared);
        let worker = Worker::spawn(&RADIO_TASK, move |run| worker_loop(&shared, &run))?;
        *self.worker.lock_for(LOCK_TIMEOUT)? = Some(worker);
        self.shared.initialized.store(true, Ordering::Release);

        let cfg = self.config();
        info!(
            "Radio: initialised {:.1} MHz, BW {:.1} kHz, SF{}, CR4/{}, {} dBm",
            cfg.frequency_mhz, cfg.bandwidth_khz, cfg.spreading_factor, cfg.coding_rate, cfg.output_power_dbm
        );
        Ok(())
    }

    /// Stop the worker and put the chip to sleep.
    pub fn deinitialize(&self) {
        if let Ok(mut slot) = self.worker.lock_for(LOCK_TIMEOUT) {
            slot.take();
        }
        self.shared.initialized.store(false, Ordering::Release);
        let aborted = match self.shared.core.lock_for(LOCK_TIMEOUT) {
            Ok(mut core) => {
                self.shared.irq.disarm();
                self.shared.irq.drain();
                let pending = core.tx.take();
                core.listening = false;
                core.rx_callback = None;
                if let Err(e) = core.driver.sleep() {
                    warn!("Radio: sleep on shutdown failed: {}", e);
                }
                core.driver.detach_irq();
                core.mode = RadioMode::Sleep;
                pending
            }
            Err(_) => None,
        };
        if let Some(pending) = aborted {
            self.shared.abort_tx(pending);
        }
        info!("Radio: deinitialised");
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() { Ok(()) } else { Err(Error::NotInitialized) }
    }

    /// Validate and apply `config`.  An invalid parameter leaves the
    /// applied configuration untouched.
    pub fn configure_radio(&self, config: &RadioConfig) -> Result<()> {
        self.require_initialized()?;
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        let previous = core.config;
        apply_config(&mut core.driver, config, &previous)?;
        core.config = *config;
        Ok(())
    }

    /// Start an asynchronous transmission.
    ///
    /// Returns once the chip is transmitting; `callback` runs on the worker
    /// thread when the completion interrupt has been processed.
    pub fn transmit(&self, data: &[u8], callback: Option<TxCallback>) -> Result<()> {
        self.require_initialized()?;
        if data.is_empty() {
            return Err(TransmitError::EmptyPayload.into());
        }
        if data.len() > MAX_PAYLOAD {
            return Err(TransmitError::PayloadTooLarge { len: data.len(), max: MAX_PAYLOAD }.into());
        }

        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        match core.mode {
            RadioMode::Sleep => return Err(TransmitError::Asleep.into()),
            RadioMode::Transmit => return Err(TransmitError::Busy.into()),
            RadioMode::Idle | RadioMode::Receive => {}
        }

        self.shared.irq.arm(IrqToken::TxDone);
        if let Err(e) = core.driver.start_transmit(data) {
            warn!("Radio: start transmit failed: {}", e);
            self.shared.settle_after_tx(&mut core);
            drop(core);
            self.shared.with_stats(|s| s.link.record_send_error());
            return Err(TransmitError::Driver(e.code()).into());
        }
        core.mode = RadioMode::Transmit;
        core.tx = Some(PendingTx {
            len: data.len(),
            started: Instant::now(),
            callback,
        });
        debug!("Radio: transmitting {} bytes", data.len());
        Ok(())
    }

    /// Enter continuous reception; `callback` runs for every good packet.
    pub fn start_receive(&self, callback: Option<RxCallback>) -> Result<()> {
        self.require_initialized()?;
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        let mode = core.mode;
        match mode {
            RadioMode::Sleep => return Err(TransmitError::Asleep.into()),
            RadioMode::Transmit => {
                // Reception resumes when the transmission completes.
                core.listening = true;
                core.rx_callback = callback;
                return Ok(());
            }
            RadioMode::Idle | RadioMode::Receive => {}
        }
        self.shared.irq.arm(IrqToken::RxDone);
        core.driver
            .start_receive()
            .map_err(|e| Error::Receive(ReceiveError::Driver(e.code())))?;
        core.mode = RadioMode::Receive;
        core.listening = true;
        core.rx_callback = callback;
        Ok(())
    }

    /// Leave continuous reception and return to standby.
    pub fn stop_receive(&self) -> Result<()> {
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        core.listening = false;
        core.rx_callback = None;
        if core.mode == RadioMode::Receive {
            self.shared.irq.disarm();
            core.driver.standby().map_err(|e| Error::Receive(ReceiveError::Driver(e.code())))?;
            core.mode = RadioMode::Idle;
        }
        Ok(())
    }

    /// Enter low-power sleep, dropping any pending receive or transmission.
    pub fn sleep(&self) -> Result<()> {
        self.require_initialized()?;
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        self.shared.irq.disarm();
        self.shared.irq.drain();
        let pending = core.tx.take();
        core.listening = false;
        core.rx_callback = None;
        let slept = core.driver.sleep();
        core.mode = RadioMode::Sleep;
        drop(core);

        if let Some(pending) = pending {
            self.shared.abort_tx(pending);
        }
        slept.map_err(|e| {
            warn!("Radio: sleep failed: {}", e);
            Error::Transmit(TransmitError::Driver(e.code()))
        })?;
        info!("Radio: sleeping");
        Ok(())
    }

    /// Leave sleep and return to `Idle`.
    pub fn wakeup(&self) -> Result<()> {
        self.require_initialized()?;
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        if core.mode != RadioMode::Sleep {
            return Ok(());
        }
        core.driver
            .standby()
            .map_err(|e| Error::Transmit(TransmitError::Driver(e.code())))?;
        core.mode = RadioMode::Idle;
        info!("Radio: awake");
        Ok(())
    }

    /// Replace the configuration: quiesce to `Idle`, reapply, then restore
    /// the mode that was active before the call.
    pub fn update_config(&self, config: &RadioConfig) -> Result<()> {
        self.require_initialized()?;
        let mut core = self.shared.core.lock_for(LOCK_TIMEOUT)?;
        let prior = core.mode;
        let pending = core.tx.take();

        self.shared.irq.disarm();
        if let Err(e) = core.driver.standby() {
            warn!("Radio: standby before reconfigure failed: {}", e);
        }
        core.mode = RadioMode::Idle;

        let previous = core.config;
        let outcome = apply_config(&mut core.driver, config, &previous);
        if outcome.is_ok() {
            core.config = *config;
        }

        match prior {
            RadioMode::Receive => {
                self.shared.irq.arm(IrqToken::RxDone);
                match core.driver.start_receive() {
                    Ok(()) => core.mode = RadioMode::Receive,
                    Err(e) => {
                        self.shared.irq.disarm();
                        warn!("Radio: could not resume receive: {}", e);
                    }
                }
            }
            RadioMode::Sleep => {
                if core.driver.sleep().is_ok() {
                    core.mode = RadioMode::Sleep;
                }
            }
            RadioMode::Transmit => {
                if core.listening {
                    self.shared.irq.arm(IrqToken::RxDone);
                    if core.driver.start_receive().is_ok() {
                        core.mode = RadioMode::Receive;
                    }
                }
            }
            RadioMode::Idle => {}
        }
        drop(core);

        if let Some(pending) = pending {
            self.shared.abort_tx(pending);
        }
        outcome
    }

    /// Retune the carrier, keeping every other parameter.
    pub fn set_frequency(&self, mhz: f32) -> Result<()> {
        let cfg = RadioConfig { frequency_mhz: mhz, ..self.config() };
        self.update_config(&cfg)
    }

    pub fn set_output_power(&self, dbm: i8) -> Result<()> {
        let cfg = RadioConfig { output_power_dbm: dbm, ..self.config() };
        self.update_config(&cfg)
    }

    /// Last applied configuration.
    pub fn config(&self) -> RadioConfig {
        match self.shared.core.lock_for(LOCK_TIMEOUT) {
            Ok(core) => core.config,
            Err(_) => RadioConfig::default(),
        }
    }

    pub fn mode(&self) -> Option<RadioMode> {
        self.shared.core.lock_for(POLL_LOCK_TIMEOUT).ok().map(|c| c.mode)
    }

    pub fn is_transmitting(&self) -> bool {
        self.mode() == Some(RadioMode::Transmit)
    }

    pub fn stats(&self) -> Result<RadioStats> {
        Ok(*self.shared.stats.lock_for(POLL_LOCK_TIMEOUT)?)
    }

    pub fn reset_stats(&self) -> Result<()> {
        *self.shared.stats.lock_for(LOCK_TIMEOUT)? = RadioStats::default();
        Ok(())
    }

    /// Time since `initialize`.
    pub fn uptime(&self) -> Duration {
        self.shared
            .core
            .lock_for(POLL_LOCK_TIMEOUT)
            .ok()
            .and_then(|c| c.started)
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// Handle for board code that routes the interrupt pin manually.
    pub fn irq_line(&self) -> IrqLine {
        self.shared.irq.clone()
    }
}

impl<D: RadioDriver> Drop for RadioTransport<D> {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.deinitialize();
        }
    }
}

impl<D: RadioDriver> Transport for RadioTransport<D> {
    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }

    fn is_available(&self) -> bool {
        self.is_initialized()
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        self.transmit(payload, None)
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
        MAX_PAYLOAD
    }
}

// ── Worker side ───────────────────────────────────────────────

fn worker_loop<D: RadioDriver>(shared: &Shared<D>, run: &RunFlag) {
    while run.is_set() {
        let mut handled = false;
        while let Some(token) = shared.irq.take() {
            handled = true;
            match token {
                IrqToken::TxDone => shared.on_tx_done(),
                IrqToken::RxDone => shared.on_rx_done(),
            }
        }
        shared.check_tx_timeout();
        if !handled {
            std::thread::sleep(IDLE_POLL);
        }
    }
}

impl<D: RadioDriver> Shared<D> {
    fn with_stats(&self, f: impl FnOnce(&mut RadioStats)) {
        match self.stats.lock_for(LOCK_TIMEOUT) {
            Ok(mut s) => f(&mut s),
            Err(_) => warn!("Radio: stats lock timeout, update lost"),
        }
    }

    /// Return to `Idle`, or back to `Receive` if listening.
    fn settle_after_tx(&self, core: &mut RadioCore<D>) {
        self.irq.disarm();
        core.mode = RadioMode::Idle;
        if core.listening {
            self.irq.arm(IrqToken::RxDone);
            match core.driver.start_receive() {
                Ok(()) => core.mode = RadioMode::Receive,
                Err(e) => {
                    self.irq.disarm();
                    warn!("Radio: re-arm receive failed: {}", e);
                }
            }
        }
    }

    fn on_tx_done(&self) {
        let Ok(mut core) = self.core.lock_for(LOCK_TIMEOUT) else {
            warn!("Radio: lock timeout finalising transmission");
            return;
        };
        if core.tx.is_none() {
            return;
        }
        match core.driver.transmit_complete() {
            Ok(true) => {}
            Ok(false) => {
                debug!("Radio: edge without TX-done, still transmitting");
                return;
            }
            Err(e) => warn!("Radio: IRQ status read failed: {}", e),
        }
        let Some(pending) = core.tx.take() else {
            return;
        };
        let outcome = core
            .driver
            .finish_transmit()
            .map_err(|e| TransmitError::Driver(e.code()));
        self.settle_after_tx(&mut core);
        drop(core);

        self.with_stats(|s| match outcome {
            Ok(()) => s.link.record_sent(pending.len),
            Err(_) => s.link.record_send_error(),
        });
        match outcome {
            Ok(()) => debug!("Radio: sent {} bytes in {:?}", pending.len, pending.started.elapsed()),
            Err(e) => warn!("Radio: transmission failed: {}", e),
        }
        if let Some(cb) = pending.callback {
            cb(outcome);
        }
    }

    fn on_rx_done(&self) {
        let Ok(mut core) = self.core.lock_for(LOCK_TIMEOUT) else {
            warn!("Radio: lock timeout reading packet");
            return;
        };
        if core.mode != RadioMode::Receive {
            return;
        }

        let mut buf = [0u8; MAX_PAYLOAD];
        let read = core.driver.read_packet(&mut buf);
        let status = if read.is_ok() { core.driver.packet_status() } else { PacketStatus::default() };

        self.irq.arm(IrqToken::RxDone);
        if let Err(e) = core.driver.start_receive() {
            self.irq.disarm();
            core.mode = RadioMode::Idle;
            warn!("Radio: re-arm receive failed: {}", e);
        }
        let mut callback = core.rx_callback.take();
        drop(core);

        match read {
            Ok(len) => {
                let len = len.min(MAX_PAYLOAD);
                let mut data = Vec::new();
                let _ = data.extend_from_slice(&buf[..len]);
                let packet = RxPacket {
                    data,
                    rssi: status.rssi,
                    snr: status.snr,
                    freq_error: status.freq_error,
                };
                self.with_stats(|s| {
                    s.link.record_received(len);
                    s.last_rssi = status.rssi;
                    s.last_snr = status.snr;
                    s.last_freq_error = status.freq_error;
                });
                match self.inbound.lock_for(LOCK_TIMEOUT) {
                    Ok(mut q) => {
                        if q.push(&packet.data) {
                            warn!("Radio: inbound queue full, oldest packet dropped");
                        }
                    }
                    Err(_) => warn!("Radio: inbound lock timeout, packet not queued"),
                }
                debug!("Radio: {} bytes, RSSI {:.1} dBm, SNR {:.1} dB", len, status.rssi, status.snr);
                if let Some(cb) = callback.as_mut() {
                    cb(&packet);
                }
            }
            Err(DriverError::CrcMismatch) => {
                self.with_stats(|s| s.crc_errors = s.crc_errors.saturating_add(1));
                debug!("Radio: CRC mismatch, packet discarded");
            }
            Err(e) => {
                self.with_stats(|s| s.link.record_receive_error());
                warn!("Radio: read failed: {}", e);
            }
        }

        if let Some(cb) = callback {
            if let Ok(mut core) = self.core.lock_for(LOCK_TIMEOUT) {
                if core.listening && core.rx_callback.is_none() {
                    core.rx_callback = Some(cb);
                }
            }
        }
    }

    /// Fail a transmission whose completion interrupt never arrived.
    fn check_tx_timeout(&self) {
        let Some(mut core) = self.core.try_lock() else {
            return;
        };
        let limit = Duration::from_millis(u64::from(core.config.tx_timeout_ms));
        let expired = core.tx.as_ref().is_some_and(|p| p.started.elapsed() > limit);
        if !expired {
            return;
        }
        let pending = core.tx.take();
        if let Err(e) = core.driver.standby() {
            warn!("Radio: standby after TX timeout failed: {}", e);
        }
        self.settle_after_tx(&mut core);
        drop(core);
        warn!("Radio: no TX-done interrupt within {:?}", limit);
        if let Some(pending) = pending {
            self.abort_tx(pending);
        }
    }

    fn abort_tx(&self, pending: PendingTx) {
        self.with_stats(|s| s.link.record_send_error());
        if let Some(cb) = pending.callback {
            cb(Err(TransmitError::Aborted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sim::SimRadio;
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn radio() -> (RadioTransport<SimRadio>, sim::SimRadioHandle) {
        let (driver, handle) = SimRadio::new();
        let radio = RadioTransport::new(driver, RadioConfig::default());
        radio.initialize().unwrap();
        (radio, handle)
    }

    #[test]
    fn operations_require_initialisation() {
        let (driver, _h) = SimRadio::new();
        let radio = RadioTransport::new(driver, RadioConfig::default());
        assert_eq!(radio.transmit(&[1], None), Err(Error::NotInitialized));
        assert!(!radio.is_available());
    }

    #[test]
    fn payload_bounds_are_enforced() {
        let (radio, _h) = radio();
        assert_eq!(radio.transmit(&[], None), Err(TransmitError::EmptyPayload.into()));
        assert_eq!(
            radio.transmit(&[0; 256], None),
            Err(TransmitError::PayloadTooLarge { len: 256, max: 255 }.into())
        );
        assert!(radio.transmit(&[0; 255], None).is_ok());
    }

    #[test]
    fn stray_edge_during_transmit_is_not_a_completion() {
        let (radio, handle) = radio();
        handle.set_auto_complete(false);
        radio.transmit(b"slow frame", None).unwrap();

        assert!(handle.glitch_irq());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(radio.mode(), Some(RadioMode::Transmit));
        assert!(radio.stats().unwrap().link.is_zero());

        assert!(handle.complete_transmit());
        assert!(wait_for(|| radio.stats().unwrap().link.messages_sent == 1));
        assert_eq!(radio.stats().unwrap().link.send_errors, 0);
    }

    #[test]
    fn callback_fires_once_and_mode_returns_to_idle() {
        let (radio, handle) = radio();
        handle.set_auto_complete(false);
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        radio
            .transmit(b"hello", Some(Box::new(move |r| {
                assert!(r.is_ok());
                c.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();
        assert_eq!(radio.mode(), Some(RadioMode::Transmit));
        assert_eq!(radio.transmit(b"again", None), Err(TransmitError::Busy.into()));

        assert!(handle.complete_transmit());
        assert!(wait_for(|| calls.load(Ordering::SeqCst) == 1));
        assert!(wait_for(|| radio.mode() == Some(RadioMode::Idle)));
        assert_eq!(radio.stats().unwrap().link.messages_sent, 1);
        assert_eq!(radio.stats().unwrap().link.bytes_sent, 5);
    }

    #[test]
    fn crc_error_is_counted_without_callback() {
        let (radio, handle) = radio();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        radio
            .start_receive(Some(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();

        assert!(handle.deliver_corrupt());
        assert!(wait_for(|| radio.stats().unwrap().crc_errors == 1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(radio.mode(), Some(RadioMode::Receive));

        assert!(handle.deliver(b"ok", -80.0, 7.5));
        assert!(wait_for(|| calls.load(Ordering::SeqCst) == 1));
        let stats = radio.stats().unwrap();
        assert_eq!(stats.link.messages_received, 1);
        assert!((stats.last_rssi + 80.0).abs() < f32::EPSILON);
    }

    #[test]
    fn sleep_aborts_pending_transmission() {
        let (radio, handle) = radio();
        handle.set_auto_complete(false);
        let outcome = Arc::new(TimedMutex::new(None));
        let o = Arc::clone(&outcome);
        radio
            .transmit(b"x", Some(Box::new(move |r| {
                *o.lock_for(Duration::from_secs(1)).unwrap() = Some(r);
            })))
            .unwrap();
        radio.sleep().unwrap();
        assert_eq!(
            *outcome.lock_for(Duration::from_secs(1)).unwrap(),
            Some(Err(TransmitError::Aborted))
        );
        assert_eq!(radio.transmit(b"x", None), Err(TransmitError::Asleep.into()));
        // A late edge after sleep is ignored.
        assert!(!handle.complete_transmit());
        radio.wakeup().unwrap();
        assert_eq!(radio.mode(), Some(RadioMode::Idle));
    }

    #[test]
    fn update_config_restores_receive_mode() {
        let (radio, handle) = radio();
        radio.start_receive(None).unwrap();
        radio.set_frequency(868.0).unwrap();
        assert_eq!(radio.mode(), Some(RadioMode::Receive));
        assert!((handle.params().frequency_mhz - 868.0).abs() < 0.001);

        let bad = RadioConfig { coding_rate: 9, ..radio.config() };
        assert_eq!(radio.update_config(&bad), Err(Error::Config(ConfigParam::CodingRate)));
        assert_eq!(radio.config().coding_rate, 6);
        assert_eq!(radio.mode(), Some(RadioMode::Receive));
    }

    #[test]
    fn hardware_refusal_restores_previous_parameters() {
        let (radio, handle) = radio();
        handle.reject_param(Some(ConfigParam::Bandwidth));
        let cfg = RadioConfig { frequency_mhz: 915.0, bandwidth_khz: 250.0, ..radio.config() };
        assert_eq!(radio.configure_radio(&cfg), Err(Error::Config(ConfigParam::Bandwidth)));
        handle.reject_param(None);
        assert!((handle.params().frequency_mhz - 850.0).abs() < 0.001);
        assert!((radio.config().frequency_mhz - 850.0).abs() < 0.001);
    }

    #[test]
    fn missing_completion_times_out() {
        let (driver, handle) = SimRadio::new();
        let radio = RadioTransport::new(driver, RadioConfig { tx_timeout_ms: 20, ..RadioConfig::default() });
        radio.initialize().unwrap();
        handle.set_auto_complete(false);
        radio.transmit(b"lost", None).unwrap();
        assert!(wait_for(|| radio.stats().unwrap().link.send_errors == 1));
        assert_eq!(radio.stats().unwrap().link.messages_sent, 0);
        assert!(wait_for(|| radio.mode() == Some(RadioMode::Idle)));
    }
}
