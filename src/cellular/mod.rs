//! LTE modem transport (A7682E-class, AT command set).
//!
//! ```text
//!  power_on() ──▶ Initializing ──connect()──▶ Searching ──CREG 1|5──▶ Registered
//!      │                                          │                      │ CGACT=1,1
//!      ▼                                          ▼                      ▼
//!     Off ◀── power_off() (from any state)      Error ◀──failure──── Connected
//!                                                                        │
//!                                    disconnect() / registration lost ───▶ Disconnected
//! ```
//!
//! All modem traffic goes through one port lock.  `send_command` holds it
//! for a single exchange; between exchanges the `modem` worker takes it
//! briefly to pump unsolicited result codes through [`at::UrcParser`],
//! then dispatches them with no lock held.  Opaque payloads ride the
//! modem's UDP socket: `AT+CIPSEND` out, `+RECEIVE` in.

pub mod at;
pub mod port;
#[cfg(not(target_os = "espidf"))]
pub mod sim;

use core::fmt::{self, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use heapless::{String, Vec};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{CellularConfig, DatagramEndpoint, ModemTiming};
use crate::drivers::task_pin::{Core, RunFlag, TaskSpec, Worker};
use crate::error::{ConfigParam, ConnectionError, Error, ReceiveError, Result, TransmitError};
use crate::stats::{CellularStats, LinkCounters};
use crate::sync::TimedMutex;
use crate::transport::{InboundQueue, Transport, TransportKind};

pub use at::{
    AtResponse, AtText, MAX_DATAGRAM, MAX_SMS_LIST, MAX_SMS_TEXT, PhoneNumber, Registration, SignalQuality,
    SimStatus, SmsMessage,
};
use at::{AtCommand, COMMAND_CAPACITY, CTRL_Z, Notice, UrcParser};
use port::{ModemPort, PortError};

const INBOUND_DEPTH: usize = 8;
const READ_CHUNK: usize = 128;
/// Notices dispatched per worker tick.
const NOTICE_BATCH: usize = 8;

const LOCK_TIMEOUT: Duration = Duration::from_millis(1_000);
const POLL_LOCK_TIMEOUT: Duration = Duration::from_millis(100);
/// Worker's try timeout on the port lock.
const URC_LOCK_TIMEOUT: Duration = Duration::from_millis(10);
const READ_POLL: Duration = Duration::from_millis(2);
const WORKER_TICK: Duration = Duration::from_millis(20);

const DEACTIVATION_TIMEOUT: Duration = Duration::from_millis(10_000);
const SMS_LIST_TIMEOUT: Duration = Duration::from_millis(5_000);
const DIAL_TIMEOUT: Duration = Duration::from_millis(5_000);

const CELLULAR_TASK: TaskSpec = TaskSpec {
    name: "modem\0",
    core: Core::Pro,
    priority: 4,
    stack_kb: 8,
};

const fn ms(v: u32) -> Duration {
    Duration::from_millis(v as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CellularStatus {
    Off,
    Initializing,
    Searching,
    Registered,
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Ringing,
    CallerId(PhoneNumber),
    Ended,
}

pub type StatusCallback = Box<dyn FnMut(CellularStatus) + Send>;
pub type SmsCallback = Box<dyn FnMut(&SmsMessage) + Send>;
pub type CallCallback = Box<dyn FnMut(&CallEvent) + Send>;

fn port_error(e: PortError) -> Error {
    warn!("Cellular: port error: {}", e);
    match e {
        PortError::Uart(code) => TransmitError::Driver(code as i16).into(),
        PortError::Gpio => Error::Init("modem control line"),
    }
}

fn at_command(args: fmt::Arguments<'_>) -> Result<AtCommand> {
    let mut cmd = AtCommand::new();
    cmd.write_fmt(args).map_err(|_| TransmitError::PayloadTooLarge {
        len: COMMAND_CAPACITY + 1,
        max: COMMAND_CAPACITY,
    })?;
    Ok(cmd)
}

/// Map an exchange that did not end in `OK`.
fn expect_ok(resp: AtResponse) -> Result<AtResponse> {
    if resp.is_ok() {
        Ok(resp)
    } else if resp.is_complete() {
        Err(ConnectionError::CommandRejected.into())
    } else {
        Err(Error::CommandTimeout)
    }
}

// ── Port side ─────────────────────────────────────────────────

struct PortState<P> {
    port: P,
    urc: UrcParser,
    last_activity: Instant,
}

impl<P: ModemPort> PortState<P> {
    /// Move whatever is buffered into the URC parser.
    fn pump(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.urc.feed(&chunk[..n]);
                    self.last_activity = Instant::now();
                }
                Err(e) => {
                    debug!("Cellular: read failed: {}", e);
                    break;
                }
            }
        }
    }

    fn exchange(&mut self, command: &str, deadline: Instant, allow_prompt: bool) -> Result<AtResponse> {
        self.pump();
        self.port.write_all(command.as_bytes()).map_err(port_error)?;
        self.port.write_all(b"\r").map_err(port_error)?;
        Ok(self.read_response(deadline, allow_prompt))
    }

    /// Read until a terminator or `deadline`.  Bytes after the terminator
    /// belong to the next notification.
    fn read_response(&mut self, deadline: Instant, allow_prompt: bool) -> AtResponse {
        let mut resp = AtResponse::new();
        let mut chunk = [0u8; READ_CHUNK];
        'read: loop {
            match self.port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    for (i, &b) in chunk[..n].iter().enumerate() {
                        resp.push_bytes(&[b]);
                        if matches!(b, b'\n' | b'>') {
                            if let Some(t) = at::find_terminator(&resp.text, allow_prompt) {
                                resp.terminator = Some(t);
                                self.urc.feed(&chunk[i + 1..n]);
                                break 'read;
                            }
                        }
                    }
                    continue;
                }
                Err(e) => {
                    warn!("Cellular: read failed: {}", e);
                    break;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(READ_POLL.min(deadline - now));
        }
        self.last_activity = Instant::now();
        resp
    }
}

// ── Session state ─────────────────────────────────────────────

struct Session {
    status: CellularStatus,
    socket_open: bool,
    connected_at: Option<Instant>,
    auto_connect_pending: bool,
    status_cb: Option<StatusCallback>,
    sms_cb: Option<SmsCallback>,
    call_cb: Option<CallCallback>,
}

struct Shared<P> {
    /// Held only long enough to copy; never across an exchange.
    config: TimedMutex<CellularConfig>,
    port: TimedMutex<PortState<P>>,
    session: TimedMutex<Session>,
    stats: TimedMutex<CellularStats>,
    inbound: TimedMutex<InboundQueue<MAX_DATAGRAM, INBOUND_DEPTH>>,
    initialized: AtomicBool,
    powered: AtomicBool,
}

pub struct CellularTransport<P: ModemPort> {
    shared: Arc<Shared<P>>,
    worker: TimedMutex<Option<Worker>>,
}

/// Identity and radio snapshot, see [`CellularTransport::modem_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModemInfo {
    /// `ATI` lines.
    pub ident: AtText,
    pub imei: Option<String<20>>,
    pub iccid: Option<String<24>>,
    pub operator: Option<String<32>>,
    pub signal: Option<SignalQuality>,
}

impl<P: ModemPort> CellularTransport<P> {
    pub fn new(port: P, config: CellularConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: TimedMutex::new(config),
                port: TimedMutex::new(PortState {
                    port,
                    urc: UrcParser::new(),
                    last_activity: Instant::now(),
                }),
                session: TimedMutex::new(Session {
                    status: CellularStatus::Off,
                    socket_open: false,
                    connected_at: None,
                    auto_connect_pending: false,
                    status_cb: None,
                    sms_cb: None,
                    call_cb: None,
                }),
                stats: TimedMutex::new(CellularStats::default()),
                inbound: TimedMutex::new(InboundQueue::new()),
                initialized: AtomicBool::new(false),
                powered: AtomicBool::new(false),
            }),
            worker: TimedMutex::new(None),
        }
    }

    /// Validate the configuration and start the worker.  The modem stays
    /// off unless `auto_connect` is set.
    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let config = self.shared.config()?;
        config.validate()?;
        self.shared.session.lock_for(LOCK_TIMEOUT)?.auto_connect_pending = config.auto_connect;
        let shared = Arc::clone(&self.shared);
        let worker = Worker::spawn(&CELLULAR_TASK, move |run| worker_loop(&shared, &run))?;
        *self.worker.lock_for(LOCK_TIMEOUT)? = Some(worker);
        self.shared.initialized.store(true, Ordering::Release);
        info!("Cellular: initialised (APN '{}', {} baud)", config.apn.apn, config.baud_rate);
        Ok(())
    }

    pub fn deinitialize(&self) {
        if let Ok(mut slot) = self.worker.lock_for(LOCK_TIMEOUT) {
            slot.take();
        }
        if self.is_powered() {
            if let Err(e) = self.power_off() {
                warn!("Cellular: power off during shutdown failed: {}", e);
            }
        }
        self.shared.initialized.store(false, Ordering::Release);
        if let Ok(mut s) = self.shared.session.lock_for(LOCK_TIMEOUT) {
            s.status_cb = None;
            s.sms_cb = None;
            s.call_cb = None;
        }
        info!("Cellular: deinitialised");
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    pub fn is_powered(&self) -> bool {
        self.shared.powered.load(Ordering::Acquire)
    }

    pub fn config(&self) -> Result<CellularConfig> {
        self.shared.config()
    }

    /// Replace the configuration.  A live data session is closed, the new
    /// settings stored, and the session brought back up under them.  The
    /// UART baud rate belongs to the port and is not changed here.
    pub fn update_config(&self, config: CellularConfig) -> Result<()> {
        config.validate()?;
        let shared = &self.shared;
        let was_connected = shared.status() == CellularStatus::Connected;
        if was_connected {
            shared.disconnect()?;
        }
        *shared.config.lock_for(LOCK_TIMEOUT)? = config;
        info!("Cellular: configuration updated");
        if was_connected {
            shared.connect(None)?;
        }
        Ok(())
    }

    // ── Commands ──────────────────────────────────────────────

    /// One AT exchange: `command` plus CR out, response in until a final
    /// result code or `timeout`.  Lock wait and read share the deadline.
    pub fn send_command(&self, command: &str, timeout: Duration) -> Result<AtResponse> {
        self.shared.send_command(command, timeout)
    }

    // ── Power ─────────────────────────────────────────────────

    pub fn power_on(&self) -> Result<()> {
        self.shared.power_on()
    }

    pub fn power_off(&self) -> Result<()> {
        self.shared.power_off()
    }

    // ── Data session ──────────────────────────────────────────

    /// Register and bring up the packet data context.  Blocks for the
    /// whole sequence; `callback` receives this and later status changes.
    pub fn connect(&self, callback: Option<StatusCallback>) -> Result<()> {
        self.shared.connect(callback)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.shared.disconnect()
    }

    // ── SMS ───────────────────────────────────────────────────

    pub fn send_sms(&self, number: &str, text: &str) -> Result<()> {
        if number.is_empty() || number.contains('"') {
            return Err(ConnectionError::CommandRejected.into());
        }
        if text.len() > MAX_SMS_TEXT {
            return Err(TransmitError::PayloadTooLarge { len: text.len(), max: MAX_SMS_TEXT }.into());
        }
        let shared = &self.shared;
        if shared.status() != CellularStatus::Connected {
            return Err(ConnectionError::WrongState.into());
        }
        let t = shared.timing()?;
        shared.command("AT+CMGF=1", ms(t.command_timeout_ms))?;
        let cmd = at_command(format_args!("AT+CMGS=\"{}\"", number))?;
        let mut body: Vec<u8, { MAX_SMS_TEXT + 1 }> = Vec::new();
        let _ = body.extend_from_slice(text.as_bytes());
        let _ = body.push(CTRL_Z);
        shared.with_prompt(&cmd, &body, ms(t.sms_timeout_ms))?;
        shared.with_stats(|s| s.sms_sent = s.sms_sent.saturating_add(1));
        info!("Cellular: SMS sent to {}", number);
        Ok(())
    }

    pub fn read_sms(&self, unread_only: bool) -> Result<Vec<SmsMessage, MAX_SMS_LIST>> {
        let shared = &self.shared;
        shared.require_powered()?;
        shared.command("AT+CMGF=1", shared.cmd_timeout()?)?;
        let filter = if unread_only { "REC UNREAD" } else { "ALL" };
        let cmd = at_command(format_args!("AT+CMGL=\"{}\"", filter))?;
        let resp = shared.command(&cmd, SMS_LIST_TIMEOUT)?;
        if resp.truncated {
            warn!("Cellular: SMS list truncated");
        }
        Ok(at::parse_cmgl(&resp))
    }

    pub fn delete_sms(&self, index: u16) -> Result<()> {
        let shared = &self.shared;
        shared.require_powered()?;
        let cmd = at_command(format_args!("AT+CMGD={}", index))?;
        shared.command(&cmd, shared.cmd_timeout()?)?;
        Ok(())
    }

    pub fn set_sms_callback(&self, callback: Option<SmsCallback>) -> Result<()> {
        self.shared.session.lock_for(LOCK_TIMEOUT)?.sms_cb = callback;
        Ok(())
    }

    // ── Voice ─────────────────────────────────────────────────

    pub fn make_call(&self, number: &str) -> Result<()> {
        let shared = &self.shared;
        if !matches!(shared.status(), CellularStatus::Registered | CellularStatus::Connected) {
            return Err(ConnectionError::WrongState.into());
        }
        let cmd = at_command(format_args!("ATD{};", number))?;
        shared.command(&cmd, DIAL_TIMEOUT)?;
        info!("Cellular: dialling {}", number);
        Ok(())
    }

    pub fn answer_call(&self) -> Result<()> {
        self.shared.require_powered()?;
        self.shared.command("ATA", self.shared.cmd_timeout()?)?;
        Ok(())
    }

    pub fn hangup_call(&self) -> Result<()> {
        self.shared.require_powered()?;
        self.shared.command("ATH", self.shared.cmd_timeout()?)?;
        Ok(())
    }

    pub fn set_call_callback(&self, callback: Option<CallCallback>) -> Result<()> {
        self.shared.session.lock_for(LOCK_TIMEOUT)?.call_cb = callback;
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn sim_status(&self) -> Result<SimStatus> {
        self.shared.require_powered()?;
        self.shared.sim_status()
    }

    /// `AT+CSQ`; also refreshes the signal fields in [`stats`](Self::stats).
    pub fn signal_quality(&self) -> Result<SignalQuality> {
        self.shared.require_powered()?;
        self.shared.signal_quality()
    }

    pub fn registration(&self) -> Result<Registration> {
        let shared = &self.shared;
        shared.require_powered()?;
        let resp = shared.command("AT+CREG?", shared.cmd_timeout()?)?;
        at::parse_creg_query(&resp).ok_or_else(|| ReceiveError::Malformed.into())
    }

    pub fn operator_name(&self) -> Result<Option<String<32>>> {
        let shared = &self.shared;
        shared.require_powered()?;
        let resp = shared.command("AT+COPS?", shared.cmd_timeout()?)?;
        Ok(at::parse_cops(&resp))
    }

    pub fn imei(&self) -> Result<String<20>> {
        let shared = &self.shared;
        shared.require_powered()?;
        let resp = shared.command("AT+CGSN", shared.cmd_timeout()?)?;
        at::first_value_line(&resp)
            .and_then(|l| String::try_from(l).ok())
            .ok_or_else(|| ReceiveError::Malformed.into())
    }

    pub fn iccid(&self) -> Result<String<24>> {
        let shared = &self.shared;
        shared.require_powered()?;
        let resp = shared.command("AT+CCID", shared.cmd_timeout()?)?;
        at::parse_iccid(&resp).ok_or_else(|| ReceiveError::Malformed.into())
    }

    /// `ATI` identification plus whatever identity queries succeed.
    pub fn modem_info(&self) -> Result<ModemInfo> {
        let shared = &self.shared;
        shared.require_powered()?;
        let resp = shared.command("ATI", shared.cmd_timeout()?)?;
        let mut ident = AtText::new();
        for line in resp.lines().filter(|l| *l != "OK") {
            if !ident.is_empty() && ident.push('\n').is_err() {
                break;
            }
            if ident.push_str(line).is_err() {
                break;
            }
        }
        Ok(ModemInfo {
            ident,
            imei: self.imei().ok(),
            iccid: self.iccid().ok(),
            operator: self.operator_name().ok().flatten(),
            signal: self.signal_quality().ok(),
        })
    }

    pub fn status(&self) -> CellularStatus {
        self.shared.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == CellularStatus::Connected
    }

    /// Time since the data context came up.
    pub fn uptime(&self) -> Duration {
        self.shared
            .session
            .lock_for(POLL_LOCK_TIMEOUT)
            .ok()
            .and_then(|s| s.connected_at)
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> Result<CellularStats> {
        Ok(*self.shared.stats.lock_for(POLL_LOCK_TIMEOUT)?)
    }

    pub fn reset_stats(&self) -> Result<()> {
        *self.shared.stats.lock_for(LOCK_TIMEOUT)? = CellularStats::default();
        Ok(())
    }
}

impl<P: ModemPort> Drop for CellularTransport<P> {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.deinitialize();
        }
    }
}

impl<P: ModemPort> Transport for CellularTransport<P> {
    fn kind(&self) -> TransportKind {
        TransportKind::Cellular
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
        let shared = &self.shared;
        let ready = {
            let s = shared.session.lock_for(LOCK_TIMEOUT)?;
            s.status == CellularStatus::Connected && s.socket_open
        };
        if !ready {
            shared.with_stats(|s| s.link.record_send_error());
            return Err(TransmitError::NotConnected.into());
        }
        let config = shared.config()?;
        let Some(endpoint) = config.endpoint.as_ref() else {
            return Err(ConfigParam::Endpoint.into());
        };
        let cmd = at_command(format_args!(
            "AT+CIPSEND=0,{},\"{}\",{}",
            payload.len(),
            endpoint.host,
            endpoint.port
        ))?;
        match shared.with_prompt(&cmd, payload, ms(config.timing.command_timeout_ms)) {
            Ok(()) => {
                shared.with_stats(|s| s.link.record_sent(payload.len()));
                Ok(())
            }
            Err(e) => {
                shared.with_stats(|s| s.link.record_send_error());
                warn!("Cellular: datagram to {}:{} failed: {}", endpoint.host, endpoint.port, e);
                Err(e)
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

// ── Shared operations ─────────────────────────────────────────

impl<P: ModemPort> Shared<P> {
    fn config(&self) -> Result<CellularConfig> {
        Ok(self.config.lock_for(LOCK_TIMEOUT)?.clone())
    }

    fn timing(&self) -> Result<ModemTiming> {
        Ok(self.config.lock_for(LOCK_TIMEOUT)?.timing)
    }

    fn cmd_timeout(&self) -> Result<Duration> {
        Ok(ms(self.timing()?.command_timeout_ms))
    }

    fn with_stats(&self, f: impl FnOnce(&mut CellularStats)) {
        match self.stats.lock_for(LOCK_TIMEOUT) {
            Ok(mut s) => f(&mut s),
            Err(_) => warn!("Cellular: stats lock timeout, update lost"),
        }
    }

    fn status(&self) -> CellularStatus {
        self.session
            .lock_for(POLL_LOCK_TIMEOUT)
            .map_or(CellularStatus::Off, |s| s.status)
    }

    fn is_powered(&self) -> bool {
        self.powered.load(Ordering::Acquire)
    }

    fn require_powered(&self) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(Error::NotInitialized);
        }
        if self.is_powered() { Ok(()) } else { Err(ConnectionError::NotPowered.into()) }
    }

    /// Move to `status` and run the status callback outside the lock.
    fn transition(&self, status: CellularStatus) {
        let cb = match self.session.lock_for(LOCK_TIMEOUT) {
            Ok(mut s) => {
                if s.status == status {
                    return;
                }
                s.status = status;
                s.connected_at = (status == CellularStatus::Connected).then(Instant::now);
                s.status_cb.take()
            }
            Err(_) => {
                warn!("Cellular: lock timeout moving to {:?}", status);
                return;
            }
        };
        debug!("Cellular: status {:?}", status);
        let Some(mut cb) = cb else {
            return;
        };
        cb(status);
        if let Ok(mut s) = self.session.lock_for(LOCK_TIMEOUT) {
            if s.status_cb.is_none() {
                s.status_cb = Some(cb);
            }
        }
    }

    fn send_command(&self, command: &str, timeout: Duration) -> Result<AtResponse> {
        let deadline = Instant::now() + timeout;
        let mut port = self.port.lock_for(timeout)?;
        let resp = port.exchange(command, deadline, false)?;
        if !resp.is_complete() {
            debug!("Cellular: '{}' got no final result in {:?}", command, timeout);
        }
        Ok(resp)
    }

    /// [`send_command`](Self::send_command) that requires `OK`.
    fn command(&self, command: &str, timeout: Duration) -> Result<AtResponse> {
        let resp = self.send_command(command, timeout)?;
        expect_ok(resp).inspect_err(|e| debug!("Cellular: '{}' failed: {}", command, e))
    }

    /// Command that answers with a `>` prompt, then `payload`, then the
    /// final result within `final_timeout`.  One lock hold for both halves.
    fn with_prompt(&self, command: &str, payload: &[u8], final_timeout: Duration) -> Result<()> {
        let timeout = self.cmd_timeout()?;
        let deadline = Instant::now() + timeout;
        let mut port = self.port.lock_for(timeout)?;
        let prompt = port.exchange(command, deadline, true)?;
        if !prompt.is_prompt() {
            expect_ok(prompt)?;
            return Err(ConnectionError::CommandRejected.into());
        }
        port.port.write_all(payload).map_err(port_error)?;
        let resp = port.read_response(Instant::now() + final_timeout, false);
        expect_ok(resp).map(|_| ())
    }

    fn sim_status(&self) -> Result<SimStatus> {
        let resp = self.send_command("AT+CPIN?", self.cmd_timeout()?)?;
        if !resp.is_complete() {
            return Err(Error::CommandTimeout);
        }
        Ok(at::parse_cpin(&resp))
    }

    fn signal_quality(&self) -> Result<SignalQuality> {
        let resp = self.command("AT+CSQ", self.cmd_timeout()?)?;
        let q = at::parse_csq(&resp).ok_or(ReceiveError::Malformed)?;
        self.with_stats(|s| {
            s.last_signal_quality = q.raw;
            s.last_rssi = q.rssi_dbm.unwrap_or(0);
        });
        Ok(q)
    }

    // ── Power ─────────────────────────────────────────────────

    fn power_on(&self) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(Error::NotInitialized);
        }
        if self.is_powered() {
            return Ok(());
        }
        info!("Cellular: powering on");
        if let Err(e) = self.boot() {
            warn!("Cellular: power on failed: {}", e);
            self.shutdown();
            self.transition(CellularStatus::Off);
            return Err(match e {
                Error::Init(msg) => Error::Init(msg),
                _ => Error::Init("modem setup failed"),
            });
        }
        self.powered.store(true, Ordering::Release);
        info!("Cellular: modem ready");
        Ok(())
    }

    fn boot(&self) -> Result<()> {
        let config = self.config()?;
        let t = config.timing;
        {
            let mut port = self.port.lock_for(LOCK_TIMEOUT)?;
            let p = &mut port.port;
            p.set_reset(false).map_err(port_error)?;
            thread::sleep(ms(t.reset_pulse_ms));
            p.set_reset(true).map_err(port_error)?;
            thread::sleep(ms(t.reset_pulse_ms));
            p.set_power_key(false).map_err(port_error)?;
            thread::sleep(ms(t.power_key_pulse_ms));
            p.set_power_key(true).map_err(port_error)?;
            let _ = p.flush();
            port.urc.clear();
        }
        thread::sleep(ms(t.boot_wait_ms));
        self.transition(CellularStatus::Initializing);

        let probe_deadline = Instant::now() + ms(config.init_timeout_ms);
        let alive = (0..t.probe_attempts).any(|attempt| {
            if attempt > 0 {
                if Instant::now() >= probe_deadline {
                    return false;
                }
                thread::sleep(ms(t.probe_interval_ms));
            }
            self.send_command("AT", ms(t.command_timeout_ms)).is_ok_and(|r| r.is_ok())
        });
        if !alive {
            return Err(Error::Init("modem not responding"));
        }

        for cmd in ["ATE0", "AT+CMEE=2", "AT+CREG=2", "AT+CNMI=2,2,0,0,0"] {
            self.command(cmd, ms(t.command_timeout_ms))
                .map_err(|_| Error::Init("modem setup rejected"))?;
        }
        Ok(())
    }

    fn power_off(&self) -> Result<()> {
        if self.is_powered() {
            self.shutdown();
        }
        self.powered.store(false, Ordering::Release);
        if let Ok(mut s) = self.session.lock_for(LOCK_TIMEOUT) {
            s.socket_open = false;
        }
        if let Ok(mut port) = self.port.lock_for(LOCK_TIMEOUT) {
            port.urc.clear();
        }
        self.transition(CellularStatus::Off);
        info!("Cellular: powered off");
        Ok(())
    }

    /// `AT+CPOF` then a long PWRKEY pulse, best effort.
    fn shutdown(&self) {
        let t = self.timing().unwrap_or_else(|e| {
            warn!("Cellular: {}, powering off with default timing", e);
            ModemTiming::default()
        });
        if let Err(e) = self.send_command("AT+CPOF", ms(t.command_timeout_ms)) {
            debug!("Cellular: AT+CPOF failed: {}", e);
        }
        match self.port.lock_for(LOCK_TIMEOUT) {
            Ok(mut port) => {
                let pulsed = port
                    .port
                    .set_power_key(false)
                    .and_then(|()| {
                        thread::sleep(ms(t.power_off_pulse_ms));
                        port.port.set_power_key(true)
                    });
                if let Err(e) = pulsed {
                    warn!("Cellular: power key pulse failed: {}", e);
                }
            }
            Err(_) => warn!("Cellular: port lock timeout during power off"),
        }
    }

    // ── Data session ──────────────────────────────────────────

    fn connect(&self, callback: Option<StatusCallback>) -> Result<()> {
        self.require_powered()?;
        let config = self.config()?;
        {
            let mut s = self.session.lock_for(LOCK_TIMEOUT)?;
            if callback.is_some() {
                s.status_cb = callback;
            }
            // The modem refuses a second activation of a live context.
            if s.status == CellularStatus::Connected {
                debug!("Cellular: already connected");
                return Ok(());
            }
        }
        self.with_stats(|s| s.connect_attempts = s.connect_attempts.saturating_add(1));
        self.transition(CellularStatus::Searching);
        info!("Cellular: connecting (APN '{}')", config.apn.apn);

        match self.establish(&config) {
            Ok(()) => {
                self.with_stats(|s| s.successful_connections = s.successful_connections.saturating_add(1));
                self.transition(CellularStatus::Connected);
                info!("Cellular: connected");
                Ok(())
            }
            Err(e) => {
                warn!("Cellular: connect failed: {}", e);
                self.transition(CellularStatus::Error);
                Err(e)
            }
        }
    }

    fn establish(&self, config: &CellularConfig) -> Result<()> {
        let t = &config.timing;
        let cmd_timeout = ms(t.command_timeout_ms);
        let deadline = Instant::now() + ms(config.connect_timeout_ms);

        let mut sim = self.sim_status()?;
        if sim == SimStatus::PinRequired && !config.pin.is_empty() {
            let cmd = at_command(format_args!("AT+CPIN=\"{}\"", config.pin))?;
            if self.command(&cmd, cmd_timeout).is_err() {
                warn!("Cellular: SIM PIN rejected");
                return Err(ConnectionError::SimNotReady.into());
            }
            sim = self.sim_status()?;
        }
        if sim != SimStatus::Ready {
            warn!("Cellular: SIM not ready ({:?})", sim);
            return Err(ConnectionError::SimNotReady.into());
        }

        let apn = &config.apn;
        let cmd = at_command(format_args!("AT+CGDCONT=1,\"IP\",\"{}\"", apn.apn))?;
        self.command(&cmd, cmd_timeout)?;
        if !apn.username.is_empty() {
            let cmd = at_command(format_args!(
                "AT+CGAUTH=1,{},\"{}\",\"{}\"",
                apn.auth.code(),
                apn.username,
                apn.password
            ))?;
            self.command(&cmd, cmd_timeout)?;
        }

        let mut registered = None;
        for poll in 0..t.registration_polls {
            if poll > 0 {
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(ms(t.registration_interval_ms));
            }
            if let Ok(resp) = self.send_command("AT+CREG?", cmd_timeout) {
                if let Some(reg) = at::parse_creg_query(&resp).filter(|r| r.is_registered()) {
                    registered = Some(reg);
                    break;
                }
            }
        }
        let Some(reg) = registered else {
            return Err(ConnectionError::RegistrationTimeout.into());
        };
        info!("Cellular: registered ({:?})", reg);
        self.transition(CellularStatus::Registered);

        if self.command("AT+CGACT=1,1", ms(t.activation_timeout_ms)).is_err() {
            return Err(ConnectionError::ActivationFailed.into());
        }
        if let Err(e) = self.signal_quality() {
            debug!("Cellular: signal query failed: {}", e);
        }
        if let Some(endpoint) = &config.endpoint {
            self.open_socket(endpoint, ms(t.activation_timeout_ms))?;
        }
        Ok(())
    }

    fn open_socket(&self, endpoint: &DatagramEndpoint, timeout: Duration) -> Result<()> {
        self.command("AT+NETOPEN", timeout)
            .map_err(|_| Error::from(ConnectionError::ActivationFailed))?;
        let cmd = at_command(format_args!("AT+CIPOPEN=0,\"UDP\",,,{}", endpoint.local_port))?;
        self.command(&cmd, timeout)
            .map_err(|_| Error::from(ConnectionError::ActivationFailed))?;
        self.session.lock_for(LOCK_TIMEOUT)?.socket_open = true;
        info!("Cellular: UDP socket open on port {}", endpoint.local_port);
        Ok(())
    }

    fn close_socket(&self, timeout: Duration) {
        for cmd in ["AT+CIPCLOSE=0", "AT+NETCLOSE"] {
            if let Err(e) = self.command(cmd, timeout) {
                debug!("Cellular: '{}' failed: {}", cmd, e);
            }
        }
        if let Ok(mut s) = self.session.lock_for(LOCK_TIMEOUT) {
            s.socket_open = false;
        }
    }

    fn disconnect(&self) -> Result<()> {
        let socket_open = {
            let s = self.session.lock_for(LOCK_TIMEOUT)?;
            if s.status != CellularStatus::Connected {
                return Ok(());
            }
            s.socket_open
        };
        if socket_open {
            self.close_socket(self.cmd_timeout()?);
        }
        if let Err(e) = self.command("AT+CGACT=0,1", DEACTIVATION_TIMEOUT) {
            warn!("Cellular: context deactivation failed: {}", e);
        }
        self.with_stats(|s| s.disconnections = s.disconnections.saturating_add(1));
        self.transition(CellularStatus::Disconnected);
        info!("Cellular: disconnected");
        Ok(())
    }

    // ── Unsolicited traffic ───────────────────────────────────

    fn take_auto_connect(&self) -> bool {
        self.session
            .lock_for(POLL_LOCK_TIMEOUT)
            .is_ok_and(|mut s| core::mem::take(&mut s.auto_connect_pending))
    }

    /// Power on and connect, retrying up to `max_retries` times.
    fn auto_connect(&self, run: &RunFlag) {
        let config = match self.config() {
            Ok(c) => c,
            Err(e) => {
                warn!("Cellular: auto-connect skipped: {}", e);
                return;
            }
        };
        let attempts = u16::from(config.max_retries) + 1;
        for attempt in 1..=attempts {
            if !run.is_set() {
                return;
            }
            info!("Cellular: auto-connect attempt {}/{}", attempt, attempts);
            let outcome = self.power_on().and_then(|()| self.connect(None));
            match outcome {
                Ok(()) => return,
                Err(e) => warn!("Cellular: auto-connect failed: {}", e),
            }
            run.sleep(ms(config.timing.probe_interval_ms));
        }
        warn!("Cellular: auto-connect gave up after {} attempts", attempts);
    }

    /// Pop one decoded notification, pumping the port first.
    fn next_notice(&self) -> Option<Notice> {
        let mut port = self.port.lock_for(URC_LOCK_TIMEOUT).ok()?;
        port.pump();
        port.urc.pop()
    }

    fn keepalive(&self) {
        let Ok(t) = self.timing() else {
            return;
        };
        let idle = self
            .port
            .lock_for(URC_LOCK_TIMEOUT)
            .is_ok_and(|p| p.last_activity.elapsed() >= ms(t.keepalive_interval_ms));
        if !idle {
            return;
        }
        match self.send_command("AT", ms(t.command_timeout_ms)) {
            Ok(r) if r.is_ok() => debug!("Cellular: keep-alive ok"),
            Ok(_) => warn!("Cellular: keep-alive unanswered"),
            Err(e) => warn!("Cellular: keep-alive failed: {}", e),
        }
    }

    fn dispatch(&self, notice: Notice) {
        match notice {
            Notice::NewSms { index } => self.fetch_sms(index),
            Notice::Sms(msg) => self.deliver_sms(&msg),
            Notice::Ring => {
                info!("Cellular: incoming call");
                self.deliver_call(&CallEvent::Ringing);
            }
            Notice::CallerId(number) => self.deliver_call(&CallEvent::CallerId(number)),
            Notice::NoCarrier => {
                info!("Cellular: call ended");
                self.deliver_call(&CallEvent::Ended);
            }
            Notice::Registration(reg) => self.on_registration(reg),
            Notice::Datagram(data) => {
                self.with_stats(|s| s.link.record_received(data.len()));
                match self.inbound.lock_for(LOCK_TIMEOUT) {
                    Ok(mut q) => {
                        if q.push(&data) {
                            warn!("Cellular: inbound queue full, oldest datagram dropped");
                        }
                    }
                    Err(_) => warn!("Cellular: inbound lock timeout, datagram dropped"),
                }
            }
            Notice::LinkClosed => {
                if let Ok(mut s) = self.session.lock_for(LOCK_TIMEOUT) {
                    s.socket_open = false;
                }
                warn!("Cellular: data link closed by network");
            }
        }
    }

    fn on_registration(&self, reg: Registration) {
        debug!("Cellular: registration {:?}", reg);
        if reg.is_registered() {
            return;
        }
        let lost = match self.session.lock_for(LOCK_TIMEOUT) {
            Ok(mut s) if s.status == CellularStatus::Connected => {
                s.socket_open = false;
                true
            }
            _ => false,
        };
        if lost {
            warn!("Cellular: network registration lost");
            self.with_stats(|s| s.disconnections = s.disconnections.saturating_add(1));
            self.transition(CellularStatus::Disconnected);
        }
    }

    fn fetch_sms(&self, index: u16) {
        let fetched = at_command(format_args!("AT+CMGR={}", index))
            .and_then(|cmd| self.command(&cmd, self.cmd_timeout()?));
        match fetched.map(|resp| at::parse_cmgr(&resp, index)) {
            Ok(Some(msg)) => self.deliver_sms(&msg),
            Ok(None) => warn!("Cellular: SMS {} unreadable", index),
            Err(e) => warn!("Cellular: SMS {} fetch failed: {}", index, e),
        }
    }

    fn deliver_sms(&self, msg: &SmsMessage) {
        info!("Cellular: SMS from {}", msg.sender);
        self.with_stats(|s| s.sms_received = s.sms_received.saturating_add(1));
        let cb = self.session.lock_for(LOCK_TIMEOUT).ok().and_then(|mut s| s.sms_cb.take());
        let Some(mut cb) = cb else {
            return;
        };
        cb(msg);
        if let Ok(mut s) = self.session.lock_for(LOCK_TIMEOUT) {
            if s.sms_cb.is_none() {
                s.sms_cb = Some(cb);
            }
        }
    }

    fn deliver_call(&self, event: &CallEvent) {
        let cb = self.session.lock_for(LOCK_TIMEOUT).ok().and_then(|mut s| s.call_cb.take());
        let Some(mut cb) = cb else {
            return;
        };
        cb(event);
        if let Ok(mut s) = self.session.lock_for(LOCK_TIMEOUT) {
            if s.call_cb.is_none() {
                s.call_cb = Some(cb);
            }
        }
    }
}

fn worker_loop<P: ModemPort>(shared: &Shared<P>, run: &RunFlag) {
    while run.is_set() {
        if shared.take_auto_connect() {
            shared.auto_connect(run);
        }
        if shared.is_powered() {
            for _ in 0..NOTICE_BATCH {
                let Some(notice) = shared.next_notice() else {
                    break;
                };
                shared.dispatch(notice);
            }
            shared.keepalive();
        }
        run.sleep(WORKER_TICK);
    }
}
