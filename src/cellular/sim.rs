//! Scripted A7682E stand-in for host builds and tests.
//!
//! Answers the AT subset the transport uses with canned responses shaped
//! like the real modem's (no echo, `\r\n` framing).  The handle injects
//! unsolicited traffic and inspects what the transport wrote.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::at::CTRL_Z;
use super::port::{ModemPort, PortError};

pub const IMEI: &str = "861234567890123";
pub const ICCID: &str = "89440000000000000012";
pub const OPERATOR: &str = "Simulated Telecom";
const TIMESTAMP: &str = "24/05/01,10:00:00+08";

enum Entry {
    Command,
    Sms { number: String, text: Vec<u8> },
    Data { len: usize, buf: Vec<u8> },
}

struct Stored {
    index: u16,
    sender: String,
    text: String,
    read: bool,
}

struct SimState {
    rx: VecDeque<u8>,
    line: Vec<u8>,
    entry: Entry,
    silent: bool,
    sim_present: bool,
    pin: Option<String>,
    searching_polls: u32,
    registration: u8,
    activation_ok: bool,
    csq: u8,
    stored: Vec<Stored>,
    next_index: u16,
    reject: Vec<String>,
    commands: Vec<String>,
    sent_sms: Vec<(String, String)>,
    sent_data: Vec<Vec<u8>>,
    socket_open: bool,
    power_key_low: bool,
    power_key_pulses: u32,
    resets: u32,
}

impl SimState {
    fn push(&mut self, text: &str) {
        self.rx.extend(text.bytes());
    }

    fn ok(&mut self, lines: &[&str]) {
        for l in lines {
            self.push(&format!("\r\n{l}\r\n"));
        }
        self.push("\r\nOK\r\n");
    }

    fn error(&mut self) {
        self.push("\r\nERROR\r\n");
    }

    fn on_byte(&mut self, b: u8) {
        match &mut self.entry {
            Entry::Command => match b {
                b'\r' => {
                    let line = String::from_utf8_lossy(&self.line).trim().to_owned();
                    self.line.clear();
                    if !line.is_empty() {
                        self.handle(&line);
                    }
                }
                b'\n' => {}
                _ => self.line.push(b),
            },
            Entry::Sms { text, .. } if b == CTRL_Z => {
                let text = String::from_utf8_lossy(text).into_owned();
                if let Entry::Sms { number, .. } = std::mem::replace(&mut self.entry, Entry::Command) {
                    self.sent_sms.push((number, text));
                }
                let reference = self.sent_sms.len();
                self.ok(&[format!("+CMGS: {reference}").as_str()]);
            }
            Entry::Sms { text, .. } => text.push(b),
            Entry::Data { len, buf } => {
                buf.push(b);
                if buf.len() == *len {
                    let n = *len;
                    if let Entry::Data { buf, .. } = std::mem::replace(&mut self.entry, Entry::Command) {
                        self.sent_data.push(buf);
                    }
                    self.ok(&[]);
                    self.push(&format!("\r\n+CIPSEND: 0,{n},{n}\r\n"));
                }
            }
        }
    }

    fn handle(&mut self, cmd: &str) {
        self.commands.push(cmd.to_owned());
        if self.silent {
            return;
        }
        if self.reject.iter().any(|p| cmd.starts_with(p.as_str())) {
            self.error();
            return;
        }
        match cmd {
            "AT" | "ATE0" | "AT+CMEE=2" | "AT+CREG=2" | "AT+CNMI=2,2,0,0,0" | "AT+CMGF=1" | "ATA" | "ATH"
            | "AT+CPOF" | "AT+NETCLOSE" => self.ok(&[]),
            "AT+CPIN?" => {
                if !self.sim_present {
                    self.push("\r\n+CME ERROR: SIM not inserted\r\n");
                } else if self.pin.is_some() {
                    self.ok(&["+CPIN: SIM PIN"]);
                } else {
                    self.ok(&["+CPIN: READY"]);
                }
            }
            "AT+CSQ" => {
                let csq = self.csq;
                self.ok(&[format!("+CSQ: {csq},99").as_str()]);
            }
            "AT+CREG?" => {
                let stat = if self.searching_polls > 0 {
                    self.searching_polls -= 1;
                    2
                } else {
                    self.registration
                };
                self.ok(&[format!("+CREG: 2,{stat}").as_str()]);
            }
            "AT+CGACT=1,1" if self.activation_ok => self.ok(&[]),
            "AT+CGACT=1,1" => self.error(),
            "AT+CGACT=0,1" => self.ok(&[]),
            "AT+NETOPEN" => {
                self.ok(&[]);
                self.push("\r\n+NETOPEN: 0\r\n");
            }
            "AT+CIPCLOSE=0" => {
                self.socket_open = false;
                self.ok(&[]);
            }
            "AT+COPS?" => self.ok(&[format!("+COPS: 0,0,\"{OPERATOR}\",7").as_str()]),
            "AT+CGSN" => self.ok(&[IMEI]),
            "AT+CCID" => self.ok(&[format!("+ICCID: {ICCID}").as_str()]),
            "ATI" => self.ok(&["Manufacturer: SIMCOM INCORPORATED", "Model: A7682E", "Revision: A011B07A7682M7"]),
            c if c.starts_with("AT+CPIN=") => {
                let given = c.trim_start_matches("AT+CPIN=").trim_matches('"');
                if self.pin.as_deref() == Some(given) {
                    self.pin = None;
                    self.ok(&[]);
                } else {
                    self.push("\r\n+CME ERROR: incorrect password\r\n");
                }
            }
            c if c.starts_with("AT+CGDCONT=") || c.starts_with("AT+CGAUTH=") || c.starts_with("ATD") => {
                self.ok(&[]);
            }
            c if c.starts_with("AT+CIPOPEN=") => {
                self.socket_open = true;
                self.ok(&[]);
                self.push("\r\n+CIPOPEN: 0,0\r\n");
            }
            c if c.starts_with("AT+CIPSEND=") => {
                let len = c.split(',').nth(1).and_then(|s| s.parse().ok());
                match len {
                    Some(len) if self.socket_open => {
                        self.entry = Entry::Data { len, buf: Vec::new() };
                        self.push("\r\n> ");
                    }
                    _ => self.error(),
                }
            }
            c if c.starts_with("AT+CMGS=") => {
                let number = c.trim_start_matches("AT+CMGS=").trim_matches('"').to_owned();
                self.entry = Entry::Sms { number, text: Vec::new() };
                self.push("\r\n> ");
            }
            c if c.starts_with("AT+CMGL=") => {
                let all = c.contains("ALL");
                let mut lines = Vec::new();
                for m in self.stored.iter_mut().filter(|m| all || !m.read) {
                    let stat = if m.read { "REC READ" } else { "REC UNREAD" };
                    lines.push(format!("+CMGL: {},\"{}\",\"{}\",,\"{}\"\r\n{}", m.index, stat, m.sender, TIMESTAMP, m.text));
                    m.read = true;
                }
                let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
                self.ok(&refs);
            }
            c if c.starts_with("AT+CMGR=") => {
                let index: Option<u16> = c.trim_start_matches("AT+CMGR=").parse().ok();
                let found = self.stored.iter_mut().find(|m| Some(m.index) == index);
                match found {
                    Some(m) => {
                        let stat = if m.read { "REC READ" } else { "REC UNREAD" };
                        let line = format!("+CMGR: \"{}\",\"{}\",,\"{}\"\r\n{}", stat, m.sender, TIMESTAMP, m.text);
                        m.read = true;
                        self.ok(&[line.as_str()]);
                    }
                    None => self.push("\r\n+CMS ERROR: 321\r\n"),
                }
            }
            c if c.starts_with("AT+CMGD=") => {
                let index: Option<u16> = c.trim_start_matches("AT+CMGD=").parse().ok();
                self.stored.retain(|m| Some(m.index) != index);
                self.ok(&[]);
            }
            _ => self.error(),
        }
    }
}

#[derive(Clone)]
struct Shared(Arc<Mutex<SimState>>);

impl Shared {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub struct SimModem {
    shared: Shared,
}

/// Test-side control of a [`SimModem`].
#[derive(Clone)]
pub struct SimModemHandle {
    shared: Shared,
}

impl SimModem {
    /// A registered modem with a ready SIM and fair signal.
    pub fn new() -> (Self, SimModemHandle) {
        let shared = Shared(Arc::new(Mutex::new(SimState {
            rx: VecDeque::new(),
            line: Vec::new(),
            entry: Entry::Command,
            silent: false,
            sim_present: true,
            pin: None,
            searching_polls: 0,
            registration: 1,
            activation_ok: true,
            csq: 18,
            stored: Vec::new(),
            next_index: 1,
            reject: Vec::new(),
            commands: Vec::new(),
            sent_sms: Vec::new(),
            sent_data: Vec::new(),
            socket_open: false,
            power_key_low: false,
            power_key_pulses: 0,
            resets: 0,
        })));
        (Self { shared: shared.clone() }, SimModemHandle { shared })
    }
}

impl ModemPort for SimModem {
    fn write(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut s = self.shared.state();
        for &b in data {
            s.on_byte(b);
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        let mut s = self.shared.state();
        let n = buf.len().min(s.rx.len());
        for (slot, b) in buf.iter_mut().zip(s.rx.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }

    fn available(&self) -> usize {
        self.shared.state().rx.len()
    }

    fn set_power_key(&mut self, high: bool) -> Result<(), PortError> {
        let mut s = self.shared.state();
        if !high {
            s.power_key_low = true;
        } else if s.power_key_low {
            s.power_key_low = false;
            s.power_key_pulses += 1;
        }
        Ok(())
    }

    fn set_reset(&mut self, high: bool) -> Result<(), PortError> {
        if !high {
            self.shared.state().resets += 1;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PortError> {
        let mut s = self.shared.state();
        s.rx.clear();
        s.line.clear();
        s.entry = Entry::Command;
        Ok(())
    }
}

impl SimModemHandle {
    /// Stop answering commands (unsolicited pushes still arrive).
    pub fn set_silent(&self, silent: bool) {
        self.shared.state().silent = silent;
    }

    pub fn remove_sim(&self) {
        self.shared.state().sim_present = false;
    }

    /// Lock the SIM behind `pin`.
    pub fn require_pin(&self, pin: &str) {
        self.shared.state().pin = Some(pin.to_owned());
    }

    /// Answer `AT+CREG?` with "searching" this many times first.
    pub fn set_searching_polls(&self, polls: u32) {
        self.shared.state().searching_polls = polls;
    }

    pub fn fail_activation(&self, fail: bool) {
        self.shared.state().activation_ok = !fail;
    }

    pub fn set_csq(&self, csq: u8) {
        self.shared.state().csq = csq;
    }

    /// Answer `ERROR` to every command starting with `prefix`.
    pub fn reject(&self, prefix: &str) {
        self.shared.state().reject.push(prefix.to_owned());
    }

    /// Raw unsolicited text.
    pub fn inject(&self, text: &str) {
        self.shared.state().push(text);
    }

    /// Inbound datagram on the UDP socket.
    pub fn deliver_datagram(&self, data: &[u8]) {
        let mut s = self.shared.state();
        s.push(&format!("\r\n+RECEIVE,0,{}\r\n", data.len()));
        s.rx.extend(data.iter().copied());
    }

    /// Store an SMS; with `notify` the modem announces it via `+CMTI`.
    pub fn store_sms(&self, sender: &str, text: &str, notify: bool) -> u16 {
        let mut s = self.shared.state();
        let index = s.next_index;
        s.next_index += 1;
        s.stored.push(Stored { index, sender: sender.to_owned(), text: text.to_owned(), read: false });
        if notify {
            s.push(&format!("\r\n+CMTI: \"SM\",{index}\r\n"));
        }
        index
    }

    /// SMS routed straight to the terminal (`+CMT`).
    pub fn deliver_sms(&self, sender: &str, text: &str) {
        self.shared
            .state()
            .push(&format!("\r\n+CMT: \"{sender}\",,\"{TIMESTAMP}\"\r\n{text}\r\n"));
    }

    pub fn ring(&self, number: &str) {
        self.shared
            .state()
            .push(&format!("\r\nRING\r\n\r\n+CLIP: \"{number}\",145,,,,0\r\n"));
    }

    pub fn end_call(&self) {
        self.shared.state().push("\r\nNO CARRIER\r\n");
    }

    /// Network drops the registration.
    pub fn drop_registration(&self) {
        let mut s = self.shared.state();
        s.registration = 0;
        s.socket_open = false;
        s.push("\r\n+CREG: 0\r\n");
    }

    pub fn commands(&self) -> Vec<String> {
        self.shared.state().commands.clone()
    }

    /// Commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.shared.state().commands.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn sent_sms(&self) -> Vec<(String, String)> {
        self.shared.state().sent_sms.clone()
    }

    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.state().sent_data.clone()
    }

    pub fn power_key_pulses(&self) -> u32 {
        self.shared.state().power_key_pulses
    }

    pub fn resets(&self) -> u32 {
        self.shared.state().resets
    }
}
