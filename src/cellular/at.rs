//! AT command framing and response parsing for the LTE modem.
//!
//! Everything here is pure text processing over fixed-capacity buffers, so
//! it is exercised directly by unit and property tests without a modem.
//!
//! Two kinds of input arrive on the UART:
//!
//! - **Solicited** responses, read by `send_command` until a terminator
//!   line (`OK`, `ERROR`, `+CME ERROR:`, `+CMS ERROR:`) or, for commands
//!   that take a payload, the `>` prompt.
//! - **Unsolicited** result codes (URCs), fed through [`UrcParser`] which
//!   turns lines (and the raw payload after `+RECEIVE`) into [`Notice`]s.

use heapless::{Deque, String, Vec};
use log::debug;
use serde::Serialize;

// ── Capacities ────────────────────────────────────────────────

pub const COMMAND_CAPACITY: usize = 256;
pub const RESPONSE_CAPACITY: usize = 1024;
/// Largest datagram carried over the modem socket.
pub const MAX_DATAGRAM: usize = 1024;
pub const MAX_SMS_TEXT: usize = 160;
pub const MAX_SMS_LIST: usize = 16;
const URC_BUFFER: usize = 1536;
const NOTICE_DEPTH: usize = 8;

pub type AtCommand = String<COMMAND_CAPACITY>;
pub type AtText = String<RESPONSE_CAPACITY>;
pub type PhoneNumber = String<24>;

/// Ctrl-Z, ends SMS text entry.
pub const CTRL_Z: u8 = 0x1A;

// ── Responses ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Ok,
    Error,
    CmeError,
    CmsError,
    /// `>` payload prompt.
    Prompt,
}

/// Final result of one command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub text: AtText,
    pub terminator: Option<Terminator>,
    /// Bytes were discarded because `text` was full.
    pub truncated: bool,
}

impl AtResponse {
    pub fn new() -> Self {
        Self { text: String::new(), terminator: None, truncated: false }
    }

    /// A terminator was seen before the deadline.
    pub fn is_complete(&self) -> bool {
        self.terminator.is_some()
    }

    pub fn is_ok(&self) -> bool {
        self.terminator == Some(Terminator::Ok)
    }

    pub fn is_prompt(&self) -> bool {
        self.terminator == Some(Terminator::Prompt)
    }

    /// Append bytes, keeping what fits.  Non-UTF-8 bytes are dropped.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if !b.is_ascii() {
                continue;
            }
            if self.text.push(b as char).is_err() {
                self.truncated = true;
            }
        }
    }

    /// Non-empty lines, terminator included.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split(['\r', '\n']).map(str::trim).filter(|l| !l.is_empty())
    }

    /// Remainder of the first line starting with `prefix`.
    pub fn field(&self, prefix: &str) -> Option<&str> {
        self.lines().find_map(|l| l.strip_prefix(prefix)).map(str::trim)
    }
}

impl Default for AtResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Headers whose next line is free text (an SMS body), never a result code.
const BODY_HEADERS: [&str; 3] = ["+CMGL:", "+CMGR:", "+CMT:"];

/// Lines of `text`, trimmed, each paired with whether it is the body line
/// of the header just before it.
fn tagged_lines(text: &str) -> impl Iterator<Item = (&str, bool)> {
    let mut after_header = false;
    text.split('\n').map(str::trim).map(move |line| {
        let is_body = after_header;
        after_header = !is_body && BODY_HEADERS.iter().any(|h| line.starts_with(h));
        (line, is_body)
    })
}

fn result_code(line: &str) -> Option<Terminator> {
    match line {
        "OK" => Some(Terminator::Ok),
        "ERROR" => Some(Terminator::Error),
        l if l.starts_with("+CME ERROR:") => Some(Terminator::CmeError),
        l if l.starts_with("+CMS ERROR:") => Some(Terminator::CmsError),
        _ => None,
    }
}

/// Inspect complete lines of `text` for a final result code.  SMS body
/// lines are skipped, so a message reading "OK" does not end the exchange.
pub fn find_terminator(text: &str, allow_prompt: bool) -> Option<Terminator> {
    if allow_prompt && text.trim_end_matches(' ').ends_with('>') {
        return Some(Terminator::Prompt);
    }
    // Only lines followed by a line break are complete.
    let complete = match text.rfind('\n') {
        Some(end) => &text[..end],
        None => return None,
    };
    tagged_lines(complete)
        .filter(|(_, is_body)| !is_body)
        .find_map(|(line, _)| result_code(line))
}

// ── Field helpers ─────────────────────────────────────────────

/// Split a parameter list on commas outside double quotes, unquoting.
pub fn split_fields(s: &str) -> Vec<&str, 12> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                let _ = out.push(unquote(&s[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    let _ = out.push(unquote(&s[start..]));
    out
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s)
}

fn bounded<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

// ── Solicited response parsers ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SimStatus {
    Unknown,
    Ready,
    PinRequired,
    PukRequired,
    NotInserted,
    Error,
}

pub fn parse_cpin(resp: &AtResponse) -> SimStatus {
    let text = resp.text.as_str();
    if text.contains("READY") {
        SimStatus::Ready
    } else if text.contains("SIM PIN") {
        SimStatus::PinRequired
    } else if text.contains("SIM PUK") {
        SimStatus::PukRequired
    } else if text.contains("NOT INSERTED") || text.contains("not inserted") {
        SimStatus::NotInserted
    } else if resp.terminator.is_some() && !resp.is_ok() {
        SimStatus::Error
    } else {
        SimStatus::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Registration {
    NotRegistered,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl Registration {
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NotRegistered,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::Roaming,
            _ => Self::Unknown,
        }
    }

    pub const fn is_registered(self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

/// `+CREG: <n>,<stat>[,...]` (reply to `AT+CREG?`).
pub fn parse_creg_query(resp: &AtResponse) -> Option<Registration> {
    let fields = split_fields(resp.field("+CREG:")?);
    let stat = fields.get(1)?.parse().ok()?;
    Some(Registration::from_code(stat))
}

/// `+CREG: <stat>[,...]` (unsolicited).
pub fn parse_creg_urc(line: &str) -> Option<Registration> {
    let rest = line.split_once("+CREG:")?.1;
    let stat = split_fields(rest).first()?.parse().ok()?;
    Some(Registration::from_code(stat))
}

/// Signal quality from `+CSQ: <rssi>,<ber>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalQuality {
    /// 0 – 31, 99 = unknown.
    pub raw: u8,
    pub rssi_dbm: Option<i16>,
}

pub const fn csq_to_dbm(raw: u8) -> Option<i16> {
    if raw > 31 { None } else { Some(-113 + 2 * raw as i16) }
}

pub fn parse_csq(resp: &AtResponse) -> Option<SignalQuality> {
    let fields = split_fields(resp.field("+CSQ:")?);
    let raw: u8 = fields.first()?.parse().ok()?;
    Some(SignalQuality { raw, rssi_dbm: csq_to_dbm(raw) })
}

/// Operator name from `+COPS: <mode>,<format>,"<oper>"[,<act>]`.
pub fn parse_cops(resp: &AtResponse) -> Option<String<32>> {
    let fields = split_fields(resp.field("+COPS:")?);
    fields.get(2).filter(|s| !s.is_empty()).map(|s| bounded(s))
}

/// First bare line of a response (IMEI from `AT+CGSN`).
pub fn first_value_line(resp: &AtResponse) -> Option<&str> {
    resp.lines().find(|l| *l != "OK" && !l.starts_with("AT"))
}

/// ICCID from `+ICCID: <id>` / `+CCID: <id>` or a bare line.
pub fn parse_iccid(resp: &AtResponse) -> Option<String<24>> {
    let line = first_value_line(resp)?;
    let value = line.split_once(':').map_or(line, |(_, v)| v).trim();
    let value = unquote(value);
    (!value.is_empty()).then(|| bounded(value))
}

// ── SMS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsMessage {
    /// Storage index; 0 for directly delivered messages.
    pub index: u16,
    pub sender: PhoneNumber,
    pub timestamp: String<24>,
    pub text: String<MAX_SMS_TEXT>,
    pub read: bool,
}

/// `+CMGL: <index>,"<stat>","<oa>",[<alpha>],"<scts>"` followed by the body line.
pub fn parse_cmgl(resp: &AtResponse) -> Vec<SmsMessage, MAX_SMS_LIST> {
    let mut out = Vec::new();
    let mut lines = tagged_lines(&resp.text);
    while let Some((line, is_body)) = lines.next() {
        if is_body {
            continue;
        }
        let Some(header) = line.strip_prefix("+CMGL:") else {
            continue;
        };
        let body = lines.next().map_or("", |(b, _)| b);
        let f = split_fields(header);
        let Some(index) = f.first().and_then(|s| s.parse().ok()) else {
            continue;
        };
        let msg = SmsMessage {
            index,
            read: f.get(1).is_some_and(|s| s.starts_with("REC READ")),
            sender: bounded(f.get(2).copied().unwrap_or("")),
            timestamp: bounded(f.get(4).copied().unwrap_or("")),
            text: bounded(body),
        };
        if out.push(msg).is_err() {
            break;
        }
    }
    out
}

/// `+CMGR: "<stat>","<oa>",[<alpha>],"<scts>"` followed by the body line.
pub fn parse_cmgr(resp: &AtResponse, index: u16) -> Option<SmsMessage> {
    let mut lines = tagged_lines(&resp.text);
    let header = lines.find_map(|(l, is_body)| if is_body { None } else { l.strip_prefix("+CMGR:") })?;
    let body = lines.next().map_or("", |(b, _)| b);
    let f = split_fields(header);
    Some(SmsMessage {
        index,
        read: f.first().is_some_and(|s| s.starts_with("REC READ")),
        sender: bounded(f.get(1).copied().unwrap_or("")),
        timestamp: bounded(f.get(3).copied().unwrap_or("")),
        text: bounded(body),
    })
}

/// Directly delivered SMS: `+CMT: "<oa>",[<alpha>],"<scts>"` then body.
pub fn parse_cmt(header: &str, body: &str) -> SmsMessage {
    let rest = header.split_once("+CMT:").map_or(header, |(_, r)| r);
    let f = split_fields(rest);
    SmsMessage {
        index: 0,
        read: false,
        sender: bounded(f.first().copied().unwrap_or("")),
        timestamp: bounded(f.get(2).copied().unwrap_or("")),
        text: bounded(body),
    }
}

// ── Unsolicited result codes ──────────────────────────────────

/// Classification of one unsolicited line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urc<'a> {
    /// `+CMTI: "<mem>",<index>`
    NewSms { index: u16 },
    Ring,
    Registration(Registration),
    /// `+CMT:` header; the body is the next line.
    SmsHeader(&'a str),
    /// `+CLIP: "<number>",...`
    CallerId(&'a str),
    NoCarrier,
    /// `+RECEIVE,<link>,<len>`; `len` raw bytes follow.
    Receive { link: u8, len: usize },
    /// `+IPCLOSE:` / `+CIPEVENT:`
    LinkClosed,
}

/// Classify `line`.  Substring matches are checked first, in priority
/// order, then prefix matches.
pub fn classify(line: &str) -> Option<Urc<'_>> {
    if let Some((_, rest)) = line.split_once("+CMTI:") {
        let index = split_fields(rest).get(1).and_then(|s| s.parse().ok())?;
        return Some(Urc::NewSms { index });
    }
    if line.contains("RING") {
        return Some(Urc::Ring);
    }
    if line.contains("+CREG:") {
        return parse_creg_urc(line).map(Urc::Registration);
    }
    if line.starts_with("+CMT:") {
        return Some(Urc::SmsHeader(line));
    }
    if let Some(rest) = line.strip_prefix("+CLIP:") {
        return Some(Urc::CallerId(split_fields(rest).first().copied().unwrap_or("")));
    }
    if line.starts_with("NO CARRIER") {
        return Some(Urc::NoCarrier);
    }
    if let Some(rest) = line.strip_prefix("+RECEIVE,") {
        let f = split_fields(rest);
        let link = f.first()?.parse().ok()?;
        let len = f.get(1)?.parse().ok()?;
        return Some(Urc::Receive { link, len });
    }
    if line.starts_with("+IPCLOSE:") || line.starts_with("+CIPEVENT:") {
        return Some(Urc::LinkClosed);
    }
    None
}

/// Owned notification produced by [`UrcParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NewSms { index: u16 },
    Sms(SmsMessage),
    Ring,
    CallerId(PhoneNumber),
    NoCarrier,
    Registration(Registration),
    Datagram(Vec<u8, MAX_DATAGRAM>),
    LinkClosed,
}

/// Incremental URC decoder.  Feed raw UART bytes, pop notices.
pub struct UrcParser {
    buf: Vec<u8, URC_BUFFER>,
    /// Raw payload bytes still owed by a `+RECEIVE` header.
    payload: Option<usize>,
    /// `+CMT:` header awaiting its body line.
    sms_header: Option<String<96>>,
    notices: Deque<Notice, NOTICE_DEPTH>,
    overflowed: u32,
}

impl UrcParser {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            payload: None,
            sms_header: None,
            notices: Deque::new(),
            overflowed: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buf.push(b).is_err() {
                // A line longer than the buffer can never complete.
                self.buf.clear();
                self.payload = None;
                self.overflowed = self.overflowed.saturating_add(1);
            }
            self.decode();
        }
    }

    pub fn pop(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }

    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && self.payload.is_none() && self.notices.is_empty()
    }

    /// Buffer overflows since creation.
    pub fn overflowed(&self) -> u32 {
        self.overflowed
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.payload = None;
        self.sms_header = None;
        self.notices.clear();
    }

    fn emit(&mut self, notice: Notice) {
        if self.notices.is_full() {
            self.notices.pop_front();
        }
        let _ = self.notices.push_back(notice);
    }

    fn decode(&mut self) {
        if let Some(len) = self.payload {
            if self.buf.len() >= len {
                let mut data = Vec::new();
                let _ = data.extend_from_slice(&self.buf[..len.min(MAX_DATAGRAM)]);
                self.buf.clear();
                self.payload = None;
                self.emit(Notice::Datagram(data));
            }
            return;
        }
        if self.buf.last() != Some(&b'\n') {
            return;
        }
        let raw: String<URC_BUFFER> = self.buf.iter().filter(|b| b.is_ascii()).map(|&b| b as char).collect();
        self.buf.clear();
        let line = raw.trim();

        // The line after a `+CMT:` header is the body, even when empty.
        if let Some(header) = self.sms_header.take() {
            self.emit(Notice::Sms(parse_cmt(&header, line)));
            return;
        }
        if line.is_empty() {
            return;
        }

        match classify(line) {
            Some(Urc::NewSms { index }) => self.emit(Notice::NewSms { index }),
            Some(Urc::Ring) => self.emit(Notice::Ring),
            Some(Urc::Registration(r)) => self.emit(Notice::Registration(r)),
            Some(Urc::SmsHeader(h)) => self.sms_header = Some(bounded(h)),
            Some(Urc::CallerId(n)) => self.emit(Notice::CallerId(bounded(n))),
            Some(Urc::NoCarrier) => self.emit(Notice::NoCarrier),
            Some(Urc::Receive { len, .. }) if len == 0 => {}
            Some(Urc::Receive { len, .. }) => self.payload = Some(len.min(URC_BUFFER)),
            Some(Urc::LinkClosed) => self.emit(Notice::LinkClosed),
            None => debug!("Cellular: ignoring '{}'", line),
        }
    }
}

impl Default for UrcParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(text: &str) -> AtResponse {
        let mut r = AtResponse::new();
        r.push_bytes(text.as_bytes());
        r.terminator = find_terminator(&r.text, false);
        r
    }

    #[test]
    fn terminators_need_complete_lines() {
        assert_eq!(find_terminator("\r\nOK", false), None);
        assert_eq!(find_terminator("\r\nOK\r\n", false), Some(Terminator::Ok));
        assert_eq!(find_terminator("\r\nERROR\r\n", false), Some(Terminator::Error));
        assert_eq!(
            find_terminator("\r\n+CME ERROR: SIM not inserted\r\n", false),
            Some(Terminator::CmeError)
        );
        assert_eq!(find_terminator("\r\n> ", true), Some(Terminator::Prompt));
        assert_eq!(find_terminator("\r\n> ", false), None);
    }

    #[test]
    fn ok_inside_a_word_is_not_a_terminator() {
        assert_eq!(find_terminator("+COPS: 0,0,\"BOOK\"\r\n", false), None);
    }

    #[test]
    fn csq_maps_to_dbm() {
        let q = parse_csq(&resp("\r\n+CSQ: 20,99\r\n\r\nOK\r\n")).unwrap();
        assert_eq!(q.raw, 20);
        assert_eq!(q.rssi_dbm, Some(-73));
        assert_eq!(csq_to_dbm(99), None);
        assert_eq!(csq_to_dbm(0), Some(-113));
    }

    #[test]
    fn creg_query_and_urc_forms() {
        let r = resp("\r\n+CREG: 2,5,\"1A2B\",\"01C3D4E5\"\r\n\r\nOK\r\n");
        assert_eq!(parse_creg_query(&r), Some(Registration::Roaming));
        assert_eq!(parse_creg_urc("+CREG: 1,\"1A2B\",\"01C3D4E5\""), Some(Registration::Home));
        assert!(!Registration::Searching.is_registered());
    }

    #[test]
    fn cpin_states() {
        assert_eq!(parse_cpin(&resp("\r\n+CPIN: READY\r\n\r\nOK\r\n")), SimStatus::Ready);
        assert_eq!(parse_cpin(&resp("\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n")), SimStatus::PinRequired);
        assert_eq!(parse_cpin(&resp("\r\n+CME ERROR: SIM not inserted\r\n")), SimStatus::NotInserted);
        assert_eq!(parse_cpin(&resp("\r\nERROR\r\n")), SimStatus::Error);
    }

    #[test]
    fn cmgl_entries_carry_body() {
        let r = resp(concat!(
            "\r\n+CMGL: 1,\"REC UNREAD\",\"+15551234\",,\"24/05/01,10:00:00+08\"\r\n",
            "hello there\r\n",
            "+CMGL: 2,\"REC READ\",\"+15550000\",,\"24/05/01,11:00:00+08\"\r\n",
            "second, with comma\r\n\r\nOK\r\n"
        ));
        let list = parse_cmgl(&r);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].index, 1);
        assert_eq!(list[0].sender.as_str(), "+15551234");
        assert_eq!(list[0].text.as_str(), "hello there");
        assert!(!list[0].read);
        assert!(list[1].read);
        assert_eq!(list[1].text.as_str(), "second, with comma");
    }

    #[test]
    fn sms_body_reading_ok_does_not_end_the_listing() {
        let mut r = AtResponse::new();
        r.push_bytes(b"\r\n+CMGL: 1,\"REC UNREAD\",\"+15550001\",,\"24/05/01,10:00:00+08\"\r\nOK\r\n");
        assert_eq!(find_terminator(&r.text, false), None);
        r.push_bytes(b"\r\n+CMGL: 2,\"REC UNREAD\",\"+15550002\",,\"24/05/01,10:05:00+08\"\r\nERROR\r\n");
        assert_eq!(find_terminator(&r.text, false), None);
        r.push_bytes(b"\r\nOK\r\n");
        r.terminator = find_terminator(&r.text, false);
        assert!(r.is_ok());

        let list = parse_cmgl(&r);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].text.as_str(), "OK");
        assert_eq!(list[1].text.as_str(), "ERROR");
    }

    #[test]
    fn cmgr_body_reading_ok_is_kept() {
        let r = resp("\r\n+CMGR: \"REC READ\",\"+15550001\",,\"24/05/01,10:00:00+08\"\r\nOK\r\n\r\nOK\r\n");
        assert!(r.is_ok());
        let msg = parse_cmgr(&r, 4).unwrap();
        assert_eq!(msg.text.as_str(), "OK");
        assert_eq!(msg.sender.as_str(), "+15550001");
    }

    #[test]
    fn cmgl_entry_with_empty_body() {
        let r = resp("\r\n+CMGL: 3,\"REC READ\",\"+15550003\",,\"24/05/01,10:00:00+08\"\r\n\r\n\r\nOK\r\n");
        let list = parse_cmgl(&r);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].text.as_str(), "");
    }

    #[test]
    fn classification_order() {
        // Substring checks win over prefix checks.
        assert_eq!(classify("+CMTI: \"SM\",3"), Some(Urc::NewSms { index: 3 }));
        assert_eq!(classify("RING"), Some(Urc::Ring));
        assert_eq!(classify("+CREG: 0"), Some(Urc::Registration(Registration::NotRegistered)));
        assert_eq!(classify("+CLIP: \"+15551234\",145,,,,0"), Some(Urc::CallerId("+15551234")));
        assert_eq!(classify("NO CARRIER"), Some(Urc::NoCarrier));
        assert_eq!(classify("+RECEIVE,0,5"), Some(Urc::Receive { link: 0, len: 5 }));
        assert_eq!(classify("+IPCLOSE: 0,1"), Some(Urc::LinkClosed));
        assert_eq!(classify("+CSQ: 10,99"), None);
    }

    #[test]
    fn parser_extracts_raw_payload_after_receive() {
        let mut p = UrcParser::new();
        p.feed(b"\r\n+RECEIVE,0,6\r\nab\r\ncd");
        assert!(p.pop().is_some_and(|n| matches!(n, Notice::Datagram(ref d) if d.as_slice() == b"ab\r\ncd")));
        p.feed(b"\r\nRING\r\n");
        assert_eq!(p.pop(), Some(Notice::Ring));
        assert!(p.is_idle());
    }

    #[test]
    fn empty_cmt_body_does_not_swallow_the_next_notice() {
        let mut p = UrcParser::new();
        p.feed(b"\r\n+CMT: \"+15551234\",,\"24/05/01,10:00:00+08\"\r\n\r\n\r\nRING\r\n");
        match p.pop() {
            Some(Notice::Sms(m)) => {
                assert_eq!(m.sender.as_str(), "+15551234");
                assert_eq!(m.text.as_str(), "");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(p.pop(), Some(Notice::Ring));
    }

    #[test]
    fn parser_joins_cmt_header_and_body() {
        let mut p = UrcParser::new();
        p.feed(b"\r\n+CMT: \"+15551234\",,\"24/05/01,10:00:00+08\"\r\nping\r\n");
        match p.pop() {
            Some(Notice::Sms(m)) => {
                assert_eq!(m.sender.as_str(), "+15551234");
                assert_eq!(m.text.as_str(), "ping");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
