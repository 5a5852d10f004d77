//! Unified error types for the transport layer.
//!
//! A single `Error` enum that every transport converts into.  All variants
//! are `Copy` so they can be recorded in statistics, logged, and returned
//! across worker threads without allocation.

use core::fmt;

use crate::transport::TransportKind;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible transport operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Hardware or driver failed to start.
    Init(&'static str),
    /// A configuration parameter is outside the supported range.
    Config(ConfigParam),
    /// A send could not be started or completed.
    Transmit(TransmitError),
    /// Inbound data could not be read.
    Receive(ReceiveError),
    /// Association, registration or session setup failed.
    Connection(ConnectionError),
    /// No terminator seen within the allotted time on a command exchange.
    CommandTimeout,
    /// A shared lock could not be acquired within its timeout.
    LockTimeout,
    /// Operation requires an initialised transport.
    NotInitialized,
    /// A transport's counters could not be read or reset.
    StatsUnavailable(TransportKind),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(p) => write!(f, "config: invalid {p}"),
            Self::Transmit(e) => write!(f, "transmit: {e}"),
            Self::Receive(e) => write!(f, "receive: {e}"),
            Self::Connection(e) => write!(f, "connection: {e}"),
            Self::CommandTimeout => write!(f, "command timed out"),
            Self::LockTimeout => write!(f, "lock acquisition timed out"),
            Self::NotInitialized => write!(f, "transport not initialised"),
            Self::StatsUnavailable(kind) => write!(f, "{kind} statistics unavailable"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration parameters
// ---------------------------------------------------------------------------

/// Identifies which parameter a configuration error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigParam {
    Frequency,
    Bandwidth,
    SpreadingFactor,
    CodingRate,
    SyncWord,
    OutputPower,
    CurrentLimit,
    PreambleLength,
    Crc,
    TcxoVoltage,
    Ssid,
    Password,
    Channel,
    MaxClients,
    Apn,
    BaudRate,
    Endpoint,
    Priority,
}

impl fmt::Display for ConfigParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Frequency => "frequency",
            Self::Bandwidth => "bandwidth",
            Self::SpreadingFactor => "spreading factor",
            Self::CodingRate => "coding rate",
            Self::SyncWord => "sync word",
            Self::OutputPower => "output power",
            Self::CurrentLimit => "current limit",
            Self::PreambleLength => "preamble length",
            Self::Crc => "CRC mode",
            Self::TcxoVoltage => "TCXO voltage",
            Self::Ssid => "SSID",
            Self::Password => "password",
            Self::Channel => "channel",
            Self::MaxClients => "max clients",
            Self::Apn => "APN",
            Self::BaudRate => "baud rate",
            Self::Endpoint => "datagram endpoint",
            Self::Priority => "priority order",
        };
        f.write_str(name)
    }
}

impl From<ConfigParam> for Error {
    fn from(p: ConfigParam) -> Self {
        Self::Config(p)
    }
}

// ---------------------------------------------------------------------------
// Transmission errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitError {
    EmptyPayload,
    PayloadTooLarge { len: usize, max: usize },
    /// A transmission is already in flight.
    Busy,
    /// Radio is in sleep mode; call `wakeup()` first.
    Asleep,
    NotConnected,
    /// Driver-reported status code.
    Driver(i16),
    /// Dropped on entry to sleep or by the completion watchdog.
    Aborted,
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPayload => write!(f, "empty payload"),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload of {len} bytes exceeds maximum {max}")
            }
            Self::Busy => write!(f, "transmitter busy"),
            Self::Asleep => write!(f, "radio asleep"),
            Self::NotConnected => write!(f, "link not connected"),
            Self::Driver(code) => write!(f, "driver error {code}"),
            Self::Aborted => write!(f, "transmission aborted"),
        }
    }
}

impl From<TransmitError> for Error {
    fn from(e: TransmitError) -> Self {
        Self::Transmit(e)
    }
}

// ---------------------------------------------------------------------------
// Reception errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    CrcMismatch,
    /// Response could not be parsed.
    Malformed,
    /// Message larger than the caller's buffer.
    Truncated { len: usize, capacity: usize },
    Driver(i16),
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::Malformed => write!(f, "malformed response"),
            Self::Truncated { len, capacity } => {
                write!(f, "{len}-byte message does not fit {capacity}-byte buffer")
            }
            Self::Driver(code) => write!(f, "driver error {code}"),
        }
    }
}

impl From<ReceiveError> for Error {
    fn from(e: ReceiveError) -> Self {
        Self::Receive(e)
    }
}

// ---------------------------------------------------------------------------
// Connection errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    EmptySsid,
    EmptyApSsid,
    AssociationFailed,
    /// Modem is not powered on.
    NotPowered,
    SimNotReady,
    RegistrationTimeout,
    ActivationFailed,
    /// Modem answered `ERROR` / `+CME ERROR`.
    CommandRejected,
    /// Operation needs a state the transport is not in.
    WrongState,
    /// A background scan has not reported yet.
    ScanInProgress,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySsid => write!(f, "SSID must not be empty"),
            Self::EmptyApSsid => write!(f, "access point SSID must not be empty"),
            Self::AssociationFailed => write!(f, "association failed"),
            Self::NotPowered => write!(f, "modem not powered"),
            Self::SimNotReady => write!(f, "SIM not ready"),
            Self::RegistrationTimeout => write!(f, "network registration timed out"),
            Self::ActivationFailed => write!(f, "data context activation failed"),
            Self::CommandRejected => write!(f, "modem rejected command"),
            Self::WrongState => write!(f, "operation not valid in current state"),
            Self::ScanInProgress => write!(f, "scan already in progress"),
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_parameter() {
        let e: Error = ConfigParam::SpreadingFactor.into();
        assert_eq!(e.to_string(), "config: invalid spreading factor");
    }

    #[test]
    fn payload_too_large_reports_sizes() {
        let e: Error = TransmitError::PayloadTooLarge { len: 300, max: 255 }.into();
        assert_eq!(
            e.to_string(),
            "transmit: payload of 300 bytes exceeds maximum 255"
        );
    }

    #[test]
    fn stats_error_names_transport() {
        let e = Error::StatsUnavailable(TransportKind::Cellular);
        assert_eq!(e.to_string(), format!("{} statistics unavailable", TransportKind::Cellular));
    }
}
