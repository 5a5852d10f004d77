//! Radio driver port.
//!
//! The boundary between [`RadioTransport`](super::RadioTransport) and a
//! concrete transceiver.  Setters mirror the SX126x command set one
//! parameter at a time so the transport controls application order and
//! can report exactly which parameter the hardware refused.

use core::fmt;

use crate::irq::IrqLine;

/// Errors reported by a radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The chip refused a parameter value.
    InvalidParam,
    /// Received frame failed its CRC or header check.
    CrcMismatch,
    /// BUSY line never released.
    Timeout,
    /// SPI or GPIO failure.
    Bus,
    /// Chip-specific status code.
    Status(i16),
}

impl DriverError {
    /// Numeric code for stats and error reporting.
    pub const fn code(self) -> i16 {
        match self {
            Self::InvalidParam => -1,
            Self::CrcMismatch => -7,
            Self::Timeout => -5,
            Self::Bus => -16,
            Self::Status(code) => code,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::Timeout => write!(f, "busy timeout"),
            Self::Bus => write!(f, "bus error"),
            Self::Status(code) => write!(f, "status {code}"),
        }
    }
}

/// Signal-quality metadata of the last received packet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PacketStatus {
    /// dBm.
    pub rssi: f32,
    /// dB.
    pub snr: f32,
    /// Hz.
    pub freq_error: f32,
}

pub trait RadioDriver: Send + 'static {
    /// Reset and bring the chip to standby on `frequency_mhz`.
    fn begin(&mut self, frequency_mhz: f32) -> Result<(), DriverError>;

    fn set_frequency(&mut self, mhz: f32) -> Result<(), DriverError>;
    fn set_bandwidth(&mut self, khz: f32) -> Result<(), DriverError>;
    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), DriverError>;
    fn set_coding_rate(&mut self, cr: u8) -> Result<(), DriverError>;
    fn set_sync_word(&mut self, word: u8) -> Result<(), DriverError>;
    fn set_output_power(&mut self, dbm: i8) -> Result<(), DriverError>;
    fn set_current_limit(&mut self, ma: f32) -> Result<(), DriverError>;
    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), DriverError>;
    fn set_crc(&mut self, enabled: bool) -> Result<(), DriverError>;
    /// 0.0 disables TCXO control.
    fn set_tcxo_voltage(&mut self, volts: f32) -> Result<(), DriverError>;
    /// Let DIO2 drive the antenna switch.
    fn set_rf_switch(&mut self, enabled: bool) -> Result<(), DriverError>;

    fn standby(&mut self) -> Result<(), DriverError>;
    /// Warm-start sleep; configuration is retained.
    fn sleep(&mut self) -> Result<(), DriverError>;

    /// Load `data` and start transmitting.  Completion raises the IRQ line.
    fn start_transmit(&mut self, data: &[u8]) -> Result<(), DriverError>;
    /// The chip has latched TX-done or TX-timeout.  Reads without
    /// clearing, so a stray edge can be told apart from a completion.
    fn transmit_complete(&mut self) -> Result<bool, DriverError>;
    /// Collect the outcome after the completion interrupt.
    fn finish_transmit(&mut self) -> Result<(), DriverError>;

    /// Arm continuous reception.  Each packet raises the IRQ line.
    fn start_receive(&mut self) -> Result<(), DriverError>;
    /// Copy the received frame into `buf`, returning its length.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;
    /// Metadata of the frame last returned by `read_packet`.
    fn packet_status(&mut self) -> PacketStatus;

    /// Route the chip's interrupt pin to `line`.
    fn attach_irq(&mut self, line: IrqLine) -> Result<(), DriverError>;
    fn detach_irq(&mut self);
}
