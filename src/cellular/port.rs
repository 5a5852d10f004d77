//! Serial and control-line port to the LTE modem.
//!
//! On hardware this is a UART plus the PWRKEY and RESET GPIOs
//! (`drivers::modem_uart`); on the host it is the scripted
//! [`SimModem`](super::sim::SimModem).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// UART read or write failed.
    Uart(i32),
    /// A control GPIO could not be driven.
    Gpio,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uart(code) => write!(f, "uart error {code}"),
            Self::Gpio => write!(f, "control line error"),
        }
    }
}

pub trait ModemPort: Send + 'static {
    /// Queue bytes for transmission.  Returns how many were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Read whatever is buffered, without blocking.  `Ok(0)` when idle.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError>;

    /// Bytes waiting in the receive buffer.
    fn available(&self) -> usize;

    /// Drive PWRKEY; the modem toggles power on a low pulse.
    fn set_power_key(&mut self, high: bool) -> Result<(), PortError>;

    /// Drive RESET; held low to reset.
    fn set_reset(&mut self, high: bool) -> Result<(), PortError>;

    /// Discard anything buffered in either direction.
    fn flush(&mut self) -> Result<(), PortError> {
        Ok(())
    }

    /// Write all of `data`, failing if the port stops accepting bytes.
    fn write_all(&mut self, mut data: &[u8]) -> Result<(), PortError> {
        while !data.is_empty() {
            match self.write(data)? {
                0 => return Err(PortError::Uart(-1)),
                n => data = &data[n..],
            }
        }
        Ok(())
    }
}
