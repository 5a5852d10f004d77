//! A7682E modem port: UART1 plus the PWRKEY, RESET and supply GPIOs.

use esp_idf_svc::hal::delay::NON_BLOCK;
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver};
use esp_idf_svc::hal::uart::{UartDriver, config::Config};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::EspError;
use log::info;

use crate::cellular::port::{ModemPort, PortError};

fn uart_err(e: EspError) -> PortError {
    PortError::Uart(e.code())
}

pub struct ModemUart {
    uart: UartDriver<'static>,
    power_key: PinDriver<'static, AnyOutputPin, Output>,
    reset: PinDriver<'static, AnyOutputPin, Output>,
    _supply: PinDriver<'static, AnyOutputPin, Output>,
}

impl ModemUart {
    /// Open the UART at `baud` and enable the modem supply rail.  The
    /// control lines idle high.
    pub fn new(
        uart: UartDriver<'static>,
        power_key: AnyOutputPin,
        reset: AnyOutputPin,
        supply: AnyOutputPin,
    ) -> Result<Self, PortError> {
        let mut power_key = PinDriver::output(power_key).map_err(|_| PortError::Gpio)?;
        let mut reset = PinDriver::output(reset).map_err(|_| PortError::Gpio)?;
        let mut supply = PinDriver::output(supply).map_err(|_| PortError::Gpio)?;
        power_key.set_high().map_err(|_| PortError::Gpio)?;
        reset.set_high().map_err(|_| PortError::Gpio)?;
        supply.set_high().map_err(|_| PortError::Gpio)?;
        info!("Cellular: modem supply enabled");
        Ok(Self { uart, power_key, reset, _supply: supply })
    }

    /// UART configuration for the modem link.
    pub fn uart_config(baud: u32) -> Config {
        Config::new().baudrate(Hertz(baud))
    }

    /// No flow control lines are wired.
    pub fn no_flow_control() -> (Option<AnyIOPin>, Option<AnyIOPin>) {
        (None, None)
    }
}

impl ModemPort for ModemUart {
    fn write(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.uart.write(data).map_err(uart_err)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        if self.available() == 0 {
            return Ok(0);
        }
        self.uart.read(buf, NON_BLOCK).map_err(uart_err)
    }

    fn available(&self) -> usize {
        self.uart.remaining_read().unwrap_or(0)
    }

    fn set_power_key(&mut self, high: bool) -> Result<(), PortError> {
        let level = if high { self.power_key.set_high() } else { self.power_key.set_low() };
        level.map_err(|_| PortError::Gpio)
    }

    fn set_reset(&mut self, high: bool) -> Result<(), PortError> {
        let level = if high { self.reset.set_high() } else { self.reset.set_low() };
        level.map_err(|_| PortError::Gpio)
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.uart.clear_rx().map_err(uart_err)
    }
}
