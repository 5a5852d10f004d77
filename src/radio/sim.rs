//! Simulated SX1262 for host builds and tests.
//!
//! [`SimRadio`] is handed to the transport; the paired [`SimRadioHandle`]
//! stays with the test to inject packets, complete transmissions and
//! make the "chip" refuse parameters.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use super::RadioMode;
use super::driver::{DriverError, PacketStatus, RadioDriver};
use crate::config::RadioConfig;
use crate::error::ConfigParam;
use crate::irq::IrqLine;

struct Frame {
    data: Vec<u8>,
    status: PacketStatus,
    corrupt: bool,
}

struct SimState {
    params: RadioConfig,
    mode: RadioMode,
    begun: bool,
    auto_complete: bool,
    tx_pending: bool,
    /// TX-done latched in the simulated IRQ status.
    tx_done: bool,
    fail_tx: Option<DriverError>,
    reject: Option<ConfigParam>,
    transmitted: Vec<Vec<u8>>,
    frames: VecDeque<Frame>,
    last_status: PacketStatus,
    line: Option<IrqLine>,
}

#[derive(Clone)]
struct Shared(Arc<Mutex<SimState>>);

impl Shared {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub struct SimRadio {
    shared: Shared,
}

/// Test-side control of a [`SimRadio`].
#[derive(Clone)]
pub struct SimRadioHandle {
    shared: Shared,
}

impl SimRadio {
    pub fn new() -> (Self, SimRadioHandle) {
        let shared = Shared(Arc::new(Mutex::new(SimState {
            params: RadioConfig::default(),
            mode: RadioMode::Sleep,
            begun: false,
            auto_complete: true,
            tx_pending: false,
            tx_done: false,
            fail_tx: None,
            reject: None,
            transmitted: Vec::new(),
            frames: VecDeque::new(),
            last_status: PacketStatus::default(),
            line: None,
        })));
        (Self { shared: shared.clone() }, SimRadioHandle { shared })
    }

    fn set(&mut self, param: ConfigParam, apply: impl FnOnce(&mut RadioConfig)) -> Result<(), DriverError> {
        let mut s = self.shared.state();
        if s.reject == Some(param) {
            return Err(DriverError::InvalidParam);
        }
        apply(&mut s.params);
        Ok(())
    }
}

impl RadioDriver for SimRadio {
    fn begin(&mut self, frequency_mhz: f32) -> Result<(), DriverError> {
        let mut s = self.shared.state();
        s.begun = true;
        s.mode = RadioMode::Idle;
        s.params.frequency_mhz = frequency_mhz;
        debug!("Radio(sim): begin at {:.1} MHz", frequency_mhz);
        Ok(())
    }

    fn set_frequency(&mut self, mhz: f32) -> Result<(), DriverError> {
        self.set(ConfigParam::Frequency, |p| p.frequency_mhz = mhz)
    }

    fn set_bandwidth(&mut self, khz: f32) -> Result<(), DriverError> {
        self.set(ConfigParam::Bandwidth, |p| p.bandwidth_khz = khz)
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), DriverError> {
        self.set(ConfigParam::SpreadingFactor, |p| p.spreading_factor = sf)
    }

    fn set_coding_rate(&mut self, cr: u8) -> Result<(), DriverError> {
        self.set(ConfigParam::CodingRate, |p| p.coding_rate = cr)
    }

    fn set_sync_word(&mut self, word: u8) -> Result<(), DriverError> {
        self.set(ConfigParam::SyncWord, |p| p.sync_word = word)
    }

    fn set_output_power(&mut self, dbm: i8) -> Result<(), DriverError> {
        self.set(ConfigParam::OutputPower, |p| p.output_power_dbm = dbm)
    }

    fn set_current_limit(&mut self, ma: f32) -> Result<(), DriverError> {
        self.set(ConfigParam::CurrentLimit, |p| p.current_limit_ma = ma)
    }

    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), DriverError> {
        self.set(ConfigParam::PreambleLength, |p| p.preamble_length = symbols)
    }

    fn set_crc(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.set(ConfigParam::Crc, |p| p.crc_enabled = enabled)
    }

    fn set_tcxo_voltage(&mut self, volts: f32) -> Result<(), DriverError> {
        self.set(ConfigParam::TcxoVoltage, |p| p.tcxo_voltage = volts)
    }

    fn set_rf_switch(&mut self, _enabled: bool) -> Result<(), DriverError> {
        Ok(())
    }

    fn standby(&mut self) -> Result<(), DriverError> {
        let mut s = self.shared.state();
        s.mode = RadioMode::Idle;
        s.tx_pending = false;
        s.tx_done = false;
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), DriverError> {
        let mut s = self.shared.state();
        s.mode = RadioMode::Sleep;
        s.tx_pending = false;
        s.tx_done = false;
        Ok(())
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), DriverError> {
        let line = {
            let mut s = self.shared.state();
            if let Some(err) = s.fail_tx.take() {
                return Err(err);
            }
            s.transmitted.push(data.to_vec());
            s.mode = RadioMode::Transmit;
            s.tx_pending = true;
            s.tx_done = s.auto_complete;
            if s.auto_complete { s.line.clone() } else { None }
        };
        if let Some(line) = line {
            line.fire();
        }
        Ok(())
    }

    fn transmit_complete(&mut self) -> Result<bool, DriverError> {
        Ok(self.shared.state().tx_done)
    }

    fn finish_transmit(&mut self) -> Result<(), DriverError> {
        let mut s = self.shared.state();
        s.tx_pending = false;
        s.tx_done = false;
        s.mode = RadioMode::Idle;
        Ok(())
    }

    fn start_receive(&mut self) -> Result<(), DriverError> {
        self.shared.state().mode = RadioMode::Receive;
        Ok(())
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let mut s = self.shared.state();
        let frame = s.frames.pop_front().ok_or(DriverError::Status(-2))?;
        if frame.corrupt {
            return Err(DriverError::CrcMismatch);
        }
        let len = frame.data.len().min(buf.len());
        buf[..len].copy_from_slice(&frame.data[..len]);
        s.last_status = frame.status;
        Ok(len)
    }

    fn packet_status(&mut self) -> PacketStatus {
        self.shared.state().last_status
    }

    fn attach_irq(&mut self, line: IrqLine) -> Result<(), DriverError> {
        self.shared.state().line = Some(line);
        Ok(())
    }

    fn detach_irq(&mut self) {
        self.shared.state().line = None;
    }
}

impl SimRadioHandle {
    /// Raise the completion interrupt on every transmit (default `true`).
    pub fn set_auto_complete(&self, enabled: bool) {
        self.shared.state().auto_complete = enabled;
    }

    /// Make the next `start_transmit` fail with `err`.
    pub fn fail_next_transmit(&self, err: DriverError) {
        self.shared.state().fail_tx = Some(err);
    }

    /// Refuse every write of `param` until cleared with `None`.
    pub fn reject_param(&self, param: Option<ConfigParam>) {
        self.shared.state().reject = param;
    }

    /// Raise TX-done for a pending transmission.
    pub fn complete_transmit(&self) -> bool {
        let line = {
            let mut s = self.shared.state();
            if !s.tx_pending {
                return false;
            }
            s.tx_done = true;
            s.line.clone()
        };
        line.is_some_and(|l| l.fire())
    }

    /// Pulse DIO1 without latching any status bit, as a noisy line would.
    pub fn glitch_irq(&self) -> bool {
        let line = self.shared.state().line.clone();
        line.is_some_and(|l| l.fire())
    }

    /// Put a frame on air.  Returns `false` unless the chip is receiving.
    pub fn deliver(&self, data: &[u8], rssi: f32, snr: f32) -> bool {
        self.push_frame(Frame {
            data: data.to_vec(),
            status: PacketStatus { rssi, snr, freq_error: 0.0 },
            corrupt: false,
        })
    }

    /// Put a frame with a bad CRC on air.
    pub fn deliver_corrupt(&self) -> bool {
        self.push_frame(Frame {
            data: Vec::new(),
            status: PacketStatus::default(),
            corrupt: true,
        })
    }

    fn push_frame(&self, frame: Frame) -> bool {
        let line = {
            let mut s = self.shared.state();
            if s.mode != RadioMode::Receive {
                return false;
            }
            s.frames.push_back(frame);
            s.line.clone()
        };
        line.is_some_and(|l| l.fire())
    }

    /// Every payload handed to `start_transmit`, oldest first.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.shared.state().transmitted.clone()
    }

    /// Parameters as last written by the transport.
    pub fn params(&self) -> RadioConfig {
        self.shared.state().params
    }

    pub fn mode(&self) -> RadioMode {
        self.shared.state().mode
    }

    pub fn is_begun(&self) -> bool {
        self.shared.state().begun
    }
}
