//! SX1262 LoRa transceiver over blocking embedded-hal 1.0.
//!
//! Generic over any `SpiDevice` (chip select owned by the device), a reset
//! output, the BUSY input and a delay source, so the same code runs against
//! `esp-idf-hal` drivers on the board and against fakes in tests.
//!
//! Modulation and packet parameters are written as whole SX126x commands;
//! the per-parameter setters update a cached copy and rewrite the command
//! that carries it.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::{Operation, SpiDevice};
use log::{debug, warn};

use crate::irq::IrqLine;
use crate::radio::driver::{DriverError, PacketStatus, RadioDriver};

mod cmd {
    pub const SET_SLEEP: u8 = 0x84;
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RX: u8 = 0x82;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_PACKET_TYPE: u8 = 0x8A;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PACKET_PARAMS: u8 = 0x8C;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
    pub const SET_PA_CONFIG: u8 = 0x95;
    pub const SET_DIO3_AS_TCXO_CTRL: u8 = 0x97;
    pub const SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x08;
    pub const CLEAR_IRQ_STATUS: u8 = 0x02;
    pub const CALIBRATE: u8 = 0x89;
    pub const WRITE_REGISTER: u8 = 0x0D;
    pub const READ_REGISTER: u8 = 0x1D;
    pub const WRITE_BUFFER: u8 = 0x0E;
    pub const READ_BUFFER: u8 = 0x1E;
    pub const GET_IRQ_STATUS: u8 = 0x12;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x13;
    pub const GET_PACKET_STATUS: u8 = 0x14;
}

mod reg {
    pub const LORA_SYNC_WORD_MSB: u16 = 0x0740;
    pub const OCP_CONFIGURATION: u16 = 0x08E7;
    pub const FREQ_ERROR: u16 = 0x076B;
}

mod irq {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const HEADER_ERR: u16 = 0x0020;
    pub const CRC_ERR: u16 = 0x0040;
    pub const TIMEOUT: u16 = 0x0200;
    pub const ALL: u16 = 0xFFFF;
}

const PACKET_TYPE_LORA: u8 = 0x01;
const STDBY_RC: u8 = 0x00;
/// Warm start: configuration retained across sleep.
const SLEEP_WARM: u8 = 0x04;
const XTAL_HZ: u64 = 32_000_000;
/// BUSY polls of 100 µs before giving up.
const BUSY_POLLS: u32 = 1_000;
/// TCXO start-up allowance, in 15.625 µs steps (5 ms).
const TCXO_DELAY: u32 = 0x0140;

/// SX126x register encoding of `(bandwidth kHz, code)`.
const BANDWIDTHS: [(f32, u8); 10] = [
    (7.8, 0x00),
    (10.4, 0x08),
    (15.6, 0x01),
    (20.8, 0x09),
    (31.25, 0x02),
    (41.7, 0x0A),
    (62.5, 0x03),
    (125.0, 0x04),
    (250.0, 0x05),
    (500.0, 0x06),
];

const TCXO_CODES: [(f32, u8); 8] = [
    (1.6, 0x00),
    (1.7, 0x01),
    (1.8, 0x02),
    (2.2, 0x03),
    (2.4, 0x04),
    (2.7, 0x05),
    (3.0, 0x06),
    (3.3, 0x07),
];

fn lookup(table: &[(f32, u8)], value: f32) -> Option<u8> {
    table.iter().find(|(v, _)| (value - v).abs() < 0.01).map(|(_, code)| *code)
}

/// `SetRfFrequency` argument for `mhz`.
pub fn frequency_word(mhz: f32) -> [u8; 4] {
    let hz = (f64::from(mhz) * 1_000_000.0) as u64;
    let word = ((hz << 25) / XTAL_HZ) as u32;
    word.to_be_bytes()
}

/// LoRa sync word as the two nibble-expanded register bytes.
pub const fn sync_word_bytes(word: u8) -> [u8; 2] {
    [(word & 0xF0) | 0x04, ((word & 0x0F) << 4) | 0x04]
}

struct Modulation {
    sf: u8,
    bw_khz: f32,
    bw_code: u8,
    cr: u8,
}

struct Packet {
    preamble: u16,
    crc: bool,
}

pub struct Sx1262<SPI, RST, BUSY, DL> {
    spi: SPI,
    reset: RST,
    busy: BUSY,
    delay: DL,
    dio1_gpio: i32,
    irq_attached: bool,
    modulation: Modulation,
    packet: Packet,
    last_len: u8,
}

impl<SPI, RST, BUSY, DL> Sx1262<SPI, RST, BUSY, DL>
where
    SPI: SpiDevice,
    RST: OutputPin,
    BUSY: InputPin,
    DL: DelayNs,
{
    pub fn new(spi: SPI, reset: RST, busy: BUSY, delay: DL, dio1_gpio: i32) -> Self {
        Self {
            spi,
            reset,
            busy,
            delay,
            dio1_gpio,
            irq_attached: false,
            modulation: Modulation { sf: 7, bw_khz: 125.0, bw_code: 0x04, cr: 5 },
            packet: Packet { preamble: 8, crc: true },
            last_len: 0,
        }
    }

    // ── Bus primitives ────────────────────────────────────────

    fn wait_ready(&mut self) -> Result<(), DriverError> {
        for _ in 0..BUSY_POLLS {
            if self.busy.is_low().map_err(|_| DriverError::Bus)? {
                return Ok(());
            }
            self.delay.delay_us(100);
        }
        Err(DriverError::Timeout)
    }

    fn command(&mut self, op: u8, args: &[u8]) -> Result<(), DriverError> {
        self.wait_ready()?;
        self.spi
            .transaction(&mut [Operation::Write(&[op]), Operation::Write(args)])
            .map_err(|_| DriverError::Bus)
    }

    fn query(&mut self, op: u8, out: &mut [u8]) -> Result<(), DriverError> {
        self.wait_ready()?;
        // Opcode, then one status byte clocked out before the response.
        self.spi
            .transaction(&mut [Operation::Write(&[op, 0x00]), Operation::Read(out)])
            .map_err(|_| DriverError::Bus)
    }

    fn write_register(&mut self, addr: u16, data: &[u8]) -> Result<(), DriverError> {
        let [hi, lo] = addr.to_be_bytes();
        self.wait_ready()?;
        self.spi
            .transaction(&mut [Operation::Write(&[cmd::WRITE_REGISTER, hi, lo]), Operation::Write(data)])
            .map_err(|_| DriverError::Bus)
    }

    fn read_register(&mut self, addr: u16, out: &mut [u8]) -> Result<(), DriverError> {
        let [hi, lo] = addr.to_be_bytes();
        self.wait_ready()?;
        self.spi
            .transaction(&mut [Operation::Write(&[cmd::READ_REGISTER, hi, lo, 0x00]), Operation::Read(out)])
            .map_err(|_| DriverError::Bus)
    }

    // ── Composite commands ────────────────────────────────────

    fn write_modulation(&mut self) -> Result<(), DriverError> {
        let m = &self.modulation;
        // Low data-rate optimisation once a symbol exceeds 16 ms.
        let symbol_ms = f32::from(1u16 << m.sf) / m.bw_khz;
        let ldro = u8::from(symbol_ms > 16.0);
        let args = [m.sf, m.bw_code, m.cr - 4, ldro];
        self.command(cmd::SET_MODULATION_PARAMS, &args)
    }

    fn write_packet_params(&mut self, payload_len: u8) -> Result<(), DriverError> {
        let [p_hi, p_lo] = self.packet.preamble.to_be_bytes();
        // Explicit header, standard IQ.
        let args = [p_hi, p_lo, 0x00, payload_len, u8::from(self.packet.crc), 0x00];
        self.command(cmd::SET_PACKET_PARAMS, &args)
    }

    fn set_irq_mask(&mut self, mask: u16) -> Result<(), DriverError> {
        let [hi, lo] = mask.to_be_bytes();
        // Same mask on IRQ and DIO1; DIO2/DIO3 unused.
        self.command(cmd::SET_DIO_IRQ_PARAMS, &[hi, lo, hi, lo, 0, 0, 0, 0])
    }

    fn clear_irq(&mut self) -> Result<(), DriverError> {
        let [hi, lo] = irq::ALL.to_be_bytes();
        self.command(cmd::CLEAR_IRQ_STATUS, &[hi, lo])
    }

    fn irq_status(&mut self) -> Result<u16, DriverError> {
        let mut out = [0u8; 2];
        self.query(cmd::GET_IRQ_STATUS, &mut out)?;
        Ok(u16::from_be_bytes(out))
    }

    fn frequency_error_hz(&mut self) -> Result<f32, DriverError> {
        let mut raw = [0u8; 3];
        self.read_register(reg::FREQ_ERROR, &mut raw)?;
        let mut efe = (u32::from(raw[0] & 0x0F) << 16) | (u32::from(raw[1]) << 8) | u32::from(raw[2]);
        // 20-bit two's complement.
        if efe & 0x8_0000 != 0 {
            efe |= 0xFFF0_0000;
        }
        let efe = efe as i32 as f32;
        Ok(1.55 * efe / (1600.0 / self.modulation.bw_khz) * 1000.0)
    }
}

impl<SPI, RST, BUSY, DL> RadioDriver for Sx1262<SPI, RST, BUSY, DL>
where
    SPI: SpiDevice + Send + 'static,
    RST: OutputPin + Send + 'static,
    BUSY: InputPin + Send + 'static,
    DL: DelayNs + Send + 'static,
{
    fn begin(&mut self, frequency_mhz: f32) -> Result<(), DriverError> {
        self.reset.set_low().map_err(|_| DriverError::Bus)?;
        self.delay.delay_ms(10);
        self.reset.set_high().map_err(|_| DriverError::Bus)?;
        self.delay.delay_ms(20);
        self.wait_ready()?;

        self.command(cmd::SET_STANDBY, &[STDBY_RC])?;
        self.command(cmd::SET_PACKET_TYPE, &[PACKET_TYPE_LORA])?;
        self.command(cmd::SET_BUFFER_BASE_ADDRESS, &[0x00, 0x00])?;
        self.set_frequency(frequency_mhz)?;
        debug!("SX1262: reset complete, {:.1} MHz", frequency_mhz);
        Ok(())
    }

    fn set_frequency(&mut self, mhz: f32) -> Result<(), DriverError> {
        if !(150.0..=960.0).contains(&mhz) {
            return Err(DriverError::InvalidParam);
        }
        self.command(cmd::SET_RF_FREQUENCY, &frequency_word(mhz))
    }

    fn set_bandwidth(&mut self, khz: f32) -> Result<(), DriverError> {
        let code = lookup(&BANDWIDTHS, khz).ok_or(DriverError::InvalidParam)?;
        self.modulation.bw_khz = khz;
        self.modulation.bw_code = code;
        self.write_modulation()
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), DriverError> {
        if !(5..=12).contains(&sf) {
            return Err(DriverError::InvalidParam);
        }
        self.modulation.sf = sf;
        self.write_modulation()
    }

    fn set_coding_rate(&mut self, cr: u8) -> Result<(), DriverError> {
        if !(5..=8).contains(&cr) {
            return Err(DriverError::InvalidParam);
        }
        self.modulation.cr = cr;
        self.write_modulation()
    }

    fn set_sync_word(&mut self, word: u8) -> Result<(), DriverError> {
        self.write_register(reg::LORA_SYNC_WORD_MSB, &sync_word_bytes(word))
    }

    fn set_output_power(&mut self, dbm: i8) -> Result<(), DriverError> {
        if !(-9..=22).contains(&dbm) {
            return Err(DriverError::InvalidParam);
        }
        // High-power PA: duty cycle 4, hpMax 7, SX1262, paLut 1.
        self.command(cmd::SET_PA_CONFIG, &[0x04, 0x07, 0x00, 0x01])?;
        // 200 µs ramp.
        self.command(cmd::SET_TX_PARAMS, &[dbm as u8, 0x04])
    }

    fn set_current_limit(&mut self, ma: f32) -> Result<(), DriverError> {
        if !(0.0..=140.0).contains(&ma) {
            return Err(DriverError::InvalidParam);
        }
        let ocp = ((ma / 2.5) as u8).min(63);
        self.write_register(reg::OCP_CONFIGURATION, &[ocp])
    }

    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), DriverError> {
        if symbols == 0 {
            return Err(DriverError::InvalidParam);
        }
        self.packet.preamble = symbols;
        self.write_packet_params(self.last_len)
    }

    fn set_crc(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.packet.crc = enabled;
        self.write_packet_params(self.last_len)
    }

    fn set_tcxo_voltage(&mut self, volts: f32) -> Result<(), DriverError> {
        if volts == 0.0 {
            return Ok(());
        }
        let code = lookup(&TCXO_CODES, volts).ok_or(DriverError::InvalidParam)?;
        let [_, d2, d1, d0] = TCXO_DELAY.to_be_bytes();
        self.command(cmd::SET_DIO3_AS_TCXO_CTRL, &[code, d2, d1, d0])?;
        // Recalibrate every block against the new reference.
        self.command(cmd::CALIBRATE, &[0x7F])?;
        self.delay.delay_ms(5);
        self.wait_ready()
    }

    fn set_rf_switch(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.command(cmd::SET_DIO2_AS_RF_SWITCH_CTRL, &[u8::from(enabled)])
    }

    fn standby(&mut self) -> Result<(), DriverError> {
        self.command(cmd::SET_STANDBY, &[STDBY_RC])
    }

    fn sleep(&mut self) -> Result<(), DriverError> {
        self.command(cmd::SET_SLEEP, &[SLEEP_WARM])?;
        // The chip ignores SPI for 500 µs after entering sleep.
        self.delay.delay_us(500);
        Ok(())
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), DriverError> {
        let len = u8::try_from(data.len()).map_err(|_| DriverError::InvalidParam)?;
        self.standby()?;
        self.last_len = len;
        self.write_packet_params(len)?;
        self.wait_ready()?;
        self.spi
            .transaction(&mut [Operation::Write(&[cmd::WRITE_BUFFER, 0x00]), Operation::Write(data)])
            .map_err(|_| DriverError::Bus)?;
        self.set_irq_mask(irq::TX_DONE | irq::TIMEOUT)?;
        self.clear_irq()?;
        // No chip-side timeout; the transport runs its own watchdog.
        self.command(cmd::SET_TX, &[0x00, 0x00, 0x00])
    }

    fn transmit_complete(&mut self) -> Result<bool, DriverError> {
        Ok(self.irq_status()? & (irq::TX_DONE | irq::TIMEOUT) != 0)
    }

    fn finish_transmit(&mut self) -> Result<(), DriverError> {
        let status = self.irq_status()?;
        self.clear_irq()?;
        if status & irq::TX_DONE != 0 {
            Ok(())
        } else if status & irq::TIMEOUT != 0 {
            Err(DriverError::Timeout)
        } else {
            Err(DriverError::Status(-(status as i16 & 0x7FFF)))
        }
    }

    fn start_receive(&mut self) -> Result<(), DriverError> {
        self.standby()?;
        self.last_len = u8::MAX;
        self.write_packet_params(u8::MAX)?;
        self.set_irq_mask(irq::RX_DONE | irq::TIMEOUT | irq::CRC_ERR | irq::HEADER_ERR)?;
        self.clear_irq()?;
        // 0xFFFFFF: continuous receive.
        self.command(cmd::SET_RX, &[0xFF, 0xFF, 0xFF])
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let status = self.irq_status()?;
        self.clear_irq()?;
        if status & (irq::CRC_ERR | irq::HEADER_ERR) != 0 {
            return Err(DriverError::CrcMismatch);
        }
        if status & irq::RX_DONE == 0 {
            return Err(DriverError::Status(-(status as i16 & 0x7FFF)));
        }

        let mut rx = [0u8; 2];
        self.query(cmd::GET_RX_BUFFER_STATUS, &mut rx)?;
        let [len, offset] = rx;
        let len = usize::from(len).min(buf.len());
        self.wait_ready()?;
        self.spi
            .transaction(&mut [
                Operation::Write(&[cmd::READ_BUFFER, offset, 0x00]),
                Operation::Read(&mut buf[..len]),
            ])
            .map_err(|_| DriverError::Bus)?;
        Ok(len)
    }

    fn packet_status(&mut self) -> PacketStatus {
        let mut raw = [0u8; 3];
        if let Err(e) = self.query(cmd::GET_PACKET_STATUS, &mut raw) {
            warn!("SX1262: packet status read failed: {}", e);
            return PacketStatus::default();
        }
        let freq_error = self.frequency_error_hz().unwrap_or(0.0);
        PacketStatus {
            rssi: -f32::from(raw[0]) / 2.0,
            snr: f32::from(raw[1] as i8) / 4.0,
            freq_error,
        }
    }

    #[cfg(target_os = "espidf")]
    fn attach_irq(&mut self, line: IrqLine) -> Result<(), DriverError> {
        crate::irq::install_gpio_irq(self.dio1_gpio, &line).map_err(|_| DriverError::Bus)?;
        self.irq_attached = true;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn attach_irq(&mut self, line: IrqLine) -> Result<(), DriverError> {
        crate::irq::register(self.dio1_gpio, &line).map_err(|_| DriverError::Bus)?;
        self.irq_attached = true;
        Ok(())
    }

    fn detach_irq(&mut self) {
        if !self.irq_attached {
            return;
        }
        #[cfg(target_os = "espidf")]
        crate::irq::remove_gpio_irq(self.dio1_gpio);
        #[cfg(not(target_os = "espidf"))]
        crate::irq::unregister(self.dio1_gpio);
        self.irq_attached = false;
    }
}
