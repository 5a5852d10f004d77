//! Transport configuration parameters
//!
//! One struct per transport plus the coordinator policy in [`CommsConfig`].
//! Defaults match the handheld's hardware (SX1262 on the 850 MHz band with
//! a 2.4 V TCXO, A7682E-class LTE modem at 115200 baud).  Persisting these
//! values is left to the caller; every struct is serde-serialisable.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::error::ConfigParam;
use crate::transport::{DEFAULT_PRIORITY, TransportKind};

pub type Ssid = String<32>;
pub type Passphrase = String<64>;

/// Copy `s` into a fixed-capacity string, failing with `param` on overflow.
pub fn bounded<const N: usize>(s: &str, param: ConfigParam) -> Result<String<N>, ConfigParam> {
    String::try_from(s).map_err(|_| param)
}

// ---------------------------------------------------------------------------
// Radio
// ---------------------------------------------------------------------------

/// SX1262 LoRa bandwidths (kHz).
pub const SUPPORTED_BANDWIDTHS_KHZ: [f32; 10] =
    [7.8, 10.4, 15.6, 20.8, 31.25, 41.7, 62.5, 125.0, 250.0, 500.0];

/// DIO3 TCXO supply voltages (V); 0.0 disables TCXO control.
pub const SUPPORTED_TCXO_VOLTAGES: [f32; 8] = [1.6, 1.7, 1.8, 2.2, 2.4, 2.7, 3.0, 3.3];

fn approx_in(value: f32, table: &[f32]) -> bool {
    table.iter().any(|v| (value - v).abs() < 0.01)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Carrier frequency (MHz), 150.0 – 960.0.
    pub frequency_mhz: f32,
    /// LoRa bandwidth (kHz), one of [`SUPPORTED_BANDWIDTHS_KHZ`].
    pub bandwidth_khz: f32,
    /// Spreading factor, 5 – 12.
    pub spreading_factor: u8,
    /// Coding rate denominator (4/x), 5 – 8.
    pub coding_rate: u8,
    /// Output power (dBm), -9 – 22.
    pub output_power_dbm: i8,
    pub sync_word: u8,
    /// Preamble length in symbols, at least 1.
    pub preamble_length: u16,
    pub crc_enabled: bool,
    /// PA over-current protection (mA), 0 – 140.
    pub current_limit_ma: f32,
    /// TCXO voltage (V), 0.0 = no TCXO.
    pub tcxo_voltage: f32,
    /// Abort a transmission whose completion interrupt never arrives.
    pub tx_timeout_ms: u32,
}

impl RadioConfig {
    /// Largest LoRa payload the SX1262 FIFO accepts.
    pub const MAX_PAYLOAD: usize = 255;

    /// Check every parameter against SX1262 limits.  Returns the first
    /// offending parameter, in application order.
    pub fn validate(&self) -> Result<(), ConfigParam> {
        if !(150.0..=960.0).contains(&self.frequency_mhz) {
            return Err(ConfigParam::Frequency);
        }
        if !approx_in(self.bandwidth_khz, &SUPPORTED_BANDWIDTHS_KHZ) {
            return Err(ConfigParam::Bandwidth);
        }
        if !(5..=12).contains(&self.spreading_factor) {
            return Err(ConfigParam::SpreadingFactor);
        }
        if !(5..=8).contains(&self.coding_rate) {
            return Err(ConfigParam::CodingRate);
        }
        if !(-9..=22).contains(&self.output_power_dbm) {
            return Err(ConfigParam::OutputPower);
        }
        if !(0.0..=140.0).contains(&self.current_limit_ma) {
            return Err(ConfigParam::CurrentLimit);
        }
        if self.preamble_length == 0 {
            return Err(ConfigParam::PreambleLength);
        }
        if self.tcxo_voltage != 0.0 && !approx_in(self.tcxo_voltage, &SUPPORTED_TCXO_VOLTAGES) {
            return Err(ConfigParam::TcxoVoltage);
        }
        Ok(())
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 850.0,
            bandwidth_khz: 125.0,
            spreading_factor: 10,
            coding_rate: 6,
            output_power_dbm: 22,
            sync_word: 0xAB,
            preamble_length: 15,
            crc_enabled: false,
            current_limit_ma: 140.0,
            tcxo_voltage: 2.4,
            tx_timeout_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Datagram endpoint (WiFi UDP, cellular socket)
// ---------------------------------------------------------------------------

/// Remote peer for opaque payloads over IP transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatagramEndpoint {
    /// Hostname or dotted-quad address.
    pub host: String<64>,
    pub port: u16,
    /// Local port to bind; inbound datagrams arrive here.
    pub local_port: u16,
}

impl DatagramEndpoint {
    pub fn new(host: &str, port: u16, local_port: u16) -> Result<Self, ConfigParam> {
        Ok(Self {
            host: bounded(host, ConfigParam::Endpoint)?,
            port,
            local_port,
        })
    }
}

// ---------------------------------------------------------------------------
// WiFi
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIp {
    pub ip: [u8; 4],
    pub gateway: [u8; 4],
    pub subnet: [u8; 4],
    pub dns1: [u8; 4],
    pub dns2: [u8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpMode {
    Dhcp,
    Static(StaticIp),
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_passphrase(password: &str) -> Result<(), ConfigParam> {
    if password.is_empty() || (8..=64).contains(&password.len()) {
        Ok(())
    } else {
        Err(ConfigParam::Password)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiStationConfig {
    pub ssid: Ssid,
    pub password: Passphrase,
    pub auto_reconnect: bool,
    pub connect_timeout_ms: u32,
    /// Reconnection ceiling after a lost connection.
    pub max_retries: u8,
    /// Delay between reconnection attempts.
    pub reconnect_interval_ms: u32,
    pub ip: IpMode,
    pub endpoint: Option<DatagramEndpoint>,
}

impl WifiStationConfig {
    /// Credentials with default policy.  An empty SSID is accepted here and
    /// rejected by `connect`.
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConfigParam> {
        Ok(Self {
            ssid: bounded(ssid, ConfigParam::Ssid)?,
            password: bounded(password, ConfigParam::Password)?,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigParam> {
        if self.ssid.is_empty() || !is_printable_ascii(&self.ssid) {
            return Err(ConfigParam::Ssid);
        }
        validate_passphrase(&self.password)
    }
}

impl Default for WifiStationConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            auto_reconnect: true,
            connect_timeout_ms: 10_000,
            max_retries: 3,
            reconnect_interval_ms: 5_000,
            ip: IpMode::Dhcp,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiApConfig {
    pub ssid: Ssid,
    pub password: Passphrase,
    /// 2.4 GHz channel, 1 – 13.
    pub channel: u8,
    pub hidden: bool,
    /// 1 – 10 stations.
    pub max_connections: u8,
    pub ip: [u8; 4],
    pub gateway: [u8; 4],
    pub subnet: [u8; 4],
}

impl WifiApConfig {
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConfigParam> {
        Ok(Self {
            ssid: bounded(ssid, ConfigParam::Ssid)?,
            password: bounded(password, ConfigParam::Password)?,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigParam> {
        if self.ssid.is_empty() || !is_printable_ascii(&self.ssid) {
            return Err(ConfigParam::Ssid);
        }
        validate_passphrase(&self.password)?;
        if !(1..=13).contains(&self.channel) {
            return Err(ConfigParam::Channel);
        }
        if !(1..=10).contains(&self.max_connections) {
            return Err(ConfigParam::MaxClients);
        }
        Ok(())
    }
}

impl Default for WifiApConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            channel: 1,
            hidden: false,
            max_connections: 4,
            ip: [192, 168, 4, 1],
            gateway: [192, 168, 4, 1],
            subnet: [255, 255, 255, 0],
        }
    }
}

// ---------------------------------------------------------------------------
// Cellular
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    None,
    Pap,
    Chap,
}

impl AuthMode {
    /// `AT+CGAUTH` auth-type code.
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Pap => 1,
            Self::Chap => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnConfig {
    pub apn: String<64>,
    pub username: String<32>,
    pub password: String<32>,
    pub auth: AuthMode,
}

impl ApnConfig {
    pub fn new(apn: &str) -> Result<Self, ConfigParam> {
        Ok(Self {
            apn: bounded(apn, ConfigParam::Apn)?,
            ..Self::default()
        })
    }
}

impl Default for ApnConfig {
    fn default() -> Self {
        Self {
            apn: String::new(),
            username: String::new(),
            password: String::new(),
            auth: AuthMode::Pap,
        }
    }
}

/// Control-line pulse widths, polling budgets and command timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemTiming {
    pub reset_pulse_ms: u32,
    pub power_key_pulse_ms: u32,
    pub boot_wait_ms: u32,
    /// `AT` liveness probes after power-on.
    pub probe_attempts: u8,
    pub probe_interval_ms: u32,
    /// `AT+CREG?` polls while searching.
    pub registration_polls: u8,
    pub registration_interval_ms: u32,
    pub power_off_pulse_ms: u32,
    /// Default for ordinary commands.
    pub command_timeout_ms: u32,
    /// `AT+CGACT` / socket open.
    pub activation_timeout_ms: u32,
    pub sms_timeout_ms: u32,
    /// Idle time before a keep-alive `AT`.
    pub keepalive_interval_ms: u32,
}

impl Default for ModemTiming {
    fn default() -> Self {
        Self {
            reset_pulse_ms: 100,
            power_key_pulse_ms: 1_000,
            boot_wait_ms: 2_000,
            probe_attempts: 10,
            probe_interval_ms: 1_000,
            registration_polls: 30,
            registration_interval_ms: 1_000,
            power_off_pulse_ms: 3_000,
            command_timeout_ms: 1_000,
            activation_timeout_ms: 30_000,
            sms_timeout_ms: 30_000,
            keepalive_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellularConfig {
    /// SIM PIN, sent if the SIM reports `SIM PIN`.
    pub pin: String<8>,
    pub apn: ApnConfig,
    pub baud_rate: u32,
    pub init_timeout_ms: u32,
    pub connect_timeout_ms: u32,
    /// Power on and connect from the worker after initialisation.
    pub auto_connect: bool,
    pub max_retries: u8,
    pub endpoint: Option<DatagramEndpoint>,
    pub timing: ModemTiming,
}

impl CellularConfig {
    pub fn validate(&self) -> Result<(), ConfigParam> {
        if self.apn.apn.is_empty() {
            return Err(ConfigParam::Apn);
        }
        if self.baud_rate == 0 {
            return Err(ConfigParam::BaudRate);
        }
        Ok(())
    }
}

impl Default for CellularConfig {
    fn default() -> Self {
        Self {
            pin: String::new(),
            apn: ApnConfig::default(),
            baud_rate: 115_200,
            init_timeout_ms: 30_000,
            connect_timeout_ms: 60_000,
            auto_connect: false,
            max_retries: 3,
            endpoint: None,
            timing: ModemTiming::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommsConfig {
    pub radio: RadioConfig,
    /// Station credentials to connect with at initialisation.
    pub wifi_station: Option<WifiStationConfig>,
    /// Access point to bring up at initialisation.
    pub wifi_ap: Option<WifiApConfig>,
    pub cellular: CellularConfig,

    pub enable_radio: bool,
    pub enable_wifi: bool,
    pub enable_cellular: bool,

    /// Interface to prefer whenever it is available; `None` for no preference.
    pub preferred: TransportKind,
    pub auto_failover: bool,
    /// Selection, failover and receive-poll order.
    pub priority: [TransportKind; 3],
    /// Period of the active-interface reassessment.
    pub reassess_interval_ms: u32,
    /// Keep the radio in continuous receive when idle.
    pub radio_listen: bool,
}

impl CommsConfig {
    pub fn validate(&self) -> Result<(), ConfigParam> {
        for kind in TransportKind::PHYSICAL {
            if self.priority.iter().filter(|k| **k == kind).count() != 1 {
                return Err(ConfigParam::Priority);
            }
        }
        if self.enable_radio {
            self.radio.validate()?;
        }
        if let Some(ap) = &self.wifi_ap {
            ap.validate()?;
        }
        Ok(())
    }
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            radio: RadioConfig::default(),
            wifi_station: None,
            wifi_ap: None,
            cellular: CellularConfig::default(),
            enable_radio: true,
            enable_wifi: true,
            enable_cellular: true,
            preferred: TransportKind::None,
            auto_failover: true,
            priority: DEFAULT_PRIORITY,
            reassess_interval_ms: 5_000,
            radio_listen: true,
        }
    }
}
