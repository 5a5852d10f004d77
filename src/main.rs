//! Commlink firmware entry point.
//!
//! Wires the board peripherals into the three transports, hands them to the
//! coordinator and then runs a diagnostics loop.
//!
//! ```text
//! ┌────────────┐ SPI2 ┌──────────┐
//! │  SX1262    │◀────▶│          │            ┌────────────────────────┐
//! └────────────┘      │          │  drivers   │  TransportCoordinator  │
//! ┌────────────┐ RF   │ ESP32-S3 │──────────▶│  radio · wifi · cell   │
//! │  WiFi      │◀────▶│          │            └───────────┬────────────┘
//! └────────────┘      │          │                        │ status_json
//! ┌────────────┐ UART1│          │                        ▼
//! │  A7682E    │◀────▶│          │                    log output
//! └────────────┘      └──────────┘
//! ```
#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::Delay;
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyInputPin, AnyOutputPin, PinDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::spi::{SpiDeviceDriver, SpiDriver, SpiDriverConfig, config::Config as SpiConfig};
use esp_idf_svc::hal::uart::UartDriver;
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use commlink::config::CommsConfig;
use commlink::coordinator::TransportCoordinator;
use commlink::drivers::esp_wifi::EspWifi;
use commlink::drivers::modem_uart::ModemUart;
use commlink::drivers::sx1262::Sx1262;
use commlink::pins;

const NVS_NAMESPACE: &str = "commlink";
const NVS_CONFIG_KEY: &str = "config";
const CONFIG_BLOB_MAX: usize = 2048;
const STATUS_INTERVAL: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stored JSON configuration, or device defaults when absent or unreadable.
fn load_config(partition: &EspDefaultNvsPartition) -> CommsConfig {
    let nvs = match EspNvs::<NvsDefault>::new(partition.clone(), NVS_NAMESPACE, true) {
        Ok(nvs) => nvs,
        Err(e) => {
            warn!("Config: NVS namespace unavailable ({}), using defaults", e);
            return CommsConfig::default();
        }
    };
    let mut buf = [0u8; CONFIG_BLOB_MAX];
    match nvs.get_raw(NVS_CONFIG_KEY, &mut buf) {
        Ok(Some(blob)) => match serde_json::from_slice::<CommsConfig>(blob) {
            Ok(config) => {
                info!("Config: loaded from NVS ({} bytes)", blob.len());
                config
            }
            Err(e) => {
                warn!("Config: stored blob invalid ({}), using defaults", e);
                CommsConfig::default()
            }
        },
        Ok(None) => {
            info!("Config: none stored, using defaults");
            CommsConfig::default()
        }
        Err(e) => {
            warn!("Config: NVS read failed ({}), using defaults", e);
            CommsConfig::default()
        }
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Commlink v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // ── 2. Configuration ──────────────────────────────────────
    let config = load_config(&nvs);

    // ── 3. LoRa radio (SX1262 on SPI2) ────────────────────────
    // SAFETY: each GPIO number in `pins` is claimed exactly once, here.
    let (sck, mosi, miso, cs, rst, busy, dio1) = unsafe {
        (
            AnyIOPin::new(pins::LORA_SCK_GPIO),
            AnyIOPin::new(pins::LORA_MOSI_GPIO),
            AnyIOPin::new(pins::LORA_MISO_GPIO),
            AnyIOPin::new(pins::LORA_CS_GPIO),
            AnyOutputPin::new(pins::LORA_RST_GPIO),
            AnyInputPin::new(pins::LORA_BUSY_GPIO),
            AnyInputPin::new(pins::LORA_DIO1_GPIO),
        )
    };
    let spi_bus = SpiDriver::new(peripherals.spi2, sck, mosi, Some(miso), &SpiDriverConfig::new())?;
    let spi = SpiDeviceDriver::new(spi_bus, Some(cs), &SpiConfig::new().baudrate(Hertz(pins::LORA_SPI_HZ)))?;
    // Held for the life of the program so the edge interrupt stays routed.
    let _dio1 = PinDriver::input(dio1)?;
    let radio = Sx1262::new(
        spi,
        PinDriver::output(rst)?,
        PinDriver::input(busy)?,
        Delay::new_default(),
        pins::LORA_DIO1_GPIO,
    );

    // ── 4. WiFi ───────────────────────────────────────────────
    let wifi = EspWifi::new(peripherals.modem, sysloop, Some(nvs))
        .map_err(|e| anyhow::anyhow!("wifi driver: {e}"))?;

    // ── 5. LTE modem (A7682E on UART1) ────────────────────────
    // SAFETY: as above, claimed once.
    let (tx, rx, pwrkey, reset, supply) = unsafe {
        (
            AnyIOPin::new(pins::MODEM_TX_GPIO),
            AnyIOPin::new(pins::MODEM_RX_GPIO),
            AnyOutputPin::new(pins::MODEM_PWRKEY_GPIO),
            AnyOutputPin::new(pins::MODEM_RESET_GPIO),
            AnyOutputPin::new(pins::MODEM_PWR_GPIO),
        )
    };
    let (cts, rts) = ModemUart::no_flow_control();
    let uart = UartDriver::new(
        peripherals.uart1,
        tx,
        rx,
        cts,
        rts,
        &ModemUart::uart_config(config.cellular.baud_rate),
    )?;
    let modem = ModemUart::new(uart, pwrkey, reset, supply)
        .map_err(|e| anyhow::anyhow!("modem port: {e}"))?;

    // ── 6. Coordinator ────────────────────────────────────────
    let comms = TransportCoordinator::new(config, radio, wifi, modem);
    comms
        .initialize()
        .map_err(|e| anyhow::anyhow!("comms init: {e}"))?;
    info!("Active interface: {}", comms.get_active_interface());

    // ── 7. Diagnostics loop ───────────────────────────────────
    let mut buf = [0u8; 1024];
    let mut since_status = Duration::ZERO;
    loop {
        while let Some((len, via)) = comms.receive_message(&mut buf) {
            info!("Inbound {} bytes via {}", len, via);
        }

        since_status += POLL_INTERVAL;
        if since_status >= STATUS_INTERVAL {
            since_status = Duration::ZERO;
            match comms.status_json() {
                Ok(json) => info!("Status: {}", json),
                Err(e) => warn!("Status unavailable: {}", e),
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
