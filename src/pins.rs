//! GPIO / peripheral pin assignments for the handheld main board.
//!
//! Single source of truth: the board wiring in `main.rs` references this
//! module rather than hard-coding pin numbers.

// ---------------------------------------------------------------------------
// LoRa transceiver (SX1262), SPI2 shared with the e-paper panel
// ---------------------------------------------------------------------------

pub const LORA_CS_GPIO: i32 = 9;
pub const LORA_RST_GPIO: i32 = 17;
/// Interrupt output; rising edge on TX-done / RX-done.
pub const LORA_DIO1_GPIO: i32 = 45;
/// HIGH while the chip is processing a command.
pub const LORA_BUSY_GPIO: i32 = 46;
pub const LORA_SCK_GPIO: i32 = 14;
pub const LORA_MOSI_GPIO: i32 = 15;
pub const LORA_MISO_GPIO: i32 = 16;

/// SPI clock for the SX1262 (datasheet maximum is 16 MHz).
pub const LORA_SPI_HZ: u32 = 8_000_000;

// ---------------------------------------------------------------------------
// LTE modem (A7682E), UART1
// ---------------------------------------------------------------------------

/// Supply enable.
pub const MODEM_PWR_GPIO: i32 = 4;
pub const MODEM_DTR_GPIO: i32 = 5;
/// Ring indicator (input).
pub const MODEM_RI_GPIO: i32 = 6;
/// Power key; a held pulse toggles the modem on or off.
pub const MODEM_PWRKEY_GPIO: i32 = 7;
/// Hardware reset, active low.
pub const MODEM_RESET_GPIO: i32 = 8;
/// ESP32 TX → modem RX.
pub const MODEM_TX_GPIO: i32 = 43;
/// ESP32 RX ← modem TX.
pub const MODEM_RX_GPIO: i32 = 44;

/// UART port used for the modem.
pub const MODEM_UART_PORT: i32 = 1;
/// Receive ring buffer in the UART driver.
pub const MODEM_UART_RX_BUF: usize = 2048;
