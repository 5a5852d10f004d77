//! Hardware drivers and task helpers.

pub mod sx1262;
pub mod task_pin;

#[cfg(target_os = "espidf")]
pub mod esp_wifi;
#[cfg(target_os = "espidf")]
pub mod modem_uart;
