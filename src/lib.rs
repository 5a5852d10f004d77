//! Commlink: unified LoRa / WiFi / cellular transport layer.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  TransportCoordinator                        │
//! │   selection · failover · aggregate stats · status report     │
//! │                                                              │
//! │  ───────────────── Transport trait ─────────────────────     │
//! │                                                              │
//! │  RadioTransport      WifiTransport       CellularTransport   │
//! │  (SX1262 LoRa)       (station + AP)      (A7682E, AT cmds)   │
//! │                                                              │
//! │  ───────────────── Driver ports ────────────────────────     │
//! │                                                              │
//! │  RadioDriver         WifiDriver          ModemPort           │
//! │  Sx1262 / SimRadio   EspWifi / SimWifi   ModemUart / SimModem│
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Hardware drivers are guarded by `#[cfg(target_os = "espidf")]`; the
//! simulated drivers are compiled for every other target so the whole
//! stack runs under host tests.

#![deny(unused_must_use)]

pub mod config;
pub mod error;
pub mod irq;
pub mod pins;
pub mod stats;
pub mod sync;
pub mod transport;

pub mod drivers;

pub mod cellular;
pub mod coordinator;
pub mod radio;
pub mod wifi;

pub use coordinator::TransportCoordinator;
pub use error::{Error, Result};
pub use transport::{Transport, TransportKind};
