//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises one subsystem end to end against the
//! simulated drivers.  Everything runs on the host with no hardware.

#![cfg(not(target_os = "espidf"))]

mod cellular_tests;
mod coordinator_tests;
mod radio_tests;
mod support;
mod wifi_tests;
