//! Shared fixtures: fast modem timing, canned configurations and a
//! polling wait for worker-driven state.

use std::time::{Duration, Instant};

use commlink::config::{ApnConfig, CellularConfig, CommsConfig, DatagramEndpoint, ModemTiming, WifiStationConfig};

/// Upper bound for anything a worker thread has to do.
pub const SETTLE: Duration = Duration::from_secs(3);

/// Poll `cond` until it holds or [`SETTLE`] passes.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Modem timing with every pulse and wait collapsed.
pub fn fast_timing() -> ModemTiming {
    ModemTiming {
        reset_pulse_ms: 0,
        power_key_pulse_ms: 0,
        boot_wait_ms: 0,
        probe_attempts: 3,
        probe_interval_ms: 1,
        registration_polls: 5,
        registration_interval_ms: 1,
        power_off_pulse_ms: 0,
        command_timeout_ms: 200,
        activation_timeout_ms: 200,
        sms_timeout_ms: 200,
        keepalive_interval_ms: 60_000,
    }
}

pub fn endpoint() -> DatagramEndpoint {
    DatagramEndpoint::new("198.51.100.7", 5683, 5684).unwrap()
}

pub fn cellular_config() -> CellularConfig {
    CellularConfig {
        apn: ApnConfig::new("internet").unwrap(),
        timing: fast_timing(),
        endpoint: Some(endpoint()),
        ..CellularConfig::default()
    }
}

/// Credentials matching the network the fixtures put in range.
pub fn station() -> WifiStationConfig {
    WifiStationConfig {
        endpoint: Some(endpoint()),
        reconnect_interval_ms: 10,
        connect_timeout_ms: 1_000,
        ..WifiStationConfig::new("fieldnet", "hunter2hunter2").unwrap()
    }
}

pub fn comms_config() -> CommsConfig {
    CommsConfig {
        wifi_station: Some(station()),
        cellular: CellularConfig { auto_connect: true, ..cellular_config() },
        reassess_interval_ms: 50,
        ..CommsConfig::default()
    }
}
