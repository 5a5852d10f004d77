//! WiFi transport against the simulated radio.

use std::sync::{Arc, Mutex};

use commlink::Transport;
use commlink::config::{WifiApConfig, WifiStationConfig};
use commlink::error::{ConfigParam, ConnectionError, Error, TransmitError};
use commlink::stats::WifiStats;
use commlink::wifi::driver::WifiMode;
use commlink::wifi::sim::{SentDatagram, SimWifi, SimWifiHandle};
use commlink::wifi::{WifiStatus, WifiTransport};

use crate::support::{station, wait_until};

fn wifi() -> (WifiTransport<SimWifi>, SimWifiHandle) {
    let (driver, handle) = SimWifi::new();
    handle.add_network("fieldnet", "hunter2hunter2", -61, 11);
    let wifi = WifiTransport::new(driver);
    wifi.initialize().unwrap();
    (wifi, handle)
}

fn connected() -> (WifiTransport<SimWifi>, SimWifiHandle) {
    let (wifi, handle) = wifi();
    wifi.connect(&station(), None).unwrap();
    assert!(wait_until(|| wifi.is_connected()));
    (wifi, handle)
}

#[test]
fn empty_ssid_never_reaches_the_driver() {
    let (wifi, handle) = wifi();
    let cfg = WifiStationConfig { ssid: Default::default(), ..station() };
    assert_eq!(wifi.connect(&cfg, None), Err(Error::Connection(ConnectionError::EmptySsid)));
    assert_eq!(wifi.stats().unwrap().connect_attempts, 0);
    assert_eq!(handle.begin_calls(), 0);
}

#[test]
fn association_reports_link_details_and_binds_socket() {
    let (wifi, handle) = wifi();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    wifi.connect(&station(), Some(Box::new(move |s| log.lock().unwrap().push(s))))
        .unwrap();
    assert_eq!(wifi.status(), WifiStatus::Connecting);

    assert!(wait_until(|| wifi.is_connected()));
    assert!(wait_until(|| wifi.ip_address() == Some([192, 168, 1, 50])));
    assert_eq!(wifi.ssid().as_deref(), Some("fieldnet"));
    assert_eq!(wifi.rssi(), Some(-61));
    assert_eq!(wifi.channel(), Some(11));
    assert!(wifi.mac_address().is_some());
    assert_eq!(handle.bound_port(), Some(5684));
    assert!(wait_until(|| seen.lock().unwrap().contains(&WifiStatus::Connected)));

    let stats = wifi.stats().unwrap();
    assert_eq!(stats.connect_attempts, 1);
    assert_eq!(stats.successful_connections, 1);
    assert!(wifi.is_available());
}

#[test]
fn datagrams_flow_both_ways_once_connected() {
    let (wifi, handle) = connected();

    wifi.send(b"telemetry").unwrap();
    assert_eq!(
        handle.sent(),
        [SentDatagram { host: "198.51.100.7".into(), port: 5683, data: b"telemetry".to_vec() }]
    );

    handle.inject_datagram(b"ack");
    assert!(wait_until(|| wifi.stats().unwrap().link.messages_received == 1));
    let mut buf = [0u8; 32];
    assert_eq!(wifi.receive(&mut buf), Ok(Some(3)));
    assert_eq!(&buf[..3], b"ack");

    let link = wifi.stats().unwrap().link;
    assert_eq!(link.messages_sent, 1);
    assert_eq!(link.bytes_sent, 9);
    assert_eq!(link.bytes_received, 3);
}

#[test]
fn send_failures_are_counted() {
    let (wifi, handle) = wifi();
    assert_eq!(wifi.send(b"early"), Err(TransmitError::NotConnected.into()));
    assert_eq!(wifi.stats().unwrap().link.send_errors, 1);

    wifi.connect(&station(), None).unwrap();
    assert!(wait_until(|| wifi.is_connected()));
    handle.fail_sends(true);
    assert_eq!(wifi.send(b"late"), Err(TransmitError::Driver(-1).into()));
    assert_eq!(wifi.stats().unwrap().link.send_errors, 2);
    assert_eq!(wifi.stats().unwrap().link.messages_sent, 0);
}

#[test]
fn missing_endpoint_is_a_config_error() {
    let (wifi, _handle) = wifi();
    let cfg = WifiStationConfig { endpoint: None, ..station() };
    wifi.connect(&cfg, None).unwrap();
    assert!(wait_until(|| wifi.is_connected()));
    assert_eq!(wifi.send(b"x"), Err(Error::Config(ConfigParam::Endpoint)));
}

#[test]
fn lost_link_retries_until_the_ceiling_then_fails() {
    let (wifi, handle) = connected();
    handle.set_reachable(false);
    assert!(handle.drop_link());

    assert!(wait_until(|| wifi.status() == WifiStatus::Failed));
    let stats = wifi.stats().unwrap();
    assert_eq!(stats.disconnections, 1);
    assert_eq!(stats.reconnections, 3);
    assert_eq!(handle.reconnect_calls(), 3);
    assert!(!wifi.is_available());
}

#[test]
fn fresh_connect_after_failure_rearms_the_retry_ceiling() {
    let (wifi, handle) = connected();
    handle.set_reachable(false);
    assert!(handle.drop_link());
    assert!(wait_until(|| wifi.status() == WifiStatus::Failed));
    assert_eq!(wifi.stats().unwrap().reconnections, 3);

    handle.set_reachable(true);
    wifi.connect(&station(), None).unwrap();
    assert!(wait_until(|| wifi.is_connected()));

    handle.set_reachable(false);
    assert!(handle.drop_link());
    assert!(wait_until(|| wifi.status() == WifiStatus::Failed && wifi.stats().unwrap().reconnections == 6));
    assert_eq!(handle.reconnect_calls(), 6);
    assert_eq!(wifi.stats().unwrap().disconnections, 2);
}

#[test]
fn lost_link_recovers_when_the_network_returns() {
    let (wifi, handle) = connected();
    assert!(handle.drop_link());
    assert!(wait_until(|| wifi.stats().unwrap().reconnections == 1));
    assert!(wait_until(|| wifi.is_connected()));
    assert_eq!(wifi.stats().unwrap().successful_connections, 2);
}

#[test]
fn access_point_counts_clients_and_shuts_down() {
    let (wifi, handle) = wifi();
    let ap = WifiApConfig { channel: 6, ..WifiApConfig::new("commlink-setup", "provision1").unwrap() };
    wifi.start_ap(&ap).unwrap();
    assert!(wifi.is_ap_active());
    assert_eq!(handle.mode(), WifiMode::AccessPoint);

    handle.join_ap_client();
    handle.join_ap_client();
    assert_eq!(wifi.ap_client_count(), 2);

    wifi.stop_ap().unwrap();
    assert!(!wifi.is_ap_active());
    assert_eq!(wifi.ap_client_count(), 0);
    assert_eq!(handle.mode(), WifiMode::Off);
}

#[test]
fn synchronous_scan_lists_networks_in_range() {
    let (wifi, handle) = wifi();
    handle.add_network("guest", "", -80, 1);
    let names = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&names);
    wifi.scan_networks(
        Box::new(move |nets| out.lock().unwrap().extend(nets.iter().map(|n| n.ssid.to_string()))),
        false,
    )
    .unwrap();
    assert_eq!(*names.lock().unwrap(), ["fieldnet", "guest"]);
}

#[test]
fn background_scan_refuses_a_second_request_until_it_reports() {
    let (wifi, handle) = wifi();
    handle.hold_scans(true);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&calls);
    wifi.scan_networks(Box::new(move |nets| first.lock().unwrap().push(("first", nets.len()))), true)
        .unwrap();

    let second = Arc::clone(&calls);
    assert_eq!(
        wifi.scan_networks(Box::new(move |nets| second.lock().unwrap().push(("second", nets.len()))), true),
        Err(Error::Connection(ConnectionError::ScanInProgress))
    );
    assert_eq!(
        wifi.scan_networks(Box::new(|_| {}), false),
        Err(Error::Connection(ConnectionError::ScanInProgress))
    );
    assert_eq!(wifi.stats().unwrap().scan_count, 1);

    handle.finish_scan();
    assert!(wait_until(|| !calls.lock().unwrap().is_empty()));
    assert_eq!(*calls.lock().unwrap(), [("first", 1)]);

    handle.hold_scans(false);
    wifi.scan_networks(Box::new(|_| {}), false).unwrap();
}

#[test]
fn radio_tuning_and_stat_reset() {
    let (wifi, handle) = connected();
    wifi.set_power_save(true).unwrap();
    assert!(handle.power_save());
    wifi.set_tx_power(2).unwrap();
    assert_eq!(handle.tx_power(), Some(2));
    assert_eq!(wifi.set_tx_power(1), Err(ConfigParam::OutputPower.into()));

    wifi.send(b"x").unwrap();
    wifi.reset_stats().unwrap();
    assert_eq!(wifi.stats().unwrap(), WifiStats::default());
}

#[test]
fn deinitialize_tears_down_the_link() {
    let (wifi, handle) = connected();
    wifi.deinitialize();
    assert!(!wifi.is_initialized());
    assert_eq!(wifi.status(), WifiStatus::Disconnected);
    assert_eq!(handle.mode(), WifiMode::Off);
    assert_eq!(handle.bound_port(), None);
}
