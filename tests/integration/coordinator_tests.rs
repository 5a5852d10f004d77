//! Coordinator over all three simulated transports.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use commlink::TransportCoordinator;
use commlink::cellular::sim::{SimModem, SimModemHandle};
use commlink::config::{CellularConfig, CommsConfig, ModemTiming};
use commlink::error::{ConfigParam, Error};
use commlink::radio::sim::{SimRadio, SimRadioHandle};
use commlink::transport::TransportKind;
use commlink::wifi::sim::{SimWifi, SimWifiHandle};

use crate::support::{cellular_config, comms_config, fast_timing, wait_until};

type Sim = TransportCoordinator<SimRadio, SimWifi, SimModem>;

struct Rig {
    comms: Sim,
    radio: SimRadioHandle,
    wifi: SimWifiHandle,
    modem: SimModemHandle,
}

fn rig(config: CommsConfig) -> Rig {
    let (radio_drv, radio) = SimRadio::new();
    let (wifi_drv, wifi) = SimWifi::new();
    wifi.add_network("fieldnet", "hunter2hunter2", -58, 1);
    let (modem_drv, modem) = SimModem::new();
    let comms = TransportCoordinator::new(config, radio_drv, wifi_drv, modem_drv);
    comms.initialize().unwrap();
    Rig { comms, radio, wifi, modem }
}

/// Every transport up and the reassessment settled on WiFi.
fn all_up() -> Rig {
    let r = rig(comms_config());
    assert!(wait_until(|| r.comms.is_interface_available(TransportKind::Wifi)));
    assert!(wait_until(|| r.comms.is_interface_available(TransportKind::Cellular)));
    assert!(wait_until(|| r.comms.get_active_interface() == TransportKind::Wifi));
    r
}

#[test]
fn best_interface_follows_priority() {
    let r = all_up();
    assert!(r.comms.is_interface_available(TransportKind::Radio));
    assert_eq!(r.comms.select_best_interface(), TransportKind::Wifi);
    assert_eq!(r.modem.power_key_pulses(), 1);
}

#[test]
fn auto_send_with_nothing_up_fails_quietly() {
    let config = CommsConfig {
        enable_radio: false,
        cellular: cellular_config(),
        ..CommsConfig::default()
    };
    let r = rig(config);
    assert_eq!(r.comms.get_active_interface(), TransportKind::None);
    assert!(!r.comms.send_message(b"hello", TransportKind::Auto));

    let stats = r.comms.get_statistics().unwrap();
    assert_eq!(stats.total_sent(), 0);
    assert_eq!(stats.wifi.link.send_errors, 0);
    assert_eq!(stats.cellular.link.send_errors, 0);
    assert_eq!(stats.failovers, 0);
}

#[test]
fn auto_send_touches_only_the_active_transport() {
    let r = all_up();
    let before = r.comms.get_statistics().unwrap();

    assert!(r.comms.send_message(b"status", TransportKind::Auto));
    let after = r.comms.get_statistics().unwrap();
    assert_eq!(after.wifi.link.messages_sent, before.wifi.link.messages_sent + 1);
    assert_eq!(after.cellular.link.messages_sent, before.cellular.link.messages_sent);
    assert_eq!(after.radio.link.messages_sent, before.radio.link.messages_sent);
    assert_eq!(r.wifi.sent().len(), 1);
    assert!(r.radio.transmitted().is_empty());
    assert!(r.modem.sent_data().is_empty());
}

#[test]
fn explicit_target_bypasses_selection() {
    let r = all_up();
    assert!(r.comms.send_message(b"lora", TransportKind::Radio));
    assert!(wait_until(|| r.comms.get_statistics().unwrap().radio.link.messages_sent == 1));
    assert_eq!(r.radio.transmitted(), [b"lora".to_vec()]);
    assert!(r.wifi.sent().is_empty());
}

#[test]
fn failed_wifi_send_fails_over_to_cellular() {
    let r = all_up();
    r.wifi.fail_sends(true);

    assert!(r.comms.send_message(b"alarm", TransportKind::Auto));
    assert_eq!(r.modem.sent_data(), [b"alarm".to_vec()]);
    assert!(r.radio.transmitted().is_empty());

    let stats = r.comms.get_statistics().unwrap();
    assert_eq!(stats.failovers, 1);
    assert_eq!(stats.wifi.link.send_errors, 1);
    assert_eq!(stats.cellular.link.messages_sent, 1);
}

#[test]
fn failover_falls_through_to_radio_last() {
    let r = all_up();
    r.wifi.fail_sends(true);
    r.modem.reject("AT+CIPSEND");

    assert!(r.comms.send_message(b"last resort", TransportKind::Auto));
    assert!(wait_until(|| r.radio.transmitted().len() == 1));
    assert_eq!(r.comms.get_statistics().unwrap().failovers, 1);
}

#[test]
fn failover_can_be_switched_off() {
    let r = all_up();
    r.comms.set_auto_failover(false).unwrap();
    assert!(!r.comms.auto_failover());
    r.wifi.fail_sends(true);

    assert!(!r.comms.send_message(b"alarm", TransportKind::Auto));
    assert!(r.modem.sent_data().is_empty());
    assert_eq!(r.comms.get_statistics().unwrap().failovers, 0);
}

#[test]
fn preferred_interface_wins_while_available() {
    let r = all_up();
    r.comms.set_preferred_interface(TransportKind::Cellular).unwrap();
    assert_eq!(r.comms.preferred_interface(), TransportKind::Cellular);
    assert_eq!(r.comms.get_active_interface(), TransportKind::Cellular);

    assert!(r.comms.send_message(b"via lte", TransportKind::Auto));
    assert_eq!(r.modem.sent_data(), [b"via lte".to_vec()]);

    assert_eq!(
        r.comms.set_preferred_interface(TransportKind::Auto),
        Err(Error::Config(ConfigParam::Priority))
    );
    assert_eq!(r.comms.preferred_interface(), TransportKind::Cellular);
}

#[test]
fn lost_wifi_moves_selection_to_cellular() {
    let r = all_up();
    r.wifi.set_reachable(false);
    assert!(r.wifi.drop_link());
    assert!(wait_until(|| r.comms.get_active_interface() == TransportKind::Cellular));
    assert!(r.comms.get_statistics().unwrap().interface_switches >= 2);
}

#[test]
fn slow_send_does_not_stall_selection_or_polling() {
    let mut config = comms_config();
    config.cellular.timing = ModemTiming { command_timeout_ms: 800, ..fast_timing() };
    let r = rig(config);
    assert!(wait_until(|| r.comms.is_interface_available(TransportKind::Wifi)));
    assert!(wait_until(|| r.comms.is_interface_available(TransportKind::Cellular)));

    r.wifi.inject_datagram(b"meanwhile");
    assert!(wait_until(|| r.comms.wifi().stats().unwrap().link.messages_received == 1));
    r.modem.set_silent(true);

    let comms = Arc::new(r.comms);
    let sender = {
        let comms = Arc::clone(&comms);
        thread::spawn(move || comms.send_message(b"x", TransportKind::Cellular))
    };
    thread::sleep(Duration::from_millis(30));

    assert!(comms.is_interface_available(TransportKind::Wifi));
    let mut buf = [0u8; 32];
    assert_eq!(comms.receive_message(&mut buf), Some((9, TransportKind::Wifi)));
    assert!(!sender.is_finished());
    assert!(!sender.join().unwrap());
}

#[test]
fn inbound_messages_carry_their_transport() {
    let r = all_up();
    let mut buf = [0u8; 128];

    r.wifi.inject_datagram(b"from-lan");
    assert!(wait_until(|| r.comms.wifi().stats().unwrap().link.messages_received == 1));
    assert_eq!(r.comms.receive_message(&mut buf), Some((8, TransportKind::Wifi)));
    assert_eq!(&buf[..8], b"from-lan");

    assert!(r.radio.deliver(b"from-field", -101.0, -3.5));
    assert!(wait_until(|| r.comms.radio().stats().unwrap().link.messages_received == 1));
    assert_eq!(r.comms.receive_message(&mut buf), Some((10, TransportKind::Radio)));
    assert_eq!(&buf[..10], b"from-field");

    assert_eq!(r.comms.receive_message(&mut buf), None);
}

#[test]
fn statistics_reset_to_zero() {
    let r = all_up();
    assert!(r.comms.send_message(b"one", TransportKind::Auto));
    assert!(r.comms.send_message(b"two", TransportKind::Radio));
    assert!(wait_until(|| r.comms.get_statistics().unwrap().radio.link.messages_sent == 1));

    r.comms.reset_statistics().unwrap();
    let stats = r.comms.get_statistics().unwrap();
    assert!(stats.is_zero(), "{stats:?}");
}

#[test]
fn status_json_reflects_selection() {
    let r = all_up();
    let json = r.comms.status_json().unwrap();
    assert!(json.contains("\"active\":\"Wifi\""));
    assert!(json.contains("\"cellular_available\":true"));

    let report = r.comms.status_report().unwrap();
    assert!(report.wifi_available);
    assert!(report.auto_failover);
}

#[test]
fn deinitialize_stops_everything() {
    let r = all_up();
    r.comms.deinitialize();
    assert!(!r.comms.is_initialized());
    assert_eq!(r.comms.get_active_interface(), TransportKind::None);
    assert!(!r.comms.send_message(b"late", TransportKind::Wifi));
    assert!(!r.comms.cellular().is_powered());
    assert_eq!(r.comms.config().cellular, CellularConfig { auto_connect: true, ..cellular_config() });
}
