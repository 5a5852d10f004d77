//! LTE modem transport against the scripted A7682E.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use commlink::Transport;
use commlink::cellular::at::Registration;
use commlink::cellular::sim::{SimModem, SimModemHandle};
use commlink::cellular::{CallEvent, CellularStatus, CellularTransport};
use commlink::config::{ApnConfig, CellularConfig, ModemTiming};
use commlink::error::{ConfigParam, ConnectionError, TransmitError};

use crate::support::{cellular_config, fast_timing, wait_until};

fn modem_with(config: CellularConfig) -> (CellularTransport<SimModem>, SimModemHandle) {
    let (port, handle) = SimModem::new();
    let modem = CellularTransport::new(port, config);
    modem.initialize().unwrap();
    (modem, handle)
}

fn connected() -> (CellularTransport<SimModem>, SimModemHandle) {
    let (modem, handle) = modem_with(cellular_config());
    modem.power_on().unwrap();
    modem.connect(None).unwrap();
    (modem, handle)
}

fn exact(handle: &SimModemHandle, cmd: &str) -> usize {
    handle.commands().iter().filter(|c| c.as_str() == cmd).count()
}

#[test]
fn silent_modem_times_out_within_budget() {
    let (modem, handle) = modem_with(cellular_config());
    handle.set_silent(true);

    let started = Instant::now();
    let resp = modem.send_command("AT", Duration::from_millis(100)).unwrap();
    let took = started.elapsed();
    assert!(!resp.is_complete());
    assert!(took >= Duration::from_millis(100));
    assert!(took < Duration::from_millis(600), "took {took:?}");
}

#[test]
fn rejected_command_completes_without_ok() {
    let (modem, handle) = modem_with(cellular_config());
    handle.reject("AT+CSQ");
    let resp = modem.send_command("AT+CSQ", Duration::from_millis(200)).unwrap();
    assert!(resp.is_complete());
    assert!(!resp.is_ok());
}

#[test]
fn connect_opens_socket_and_reports_each_stage() {
    let (modem, handle) = modem_with(cellular_config());
    modem.power_on().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    modem.connect(Some(Box::new(move |s| log.lock().unwrap().push(s)))).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        [CellularStatus::Searching, CellularStatus::Registered, CellularStatus::Connected]
    );
    assert!(modem.is_available());
    assert_eq!(exact(&handle, "AT+NETOPEN"), 1);
    assert_eq!(handle.count("AT+CIPOPEN=0,\"UDP\""), 1);
    assert_eq!(modem.stats().unwrap().last_signal_quality, 18);
    assert_eq!(modem.stats().unwrap().last_rssi, -77);
    assert_eq!(modem.registration(), Ok(Registration::Home));
}

#[test]
fn second_connect_leaves_the_session_alone() {
    let (modem, handle) = connected();
    modem.connect(None).unwrap();
    assert_eq!(modem.status(), CellularStatus::Connected);
    assert_eq!(exact(&handle, "AT+CGACT=1,1"), 1);
    assert_eq!(exact(&handle, "AT+NETOPEN"), 1);
    assert_eq!(modem.stats().unwrap().connect_attempts, 1);
}

#[test]
fn config_update_reconnects_under_new_settings() {
    let (modem, handle) = connected();
    let updated = CellularConfig { apn: ApnConfig::new("iot.example").unwrap(), ..cellular_config() };
    modem.update_config(updated.clone()).unwrap();

    assert_eq!(modem.status(), CellularStatus::Connected);
    assert_eq!(modem.config().unwrap(), updated);
    assert_eq!(exact(&handle, "AT+CGACT=0,1"), 1);
    assert_eq!(exact(&handle, "AT+CGDCONT=1,\"IP\",\"iot.example\""), 1);
    let stats = modem.stats().unwrap();
    assert_eq!(stats.disconnections, 1);
    assert_eq!(stats.successful_connections, 2);

    modem.send(b"after update").unwrap();
    assert_eq!(handle.sent_data(), [b"after update".to_vec()]);
}

#[test]
fn config_update_while_idle_only_stores() {
    let (modem, handle) = modem_with(cellular_config());
    modem.power_on().unwrap();
    modem.update_config(CellularConfig { max_retries: 7, ..cellular_config() }).unwrap();
    assert_eq!(modem.config().unwrap().max_retries, 7);
    assert_eq!(handle.count("AT+CGACT"), 0);
    assert_eq!(modem.status(), CellularStatus::Initializing);

    let bad = CellularConfig { apn: ApnConfig::default(), ..cellular_config() };
    assert_eq!(modem.update_config(bad), Err(ConfigParam::Apn.into()));
    assert_eq!(modem.config().unwrap().max_retries, 7);
}

#[test]
fn failed_activation_leaves_error_state() {
    let (modem, handle) = modem_with(cellular_config());
    handle.fail_activation(true);
    modem.power_on().unwrap();
    assert_eq!(modem.connect(None), Err(ConnectionError::ActivationFailed.into()));
    assert_eq!(modem.status(), CellularStatus::Error);
    let stats = modem.stats().unwrap();
    assert_eq!(stats.connect_attempts, 1);
    assert_eq!(stats.successful_connections, 0);
}

#[test]
fn datagrams_use_the_socket_both_ways() {
    let (modem, handle) = connected();

    modem.send(b"reading=42").unwrap();
    assert_eq!(handle.sent_data(), [b"reading=42".to_vec()]);
    assert!(handle
        .commands()
        .iter()
        .any(|c| c == "AT+CIPSEND=0,10,\"198.51.100.7\",5683"));
    assert_eq!(modem.stats().unwrap().link.bytes_sent, 10);

    handle.deliver_datagram(b"cmd:reboot");
    assert!(wait_until(|| modem.stats().unwrap().link.messages_received == 1));
    let mut buf = [0u8; 64];
    assert_eq!(modem.receive(&mut buf), Ok(Some(10)));
    assert_eq!(&buf[..10], b"cmd:reboot");
}

#[test]
fn send_before_connect_is_refused_and_counted() {
    let (modem, handle) = modem_with(cellular_config());
    modem.power_on().unwrap();
    assert_eq!(modem.send(b"x"), Err(TransmitError::NotConnected.into()));
    assert_eq!(modem.stats().unwrap().link.send_errors, 1);
    assert_eq!(handle.count("AT+CIPSEND"), 0);
}

#[test]
fn direct_sms_reaches_the_callback() {
    let (modem, handle) = connected();
    let inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    modem
        .set_sms_callback(Some(Box::new(move |m| {
            sink.lock().unwrap().push((m.sender.to_string(), m.text.to_string()));
        })))
        .unwrap();

    handle.deliver_sms("+447700900123", "gate open");
    assert!(wait_until(|| inbox.lock().unwrap().len() == 1));
    assert_eq!(inbox.lock().unwrap()[0], ("+447700900123".to_owned(), "gate open".to_owned()));
    assert_eq!(modem.stats().unwrap().sms_received, 1);
}

#[test]
fn stored_sms_notice_is_fetched_by_index() {
    let (modem, handle) = connected();
    let texts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&texts);
    modem
        .set_sms_callback(Some(Box::new(move |m| sink.lock().unwrap().push(m.text.to_string()))))
        .unwrap();

    let index = handle.store_sms("+15550100", "battery low", true);
    assert!(wait_until(|| texts.lock().unwrap().len() == 1));
    assert_eq!(texts.lock().unwrap()[0], "battery low");
    assert_eq!(exact(&handle, &format!("AT+CMGR={index}")), 1);
}

#[test]
fn sms_reading_ok_does_not_cut_the_listing_short() {
    let (modem, handle) = modem_with(cellular_config());
    modem.power_on().unwrap();
    handle.store_sms("+15550001", "OK", false);
    handle.store_sms("+15550002", "see you at five", false);

    let list = modem.read_sms(false).unwrap();
    let texts: Vec<&str> = list.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["OK", "see you at five"]);
    assert_eq!(list[1].sender.as_str(), "+15550002");
}

#[test]
fn stored_sms_reading_error_is_fetched_intact() {
    let (modem, handle) = connected();
    let texts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&texts);
    modem
        .set_sms_callback(Some(Box::new(move |m| sink.lock().unwrap().push(m.text.to_string()))))
        .unwrap();

    handle.store_sms("+15550100", "ERROR", true);
    assert!(wait_until(|| texts.lock().unwrap().len() == 1));
    assert_eq!(texts.lock().unwrap()[0], "ERROR");
}

#[test]
fn incoming_call_sequence_is_reported() {
    let (modem, handle) = connected();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    modem
        .set_call_callback(Some(Box::new(move |e| sink.lock().unwrap().push(e.clone()))))
        .unwrap();

    handle.ring("+15550199");
    assert!(wait_until(|| events.lock().unwrap().len() == 2));
    modem.answer_call().unwrap();
    handle.end_call();
    assert!(wait_until(|| events.lock().unwrap().len() == 3));

    let events = events.lock().unwrap();
    assert_eq!(events[0], CallEvent::Ringing);
    assert!(matches!(&events[1], CallEvent::CallerId(n) if n.as_str() == "+15550199"));
    assert_eq!(events[2], CallEvent::Ended);
    assert_eq!(exact(&handle, "ATA"), 1);
}

#[test]
fn lost_registration_drops_the_session() {
    let (modem, handle) = connected();
    handle.drop_registration();
    assert!(wait_until(|| modem.status() == CellularStatus::Disconnected));
    assert_eq!(modem.stats().unwrap().disconnections, 1);
    assert!(!modem.is_available());
    assert_eq!(modem.send(b"x"), Err(TransmitError::NotConnected.into()));
}

#[test]
fn disconnect_releases_socket_and_context() {
    let (modem, handle) = connected();
    modem.disconnect().unwrap();
    assert_eq!(modem.status(), CellularStatus::Disconnected);
    assert_eq!(exact(&handle, "AT+CIPCLOSE=0"), 1);
    assert_eq!(exact(&handle, "AT+CGACT=0,1"), 1);
    assert_eq!(modem.stats().unwrap().disconnections, 1);

    modem.disconnect().unwrap();
    assert_eq!(exact(&handle, "AT+CGACT=0,1"), 1);
    assert_eq!(modem.stats().unwrap().disconnections, 1);
}

#[test]
fn auto_connect_brings_the_link_up_after_initialize() {
    let config = CellularConfig { auto_connect: true, ..cellular_config() };
    let (modem, handle) = modem_with(config);
    assert!(wait_until(|| modem.is_connected()));
    assert!(modem.is_powered());
    assert_eq!(handle.power_key_pulses(), 1);
}

#[test]
fn auto_connect_gives_up_after_retries() {
    let (port, handle) = SimModem::new();
    handle.remove_sim();
    let config = CellularConfig { auto_connect: true, max_retries: 2, ..cellular_config() };
    let modem = CellularTransport::new(port, config);
    modem.initialize().unwrap();
    assert!(wait_until(|| modem.stats().unwrap().connect_attempts == 3));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(modem.stats().unwrap().connect_attempts, 3);
    assert_eq!(modem.status(), CellularStatus::Error);
    assert_eq!(handle.power_key_pulses(), 1);
}

#[test]
fn idle_link_is_kept_alive() {
    let timing = ModemTiming { keepalive_interval_ms: 30, ..fast_timing() };
    let (modem, handle) = modem_with(CellularConfig { timing, ..cellular_config() });
    modem.power_on().unwrap();
    let before = exact(&handle, "AT");
    assert!(wait_until(|| exact(&handle, "AT") >= before + 2));
}

#[test]
fn deinitialize_powers_the_modem_down() {
    let (modem, handle) = connected();
    modem.deinitialize();
    assert!(!modem.is_initialized());
    assert!(!modem.is_powered());
    assert_eq!(modem.status(), CellularStatus::Off);
    assert_eq!(exact(&handle, "AT+CPOF"), 1);
    assert_eq!(modem.power_on(), Err(commlink::Error::NotInitialized));
}
