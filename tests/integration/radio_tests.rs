//! LoRa transport against the simulated SX1262.

use std::sync::{Arc, Mutex};

use commlink::Transport;
use commlink::config::RadioConfig;
use commlink::error::{ConfigParam, Error, TransmitError};
use commlink::radio::sim::{SimRadio, SimRadioHandle};
use commlink::radio::{RadioMode, RadioTransport, RxPacket};
use commlink::stats::RadioStats;

use crate::support::wait_until;

fn radio(config: RadioConfig) -> (RadioTransport<SimRadio>, SimRadioHandle) {
    let (driver, handle) = SimRadio::new();
    let radio = RadioTransport::new(driver, config);
    radio.initialize().unwrap();
    (radio, handle)
}

#[test]
fn us915_sf10_transmit_counts_once_after_interrupt() {
    let config = RadioConfig {
        frequency_mhz: 915.0,
        bandwidth_khz: 125.0,
        spreading_factor: 10,
        coding_rate: 6,
        ..RadioConfig::default()
    };
    let (radio, handle) = radio(config);

    let params = handle.params();
    assert_eq!(params.frequency_mhz, 915.0);
    assert_eq!(params.spreading_factor, 10);
    assert_eq!(params.coding_rate, 6);

    let outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    radio
        .transmit(&[0x5A; 16], Some(Box::new(move |r| *slot.lock().unwrap() = Some(r))))
        .unwrap();

    assert!(wait_until(|| radio.stats().unwrap().link.messages_sent == 1));
    assert_eq!(*outcome.lock().unwrap(), Some(Ok(())));
    let stats = radio.stats().unwrap();
    assert_eq!(stats.link.bytes_sent, 16);
    assert_eq!(stats.link.send_errors, 0);
    assert_eq!(handle.transmitted(), [vec![0x5A; 16]]);
}

#[test]
fn invalid_spreading_factor_keeps_previous_configuration() {
    let (radio, handle) = radio(RadioConfig::default());
    let before = radio.config();

    let bad = RadioConfig { spreading_factor: 13, ..before };
    assert_eq!(radio.configure_radio(&bad), Err(Error::Config(ConfigParam::SpreadingFactor)));
    assert_eq!(radio.config(), before);
    assert_eq!(handle.params().spreading_factor, before.spreading_factor);
}

#[test]
fn second_transmit_while_busy_is_refused() {
    let (radio, handle) = radio(RadioConfig::default());
    handle.set_auto_complete(false);

    radio.transmit(b"first", None).unwrap();
    assert!(radio.is_transmitting());
    assert_eq!(radio.transmit(b"second", None), Err(TransmitError::Busy.into()));

    assert!(handle.complete_transmit());
    assert!(wait_until(|| radio.mode() == Some(RadioMode::Idle)));
    assert_eq!(radio.stats().unwrap().link.messages_sent, 1);
}

#[test]
fn listening_radio_queues_packets_and_signal_readings() {
    let (radio, handle) = radio(RadioConfig::default());
    let seen: Arc<Mutex<Vec<RxPacket>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    radio
        .start_receive(Some(Box::new(move |p| sink.lock().unwrap().push(p.clone()))))
        .unwrap();

    assert!(handle.deliver(b"ping", -92.5, 7.25));
    assert!(wait_until(|| seen.lock().unwrap().len() == 1));

    let packet = seen.lock().unwrap()[0].clone();
    assert_eq!(packet.data.as_slice(), b"ping");
    assert_eq!(packet.rssi, -92.5);

    let mut buf = [0u8; 64];
    assert_eq!(radio.receive(&mut buf), Ok(Some(4)));
    assert_eq!(&buf[..4], b"ping");
    assert_eq!(radio.receive(&mut buf), Ok(None));

    let stats = radio.stats().unwrap();
    assert_eq!(stats.link.messages_received, 1);
    assert_eq!(stats.last_snr, 7.25);
    assert_eq!(radio.mode(), Some(RadioMode::Receive));
}

#[test]
fn transmit_resumes_listening_afterwards() {
    let (radio, handle) = radio(RadioConfig::default());
    radio.start_receive(None).unwrap();
    radio.transmit(b"beacon", None).unwrap();
    assert!(wait_until(|| radio.stats().unwrap().link.messages_sent == 1));
    assert!(wait_until(|| handle.mode() == RadioMode::Receive));
    assert!(handle.deliver(b"reply", -80.0, 9.0));
    assert!(wait_until(|| radio.stats().unwrap().link.messages_received == 1));
}

#[test]
fn sleep_and_wake_gate_transmission() {
    let (radio, handle) = radio(RadioConfig::default());
    radio.sleep().unwrap();
    assert_eq!(handle.mode(), RadioMode::Sleep);
    assert_eq!(radio.transmit(b"x", None), Err(TransmitError::Asleep.into()));

    radio.wakeup().unwrap();
    assert_eq!(radio.mode(), Some(RadioMode::Idle));
    radio.transmit(b"x", None).unwrap();
    assert!(wait_until(|| radio.stats().unwrap().link.messages_sent == 1));
}

#[test]
fn single_parameter_updates_keep_the_rest() {
    let (radio, handle) = radio(RadioConfig::default());
    radio.set_frequency(868.1).unwrap();
    radio.set_output_power(14).unwrap();

    let cfg = radio.config();
    assert_eq!(cfg.frequency_mhz, 868.1);
    assert_eq!(cfg.output_power_dbm, 14);
    assert_eq!(cfg.spreading_factor, RadioConfig::default().spreading_factor);
    assert_eq!(handle.params().output_power_dbm, 14);

    assert_eq!(radio.set_output_power(30), Err(Error::Config(ConfigParam::OutputPower)));
    assert_eq!(radio.config().output_power_dbm, 14);
}

#[test]
fn reset_clears_every_counter() {
    let (radio, handle) = radio(RadioConfig::default());
    radio.start_receive(None).unwrap();
    assert!(handle.deliver_corrupt());
    assert!(wait_until(|| radio.stats().unwrap().crc_errors == 1));
    radio.transmit(b"data", None).unwrap();
    assert!(wait_until(|| radio.stats().unwrap().link.messages_sent == 1));

    radio.reset_stats().unwrap();
    assert_eq!(radio.stats().unwrap(), RadioStats::default());
}

#[test]
fn deinitialize_puts_chip_to_sleep() {
    let (radio, handle) = radio(RadioConfig::default());
    assert!(radio.uptime() <= std::time::Duration::from_secs(5));
    radio.deinitialize();
    assert!(!radio.is_initialized());
    assert!(!radio.is_available());
    assert_eq!(handle.mode(), RadioMode::Sleep);
    assert_eq!(radio.transmit(b"x", None), Err(Error::NotInitialized));
}
