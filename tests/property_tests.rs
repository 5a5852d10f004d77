//! Property tests for configuration validation, AT parsing and the
//! inbound queue.
//!
//! Runs on host (x86_64) only; proptest is not available for ESP32 targets.

#![cfg(not(target_os = "espidf"))]

use commlink::cellular::at::{Notice, UrcParser, csq_to_dbm, split_fields};
use commlink::config::RadioConfig;
use commlink::error::{ConfigParam, Error};
use commlink::radio::RadioTransport;
use commlink::radio::sim::SimRadio;
use commlink::transport::InboundQueue;
use proptest::prelude::*;

fn bad_spreading_factor() -> impl Strategy<Value = u8> {
    prop_oneof![0u8..5, 13u8..=255]
}

// ── Radio parameter validation ────────────────────────────────

proptest! {
    #[test]
    fn out_of_range_spreading_factor_is_rejected(sf in bad_spreading_factor()) {
        let cfg = RadioConfig { spreading_factor: sf, ..RadioConfig::default() };
        prop_assert_eq!(cfg.validate(), Err(ConfigParam::SpreadingFactor));
    }

    #[test]
    fn supported_spreading_factor_and_coding_rate_pass(sf in 5u8..=12, cr in 5u8..=8) {
        let cfg = RadioConfig { spreading_factor: sf, coding_rate: cr, ..RadioConfig::default() };
        prop_assert!(cfg.validate().is_ok());
    }

    #[test]
    fn frequency_outside_band_is_rejected(mhz in prop_oneof![0.0f32..149.9, 960.1f32..3000.0]) {
        let cfg = RadioConfig { frequency_mhz: mhz, ..RadioConfig::default() };
        prop_assert_eq!(cfg.validate(), Err(ConfigParam::Frequency));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// A rejected reconfiguration leaves both the stored config and the
    /// chip untouched.
    #[test]
    fn rejected_reconfiguration_changes_nothing(sf in bad_spreading_factor(), mhz in 400.0f32..930.0) {
        let (driver, handle) = SimRadio::new();
        let radio = RadioTransport::new(driver, RadioConfig::default());
        radio.initialize().unwrap();
        let before = radio.config();
        let chip_before = handle.params();

        let bad = RadioConfig { spreading_factor: sf, frequency_mhz: mhz, ..before };
        prop_assert_eq!(radio.configure_radio(&bad), Err(Error::Config(ConfigParam::SpreadingFactor)));
        prop_assert_eq!(radio.config(), before);
        prop_assert_eq!(handle.params(), chip_before);
    }
}

// ── AT parsing ────────────────────────────────────────────────

proptest! {
    #[test]
    fn csq_maps_onto_the_documented_dbm_range(raw in 0u8..=31) {
        let dbm = csq_to_dbm(raw).unwrap();
        prop_assert!((-113..=-51).contains(&dbm));
        prop_assert_eq!(dbm, -113 + 2 * i16::from(raw));
    }

    #[test]
    fn csq_outside_scale_is_unknown(raw in 32u8..=255) {
        prop_assert_eq!(csq_to_dbm(raw), None);
    }

    #[test]
    fn unquoted_fields_split_on_every_comma(fields in proptest::collection::vec("[A-Za-z0-9+ ]{0,8}", 1..12)) {
        let line = fields.join(",");
        let split = split_fields(&line);
        prop_assert_eq!(split.len(), fields.len());
        for (got, want) in split.iter().zip(&fields) {
            prop_assert_eq!(*got, want.trim());
        }
    }

    #[test]
    fn urc_parser_survives_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let mut parser = UrcParser::new();
        parser.feed(&bytes);
        let mut drained = 0;
        while parser.pop().is_some() {
            drained += 1;
        }
        prop_assert!(drained <= 8);
    }

    /// A datagram decodes the same however the UART chunks it.
    #[test]
    fn datagram_survives_any_chunking(
        payload in proptest::collection::vec(any::<u8>(), 1..256),
        split in 1usize..64,
    ) {
        let mut wire = format!("\r\n+RECEIVE,0,{}\r\n", payload.len()).into_bytes();
        wire.extend_from_slice(&payload);

        let mut parser = UrcParser::new();
        for chunk in wire.chunks(split) {
            parser.feed(chunk);
        }
        match parser.pop() {
            Some(Notice::Datagram(data)) => prop_assert_eq!(data.as_slice(), payload.as_slice()),
            other => prop_assert!(false, "expected datagram, got {:?}", other),
        }
        prop_assert!(parser.is_idle());
    }
}

// ── Inbound queue ─────────────────────────────────────────────

proptest! {
    /// The queue never exceeds its depth and keeps the newest messages in
    /// arrival order.
    #[test]
    fn inbound_queue_keeps_newest_in_order(
        messages in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..32), 0..20),
    ) {
        let mut q: InboundQueue<32, 4> = InboundQueue::new();
        for m in &messages {
            q.push(m);
            prop_assert!(q.len() <= 4);
        }
        let expected_evictions = messages.len().saturating_sub(4);
        prop_assert_eq!(q.evicted() as usize, expected_evictions);

        let mut buf = [0u8; 32];
        for m in &messages[expected_evictions..] {
            let len = q.pop_into(&mut buf).unwrap();
            prop_assert_eq!(len, Some(m.len()));
            prop_assert_eq!(&buf[..m.len()], m.as_slice());
        }
        prop_assert!(q.is_empty());
    }

    #[test]
    fn oversized_messages_are_truncated_to_mtu(len in 17usize..200) {
        let mut q: InboundQueue<16, 2> = InboundQueue::new();
        q.push(&vec![0xAB; len]);
        let mut buf = [0u8; 64];
        prop_assert_eq!(q.pop_into(&mut buf).unwrap(), Some(16));
    }
}
