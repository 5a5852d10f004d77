//! Transport abstraction: one physical path for opaque payloads.
//!
//! Concrete implementations:
//! - [`RadioTransport`](crate::radio::RadioTransport): SX1262 LoRa frames
//! - [`WifiTransport`](crate::wifi::WifiTransport): UDP datagrams over WiFi
//! - [`CellularTransport`](crate::cellular::CellularTransport): modem UDP socket
//!
//! The coordinator is written against `Transport`, so selection and
//! failover treat all three paths uniformly.

use core::fmt;

use heapless::{Deque, Vec};
use serde::{Deserialize, Serialize};

use crate::error::{ReceiveError, Result};
use crate::stats::LinkCounters;

// ───────────────────────────────────────────────────────────────
// Transport identity
// ───────────────────────────────────────────────────────────────

/// Identifies a transport, or a selection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Radio,
    Wifi,
    Cellular,
    /// No transport (nothing available / nothing selected).
    None,
    /// Use whichever transport the coordinator currently has active.
    Auto,
}

impl TransportKind {
    /// The three physical transports.
    pub const PHYSICAL: [Self; 3] = [Self::Radio, Self::Wifi, Self::Cellular];

    pub const fn is_physical(self) -> bool {
        matches!(self, Self::Radio | Self::Wifi | Self::Cellular)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Radio => "radio",
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::None => "none",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selection, failover and receive-poll order.
pub const DEFAULT_PRIORITY: [TransportKind; 3] =
    [TransportKind::Wifi, TransportKind::Cellular, TransportKind::Radio];

// ───────────────────────────────────────────────────────────────
// Transport trait
// ───────────────────────────────────────────────────────────────

/// A message-oriented transport.
///
/// All methods take `&self`: each implementation serialises access to its
/// hardware internally, so the coordinator can share one instance between
/// callers and its own reassessment worker.
pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Liveness as the transport defines it (radio: initialised; WiFi and
    /// cellular: connected).
    fn is_available(&self) -> bool;

    /// Send one opaque payload.  Outcome is recorded in the transport's stats.
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Pop the oldest pending inbound message into `buf`.
    ///
    /// Returns `Ok(None)` when nothing is pending.  A message larger than
    /// `buf` is consumed and reported as [`ReceiveError::Truncated`].
    fn receive(&self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Snapshot of the common counters.
    fn counters(&self) -> Result<LinkCounters>;

    /// Largest payload `send` accepts.
    fn max_payload(&self) -> usize;
}

// ───────────────────────────────────────────────────────────────
// Inbound queue
// ───────────────────────────────────────────────────────────────

/// Bounded FIFO of inbound messages, `N` entries of up to `MTU` bytes.
///
/// When full, the oldest message is evicted so the newest traffic wins.
pub struct InboundQueue<const MTU: usize, const N: usize> {
    messages: Deque<Vec<u8, MTU>, N>,
    evicted: u32,
}

impl<const MTU: usize, const N: usize> InboundQueue<MTU, N> {
    pub const fn new() -> Self {
        Self {
            messages: Deque::new(),
            evicted: 0,
        }
    }

    /// Queue `data`, truncating to `MTU`.  Returns `true` if an older
    /// message had to be evicted.
    pub fn push(&mut self, data: &[u8]) -> bool {
        let mut msg = Vec::new();
        let take = data.len().min(MTU);
        // Cannot fail: `take <= MTU`.
        let _ = msg.extend_from_slice(&data[..take]);

        let mut evicted = false;
        if self.messages.is_full() {
            self.messages.pop_front();
            self.evicted = self.evicted.wrapping_add(1);
            evicted = true;
        }
        let _ = self.messages.push_back(msg);
        evicted
    }

    /// Pop the oldest message into `buf`.
    pub fn pop_into(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let Some(msg) = self.messages.pop_front() else {
            return Ok(None);
        };
        if msg.len() > buf.len() {
            return Err(ReceiveError::Truncated {
                len: msg.len(),
                capacity: buf.len(),
            }
            .into());
        }
        buf[..msg.len()].copy_from_slice(&msg);
        Ok(Some(msg.len()))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages dropped because the queue was full.
    pub fn evicted(&self) -> u32 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl<const MTU: usize, const N: usize> Default for InboundQueue<MTU, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn default_priority_covers_every_physical_transport_once() {
        for kind in TransportKind::PHYSICAL {
            assert_eq!(DEFAULT_PRIORITY.iter().filter(|k| **k == kind).count(), 1);
        }
    }

    #[test]
    fn inbound_queue_is_fifo() {
        let mut q: InboundQueue<8, 4> = InboundQueue::new();
        q.push(b"one");
        q.push(b"two");
        let mut buf = [0u8; 8];
        assert_eq!(q.pop_into(&mut buf).unwrap(), Some(3));
        assert_eq!(&buf[..3], b"one");
        assert_eq!(q.pop_into(&mut buf).unwrap(), Some(3));
        assert_eq!(&buf[..3], b"two");
        assert_eq!(q.pop_into(&mut buf).unwrap(), None);
    }

    #[test]
    fn inbound_queue_evicts_oldest_when_full() {
        let mut q: InboundQueue<4, 2> = InboundQueue::new();
        assert!(!q.push(&[1]));
        assert!(!q.push(&[2]));
        assert!(q.push(&[3]));
        assert_eq!(q.evicted(), 1);
        let mut buf = [0u8; 4];
        q.pop_into(&mut buf).unwrap();
        assert_eq!(buf[0], 2);
    }

    #[test]
    fn oversized_message_is_consumed_and_reported() {
        let mut q: InboundQueue<16, 2> = InboundQueue::new();
        q.push(&[0xAA; 10]);
        let mut small = [0u8; 4];
        assert_eq!(
            q.pop_into(&mut small),
            Err(Error::Receive(ReceiveError::Truncated { len: 10, capacity: 4 }))
        );
        assert!(q.is_empty());
    }
}
