// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-packet bookkeeping kept by a [`PacketSpace`](crate::space::PacketSpace)
//! from the time a packet is sent until it is acknowledged, declared lost, or
//! expired by a space discard.

use crate::time::Timestamp;
use alloc::boxed::Box;

/// The QUIC packet-number space a packet belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PacketType {
    Initial,
    Handshake,
    ZeroRtt,
    OneRtt,
}

impl PacketType {
    /// The crypto-packet status a packet of this type carries by default.
    ///
    /// This is only a default: a [`SentPacket`] carries its own
    /// `is_crypto_packet` flag rather than re-deriving it from `packet_type`
    /// at use, so a caller that coalesces packet types and crypto status
    /// differently (e.g. 0-RTT data riding in the same datagram as an
    /// Initial crypto frame) can set it independently.
    #[inline]
    #[must_use]
    pub fn is_crypto_packet(self) -> bool {
        matches!(self, PacketType::Initial | PacketType::Handshake)
    }
}

/// The outcome a packet's delivery handlers are invoked with, exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    Acked,
    Lost,
}

/// A callback invoked when a packet's fate (acked or lost) is determined.
///
/// Expired packets (removed via [`PacketSpace::discard`](crate::space::PacketSpace::discard))
/// do not invoke delivery handlers.
pub trait DeliveryHandler: Send {
    fn on_delivery(&mut self, outcome: DeliveryOutcome);
}

impl<F: FnMut(DeliveryOutcome) + Send> DeliveryHandler for F {
    #[inline]
    fn on_delivery(&mut self, outcome: DeliveryOutcome) {
        (self)(outcome)
    }
}

/// A packet that has been sent and is awaiting an ACK or loss determination.
#[non_exhaustive]
pub struct SentPacket {
    pub packet_number: u64,
    pub packet_type: PacketType,
    pub sent_time: Timestamp,
    pub sent_bytes: u32,
    pub in_flight: bool,
    pub is_ack_eliciting: bool,
    /// Whether this packet carries a CRYPTO frame and must be retransmitted
    /// (not just counted lost) on a PTO.
    ///
    /// Tracked independently of `packet_type` rather than derived from it at
    /// each use site, since a packet's type and its crypto-bearing status
    /// can diverge (e.g. 0-RTT data coalesced into the same datagram as an
    /// Initial CRYPTO frame).
    pub is_crypto_packet: bool,
    delivery_handlers: alloc::vec::Vec<Box<dyn DeliveryHandler>>,
    fired: bool,
}

impl core::fmt::Debug for SentPacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SentPacket")
            .field("packet_number", &self.packet_number)
            .field("packet_type", &self.packet_type)
            .field("sent_time", &self.sent_time)
            .field("sent_bytes", &self.sent_bytes)
            .field("in_flight", &self.in_flight)
            .field("is_ack_eliciting", &self.is_ack_eliciting)
            .field("is_crypto_packet", &self.is_crypto_packet)
            .field("fired", &self.fired)
            .finish()
    }
}

impl SentPacket {
    #[inline]
    pub fn new(
        packet_number: u64,
        packet_type: PacketType,
        sent_time: Timestamp,
        sent_bytes: u32,
        in_flight: bool,
        is_ack_eliciting: bool,
        is_crypto_packet: bool,
    ) -> Self {
        debug_assert!(
            sent_bytes > 0 || !in_flight,
            "an in-flight packet must have a nonzero size"
        );

        Self {
            packet_number,
            packet_type,
            sent_time,
            sent_bytes,
            in_flight,
            is_ack_eliciting,
            is_crypto_packet,
            delivery_handlers: alloc::vec::Vec::new(),
            fired: false,
        }
    }

    /// Registers a handler to be invoked exactly once, when this packet's
    /// fate is determined.
    #[inline]
    pub fn on_delivery(&mut self, handler: impl DeliveryHandler + 'static) {
        self.delivery_handlers.push(Box::new(handler));
    }

    /// Fires every registered delivery handler with `outcome`. Idempotent:
    /// calling this more than once on the same packet has no additional
    /// effect, matching the invariant that a packet's fate is observed once.
    #[inline]
    pub fn fire_delivery_handlers(&mut self, outcome: DeliveryOutcome) {
        if self.fired {
            return;
        }
        self.fired = true;
        for handler in &mut self.delivery_handlers {
            handler.on_delivery(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{sync::Arc, vec::Vec};
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn ts(micros: u64) -> Timestamp {
        unsafe { Timestamp::from_duration(core::time::Duration::from_micros(micros)) }
    }

    #[test]
    fn fires_handlers_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let outcomes: Arc<core::cell::RefCell<Vec<DeliveryOutcome>>> =
            Arc::new(core::cell::RefCell::new(Vec::new()));

        let mut pkt = SentPacket::new(1, PacketType::OneRtt, ts(1), 1280, true, true, false);

        let count2 = count.clone();
        let outcomes2 = outcomes.clone();
        pkt.on_delivery(move |outcome| {
            count2.fetch_add(1, Ordering::SeqCst);
            outcomes2.borrow_mut().push(outcome);
        });

        pkt.fire_delivery_handlers(DeliveryOutcome::Acked);
        pkt.fire_delivery_handlers(DeliveryOutcome::Lost);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.borrow().as_slice(), [DeliveryOutcome::Acked]);
    }

    #[test]
    fn crypto_packet_types() {
        assert!(PacketType::Initial.is_crypto_packet());
        assert!(PacketType::Handshake.is_crypto_packet());
        assert!(!PacketType::ZeroRtt.is_crypto_packet());
        assert!(!PacketType::OneRtt.is_crypto_packet());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn sent_packet_debug_snapshot() {
        let pkt = SentPacket::new(42, PacketType::OneRtt, ts(100), 1280, true, true, false);
        insta::assert_debug_snapshot!(format!("{pkt:?}"));
    }
}
