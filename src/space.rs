// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-packet-number-space bookkeeping.
//!
//! A QUIC connection keeps one [`PacketSpace`] per epoch (Initial, Handshake,
//! Application). Each space tracks its own sent-packet history, its own
//! pending-ACK queue, and its own loss timer.

use crate::{
    packet::SentPacket,
    range_set::RangeSet,
    time::Timestamp,
};
use alloc::collections::BTreeMap;

/// Bookkeeping for a single QUIC packet-number space.
#[derive(Default)]
pub struct PacketSpace {
    /// Packets sent in this space, awaiting ack/loss, keyed by packet number.
    sent_packets: BTreeMap<u64, SentPacket>,
    /// Packet numbers received in this space that are pending an outgoing ACK.
    pub ack_queue: RangeSet,
    /// Deadline by which an ACK must be sent for queued packet numbers.
    pub ack_at: Option<Timestamp>,
    pub expected_packet_number: u64,
    pub largest_received_packet: Option<u64>,
    pub largest_received_time: Option<Timestamp>,
    /// Count of in-flight, ack-eliciting packets still in `sent_packets`.
    ack_eliciting_in_flight: u32,
    pub largest_acked_packet: Option<u64>,
    /// Earliest time at which a surviving unacked packet would be declared
    /// lost purely by the time threshold.
    pub loss_time: Option<Timestamp>,
    discarded: bool,
}

impl PacketSpace {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    #[inline]
    #[must_use]
    pub fn ack_eliciting_in_flight(&self) -> u32 {
        self.ack_eliciting_in_flight
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent_packets.is_empty()
    }

    /// Inserts a freshly sent packet into this space's tracking table.
    #[inline]
    pub fn on_packet_sent(&mut self, packet: SentPacket) {
        debug_assert!(!self.discarded, "cannot send into a discarded space");

        if packet.in_flight && packet.is_ack_eliciting {
            self.ack_eliciting_in_flight += 1;
        }

        let prev = self.sent_packets.insert(packet.packet_number, packet);
        debug_assert!(prev.is_none(), "packet numbers must not repeat in a space");
    }

    /// Iterates sent packets with `number <= bound`, in ascending order.
    #[inline]
    pub fn sent_packets_up_to(&self, bound: u64) -> impl Iterator<Item = (&u64, &SentPacket)> {
        self.sent_packets.range(..=bound)
    }

    #[inline]
    pub fn get(&self, packet_number: u64) -> Option<&SentPacket> {
        self.sent_packets.get(&packet_number)
    }

    /// Removes a packet from tracking (used on ack, loss, and discard).
    /// Decrements the ack-eliciting-in-flight counter when applicable.
    #[inline]
    pub fn remove(&mut self, packet_number: u64) -> Option<SentPacket> {
        let packet = self.sent_packets.remove(&packet_number)?;
        if packet.in_flight && packet.is_ack_eliciting {
            self.ack_eliciting_in_flight = self.ack_eliciting_in_flight.saturating_sub(1);
        }
        Some(packet)
    }

    /// Declares the space permanently discarded. All remaining in-flight
    /// packets are returned to the caller (for `on_packets_expired`
    /// notification to the congestion controller) WITHOUT firing their
    /// delivery handlers — expiry is not an ack or a loss.
    ///
    /// Idempotent: calling `discard` twice returns an empty iterator the
    /// second time.
    pub fn discard(&mut self) -> alloc::vec::Vec<SentPacket> {
        if self.discarded {
            return alloc::vec::Vec::new();
        }

        self.discarded = true;
        let packets = core::mem::take(&mut self.sent_packets);
        self.ack_eliciting_in_flight = 0;
        self.ack_at = None;
        self.loss_time = None;

        packets.into_values().collect()
    }

    #[inline]
    fn invariants(&self) {
        if cfg!(debug_assertions) {
            let expected = self
                .sent_packets
                .values()
                .filter(|p| p.in_flight && p.is_ack_eliciting)
                .count() as u32;
            debug_assert_eq!(
                expected, self.ack_eliciting_in_flight,
                "ack_eliciting_in_flight out of sync with sent_packets"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;

    fn ts(micros: u64) -> Timestamp {
        unsafe { Timestamp::from_duration(core::time::Duration::from_micros(micros)) }
    }

    fn pkt(n: u64) -> SentPacket {
        SentPacket::new(n, PacketType::OneRtt, ts(1), 1280, true, true, false)
    }

    #[test]
    fn tracks_ack_eliciting_in_flight() {
        let mut space = PacketSpace::new();
        space.on_packet_sent(pkt(0));
        space.on_packet_sent(pkt(1));
        assert_eq!(space.ack_eliciting_in_flight(), 2);

        space.remove(0);
        assert_eq!(space.ack_eliciting_in_flight(), 1);
        space.invariants();
    }

    #[test]
    fn discard_is_idempotent() {
        let mut space = PacketSpace::new();
        space.on_packet_sent(pkt(0));
        space.on_packet_sent(pkt(1));

        let expired = space.discard();
        assert_eq!(expired.len(), 2);
        assert!(space.is_empty());
        assert_eq!(space.ack_eliciting_in_flight(), 0);

        let expired_again = space.discard();
        assert!(expired_again.is_empty());
    }

    #[test]
    fn sent_packets_up_to_is_ascending() {
        let mut space = PacketSpace::new();
        for n in [3, 1, 2, 5, 4] {
            space.on_packet_sent(pkt(n));
        }
        let numbers: alloc::vec::Vec<u64> =
            space.sent_packets_up_to(4).map(|(n, _)| *n).collect();
        assert_eq!(numbers, alloc::vec![1, 2, 3, 4]);
    }
}
