// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable congestion-control algorithms.
//!
//! The [`Recovery`](crate::recovery::Recovery) engine drives any of the three
//! controllers in this module through the single [`CongestionController`]
//! trait, so it never needs to inspect which algorithm is in use: each
//! controller is handed both the latest per-packet RTT sample and the
//! smoothed RTT on every ack and chooses which one (if either) it actually
//! consumes.

mod cubic;
mod reno;
mod vivace;

pub use cubic::Cubic;
pub use reno::Reno;
pub use vivace::Vivace;

use crate::time::Timestamp;
use core::time::Duration;

/// A packet declared lost, as handed to a controller's `on_packets_lost`.
///
/// Only in-flight packets are ever reported here; the recovery engine filters
/// out non-congestion-controlled (not in-flight) losses before calling in.
#[derive(Clone, Copy, Debug)]
pub struct LostPacket {
    pub sent_bytes: u32,
    pub sent_time: Timestamp,
}

/// A congestion-control algorithm.
///
/// Implementations own their own window, loss-recovery state, and (where
/// applicable) slow-start-exit detector. None of them touch `sent_packets`
/// bookkeeping directly; the recovery engine is the only caller.
pub trait CongestionController: core::fmt::Debug {
    /// Current congestion window, in bytes.
    fn congestion_window(&self) -> u32;

    /// Bytes currently in flight (sent, in-flight, not yet acked/lost/expired).
    fn bytes_in_flight(&self) -> u32;

    /// Slow-start threshold in bytes. `None` means still in slow start.
    fn ssthresh(&self) -> Option<u32>;

    /// Cumulative count of packets this controller has seen declared lost.
    fn loss_count(&self) -> u64;

    /// Cumulative bytes this controller has seen declared lost.
    fn loss_bytes(&self) -> u64;

    /// Short label used for metric log directory naming (`"reno"`, `"cubic"`, `"vivace"`).
    fn metric_label(&self) -> &'static str;

    /// A packet was just sent and counts toward the congestion window.
    fn on_packet_sent(&mut self, sent_bytes: u32);

    /// A previously sent, in-flight packet was acknowledged.
    ///
    /// `latest_rtt` is `now - sent_time` for the packet being acked;
    /// `smoothed_rtt` is the connection's current SRTT. Reno ignores both,
    /// CUBIC uses `smoothed_rtt`, Vivace uses `latest_rtt`.
    fn on_packet_acked(
        &mut self,
        sent_bytes: u32,
        sent_time: Timestamp,
        latest_rtt: Duration,
        smoothed_rtt: Duration,
        now: Timestamp,
    );

    /// One or more in-flight packets were declared lost in the same pass.
    fn on_packets_lost(&mut self, lost: &[LostPacket], now: Timestamp);

    /// In-flight packets were expired by a packet-number-space discard
    /// (not an ack, not a loss — no congestion event).
    fn on_packets_expired(&mut self, expired_bytes: u32);

    /// Invoked whenever the RTT estimate is refreshed.
    fn on_rtt_measurement(&mut self, latest_rtt: Duration, smoothed_rtt: Duration, now: Timestamp);

    /// Collapses the window on detection of persistent congestion.
    ///
    /// TODO: never invoked by the recovery engine yet (see
    /// `Recovery::on_loss_detection_timeout`); persistent-congestion
    /// detection itself isn't implemented, so this hook exists but is
    /// currently dead code.
    fn on_persistent_congestion(&mut self);
}
