// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Loss detection, RTT estimation, and congestion-control orchestration.
//!
//! [`Recovery`] is the one piece of this crate the surrounding QUIC endpoint
//! talks to directly: it is handed every packet sent, every ACK frame
//! received, and every loss-detection timer expiry, and it emits probe
//! requests through the `send_probe` callback supplied at construction.
//!
//! Internally it ties together a [`PacketSpace`] per packet-number-space epoch,
//! a [`CongestionController`] of the caller's choosing, and a [`Pacer`].

use crate::{
    config::{ControllerKind, RecoveryConfig},
    congestion::{self, CongestionController, LostPacket},
    pacer::Pacer,
    packet::SentPacket,
    range_set::RangeSet,
    space::PacketSpace,
    time::Timestamp,
};
#[cfg(feature = "std")]
use crate::metrics::Metrics;
use alloc::{boxed::Box, vec::Vec};
use core::time::Duration;

/// Emits a `tracing` event at the given level when the `tracing` feature is
/// enabled; compiles to nothing otherwise, so call sites never need a
/// separate cfg-gated fallback.
macro_rules! trace_event {
    ($level:ident, $($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        tracing::$level!($($arg)*);
    };
}

// loss detection
pub const K_PACKET_THRESHOLD: u64 = 3;
pub const K_INITIAL_RTT: Duration = Duration::from_millis(500);
pub const K_GRANULARITY: Duration = Duration::from_millis(1);
/// 9/8, spelled out so nobody mistakes it for an integer division bug.
pub const K_TIME_THRESHOLD: f64 = 1.125;
pub const K_MAX_ACK_DELAY: Duration = Duration::from_millis(25);

// congestion control
pub const K_MAX_DATAGRAM_SIZE: u32 = 1280;
pub const K_INITIAL_WINDOW: u32 = 10 * K_MAX_DATAGRAM_SIZE;
pub const K_MINIMUM_WINDOW: u32 = 2 * K_MAX_DATAGRAM_SIZE;

// Reno
pub const K_LOSS_REDUCTION_FACTOR: f64 = 0.5;

// CUBIC
pub const K_BETA_CUBIC: f64 = 0.7;
pub const K_WINDOW_AGGRESSIVENESS: f64 = 0.4;

// Vivace
pub const K_THROUGHPUT_COEFF: f64 = 0.9;
pub const K_LATENCY_COEFF: f64 = 900.0;
pub const K_LOSS_COEFF: f64 = 11.35;
pub const K_LATENCY_FILTER: f64 = 0.01;
pub const K_EPSILON: f64 = 0.05;
pub const K_CONVERSION_FACTOR: f64 = 1.0;
pub const K_INITIAL_BOUNDARY: f64 = 0.05;
pub const K_BOUNDARY_INC: f64 = 0.1;

/// The three independent packet-number spaces a QUIC connection tracks.
///
/// 0-RTT and 1-RTT packets share the `Application` space; there is no
/// separate epoch for 0-RTT at the recovery layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Epoch {
    Initial,
    Handshake,
    Application,
}

impl Epoch {
    const COUNT: usize = 3;

    #[inline]
    fn index(self) -> usize {
        match self {
            Epoch::Initial => 0,
            Epoch::Handshake => 1,
            Epoch::Application => 2,
        }
    }

    const ALL: [Epoch; Self::COUNT] = [Epoch::Initial, Epoch::Handshake, Epoch::Application];
}

fn new_controller(kind: ControllerKind, now: Timestamp) -> Box<dyn CongestionController> {
    match kind {
        ControllerKind::Reno => Box::new(congestion::Reno::new()),
        ControllerKind::Cubic => Box::new(congestion::Cubic::new()),
        ControllerKind::Vivace => Box::new(congestion::Vivace::new(now)),
    }
}

/// Orchestrates loss detection, RTT estimation, and congestion control for a
/// single connection.
pub struct Recovery {
    max_ack_delay: Duration,
    spaces: [PacketSpace; Epoch::COUNT],

    is_client_without_1rtt: bool,
    send_probe: Box<dyn FnMut()>,
    #[cfg(feature = "std")]
    metrics: Option<Metrics>,

    pto_count: u32,
    rtt_initialized: bool,
    rtt_latest: Duration,
    rtt_min: Duration,
    rtt_smoothed: Duration,
    rtt_variance: Duration,
    time_of_last_sent_ack_eliciting_packet: Option<Timestamp>,

    cc: Box<dyn CongestionController>,
    pacer: Pacer,
}

impl core::fmt::Debug for Recovery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Recovery")
            .field("pto_count", &self.pto_count)
            .field("rtt_initialized", &self.rtt_initialized)
            .field("rtt_smoothed", &self.rtt_smoothed)
            .field("cc", &self.cc)
            .finish()
    }
}

impl Recovery {
    pub fn new(config: RecoveryConfig, send_probe: impl FnMut() + 'static, now: Timestamp) -> Self {
        let cc = new_controller(config.controller(), now);

        #[cfg(feature = "std")]
        let metrics = if config.logging_enabled() {
            Metrics::open(config.controller().label(), config.role(), now).ok()
        } else {
            None
        };

        Self {
            max_ack_delay: K_MAX_ACK_DELAY,
            spaces: [PacketSpace::new(), PacketSpace::new(), PacketSpace::new()],
            is_client_without_1rtt: config.is_client_without_1rtt(),
            send_probe: Box::new(send_probe),
            #[cfg(feature = "std")]
            metrics,
            pto_count: 0,
            rtt_initialized: false,
            rtt_latest: Duration::ZERO,
            rtt_min: Duration::MAX,
            rtt_smoothed: Duration::ZERO,
            rtt_variance: Duration::ZERO,
            time_of_last_sent_ack_eliciting_packet: None,
            cc,
            pacer: Pacer::new(now),
        }
    }

    #[inline]
    pub fn congestion_window(&self) -> u32 {
        self.cc.congestion_window()
    }

    #[inline]
    pub fn bytes_in_flight(&self) -> u32 {
        self.cc.bytes_in_flight()
    }

    #[inline]
    pub fn ssthresh(&self) -> Option<u32> {
        self.cc.ssthresh()
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.rtt_smoothed
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.rtt_latest
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.rtt_min
    }

    #[inline]
    pub fn pto_count(&self) -> u32 {
        self.pto_count
    }

    /// Returns the next time at which the pacer would allow a send, or
    /// `None` if one may be sent immediately.
    #[inline]
    pub fn next_send_time(&mut self, now: Timestamp) -> Option<Timestamp> {
        self.pacer.next_send_time(now)
    }

    #[inline]
    fn space(&self, epoch: Epoch) -> &PacketSpace {
        &self.spaces[epoch.index()]
    }

    #[inline]
    fn space_mut(&mut self, epoch: Epoch) -> &mut PacketSpace {
        &mut self.spaces[epoch.index()]
    }

    /// Records a freshly sent packet.
    pub fn on_packet_sent(&mut self, epoch: Epoch, packet: SentPacket, now: Timestamp) {
        let in_flight = packet.in_flight;
        let is_ack_eliciting = packet.is_ack_eliciting;
        let sent_bytes = packet.sent_bytes;

        self.space_mut(epoch).on_packet_sent(packet);

        if in_flight {
            if is_ack_eliciting {
                self.time_of_last_sent_ack_eliciting_packet = Some(now);
            }
            self.cc.on_packet_sent(sent_bytes);
            self.pacer.on_packet_sent(now);
        }

        trace_event!(
            trace,
            ?epoch,
            sent_bytes,
            in_flight,
            is_ack_eliciting,
            "packet_sent"
        );
    }

    /// Processes a received ACK frame: removes newly acked packets, updates
    /// the RTT estimate, runs loss detection, and resets the PTO backoff.
    pub fn on_ack_received(
        &mut self,
        epoch: Epoch,
        ack_ranges: &RangeSet,
        mut ack_delay: Duration,
        now: Timestamp,
    ) {
        let Some(largest_acked) = ack_ranges.max() else {
            return;
        };

        {
            let space = self.space_mut(epoch);
            if space.largest_acked_packet.is_none_or(|l| largest_acked > l) {
                space.largest_acked_packet = Some(largest_acked);
            }
        }

        let mut any_ack_eliciting = false;
        let mut largest_newly_acked: Option<u64> = None;
        let mut largest_sent_time: Option<Timestamp> = None;
        let mut newly_acked: Vec<SentPacket> = Vec::new();

        let candidate_numbers: Vec<u64> = self
            .space(epoch)
            .sent_packets_up_to(largest_acked)
            .map(|(n, _)| *n)
            .collect();

        for number in candidate_numbers {
            if !ack_ranges.contains(number) {
                continue;
            }
            let Some(packet) = self.space_mut(epoch).remove(number) else {
                continue;
            };

            if packet.is_ack_eliciting {
                any_ack_eliciting = true;
            }

            largest_newly_acked = Some(number);
            largest_sent_time = Some(packet.sent_time);
            newly_acked.push(packet);
        }

        let Some(largest_newly_acked) = largest_newly_acked else {
            return;
        };

        // RTT update and loss detection both run before the newly acked
        // packets are handed to the congestion controller, so a loss
        // discovered in this same batch can suppress window growth for
        // packets sent before the resulting recovery period started (see
        // the `congestion_recovery_start_time` guard in each controller).
        if largest_acked == largest_newly_acked && any_ack_eliciting {
            let largest_sent_time = largest_sent_time.expect("set alongside largest_newly_acked");
            let latest_rtt_raw = now.saturating_duration_since(largest_sent_time);

            ack_delay = ack_delay.min(self.max_ack_delay);

            self.rtt_latest = latest_rtt_raw.max(Duration::from_millis(1));
            if self.rtt_latest < self.rtt_min {
                self.rtt_min = self.rtt_latest;
            }
            if self.rtt_latest > self.rtt_min + ack_delay {
                self.rtt_latest -= ack_delay;
            }

            if !self.rtt_initialized {
                self.rtt_initialized = true;
                self.rtt_variance = self.rtt_latest / 2;
                self.rtt_smoothed = self.rtt_latest;
            } else {
                let deviation = abs_diff(self.rtt_min, self.rtt_latest);
                self.rtt_variance = weighted_average(self.rtt_variance, deviation, 3, 4);
                self.rtt_smoothed = weighted_average(self.rtt_smoothed, self.rtt_latest, 7, 8);
            }

            self.cc
                .on_rtt_measurement(self.rtt_latest, self.rtt_smoothed, now);
            trace_event!(
                debug,
                ?epoch,
                latest_rtt = ?self.rtt_latest,
                smoothed_rtt = ?self.rtt_smoothed,
                "rtt_updated"
            );
            #[cfg(feature = "std")]
            if let Some(metrics) = &mut self.metrics {
                metrics.log_latency(self.rtt_latest, self.rtt_smoothed, now);
            }
            self.pacer.update_rate(self.cc.congestion_window(), self.rtt_smoothed);
        }

        self.detect_loss(epoch, now);

        for mut packet in newly_acked {
            if packet.in_flight {
                let latest_for_packet = now.saturating_duration_since(packet.sent_time);
                self.cc.on_packet_acked(
                    packet.sent_bytes,
                    packet.sent_time,
                    latest_for_packet,
                    self.rtt_smoothed,
                    now,
                );
                #[cfg(feature = "std")]
                if let Some(metrics) = &mut self.metrics {
                    metrics.log_window(self.cc.as_ref(), now, "ACK");
                }
            }
            packet.fire_delivery_handlers(crate::packet::DeliveryOutcome::Acked);
        }

        trace_event!(
            trace,
            ?epoch,
            largest_acked,
            congestion_window = self.cc.congestion_window(),
            "ack_processed"
        );

        self.pto_count = 0;
    }

    /// Checks sent packets in `epoch` against the packet and time thresholds
    /// and declares the losers lost.
    fn detect_loss(&mut self, epoch: Epoch, now: Timestamp) {
        let loss_delay_secs = K_TIME_THRESHOLD
            * if self.rtt_initialized {
                self.rtt_latest.max(self.rtt_smoothed).as_secs_f64()
            } else {
                K_INITIAL_RTT.as_secs_f64()
            };
        let loss_delay = Duration::from_secs_f64(loss_delay_secs);

        let Some(largest_acked) = self.space(epoch).largest_acked_packet else {
            return;
        };
        let packet_threshold = largest_acked.saturating_sub(K_PACKET_THRESHOLD);

        let mut lost_numbers = Vec::new();
        let mut loss_time = None;

        for (number, packet) in self.space(epoch).sent_packets_up_to(largest_acked) {
            if *number <= packet_threshold || packet.sent_time + loss_delay <= now {
                lost_numbers.push(*number);
            } else {
                let packet_loss_time = packet.sent_time + loss_delay;
                loss_time = Some(match loss_time {
                    Some(t) if t < packet_loss_time => t,
                    _ => packet_loss_time,
                });
            }
        }

        self.space_mut(epoch).loss_time = loss_time;

        if lost_numbers.is_empty() {
            return;
        }

        let lost_packets: Vec<SentPacket> = lost_numbers
            .into_iter()
            .filter_map(|n| self.space_mut(epoch).remove(n))
            .collect();
        self.on_packets_lost(lost_packets, now);
    }

    fn on_packets_lost(&mut self, mut packets: Vec<SentPacket>, now: Timestamp) {
        let mut cc_losses = Vec::new();

        for packet in &mut packets {
            if packet.in_flight {
                cc_losses.push(LostPacket {
                    sent_bytes: packet.sent_bytes,
                    sent_time: packet.sent_time,
                });
            }
            packet.fire_delivery_handlers(crate::packet::DeliveryOutcome::Lost);
        }

        if !cc_losses.is_empty() {
            self.cc.on_packets_lost(&cc_losses, now);
            trace_event!(
                debug,
                lost_packets = cc_losses.len(),
                congestion_window = self.cc.congestion_window(),
                ssthresh = ?self.cc.ssthresh(),
                "packets_lost"
            );
            #[cfg(feature = "std")]
            if let Some(metrics) = &mut self.metrics {
                metrics.log_window(self.cc.as_ref(), now, "LOSS");
                metrics.log_loss(self.cc.as_ref(), now);
            }
            self.pacer.update_rate(self.cc.congestion_window(), self.rtt_smoothed);
        }
    }

    /// Returns the earliest time a loss-detection or PTO timer should next
    /// fire, or `None` if no timer needs to be armed.
    pub fn get_loss_detection_time(&self) -> Option<Timestamp> {
        let earliest_loss_time = Epoch::ALL
            .into_iter()
            .filter(|e| !self.space(*e).is_discarded())
            .filter_map(|e| self.space(e).loss_time)
            .min();

        if let Some(loss_time) = earliest_loss_time {
            return Some(loss_time);
        }

        let any_ack_eliciting_in_flight = Epoch::ALL
            .into_iter()
            .map(|e| self.space(e).ack_eliciting_in_flight())
            .sum::<u32>()
            > 0;

        if !(self.is_client_without_1rtt || any_ack_eliciting_in_flight) {
            return None;
        }

        let base_timeout = if !self.rtt_initialized {
            2 * K_INITIAL_RTT
        } else {
            self.probe_timeout()
        };
        let timeout = base_timeout * 2u32.saturating_pow(self.pto_count);

        self.time_of_last_sent_ack_eliciting_packet
            .map(|t| t + timeout)
    }

    fn probe_timeout(&self) -> Duration {
        self.rtt_smoothed + self.rtt_variance.saturating_mul(4).max(K_GRANULARITY) + self.max_ack_delay
    }

    /// Invoked when the loss-detection/PTO timer armed by
    /// [`get_loss_detection_time`] fires.
    pub fn on_loss_detection_timeout(&mut self, now: Timestamp) {
        let earliest_loss_epoch = Epoch::ALL
            .into_iter()
            .filter(|e| !self.space(*e).is_discarded())
            .filter(|e| self.space(*e).loss_time.is_some())
            .min_by_key(|e| self.space(*e).loss_time);

        if let Some(epoch) = earliest_loss_epoch {
            self.detect_loss(epoch, now);
            return;
        }

        self.pto_count += 1;

        for epoch in Epoch::ALL {
            if self.space(epoch).is_discarded() {
                continue;
            }
            let crypto_numbers: Vec<u64> = self
                .space(epoch)
                .sent_packets_up_to(u64::MAX)
                .filter(|(_, p)| p.is_crypto_packet)
                .map(|(n, _)| *n)
                .collect();
            let crypto_packets: Vec<SentPacket> = crypto_numbers
                .into_iter()
                .filter_map(|n| self.space_mut(epoch).remove(n))
                .collect();
            if !crypto_packets.is_empty() {
                self.on_packets_lost(crypto_packets, now);
            }
        }

        trace_event!(warn, pto_count = self.pto_count, "pto_fired");

        (self.send_probe)();
    }

    /// Permanently discards a packet-number space. In-flight packets it still
    /// held are reported to the congestion controller as expired (not acked,
    /// not lost — their delivery handlers never fire).
    pub fn discard_space(&mut self, epoch: Epoch) {
        let expired = self.space_mut(epoch).discard();
        let expired_bytes: u32 = expired
            .iter()
            .filter(|p| p.in_flight)
            .map(|p| p.sent_bytes)
            .sum();
        if expired_bytes > 0 {
            self.cc.on_packets_expired(expired_bytes);
        }
    }
}

#[inline]
fn abs_diff(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// `(old * num + new * (den - num)) / den`, e.g. `num=7, den=8` for the
/// classic `0.875*smoothed + 0.125*latest` RTT EWMA.
#[inline]
fn weighted_average(old: Duration, new: Duration, num: u32, den: u32) -> Duration {
    (old * num + new * (den - num)) / den
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Role, packet::PacketType};

    fn ts(millis: u64) -> Timestamp {
        unsafe { Timestamp::from_duration(Duration::from_millis(millis)) }
    }

    fn recovery(kind: ControllerKind) -> Recovery {
        Recovery::new(
            RecoveryConfig::new()
                .with_controller(kind)
                .with_role(Role::Server),
            || {},
            ts(0),
        )
    }

    /// Picks the packet type (and, with it, the crypto-packet status) that
    /// actually belongs to `epoch`, so a test sending into e.g. `Epoch::Initial`
    /// produces a packet the PTO path will actually recognize as crypto-bearing.
    fn packet_type_for(epoch: Epoch) -> PacketType {
        match epoch {
            Epoch::Initial => PacketType::Initial,
            Epoch::Handshake => PacketType::Handshake,
            Epoch::Application => PacketType::OneRtt,
        }
    }

    fn send(
        recovery: &mut Recovery,
        epoch: Epoch,
        number: u64,
        at: Timestamp,
        in_flight: bool,
        ack_eliciting: bool,
    ) {
        let packet_type = packet_type_for(epoch);
        let packet = SentPacket::new(
            number,
            packet_type,
            at,
            K_MAX_DATAGRAM_SIZE,
            in_flight,
            ack_eliciting,
            packet_type.is_crypto_packet(),
        );
        recovery.on_packet_sent(epoch, packet, at);
    }

    #[test]
    fn scenario_slow_start_growth() {
        let mut recovery = recovery(ControllerKind::Reno);
        for n in 0..10 {
            send(&mut recovery, Epoch::Application, n, ts(0), true, true);
        }

        let mut acked = RangeSet::new();
        acked.insert_range(0..10);
        recovery.on_ack_received(Epoch::Application, &acked, Duration::ZERO, ts(100));

        assert_eq!(recovery.congestion_window(), K_INITIAL_WINDOW + 10 * K_MAX_DATAGRAM_SIZE);
        assert_eq!(recovery.smoothed_rtt(), Duration::from_millis(100));
        assert_eq!(recovery.rtt_variance, Duration::from_millis(50));
    }

    #[test]
    fn scenario_packet_threshold_loss() {
        let mut recovery = recovery(ControllerKind::Reno);
        for n in 0..5 {
            send(&mut recovery, Epoch::Application, n, ts(n), true, true);
        }

        let mut acked = RangeSet::new();
        acked.insert(4);
        recovery.on_ack_received(Epoch::Application, &acked, Duration::ZERO, ts(100));

        // packets 0 and 1 are more than K_PACKET_THRESHOLD behind packet 4
        assert!(recovery.space(Epoch::Application).get(0).is_none());
        assert!(recovery.space(Epoch::Application).get(1).is_none());
        // packets 2 and 3 survive with a pending loss_time
        assert!(recovery.space(Epoch::Application).get(2).is_some());
        assert!(recovery.space(Epoch::Application).get(3).is_some());
        assert!(recovery.space(Epoch::Application).loss_time.is_some());

        assert_eq!(recovery.congestion_window(), K_MINIMUM_WINDOW.max(K_INITIAL_WINDOW / 2));
        assert_eq!(recovery.ssthresh(), Some(K_INITIAL_WINDOW / 2));
    }

    #[test]
    fn scenario_time_threshold_loss() {
        let mut recovery = recovery(ControllerKind::Reno);
        send(&mut recovery, Epoch::Application, 0, ts(0), true, true);
        send(&mut recovery, Epoch::Application, 1, ts(0), true, true);

        let mut acked = RangeSet::new();
        acked.insert(1);
        // far enough in the future that packet 0 ages past the time threshold
        recovery.on_ack_received(Epoch::Application, &acked, Duration::ZERO, ts(1000));

        assert!(recovery.space(Epoch::Application).get(0).is_none());
    }

    #[test]
    fn scenario_pto_probe_without_acks() {
        let probes = alloc::rc::Rc::new(core::cell::Cell::new(0u32));
        let probes_clone = probes.clone();
        let mut recovery = Recovery::new(
            RecoveryConfig::new().with_controller(ControllerKind::Reno),
            move || probes_clone.set(probes_clone.get() + 1),
            ts(0),
        );

        send(&mut recovery, Epoch::Initial, 0, ts(0), true, true);
        recovery.on_loss_detection_timeout(ts(1000));

        assert_eq!(recovery.pto_count(), 1);
        assert_eq!(probes.get(), 1);
        assert!(recovery.space(Epoch::Initial).get(0).is_none());

        recovery.on_loss_detection_timeout(ts(2000));
        assert_eq!(recovery.pto_count(), 2);
        assert_eq!(probes.get(), 2);
    }

    #[test]
    fn discard_space_is_idempotent_and_expires_without_firing_handlers() {
        let mut recovery = recovery(ControllerKind::Reno);
        let fired = alloc::rc::Rc::new(core::cell::Cell::new(false));
        let fired_clone = fired.clone();

        let mut packet = SentPacket::new(0, PacketType::Initial, ts(0), K_MAX_DATAGRAM_SIZE, true, true, true);
        packet.on_delivery(move |_outcome| fired_clone.set(true));
        recovery.on_packet_sent(Epoch::Initial, packet, ts(0));

        recovery.discard_space(Epoch::Initial);
        assert!(!fired.get());
        assert_eq!(recovery.bytes_in_flight(), 0);

        // idempotent
        recovery.discard_space(Epoch::Initial);
        assert_eq!(recovery.bytes_in_flight(), 0);
    }

    #[test]
    fn ack_monotonicity() {
        let mut recovery = recovery(ControllerKind::Reno);
        for n in 0..4 {
            send(&mut recovery, Epoch::Application, n, ts(n), true, true);
        }

        let mut first = RangeSet::new();
        first.insert(1);
        recovery.on_ack_received(Epoch::Application, &first, Duration::ZERO, ts(50));
        let after_first = recovery.space(Epoch::Application).largest_acked_packet;

        let mut second = RangeSet::new();
        second.insert(0);
        recovery.on_ack_received(Epoch::Application, &second, Duration::ZERO, ts(60));
        let after_second = recovery.space(Epoch::Application).largest_acked_packet;

        assert!(after_second >= after_first);
    }
}
