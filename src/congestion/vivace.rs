// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! PCC-Vivace: a monitor-interval-based online-learning controller.
//!
//! Unlike Reno/CUBIC, Vivace does not react to loss events directly. Instead
//! it divides time into monitor intervals (MIs), samples a utility function
//! of throughput, RTT slope, and loss over each MI, and probes the sending
//! rate up/down to climb the utility gradient. Only the two most recent MIs
//! are ever consulted (the current one and its predecessor), so only two are
//! retained rather than an unbounded history.

use super::{CongestionController, LostPacket};
use crate::{
    recovery::{
        K_BOUNDARY_INC, K_CONVERSION_FACTOR, K_EPSILON, K_INITIAL_BOUNDARY, K_INITIAL_WINDOW,
        K_LATENCY_COEFF, K_LATENCY_FILTER, K_LOSS_COEFF, K_MAX_DATAGRAM_SIZE, K_MINIMUM_WINDOW,
        K_THROUGHPUT_COEFF,
    },
    time::Timestamp,
};
use alloc::vec::Vec;
use core::time::Duration;
use num_traits::Float;

/// A single monitor interval's samples and derived utility.
#[derive(Clone, Debug)]
struct MonitorInterval {
    start_time: Timestamp,
    /// Sending rate for this MI, in MSS-sized packets (not bytes/sec).
    sending_rate: u64,
    /// `(offset-since-MI-start, per-packet rtt)` samples, both in seconds.
    rtt_samples: Vec<(f64, f64)>,
    loss_count: u32,
    is_primary: bool,
    utility: f64,
}

impl MonitorInterval {
    fn new(congestion_window: u32, is_primary: bool, now: Timestamp) -> Self {
        Self {
            start_time: now,
            sending_rate: (congestion_window / K_MAX_DATAGRAM_SIZE) as u64,
            rtt_samples: Vec::new(),
            loss_count: 0,
            is_primary,
            utility: 0.0,
        }
    }

    fn register_rtt(&mut self, offset: Duration, rtt: Duration) {
        self.rtt_samples.push((offset.as_secs_f64(), rtt.as_secs_f64()));
    }

    fn register_loss(&mut self) {
        self.loss_count += 1;
    }

    fn compute_utility(&mut self) {
        let drtt = self.rtt_slope();
        let rate = self.sending_rate as f64;
        self.utility = Float::powf(rate, K_THROUGHPUT_COEFF)
            - K_LATENCY_COEFF * rate * drtt
            - K_LOSS_COEFF * rate * self.loss_count as f64;
    }

    /// Least-squares slope of RTT vs. offset-since-MI-start; two-point slope
    /// for exactly two samples; zero otherwise. Slopes below
    /// [`K_LATENCY_FILTER`] are treated as zero (measurement noise).
    fn rtt_slope(&self) -> f64 {
        let n = self.rtt_samples.len();
        let slope = if n > 2 {
            let nf = n as f64;
            let (mut sx, mut sy, mut sxy, mut sx2) = (0.0, 0.0, 0.0, 0.0);
            for &(x, y) in &self.rtt_samples {
                sx += x;
                sy += y;
                sxy += x * y;
                sx2 += x * x;
            }
            let denom = nf * sx2 - sx * sx;
            if denom == 0.0 {
                0.0
            } else {
                (nf * sxy - sx * sy) / denom
            }
        } else if n == 2 {
            let (x0, y0) = self.rtt_samples[0];
            let (x1, y1) = self.rtt_samples[1];
            let dx = x1 - x0;
            if dx == 0.0 {
                0.0
            } else {
                (y1 - y0) / dx
            }
        } else {
            0.0
        };

        if slope < K_LATENCY_FILTER {
            0.0
        } else {
            slope
        }
    }
}

#[derive(Clone, Debug)]
pub struct Vivace {
    bytes_in_flight: u32,
    congestion_window: u32,
    ssthresh: Option<u32>,
    in_slow_start: bool,
    positive_del: bool,
    confidence_count: u32,
    /// Signed: the original algorithm starts this at -1 and lets it go
    /// negative while `dynamic_boundary` widens the allowed band.
    boundary_count: i32,
    change_boundary: f64,
    mi_duration: Duration,
    current_mi: MonitorInterval,
    previous_mi: Option<MonitorInterval>,
    loss_count: u64,
    loss_bytes: u64,
}

impl Vivace {
    #[inline]
    pub fn new(now: Timestamp) -> Self {
        Self {
            bytes_in_flight: 0,
            congestion_window: K_INITIAL_WINDOW,
            ssthresh: None,
            in_slow_start: true,
            positive_del: false,
            confidence_count: 0,
            boundary_count: -1,
            change_boundary: K_INITIAL_BOUNDARY,
            mi_duration: Duration::from_millis(100),
            current_mi: MonitorInterval::new(K_INITIAL_WINDOW, true, now),
            previous_mi: None,
            loss_count: 0,
            loss_bytes: 0,
        }
    }

    fn confidence_amplifier(&mut self, gamma: f64) -> f64 {
        let current_del = gamma > 0.0;
        if current_del == self.positive_del {
            self.confidence_count += 1;
            self.boundary_count += 1;
        } else {
            self.positive_del = current_del;
            self.confidence_count = 1;
            self.boundary_count = 0;
        }

        if self.confidence_count <= 3 {
            self.confidence_count as f64
        } else {
            (2 * self.confidence_count) as f64 - 3.0
        }
    }

    /// Shrinks the allowed delta band toward the magnitude just observed.
    fn dynamic_boundary(&mut self, delta: f64) {
        let ssthresh = self.ssthresh.unwrap_or(self.congestion_window) as f64;
        let mut w = K_INITIAL_BOUNDARY + self.boundary_count as f64 * K_BOUNDARY_INC;
        while delta.abs() <= w * ssthresh {
            self.boundary_count -= 1;
            w = K_INITIAL_BOUNDARY + self.boundary_count as f64 * K_BOUNDARY_INC;
        }
        self.boundary_count += 1;
    }

    /// Advances the MI state machine if the current MI's duration has elapsed.
    fn maybe_roll_mi(&mut self, now: Timestamp) {
        if now.saturating_duration_since(self.current_mi.start_time) < self.mi_duration {
            return;
        }

        self.current_mi.compute_utility();

        if self.in_slow_start {
            if let Some(prev) = &self.previous_mi {
                if self.current_mi.utility < prev.utility {
                    self.in_slow_start = false;
                }
            }
        }

        let new_mi = if self.in_slow_start {
            self.congestion_window = self.congestion_window.saturating_mul(2);
            MonitorInterval::new(self.congestion_window, true, now)
        } else if self.ssthresh.is_none() {
            // base probe: slow start just ended (or the last online-learning
            // update round just completed)
            let ssthresh = self.congestion_window;
            self.ssthresh = Some(ssthresh);
            self.congestion_window = (ssthresh as f64 * (1.0 + K_EPSILON)) as u32;
            MonitorInterval::new(self.congestion_window, true, now)
        } else if self.current_mi.is_primary {
            // negative probe: the positive r(1+e) MI just finished
            let ssthresh = self.ssthresh.expect("checked above") as f64;
            self.congestion_window = ((ssthresh * (1.0 - K_EPSILON)) as u32).max(K_MINIMUM_WINDOW);
            MonitorInterval::new(self.congestion_window, false, now)
        } else {
            // update: both probes are complete; climb the utility gradient
            let ssthresh = self.ssthresh.expect("checked above") as f64;
            let prev = self
                .previous_mi
                .as_ref()
                .expect("the update phase always follows a primary probe MI");
            let gamma = (prev.utility - self.current_mi.utility) / (2.0 * ssthresh * K_EPSILON);
            let confidence = self.confidence_amplifier(gamma);
            let mut delta = confidence * K_CONVERSION_FACTOR * gamma * K_MAX_DATAGRAM_SIZE as f64;

            let bound = self.change_boundary * ssthresh;
            if delta.abs() > bound {
                delta = delta.signum() * bound;
            } else {
                self.dynamic_boundary(delta);
            }
            self.change_boundary = K_INITIAL_BOUNDARY + self.boundary_count as f64 * K_BOUNDARY_INC;

            self.congestion_window = ((ssthresh + delta) as u32).max(K_MINIMUM_WINDOW);
            self.ssthresh = None;
            MonitorInterval::new(self.congestion_window, true, now)
        };

        let finished = core::mem::replace(&mut self.current_mi, new_mi);
        self.previous_mi = Some(finished);
    }
}

impl CongestionController for Vivace {
    #[inline]
    fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    #[inline]
    fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight
    }

    #[inline]
    fn ssthresh(&self) -> Option<u32> {
        self.ssthresh
    }

    #[inline]
    fn loss_count(&self) -> u64 {
        self.loss_count
    }

    #[inline]
    fn loss_bytes(&self) -> u64 {
        self.loss_bytes
    }

    #[inline]
    fn metric_label(&self) -> &'static str {
        "vivace"
    }

    #[inline]
    fn on_packet_sent(&mut self, sent_bytes: u32) {
        self.bytes_in_flight += sent_bytes;
    }

    fn on_packet_acked(
        &mut self,
        sent_bytes: u32,
        _sent_time: Timestamp,
        latest_rtt: Duration,
        _smoothed_rtt: Duration,
        now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(sent_bytes);
        self.maybe_roll_mi(now);

        let offset = now.saturating_duration_since(self.current_mi.start_time);
        self.current_mi.register_rtt(offset, latest_rtt);
    }

    fn on_packets_lost(&mut self, lost: &[LostPacket], _now: Timestamp) {
        for packet in lost {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.sent_bytes);
            self.loss_count += 1;
            self.loss_bytes += packet.sent_bytes as u64;
            self.current_mi.register_loss();
        }

        // TODO: persistent congestion collapse is not implemented; see
        // `CongestionController::on_persistent_congestion`.
    }

    #[inline]
    fn on_packets_expired(&mut self, expired_bytes: u32) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(expired_bytes);
    }

    fn on_rtt_measurement(&mut self, _latest_rtt: Duration, _smoothed_rtt: Duration, _now: Timestamp) {
        // Vivace learns its sending rate purely from per-MI utility, not
        // from a standalone RTT-increase heuristic.
    }

    fn on_persistent_congestion(&mut self) {
        self.congestion_window = K_MINIMUM_WINDOW;
        self.ssthresh = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: u64) -> Timestamp {
        unsafe { Timestamp::from_duration(Duration::from_millis(millis)) }
    }

    #[test]
    fn utility_penalizes_latency_increase() {
        let mut mi_a = MonitorInterval::new(100 * K_MAX_DATAGRAM_SIZE, true, ts(0));
        mi_a.rtt_samples = alloc::vec![(0.0, 0.01), (0.05, 0.01), (0.1, 0.01)];
        mi_a.compute_utility();

        let mut mi_b = MonitorInterval::new(100 * K_MAX_DATAGRAM_SIZE, true, ts(0));
        mi_b.rtt_samples = alloc::vec![(0.0, 0.01), (0.05, 0.015), (0.1, 0.02)];
        mi_b.compute_utility();

        assert!(mi_a.utility > mi_b.utility);
    }

    #[test]
    fn slow_start_doubles_window_each_mi() {
        let mut vivace = Vivace::new(ts(0));
        let initial = vivace.congestion_window();

        // feed enough rtt samples, spaced across one full MI, to trigger a roll
        for i in 0..5u64 {
            vivace.on_packet_acked(
                K_MAX_DATAGRAM_SIZE,
                ts(i * 20),
                Duration::from_millis(20),
                Duration::from_millis(20),
                ts(i * 20),
            );
        }
        vivace.on_packet_acked(
            K_MAX_DATAGRAM_SIZE,
            ts(150),
            Duration::from_millis(20),
            Duration::from_millis(20),
            ts(150),
        );

        assert!(vivace.congestion_window() >= initial);
    }

    #[test]
    fn cwnd_never_drops_below_minimum() {
        let mut vivace = Vivace::new(ts(0));
        vivace.ssthresh = Some(K_MINIMUM_WINDOW);
        vivace.in_slow_start = false;
        vivace.current_mi.is_primary = true;
        vivace.maybe_roll_mi(ts(200));
        assert!(vivace.congestion_window() >= K_MINIMUM_WINDOW);
    }
}
