// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CUBIC window evolution with an adaptive loss-burst filter.
//!
//! The cubic window function matches RFC 8312's shape, but the decision of
//! *when* to decrease the window runs through an adaptive loss-count
//! threshold (`_loss_thresh`) rather than reacting to every loss event, to
//! avoid over-reacting to burst losses under reordering.

use super::{CongestionController, LostPacket};
use crate::{
    recovery::{K_BETA_CUBIC, K_INITIAL_WINDOW, K_MAX_DATAGRAM_SIZE, K_MINIMUM_WINDOW, K_WINDOW_AGGRESSIVENESS},
    time::Timestamp,
};
use core::time::Duration;
use num_traits::Float;

#[derive(Clone, Debug)]
pub struct Cubic {
    bytes_in_flight: u32,
    congestion_window: u32,
    ssthresh: Option<u32>,
    congestion_recovery_start_time: Option<Timestamp>,
    congestion_avoidance_start_time: Option<Timestamp>,
    /// Window size (in MSS units) at the last congestion event.
    w_max: f64,
    w_last_max: f64,
    loss_stash: u32,
    loss_thresh: f64,
    loss_count: u64,
    loss_bytes: u64,
}

impl Default for Cubic {
    fn default() -> Self {
        Self {
            bytes_in_flight: 0,
            congestion_window: K_INITIAL_WINDOW,
            ssthresh: None,
            congestion_recovery_start_time: None,
            congestion_avoidance_start_time: None,
            w_max: 0.0,
            w_last_max: 0.0,
            loss_stash: 0,
            loss_thresh: 10.0,
            loss_count: 0,
            loss_bytes: 0,
        }
    }
}

impl Cubic {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// `W_cubic(t) = C*(t - K)^3 + w_max`, in MSS units, with
    /// `K = cbrt(w_max * (1 - beta) / C)`.
    fn cubic_window(&self, t: f64) -> f64 {
        let k = Float::cbrt(self.w_max * (1.0 - K_BETA_CUBIC) / K_WINDOW_AGGRESSIVENESS);
        K_WINDOW_AGGRESSIVENESS * Float::powi(t - k, 3) + self.w_max
    }
}

impl CongestionController for Cubic {
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
        "cubic"
    }

    #[inline]
    fn on_packet_sent(&mut self, sent_bytes: u32) {
        self.bytes_in_flight += sent_bytes;
    }

    fn on_packet_acked(
        &mut self,
        sent_bytes: u32,
        sent_time: Timestamp,
        _latest_rtt: Duration,
        smoothed_rtt: Duration,
        now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(sent_bytes);

        if let Some(start) = self.congestion_recovery_start_time {
            if sent_time <= start {
                return;
            }
        }

        let in_slow_start = match self.ssthresh {
            None => true,
            Some(ssthresh) => self.congestion_window < ssthresh,
        };

        if in_slow_start {
            self.congestion_window += sent_bytes;
            return;
        }

        let avoidance_start = *self.congestion_avoidance_start_time.get_or_insert(now);
        let elapsed = now.saturating_duration_since(avoidance_start).as_secs_f64();
        let t = elapsed + smoothed_rtt.as_secs_f64();

        let w_cubic = self.cubic_window(t);
        let cwnd_mss = self.congestion_window as f64 / K_MAX_DATAGRAM_SIZE as f64;
        let delta = ((w_cubic - cwnd_mss) / cwnd_mss) * K_MAX_DATAGRAM_SIZE as f64;

        self.congestion_window = (self.congestion_window as i64 + delta.floor() as i64)
            .max(K_MINIMUM_WINDOW as i64) as u32;
    }

    fn on_packets_lost(&mut self, lost: &[LostPacket], now: Timestamp) {
        let mut lost_largest_time = None;
        for packet in lost {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.sent_bytes);
            self.loss_count += 1;
            self.loss_bytes += packet.sent_bytes as u64;
            lost_largest_time = Some(match lost_largest_time {
                Some(t) if t > packet.sent_time => t,
                _ => packet.sent_time,
            });
        }

        let Some(t_star) = lost_largest_time else {
            return;
        };

        // adaptive loss-burst filter: decide whether this batch of losses
        // should trigger a window decrease at all
        let should_decrease = if self.ssthresh.is_none() {
            true
        } else if lost.len() as f64 > self.loss_thresh {
            self.loss_thresh = (1.25 * self.loss_thresh).ceil();
            true
        } else {
            self.loss_stash += lost.len() as u32;
            let batch_thresh = (1.5 * self.loss_thresh).floor() as u32;
            if self.loss_stash > batch_thresh {
                self.loss_stash %= batch_thresh.max(1);
                true
            } else {
                self.loss_thresh = (0.75 * self.loss_thresh).ceil();
                false
            }
        };

        if !should_decrease {
            return;
        }

        let starts_new_recovery_event = match self.congestion_recovery_start_time {
            Some(start) => t_star > start,
            None => true,
        };
        if !starts_new_recovery_event {
            return;
        }

        self.congestion_recovery_start_time = Some(now);
        self.w_max = (self.congestion_window / K_MAX_DATAGRAM_SIZE) as f64;
        if self.w_max < 0.95 * self.w_last_max {
            // fast convergence: the bottleneck shrank since the last event
            self.w_last_max = self.w_max;
            self.w_max = (self.w_max * (1.0 + K_BETA_CUBIC) / 2.0).floor();
        } else {
            self.w_last_max = self.w_max;
        }

        let reduced = (self.congestion_window as f64 * K_BETA_CUBIC) as u32;
        self.congestion_window = reduced.max(K_MINIMUM_WINDOW);
        self.ssthresh = Some(self.congestion_window);
        self.congestion_avoidance_start_time = None;

        // TODO: persistent congestion collapse is not implemented; see
        // `CongestionController::on_persistent_congestion`.
    }

    #[inline]
    fn on_packets_expired(&mut self, expired_bytes: u32) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(expired_bytes);
    }

    fn on_rtt_measurement(&mut self, _latest_rtt: Duration, _smoothed_rtt: Duration, _now: Timestamp) {
        // CUBIC does not use HyStart-lite slow-start exit; it relies on loss.
    }

    fn on_persistent_congestion(&mut self) {
        self.congestion_window = K_MINIMUM_WINDOW;
        self.ssthresh = None;
        self.congestion_avoidance_start_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: u64) -> Timestamp {
        unsafe { Timestamp::from_duration(Duration::from_millis(millis)) }
    }

    #[test]
    fn slow_start_grows_like_reno() {
        let mut cubic = Cubic::new();
        cubic.on_packet_sent(K_MAX_DATAGRAM_SIZE);
        cubic.on_packet_acked(
            K_MAX_DATAGRAM_SIZE,
            ts(0),
            Duration::from_millis(50),
            Duration::from_millis(50),
            ts(50),
        );
        assert_eq!(cubic.congestion_window(), K_INITIAL_WINDOW + K_MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn first_loss_decreases_unconditionally() {
        let mut cubic = Cubic::new();
        cubic.on_packets_lost(
            &[LostPacket {
                sent_bytes: K_MAX_DATAGRAM_SIZE,
                sent_time: ts(0),
            }],
            ts(10),
        );
        assert!(cubic.ssthresh().is_some());
        assert_eq!(
            cubic.congestion_window(),
            ((K_INITIAL_WINDOW as f64 * K_BETA_CUBIC) as u32).max(K_MINIMUM_WINDOW)
        );
    }

    #[test]
    fn fast_convergence_shrinks_w_max() {
        let mut cubic = Cubic::new();

        // drive congestion_window to exactly 100 * MSS, then force a loss
        cubic.congestion_window = 100 * K_MAX_DATAGRAM_SIZE;
        cubic.on_packets_lost(
            &[LostPacket {
                sent_bytes: K_MAX_DATAGRAM_SIZE,
                sent_time: ts(0),
            }],
            ts(10),
        );
        assert_eq!(cubic.w_max, 100.0);
        assert_eq!(cubic.w_last_max, 100.0);

        // second loss at a smaller window triggers fast convergence
        cubic.congestion_window = 60 * K_MAX_DATAGRAM_SIZE;
        cubic.on_packets_lost(
            &[LostPacket {
                sent_bytes: K_MAX_DATAGRAM_SIZE,
                sent_time: ts(20),
            }],
            ts(30),
        );
        assert_eq!(cubic.w_last_max, 60.0);
        assert_eq!(cubic.w_max, 51.0);
    }

    #[test]
    fn cwnd_never_drops_below_minimum() {
        let mut cubic = Cubic::new();
        let mut now = 0u64;
        for _ in 0..20 {
            cubic.on_packets_lost(
                &[LostPacket {
                    sent_bytes: K_MAX_DATAGRAM_SIZE,
                    sent_time: ts(now),
                }],
                ts(now + 1),
            );
            now += 2;
            assert!(cubic.congestion_window() >= K_MINIMUM_WINDOW);
        }
    }
}
