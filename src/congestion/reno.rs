// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! AIMD New Reno, with a HyStart-assisted slow-start exit.

use super::{CongestionController, LostPacket};
use crate::{
    recovery::{K_INITIAL_WINDOW, K_LOSS_REDUCTION_FACTOR, K_MINIMUM_WINDOW},
    rtt_monitor::RttMonitor,
    time::Timestamp,
};
use core::time::Duration;

/// New Reno congestion control.
///
/// Grows the window by one packet's worth of bytes per acked packet in slow
/// start, and by one MSS per window-worth of acked bytes in congestion
/// avoidance. Exits slow start either on the first loss, or earlier if
/// [`RttMonitor`] reports a sustained RTT increase (HyStart).
#[derive(Clone, Debug)]
pub struct Reno {
    bytes_in_flight: u32,
    congestion_window: u32,
    ssthresh: Option<u32>,
    congestion_recovery_start_time: Option<Timestamp>,
    congestion_stash: u32,
    rtt_monitor: RttMonitor,
    loss_count: u64,
    loss_bytes: u64,
}

impl Default for Reno {
    fn default() -> Self {
        Self {
            bytes_in_flight: 0,
            congestion_window: K_INITIAL_WINDOW,
            ssthresh: None,
            congestion_recovery_start_time: None,
            congestion_stash: 0,
            rtt_monitor: RttMonitor::new(),
            loss_count: 0,
            loss_bytes: 0,
        }
    }
}

impl Reno {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// In slow start until `ssthresh` is set and the window has grown to meet it.
    #[inline]
    fn in_slow_start(&self) -> bool {
        match self.ssthresh {
            None => true,
            Some(ssthresh) => self.congestion_window < ssthresh,
        }
    }
}

impl CongestionController for Reno {
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
        "reno"
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
        _smoothed_rtt: Duration,
        _now: Timestamp,
    ) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(sent_bytes);

        // don't grow the window for packets sent before the start of the
        // current congestion-recovery period
        if let Some(start) = self.congestion_recovery_start_time {
            if sent_time <= start {
                return;
            }
        }

        if self.in_slow_start() {
            self.congestion_window += sent_bytes;
        } else {
            self.congestion_stash += sent_bytes;
            let count = self.congestion_stash / self.congestion_window;
            if count > 0 {
                self.congestion_stash -= count * self.congestion_window;
                self.congestion_window += count * crate::recovery::K_MAX_DATAGRAM_SIZE;
            }
        }
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

        let starts_new_recovery_event = match self.congestion_recovery_start_time {
            Some(start) => t_star > start,
            None => true,
        };
        if starts_new_recovery_event {
            self.congestion_recovery_start_time = Some(now);
            let reduced = (self.congestion_window as f64 * K_LOSS_REDUCTION_FACTOR) as u32;
            self.congestion_window = reduced.max(K_MINIMUM_WINDOW);
            self.ssthresh = Some(self.congestion_window);
        }

        // TODO: persistent congestion collapse is not implemented; see
        // `CongestionController::on_persistent_congestion`.
    }

    #[inline]
    fn on_packets_expired(&mut self, expired_bytes: u32) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(expired_bytes);
    }

    fn on_rtt_measurement(&mut self, latest_rtt: Duration, _smoothed_rtt: Duration, now: Timestamp) {
        if self.ssthresh.is_none() && self.rtt_monitor.is_rtt_increasing(latest_rtt, now) {
            self.ssthresh = Some(self.congestion_window);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                ssthresh = self.congestion_window,
                "hystart_exited_slow_start"
            );
        }
    }

    fn on_persistent_congestion(&mut self) {
        self.congestion_window = K_MINIMUM_WINDOW;
        self.ssthresh = None;
    }
}
