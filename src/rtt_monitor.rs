// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A lightweight HyStart-style slow-start exit detector.
//!
//! Unlike [`crate::congestion`]'s reliance on packet loss to exit slow start,
//! this monitor watches for a sustained increase in the minimum RTT sampled
//! over sliding windows of [`SAMPLES`] round-trip measurements, the way TCP's
//! HyStart avoids overshooting the bottleneck buffer before the first loss.
//!
//! `filtered_min` tracks the all-time minimum of each window's *maximum*
//! sample, not its minimum — that's not a typo, it's what keeps this
//! detector from reacting to ordinary per-window RTT jitter: a window whose
//! worst sample is still below everything seen before can't be the start of
//! a sustained increase.

use crate::time::Timestamp;
use core::time::Duration;

/// Number of RTT samples per window.
const SAMPLES: usize = 5;
/// Minimum time between accepted samples.
const SAMPLE_GRANULARITY: Duration = Duration::from_millis(1);
/// Consecutive increasing windows required to report the RTT as increasing.
const REQUIRED_INCREASES: u32 = 5;

/// Detects a sustained increase in minimum RTT across sliding 5-sample
/// windows.
#[derive(Clone, Debug, Default)]
pub struct RttMonitor {
    samples: [Duration; SAMPLES],
    sample_idx: usize,
    filled: bool,
    last_sample_time: Option<Timestamp>,
    filtered_min: Option<Duration>,
    increases: u32,
}

impl RttMonitor {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn add_sample(&mut self, rtt: Duration) {
        self.samples[self.sample_idx] = rtt;
        self.sample_idx += 1;
        if self.sample_idx >= SAMPLES {
            self.sample_idx = 0;
            self.filled = true;
        }
    }

    /// Feeds a new RTT sample and reports whether the minimum RTT has shown a
    /// sustained increase over the last [`REQUIRED_INCREASES`] windows.
    ///
    /// Samples within [`SAMPLE_GRANULARITY`] of the previous one are ignored
    /// (they don't represent an independent round trip).
    pub fn is_rtt_increasing(&mut self, rtt: Duration, now: Timestamp) -> bool {
        if let Some(last) = self.last_sample_time {
            if !(now - last >= SAMPLE_GRANULARITY) {
                return false;
            }
        }

        self.add_sample(rtt);
        self.last_sample_time = Some(now);

        if !self.filled {
            return false;
        }

        let sample_min = *self.samples.iter().min().unwrap();
        let sample_max = *self.samples.iter().max().unwrap();

        let filtered_min = match self.filtered_min {
            Some(fm) => fm.min(sample_max),
            None => sample_max,
        };
        self.filtered_min = Some(filtered_min);

        // delta can go negative (the common case: the window's minimum sits
        // well below the all-time minimum of window maxima), so the
        // comparison runs in signed nanoseconds rather than `Duration`.
        let delta = sample_min.as_nanos() as i128 - filtered_min.as_nanos() as i128;
        let filtered_min_nanos = filtered_min.as_nanos() as i128;

        if delta * 4 >= filtered_min_nanos {
            self.increases += 1;
        } else if delta > 0 {
            self.increases = 0;
        }
        // else: delta <= 0 and not a sustained increase — leave the counter
        // untouched, matching the monitor this is ported from.

        self.increases >= REQUIRED_INCREASES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(millis: u64) -> Timestamp {
        unsafe { Timestamp::from_duration(Duration::from_millis(millis)) }
    }

    #[test]
    fn does_not_report_before_buffer_fills() {
        let mut monitor = RttMonitor::new();
        for i in 0..4 {
            assert!(!monitor.is_rtt_increasing(Duration::from_millis(50), ts(i * 2)));
        }
    }

    #[test]
    fn stable_rtt_never_reports_increasing() {
        let mut monitor = RttMonitor::new();
        for i in 0..50 {
            assert!(!monitor.is_rtt_increasing(Duration::from_millis(50), ts(i * 2)));
        }
    }

    #[test]
    fn sustained_increase_is_detected() {
        let mut monitor = RttMonitor::new();
        let mut t = 0u64;

        // warm up with a low, stable RTT to establish filtered_min
        for _ in 0..10 {
            monitor.is_rtt_increasing(Duration::from_millis(20), ts(t));
            t += 2;
        }

        let mut detected = false;
        // sustained jump to a much higher RTT across many windows
        for _ in 0..60 {
            if monitor.is_rtt_increasing(Duration::from_millis(100), ts(t)) {
                detected = true;
                break;
            }
            t += 2;
        }

        assert!(detected, "expected a sustained RTT increase to be detected");
    }

    #[test]
    fn samples_too_close_together_are_ignored() {
        let mut monitor = RttMonitor::new();
        monitor.is_rtt_increasing(Duration::from_millis(50), ts(0));
        // same timestamp, should be a no-op
        assert!(!monitor.is_rtt_increasing(Duration::from_millis(200), ts(0)));
    }
}
