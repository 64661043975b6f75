// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Monotonic time abstraction used throughout the recovery core.
//!
//! Every timestamp the crate produces or consumes flows through [`Timestamp`]
//! and [`Clock`] rather than calling `Instant::now()` directly, so tests can
//! run against a fixed, advanceable clock instead of wall-clock time.

use core::{fmt, num::NonZeroU64, time::Duration};

/// An absolute point in time.
///
/// The absolute value of a `Timestamp` is opaque; only differences and
/// orderings between `Timestamp`s sourced from the same [`Clock`] are
/// meaningful.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct Timestamp(NonZeroU64);

/// A prechecked 1us value
const ONE_MICROSECOND: NonZeroU64 = NonZeroU64::new(1).unwrap();

impl Timestamp {
    /// Creates a `Timestamp` from a `Duration` since the clock's epoch.
    ///
    /// # Safety
    /// This should only be used by [`Clock`] implementations.
    #[inline]
    pub unsafe fn from_duration(duration: Duration) -> Self {
        debug_assert!(duration.as_micros() <= u64::MAX as u128);
        let micros = duration.as_micros() as u64;
        // if the value is 0 then round up to 1us after the epoch
        let micros = NonZeroU64::new(micros).unwrap_or(ONE_MICROSECOND);
        Self(micros)
    }

    /// Converts the `Timestamp` into the `Duration` since the clock's epoch.
    ///
    /// # Safety
    /// This should only be used by [`Clock`] implementations.
    #[inline]
    pub unsafe fn as_duration(self) -> Duration {
        Duration::from_micros(self.0.get())
    }

    #[inline]
    fn as_duration_unchecked(self) -> Duration {
        Duration::from_micros(self.0.get())
    }

    /// Returns `Some(self + duration)`, or `None` on overflow.
    #[inline]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.as_duration_unchecked()
            .checked_add(duration)
            .map(|d| unsafe { Self::from_duration(d) })
    }

    /// Returns `Some(self - duration)`, or `None` on underflow.
    #[inline]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.as_duration_unchecked()
            .checked_sub(duration)
            .map(|d| unsafe { Self::from_duration(d) })
    }

    /// Returns the `Duration` elapsed since `earlier`, or zero if `earlier` is
    /// more recent than `self`.
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.as_duration_unchecked()
            .checked_sub(earlier.as_duration_unchecked())
            .unwrap_or_default()
    }

    /// Returns true if `self` is at or before `now`.
    #[inline]
    pub fn has_elapsed(self, now: Self) -> bool {
        self <= now
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({:?})", self.as_duration_unchecked())
    }
}

impl core::ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        unsafe { Self::from_duration(self.as_duration_unchecked() + rhs) }
    }
}

impl core::ops::AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl core::ops::Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.as_duration_unchecked() - rhs.as_duration_unchecked()
    }
}

impl core::ops::Sub<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn sub(self, rhs: Duration) -> Self::Output {
        unsafe { Self::from_duration(self.as_duration_unchecked() - rhs) }
    }
}

/// A source of [`Timestamp`]s.
pub trait Clock {
    /// Returns the current [`Timestamp`].
    fn get_time(&self) -> Timestamp;
}

#[cfg(feature = "std")]
mod std_clock {
    use super::*;
    use std::time::Instant;

    /// A [`Clock`] backed by `std::time::Instant`.
    #[derive(Clone, Copy, Debug)]
    pub struct StdClock {
        epoch: Instant,
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self {
                epoch: Instant::now(),
            }
        }
    }

    impl Clock for StdClock {
        #[inline]
        fn get_time(&self) -> Timestamp {
            unsafe { Timestamp::from_duration(self.epoch.elapsed()) }
        }
    }

    #[test]
    fn monotonicity_test() {
        let clock = StdClock::default();
        let ts1 = clock.get_time();
        std::thread::sleep(Duration::from_millis(10));
        let ts2 = clock.get_time();
        assert!(ts2 - ts1 >= Duration::from_millis(10));
    }
}

#[cfg(feature = "std")]
pub use std_clock::StdClock;

/// A fixed, manually-advanceable clock for deterministic tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    #[derive(Clone, Copy, Debug)]
    pub struct Clock {
        now: Timestamp,
    }

    impl Default for Clock {
        fn default() -> Self {
            Self {
                now: unsafe { Timestamp::from_duration(Duration::from_micros(1)) },
            }
        }
    }

    impl super::Clock for Clock {
        #[inline]
        fn get_time(&self) -> Timestamp {
            self.now
        }
    }

    impl Clock {
        pub fn inc_by(&mut self, duration: Duration) {
            self.now += duration;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_math() {
        let initial = unsafe { Timestamp::from_duration(Duration::from_micros(1)) };
        let ts1 = initial + Duration::from_millis(500);
        assert_eq!(Duration::from_millis(500), ts1 - initial);

        let ts2 = ts1 - Duration::from_millis(100);
        assert_eq!(Duration::from_millis(400), ts2 - initial);

        assert!(ts2.checked_sub(Duration::from_secs(u64::MAX)).is_none());
        assert_eq!(Some(initial), ts2.checked_sub(Duration::from_millis(400)));
    }

    #[test]
    fn testing_clock_advances() {
        let mut clock = testing::Clock::default();
        let t0 = clock.get_time();
        clock.inc_by(Duration::from_millis(50));
        let t1 = clock.get_time();
        assert_eq!(t1 - t0, Duration::from_millis(50));
    }
}
