// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{
    fmt,
    num::NonZeroU64,
    ops::{Add, AddAssign, Sub},
    time::Duration,
};

/// An absolute point in time.
///
/// The absolute value of a `Timestamp` is opaque and is not necessarily
/// related to any calendar time. `Timestamp`s should only be compared if
/// they are sourced from the same clock.
///
/// The size of `Timestamp` is guaranteed to be consistent across platforms
/// and `Option<Timestamp>` occupies no additional space.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct Timestamp(NonZeroU64);

/// A prechecked 1µs value
const ONE_MICROSECOND: NonZeroU64 = NonZeroU64::MIN;

impl Timestamp {
    /// Creates a `Timestamp` from a `Duration` since the time source's epoch,
    /// treating the duration as an absolute point in time.
    ///
    /// A zero duration is rounded up to 1µs after the epoch so that the
    /// niche representation stays available for `Option<Timestamp>`.
    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        debug_assert!(duration.as_micros() <= u64::MAX.into());
        let micros = duration.as_micros() as u64;
        Self(NonZeroU64::new(micros).unwrap_or(ONE_MICROSECOND))
    }

    /// Converts the `Timestamp` into the `Duration` since the time source's epoch.
    #[inline]
    pub fn as_duration(self) -> Duration {
        Duration::from_micros(self.0.get())
    }

    #[inline]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.as_duration()
            .checked_add(duration)
            .map(Self::from_duration)
    }

    #[inline]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.as_duration()
            .checked_sub(duration)
            .map(Self::from_duration)
    }

    /// Returns the `Duration` which elapsed since an earlier `Timestamp`,
    /// or `None` if `earlier` is more recent.
    #[inline]
    pub fn checked_duration_since(self, earlier: Self) -> Option<Duration> {
        self.as_duration().checked_sub(earlier.as_duration())
    }

    /// Returns the `Duration` which elapsed since an earlier `Timestamp`.
    /// If `earlier` is more recent, the method returns a `Duration` of 0.
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.checked_duration_since(earlier).unwrap_or_default()
    }

    /// Returns true if the `Timestamp` occurs at or before the given point in time
    #[inline]
    pub fn has_elapsed(self, now: Self) -> bool {
        self <= now
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        self.checked_add(rhs)
            .expect("timestamp addition overflowed")
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        self.checked_duration_since(rhs)
            .expect("subtracted a later timestamp from an earlier one")
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({self})")
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let duration = self.as_duration();
        let micros = duration.subsec_micros();
        let secs = duration.as_secs() % 60;
        let mins = duration.as_secs() / 60 % 60;
        let hours = duration.as_secs() / 60 / 60;
        if micros != 0 {
            write!(f, "{hours}:{mins:02}:{secs:02}.{micros:06}")
        } else {
            write!(f, "{hours}:{mins:02}:{secs:02}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let base = Timestamp::from_duration(Duration::from_millis(100));
        let later = base + Duration::from_millis(50);

        assert_eq!(later - base, Duration::from_millis(50));
        assert_eq!(later.saturating_duration_since(base), Duration::from_millis(50));
        assert_eq!(base.saturating_duration_since(later), Duration::ZERO);
        assert_eq!(base.checked_duration_since(later), None);
        assert!(base.has_elapsed(later));
        assert!(!later.has_elapsed(base));
    }

    #[test]
    fn zero_rounds_up() {
        let ts = Timestamp::from_duration(Duration::ZERO);
        assert_eq!(ts.as_duration(), Duration::from_micros(1));
    }

    #[test]
    fn option_is_free() {
        use core::mem::size_of;
        assert_eq!(size_of::<Option<Timestamp>>(), size_of::<Timestamp>());
    }
}
