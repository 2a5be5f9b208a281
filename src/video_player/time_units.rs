// SPDX-License-Identifier: MPL-2.0
//! Time unit conversion utilities for playback clocks.
//!
//! Clocks keep their position as integer nanoseconds so that tick due times
//! (`k * interval`) compare exactly against positions advanced by the same
//! interval.
//!
//! # Constants
//!
//! - `NANOS_PER_SECOND`: 1,000,000,000 (f64 for calculations)

/// Nanoseconds per second as f64 for calculations.
pub const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Converts seconds to nanoseconds, clamping negatives and NaN to zero.
///
/// # Examples
///
/// ```
/// use spatial_player::video_player::time_units::secs_to_nanos;
///
/// assert_eq!(secs_to_nanos(1.5), 1_500_000_000);
/// assert_eq!(secs_to_nanos(-2.0), 0);
/// ```
#[inline]
#[must_use]
pub fn secs_to_nanos(secs: f64) -> u64 {
    if secs.is_nan() || secs <= 0.0 {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = (secs * NANOS_PER_SECOND).round() as u64;
    nanos
}

/// Converts nanoseconds to seconds.
///
/// # Examples
///
/// ```
/// use spatial_player::video_player::time_units::nanos_to_secs;
///
/// assert_eq!(nanos_to_secs(250_000_000), 0.25);
/// ```
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn nanos_to_secs(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_SECOND
}
