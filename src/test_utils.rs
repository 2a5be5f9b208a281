// SPDX-License-Identifier: MPL-2.0
//! Test utilities for float comparisons.
//!
//! Clock positions, frame timestamps and drift offsets are all floats, so
//! tests compare them with the `approx` assertion macros instead of
//! `assert_eq!`.

pub use approx::assert_abs_diff_eq;
