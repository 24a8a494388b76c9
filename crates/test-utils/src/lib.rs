//! Shared test utilities for the archive workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Lat-lon mesh and field value generators
//! - Day and timestamp fixtures
//! - Temporary archive directories
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, lat_axis, TempArchive};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Macro asserting that every value of a slice is either the fill sentinel
/// or approximately `expected`.
///
/// NaN sentinels are compared with `is_nan`.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_all_fill_or;
///
/// assert_all_fill_or!(&pixels, f32::NAN, 273.15, 1e-4);
/// ```
#[macro_export]
macro_rules! assert_all_fill_or {
    ($values:expr, $fill:expr, $expected:expr, $epsilon:expr) => {{
        let fill: f32 = $fill;
        for (i, v) in $values.iter().enumerate() {
            let is_fill = if fill.is_nan() { v.is_nan() } else { *v == fill };
            if !is_fill {
                let diff = (*v as f64 - $expected as f64).abs();
                if diff > $epsilon as f64 {
                    panic!(
                        "assertion failed at index {}: `{:?}` is neither fill `{:?}` nor ≈ `{:?}`",
                        i, v, fill, $expected
                    );
                }
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_assert_all_fill_or_passes() {
        assert_all_fill_or!(&[f32::NAN, 2.0, 2.00001], f32::NAN, 2.0, 1e-3);
        assert_all_fill_or!(&[-1.0f32, 5.0], -1.0, 5.0, 1e-6);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_all_fill_or_fails() {
        assert_all_fill_or!(&[f32::NAN, 3.0], f32::NAN, 2.0, 1e-3);
    }
}
