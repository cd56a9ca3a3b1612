//! Shared test utilities for the reanalysis conversion workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Variable and date range fixtures on small grids
//! - Deterministic field and record generators
//! - Temporary directory helpers
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
//! use test_utils::{fixtures, synthetic_record};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use paths::*;

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

/// Assert every value of a field is within `epsilon` of `expected`.
///
/// NaN values fail the assertion.
#[macro_export]
macro_rules! assert_field_approx_eq {
    ($field:expr, $expected:expr, $epsilon:expr) => {{
        for (i, v) in $field.iter().enumerate() {
            let v: f64 = *v as f64;
            let expected: f64 = $expected as f64;
            if !((v - expected).abs() <= $epsilon as f64) {
                panic!(
                    "assertion failed: field[{}] = {:?} differs from {:?} by more than {:?}",
                    i, v, expected, $epsilon
                );
            }
        }
    }};
}
