//! Utility modules shared across components
//!
//! - Interpolation: piecewise-linear curve look-up and quantiles
//! - Sampling: seeded RNG, weighted draws, normal deviates
//! - Column helpers: validated reads of exposure columns

pub mod interpolation;
pub mod sampling;
pub mod lazy_helpers;

// Re-export commonly used helpers
pub use interpolation::{interp, nan_mean, quantile};
pub use sampling::{rng_from_seed, standard_normal, weighted_indices};
pub use lazy_helpers::{
    f64_values, is_list_column, is_numeric_column, list_column, list_values,
    materialize_with_columns, require_columns, string_values,
};
