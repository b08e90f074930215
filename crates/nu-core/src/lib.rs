//! # nu-core
//!
//! Core types for NextUnfold.
//!
//! This crate holds the containers shared by every unfolding component
//! (histograms, response matrices, efficiencies, group assignments), the
//! common error type, and the extension traits through which custom
//! regularizers and test statistics plug into the engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;
/// Extension traits (regularizer, test statistic).
pub mod traits;
/// Histogram and matrix containers.
pub mod types;

pub use error::{Error, Result};
pub use traits::{Regularizer, Smoothed, TestStatistic};
pub use types::{CauseEstimate, Efficiency, GroupAssignment, Histogram, ResponseMatrix};
