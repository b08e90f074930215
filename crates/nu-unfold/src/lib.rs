//! # nu-unfold
//!
//! Iterative Bayesian unfolding for NextUnfold.
//!
//! This crate provides:
//! - response normalization with error propagation
//! - uniform, Jeffreys and user-supplied priors
//! - the iterative Bayes update with statistical and systematic covariance
//! - spline regularization (optionally per group of cause bins)
//! - test statistics for the stopping rule (KS, chi2, RMD, bin-wise p-value)
//! - a callback pipeline for regularizers and observers
//!
//! ## Architecture
//!
//! Built-in regularizers and statistics are closed enums; custom ones plug in
//! through the `Regularizer` and `TestStatistic` traits from `nu-core`. Every
//! run owns its state, so independent runs can execute on separate threads.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Callback pipeline: regularizers, observers, engine states.
pub mod callbacks;
/// Engine configuration and its JSON-facing form.
pub mod config;
/// Covariance propagation.
pub mod covariance;
/// The iterative unfolding loop.
pub mod engine;
/// Single Bayes update.
pub mod mixer;
/// Prior distributions.
pub mod priors;
/// Spline regularizer.
pub mod regularize;
/// Response normalization.
pub mod response;
/// Penalized smoothing splines.
pub mod spline;
/// Stopping-rule test statistics.
pub mod test_stat;

pub use callbacks::{Callback, EngineState, IterationSnapshot, Logger, Observer};
pub use config::{RegularizerSettings, UnfoldConfig, UnfoldSettings};
pub use covariance::{CovarianceType, SysCombination};
pub use engine::{IterationRecord, IterativeUnfolder, UnfoldResult, UnfoldStatus, iterative_unfold};
pub use priors::{PriorSpec, jeffreys_prior, jeffreys_prior_from_edges, uniform_prior, user_prior};
pub use regularize::SplineRegularizer;
pub use response::normalize_response;
pub use spline::SmoothingSpline;
pub use test_stat::TestStatKind;
