//! Per-iteration hooks: regularizers and observers.
//!
//! Callbacks form an ordered pipeline. Regularizers run in list order, each
//! one smoothing the output of the previous; observers run after the stopping
//! decision and see a read-only [`IterationSnapshot`].

use std::fmt;

use nu_core::{Regularizer, Result};

use crate::regularize::SplineRegularizer;

/// Engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Inputs validated, no iteration run yet.
    Initialized,
    /// Iterating; the stopping rule has not fired.
    Iterating,
    /// Test statistic fell to or below the stopping threshold.
    Converged,
    /// Iteration cap reached before convergence.
    MaxIterationsReached,
    /// Aborted by an error.
    Failed,
}

impl EngineState {
    /// `true` for states that end the loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineState::Initialized | EngineState::Iterating)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Initialized => "initialized",
            EngineState::Iterating => "iterating",
            EngineState::Converged => "converged",
            EngineState::MaxIterationsReached => "max_iterations_reached",
            EngineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Read-only view of one finished iteration.
#[derive(Debug, Clone, Copy)]
pub struct IterationSnapshot<'a> {
    /// 1-based iteration number.
    pub iteration: usize,
    /// State after the stopping decision.
    pub state: EngineState,
    /// Raw (unregularized) unfolded counts.
    pub unfolded: &'a [f64],
    /// Regularized counts (equal to `unfolded` without regularizers).
    pub smoothed: &'a [f64],
    /// Statistical uncertainty of `unfolded`.
    pub stat_err: &'a [f64],
    /// Systematic uncertainty of `unfolded`.
    pub sys_err: &'a [f64],
    /// Test statistic of this iteration.
    pub ts: f64,
    /// Stopping threshold.
    pub ts_stopping: f64,
    /// Name of the test statistic.
    pub ts_name: &'a str,
}

/// Observes each iteration. Returning an error aborts the run.
pub trait Observer: Send + Sync {
    /// Called once per iteration after the stopping decision.
    fn on_iteration(&self, snapshot: &IterationSnapshot<'_>) -> Result<()>;
}

/// Emits one `log::info!` line per iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger;

impl Observer for Logger {
    fn on_iteration(&self, s: &IterationSnapshot<'_>) -> Result<()> {
        log::info!(
            "Iteration {}: ts = {:.4e}, ts_stopping = {} ({}, {})",
            s.iteration,
            s.ts,
            s.ts_stopping,
            s.ts_name,
            s.state
        );
        Ok(())
    }
}

/// A pipeline stage.
pub enum Callback {
    /// Built-in iteration logger.
    Logger(Logger),
    /// Built-in spline regularizer.
    Spline(SplineRegularizer),
    /// Custom regularizer.
    Regularizer(Box<dyn Regularizer>),
    /// Custom observer.
    Observer(Box<dyn Observer>),
}

impl Callback {
    /// Regularization stage, if this callback is one.
    pub fn as_regularizer(&self) -> Option<&dyn Regularizer> {
        match self {
            Callback::Spline(r) => Some(r),
            Callback::Regularizer(r) => Some(r.as_ref()),
            _ => None,
        }
    }

    /// Observation stage, if this callback is one.
    pub fn as_observer(&self) -> Option<&dyn Observer> {
        match self {
            Callback::Logger(l) => Some(l),
            Callback::Observer(o) => Some(o.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Logger(_) => write!(f, "Callback::Logger"),
            Callback::Spline(r) => write!(f, "Callback::Spline({:?})", r.spline()),
            Callback::Regularizer(r) => write!(f, "Callback::Regularizer({})", r.name()),
            Callback::Observer(_) => write!(f, "Callback::Observer"),
        }
    }
}

impl From<SplineRegularizer> for Callback {
    fn from(r: SplineRegularizer) -> Self {
        Callback::Spline(r)
    }
}

impl From<Logger> for Callback {
    fn from(l: Logger) -> Self {
        Callback::Logger(l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch() {
        let cbs: Vec<Callback> =
            vec![Logger.into(), SplineRegularizer::new(3, 1.0).unwrap().into()];
        assert!(cbs[0].as_observer().is_some());
        assert!(cbs[0].as_regularizer().is_none());
        assert_eq!(cbs[1].as_regularizer().map(|r| r.name()), Some("spline"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!EngineState::Iterating.is_terminal());
        assert!(EngineState::Converged.is_terminal());
        assert!(EngineState::Failed.is_terminal());
        assert_eq!(EngineState::MaxIterationsReached.to_string(), "max_iterations_reached");
    }

    #[test]
    fn test_logger_never_fails() {
        let snap = IterationSnapshot {
            iteration: 1,
            state: EngineState::Iterating,
            unfolded: &[1.0],
            smoothed: &[1.0],
            stat_err: &[1.0],
            sys_err: &[0.0],
            ts: 0.5,
            ts_stopping: 0.01,
            ts_name: "ks",
        };
        assert!(Logger.on_iteration(&snap).is_ok());
    }
}
