//! Shared solver utilities.

pub mod convergence;

pub use convergence::{ConvergedReason, Convergence, DivergedReason, SolveStats};
