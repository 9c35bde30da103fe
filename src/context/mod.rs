//! Context module: solver handles that bundle an operator, a preconditioner and
//! solver options.
//!
//! Modules:
//! - [`ksp_context`]: the `KspContext` FGMRES handle and the `PC` attachment enum.

pub mod ksp_context;
pub use ksp_context::{KspContext, PC};
