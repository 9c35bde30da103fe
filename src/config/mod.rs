//! Configuration surfaces.

pub mod options;
pub use options::{FactorOptions, KspOptions, MatOptions};
