//! kryst-dist: distributed sparse products, block LU/ILU and flexible GMRES.
//!
//! The crate provides a row-distributed sparse matrix with a two-phase
//! (symbolic, then numeric) matrix–matrix product, a block sparse LU/ILU(k)
//! factorization with fixed block size, and a restarted flexible GMRES solver
//! that runs unchanged over a single address space or a communicator.

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod factor;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use self::core::*;
pub use error::*;
pub use factor::{BlockFactor, FactorInfo, FactorStorage, apply_factor, factor_numeric, factor_symbolic};
pub use matrix::*;
pub use parallel::{Comm, SerialComm, ThreadComm};
pub use preconditioner::*;
pub use solver::*;
pub use utils::*;
