//! Core traits, vector wrappers and package initialization.

pub mod init;
pub mod traits;
pub mod wrappers;

pub use init::ensure_initialized;
pub use traits::{Indexing, InnerProduct, MatShape, MatVec, Scalar};
pub use wrappers::DistributedInnerProduct;
