//! Sequential block ILU(k) preconditioner.

use crate::config::options::FactorOptions;
use crate::core::traits::Scalar;
use crate::error::KError;
use crate::factor::{BlockFactor, FactorStorage};
use crate::matrix::row_store::RowStore;
use crate::preconditioner::Preconditioner;

/// ILU(k) of a block matrix; `setup` refactors with new values on the same pattern.
#[derive(Debug, Clone)]
pub struct BlockIlu<T> {
    factor: BlockFactor<T>,
}

impl<T: Scalar> BlockIlu<T> {
    pub fn new(a: &RowStore<T>, opts: &FactorOptions) -> Result<Self, KError> {
        let mut factor = BlockFactor::symbolic(FactorStorage::Separate(a), None, opts)?;
        factor.numeric(a)?;
        Ok(Self { factor })
    }

    pub fn factor(&self) -> &BlockFactor<T> {
        &self.factor
    }
}

impl<T: Scalar> Preconditioner<RowStore<T>, Vec<T>> for BlockIlu<T> {
    fn apply(&self, r: &Vec<T>, z: &mut Vec<T>) -> Result<(), KError> {
        self.factor.solve(r, z)
    }

    fn setup(&mut self, a: &RowStore<T>) -> Result<(), KError> {
        self.factor.numeric(a)
    }
}
