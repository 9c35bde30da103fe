//! Adapters that turn fixed preconditioners and closures into flexible ones.

use std::marker::PhantomData;

use crate::error::KError;
use crate::preconditioner::{FlexiblePreconditioner, Preconditioner};

/// A fixed preconditioner seen through the flexible interface.
pub struct FixedPreconditioner<'a, P: ?Sized> {
    inner: &'a P,
}

impl<'a, P: ?Sized> FixedPreconditioner<'a, P> {
    pub fn new(inner: &'a P) -> Self {
        Self { inner }
    }
}

impl<'a, M, V, P> FlexiblePreconditioner<M, V> for FixedPreconditioner<'a, P>
where
    P: Preconditioner<M, V> + ?Sized,
{
    fn apply(&mut self, r: &V, z: &mut V) -> Result<(), KError> {
        self.inner.apply(r, z)
    }
}

type ModifyFn<'a> = Box<dyn FnMut(usize, usize, f64) -> Result<(), KError> + 'a>;

/// Flexible preconditioner built from an apply closure and an optional modify hook.
pub struct FnPreconditioner<'a, V, F> {
    apply: F,
    modify: Option<ModifyFn<'a>>,
    _vec: PhantomData<fn(&V)>,
}

impl<'a, V, F> FnPreconditioner<'a, V, F>
where
    F: FnMut(&V, &mut V) -> Result<(), KError>,
{
    pub fn new(apply: F) -> Self {
        Self {
            apply,
            modify: None,
            _vec: PhantomData,
        }
    }

    pub fn with_modify<G>(mut self, modify: G) -> Self
    where
        G: FnMut(usize, usize, f64) -> Result<(), KError> + 'a,
    {
        self.modify = Some(Box::new(modify));
        self
    }
}

impl<'a, M, V, F> FlexiblePreconditioner<M, V> for FnPreconditioner<'a, V, F>
where
    F: FnMut(&V, &mut V) -> Result<(), KError>,
{
    fn apply(&mut self, r: &V, z: &mut V) -> Result<(), KError> {
        (self.apply)(r, z)
    }

    fn modify(&mut self, its: usize, loc_it: usize, res_norm: f64) -> Result<(), KError> {
        match self.modify.as_mut() {
            Some(f) => f(its, loc_it, res_norm),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditioner::Identity;

    #[test]
    fn closure_preconditioner_runs_hook() {
        let mut calls = Vec::new();
        {
            let mut pc = FnPreconditioner::new(|r: &Vec<f64>, z: &mut Vec<f64>| {
                z.iter_mut().zip(r).for_each(|(zi, ri)| *zi = 0.5 * ri);
                Ok(())
            })
            .with_modify(|its, loc, _| {
                calls.push((its, loc));
                Ok(())
            });
            FlexiblePreconditioner::<(), Vec<f64>>::modify(&mut pc, 3, 1, 0.1).unwrap();
            let mut z = vec![0.0; 2];
            FlexiblePreconditioner::<(), Vec<f64>>::apply(&mut pc, &vec![2.0, 4.0], &mut z).unwrap();
            assert_eq!(z, vec![1.0, 2.0]);
        }
        assert_eq!(calls, vec![(3, 1)]);
    }

    #[test]
    fn fixed_adapter_forwards() {
        let id = Identity;
        let mut flex = FixedPreconditioner::new(&id);
        let mut z = vec![0.0; 3];
        FlexiblePreconditioner::<(), Vec<f64>>::apply(&mut flex, &vec![1.0, 2.0, 3.0], &mut z).unwrap();
        assert_eq!(z, vec![1.0, 2.0, 3.0]);
    }
}
