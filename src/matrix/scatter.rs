//! Ghost-value gather for the off-diagonal columns of a distributed matrix.

use crate::core::traits::Scalar;
use crate::error::KError;
use crate::matrix::layout::Layout;
use crate::parallel::Comm;

/// Communication plan that fills `ghost[k]` with the owned value of global index `garray[k]`.
///
/// The plan is built once per off-diagonal pattern; every gather afterwards is a
/// single sparse exchange of values.
#[derive(Debug, Clone)]
pub struct GhostScatter {
    /// Per owner rank, the ghost slots filled by its reply, in reply order.
    recv_slots: Vec<Vec<usize>>,
    /// Per requesting rank, the owned local indices to send.
    send_local: Vec<Vec<usize>>,
    nghost: usize,
}

impl GhostScatter {
    pub fn new<C: Comm>(comm: &C, layout: &Layout, garray: &[usize]) -> Result<Self, KError> {
        let size = comm.size();
        let mut requests = vec![Vec::new(); size];
        let mut recv_slots = vec![Vec::new(); size];
        for (slot, &g) in garray.iter().enumerate() {
            let owner = layout.owner(g)?;
            requests[owner].push(g);
            recv_slots[owner].push(slot);
        }
        let incoming = comm.exchange(requests)?;
        let start = layout.start();
        let send_local = incoming
            .into_iter()
            .map(|wanted| {
                wanted
                    .into_iter()
                    .map(|g| {
                        if layout.owns(g) {
                            Ok(g - start)
                        } else {
                            Err(KError::OutOfRange {
                                context: "ghost request for a non-owned index",
                                index: g,
                                bound: layout.end(),
                            })
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            recv_slots,
            send_local,
            nghost: garray.len(),
        })
    }

    pub fn ghost_count(&self) -> usize {
        self.nghost
    }

    /// Number of distinct ranks this rank receives from.
    pub fn neighbours(&self) -> usize {
        self.recv_slots.iter().filter(|s| !s.is_empty()).count()
    }

    pub fn gather<T: Scalar, C: Comm>(&self, comm: &C, owned: &[T], ghost: &mut [T]) -> Result<(), KError> {
        if ghost.len() != self.nghost {
            return Err(KError::SizeMismatch {
                context: "ghost buffer",
                expected: self.nghost,
                found: ghost.len(),
            });
        }
        let outgoing = self
            .send_local
            .iter()
            .map(|idx| idx.iter().map(|&i| owned[i]).collect::<Vec<T>>())
            .collect();
        let incoming = comm.exchange(outgoing)?;
        for (slots, values) in self.recv_slots.iter().zip(incoming) {
            if slots.len() != values.len() {
                return Err(KError::Communication(format!(
                    "ghost reply carried {} values, expected {}",
                    values.len(),
                    slots.len()
                )));
            }
            for (&s, v) in slots.iter().zip(values) {
                ghost[s] = v;
            }
        }
        Ok(())
    }
}
