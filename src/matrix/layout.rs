//! Contiguous ownership ranges of a distributed index space.

use crate::error::KError;
use crate::parallel::Comm;

/// Rank `r` owns global indices `ranges[r]..ranges[r + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    ranges: Vec<usize>,
    rank: usize,
}

impl Layout {
    /// Agree on a layout. Either size may be left for the others to determine:
    /// a missing local size splits the global size evenly, a missing global size
    /// is the sum of the local sizes. Inconsistent sizes are a `SizeMismatch`
    /// reported on every rank.
    pub fn new<C: Comm>(comm: &C, local: Option<usize>, global: Option<usize>) -> Result<Self, KError> {
        let (size, rank) = (comm.size(), comm.rank());
        let local = match (local, global) {
            (Some(n), _) => n,
            (None, Some(n)) => n / size + usize::from(rank < n % size),
            (None, None) => {
                return Err(KError::InvalidState("layout needs a local or a global size"));
            }
        };
        let locals = comm.all_gather(&[local])?;
        let mut ranges = Vec::with_capacity(size + 1);
        ranges.push(0);
        for l in locals.iter().flatten() {
            ranges.push(ranges[ranges.len() - 1] + l);
        }
        let total = ranges[size];
        if let Some(g) = global {
            if g != total {
                return Err(KError::SizeMismatch {
                    context: "sum of local sizes vs global size",
                    expected: g,
                    found: total,
                });
            }
        }
        Ok(Self { ranges, rank })
    }

    /// Layout from known per-rank ranges.
    pub fn from_ranges(ranges: Vec<usize>, rank: usize) -> Result<Self, KError> {
        if ranges.len() < 2 || ranges[0] != 0 || ranges.windows(2).any(|w| w[0] > w[1]) {
            return Err(KError::InvalidState("ownership ranges must start at 0 and be non-decreasing"));
        }
        if rank + 1 >= ranges.len() {
            return Err(KError::OutOfRange {
                context: "layout rank",
                index: rank,
                bound: ranges.len() - 1,
            });
        }
        Ok(Self { ranges, rank })
    }

    pub fn start(&self) -> usize {
        self.ranges[self.rank]
    }

    pub fn end(&self) -> usize {
        self.ranges[self.rank + 1]
    }

    pub fn local_size(&self) -> usize {
        self.end() - self.start()
    }

    pub fn global_size(&self) -> usize {
        self.ranges[self.ranges.len() - 1]
    }

    pub fn ranges(&self) -> &[usize] {
        &self.ranges
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn owns(&self, global: usize) -> bool {
        (self.start()..self.end()).contains(&global)
    }

    /// Rank owning `global`.
    pub fn owner(&self, global: usize) -> Result<usize, KError> {
        if global >= self.global_size() {
            return Err(KError::OutOfRange {
                context: "global index",
                index: global,
                bound: self.global_size(),
            });
        }
        Ok(self.ranges.partition_point(|&s| s <= global) - 1)
    }

    /// Same partition of the same index space.
    pub fn congruent(&self, other: &Layout) -> bool {
        self.ranges == other.ranges
    }
}
