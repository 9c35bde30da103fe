//! Options for assembly, factorization and the FGMRES solver.
//!
//! Each options struct has sensible defaults, builder-style setters, and a
//! string surface (`set(key, value)` / `from_pairs`) so that options collected
//! from a command line or a file can be applied in one place. Unknown keys and
//! unparsable values are reported as [`KError::InvalidOption`].

use std::str::FromStr;

use bitflags::bitflags;

use crate::error::KError;
use crate::solver::orthog::{CgsRefinement, Orthog};

bitflags! {
    /// Assembly behaviour switches for sparse matrices.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MatOptions: u32 {
        /// Inserting outside the preallocated pattern is an error instead of a malloc.
        const NEW_NONZERO_ALLOCATION_ERR = 0b001;
        /// Zero values passed to `set_values` are skipped.
        const IGNORE_ZERO_ENTRIES        = 0b010;
        /// Entries for rows owned by other ranks are dropped instead of stashed.
        const IGNORE_OFF_PROC_ENTRIES    = 0b100;
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> KError {
    KError::InvalidOption {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse<V: FromStr>(key: &str, value: &str) -> Result<V, KError> {
    value
        .trim()
        .parse::<V>()
        .map_err(|_| invalid(key, format!("cannot parse {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, KError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(key, format!("expected a boolean, got {other:?}"))),
    }
}

/// FGMRES and convergence-test options.
#[derive(Debug, Clone, PartialEq)]
pub struct KspOptions {
    /// Krylov vectors per cycle before a restart.
    pub restart: usize,
    /// Happy-breakdown tolerance, relative to the current residual estimate.
    pub haptol: f64,
    /// Allocate all `restart + 1` basis vectors up front.
    pub preallocate_vectors: bool,
    /// Basis vectors added each time the storage grows.
    pub delta_allocate: usize,
    pub orthogonalization: Orthog,
    /// Refinement policy used whenever the method is classical Gram–Schmidt.
    pub cgs_refinement: CgsRefinement,
    pub rtol: f64,
    pub atol: f64,
    pub dtol: f64,
    pub max_it: usize,
    /// Preconditioner failures tolerated before the solve is abandoned.
    pub max_pc_failures: usize,
    pub initial_guess_nonzero: bool,
}

impl Default for KspOptions {
    fn default() -> Self {
        Self {
            restart: 30,
            haptol: 1e-30,
            preallocate_vectors: false,
            delta_allocate: 10,
            orthogonalization: Orthog::Classical(CgsRefinement::Never),
            cgs_refinement: CgsRefinement::Never,
            rtol: 1e-5,
            atol: 1e-50,
            dtol: 1e5,
            max_it: 10_000,
            max_pc_failures: 0,
            initial_guess_nonzero: false,
        }
    }
}

impl KspOptions {
    /// Apply one `key = value` setting.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), KError> {
        match key {
            "restart" => {
                let r: usize = parse(key, value)?;
                if r == 0 {
                    return Err(invalid(key, "must be positive"));
                }
                self.restart = r;
            }
            "haptol" => {
                let h: f64 = parse(key, value)?;
                if h < 0.0 {
                    return Err(invalid(key, "must be non-negative"));
                }
                self.haptol = h;
            }
            "preallocate_vectors" => self.preallocate_vectors = parse_bool(key, value)?,
            "delta_allocate" => self.delta_allocate = parse::<usize>(key, value)?.max(1),
            "orthogonalization" => {
                self.orthogonalization = match value.trim() {
                    "classical" => Orthog::Classical(self.cgs_refinement),
                    "modified" => Orthog::Modified,
                    other => return Err(invalid(key, format!("unknown method {other:?}"))),
                }
            }
            "cgs_refinement" => {
                let refinement = match value.trim() {
                    "never" => CgsRefinement::Never,
                    "ifneeded" | "if_needed" => CgsRefinement::IfNeeded,
                    "always" => CgsRefinement::Always,
                    other => return Err(invalid(key, format!("unknown refinement {other:?}"))),
                };
                self.cgs_refinement = refinement;
                if let Orthog::Classical(_) = self.orthogonalization {
                    self.orthogonalization = Orthog::Classical(refinement);
                }
            }
            "rtol" => self.rtol = parse(key, value)?,
            "atol" => self.atol = parse(key, value)?,
            "dtol" => self.dtol = parse(key, value)?,
            "max_it" => self.max_it = parse(key, value)?,
            "max_pc_failures" => self.max_pc_failures = parse(key, value)?,
            "initial_guess_nonzero" => self.initial_guess_nonzero = parse_bool(key, value)?,
            _ => return Err(invalid(key, "unknown key")),
        }
        Ok(())
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, KError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut opts = Self::default();
        for (k, v) in pairs {
            opts.set(k, v)?;
        }
        Ok(opts)
    }
}

/// Block LU / ILU factorization options.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorOptions {
    /// Level of fill; `None` keeps every fill entry (complete LU).
    pub levels: Option<usize>,
    /// Expected ratio of factor nonzeros to matrix nonzeros. A sizing hint only.
    pub fill: f64,
    /// Use partial pivoting when inverting diagonal blocks.
    pub pivot_in_blocks: bool,
    /// Force the diagonal into the pattern of rows that lack it.
    pub diagonal_fill: bool,
    /// Allow the unrolled 4×4 kernel for natural-ordering factorizations.
    pub unrolled_kernels: bool,
}

impl Default for FactorOptions {
    fn default() -> Self {
        Self {
            levels: Some(0),
            fill: 1.0,
            pivot_in_blocks: true,
            diagonal_fill: false,
            unrolled_kernels: true,
        }
    }
}

impl FactorOptions {
    /// ILU(k).
    pub fn ilu(levels: usize) -> Self {
        Self {
            levels: Some(levels),
            ..Self::default()
        }
    }

    /// Complete LU on the matrix pattern closure.
    pub fn lu() -> Self {
        Self {
            levels: None,
            ..Self::default()
        }
    }

    pub fn with_fill(mut self, fill: f64) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_pivot_in_blocks(mut self, pivot: bool) -> Self {
        self.pivot_in_blocks = pivot;
        self
    }

    pub fn with_diagonal_fill(mut self, diagonal_fill: bool) -> Self {
        self.diagonal_fill = diagonal_fill;
        self
    }

    pub fn with_unrolled_kernels(mut self, unrolled: bool) -> Self {
        self.unrolled_kernels = unrolled;
        self
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), KError> {
        match key {
            "levels" => {
                self.levels = match value.trim() {
                    "full" | "lu" => None,
                    v => Some(parse(key, v)?),
                }
            }
            "fill_factor" => {
                let f: f64 = parse(key, value)?;
                if !(f >= 1.0) {
                    return Err(invalid(key, "must be at least 1.0"));
                }
                self.fill = f;
            }
            "pivot_in_blocks" => self.pivot_in_blocks = parse_bool(key, value)?,
            "diagonal_fill" => self.diagonal_fill = parse_bool(key, value)?,
            "unrolled_kernels" => self.unrolled_kernels = parse_bool(key, value)?,
            _ => return Err(invalid(key, "unknown key")),
        }
        Ok(())
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, KError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut opts = Self::default();
        for (k, v) in pairs {
            opts.set(k, v)?;
        }
        Ok(opts)
    }
}
