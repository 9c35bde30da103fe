//! One-time package initialization.

use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

static INIT: Once = Once::new();
static READY: AtomicBool = AtomicBool::new(false);

/// Idempotent package setup, called at the top of the public constructors.
pub fn ensure_initialized() {
    INIT.call_once(|| {
        log::debug!(
            "{} {} initialized (rayon: {}, mpi: {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            cfg!(feature = "rayon"),
            cfg!(feature = "mpi"),
        );
        READY.store(true, Ordering::Release);
    });
}

pub fn is_initialized() -> bool {
    READY.load(Ordering::Acquire)
}
