//! The process-wide verbosity knob.
//!
//! Diagnostics throughout the crate are gated on a single integer level and
//! emitted through `tracing`:
//!
//! | Level | Meaning |
//! |-------|---------|
//! | 0 | silent (default) |
//! | 1 | warnings |
//! | 2 | operation summaries |
//! | 3 | per-condition rewrites |
//! | 4 | per-validator diagnostics |
//! | 5 | dictionary-load traces |

use std::sync::atomic::{AtomicI32, Ordering};

static VERBOSITY: AtomicI32 = AtomicI32::new(0);

/// Set the global verbosity level (0..5).
pub fn set_verbosity(level: i32) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

/// The current global verbosity level.
pub fn verbosity() -> i32 {
    VERBOSITY.load(Ordering::Relaxed)
}
