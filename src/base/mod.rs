//! Foundation types for the cifkit crate.
//!
//! This module provides the primitives used throughout the library:
//! - [`Name`] - case-preserving, case-insensitively compared identifiers
//! - [`verbosity`], [`set_verbosity`] - the process-wide diagnostics knob
//!
//! This module has NO dependencies on other cifkit modules.

mod name;
mod verbose;

pub use name::{Name, fold_name, iequals};
pub use verbose::{set_verbosity, verbosity};
