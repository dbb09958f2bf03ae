//! # cifkit
//!
//! Core library for reading, representing, validating and writing files in
//! the STAR/CIF family of structured text formats, with first-class
//! support for the mmCIF variant used in structural biology.
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! writer     → canonical CIF text output
//!   ↓
//! model      → File / Datablock / Category / Row store, cascade driver
//!   ↓
//! dictionary → validators (types, items, categories, links), loader, factory
//!   ↓
//! condition  → row-predicate DSL, key-index optimization
//!   ↓
//! parser     → streaming scanner, SAX-style grammar parser, Sink capability
//!   ↓
//! base       → case-insensitive names, verbosity knob
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use cifkit::{File, key};
//!
//! # fn run() -> cifkit::Result<()> {
//! let mut file = File::load("1abc.cif.gz")?;
//! file.load_dictionary()?;
//!
//! let block = file.first().expect("file has a datablock");
//! let entity = block.get("entity").expect("entity category");
//! for id in entity.find(key("type").eq("polymer")) {
//!     println!("polymer entity {:?}", entity.row(id).text("id"));
//! }
//! # Ok(())
//! # }
//! ```

/// Foundation types: case-insensitive names, verbosity knob
pub mod base;

/// Error/Result types for the whole crate
pub mod error;

/// Parser: streaming scanner, recursive-descent grammar, Sink capability
pub mod parser;

/// Condition DSL: row predicates and their key-index optimization
pub mod condition;

/// Dictionary: schema validators, dictionary loader, validator factory
pub mod dictionary;

/// Model: the in-memory item/row/category/datablock/file store
pub mod model;

/// Writer: canonical CIF text output
pub mod writer;

// Re-export the everyday surface.
pub use base::{Name, iequals, set_verbosity, verbosity};
pub use condition::{Condition, Key, key};
pub use dictionary::{
    CategoryValidator, ItemValidator, LinkValidator, Primitive, TypeValidator, Validator,
    add_data_directory, add_file_resource, validator_for,
};
pub use error::{Error, Result};
pub use model::{Category, Datablock, File, FromCif, RowId, RowRef};
pub use parser::{Parser, Sink, Token, Value, ValueKind};
