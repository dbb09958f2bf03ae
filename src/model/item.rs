//! The atomic cell of the store.

use smol_str::SmolStr;

/// One cell: an owned string plus the index of the column it belongs to.
/// Rows are sparse, so a row holds only the items that are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub column: u32,
    pub text: SmolStr,
}

impl Item {
    pub fn new(column: usize, text: impl Into<SmolStr>) -> Self {
        Self {
            column: column as u32,
            text: text.into(),
        }
    }
}
