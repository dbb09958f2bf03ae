//! Case-insensitive names.
//!
//! CIF identifiers (datablock, category and item names) preserve the case
//! they were written in, but compare and hash case-insensitively. `Name`
//! keeps the original spelling for round-trip fidelity and folds on the fly
//! for comparisons, so a `Name` can be used directly as a map key without a
//! separate lower-cased shadow string.

use std::fmt;
use std::hash::{Hash, Hasher};

use smol_str::SmolStr;

/// A case-preserving identifier with case-insensitive equality, ordering
/// and hashing. CIF is ASCII by contract, so folding is ASCII-only.
#[derive(Clone, Default)]
pub struct Name {
    text: SmolStr,
}

impl Name {
    pub fn new(text: impl Into<SmolStr>) -> Self {
        Self { text: text.into() }
    }

    /// The original spelling.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The lower-cased shadow key, allocated on demand.
    pub fn folded(&self) -> SmolStr {
        fold_name(&self.text)
    }
}

/// Lower-case an ASCII name for use as a shadow map key.
pub fn fold_name(s: &str) -> SmolStr {
    if s.bytes().any(|b| b.is_ascii_uppercase()) {
        SmolStr::from(s.to_ascii_lowercase())
    } else {
        SmolStr::from(s)
    }
}

/// Case-insensitive ASCII string equality.
pub fn iequals(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        iequals(&self.text, &other.text)
    }
}

impl Eq for Name {}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        iequals(&self.text, other)
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let a = self.text.bytes().map(|b| b.to_ascii_lowercase());
        let b = other.text.bytes().map(|b| b.to_ascii_lowercase());
        a.cmp(b)
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.text.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.text, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name::new(s)
    }
}
