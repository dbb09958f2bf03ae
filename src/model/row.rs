//! Rows and row handles.
//!
//! Row storage is an arena owned by the category: `RowId` is a stable
//! 32-bit index into it, valid until the row is erased. A [`RowRef`] pairs
//! a category borrow with a `RowId` and is the read surface: raw text,
//! typed single-column reads, and typed tuple projections.

use smol_str::SmolStr;

use super::category::Category;
use super::item::Item;
use crate::dictionary::is_empty_value;

/// Stable identifier of a row within its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId(pub(crate) u32);

impl RowId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Backing storage of one row: the present cells, ordered by first
/// assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RowData {
    pub items: Vec<Item>,
}

impl RowData {
    pub fn cell(&self, column: usize) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.column as usize == column)
            .map(|item| item.text.as_str())
    }

    /// Replace or append a cell. Returns the previous text, if any.
    pub fn set_cell(&mut self, column: usize, text: SmolStr) -> Option<SmolStr> {
        for item in &mut self.items {
            if item.column as usize == column {
                return Some(std::mem::replace(&mut item.text, text));
            }
        }
        self.items.push(Item::new(column, text));
        None
    }

    /// Remove a cell entirely. Returns the previous text, if any.
    pub fn remove_cell(&mut self, column: usize) -> Option<SmolStr> {
        let pos = self
            .items
            .iter()
            .position(|item| item.column as usize == column)?;
        Some(self.items.remove(pos).text)
    }
}

/// A read handle onto one row of a category.
#[derive(Clone, Copy)]
pub struct RowRef<'a> {
    pub(crate) category: &'a Category,
    pub(crate) id: RowId,
}

impl<'a> RowRef<'a> {
    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn category(&self) -> &'a Category {
        self.category
    }

    /// Raw cell text by column name; `None` when the cell is absent.
    pub fn text(&self, column: &str) -> Option<&'a str> {
        let ix = self.category.column_ix(column)?;
        self.category.cell(self.id, ix)
    }

    /// Raw cell text by column index.
    pub fn text_at(&self, column: usize) -> Option<&'a str> {
        self.category.cell(self.id, column)
    }

    /// Typed read of a single column. Absent cells and the `.`/`?`
    /// sentinels read as `None`, as does unparsable text.
    pub fn get<T: FromCif>(&self, column: &str) -> Option<T> {
        T::from_cif(self.text(column).unwrap_or(""))
    }

    /// Typed projection of several columns at once:
    ///
    /// ```ignore
    /// let (id, weight): (String, f64) =
    ///     row.get_tuple(&["id", "formula_weight"])?;
    /// ```
    ///
    /// The slice length must equal the tuple arity.
    pub fn get_tuple<T: TupleProject>(&self, columns: &[&str]) -> Option<T> {
        debug_assert_eq!(columns.len(), T::ARITY, "column count != tuple arity");
        T::project(self, columns)
    }

    /// The present cells as (column name, text) pairs, in first-seen order.
    pub fn items(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.category.row_items(self.id)
    }
}

/// Conversion from CIF cell text.
pub trait FromCif: Sized {
    fn from_cif(text: &str) -> Option<Self>;
}

impl FromCif for String {
    fn from_cif(text: &str) -> Option<Self> {
        if is_empty_value(text) {
            None
        } else {
            Some(text.to_string())
        }
    }
}

impl FromCif for SmolStr {
    fn from_cif(text: &str) -> Option<Self> {
        if is_empty_value(text) {
            None
        } else {
            Some(SmolStr::from(text))
        }
    }
}

impl FromCif for bool {
    fn from_cif(text: &str) -> Option<Self> {
        match text {
            "y" | "Y" | "yes" | "YES" | "Yes" | "1" => Some(true),
            "n" | "N" | "no" | "NO" | "No" | "0" => Some(false),
            _ => None,
        }
    }
}

macro_rules! from_cif_via_parse {
    ($($ty:ty),*) => {
        $(
            impl FromCif for $ty {
                fn from_cif(text: &str) -> Option<Self> {
                    if is_empty_value(text) {
                        None
                    } else {
                        text.parse().ok()
                    }
                }
            }
        )*
    };
}

from_cif_via_parse!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

/// An `Option<T>` never fails: absent or unparsable cells read as `None`.
impl<T: FromCif> FromCif for Option<T> {
    fn from_cif(text: &str) -> Option<Self> {
        Some(T::from_cif(text))
    }
}

/// Tuple projections for [`RowRef::get_tuple`].
pub trait TupleProject: Sized {
    const ARITY: usize;
    fn project(row: &RowRef<'_>, columns: &[&str]) -> Option<Self>;
}

macro_rules! tuple_project {
    ($arity:literal => $($ty:ident . $ix:tt),+) => {
        impl<$($ty: FromCif),+> TupleProject for ($($ty,)+) {
            const ARITY: usize = $arity;

            fn project(row: &RowRef<'_>, columns: &[&str]) -> Option<Self> {
                Some(($($ty::from_cif(row.text(columns[$ix]).unwrap_or(""))?,)+))
            }
        }
    };
}

tuple_project!(1 => A.0);
tuple_project!(2 => A.0, B.1);
tuple_project!(3 => A.0, B.1, C.2);
tuple_project!(4 => A.0, B.1, C.2, D.3);
tuple_project!(5 => A.0, B.1, C.2, D.3, E.4);
tuple_project!(6 => A.0, B.1, C.2, D.3, E.4, F.5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_data_set_and_remove() {
        let mut row = RowData::default();
        assert_eq!(row.set_cell(2, SmolStr::from("a")), None);
        assert_eq!(row.set_cell(0, SmolStr::from("b")), None);
        assert_eq!(row.set_cell(2, SmolStr::from("c")), Some(SmolStr::from("a")));
        assert_eq!(row.cell(2), Some("c"));
        assert_eq!(row.cell(1), None);
        assert_eq!(row.remove_cell(0), Some(SmolStr::from("b")));
        assert_eq!(row.cell(0), None);
    }

    #[test]
    fn test_cells_keep_first_seen_order() {
        let mut row = RowData::default();
        row.set_cell(3, SmolStr::from("x"));
        row.set_cell(1, SmolStr::from("y"));
        row.set_cell(3, SmolStr::from("z"));
        let columns: Vec<u32> = row.items.iter().map(|item| item.column).collect();
        assert_eq!(columns, [3, 1]);
    }

    #[test]
    fn test_from_cif_conversions() {
        assert_eq!(i32::from_cif("-42"), Some(-42));
        assert_eq!(f64::from_cif("2.5"), Some(2.5));
        assert_eq!(String::from_cif("HEM"), Some("HEM".to_string()));
        assert_eq!(String::from_cif("?"), None);
        assert_eq!(String::from_cif("."), None);
        assert_eq!(bool::from_cif("yes"), Some(true));
        assert_eq!(bool::from_cif("N"), Some(false));
        assert_eq!(<Option<i32>>::from_cif("?"), Some(None));
        assert_eq!(<Option<i32>>::from_cif("7"), Some(Some(7)));
    }
}
