//! The category store: an ordered table of sparse rows.
//!
//! Rows live in an arena (`Vec<Option<RowData>>`) addressed by stable
//! [`RowId`]s; a separate order vector preserves insertion order across
//! erasure of other rows. Columns are added on demand and compared
//! case-insensitively. When a validator is attached, the category resolves
//! its category validator, per-column item validators, key columns and a
//! key index for single-hit lookups, plus the cached parent/child link
//! edges used by the datablock's cascade driver.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::{debug, warn};

use super::row::{RowData, RowId, RowRef};
use crate::base::{Name, fold_name, iequals, verbosity};
use crate::condition::Condition;
use crate::dictionary::{
    CategoryValidator, ItemValidator, LinkValidator, Primitive, Validator, is_empty_value,
};
use crate::error::{Error, Result};
use crate::parser::is_non_blank;

/// A column: its name and, when a validator is attached, the item
/// validator governing its values.
#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub name: Name,
    pub validator: Option<Arc<ItemValidator>>,
}

/// The outcome of a cell write that actually changed something; the
/// datablock uses it to drive link-preserving renames.
#[derive(Debug, Clone)]
pub(crate) struct CellUpdate {
    pub tag: SmolStr,
    pub old: SmolStr,
    pub new: SmolStr,
}

/// A named table of rows.
pub struct Category {
    name: Name,
    /// Folded name → column, ordered by first assignment; the map index is
    /// the column's fixed small-integer index (columns are never removed).
    columns: IndexMap<SmolStr, Column>,
    rows: Vec<Option<RowData>>,
    order: Vec<RowId>,
    validator: Option<Arc<Validator>>,
    cat_validator: Option<Arc<CategoryValidator>>,
    /// Key tuple → row, for the single-hit fast path. Present only when a
    /// category validator declares keys.
    key_index: Option<FxHashMap<Vec<SmolStr>, RowId>>,
    /// Links in which this category is the parent / the child; rebuilt by
    /// the owning datablock.
    child_links: Vec<Arc<LinkValidator>>,
    parent_links: Vec<Arc<LinkValidator>>,
}

impl Category {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            rows: Vec::new(),
            order: Vec::new(),
            validator: None,
            cat_validator: None,
            key_index: None,
            child_links: Vec::new(),
            parent_links: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // ------------------------------------------------------------------
    // Columns

    /// Column names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.values().map(|c| c.name.as_str())
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of a column, without creating it.
    pub fn column_ix(&self, name: &str) -> Option<usize> {
        self.columns.get_index_of(fold_name(name).as_str())
    }

    pub(crate) fn column_name(&self, ix: usize) -> &str {
        self.columns[ix].name.as_str()
    }

    pub(crate) fn column_validator(&self, ix: usize) -> Option<&Arc<ItemValidator>> {
        self.columns
            .get_index(ix)
            .and_then(|(_, c)| c.validator.as_ref())
    }

    /// The DDL primitive governing comparisons on a column; `char` when no
    /// validator applies.
    pub(crate) fn column_primitive(&self, ix: usize) -> Primitive {
        self.column_validator(ix)
            .map(|iv| iv.primitive())
            .unwrap_or_default()
    }

    /// Add a column if it does not exist yet; idempotent. The name must
    /// satisfy the item-name grammar.
    pub fn add_column(&mut self, name: &str) -> Result<usize> {
        if let Some(ix) = self.column_ix(name) {
            return Ok(ix);
        }
        if name.is_empty() || !name.bytes().all(is_non_blank) {
            return Err(Error::InvalidName(name.to_string()));
        }

        let validator = self
            .cat_validator
            .as_ref()
            .and_then(|cv| cv.item_validator(name))
            .cloned();
        let (ix, _) = self.columns.insert_full(
            fold_name(name),
            Column {
                name: Name::new(name),
                validator,
            },
        );

        // A key column appearing late changes every row's index tuple.
        if self
            .cat_validator
            .as_ref()
            .is_some_and(|cv| cv.is_key(name))
        {
            self.rebuild_index();
        }

        Ok(ix)
    }

    // ------------------------------------------------------------------
    // Rows

    /// Append an empty row.
    pub(crate) fn new_row(&mut self) -> RowId {
        let id = RowId(self.rows.len() as u32);
        self.rows.push(Some(RowData::default()));
        self.order.push(id);
        id
    }

    /// Append a row and fill it from (column, value) pairs. Values route
    /// through the validating write path; on failure the row is removed
    /// again.
    pub fn emplace<K, V, I>(&mut self, values: I) -> Result<RowId>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let id = self.new_row();
        for (name, value) in values {
            let column = match self.add_column(name.as_ref()) {
                Ok(column) => column,
                Err(err) => {
                    self.erase_rows(&[id]);
                    return Err(err);
                }
            };
            if let Err(err) = self.update_value(id, column, value.as_ref(), true) {
                self.erase_rows(&[id]);
                return Err(err);
            }
        }
        self.index_row(id);
        Ok(id)
    }

    /// Read handle for a row id.
    pub fn row(&self, id: RowId) -> RowRef<'_> {
        RowRef { category: self, id }
    }

    /// Live rows in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.order.iter().map(|&id| RowRef { category: self, id })
    }

    pub fn first(&self) -> Option<RowRef<'_>> {
        self.order.first().map(|&id| RowRef { category: self, id })
    }

    pub(crate) fn row_ids(&self) -> &[RowId] {
        &self.order
    }

    /// Raw cell text, `None` when absent or when the row has been erased.
    pub(crate) fn cell(&self, row: RowId, column: usize) -> Option<&str> {
        self.rows
            .get(row.index())
            .and_then(|r| r.as_ref())
            .and_then(|r| r.cell(column))
    }

    /// Cell text for matching: absent cells read as "".
    pub(crate) fn cell_text(&self, row: RowId, column: usize) -> &str {
        self.cell(row, column).unwrap_or("")
    }

    pub(crate) fn cell_by_name(&self, row: RowId, column: &str) -> Option<&str> {
        self.column_ix(column).and_then(|ix| self.cell(row, ix))
    }

    pub(crate) fn row_items(&self, row: RowId) -> impl Iterator<Item = (&str, &str)> {
        self.rows
            .get(row.index())
            .and_then(|r| r.as_ref())
            .into_iter()
            .flat_map(|r| {
                r.items
                    .iter()
                    .map(|item| (self.column_name(item.column as usize), item.text.as_str()))
            })
    }

    // ------------------------------------------------------------------
    // The central write path

    /// Update one cell.
    ///
    /// Steps: no-op when unchanged; validate against the column's item
    /// validator; maintain the key index around the write; an empty new
    /// value removes the cell entirely. Returns what changed so the owner
    /// can propagate linked renames; this method itself never cascades.
    pub(crate) fn update_value(
        &mut self,
        row: RowId,
        column: usize,
        value: &str,
        validate: bool,
    ) -> Result<Option<CellUpdate>> {
        let old = self.cell(row, column).unwrap_or("").to_owned();
        if old == value {
            return Ok(None);
        }

        if validate {
            if let Some(iv) = self.column_validator(column) {
                iv.validate(value)?;
            }
        }

        let is_key = self.is_key_column(column);
        if is_key {
            self.unindex_row(row);
        }

        let Some(data) = self.rows.get_mut(row.index()).and_then(|r| r.as_mut()) else {
            return Err(Error::NotFound(self.name.to_string()));
        };
        if value.is_empty() {
            data.remove_cell(column);
        } else {
            data.set_cell(column, SmolStr::from(value));
        }

        if is_key {
            self.index_row(row);
        }

        Ok(Some(CellUpdate {
            tag: SmolStr::from(self.column_name(column)),
            old: SmolStr::from(old),
            new: SmolStr::from(value),
        }))
    }

    /// Assign one cell by column name, adding the column on first use.
    /// This is the non-cascading write; use [`Datablock::update_value`] to
    /// propagate into linked child categories.
    ///
    /// [`Datablock::update_value`]: super::Datablock::update_value
    pub fn assign(&mut self, row: RowId, column: &str, value: &str) -> Result<()> {
        let ix = self.add_column(column)?;
        self.update_value(row, ix, value, true)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries

    /// All rows matching the condition, in row order. A full-key equality
    /// resolves through the key index without scanning.
    pub fn find(&self, cond: Condition) -> Vec<RowId> {
        let prepared = cond.prepare(self);
        if let Some(hit) = prepared.as_single_hit() {
            return hit.into_iter().collect();
        }
        self.order
            .iter()
            .copied()
            .filter(|&id| prepared.matches(self, id))
            .collect()
    }

    /// Exactly one matching row.
    pub fn find1(&self, cond: Condition) -> Result<RowId> {
        let mut rows = self.find(cond).into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            (None, _) => Err(Error::NotFound(self.name.to_string())),
            (Some(_), Some(_)) => Err(Error::Ambiguous(self.name.to_string())),
        }
    }

    pub fn count(&self, cond: Condition) -> usize {
        self.find(cond).len()
    }

    pub fn exists(&self, cond: Condition) -> bool {
        !self.find(cond).is_empty()
    }

    pub fn contains(&self, cond: Condition) -> bool {
        self.exists(cond)
    }

    // ------------------------------------------------------------------
    // Erasure

    /// Erase matching rows; returns how many were erased. This is the
    /// non-cascading erase; [`Datablock::erase`] additionally purges
    /// orphaned child rows when a validator is attached.
    ///
    /// [`Datablock::erase`]: super::Datablock::erase
    pub fn erase(&mut self, cond: Condition) -> usize {
        let victims = self.find(cond);
        self.erase_rows(&victims)
    }

    /// Like [`erase`](Self::erase), calling `visit` on every victim before
    /// any row is removed. The victim list is frozen up front.
    pub fn erase_with(&mut self, cond: Condition, mut visit: impl FnMut(RowRef<'_>)) -> usize {
        let victims = self.find(cond);
        for &id in &victims {
            visit(RowRef { category: self, id });
        }
        self.erase_rows(&victims)
    }

    /// Remove every row, keeping columns and validator attachment.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.order.clear();
        if let Some(index) = self.key_index.as_mut() {
            index.clear();
        }
    }

    pub(crate) fn erase_rows(&mut self, victims: &[RowId]) -> usize {
        let mut erased = 0;
        for &id in victims {
            if self.rows.get(id.index()).is_none_or(|r| r.is_none()) {
                continue;
            }
            self.unindex_row(id);
            self.rows[id.index()] = None;
            erased += 1;
        }
        if erased > 0 {
            let rows = &self.rows;
            self.order.retain(|o| rows[o.index()].is_some());
        }
        erased
    }

    // ------------------------------------------------------------------
    // Validator attachment

    pub(crate) fn set_validator(&mut self, validator: Option<Arc<Validator>>) {
        self.cat_validator = validator
            .as_ref()
            .and_then(|v| v.validator_for_category(self.name.as_str()))
            .cloned();
        self.validator = validator;

        for column in self.columns.values_mut() {
            column.validator = self
                .cat_validator
                .as_ref()
                .and_then(|cv| cv.item_validator(column.name.as_str()))
                .cloned();
        }

        self.rebuild_index();
    }

    pub fn cat_validator(&self) -> Option<&Arc<CategoryValidator>> {
        self.cat_validator.as_ref()
    }

    pub(crate) fn set_links(
        &mut self,
        child_links: Vec<Arc<LinkValidator>>,
        parent_links: Vec<Arc<LinkValidator>>,
    ) {
        self.child_links = child_links;
        self.parent_links = parent_links;
    }

    pub(crate) fn child_links(&self) -> &[Arc<LinkValidator>] {
        &self.child_links
    }

    pub(crate) fn parent_links(&self) -> &[Arc<LinkValidator>] {
        &self.parent_links
    }

    // ------------------------------------------------------------------
    // Key index

    fn key_column_names(&self) -> &[SmolStr] {
        self.cat_validator
            .as_ref()
            .map(|cv| cv.keys.as_slice())
            .unwrap_or(&[])
    }

    fn is_key_column(&self, column: usize) -> bool {
        let name = self.columns[column].name.as_str();
        self.cat_validator
            .as_ref()
            .is_some_and(|cv| cv.is_key(name))
    }

    /// Resolved key column indices; a key column that does not exist yet
    /// reads as empty in every tuple.
    pub(crate) fn key_column_ixs(&self) -> Vec<Option<usize>> {
        self.key_column_names()
            .iter()
            .map(|k| self.column_ix(k))
            .collect()
    }

    fn key_tuple(&self, row: RowId) -> Vec<SmolStr> {
        self.key_column_ixs()
            .iter()
            .map(|col| match col {
                Some(ix) => normalize_key(self.column_primitive(*ix), self.cell_text(row, *ix)),
                None => SmolStr::default(),
            })
            .collect()
    }

    pub(crate) fn rebuild_index(&mut self) {
        if self.key_column_names().is_empty() {
            self.key_index = None;
            return;
        }
        let mut index = FxHashMap::default();
        for &id in &self.order {
            let tuple = self.key_tuple(id);
            if index.insert(tuple, id).is_some() && verbosity() > 0 {
                warn!(category = %self.name, "duplicate key tuple while indexing");
            }
        }
        self.key_index = Some(index);
    }

    fn index_row(&mut self, row: RowId) {
        if self.key_index.is_none() {
            return;
        }
        let tuple = self.key_tuple(row);
        if let Some(index) = self.key_index.as_mut() {
            match index.get(&tuple) {
                Some(&existing) if existing == row => {}
                Some(_) => {
                    if verbosity() > 0 {
                        warn!(category = %self.name, "duplicate key tuple while indexing");
                    }
                    index.insert(tuple, row);
                }
                None => {
                    index.insert(tuple, row);
                }
            }
        }
    }

    fn unindex_row(&mut self, row: RowId) {
        if self.key_index.is_none() {
            return;
        }
        let tuple = self.key_tuple(row);
        if let Some(index) = self.key_index.as_mut() {
            if index.get(&tuple) == Some(&row) {
                index.remove(&tuple);
            }
        }
    }

    /// Look up a row by a full set of (key column name, value) pairs.
    /// Returns `None` when no index exists or the tuple is absent.
    pub(crate) fn index_lookup(&self, values: &[(&str, &str)]) -> Option<Option<RowId>> {
        let index = self.key_index.as_ref()?;
        let keys = self.key_column_names();
        if values.len() != keys.len() {
            return None;
        }
        let mut tuple = Vec::with_capacity(keys.len());
        for key in keys {
            let (_, value) = values
                .iter()
                .find(|(name, _)| iequals(name, key.as_str()))?;
            let primitive = match self.column_ix(key) {
                Some(ix) => self.column_primitive(ix),
                None => Primitive::default(),
            };
            tuple.push(normalize_key(primitive, value));
        }
        Some(index.get(&tuple).copied())
    }

    // ------------------------------------------------------------------
    // Validation

    /// Check every row against the attached dictionary: known columns,
    /// mandatory fields present, and every value passing its item
    /// validator. Problems are reported through the validator, so in
    /// strict mode the first one is an error; otherwise they are logged
    /// and `Ok(false)` is returned.
    pub fn is_valid(&self) -> Result<bool> {
        let Some(validator) = &self.validator else {
            return Err(Error::NoValidator);
        };

        if self.is_empty() {
            if verbosity() > 2 {
                debug!(category = %self.name, "skipping validation of empty category");
            }
            return Ok(true);
        }

        let Some(cv) = &self.cat_validator else {
            validator.report_error(format!("undefined category {}", self.name), false)?;
            return Ok(false);
        };

        let mut result = true;

        for column in self.columns.values() {
            if cv.item_validator(column.name.as_str()).is_none() {
                validator.report_error(
                    format!(
                        "field {} is not valid in category {}",
                        column.name, self.name
                    ),
                    false,
                )?;
                result = false;
            }
        }

        let mut missing: Vec<&str> = cv
            .mandatory_fields
            .iter()
            .filter(|m| self.column_ix(m).is_none())
            .map(|m| m.as_str())
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            validator.report_error(
                format!(
                    "in category {} the following mandatory fields are missing: {}",
                    self.name,
                    missing.join(", ")
                ),
                false,
            )?;
            result = false;
        }

        for &row in &self.order {
            for (ix, column) in self.columns.values().enumerate() {
                let Some(iv) = &column.validator else { continue };
                match self.cell(row, ix) {
                    Some(text) => {
                        if let Err(err) = iv.validate(text) {
                            validator.report_error(err.to_string(), false)?;
                            result = false;
                        }
                    }
                    None if iv.mandatory => {
                        validator.report_error(
                            format!(
                                "missing mandatory field {} for category {}",
                                column.name, self.name
                            ),
                            false,
                        )?;
                        result = false;
                    }
                    None => {}
                }
            }
        }

        Ok(result)
    }
}

/// Canonical form of a key cell for hashing: type-aware so that the index
/// agrees with `compare_values`.
fn normalize_key(primitive: Primitive, text: &str) -> SmolStr {
    if is_empty_value(text) {
        return SmolStr::default();
    }
    match primitive {
        Primitive::Char => SmolStr::from(text),
        Primitive::UChar => {
            let mut out = String::with_capacity(text.len());
            let mut last_space = false;
            for b in text.bytes() {
                if b == b' ' {
                    if !last_space {
                        out.push(' ');
                    }
                    last_space = true;
                } else {
                    out.push(b.to_ascii_lowercase() as char);
                    last_space = false;
                }
            }
            SmolStr::from(out)
        }
        Primitive::Numb => match crate::dictionary::strip_esd(text).parse::<f64>() {
            Ok(v) => SmolStr::from(format!("{v}")),
            Err(_) => SmolStr::from(text),
        },
    }
}

/// Two categories are equal when their names match case-insensitively and
/// their row multisets match after key alignment. Absent cells and `?`
/// compare as the same thing, since the writer emits one as the other.
impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name {
            return false;
        }
        let mut a = self.row_snapshots();
        let mut b = other.row_snapshots();
        a.sort();
        b.sort();
        a == b
    }
}

impl Eq for Category {}

impl Category {
    fn row_snapshots(&self) -> Vec<Vec<(SmolStr, SmolStr)>> {
        self.order
            .iter()
            .map(|&row| {
                let mut cells: Vec<(SmolStr, SmolStr)> = self
                    .row_items(row)
                    .filter(|(_, text)| !text.is_empty() && *text != "?")
                    .map(|(name, text)| (fold_name(name), SmolStr::from(text)))
                    .collect();
                cells.sort();
                cells
            })
            .collect()
    }
}

impl std::fmt::Debug for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Category")
            .field("name", &self.name)
            .field("columns", &self.columns.len())
            .field("rows", &self.order.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::key;

    fn sample() -> Category {
        let mut cat = Category::new("entity");
        cat.emplace([("id", "1"), ("type", "polymer")]).unwrap();
        cat.emplace([("id", "2"), ("type", "non-polymer")]).unwrap();
        cat.emplace([("id", "3"), ("type", "water")]).unwrap();
        cat
    }

    #[test]
    fn test_columns_are_case_insensitive_and_idempotent() {
        let mut cat = Category::new("t");
        let a = cat.add_column("Cartn_x").unwrap();
        let b = cat.add_column("cartn_X").unwrap();
        assert_eq!(a, b);
        assert_eq!(cat.column_count(), 1);
        assert_eq!(cat.columns().next(), Some("Cartn_x"));
    }

    #[test]
    fn test_invalid_column_name() {
        let mut cat = Category::new("t");
        assert!(matches!(
            cat.add_column("has space"),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(cat.add_column(""), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_emplace_and_find() {
        let cat = sample();
        assert_eq!(cat.len(), 3);
        let rows = cat.find(key("type").eq("water"));
        assert_eq!(rows.len(), 1);
        assert_eq!(cat.row(rows[0]).text("id"), Some("3"));
    }

    #[test]
    fn test_find1_contract() {
        let mut cat = sample();
        assert!(cat.find1(key("id").eq("2")).is_ok());
        assert!(matches!(
            cat.find1(key("id").eq("9")),
            Err(Error::NotFound(_))
        ));
        cat.emplace([("id", "2"), ("type", "dup")]).unwrap();
        assert!(matches!(
            cat.find1(key("id").eq("2")),
            Err(Error::Ambiguous(_))
        ));
    }

    #[test]
    fn test_erase_keeps_order_of_other_rows() {
        let mut cat = sample();
        assert_eq!(cat.erase(key("id").eq("2")), 1);
        let ids: Vec<_> = cat.rows().map(|r| r.text("id").unwrap()).collect();
        assert_eq!(ids, ["1", "3"]);
    }

    #[test]
    fn test_erase_with_visits_before_removal() {
        let mut cat = sample();
        let mut seen = Vec::new();
        cat.erase_with(key("id").ne("2"), |row| {
            seen.push(row.text("id").unwrap().to_string());
        });
        assert_eq!(seen, ["1", "3"]);
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn test_update_value_empty_removes_cell() {
        let mut cat = sample();
        let row = cat.find1(key("id").eq("1")).unwrap();
        cat.assign(row, "type", "").unwrap();
        assert_eq!(cat.row(row).text("type"), None);
    }

    #[test]
    fn test_assign_adds_column_on_write() {
        let mut cat = sample();
        let row = cat.find1(key("id").eq("1")).unwrap();
        cat.assign(row, "details", "some detail").unwrap();
        assert_eq!(cat.row(row).text("details"), Some("some detail"));
    }

    #[test]
    fn test_equality_ignores_row_and_column_order() {
        let mut a = Category::new("entity");
        a.emplace([("id", "1"), ("type", "polymer")]).unwrap();
        a.emplace([("id", "2"), ("type", "water")]).unwrap();

        let mut b = Category::new("ENTITY");
        b.emplace([("type", "water"), ("id", "2")]).unwrap();
        b.emplace([("type", "polymer"), ("id", "1")]).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_treats_question_mark_as_absent() {
        let mut a = Category::new("t");
        a.emplace([("x", "1"), ("y", "?")]).unwrap();
        let mut b = Category::new("t");
        b.emplace([("x", "1")]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_typed_projection() {
        let cat = sample();
        let row = cat.first().unwrap();
        let (id, kind): (u32, String) = row.get_tuple(&["id", "type"]).unwrap();
        assert_eq!(id, 1);
        assert_eq!(kind, "polymer");
    }
}
