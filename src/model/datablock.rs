//! Datablocks: named, ordered collections of categories.
//!
//! The datablock is also the cascade driver. Cross-category writes (linked
//! renames, orphan purges) need simultaneous access to several categories,
//! which the original modeled with sibling pointers inside each category;
//! here the owner drives them instead, capturing victims and key tuples
//! before any child is touched so that all borrows stay sequential.
//! Cascades never cross datablock boundaries.

use std::sync::Arc;

use smol_str::SmolStr;
use tracing::{debug, warn};

use super::category::{Category, CellUpdate};
use super::row::{RowId, RowRef};
use crate::base::{Name, iequals, verbosity};
use crate::condition::{Condition, key};
use crate::dictionary::{Validator, is_empty_value};
use crate::error::{Error, Result};

/// A named, ordered list of categories with case-insensitively unique
/// names.
pub struct Datablock {
    name: Name,
    categories: Vec<Category>,
    validator: Option<Arc<Validator>>,
}

impl Datablock {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            categories: Vec::new(),
            validator: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Categories in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Category> {
        self.categories.iter_mut()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.categories.iter().position(|c| iequals(c.name(), name))
    }

    pub(crate) fn category_at(&self, ix: usize) -> &Category {
        &self.categories[ix]
    }

    pub(crate) fn category_at_mut(&mut self, ix: usize) -> &mut Category {
        &mut self.categories[ix]
    }

    /// Look up a category by name; does not create it.
    pub fn get(&self, name: &str) -> Option<&Category> {
        self.index_of(name).map(|ix| &self.categories[ix])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Category> {
        self.index_of(name).map(move |ix| &mut self.categories[ix])
    }

    /// Get or create a category. Creation attaches the block's validator
    /// and refreshes the link caches of every category, since a new table
    /// may complete a parent–child edge.
    pub fn emplace(&mut self, name: &str) -> (usize, bool) {
        if let Some(ix) = self.index_of(name) {
            return (ix, false);
        }
        let mut category = Category::new(name);
        category.set_validator(self.validator.clone());
        self.categories.push(category);
        self.update_links();
        (self.categories.len() - 1, true)
    }

    /// Get-or-create by name, returning the category itself.
    pub fn category_mut(&mut self, name: &str) -> &mut Category {
        let (ix, _) = self.emplace(name);
        &mut self.categories[ix]
    }

    /// Remove a category entirely. Returns whether it existed.
    pub fn remove_category(&mut self, name: &str) -> bool {
        match self.index_of(name) {
            Some(ix) => {
                self.categories.remove(ix);
                self.update_links();
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Validator plumbing

    pub fn set_validator(&mut self, validator: Option<Arc<Validator>>) {
        self.validator = validator;
        for category in &mut self.categories {
            category.set_validator(self.validator.clone());
        }
        self.update_links();
    }

    pub fn validator(&self) -> Option<&Arc<Validator>> {
        self.validator.as_ref()
    }

    /// Rebuild each category's cached (child, link) and (parent, link)
    /// edges. Only links whose other end exists in this block are kept.
    pub fn update_links(&mut self) {
        for ix in 0..self.categories.len() {
            let (child_links, parent_links) = match &self.validator {
                Some(validator) => {
                    let name = self.categories[ix].name().to_string();
                    let child = validator
                        .links_for_parent(&name)
                        .into_iter()
                        .filter(|l| self.index_of(&l.child_category).is_some())
                        .collect();
                    let parent = validator
                        .links_for_child(&name)
                        .into_iter()
                        .filter(|l| self.index_of(&l.parent_category).is_some())
                        .collect();
                    (child, parent)
                }
                None => (Vec::new(), Vec::new()),
            };
            self.categories[ix].set_links(child_links, parent_links);
        }
    }

    // ------------------------------------------------------------------
    // Cascading writes

    /// Update one cell and propagate the rename into linked child
    /// categories, per the dictionary's link groups. Renames are skipped
    /// when child rows already exist under the new key.
    pub fn update_value(
        &mut self,
        category: &str,
        row: RowId,
        column: &str,
        value: &str,
    ) -> Result<()> {
        let ci = self
            .index_of(category)
            .ok_or_else(|| Error::NotFound(category.to_string()))?;
        let column = self.categories[ci].add_column(column)?;
        let update = self.categories[ci].update_value(row, column, value, true)?;
        if let Some(update) = update {
            self.propagate(ci, row, &[update])?;
        }
        Ok(())
    }

    /// Batch update: all old values are captured before any cell is
    /// written, every cell is written before any rename propagates.
    pub fn assign(
        &mut self,
        category: &str,
        row: RowId,
        values: &[(&str, &str)],
    ) -> Result<()> {
        let ci = self
            .index_of(category)
            .ok_or_else(|| Error::NotFound(category.to_string()))?;
        let mut updates = Vec::new();
        for (column, value) in values {
            let column = self.categories[ci].add_column(column)?;
            if let Some(update) = self.categories[ci].update_value(row, column, value, true)? {
                updates.push(update);
            }
        }
        if !updates.is_empty() {
            self.propagate(ci, row, &updates)?;
        }
        Ok(())
    }

    fn propagate(&mut self, ci: usize, row: RowId, updates: &[CellUpdate]) -> Result<()> {
        if self.validator.is_none() {
            return Ok(());
        }

        // (child category, rows to touch, child column, new value)
        let mut renames: Vec<(usize, Vec<RowId>, SmolStr, SmolStr)> = Vec::new();
        {
            let cat = &self.categories[ci];
            for link in cat.child_links() {
                let Some(child_ix) = self.index_of(&link.child_category) else {
                    continue;
                };
                for update in updates {
                    if !link.parent_keys.iter().any(|pk| iequals(pk, &update.tag)) {
                        continue;
                    }

                    let mut cond_old = Condition::all();
                    let mut cond_new = Condition::all();
                    let mut child_tag = SmolStr::default();
                    for (pk, ck) in link.parent_keys.iter().zip(&link.child_keys) {
                        if iequals(pk, &update.tag) {
                            child_tag = ck.clone();
                            cond_old = cond_old & key(ck.clone()).eq(&update.old);
                            cond_new = cond_new & key(ck.clone()).eq(&update.new);
                        } else {
                            let pv = cat.cell_by_name(row, pk).unwrap_or("");
                            if is_empty_value(pv) {
                                cond_old = cond_old & key(ck.clone()).is_empty();
                                cond_new = cond_new & key(ck.clone()).is_empty();
                            } else {
                                cond_old =
                                    cond_old & (key(ck.clone()).eq(pv) | key(ck.clone()).is_empty());
                                cond_new =
                                    cond_new & (key(ck.clone()).eq(pv) | key(ck.clone()).is_empty());
                            }
                        }
                    }

                    let child = &self.categories[child_ix];
                    let rows = child.find(cond_old);
                    if rows.is_empty() {
                        continue;
                    }
                    if child.exists(cond_new) {
                        if verbosity() > 0 {
                            warn!(
                                parent = %link.parent_category,
                                child = %link.child_category,
                                "will not rename in child category: rows already link to the new value"
                            );
                        }
                        continue;
                    }
                    renames.push((child_ix, rows, child_tag, update.new.clone()));
                }
            }
        }

        // Child renames never cascade further within the same operation.
        for (child_ix, rows, tag, value) in renames {
            let child = &mut self.categories[child_ix];
            let column = child.add_column(&tag)?;
            for rid in rows {
                child.update_value(rid, column, &value, true)?;
            }
        }
        Ok(())
    }

    /// Erase matching rows. With a validator attached, child rows that
    /// lose their last parent are erased too, recursively.
    pub fn erase(&mut self, category: &str, cond: Condition) -> Result<usize> {
        let Some(ci) = self.index_of(category) else {
            return Ok(0);
        };
        let victims = self.categories[ci].find(cond);
        self.erase_cascading(ci, &victims)
    }

    /// Like [`erase`](Self::erase), visiting every directly matched row
    /// before removal. The victim list is frozen before the visitor runs;
    /// rows erased by cascades are not visited.
    pub fn erase_with(
        &mut self,
        category: &str,
        cond: Condition,
        mut visit: impl FnMut(RowRef<'_>),
    ) -> Result<usize> {
        let Some(ci) = self.index_of(category) else {
            return Ok(0);
        };
        let victims = self.categories[ci].find(cond);
        for &id in &victims {
            visit(self.categories[ci].row(id));
        }
        self.erase_cascading(ci, &victims)
    }

    fn erase_cascading(&mut self, ci: usize, victims: &[RowId]) -> Result<usize> {
        // Capture the child-side key tuples before the parent rows go.
        let mut jobs: Vec<(SmolStr, Vec<(SmolStr, SmolStr)>)> = Vec::new();
        if self.validator.is_some() {
            let cat = &self.categories[ci];
            for link in cat.child_links() {
                for &rid in victims {
                    let pairs = link
                        .parent_keys
                        .iter()
                        .zip(&link.child_keys)
                        .map(|(pk, ck)| {
                            (
                                ck.clone(),
                                SmolStr::from(cat.cell_by_name(rid, pk).unwrap_or("")),
                            )
                        })
                        .collect();
                    jobs.push((link.child_category.clone(), pairs));
                }
            }
        }

        let erased = self.categories[ci].erase_rows(victims);

        for (child, pairs) in jobs {
            self.purge_orphans(&child, &pairs)?;
        }
        Ok(erased)
    }

    /// Erase the rows matching the child-key tuple that no longer have a
    /// parent under any link.
    fn purge_orphans(&mut self, child: &str, pairs: &[(SmolStr, SmolStr)]) -> Result<()> {
        let Some(ci) = self.index_of(child) else {
            return Ok(());
        };
        let mut cond = Condition::all();
        for (ck, value) in pairs {
            cond = cond & key(ck.clone()).eq(value);
        }
        let candidates = self.categories[ci].find(cond);
        let orphans: Vec<RowId> = candidates
            .into_iter()
            .filter(|&row| self.row_is_orphan(ci, row))
            .collect();
        if !orphans.is_empty() {
            if verbosity() > 1 {
                debug!(
                    category = child,
                    count = orphans.len(),
                    "removing orphaned rows"
                );
            }
            self.erase_cascading(ci, &orphans)?;
        }
        Ok(())
    }

    fn row_is_orphan(&self, ci: usize, row: RowId) -> bool {
        let cat = &self.categories[ci];
        if cat.cat_validator().is_none() {
            return false;
        }
        for link in cat.parent_links() {
            let Some(pi) = self.index_of(&link.parent_category) else {
                continue;
            };
            let mut cond = Condition::all();
            for (pk, ck) in link.parent_keys.iter().zip(&link.child_keys) {
                let value = cat.cell_by_name(row, ck).unwrap_or("");
                cond = cond & key(pk.clone()).eq(value);
            }
            if self.categories[pi].exists(cond) {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Validation

    /// Validate every category, then maintain `audit_conform`: on success
    /// it is rewritten from the attached dictionary's name and version; on
    /// failure it is dropped.
    pub fn is_valid(&mut self) -> Result<bool> {
        let Some(validator) = self.validator.clone() else {
            return Err(Error::NoValidator);
        };

        let mut result = true;
        for category in &self.categories {
            result = category.is_valid()? && result;
        }

        if result {
            if validator.validator_for_category("audit_conform").is_some() {
                let name = validator.name().to_string();
                let version = validator.version().to_string();
                let audit_conform = self.category_mut("audit_conform");
                audit_conform.clear();
                audit_conform.emplace([("dict_name", name.as_str()), ("dict_version", version.as_str())])?;
            }
        } else {
            self.remove_category("audit_conform");
        }

        Ok(result)
    }

    /// Check every parent–child relation without mutating any row: for
    /// each non-empty child row, either every linked child cell is empty
    /// or a parent row matches (empty child cells are wildcards).
    pub fn validate_links(&self) -> Result<bool> {
        let Some(validator) = &self.validator else {
            return Err(Error::NoValidator);
        };

        let mut result = true;
        for category in &self.categories {
            for link in validator.links_for_child(category.name()) {
                let Some(parent) = self.get(&link.parent_category) else {
                    continue;
                };
                let mut missing = 0usize;
                for row in category.rows() {
                    let mut cond = Condition::all();
                    let mut all_empty = true;
                    for (pk, ck) in link.parent_keys.iter().zip(&link.child_keys) {
                        let value = row.text(ck).unwrap_or("");
                        if !is_empty_value(value) {
                            all_empty = false;
                            cond = cond & key(pk.clone()).eq(value);
                        }
                    }
                    if all_empty {
                        continue;
                    }
                    if !parent.exists(cond) {
                        missing += 1;
                    }
                }
                if missing > 0 {
                    if validator.is_strict() {
                        return Err(Error::link(format!(
                            "{missing} row(s) in {} have no parent in {} (link group {})",
                            category.name(),
                            link.parent_category,
                            link.group_id
                        )));
                    }
                    result = false;
                    if verbosity() > 0 {
                        warn!(
                            child = category.name(),
                            parent = %link.parent_category,
                            group = link.group_id,
                            missing,
                            "rows without a matching parent"
                        );
                    }
                }
            }
        }
        Ok(result)
    }
}

/// Two datablocks are equal when their names match case-insensitively and
/// their non-empty categories match pairwise by name. Category order is
/// irrelevant: a validated write reorders categories topologically.
impl PartialEq for Datablock {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name {
            return false;
        }

        let mut names_a: Vec<&Category> =
            self.categories.iter().filter(|c| !c.is_empty()).collect();
        let mut names_b: Vec<&Category> =
            other.categories.iter().filter(|c| !c.is_empty()).collect();
        if names_a.len() != names_b.len() {
            return false;
        }
        names_a.sort_by(|a, b| a.name().to_ascii_lowercase().cmp(&b.name().to_ascii_lowercase()));
        names_b.sort_by(|a, b| a.name().to_ascii_lowercase().cmp(&b.name().to_ascii_lowercase()));
        names_a
            .iter()
            .zip(&names_b)
            .all(|(a, b)| a == b)
    }
}

impl Eq for Datablock {}

impl std::fmt::Debug for Datablock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datablock")
            .field("name", &self.name)
            .field("categories", &self.categories)
            .finish()
    }
}
