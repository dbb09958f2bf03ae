//! Dictionary-driven schema model.
//!
//! A CIF dictionary is itself a CIF file; loading one (see [`loader`])
//! produces a [`Validator`]: a set of type validators (regex + primitive
//! kind), category validators (keys, mandatory fields, item validators) and
//! link validators (parent→child key groups). Validators are immutable once
//! built and shared as `Arc<Validator>` by the process-wide [`factory`].

mod factory;
mod loader;

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::warn;

use crate::base::{fold_name, verbosity};
use crate::error::{Error, Result};

pub use factory::{ValidatorFactory, add_data_directory, add_file_resource, validator_for};
pub use loader::parse_dictionary;

/// The DDL primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Primitive {
    /// Case-sensitive text.
    #[default]
    Char,
    /// Case-insensitive text.
    UChar,
    /// Numbers.
    Numb,
}

impl Primitive {
    pub fn from_code(code: &str) -> Result<Self> {
        if code.eq_ignore_ascii_case("char") {
            Ok(Self::Char)
        } else if code.eq_ignore_ascii_case("uchar") {
            Ok(Self::UChar)
        } else if code.eq_ignore_ascii_case("numb") {
            Ok(Self::Numb)
        } else {
            Err(Error::dictionary(format!(
                "'{code}' is not a known primitive type"
            )))
        }
    }
}

/// Sentinels and absent cells are "empty" for validation, comparison and
/// link matching, while the literal text is preserved in the store.
pub fn is_empty_value(value: &str) -> bool {
    value.is_empty() || value == "." || value == "?"
}

/// Type-aware comparison per the DDL primitive kind.
///
/// Empty values compare less than any non-empty value. `numb` converts both
/// sides to floats; an unparsable side compares less than a parsable one.
/// `uchar` folds case and collapses runs of spaces; `char` is bytewise with
/// the same space collapsing.
pub fn compare_values(primitive: Primitive, a: &str, b: &str) -> Ordering {
    let a = if is_empty_value(a) { "" } else { a };
    let b = if is_empty_value(b) { "" } else { b };
    if a.is_empty() {
        return if b.is_empty() {
            Ordering::Equal
        } else {
            Ordering::Less
        };
    }
    if b.is_empty() {
        return Ordering::Greater;
    }

    match primitive {
        Primitive::Numb => match (strip_esd(a).parse::<f64>(), strip_esd(b).parse::<f64>()) {
            (Ok(da), Ok(db)) => {
                if (da - db).abs() <= f64::EPSILON {
                    Ordering::Equal
                } else if da > db {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (Ok(_), Err(_)) => Ordering::Greater,
            _ => Ordering::Less,
        },
        Primitive::UChar => compare_text(a.as_bytes(), b.as_bytes(), true),
        Primitive::Char => compare_text(a.as_bytes(), b.as_bytes(), false),
    }
}

/// Drop a trailing standard-uncertainty suffix, `1.23(4)` → `1.23`.
pub(crate) fn strip_esd(s: &str) -> &str {
    if s.ends_with(')') {
        if let Some(open) = s.rfind('(') {
            return &s[..open];
        }
    }
    s
}

fn compare_text(a: &[u8], b: &[u8], fold: bool) -> Ordering {
    let mut i = 0;
    let mut j = 0;
    loop {
        if i >= a.len() {
            return if j >= b.len() {
                Ordering::Equal
            } else {
                Ordering::Less
            };
        }
        if j >= b.len() {
            return Ordering::Greater;
        }

        let mut ca = a[i];
        let mut cb = b[j];
        if fold {
            ca = ca.to_ascii_lowercase();
            cb = cb.to_ascii_lowercase();
        }
        match ca.cmp(&cb) {
            Ordering::Equal => {}
            other => return other,
        }

        // CIF collapses runs of spaces for text comparison.
        if ca == b' ' {
            while i + 1 < a.len() && a[i + 1] == b' ' {
                i += 1;
            }
            while j + 1 < b.len() && b[j + 1] == b' ' {
                j += 1;
            }
        }

        i += 1;
        j += 1;
    }
}

/// A named data type from `_item_type_list`: primitive kind plus the
/// construct regex values of this type must match.
#[derive(Debug)]
pub struct TypeValidator {
    pub name: SmolStr,
    pub primitive: Primitive,
    pub regex: Regex,
}

impl TypeValidator {
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        compare_values(self.primitive, a, b)
    }
}

/// Schema for one item (column) of a category.
#[derive(Debug, Default)]
pub struct ItemValidator {
    pub tag: SmolStr,
    pub category: SmolStr,
    pub mandatory: bool,
    pub type_validator: Option<Arc<TypeValidator>>,
    /// Allowed values; empty means unrestricted.
    pub enums: FxHashSet<SmolStr>,
    pub default_value: Option<SmolStr>,
    pub aliases: Vec<SmolStr>,
}

impl ItemValidator {
    /// Check one cell value. Empty values (including the `.`/`?` sentinels)
    /// always pass.
    pub fn validate(&self, value: &str) -> Result<()> {
        if is_empty_value(value) {
            return Ok(());
        }

        if let Some(tv) = &self.type_validator {
            if !tv.regex.is_match(value) {
                return Err(Error::validation(
                    self.category.as_str(),
                    self.tag.as_str(),
                    format!(
                        "value '{value}' does not match the type expression for '{}'",
                        tv.name
                    ),
                ));
            }
        }

        if !self.enums.is_empty() && !self.enums.contains(value) {
            return Err(Error::validation(
                self.category.as_str(),
                self.tag.as_str(),
                format!("value '{value}' is not in the list of allowed values"),
            ));
        }

        Ok(())
    }

    pub fn primitive(&self) -> Primitive {
        self.type_validator
            .as_ref()
            .map(|tv| tv.primitive)
            .unwrap_or_default()
    }
}

/// Schema for one category: key columns, mandatory columns and the item
/// validators for its columns.
#[derive(Debug, Default)]
pub struct CategoryValidator {
    pub name: SmolStr,
    /// Key column names, in dictionary order.
    pub keys: Vec<SmolStr>,
    /// Category groups this category belongs to.
    pub groups: Vec<SmolStr>,
    /// Folded names of mandatory columns.
    pub mandatory_fields: FxHashSet<SmolStr>,
    items: FxHashMap<SmolStr, Arc<ItemValidator>>,
}

impl CategoryValidator {
    pub fn new(name: impl Into<SmolStr>, keys: Vec<SmolStr>, groups: Vec<SmolStr>) -> Self {
        Self {
            name: name.into(),
            keys,
            groups,
            ..Default::default()
        }
    }

    pub fn add_item_validator(&mut self, validator: ItemValidator) {
        if validator.mandatory {
            self.mandatory_fields.insert(fold_name(&validator.tag));
        }
        let key = fold_name(&validator.tag);
        if self.items.insert(key, Arc::new(validator)).is_some() && verbosity() >= 4 {
            warn!(category = %self.name, "duplicate item validator replaced");
        }
    }

    pub fn item_validator(&self, item: &str) -> Option<&Arc<ItemValidator>> {
        self.items.get(fold_name(item).as_str())
    }

    pub fn item_validators(&self) -> impl Iterator<Item = &Arc<ItemValidator>> {
        self.items.values()
    }

    /// Is the named column part of this category's key?
    pub fn is_key(&self, item: &str) -> bool {
        self.keys.iter().any(|k| k.eq_ignore_ascii_case(item))
    }
}

/// A parent→child foreign-key relation between two categories.
#[derive(Debug, Clone, Default)]
pub struct LinkValidator {
    pub parent_category: SmolStr,
    pub child_category: SmolStr,
    /// Parallel key lists: `child_keys[i]` references `parent_keys[i]`.
    pub parent_keys: Vec<SmolStr>,
    pub child_keys: Vec<SmolStr>,
    pub group_id: i32,
    pub group_label: SmolStr,
}

/// A complete loaded dictionary.
#[derive(Debug, Default)]
pub struct Validator {
    name: SmolStr,
    version: SmolStr,
    strict: AtomicBool,
    types: FxHashMap<SmolStr, Arc<TypeValidator>>,
    categories: FxHashMap<SmolStr, Arc<CategoryValidator>>,
    links: Vec<Arc<LinkValidator>>,
}

impl Validator {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// In strict mode every reported problem is fatal.
    pub fn set_strict(&self, strict: bool) {
        self.strict.store(strict, AtomicOrdering::Relaxed);
    }

    pub fn is_strict(&self) -> bool {
        self.strict.load(AtomicOrdering::Relaxed)
    }

    pub fn validator_for_type(&self, code: &str) -> Option<&Arc<TypeValidator>> {
        self.types.get(fold_name(code).as_str())
    }

    pub fn validator_for_category(&self, name: &str) -> Option<&Arc<CategoryValidator>> {
        self.categories.get(fold_name(name).as_str())
    }

    /// Look up an item validator by fully qualified tag, with or without
    /// the leading underscore.
    pub fn validator_for_item(&self, tag: &str) -> Option<&Arc<ItemValidator>> {
        let body = tag.strip_prefix('_').unwrap_or(tag);
        let (category, item) = body.split_once('.')?;
        self.validator_for_category(category)?.item_validator(item)
    }

    pub fn links(&self) -> &[Arc<LinkValidator>] {
        &self.links
    }

    pub fn links_for_parent(&self, category: &str) -> Vec<Arc<LinkValidator>> {
        self.links
            .iter()
            .filter(|l| l.parent_category.eq_ignore_ascii_case(category))
            .cloned()
            .collect()
    }

    pub fn links_for_child(&self, category: &str) -> Vec<Arc<LinkValidator>> {
        self.links
            .iter()
            .filter(|l| l.child_category.eq_ignore_ascii_case(category))
            .cloned()
            .collect()
    }

    /// Report a validation problem: fatal problems (or any problem in
    /// strict mode) become errors, the rest are logged at verbosity > 0.
    pub fn report_error(&self, message: impl Into<String>, fatal: bool) -> Result<()> {
        let message = message.into();
        if fatal || self.is_strict() {
            Err(Error::Invalid(message))
        } else {
            if verbosity() > 0 {
                warn!(dictionary = %self.name, "{message}");
            }
            Ok(())
        }
    }
}

/// Mutable accumulator used by the loader; frozen into a [`Validator`].
#[derive(Debug, Default)]
pub struct ValidatorBuilder {
    pub name: SmolStr,
    pub version: SmolStr,
    types: FxHashMap<SmolStr, Arc<TypeValidator>>,
    categories: FxHashMap<SmolStr, CategoryValidator>,
    links: Vec<LinkValidator>,
}

impl ValidatorBuilder {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_type_validator(&mut self, validator: TypeValidator) {
        let key = fold_name(&validator.name);
        if self.types.contains_key(key.as_str()) {
            // Never replace an already defined type; later, looser
            // definitions must not widen an earlier one.
            if verbosity() >= 4 {
                warn!(type_code = %validator.name, "duplicate type validator ignored");
            }
            return;
        }
        self.types.insert(key, Arc::new(validator));
    }

    pub fn type_validator(&self, code: &str) -> Option<Arc<TypeValidator>> {
        self.types.get(fold_name(code).as_str()).cloned()
    }

    pub fn add_category_validator(&mut self, validator: CategoryValidator) {
        self.categories
            .entry(fold_name(&validator.name))
            .or_insert(validator);
    }

    pub fn category_validator(&self, name: &str) -> Option<&CategoryValidator> {
        self.categories.get(fold_name(name).as_str())
    }

    pub fn category_validator_mut(&mut self, name: &str) -> Option<&mut CategoryValidator> {
        self.categories.get_mut(fold_name(name).as_str())
    }

    fn item_type(&self, category: &str, item: &str) -> Option<Arc<TypeValidator>> {
        self.categories
            .get(fold_name(category).as_str())?
            .item_validator(item)?
            .type_validator
            .clone()
    }

    fn item_exists(&self, category: &str, item: &str) -> bool {
        self.categories
            .get(fold_name(category).as_str())
            .is_some_and(|cv| cv.item_validator(item).is_some())
    }

    /// Register a link after checking both end points exist, inheriting the
    /// parent's type onto untyped child items.
    pub fn add_link_validator(&mut self, link: LinkValidator) -> Result<()> {
        if link.parent_keys.len() != link.child_keys.len() {
            return Err(Error::dictionary(
                "unequal number of keys for parent and child in link",
            ));
        }
        if !self.categories.contains_key(fold_name(&link.parent_category).as_str()) {
            return Err(Error::dictionary(format!(
                "unknown parent category {}",
                link.parent_category
            )));
        }
        if !self.categories.contains_key(fold_name(&link.child_category).as_str()) {
            return Err(Error::dictionary(format!(
                "unknown child category {}",
                link.child_category
            )));
        }

        for (pk, ck) in link.parent_keys.iter().zip(&link.child_keys) {
            if !self.item_exists(&link.parent_category, pk) {
                return Err(Error::dictionary(format!(
                    "unknown parent tag _{}.{pk}",
                    link.parent_category
                )));
            }
            if !self.item_exists(&link.child_category, ck) {
                return Err(Error::dictionary(format!(
                    "unknown child tag _{}.{ck}",
                    link.child_category
                )));
            }

            // A child item without its own type takes the parent's.
            if self.item_type(&link.child_category, ck).is_none() {
                if let Some(parent_type) = self.item_type(&link.parent_category, pk) {
                    let child_cat = fold_name(&link.child_category);
                    if let Some(cv) = self.categories.get_mut(child_cat.as_str()) {
                        if let Some(iv) = cv.item_validator(ck) {
                            let inherited = ItemValidator {
                                tag: iv.tag.clone(),
                                category: iv.category.clone(),
                                mandatory: iv.mandatory,
                                type_validator: Some(parent_type),
                                enums: iv.enums.clone(),
                                default_value: iv.default_value.clone(),
                                aliases: iv.aliases.clone(),
                            };
                            cv.add_item_validator(inherited);
                        }
                    }
                }
            }
        }

        self.links.push(link);
        Ok(())
    }

    /// Freeze the accumulated schema into an immutable validator.
    pub fn build(self) -> Validator {
        Validator {
            name: self.name,
            version: self.version,
            strict: AtomicBool::new(false),
            types: self.types,
            categories: self
                .categories
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
            links: self.links.into_iter().map(Arc::new).collect(),
        }
    }
}
