//! Row predicates.
//!
//! Conditions are built with [`key`] and the operators `&`, `|` and `!`:
//!
//! ```ignore
//! let cond = key("entity_id").eq("1") & !key("type").is_empty();
//! let rows = category.find(cond);
//! ```
//!
//! [`Condition::prepare`] binds the atoms to column indices of a concrete
//! category and performs three algebraic rewrites: nested `and`s are
//! flattened, `key == v | key is-empty` collapses into one atom, and an
//! equality over the full key set of the category resolves through the key
//! index into a precomputed single hit.

use std::cmp::Ordering;

use regex::Regex;
use smol_str::SmolStr;
use tracing::debug;

use crate::base::{iequals, verbosity};
use crate::dictionary::{Primitive, compare_values, is_empty_value};
use crate::model::{Category, RowId};

/// Start a condition atom on the named column.
pub fn key(name: impl Into<SmolStr>) -> Key {
    Key(name.into())
}

/// A column reference under construction; finished by one of the
/// comparison methods.
#[derive(Debug, Clone)]
pub struct Key(SmolStr);

impl Key {
    pub fn eq(self, value: impl ToString) -> Condition {
        self.cmp_op(CmpOp::Eq, value)
    }

    pub fn ne(self, value: impl ToString) -> Condition {
        self.cmp_op(CmpOp::Ne, value)
    }

    pub fn lt(self, value: impl ToString) -> Condition {
        self.cmp_op(CmpOp::Lt, value)
    }

    pub fn le(self, value: impl ToString) -> Condition {
        self.cmp_op(CmpOp::Le, value)
    }

    pub fn gt(self, value: impl ToString) -> Condition {
        self.cmp_op(CmpOp::Gt, value)
    }

    pub fn ge(self, value: impl ToString) -> Condition {
        self.cmp_op(CmpOp::Ge, value)
    }

    /// Matches absent cells and the `.`/`?` sentinels.
    pub fn is_empty(self) -> Condition {
        Condition(Expr::Empty { tag: self.0 })
    }

    pub fn is_not_empty(self) -> Condition {
        !self.is_empty()
    }

    /// Enumeration membership.
    pub fn is_in<V: ToString, I: IntoIterator<Item = V>>(self, values: I) -> Condition {
        Condition(Expr::In {
            tag: self.0,
            values: values
                .into_iter()
                .map(|v| SmolStr::from(v.to_string()))
                .collect(),
        })
    }

    /// Regex match on the raw cell text.
    pub fn matches(self, regex: Regex) -> Condition {
        Condition(Expr::Matches { tag: self.0, regex })
    }

    fn cmp_op(self, op: CmpOp, value: impl ToString) -> Condition {
        Condition(Expr::Cmp {
            tag: self.0,
            op,
            value: SmolStr::from(value.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// A row predicate as an owned algebraic value.
#[derive(Debug, Clone)]
pub struct Condition(Expr);

#[derive(Debug, Clone)]
enum Expr {
    All,
    None,
    Cmp {
        tag: SmolStr,
        op: CmpOp,
        value: SmolStr,
    },
    Empty {
        tag: SmolStr,
    },
    In {
        tag: SmolStr,
        values: Vec<SmolStr>,
    },
    Matches {
        tag: SmolStr,
        regex: Regex,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Condition {
    /// Matches every row.
    pub fn all() -> Self {
        Condition(Expr::All)
    }

    /// Matches no row.
    pub fn none() -> Self {
        Condition(Expr::None)
    }

    /// Bind the condition to a category: resolve column indices and
    /// per-column comparison primitives, and apply the algebraic rewrites.
    pub(crate) fn prepare(self, category: &Category) -> Prepared {
        let prepared = prepare_expr(self.0, category);
        rewrite_single_hit(prepared, category)
    }
}

impl std::ops::BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        Condition(match (self.0, rhs.0) {
            (Expr::All, b) => b,
            (a, Expr::All) => a,
            (Expr::None, _) | (_, Expr::None) => Expr::None,
            (Expr::And(mut a), Expr::And(b)) => {
                a.extend(b);
                Expr::And(a)
            }
            (Expr::And(mut a), b) => {
                a.push(b);
                Expr::And(a)
            }
            (a, Expr::And(mut b)) => {
                b.insert(0, a);
                Expr::And(b)
            }
            (a, b) => Expr::And(vec![a, b]),
        })
    }
}

impl std::ops::BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        Condition(match (self.0, rhs.0) {
            (Expr::None, b) => b,
            (a, Expr::None) => a,
            (Expr::All, _) | (_, Expr::All) => Expr::All,
            (Expr::Or(mut a), Expr::Or(b)) => {
                a.extend(b);
                Expr::Or(a)
            }
            (Expr::Or(mut a), b) => {
                a.push(b);
                Expr::Or(a)
            }
            (a, b) => Expr::Or(vec![a, b]),
        })
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition(match self.0 {
            Expr::All => Expr::None,
            Expr::None => Expr::All,
            Expr::Not(inner) => *inner,
            other => Expr::Not(Box::new(other)),
        })
    }
}

/// A condition bound to one category.
#[derive(Debug)]
pub(crate) enum Prepared {
    All,
    None,
    Cmp {
        col: Option<usize>,
        op: CmpOp,
        value: SmolStr,
        primitive: Primitive,
    },
    /// `key == v or key is-empty`, collapsed.
    EqOrEmpty {
        col: Option<usize>,
        value: SmolStr,
        primitive: Primitive,
    },
    Empty {
        col: Option<usize>,
    },
    In {
        col: Option<usize>,
        values: Vec<SmolStr>,
        primitive: Primitive,
    },
    Matches {
        col: Option<usize>,
        regex: Regex,
    },
    And(Vec<Prepared>),
    Or(Vec<Prepared>),
    Not(Box<Prepared>),
    /// Full-key equality resolved through the key index.
    SingleHit(Option<RowId>),
}

fn prepare_expr(expr: Expr, category: &Category) -> Prepared {
    match expr {
        Expr::All => Prepared::All,
        Expr::None => Prepared::None,
        Expr::Cmp { tag, op, value } => {
            let col = category.column_ix(&tag);
            let primitive = col
                .map(|ix| category.column_primitive(ix))
                .unwrap_or_default();
            Prepared::Cmp {
                col,
                op,
                value,
                primitive,
            }
        }
        Expr::Empty { tag } => Prepared::Empty {
            col: category.column_ix(&tag),
        },
        Expr::In { tag, values } => {
            let col = category.column_ix(&tag);
            let primitive = col
                .map(|ix| category.column_primitive(ix))
                .unwrap_or_default();
            Prepared::In {
                col,
                values,
                primitive,
            }
        }
        Expr::Matches { tag, regex } => Prepared::Matches {
            col: category.column_ix(&tag),
            regex,
        },
        Expr::And(subs) => {
            // Flatten nested ands while binding.
            let mut flat = Vec::with_capacity(subs.len());
            for sub in subs {
                match prepare_expr(sub, category) {
                    Prepared::And(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            Prepared::And(flat)
        }
        Expr::Or(subs) => {
            let prepared: Vec<Prepared> =
                subs.into_iter().map(|s| prepare_expr(s, category)).collect();
            rewrite_eq_or_empty(prepared, category)
        }
        Expr::Not(inner) => Prepared::Not(Box::new(prepare_expr(*inner, category))),
    }
}

/// `(key == v) or (key is-empty)` over the same column becomes one atom.
fn rewrite_eq_or_empty(mut subs: Vec<Prepared>, category: &Category) -> Prepared {
    if subs.len() == 2 {
        let eq_ix = subs
            .iter()
            .position(|s| matches!(s, Prepared::Cmp { op: CmpOp::Eq, .. }));
        let empty_ix = subs.iter().position(|s| matches!(s, Prepared::Empty { .. }));
        if let (Some(eq_ix), Some(empty_ix)) = (eq_ix, empty_ix) {
            let same_col = match (&subs[eq_ix], &subs[empty_ix]) {
                (Prepared::Cmp { col: a, .. }, Prepared::Empty { col: b }) => a == b,
                _ => false,
            };
            if same_col {
                if verbosity() >= 3 {
                    debug!(category = category.name(), "rewrote condition to key-equals-or-empty");
                }
                let Prepared::Cmp {
                    col,
                    value,
                    primitive,
                    ..
                } = subs.swap_remove(eq_ix)
                else {
                    unreachable!()
                };
                return Prepared::EqOrEmpty {
                    col,
                    value,
                    primitive,
                };
            }
        }
    }
    Prepared::Or(subs)
}

/// When the whole condition is an equality over the category's full key
/// set, the matching row (if any) is precomputed from the key index.
fn rewrite_single_hit(prepared: Prepared, category: &Category) -> Prepared {
    let key_cols = category.key_column_ixs();
    if key_cols.is_empty() {
        return prepared;
    }

    let atoms: Vec<&Prepared> = match &prepared {
        Prepared::Cmp { op: CmpOp::Eq, .. } => vec![&prepared],
        Prepared::And(subs) => {
            if subs
                .iter()
                .all(|s| matches!(s, Prepared::Cmp { op: CmpOp::Eq, .. }))
            {
                subs.iter().collect()
            } else {
                return prepared;
            }
        }
        _ => return prepared,
    };

    if atoms.len() != key_cols.len() {
        return prepared;
    }

    let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(atoms.len());
    for atom in &atoms {
        let Prepared::Cmp {
            col: Some(col),
            value,
            ..
        } = atom
        else {
            return prepared;
        };
        if !key_cols.contains(&Some(*col)) {
            return prepared;
        }
        pairs.push((category.column_name(*col), value.as_str()));
    }

    // Every key column must be constrained exactly once.
    let mut seen: Vec<&str> = pairs.iter().map(|(name, _)| *name).collect();
    seen.sort_unstable_by(|a, b| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()));
    seen.dedup_by(|a, b| iequals(a, b));
    if seen.len() != key_cols.len() {
        return prepared;
    }

    match category.index_lookup(&pairs) {
        Some(hit) => {
            if verbosity() >= 3 {
                debug!(category = category.name(), "condition collapsed to key-index hit");
            }
            Prepared::SingleHit(hit)
        }
        None => prepared,
    }
}

impl Prepared {
    /// The precomputed row of a collapsed full-key equality.
    pub(crate) fn as_single_hit(&self) -> Option<Option<RowId>> {
        match self {
            Prepared::SingleHit(hit) => Some(*hit),
            _ => None,
        }
    }

    /// Evaluate against one row.
    pub(crate) fn matches(&self, category: &Category, row: RowId) -> bool {
        match self {
            Prepared::All => true,
            Prepared::None => false,
            Prepared::Cmp {
                col,
                op,
                value,
                primitive,
            } => {
                let cell = cell_for_match(category, row, *col);
                op.accepts(compare_values(*primitive, cell, value))
            }
            Prepared::EqOrEmpty {
                col,
                value,
                primitive,
            } => {
                let cell = cell_for_match(category, row, *col);
                cell.is_empty() || compare_values(*primitive, cell, value) == Ordering::Equal
            }
            Prepared::Empty { col } => cell_for_match(category, row, *col).is_empty(),
            Prepared::In {
                col,
                values,
                primitive,
            } => {
                let cell = cell_for_match(category, row, *col);
                values
                    .iter()
                    .any(|v| compare_values(*primitive, cell, v) == Ordering::Equal)
            }
            Prepared::Matches { col, regex } => {
                let cell = cell_for_match(category, row, *col);
                regex.is_match(cell)
            }
            Prepared::And(subs) => subs.iter().all(|s| s.matches(category, row)),
            Prepared::Or(subs) => subs.iter().any(|s| s.matches(category, row)),
            Prepared::Not(inner) => !inner.matches(category, row),
            Prepared::SingleHit(hit) => *hit == Some(row),
        }
    }
}

/// Cell text for matching: absent cells and sentinels read as "".
fn cell_for_match(category: &Category, row: RowId, col: Option<usize>) -> &str {
    let text = match col {
        Some(ix) => category.cell_text(row, ix),
        None => "",
    };
    if is_empty_value(text) { "" } else { text }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;

    fn sample() -> Category {
        let mut cat = Category::new("atom");
        cat.emplace([("id", "1"), ("symbol", "C"), ("charge", "0")])
            .unwrap();
        cat.emplace([("id", "2"), ("symbol", "N"), ("charge", "-1")])
            .unwrap();
        cat.emplace([("id", "3"), ("symbol", "Fe"), ("charge", "?")])
            .unwrap();
        cat
    }

    #[test]
    fn test_eq_and_ne() {
        let cat = sample();
        assert_eq!(cat.count(key("symbol").eq("C")), 1);
        assert_eq!(cat.count(key("symbol").ne("C")), 2);
    }

    #[test]
    fn test_and_or_not() {
        let cat = sample();
        assert_eq!(
            cat.count(key("symbol").eq("C") | key("symbol").eq("N")),
            2
        );
        assert_eq!(cat.count(key("id").eq("1") & key("symbol").eq("N")), 0);
        assert_eq!(cat.count(!key("symbol").eq("Fe")), 2);
    }

    #[test]
    fn test_all_and_none() {
        let cat = sample();
        assert_eq!(cat.count(Condition::all()), 3);
        assert_eq!(cat.count(Condition::none()), 0);
        // Identity laws applied while composing.
        assert_eq!(cat.count(Condition::all() & key("id").eq("2")), 1);
        assert_eq!(cat.count(Condition::none() | key("id").eq("2")), 1);
    }

    #[test]
    fn test_empty_matches_sentinels() {
        let cat = sample();
        assert_eq!(cat.count(key("charge").is_empty()), 1);
        assert_eq!(cat.count(key("charge").is_not_empty()), 2);
    }

    #[test]
    fn test_missing_column_never_matches() {
        let cat = sample();
        assert_eq!(cat.count(key("nope").eq("x")), 0);
        assert_eq!(cat.count(key("nope").is_empty()), 3);
    }

    #[test]
    fn test_in_and_matches() {
        let cat = sample();
        assert_eq!(cat.count(key("symbol").is_in(["C", "Fe"])), 2);
        let rx = Regex::new("^F").unwrap();
        assert_eq!(cat.count(key("symbol").matches(rx)), 1);
    }

    #[test]
    fn test_comparison_without_validator_is_bytewise() {
        // Without a validator the column is `char`, so "10" < "2".
        let mut cat = Category::new("n");
        cat.emplace([("v", "10")]).unwrap();
        cat.emplace([("v", "2")]).unwrap();
        assert_eq!(cat.count(key("v").lt("2")), 1);
    }

    #[test]
    fn test_eq_or_empty_rewrite() {
        let cat = sample();
        let cond = key("charge").eq("0") | key("charge").is_empty();
        let prepared = cond.prepare(&cat);
        assert!(matches!(prepared, Prepared::EqOrEmpty { .. }));
        let cond = key("charge").eq("0") | key("charge").is_empty();
        assert_eq!(cat.count(cond), 2);
    }

    #[test]
    fn test_full_key_equality_collapses_to_index_hit() {
        use crate::dictionary::{CategoryValidator, ItemValidator, ValidatorBuilder};
        use std::sync::Arc;

        let mut builder = ValidatorBuilder::new("d");
        let mut cv = CategoryValidator::new("atom", vec![SmolStr::from("id")], vec![]);
        cv.add_item_validator(ItemValidator {
            tag: SmolStr::from("id"),
            category: SmolStr::from("atom"),
            ..Default::default()
        });
        cv.add_item_validator(ItemValidator {
            tag: SmolStr::from("symbol"),
            category: SmolStr::from("atom"),
            ..Default::default()
        });
        builder.add_category_validator(cv);
        let validator = Arc::new(builder.build());

        let mut cat = sample();
        cat.set_validator(Some(validator));

        // A full-key equality never iterates: it resolves up front.
        let prepared = key("id").eq("2").prepare(&cat);
        assert!(matches!(prepared, Prepared::SingleHit(Some(_))));
        let prepared = key("id").eq("99").prepare(&cat);
        assert!(matches!(prepared, Prepared::SingleHit(None)));

        // A non-key conjunct defeats the collapse.
        let prepared = (key("id").eq("2") & key("symbol").eq("N")).prepare(&cat);
        assert!(!matches!(prepared, Prepared::SingleHit(_)));
    }

    #[test]
    fn test_and_flattening() {
        let cat = sample();
        let cond = (key("id").eq("1") & key("symbol").eq("C")) & key("charge").eq("0");
        match cond.prepare(&cat) {
            Prepared::And(subs) => assert_eq!(subs.len(), 3),
            other => panic!("expected flattened and, got {other:?}"),
        }
    }
}
