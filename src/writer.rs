//! Canonical CIF text output.
//!
//! Single-row categories are written in key/value form with the tag field
//! padded to the longest tag plus two; multi-row categories are written as
//! a `loop_` with pre-computed column widths. Lines break before 132
//! characters where values allow it; values containing newlines become
//! semicolon text fields. With a validator attached, categories are
//! emitted in topological order (parents before children); without one,
//! in insertion order. Each category is terminated by a lone `#` line.

use std::io::{self, Write};

use crate::base::iequals;
use crate::dictionary::Validator;
use crate::model::{Category, Datablock, File};
use crate::parser::is_unquoted_string;

const MAX_LINE: usize = 132;

/// Serialize a whole file.
pub fn write_file(file: &File, w: &mut impl Write) -> io::Result<()> {
    for block in file.blocks() {
        write_datablock(block, w)?;
    }
    Ok(())
}

/// Serialize one datablock.
pub fn write_datablock(block: &Datablock, w: &mut impl Write) -> io::Result<()> {
    writeln!(w, "data_{}", block.name())?;

    match block.validator() {
        Some(validator) => {
            if let Some(entry) = block.get("entry") {
                write_category(entry, w)?;
            }
            if let Some(audit_conform) = block.get("audit_conform") {
                if audit_conform.is_empty() {
                    write_synthetic_audit_conform(validator, w)?;
                } else {
                    write_category(audit_conform, w)?;
                }
            }
            for category in order_categories(block, validator) {
                write_category(category, w)?;
            }
        }
        None => {
            for category in block.iter() {
                write_category(category, w)?;
            }
        }
    }
    Ok(())
}

/// Categories other than `entry`/`audit_conform`, parents before children:
/// a category's rank is one more than the highest rank among its parents
/// in this block; equal ranks order by reverse lexicographic name for
/// determinism.
fn order_categories<'a>(block: &'a Datablock, validator: &Validator) -> Vec<&'a Category> {
    let names: Vec<&str> = block
        .iter()
        .filter(|c| !iequals(c.name(), "entry") && !iequals(c.name(), "audit_conform"))
        .map(|c| c.name())
        .collect();

    fn rank_of(
        ix: usize,
        names: &[&str],
        validator: &Validator,
        ranks: &mut [Option<i32>],
        visiting: &mut [bool],
    ) -> i32 {
        if let Some(rank) = ranks[ix] {
            return rank;
        }
        if visiting[ix] {
            // Cycle in the link graph; break it.
            return 0;
        }
        visiting[ix] = true;
        let mut max_parent = 0;
        for link in validator.links_for_child(names[ix]) {
            if let Some(pix) = names
                .iter()
                .position(|n| iequals(n, &link.parent_category))
            {
                if pix != ix {
                    max_parent = max_parent.max(rank_of(pix, names, validator, ranks, visiting));
                }
            }
        }
        visiting[ix] = false;
        let rank = max_parent + 1;
        ranks[ix] = Some(rank);
        rank
    }

    let mut ranks = vec![None; names.len()];
    let mut visiting = vec![false; names.len()];
    for ix in 0..names.len() {
        rank_of(ix, &names, validator, &mut ranks, &mut visiting);
    }

    let mut order: Vec<(i32, &str)> = names
        .iter()
        .enumerate()
        .map(|(ix, name)| (ranks[ix].unwrap_or(1), *name))
        .collect();
    order.sort_by(|(rank_a, name_a), (rank_b, name_b)| {
        rank_a.cmp(rank_b).then_with(|| {
            name_b
                .to_ascii_lowercase()
                .cmp(&name_a.to_ascii_lowercase())
        })
    });

    order
        .into_iter()
        .filter_map(|(_, name)| block.get(name))
        .collect()
}

fn write_synthetic_audit_conform(validator: &Validator, w: &mut impl Write) -> io::Result<()> {
    let mut temp = Category::new("audit_conform");
    let filled = temp
        .emplace([
            ("dict_name", validator.name()),
            ("dict_version", validator.version()),
        ])
        .is_ok();
    if filled {
        write_category(&temp, w)?;
    }
    Ok(())
}

/// Serialize one category; empty categories emit nothing, not even the
/// terminator.
pub fn write_category(category: &Category, w: &mut impl Write) -> io::Result<()> {
    if category.is_empty() || category.column_count() == 0 {
        return Ok(());
    }

    if category.len() == 1 {
        write_key_value_form(category, w)?;
    } else {
        write_loop_form(category, w)?;
    }

    writeln!(w, "#")
}

fn write_key_value_form(category: &Category, w: &mut impl Write) -> io::Result<()> {
    let row = match category.row_ids().first() {
        Some(&row) => row,
        None => return Ok(()),
    };

    let tags: Vec<String> = category
        .columns()
        .map(|col| format!("_{}.{}", category.name(), col))
        .collect();
    let width = tags.iter().map(String::len).max().unwrap_or(0) + 2;

    for (ix, tag) in tags.iter().enumerate() {
        let text = category.cell_text(row, ix);
        let text = if text.is_empty() { "?" } else { text };

        match format_inline(text) {
            Some(inline) => {
                if width + inline.len() >= MAX_LINE {
                    writeln!(w, "{tag}")?;
                    writeln!(w, "{inline}")?;
                } else {
                    writeln!(w, "{tag:<width$}{inline}")?;
                }
            }
            None => {
                writeln!(w, "{tag}")?;
                write_text_field(text, w)?;
            }
        }
    }
    Ok(())
}

fn write_loop_form(category: &Category, w: &mut impl Write) -> io::Result<()> {
    writeln!(w, "loop_")?;
    for col in category.columns() {
        writeln!(w, "_{}.{}", category.name(), col)?;
    }

    // Column widths: the longest quoted single-line value plus one space,
    // at least two; over-long values just overflow their column.
    let mut widths = vec![2usize; category.column_count()];
    for &row in category.row_ids() {
        for ix in 0..category.column_count() {
            let text = category.cell_text(row, ix);
            let text = if text.is_empty() { "?" } else { text };
            if let Some(inline) = format_inline(text) {
                if inline.len() <= MAX_LINE && widths[ix] < inline.len() + 1 {
                    widths[ix] = inline.len() + 1;
                }
            }
        }
    }

    for &row in category.row_ids() {
        let mut offset = 0usize;
        for ix in 0..category.column_count() {
            let text = category.cell_text(row, ix);
            let text = if text.is_empty() { "?" } else { text };

            match format_inline(text) {
                Some(inline) => {
                    if offset > 0 && offset + inline.len() > MAX_LINE {
                        writeln!(w)?;
                        offset = 0;
                    }
                    let last = ix + 1 == category.column_count();
                    if last {
                        write!(w, "{inline}")?;
                        offset += inline.len();
                    } else {
                        let width = widths[ix].max(inline.len() + 1);
                        write!(w, "{inline:<width$}")?;
                        offset += width;
                    }
                    if offset > MAX_LINE {
                        writeln!(w)?;
                        offset = 0;
                    }
                }
                None => {
                    if offset > 0 {
                        writeln!(w)?;
                    }
                    write_text_field(text, w)?;
                    offset = 0;
                }
            }
        }
        if offset > 0 {
            writeln!(w)?;
        }
    }
    Ok(())
}

/// Quote a value for inline output, or `None` when only a text field can
/// represent it (embedded newline, or both quote styles impossible).
fn format_inline(text: &str) -> Option<String> {
    if text.contains('\n') {
        return None;
    }
    if text.is_empty() {
        return Some("''".to_string());
    }
    if is_unquoted_string(text) {
        return Some(text.to_string());
    }
    if !quote_breaks(text, b'\'') {
        return Some(format!("'{text}'"));
    }
    if !quote_breaks(text, b'"') {
        return Some(format!("\"{text}\""));
    }
    None
}

/// Would this quote character terminate early inside the value? It does
/// when it is followed by whitespace.
fn quote_breaks(text: &str, quote: u8) -> bool {
    let bytes = text.as_bytes();
    bytes.windows(2).any(|pair| {
        pair[0] == quote && (pair[1] == b' ' || pair[1] == b'\t')
    })
}

fn write_text_field(text: &str, w: &mut impl Write) -> io::Result<()> {
    writeln!(w, ";{text}")?;
    writeln!(w, ";")
}
