//! Loading a dictionary into a [`Validator`].
//!
//! A dictionary is an ordinary CIF file whose save-frames carry the
//! definitions: a frame named without a leading underscore declares a
//! category, one named `_<cat>.<item>` declares an item. The loader is a
//! second [`Sink`] implementation: frame contents are parsed into scratch
//! datablocks and folded into validators as each frame closes; types,
//! link groups and metadata come from the dictionary's own datablock.

use std::io::BufRead;

use regex::Regex;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tracing::{trace, warn};

use super::{
    CategoryValidator, ItemValidator, LinkValidator, Primitive, TypeValidator, Validator,
    ValidatorBuilder,
};
use crate::base::{fold_name, iequals, verbosity};
use crate::error::{Error, Result};
use crate::model::{Datablock, RowId};
use crate::parser::{Parser, Sink, Value};

/// Parse a dictionary from a byte source.
pub fn parse_dictionary(name: &str, reader: impl BufRead) -> Result<Validator> {
    let mut sink = DictionarySink::new(name);
    Parser::new(reader, &mut sink)?.parse_file()?;
    sink.finish()
}

struct DictionarySink {
    builder: ValidatorBuilder,
    /// The dictionary's own datablock: types, link groups, metadata.
    main: Option<Datablock>,
    /// Scratch block for the save-frame being parsed, if any.
    frame: Option<(String, Datablock)>,
    category: Option<usize>,
    row: Option<RowId>,
    collected_types: bool,
    pending_categories: Vec<CategoryValidator>,
    /// Folded category name → (original name, item validators).
    pending_items: FxHashMap<SmolStr, (SmolStr, Vec<ItemValidator>)>,
    /// (child tag, parent tag) pairs from `_item_linked` frames.
    linked_items: Vec<(SmolStr, SmolStr)>,
}

impl Sink for DictionarySink {
    fn produce_datablock(&mut self, name: &str) -> Result<()> {
        if self.main.is_none() {
            self.main = Some(Datablock::new(name));
        }
        self.category = None;
        self.row = None;
        Ok(())
    }

    fn produce_category(&mut self, name: &str) -> Result<()> {
        let target = self.target()?;
        let (ix, _) = target.emplace(name);
        self.row = target.category_at(ix).row_ids().last().copied();
        self.category = Some(ix);
        Ok(())
    }

    fn produce_row(&mut self) -> Result<()> {
        let ix = self
            .category
            .ok_or_else(|| Error::dictionary("row outside of a category"))?;
        let target = self.target()?;
        self.row = Some(target.category_at_mut(ix).new_row());
        Ok(())
    }

    fn produce_item(&mut self, _category: &str, item: &str, value: Value) -> Result<()> {
        let ix = self
            .category
            .ok_or_else(|| Error::dictionary("item outside of a category"))?;
        let pending_row = self.row;
        let target = self.target()?;
        let category = target.category_at_mut(ix);
        let row = pending_row.unwrap_or_else(|| category.new_row());
        let column = category.add_column(item)?;
        category.update_value(row, column, &value.text, false)?;
        self.row = Some(row);
        Ok(())
    }

    fn begin_save_frame(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::dictionary("save frame without a name"));
        }
        if !self.collected_types {
            self.collected_types = self.collect_item_types()?;
        }
        self.frame = Some((name.to_string(), Datablock::new(name)));
        self.category = None;
        self.row = None;
        Ok(())
    }

    fn end_save_frame(&mut self) -> Result<()> {
        let (name, frame) = self
            .frame
            .take()
            .ok_or_else(|| Error::dictionary("save frame end without a frame"))?;
        self.category = None;
        self.row = None;
        if name.starts_with('_') {
            self.finish_item_frame(&name, &frame)
        } else {
            self.finish_category_frame(&frame)
        }
    }
}

impl DictionarySink {
    fn new(name: &str) -> Self {
        Self {
            builder: ValidatorBuilder::new(name),
            main: None,
            frame: None,
            category: None,
            row: None,
            collected_types: false,
            pending_categories: Vec::new(),
            pending_items: FxHashMap::default(),
            linked_items: Vec::new(),
        }
    }

    fn target(&mut self) -> Result<&mut Datablock> {
        if let Some((_, frame)) = self.frame.as_mut() {
            return Ok(frame);
        }
        self.main
            .as_mut()
            .ok_or_else(|| Error::dictionary("content outside of a datablock"))
    }

    /// `_item_type_list`: (code, primitive_code, construct) rows. The
    /// construct is a POSIX-extended regex; escapes are expanded and the
    /// expression anchored before compilation.
    fn collect_item_types(&mut self) -> Result<bool> {
        let Some(main) = &self.main else {
            return Ok(false);
        };
        let Some(list) = main.get("item_type_list") else {
            return Ok(false);
        };

        let mut found = false;
        let mut types = Vec::new();
        for row in list.rows() {
            let code = row.text("code").unwrap_or("");
            let primitive_code = row.text("primitive_code").unwrap_or("");
            let construct = row.text("construct").unwrap_or("");
            if code.is_empty() {
                continue;
            }

            let pattern = translate_construct(construct);
            let regex = Regex::new(&pattern).map_err(|e| {
                Error::dictionary(format!("error in regular expression for type {code}: {e}"))
            })?;
            let primitive = Primitive::from_code(primitive_code)?;

            if verbosity() >= 5 {
                trace!(code, ?primitive, "added type");
            }
            types.push(TypeValidator {
                name: SmolStr::from(code),
                primitive,
                regex,
            });
            found = true;
        }
        for tv in types {
            self.builder.add_type_validator(tv);
        }
        Ok(found)
    }

    /// A frame like `save_entity` declares a category: id, key fields and
    /// groups.
    fn finish_category_frame(&mut self, frame: &Datablock) -> Result<()> {
        let id = frame
            .get("category")
            .and_then(|c| c.first())
            .and_then(|r| r.text("id"))
            .unwrap_or("");
        if id.is_empty() {
            return Err(Error::dictionary("category save frame without _category.id"));
        }

        let mut keys = Vec::new();
        if let Some(category_key) = frame.get("category_key") {
            for row in category_key.rows() {
                if let Some(name) = row.text("name") {
                    let (_, item) = split_tag(name)?;
                    keys.push(item);
                }
            }
        }

        let mut groups = Vec::new();
        if let Some(category_group) = frame.get("category_group") {
            for row in category_group.rows() {
                if let Some(group) = row.text("id") {
                    groups.push(SmolStr::from(group));
                }
            }
        }

        self.pending_categories
            .push(CategoryValidator::new(id, keys, groups));
        Ok(())
    }

    /// A frame like `save__entity.id` declares one or more items: type,
    /// enumeration, default, aliases, mandatory code and inline links.
    fn finish_item_frame(&mut self, frame_name: &str, frame: &Datablock) -> Result<()> {
        let type_code = frame
            .get("item_type")
            .and_then(|c| c.first())
            .and_then(|r| r.text("code"))
            .unwrap_or("");
        // A missing type code means the item is a pointer to its parent.
        let type_validator = if type_code.is_empty() || type_code == "?" {
            None
        } else {
            self.builder.type_validator(type_code)
        };

        let mut enums = rustc_hash::FxHashSet::default();
        if let Some(item_enumeration) = frame.get("item_enumeration") {
            for row in item_enumeration.rows() {
                if let Some(value) = row.text("value") {
                    enums.insert(SmolStr::from(value));
                }
            }
        }

        let default_value = frame
            .get("item_default")
            .and_then(|c| c.first())
            .and_then(|r| r.text("value"))
            .map(SmolStr::from);

        let mut aliases = Vec::new();
        if let Some(item_aliases) = frame.get("item_aliases") {
            for row in item_aliases.rows() {
                if let Some(alias) = row.text("alias_name") {
                    aliases.push(SmolStr::from(alias));
                }
            }
        }

        let Some(item_rows) = frame.get("item") else {
            return Ok(());
        };

        for row in item_rows.rows() {
            let tag_name = row.text("name").unwrap_or("");
            let category_id = row.text("category_id").unwrap_or("");
            let mandatory_code = row.text("mandatory_code").unwrap_or("");

            let (category, item) = split_tag(tag_name)?;
            if !category_id.is_empty()
                && category_id != "?"
                && !iequals(category_id, &category)
            {
                return Err(Error::dictionary(format!(
                    "category id '{category_id}' does not match the implicit category of tag '{tag_name}'"
                )));
            }

            let mandatory = iequals(mandatory_code, "yes") || iequals(mandatory_code, "y");
            let entry = self
                .pending_items
                .entry(fold_name(&category))
                .or_insert_with(|| (category.clone(), Vec::new()));

            match entry.1.iter_mut().find(|iv| iequals(&iv.tag, &item)) {
                None => entry.1.push(ItemValidator {
                    tag: item,
                    category: category.clone(),
                    mandatory,
                    type_validator: type_validator.clone(),
                    enums: enums.clone(),
                    default_value: default_value.clone(),
                    aliases: aliases.clone(),
                }),
                Some(existing) => {
                    // Duplicate definitions happen; the frame matching the
                    // tag name wins a mandatory-code disagreement.
                    if existing.mandatory != mandatory {
                        if verbosity() > 2 {
                            warn!(tag = tag_name, "inconsistent mandatory value in dictionary");
                        }
                        if iequals(tag_name, frame_name) {
                            existing.mandatory = mandatory;
                        }
                    }
                    if existing.type_validator.is_none() {
                        existing.type_validator = type_validator.clone();
                    }
                    existing.enums.extend(enums.iter().cloned());
                }
            }
        }

        if let Some(item_linked) = frame.get("item_linked") {
            for row in item_linked.rows() {
                if let (Some(child), Some(parent)) =
                    (row.text("child_name"), row.text("parent_name"))
                {
                    let pair = (SmolStr::from(child), SmolStr::from(parent));
                    if !self.linked_items.contains(&pair) {
                        self.linked_items.push(pair);
                    }
                }
            }
        }

        Ok(())
    }

    /// Attach accumulated validators and assemble link groups.
    fn finish(mut self) -> Result<Validator> {
        for cv in std::mem::take(&mut self.pending_categories) {
            self.builder.add_category_validator(cv);
        }

        let pending_items = std::mem::take(&mut self.pending_items);
        for (_, (category, items)) in pending_items {
            let Some(cv) = self.builder.category_validator_mut(&category) else {
                return Err(Error::dictionary(format!("undefined category '{category}'")));
            };
            for iv in items {
                cv.add_item_validator(iv);
            }
        }

        self.link_items()?;
        self.read_metadata();

        Ok(self.builder.build())
    }

    /// Links are grouped by (parent category, child category, group id);
    /// `_pdbx_item_linked_group_list` is authoritative, the inline
    /// `_item_linked` pairs are only used when it is absent.
    fn link_items(&mut self) -> Result<()> {
        type GroupKey = (SmolStr, SmolStr, i32);
        let mut group_index: Vec<(GroupKey, Vec<(SmolStr, SmolStr)>)> = Vec::new();

        let mut add_link = |key: GroupKey, pk: SmolStr, ck: SmolStr| {
            let pos = match group_index.iter().position(|(k, _)| *k == key) {
                Some(pos) => pos,
                None => {
                    group_index.push((key, Vec::new()));
                    group_index.len() - 1
                }
            };
            let pairs = &mut group_index[pos].1;
            if !pairs.iter().any(|(p, c)| p == &pk && c == &ck) {
                pairs.push((pk, ck));
            }
        };

        let main = self.main.take();
        let group_list_rows: Vec<(String, String, i32)> = main
            .as_ref()
            .and_then(|m| m.get("pdbx_item_linked_group_list"))
            .map(|cat| {
                cat.rows()
                    .map(|row| {
                        (
                            row.text("child_name").unwrap_or("").to_string(),
                            row.text("parent_name").unwrap_or("").to_string(),
                            row.get::<i32>("link_group_id").unwrap_or(0),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        if !group_list_rows.is_empty() {
            for (child, parent, group_id) in &group_list_rows {
                let (ccat, citem) = split_tag(child)?;
                let (pcat, pitem) = split_tag(parent)?;
                self.require_item(&ccat, &citem, child)?;
                self.require_item(&pcat, &pitem, parent)?;
                add_link((pcat, ccat, *group_id), pitem, citem);
            }
        } else {
            for (child, parent) in self.linked_items.clone() {
                let (ccat, citem) = split_tag(&child)?;
                let (pcat, pitem) = split_tag(&parent)?;
                self.require_item(&ccat, &citem, &child)?;
                self.require_item(&pcat, &pitem, &parent)?;
                add_link((pcat, ccat, 0), pitem, citem);
            }
        }

        let linked_group = main.as_ref().and_then(|m| m.get("pdbx_item_linked_group"));
        for ((parent_category, child_category, group_id), pairs) in group_index {
            let mut label = SmolStr::default();
            if let Some(linked_group) = linked_group {
                for row in linked_group.rows() {
                    let category_id = row.text("category_id").unwrap_or("");
                    let row_group = row.get::<i32>("link_group_id").unwrap_or(0);
                    if iequals(category_id, &child_category) && row_group == group_id {
                        label = SmolStr::from(row.text("label").unwrap_or(""));
                        break;
                    }
                }
            }

            let (parent_keys, child_keys) = pairs.into_iter().unzip();
            self.builder.add_link_validator(LinkValidator {
                parent_category,
                child_category,
                parent_keys,
                child_keys,
                group_id,
                group_label: label,
            })?;
        }

        self.main = main;
        Ok(())
    }

    fn require_item(&self, category: &str, item: &str, tag: &str) -> Result<()> {
        let exists = self
            .builder_category(category)
            .is_some_and(|cv| cv.item_validator(item).is_some());
        if exists {
            Ok(())
        } else {
            Err(Error::dictionary(format!(
                "in linked group list, item '{tag}' is not specified"
            )))
        }
    }

    fn builder_category(&self, name: &str) -> Option<&CategoryValidator> {
        // Read-only view over the builder's categories.
        self.builder.category_validator(name)
    }

    /// The `dictionary` category carries the title and version.
    fn read_metadata(&mut self) {
        if let Some(main) = &self.main {
            if let Some(dictionary) = main.get("dictionary") {
                if let Some(row) = dictionary.first() {
                    if let Some(title) = row.text("title") {
                        if !title.is_empty() {
                            self.builder.name = SmolStr::from(title);
                        }
                    }
                    if let Some(version) = row.text("version") {
                        self.builder.version = SmolStr::from(version);
                    }
                }
            }
        }
    }
}

/// Split `_category.item` (leading underscore optional) into its parts.
fn split_tag(tag: &str) -> Result<(SmolStr, SmolStr)> {
    let body = tag.strip_prefix('_').unwrap_or(tag);
    match body.split_once('.') {
        Some((category, item)) if !category.is_empty() && !item.is_empty() => {
            Ok((SmolStr::from(category), SmolStr::from(item)))
        }
        _ => Err(Error::dictionary(format!(
            "invalid tag '{tag}' in dictionary, expected _<category>.<item>"
        ))),
    }
}

/// Expand `\n`/`\t` escapes, drop `\<LF>` line continuations, make the
/// POSIX `[]...]` class form palatable and anchor the expression.
fn translate_construct(construct: &str) -> String {
    let expanded = construct
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\n", "");

    let mut body = String::with_capacity(expanded.len() + 8);
    let chars: Vec<char> = expanded.chars().collect();
    let mut in_class = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            body.push(c);
            body.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if !in_class && c == '[' {
            in_class = true;
            body.push('[');
            let mut j = i + 1;
            if j < chars.len() && chars[j] == '^' {
                body.push('^');
                j += 1;
            }
            // POSIX allows a literal `]` first inside a class.
            if j < chars.len() && chars[j] == ']' {
                body.push('\\');
                body.push(']');
                j += 1;
            }
            i = j;
            continue;
        }
        if in_class && c == '[' {
            // Literal in POSIX, a nested-class opener to the regex crate.
            body.push('\\');
            body.push('[');
            i += 1;
            continue;
        }
        if in_class && c == ']' {
            in_class = false;
        }
        body.push(c);
        i += 1;
    }

    format!("^(?:{body})$")
}
