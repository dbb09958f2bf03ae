//! The file façade: datablocks, validator attachment and path-based I/O.
//!
//! `load`/`read` sniff gzip from the magic bytes, never from the file
//! extension; `save` gzips when the path ends in `.gz`. Parsing always
//! happens with the validator detached and re-attaches it afterwards, so a
//! reload of an already validated file re-validates in one pass.

use std::fs;
use std::io::{BufRead, BufReader, Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;

use super::datablock::Datablock;
use super::row::RowId;
use crate::base::{iequals, verbosity};
use crate::dictionary::{Validator, validator_for};
use crate::error::{Error, Result};
use crate::parser::{Parser, Sink, Value};
use crate::writer;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Fallback dictionary when a file does not declare one.
const DEFAULT_DICTIONARY: &str = "mmcif_ddl";

/// An ordered list of datablocks with case-insensitively unique names.
#[derive(Default)]
pub struct File {
    blocks: Vec<Datablock>,
    validator: Option<Arc<Validator>>,
}

impl File {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a filesystem path, transparently gunzipping when the
    /// content starts with the gzip magic bytes.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(fs::File::open(path.as_ref())?);
        Self::read(reader)
    }

    /// Load from any buffered byte source.
    pub fn read(reader: impl BufRead) -> Result<Self> {
        let mut file = Self::new();
        file.read_into(reader)?;
        Ok(file)
    }

    /// Parse an in-memory source.
    pub fn parse(text: &str) -> Result<Self> {
        Self::read(Cursor::new(text))
    }

    /// Parse more content into this file. The validator is detached for
    /// the duration of the parse and re-attached (re-validating links and
    /// indexes) afterwards.
    pub fn read_into(&mut self, mut reader: impl BufRead) -> Result<()> {
        let gzipped = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
        let saved = self.validator.take();
        self.set_validator(None);

        let result = if gzipped {
            let mut sink = StoreSink::new(self);
            let decoder = BufReader::new(GzDecoder::new(reader));
            Parser::new(decoder, &mut sink).and_then(|mut p| p.parse_file())
        } else {
            let mut sink = StoreSink::new(self);
            Parser::new(reader, &mut sink).and_then(|mut p| p.parse_file())
        };

        // Re-attach on every exit path so a parse error leaves the file
        // in a consistent state.
        self.set_validator(saved);
        result
    }

    /// Parse only the named datablock out of a larger stream.
    pub fn read_single_datablock(&mut self, reader: impl BufRead, name: &str) -> Result<bool> {
        let saved = self.validator.take();
        self.set_validator(None);
        let found = {
            let mut sink = StoreSink::new(self);
            Parser::new(reader, &mut sink).and_then(|mut p| p.parse_single_datablock(name))
        };
        self.set_validator(saved);
        found
    }

    /// Save to a path; a `.gz` suffix selects gzip output.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut out = fs::File::create(path)?;
        if path.extension().is_some_and(|ext| ext == "gz") {
            let mut encoder = GzEncoder::new(out, flate2::Compression::default());
            self.write_to(&mut encoder)?;
            encoder.finish()?;
        } else {
            self.write_to(&mut out)?;
        }
        Ok(())
    }

    /// Serialize as canonical CIF text.
    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        writer::write_file(self, w)?;
        Ok(())
    }

    pub fn to_cif_string(&self) -> Result<String> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    // ------------------------------------------------------------------
    // Datablocks

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Datablock> {
        self.blocks.iter()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Datablock> {
        self.blocks.iter_mut()
    }

    pub fn first(&self) -> Option<&Datablock> {
        self.blocks.first()
    }

    pub fn get(&self, name: &str) -> Option<&Datablock> {
        self.blocks.iter().find(|b| iequals(b.name(), name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Datablock> {
        self.blocks.iter_mut().find(|b| iequals(b.name(), name))
    }

    /// Get or create a datablock and move it to the front of the block
    /// list. Returns whether it was newly created.
    pub fn emplace(&mut self, name: &str) -> (&mut Datablock, bool) {
        let existing = self.blocks.iter().position(|b| iequals(b.name(), name));
        let created = match existing {
            Some(ix) => {
                let block = self.blocks.remove(ix);
                self.blocks.insert(0, block);
                false
            }
            None => {
                let mut block = Datablock::new(name);
                block.set_validator(self.validator.clone());
                self.blocks.insert(0, block);
                true
            }
        };
        (&mut self.blocks[0], created)
    }

    /// Append a datablock at the end of the list, as the parser does.
    /// Returns its index.
    fn block_ix_or_append(&mut self, name: &str) -> usize {
        if let Some(ix) = self.blocks.iter().position(|b| iequals(b.name(), name)) {
            return ix;
        }
        let mut block = Datablock::new(name);
        block.set_validator(self.validator.clone());
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    // ------------------------------------------------------------------
    // Validator attachment

    /// Attach (or detach) a dictionary; propagated to every datablock,
    /// rebuilding per-category validators, key indexes and link caches.
    pub fn set_validator(&mut self, validator: Option<Arc<Validator>>) {
        self.validator = validator;
        for block in &mut self.blocks {
            block.set_validator(self.validator.clone());
        }
    }

    pub fn validator(&self) -> Option<&Arc<Validator>> {
        self.validator.as_ref()
    }

    /// Load the dictionary this file declares in
    /// `audit_conform.dict_name`, falling back to `mmcif_ddl`.
    pub fn load_dictionary(&mut self) -> Result<()> {
        let mut name: Option<String> = None;
        if let Some(block) = self.blocks.first() {
            if let Some(audit_conform) = block.get("audit_conform") {
                if let Some(row) = audit_conform.first() {
                    name = row.get::<String>("dict_name");
                }
            }
        }
        match name {
            Some(name) => self.load_dictionary_named(&name),
            None => self.load_dictionary_named(DEFAULT_DICTIONARY),
        }
    }

    /// Load a dictionary by logical name through the process-wide factory.
    pub fn load_dictionary_named(&mut self, name: &str) -> Result<()> {
        let validator = validator_for(name)?;
        self.set_validator(Some(validator));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation

    /// Validate every datablock, loading the declared dictionary first if
    /// none is attached. An empty file is invalid.
    pub fn is_valid(&mut self) -> Result<bool> {
        if self.validator.is_none() {
            if verbosity() > 0 {
                debug!("no dictionary loaded explicitly, loading the declared one");
            }
            self.load_dictionary()?;
        }

        let mut result = !self.blocks.is_empty();
        for block in &mut self.blocks {
            result = block.is_valid()? && result;
        }
        Ok(result)
    }

    /// Like [`is_valid`](Self::is_valid), but an invalid file is an error.
    pub fn validate(&mut self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(Error::EmptyFile);
        }
        if self.is_valid()? {
            Ok(())
        } else {
            Err(Error::NotValidPdbx(
                "file does not conform to its dictionary".to_string(),
            ))
        }
    }

    /// Check parent–child relations in every datablock without mutating
    /// any row.
    pub fn validate_links(&self) -> Result<bool> {
        let mut result = true;
        for block in &self.blocks {
            result = block.validate_links()? && result;
        }
        Ok(result)
    }
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        self.blocks.len() == other.blocks.len()
            && self.blocks.iter().zip(&other.blocks).all(|(a, b)| a == b)
    }
}

impl Eq for File {}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").field("blocks", &self.blocks).finish()
    }
}

/// The parser sink that builds a [`File`].
struct StoreSink<'f> {
    file: &'f mut File,
    block: Option<usize>,
    category: Option<usize>,
    row: Option<RowId>,
}

impl<'f> StoreSink<'f> {
    fn new(file: &'f mut File) -> Self {
        Self {
            file,
            block: None,
            category: None,
            row: None,
        }
    }
}

impl Sink for StoreSink<'_> {
    fn produce_datablock(&mut self, name: &str) -> Result<()> {
        self.block = Some(self.file.block_ix_or_append(name));
        self.category = None;
        self.row = None;
        Ok(())
    }

    fn produce_category(&mut self, name: &str) -> Result<()> {
        let block_ix = self
            .block
            .ok_or_else(|| Error::Invalid("category outside of a datablock".to_string()))?;
        let block = &mut self.file.blocks[block_ix];
        let (category_ix, _) = block.emplace(name);
        self.category = Some(category_ix);
        // Key/value items following a switch continue the category's last
        // row; a loop opens fresh rows via produce_row.
        self.row = block.category_at(category_ix).row_ids().last().copied();
        Ok(())
    }

    fn produce_row(&mut self) -> Result<()> {
        let (block_ix, category_ix) = self.position()?;
        let category = self.file.blocks[block_ix].category_at_mut(category_ix);
        self.row = Some(category.new_row());
        Ok(())
    }

    fn produce_item(&mut self, _category: &str, item: &str, value: Value) -> Result<()> {
        let (block_ix, category_ix) = self.position()?;
        let category = self.file.blocks[block_ix].category_at_mut(category_ix);
        let row = match self.row {
            Some(row) => row,
            None => {
                let row = category.new_row();
                self.row = Some(row);
                row
            }
        };
        let column = category.add_column(item)?;
        category.update_value(row, column, &value.text, false)?;
        Ok(())
    }
}

impl StoreSink<'_> {
    fn position(&self) -> Result<(usize, usize)> {
        match (self.block, self.category) {
            (Some(block), Some(category)) => Ok((block, category)),
            _ => Err(Error::Invalid(
                "item outside of a datablock/category".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builds_blocks_in_stream_order() {
        let file = File::parse("data_A\n_x.y 1\ndata_B\n_x.y 2\n").unwrap();
        let names: Vec<_> = file.blocks().map(|b| b.name()).collect();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn test_emplace_moves_to_front() {
        let mut file = File::parse("data_A\n_x.y 1\ndata_B\n_x.y 2\n").unwrap();
        let (_, created) = file.emplace("B");
        assert!(!created);
        let names: Vec<_> = file.blocks().map(|b| b.name()).collect();
        assert_eq!(names, ["B", "A"]);
        // Contents unchanged.
        let b = file.get("b").unwrap();
        assert_eq!(b.get("x").unwrap().first().unwrap().text("y"), Some("2"));
    }

    #[test]
    fn test_emplace_creates_fresh_block_at_front() {
        let mut file = File::parse("data_A\n_x.y 1\n").unwrap();
        let (_, created) = file.emplace("NEW");
        assert!(created);
        assert_eq!(file.first().unwrap().name(), "NEW");
    }

    #[test]
    fn test_case_insensitive_block_lookup() {
        let file = File::parse("data_Mixed\n_x.y 1\n").unwrap();
        assert!(file.get("MIXED").is_some());
        assert!(file.get("mixed").is_some());
    }

    #[test]
    fn test_key_value_items_after_loop_join_last_row() {
        let file =
            File::parse("data_X\nloop_\n_t.a\n1\n2\n_t.b extra\n").unwrap();
        let cat = file.get("X").unwrap().get("t").unwrap();
        assert_eq!(cat.len(), 2);
        let rows: Vec<_> = cat.rows().collect();
        assert_eq!(rows[1].text("b"), Some("extra"));
        assert_eq!(rows[0].text("b"), None);
    }

    #[test]
    fn test_sentinels_are_preserved_literally() {
        let file = File::parse("data_X\n_t.a .\n_t.b ?\n").unwrap();
        let cat = file.get("X").unwrap().get("t").unwrap();
        let row = cat.first().unwrap();
        assert_eq!(row.text("a"), Some("."));
        assert_eq!(row.text("b"), Some("?"));
        // But they read as empty through the typed interface.
        assert_eq!(row.get::<String>("a"), None);
        assert_eq!(row.get::<String>("b"), None);
    }
}
