//! Recursive descent parser for the CIF 1.1 grammar.
//!
//! The parser is written in SAX style: grammar productions are reported to
//! a [`Sink`] and never stored here. One token of lookahead suffices for
//! the whole grammar.

use std::io::{BufRead, Seek};
use std::mem;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use super::lexer::{Scanner, Token, Value};
use crate::base::iequals;
use crate::error::{Error, Result};

/// Receiver for parser events.
///
/// Implemented by the in-memory store (building datablocks) and by the
/// dictionary loader (building validators from save-frames).
pub trait Sink {
    fn produce_datablock(&mut self, name: &str) -> Result<()>;
    fn produce_category(&mut self, name: &str) -> Result<()>;
    fn produce_row(&mut self) -> Result<()>;
    fn produce_item(&mut self, category: &str, item: &str, value: Value) -> Result<()>;

    /// Called when a `save_<name>` frame opens. Save-frames only occur in
    /// dictionaries, so the default refuses them.
    fn begin_save_frame(&mut self, name: &str) -> Result<()> {
        Err(Error::Invalid(format!(
            "save frame '{name}' is only valid in a dictionary"
        )))
    }

    /// Called when a save-frame closes.
    fn end_save_frame(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Location of a `data_` header in the underlying byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPosition {
    pub offset: u64,
    pub line: u32,
}

/// Map from datablock name to stream position, for random access into very
/// large files.
pub type DatablockIndex = FxHashMap<SmolStr, BlockPosition>;

/// The grammar parser, generic over the byte source and the event sink.
pub struct Parser<'a, R, S> {
    scanner: Scanner<R>,
    lookahead: Token,
    sink: &'a mut S,
    /// Category of the most recent item event, for detecting switches in
    /// key/value runs.
    current_category: Option<String>,
}

impl<'a, R: BufRead, S: Sink> Parser<'a, R, S> {
    pub fn new(source: R, sink: &'a mut S) -> Result<Self> {
        let mut scanner = Scanner::new(source);
        let lookahead = scanner.next_token()?;
        Ok(Self {
            scanner,
            lookahead,
            sink,
            current_category: None,
        })
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.scanner.line(), message.into())
    }

    /// Replace the lookahead with the next token and return the old one.
    fn advance(&mut self) -> Result<Token> {
        let next = self.scanner.next_token()?;
        Ok(mem::replace(&mut self.lookahead, next))
    }

    /// Parse an entire file: `(global? datablock*)*`.
    pub fn parse_file(&mut self) -> Result<()> {
        loop {
            match &self.lookahead {
                Token::Eof => return Ok(()),
                Token::Global => self.parse_global()?,
                Token::Data(_) => self.parse_datablock()?,
                other => {
                    return Err(self.error(format!(
                        "expected data_ header, found {}",
                        other.describe()
                    )));
                }
            }
        }
    }

    /// Stream forward until the named datablock and parse only that block.
    /// Returns false when no block of that name exists.
    pub fn parse_single_datablock(&mut self, name: &str) -> Result<bool> {
        loop {
            match &self.lookahead {
                Token::Eof => return Ok(false),
                Token::Data(n) if iequals(n, name) => {
                    self.parse_datablock()?;
                    return Ok(true);
                }
                _ => {
                    self.advance()?;
                }
            }
        }
    }

    /// Scan the whole stream recording the position of every `data_`
    /// header, without delivering any events.
    pub fn index_datablocks(&mut self) -> Result<DatablockIndex> {
        let mut index = DatablockIndex::default();
        loop {
            if let Token::Data(name) = &self.lookahead {
                index.insert(
                    SmolStr::from(name.to_ascii_lowercase()),
                    BlockPosition {
                        offset: self.scanner.token_start(),
                        line: self.scanner.line(),
                    },
                );
            }
            if self.lookahead == Token::Eof {
                return Ok(index);
            }
            self.advance()?;
        }
    }

    /// A `global_` block is recognized and consumed, but carries no
    /// semantics; none of its items reach the sink.
    fn parse_global(&mut self) -> Result<()> {
        self.advance()?;
        loop {
            match &self.lookahead {
                Token::Tag(_) => {
                    self.advance()?;
                    match self.advance()? {
                        Token::Value(_) => {}
                        other => {
                            return Err(self.error(format!(
                                "expected value in global_ block, found {}",
                                other.describe()
                            )));
                        }
                    }
                }
                Token::Loop => {
                    self.advance()?;
                    while matches!(self.lookahead, Token::Tag(_)) {
                        self.advance()?;
                    }
                    while matches!(self.lookahead, Token::Value(_)) {
                        self.advance()?;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_datablock(&mut self) -> Result<()> {
        let Token::Data(name) = self.advance()? else {
            return Err(self.error("expected data_ header"));
        };
        if name.is_empty() {
            return Err(self.error("data_ header without a name"));
        }
        self.sink.produce_datablock(&name)?;
        self.current_category = None;

        loop {
            match &self.lookahead {
                Token::Tag(_) => self.parse_item_value()?,
                Token::Loop => self.parse_loop()?,
                Token::Save(_) => self.parse_save_frame()?,
                Token::SaveEnd => {
                    return Err(self.error("save_ frame end without matching save_ frame"));
                }
                Token::Stop => return Err(self.error("stop_ outside of a loop")),
                Token::Value(v) => {
                    return Err(self.error(format!("unexpected value '{}'", v.text)));
                }
                Token::Data(_) | Token::Global | Token::Eof => return Ok(()),
            }
        }
    }

    fn parse_item_value(&mut self) -> Result<()> {
        let Token::Tag(tag) = self.advance()? else {
            return Err(self.error("expected item tag"));
        };
        let (category, item) = self.split_tag(&tag)?;

        if self
            .current_category
            .as_deref()
            .is_none_or(|c| !iequals(c, &category))
        {
            self.sink.produce_category(&category)?;
            self.current_category = Some(category.clone());
        }

        match self.advance()? {
            Token::Value(value) => self.sink.produce_item(&category, &item, value),
            other => Err(self.error(format!(
                "expected value for _{category}.{item}, found {}",
                other.describe()
            ))),
        }
    }

    fn parse_loop(&mut self) -> Result<()> {
        self.advance()?;

        let mut category: Option<String> = None;
        let mut items: Vec<String> = Vec::new();

        while matches!(self.lookahead, Token::Tag(_)) {
            let Token::Tag(tag) = self.advance()? else {
                unreachable!()
            };
            let (cat, item) = self.split_tag(&tag)?;
            match &category {
                None => {
                    self.sink.produce_category(&cat)?;
                    category = Some(cat);
                }
                Some(current) if iequals(current, &cat) => {}
                Some(current) => {
                    return Err(self.error(format!(
                        "inconsistent categories in loop_: {current} followed by {cat}"
                    )));
                }
            }
            items.push(item);
        }

        let Some(category) = category else {
            return Err(self.error("loop_ without any item tags"));
        };
        self.current_category = Some(category.clone());

        if !matches!(self.lookahead, Token::Value(_)) {
            return Err(self.error(format!("loop_ for category {category} without values")));
        }

        while matches!(self.lookahead, Token::Value(_)) {
            self.sink.produce_row()?;
            for (ix, item) in items.iter().enumerate() {
                match self.advance()? {
                    Token::Value(value) => self.sink.produce_item(&category, item, value)?,
                    other if ix > 0 => {
                        return Err(self.error(format!(
                            "number of values in loop_ is not a multiple of the number of tags \
                             (found {} mid-row)",
                            other.describe()
                        )));
                    }
                    _ => unreachable!("loop condition guarantees a value at row start"),
                }
            }
        }

        Ok(())
    }

    fn parse_save_frame(&mut self) -> Result<()> {
        let Token::Save(name) = self.advance()? else {
            return Err(self.error("expected save_ frame"));
        };
        self.sink.begin_save_frame(&name)?;
        self.current_category = None;

        loop {
            match &self.lookahead {
                Token::Tag(_) => self.parse_item_value()?,
                Token::Loop => self.parse_loop()?,
                Token::SaveEnd => {
                    self.advance()?;
                    self.sink.end_save_frame()?;
                    self.current_category = None;
                    return Ok(());
                }
                Token::Save(inner) => {
                    return Err(self.error(format!("nested save_ frame '{inner}'")));
                }
                other => {
                    return Err(self.error(format!(
                        "unterminated save_ frame '{name}', found {}",
                        other.describe()
                    )));
                }
            }
        }
    }

    /// Split a tag at the first `.` into (category, item), both non-empty.
    fn split_tag(&self, tag: &str) -> Result<(String, String)> {
        let body = tag.strip_prefix('_').unwrap_or(tag);
        match body.split_once('.') {
            Some((category, item)) if !category.is_empty() && !item.is_empty() => {
                Ok((category.to_string(), item.to_string()))
            }
            _ => Err(self.error(format!(
                "invalid item tag '{tag}', expected _<category>.<item>"
            ))),
        }
    }
}

impl<'a, R: BufRead + Seek, S: Sink> Parser<'a, R, S> {
    /// Jump straight to an indexed datablock and parse only that block.
    pub fn parse_indexed_datablock(&mut self, name: &str, index: &DatablockIndex) -> Result<bool> {
        let Some(pos) = index.get(name.to_ascii_lowercase().as_str()) else {
            return Ok(false);
        };
        self.scanner.seek(pos.offset, pos.line)?;
        self.lookahead = self.scanner.next_token()?;
        self.current_category = None;
        match &self.lookahead {
            Token::Data(n) if iequals(n, name) => {
                self.parse_datablock()?;
                Ok(true)
            }
            _ => Err(Error::parse(
                pos.line,
                format!("datablock index for '{name}' does not point at a data_ header"),
            )),
        }
    }
}
