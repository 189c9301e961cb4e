//! Physical data-format descriptor.
//!
//! A [`DataFormat`] is built from the `D` rows of an ICD: the first row
//! names the format variant, subsequent rows set options. Option keys are
//! validated against the variant at set-time, so a broken ICD fails during
//! load rather than halfway through a validation run.

use std::fmt;

use encoding_rs::Encoding;

use crate::{errors::IcdError, io_utils, ranges::Range, tokenizer::Dialect};

pub const KEY_ENCODING: &str = "encoding";
pub const KEY_LINE_DELIMITER: &str = "line_delimiter";
pub const KEY_ITEM_DELIMITER: &str = "item_delimiter";
pub const KEY_QUOTE_CHARACTER: &str = "quote_character";
pub const KEY_ESCAPE_CHARACTER: &str = "escape_character";
pub const KEY_ALLOWED_CHARACTERS: &str = "allowed_characters";
pub const KEY_HEADER: &str = "header";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Csv,
    Delimited,
    FixedWidth,
    Ods,
    Excel,
}

impl FormatKind {
    pub fn parse(token: &str) -> Result<Self, IcdError> {
        match token.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FormatKind::Csv),
            "delimited" => Ok(FormatKind::Delimited),
            "fixed" => Ok(FormatKind::FixedWidth),
            "ods" => Ok(FormatKind::Ods),
            "excel" => Ok(FormatKind::Excel),
            other => Err(IcdError::DataFormatSyntax(format!(
                "format is {other:?} but must be one of: CSV, Delimited, Fixed, ODS, Excel"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FormatKind::Csv => "CSV",
            FormatKind::Delimited => "Delimited",
            FormatKind::FixedWidth => "Fixed",
            FormatKind::Ods => "ODS",
            FormatKind::Excel => "Excel",
        }
    }

    /// Text formats carry an encoding and read through the tokenizer;
    /// spreadsheet formats arrive as ready-made row iterators.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            FormatKind::Csv | FormatKind::Delimited | FormatKind::FixedWidth
        )
    }

    fn is_delimited(&self) -> bool {
        matches!(self, FormatKind::Csv | FormatKind::Delimited)
    }

    fn supports_key(&self, key: &str) -> bool {
        match key {
            KEY_HEADER => true,
            KEY_ENCODING | KEY_LINE_DELIMITER | KEY_ALLOWED_CHARACTERS => self.is_text(),
            KEY_ITEM_DELIMITER | KEY_QUOTE_CHARACTER | KEY_ESCAPE_CHARACTER => self.is_delimited(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDelimiter {
    Cr,
    Lf,
    CrLf,
    /// Any of CR, LF, or CRLF, decided per line at read-time.
    Any,
    /// Detect from the first line, then freeze.
    Auto,
}

impl LineDelimiter {
    fn parse(value: &str) -> Result<Self, IcdError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cr" => Ok(LineDelimiter::Cr),
            "lf" => Ok(LineDelimiter::Lf),
            "crlf" => Ok(LineDelimiter::CrLf),
            "any" => Ok(LineDelimiter::Any),
            "auto" => Ok(LineDelimiter::Auto),
            other => Err(IcdError::DataFormatValue(format!(
                "line delimiter is {other:?} but must be one of: LF, CR, CRLF, ANY, AUTO"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineDelimiter::Cr => "CR",
            LineDelimiter::Lf => "LF",
            LineDelimiter::CrLf => "CRLF",
            LineDelimiter::Any => "ANY",
            LineDelimiter::Auto => "AUTO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemDelimiter {
    Char(char),
    Auto,
}

impl ItemDelimiter {
    fn parse(value: &str) -> Result<Self, IcdError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => return Ok(ItemDelimiter::Auto),
            "tab" => return Ok(ItemDelimiter::Char('\t')),
            "comma" => return Ok(ItemDelimiter::Char(',')),
            "semicolon" => return Ok(ItemDelimiter::Char(';')),
            "pipe" => return Ok(ItemDelimiter::Char('|')),
            _ => {}
        }
        parse_single_char("item delimiter", value).map(ItemDelimiter::Char)
    }
}

impl fmt::Display for ItemDelimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemDelimiter::Char(c) => write!(f, "{c:?}"),
            ItemDelimiter::Auto => write!(f, "AUTO"),
        }
    }
}

fn parse_single_char(what: &str, value: &str) -> Result<char, IcdError> {
    let mut chars = value.chars();
    let first = chars
        .next()
        .ok_or_else(|| IcdError::DataFormatValue(format!("{what} must not be empty")))?;
    if chars.next().is_some() {
        return Err(IcdError::DataFormatValue(format!(
            "{what} must be a single character but is {value:?}"
        )));
    }
    Ok(first)
}

/// Physical shape of the input: variant plus the options the ICD set.
#[derive(Debug, Clone)]
pub struct DataFormat {
    kind: FormatKind,
    encoding: &'static Encoding,
    line_delimiter: Option<LineDelimiter>,
    item_delimiter: Option<ItemDelimiter>,
    quote_character: Option<char>,
    escape_character: Option<char>,
    allowed_characters: Range,
    header: usize,
}

impl DataFormat {
    pub fn new(kind: FormatKind) -> Self {
        let (line_delimiter, item_delimiter, quote_character, escape_character) = match kind {
            FormatKind::Csv => (
                Some(LineDelimiter::Any),
                Some(ItemDelimiter::Auto),
                Some('"'),
                Some('"'),
            ),
            _ => (None, None, None, None),
        };
        Self {
            kind,
            encoding: encoding_rs::UTF_8,
            line_delimiter,
            item_delimiter,
            quote_character,
            escape_character,
            allowed_characters: Range::default(),
            header: 0,
        }
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn header(&self) -> usize {
        self.header
    }

    pub fn allowed_characters(&self) -> &Range {
        &self.allowed_characters
    }

    pub fn line_delimiter(&self) -> Option<LineDelimiter> {
        self.line_delimiter
    }

    pub fn item_delimiter(&self) -> Option<ItemDelimiter> {
        self.item_delimiter
    }

    /// Applies one `D`-row option. The key is case-insensitive; blanks and
    /// hyphens normalize to underscores, so `Line Delimiter` and
    /// `line-delimiter` both address [`KEY_LINE_DELIMITER`].
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), IcdError> {
        let normalized = key.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        if !self.kind.supports_key(&normalized) {
            return Err(IcdError::DataFormatSyntax(format!(
                "option {key:?} is not supported by format {}",
                self.kind.name()
            )));
        }
        match normalized.as_str() {
            KEY_ENCODING => {
                self.encoding = io_utils::resolve_encoding(Some(value))
                    .map_err(|err| IcdError::DataFormatValue(err.to_string()))?;
            }
            KEY_LINE_DELIMITER => {
                self.line_delimiter = Some(LineDelimiter::parse(value)?);
            }
            KEY_ITEM_DELIMITER => {
                self.item_delimiter = Some(ItemDelimiter::parse(value)?);
            }
            KEY_QUOTE_CHARACTER => {
                self.quote_character = Some(parse_single_char("quote character", value)?);
            }
            KEY_ESCAPE_CHARACTER => {
                self.escape_character = Some(parse_single_char("escape character", value)?);
            }
            KEY_ALLOWED_CHARACTERS => {
                self.allowed_characters = Range::parse(value, "")?;
            }
            KEY_HEADER => {
                self.header = value.trim().parse().map_err(|_| {
                    IcdError::DataFormatValue(format!(
                        "header must be a non-negative integer but is {value:?}"
                    ))
                })?;
            }
            _ => unreachable!("supports_key admitted unknown key {normalized:?}"),
        }
        Ok(())
    }

    /// Verifies required options are present and delimiters are distinct.
    /// Called once after the ICD finished loading.
    pub fn validate_required(&self) -> Result<(), IcdError> {
        if self.kind == FormatKind::Delimited {
            if self.line_delimiter.is_none() {
                return Err(IcdError::DataFormatSyntax(
                    "Delimited format requires the line_delimiter option".to_string(),
                ));
            }
            if self.item_delimiter.is_none() {
                return Err(IcdError::DataFormatSyntax(
                    "Delimited format requires the item_delimiter option".to_string(),
                ));
            }
        }
        if let (Some(quote), Some(ItemDelimiter::Char(item))) =
            (self.quote_character, self.item_delimiter)
            && quote == item
        {
            return Err(IcdError::DataFormatValue(format!(
                "quote character {quote:?} must differ from the item delimiter"
            )));
        }
        if let Some(quote) = self.quote_character
            && (quote == '\r' || quote == '\n')
        {
            return Err(IcdError::DataFormatValue(
                "quote character must differ from the line delimiter".to_string(),
            ));
        }
        Ok(())
    }

    /// Tokenizer dialect for delimited variants.
    pub fn dialect(&self) -> Result<Dialect, IcdError> {
        self.validate_required()?;
        Ok(Dialect {
            line_delimiter: self.line_delimiter.unwrap_or(LineDelimiter::Any),
            item_delimiter: self.item_delimiter.unwrap_or(ItemDelimiter::Auto),
            quote_character: self.quote_character,
            escape_character: self.escape_character,
            blanks_around_item_delimiter: crate::tokenizer::DEFAULT_BLANKS,
        })
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind.name(), self.encoding.name())
    }
}
