//! Character-level tokenizers for delimited and fixed-width text.
//!
//! [`DelimitedTokens`] segments a decoded character stream into rows of
//! items under a [`Dialect`]: configurable line/item delimiters (with
//! auto-detection), quoting, and escaping. Quoted items may span lines;
//! blanks around item delimiters are discarded outside quotes.
//!
//! Both tokenizers are lazy, finite, and non-restartable: after the first
//! [`ParserSyntaxError`] no further rows are produced. Every failure
//! carries its `(line, item, column)` position, all 1-based.

use std::io::Read;

use log::debug;

use crate::{
    data::{ItemDelimiter, LineDelimiter},
    errors::ParserSyntaxError,
    io_utils::DecodingReader,
};

/// Delimiters auto-detection candidates, in tie-breaking order.
const ITEM_DELIMITER_CANDIDATES: [char; 4] = [',', ';', '\t', '|'];

/// Blanks discarded around item delimiters outside quotes.
pub const DEFAULT_BLANKS: &str = " \t";

/// Tokenizer configuration for one delimited input.
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    pub line_delimiter: LineDelimiter,
    pub item_delimiter: ItemDelimiter,
    pub quote_character: Option<char>,
    pub escape_character: Option<char>,
    pub blanks_around_item_delimiter: &'static str,
}

impl Dialect {
    /// Dialect used to read ICD files themselves: everything detected,
    /// double-quote quoting.
    pub fn auto() -> Self {
        Self {
            line_delimiter: LineDelimiter::Auto,
            item_delimiter: ItemDelimiter::Auto,
            quote_character: Some('"'),
            escape_character: Some('"'),
            blanks_around_item_delimiter: DEFAULT_BLANKS,
        }
    }
}

/// One tokenized row with the physical line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub line: usize,
    pub items: Vec<String>,
}

struct CharSource<R: Read> {
    reader: DecodingReader<R>,
    pushback: Vec<char>,
}

impl<R: Read> CharSource<R> {
    fn next(&mut self) -> Result<Option<char>, crate::io_utils::DecodeError> {
        if let Some(c) = self.pushback.pop() {
            return Ok(Some(c));
        }
        self.reader.next_char()
    }

    fn unread(&mut self, c: char) {
        self.pushback.push(c);
    }
}

/// Streaming row iterator over delimited text.
pub struct DelimitedTokens<R: Read> {
    source: CharSource<R>,
    line_delimiter: LineDelimiter,
    item_delimiter: Option<char>,
    quote_character: Option<char>,
    escape_character: Option<char>,
    blanks: &'static str,
    resolved: bool,
    line: usize,
    item: usize,
    column: usize,
    finished: bool,
}

impl<R: Read> DelimitedTokens<R> {
    pub fn new(reader: R, encoding: &'static encoding_rs::Encoding, dialect: Dialect) -> Self {
        let item_delimiter = match dialect.item_delimiter {
            ItemDelimiter::Char(c) => Some(c),
            ItemDelimiter::Auto => None,
        };
        Self {
            source: CharSource {
                reader: DecodingReader::new(reader, encoding),
                pushback: Vec::new(),
            },
            line_delimiter: dialect.line_delimiter,
            item_delimiter,
            quote_character: dialect.quote_character,
            escape_character: dialect.escape_character,
            blanks: dialect.blanks_around_item_delimiter,
            resolved: false,
            line: 1,
            item: 1,
            column: 1,
            finished: false,
        }
    }

    /// The item delimiter in effect, once reading has started.
    pub fn resolved_item_delimiter(&self) -> Option<char> {
        self.item_delimiter
    }

    pub fn resolved_line_delimiter(&self) -> LineDelimiter {
        self.line_delimiter
    }

    fn syntax_error(&self, message: impl Into<String>) -> ParserSyntaxError {
        ParserSyntaxError::new(message, self.line, self.item, self.column)
    }

    fn read(&mut self) -> Result<Option<char>, ParserSyntaxError> {
        match self.source.next() {
            Ok(Some(c)) => {
                self.column += 1;
                Ok(Some(c))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.finished = true;
                Err(self.syntax_error(err.to_string()))
            }
        }
    }

    fn peek(&mut self) -> Result<Option<char>, ParserSyntaxError> {
        match self.source.next() {
            Ok(Some(c)) => {
                self.source.unread(c);
                Ok(Some(c))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.finished = true;
                Err(self.syntax_error(err.to_string()))
            }
        }
    }

    /// Auto-detection happens once, before the first row: a prescan of the
    /// first line that is pushed back untouched afterwards.
    fn ensure_resolved(&mut self) -> Result<(), ParserSyntaxError> {
        if self.resolved {
            return Ok(());
        }
        self.resolved = true;

        let mut prescan = Vec::new();
        let mut line_end = None;
        loop {
            match self.source.next().map_err(|err| {
                self.finished = true;
                self.syntax_error(err.to_string())
            })? {
                None => break,
                Some(c) => {
                    prescan.push(c);
                    if c == '\r' || c == '\n' {
                        line_end = Some(c);
                        break;
                    }
                }
            }
        }
        if line_end == Some('\r') {
            // One more character tells CR from CRLF.
            if let Some(c) = self.source.next().map_err(|err| {
                self.finished = true;
                self.syntax_error(err.to_string())
            })? {
                prescan.push(c);
            }
        }

        if self.line_delimiter == LineDelimiter::Auto {
            self.line_delimiter = match line_end {
                Some('\n') => LineDelimiter::Lf,
                Some('\r') if prescan.last() == Some(&'\n') => LineDelimiter::CrLf,
                Some('\r') => LineDelimiter::Cr,
                _ => LineDelimiter::Any,
            };
            debug!("detected line delimiter: {}", self.line_delimiter.as_str());
        }

        if self.item_delimiter.is_none() {
            let first_line_len = match line_end {
                Some(_) => prescan.iter().position(|c| *c == '\r' || *c == '\n'),
                None => None,
            }
            .unwrap_or(prescan.len());
            let mut best = ITEM_DELIMITER_CANDIDATES[0];
            let mut best_count = 0usize;
            for candidate in ITEM_DELIMITER_CANDIDATES {
                let count = prescan[..first_line_len]
                    .iter()
                    .filter(|c| **c == candidate)
                    .count();
                if count > best_count {
                    best = candidate;
                    best_count = count;
                }
            }
            self.item_delimiter = Some(best);
            debug!("detected item delimiter: {best:?}");
        }

        for c in prescan.into_iter().rev() {
            self.source.unread(c);
        }
        Ok(())
    }

    fn is_blank(&self, c: char) -> bool {
        self.blanks.contains(c) && Some(c) != self.item_delimiter
    }

    fn skip_blanks(&mut self) -> Result<(), ParserSyntaxError> {
        while let Some(c) = self.peek()? {
            if self.is_blank(c) {
                self.read()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Decides whether `c` opens a line delimiter and consumes the rest of
    /// the sequence if so.
    fn match_line_delimiter(&mut self, c: char) -> Result<bool, ParserSyntaxError> {
        let matched = match self.line_delimiter {
            LineDelimiter::Lf => c == '\n',
            LineDelimiter::Cr => c == '\r',
            LineDelimiter::CrLf | LineDelimiter::Any | LineDelimiter::Auto => {
                if c == '\r' {
                    let lf_follows = self.peek()? == Some('\n');
                    if lf_follows {
                        self.read()?;
                    }
                    // Lone CR is data under a strict CRLF dialect.
                    !(self.line_delimiter == LineDelimiter::CrLf && !lf_follows)
                } else {
                    c == '\n' && self.line_delimiter != LineDelimiter::CrLf
                }
            }
        };
        if matched {
            self.line += 1;
            self.item = 1;
            self.column = 1;
        }
        Ok(matched)
    }

    fn read_quoted_item(&mut self, quote: char) -> Result<String, ParserSyntaxError> {
        let mut item = String::new();
        loop {
            let c = self.read()?.ok_or_else(|| {
                self.syntax_error("quoted item must be terminated before end of input")
            })?;
            if let Some(escape) = self.escape_character
                && escape != quote
                && c == escape
                && self.peek()? == Some(quote)
            {
                self.read()?;
                item.push(quote);
                continue;
            }
            if c == quote {
                if self.peek()? == Some(quote) {
                    self.read()?;
                    item.push(quote);
                    continue;
                }
                return Ok(item);
            }
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            }
            item.push(c);
        }
    }

    fn next_row(&mut self) -> Result<Option<SourceRow>, ParserSyntaxError> {
        if self.finished {
            return Ok(None);
        }
        self.ensure_resolved()?;

        let row_line = self.line;
        let mut items: Vec<String> = Vec::new();
        // True after an item delimiter, meaning one more item is due even
        // if only a line delimiter or EOF follows.
        let mut delimiter_pending = false;

        loop {
            self.skip_blanks()?;
            let c = match self.read()? {
                Some(c) => c,
                None => {
                    self.finished = true;
                    if delimiter_pending {
                        items.push(String::new());
                    }
                    return Ok((!items.is_empty()).then_some(SourceRow {
                        line: row_line,
                        items,
                    }));
                }
            };

            if Some(c) == self.item_delimiter {
                // Empty item directly before the delimiter.
                items.push(String::new());
                self.item += 1;
                delimiter_pending = true;
                continue;
            }

            if self.match_line_delimiter(c)? {
                if delimiter_pending {
                    items.push(String::new());
                }
                // A line delimiter that ends the input yields no empty row.
                if items.is_empty() && self.peek()?.is_none() {
                    self.finished = true;
                    return Ok(None);
                }
                return Ok(Some(SourceRow {
                    line: row_line,
                    items,
                }));
            }

            if Some(c) == self.quote_character {
                let item = self.read_quoted_item(c)?;
                items.push(item);
                self.item += 1;
                self.skip_blanks()?;
                match self.read()? {
                    None => {
                        self.finished = true;
                        return Ok(Some(SourceRow {
                            line: row_line,
                            items,
                        }));
                    }
                    Some(after) if Some(after) == self.item_delimiter => {
                        delimiter_pending = true;
                        continue;
                    }
                    Some(after) => {
                        if self.match_line_delimiter(after)? {
                            return Ok(Some(SourceRow {
                                line: row_line,
                                items,
                            }));
                        }
                        self.finished = true;
                        return Err(self.syntax_error(format!(
                            "quoted item must be followed by item delimiter or line delimiter but found {after:?}"
                        )));
                    }
                }
            }

            // Unquoted item: buffer until delimiter, line end, or EOF.
            let mut item = String::new();
            item.push(c);
            loop {
                let next = match self.read()? {
                    Some(next) => next,
                    None => {
                        self.finished = true;
                        items.push(item);
                        return Ok(Some(SourceRow {
                            line: row_line,
                            items,
                        }));
                    }
                };
                if Some(next) == self.item_delimiter {
                    items.push(item);
                    self.item += 1;
                    delimiter_pending = true;
                    break;
                }
                if self.match_line_delimiter(next)? {
                    items.push(item);
                    return Ok(Some(SourceRow {
                        line: row_line,
                        items,
                    }));
                }
                item.push(next);
            }
        }
    }
}

impl<R: Read> Iterator for DelimitedTokens<R> {
    type Item = Result<SourceRow, ParserSyntaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// Row iterator over fixed-width text: every row is exactly the sum of
/// the column widths; items keep their padding verbatim.
pub struct FixedWidthTokens<R: Read> {
    source: CharSource<R>,
    widths: Vec<usize>,
    line_delimiter: Option<LineDelimiter>,
    line: usize,
    item: usize,
    column: usize,
    finished: bool,
}

impl<R: Read> FixedWidthTokens<R> {
    pub fn new(
        reader: R,
        encoding: &'static encoding_rs::Encoding,
        widths: Vec<usize>,
        line_delimiter: Option<LineDelimiter>,
    ) -> Self {
        Self {
            source: CharSource {
                reader: DecodingReader::new(reader, encoding),
                pushback: Vec::new(),
            },
            widths,
            line_delimiter,
            line: 1,
            item: 1,
            column: 1,
            finished: false,
        }
    }

    fn syntax_error(&self, message: impl Into<String>) -> ParserSyntaxError {
        ParserSyntaxError::new(message, self.line, self.item, self.column)
    }

    fn read(&mut self) -> Result<Option<char>, ParserSyntaxError> {
        match self.source.next() {
            Ok(Some(c)) => {
                self.column += 1;
                Ok(Some(c))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.finished = true;
                Err(self.syntax_error(err.to_string()))
            }
        }
    }

    /// Consumes the configured line delimiter after a row when present.
    /// Missing delimiters are tolerated so contiguous data still parses.
    fn skip_line_delimiter(&mut self) -> Result<(), ParserSyntaxError> {
        let Some(delimiter) = self.line_delimiter else {
            return Ok(());
        };
        let first = match self.source.next() {
            Ok(Some(c)) => c,
            Ok(None) => return Ok(()),
            Err(err) => {
                self.finished = true;
                return Err(self.syntax_error(err.to_string()));
            }
        };
        let consume_lf_after_cr = |tokens: &mut Self| -> Result<(), ParserSyntaxError> {
            match tokens.source.next() {
                Ok(Some('\n')) => Ok(()),
                Ok(Some(other)) => {
                    tokens.source.unread(other);
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(err) => {
                    tokens.finished = true;
                    Err(tokens.syntax_error(err.to_string()))
                }
            }
        };
        match (delimiter, first) {
            (LineDelimiter::Lf, '\n') => {}
            (LineDelimiter::Cr, '\r') => {}
            (LineDelimiter::CrLf | LineDelimiter::Any | LineDelimiter::Auto, '\r') => {
                consume_lf_after_cr(self)?;
            }
            (LineDelimiter::Any | LineDelimiter::Auto, '\n') => {}
            (_, other) => {
                self.source.unread(other);
            }
        }
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<SourceRow>, ParserSyntaxError> {
        if self.finished {
            return Ok(None);
        }
        let row_line = self.line;
        self.item = 1;
        let mut items = Vec::with_capacity(self.widths.len());
        for index in 0..self.widths.len() {
            let width = self.widths[index];
            let mut item = String::with_capacity(width);
            for _ in 0..width {
                match self.read()? {
                    Some(c) => item.push(c),
                    None => {
                        self.finished = true;
                        if index == 0 && item.is_empty() {
                            return Ok(None);
                        }
                        let read_so_far = items
                            .iter()
                            .map(|done: &String| done.chars().count())
                            .sum::<usize>()
                            + item.chars().count();
                        return Err(self.syntax_error(format!(
                            "row must contain {} characters but ends after {read_so_far}",
                            self.widths.iter().sum::<usize>(),
                        )));
                    }
                }
            }
            items.push(item);
            self.item += 1;
        }
        self.skip_line_delimiter()?;
        self.line += 1;
        self.column = 1;
        Ok(Some(SourceRow {
            line: row_line,
            items,
        }))
    }
}

impl<R: Read> Iterator for FixedWidthTokens<R> {
    type Item = Result<SourceRow, ParserSyntaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
