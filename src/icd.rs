//! Interface control document: the declarative schema and the validation
//! engine driven by it.
//!
//! An [`Icd`] is loaded from a delimited table whose rows are tagged with a
//! kind marker in the first column: `D` rows build the [`DataFormat`],
//! `F` rows the ordered field schema, `C` rows the check set. Rows whose
//! first column is empty are comments.
//!
//! Validation pulls rows from a source iterator matching the declared
//! physical format, applies each field format in schema order, then runs
//! the checks, and reports every outcome through the registered
//! [`ValidationListener`]s. A rejected row never aborts the run; only a
//! tokenizer or decoding failure does.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    checks::{self, Check, CheckCtor, CheckSpec, RowMap},
    data::{DataFormat, FormatKind, ItemDelimiter},
    errors::{IcdError, ParserSyntaxError},
    fields::{self, FieldFormat, FieldFormatCtor, FieldSpec},
    ranges::Range,
    tokenizer::{DelimitedTokens, Dialect, FixedWidthTokens},
};

/// One data row as seen by listeners: 1-based data row number (headers
/// excluded) and the raw item texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub number: usize,
    pub items: Vec<String>,
}

/// Output surface of the engine. Listeners are notified synchronously in
/// registration order; a panicking listener aborts the validation.
pub trait ValidationListener {
    fn accepted_row(&mut self, _row: &Row) {}
    fn rejected_row(&mut self, _row: &Row, _error: &IcdError) {}
    fn check_failed_at_row(&mut self, _row: &Row, _error: &IcdError) {}
    fn check_failed_at_end(&mut self, _error: &IcdError) {}
    fn data_format_failed(&mut self, _error: &ParserSyntaxError) {}
}

/// Built-in listener that mirrors every event into the log.
#[derive(Debug, Default)]
pub struct LogListener;

impl ValidationListener for LogListener {
    fn accepted_row(&mut self, row: &Row) {
        debug!("accepted row {}: {:?}", row.number, row.items);
    }

    fn rejected_row(&mut self, row: &Row, error: &IcdError) {
        warn!("rejected row {}: {error}", row.number);
    }

    fn check_failed_at_row(&mut self, row: &Row, error: &IcdError) {
        warn!("check failed at row {}: {error}", row.number);
    }

    fn check_failed_at_end(&mut self, error: &IcdError) {
        warn!("check failed at end of data: {error}");
    }

    fn data_format_failed(&mut self, error: &ParserSyntaxError) {
        warn!("cannot continue reading data: {error}");
    }
}

const EMPTY_INDICATOR: &str = "x";

/// The loaded, read-only schema plus the per-validation check state.
#[derive(Default)]
pub struct Icd {
    data_format: Option<DataFormat>,
    field_formats: Vec<FieldFormat>,
    field_index: HashMap<String, usize>,
    checks: Vec<Box<dyn Check>>,
    listeners: Vec<Box<dyn ValidationListener>>,
    field_registry: HashMap<String, FieldFormatCtor>,
    check_registry: HashMap<String, CheckCtor>,
}

impl Icd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an ICD from `path` into a fresh instance. Use [`Icd::new`]
    /// plus [`Icd::load`] instead when custom types must be registered
    /// first.
    pub fn from_path(path: &Path) -> Result<Self, IcdError> {
        let mut icd = Self::new();
        let file = File::open(path)?;
        icd.load(BufReader::new(file))?;
        Ok(icd)
    }

    /// Registers a field type constructor consulted for type tokens that
    /// are not built in. The token is matched case-insensitively.
    pub fn register_field_type(&mut self, type_token: &str, ctor: FieldFormatCtor) {
        self.field_registry
            .insert(type_token.trim().to_ascii_lowercase(), ctor);
    }

    /// Registers a check type constructor, analogous to
    /// [`Icd::register_field_type`].
    pub fn register_check_type(&mut self, type_token: &str, ctor: CheckCtor) {
        self.check_registry
            .insert(type_token.trim().to_ascii_lowercase(), ctor);
    }

    pub fn data_format(&self) -> Option<&DataFormat> {
        self.data_format.as_ref()
    }

    pub fn field_formats(&self) -> &[FieldFormat] {
        &self.field_formats
    }

    pub fn field_names(&self) -> Vec<String> {
        self.field_formats
            .iter()
            .map(|field| field.name().to_string())
            .collect()
    }

    /// Field format registered under `name`, if any.
    pub fn field_format(&self, name: &str) -> Option<&FieldFormat> {
        self.field_index
            .get(name)
            .map(|&index| &self.field_formats[index])
    }

    pub fn checks(&self) -> &[Box<dyn Check>] {
        &self.checks
    }

    pub fn add_data_format(&mut self, data_format: DataFormat) -> Result<(), IcdError> {
        if let Some(existing) = &self.data_format {
            return Err(IcdError::DataFormatValue(format!(
                "data format must be set only once but is already {existing}"
            )));
        }
        self.data_format = Some(data_format);
        Ok(())
    }

    pub fn add_field_format(&mut self, field_format: FieldFormat) -> Result<(), IcdError> {
        let name = field_format.name().to_string();
        if self.field_index.contains_key(&name) {
            return Err(IcdError::FieldLookup(format!(
                "field name {name:?} must be used for only one field"
            )));
        }
        self.field_index.insert(name, self.field_formats.len());
        self.field_formats.push(field_format);
        Ok(())
    }

    pub fn add_check(&mut self, check: Box<dyn Check>) -> Result<(), IcdError> {
        if self
            .checks
            .iter()
            .any(|existing| existing.description() == check.description())
        {
            return Err(IcdError::CheckSyntax(format!(
                "check description {:?} must be used for only one check",
                check.description()
            )));
        }
        self.checks.push(check);
        Ok(())
    }

    pub fn add_listener(&mut self, listener: Box<dyn ValidationListener>) {
        self.listeners.push(listener);
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    /// Restores all checks to their initial state so the same ICD can
    /// validate another input.
    pub fn reset(&mut self) {
        for check in &mut self.checks {
            check.reset();
        }
    }

    /// Reads the ICD table from `reader`. The table itself is delimited
    /// text in any dialect the tokenizer can detect.
    pub fn load(&mut self, reader: impl Read) -> Result<(), IcdError> {
        let rows = DelimitedTokens::new(reader, encoding_rs::UTF_8, Dialect::auto());
        for row in rows {
            let row = row?;
            let Some(marker) = row.items.first().map(|item| item.trim()) else {
                continue;
            };
            match marker.to_ascii_lowercase().as_str() {
                "" => {}
                "d" => self.load_data_format_row(&row.items[1..], row.line)?,
                "f" => self.load_field_format_row(&row.items[1..], row.line)?,
                "c" => self.load_check_row(&row.items[1..], row.line)?,
                _ => {
                    return Err(IcdError::IcdSyntax {
                        line: row.line,
                        message: format!(
                            "row marker is {marker:?} but must be empty or one of: D, F, C"
                        ),
                    });
                }
            }
        }

        let Some(data_format) = &self.data_format else {
            return Err(IcdError::DataFormatLookup(
                "ICD must contain a data format section".to_string(),
            ));
        };
        data_format.validate_required()?;
        if self.field_formats.is_empty() {
            return Err(IcdError::FieldLookup(
                "ICD must describe at least one field format".to_string(),
            ));
        }
        if data_format.kind() == FormatKind::FixedWidth {
            self.fixed_widths()?;
        }
        info!(
            "loaded ICD: {} with {} field(s) and {} check(s)",
            data_format,
            self.field_formats.len(),
            self.checks.len()
        );
        Ok(())
    }

    fn load_data_format_row(&mut self, items: &[String], line: usize) -> Result<(), IcdError> {
        let (Some(key), Some(value)) = (items.first(), items.get(1)) else {
            return Err(IcdError::IcdSyntax {
                line,
                message: "data format row must contain key and value columns".to_string(),
            });
        };
        if key.trim().eq_ignore_ascii_case("format") {
            let kind = FormatKind::parse(value)?;
            self.add_data_format(DataFormat::new(kind))
        } else {
            match &mut self.data_format {
                Some(data_format) => data_format.set(key, value),
                None => Err(IcdError::DataFormatSyntax(
                    "data format must be declared with a Format row before options".to_string(),
                )),
            }
        }
    }

    fn load_field_format_row(&mut self, items: &[String], line: usize) -> Result<(), IcdError> {
        let (Some(name), Some(type_token)) = (items.first(), items.get(1)) else {
            return Err(IcdError::IcdSyntax {
                line,
                message: "field format row must contain name and type columns".to_string(),
            });
        };
        let empty_marker = items.get(2).map(|item| item.trim()).unwrap_or("");
        let allow_empty = if empty_marker.is_empty() {
            false
        } else if empty_marker.eq_ignore_ascii_case(EMPTY_INDICATOR) {
            true
        } else {
            return Err(IcdError::IcdSyntax {
                line,
                message: format!(
                    "mark for empty field is {empty_marker:?} but must be empty or {EMPTY_INDICATOR:?}"
                ),
            });
        };
        let length_text = items.get(3).map(String::as_str).unwrap_or("");
        let rule = items.get(4).map(String::as_str).unwrap_or("");
        // The example column and anything after it are informational only.

        let token_key = type_token.trim().to_ascii_lowercase();
        let field_format = if !fields::is_builtin_type(type_token)
            && let Some(ctor) = self.field_registry.get(&token_key)
        {
            let length = Range::parse(length_text, "")?;
            let spec = FieldSpec {
                name: name.trim(),
                allow_empty,
                length: &length,
                rule: rule.trim(),
            };
            let custom = ctor(&spec)?;
            FieldFormat::custom(name, allow_empty, length_text, rule, custom)?
        } else {
            FieldFormat::new(name, type_token, allow_empty, length_text, rule)?
        };
        debug!("defined field {:?} ({type_token})", field_format.name());
        self.add_field_format(field_format)
    }

    fn load_check_row(&mut self, items: &[String], line: usize) -> Result<(), IcdError> {
        let (Some(description), Some(type_token)) = (items.first(), items.get(1)) else {
            return Err(IcdError::IcdSyntax {
                line,
                message: "check row must contain description and type columns".to_string(),
            });
        };
        let rule = items.get(2).map(String::as_str).unwrap_or("");
        let field_names = self.field_names();

        let token_key = type_token.trim().to_ascii_lowercase();
        let check = if !checks::is_builtin_type(type_token)
            && let Some(ctor) = self.check_registry.get(&token_key)
        {
            let spec = CheckSpec {
                description: description.trim(),
                rule: rule.trim(),
                field_names: &field_names,
            };
            ctor(&spec)?
        } else {
            checks::new_builtin(type_token, description.trim(), rule, &field_names)?
        };
        debug!("defined check {:?} ({type_token})", check.description());
        self.add_check(check)
    }

    /// Column widths for fixed-width input, derived from the field
    /// schema: every field must pin its length to one exact value.
    fn fixed_widths(&self) -> Result<Vec<usize>, IcdError> {
        let mut widths = Vec::with_capacity(self.field_formats.len());
        for field in &self.field_formats {
            match field.length().exact_value() {
                Some(width) if width > 0 => widths.push(width as usize),
                _ => {
                    return Err(IcdError::FieldSyntax(format!(
                        "fixed format requires field {:?} to declare an exact length such as 10:10",
                        field.name()
                    )));
                }
            }
        }
        Ok(widths)
    }

    /// Validates the data file at `path` against this ICD.
    pub fn validate_path(&mut self, path: &Path) -> Result<(), IcdError> {
        let file = File::open(path)?;
        self.validate(BufReader::new(file))
    }

    /// Validates a byte stream against this ICD. The stream is tokenized
    /// according to the declared data format.
    pub fn validate(&mut self, reader: impl Read) -> Result<(), IcdError> {
        let data_format = self.data_format.as_ref().ok_or_else(|| {
            IcdError::DataFormatLookup("ICD must contain a data format section".to_string())
        })?;
        match data_format.kind() {
            FormatKind::Csv | FormatKind::Delimited => {
                let dialect = data_format.dialect()?;
                let encoding = data_format.encoding();
                let rows = DelimitedTokens::new(reader, encoding, dialect)
                    .map(|row| row.map(|row| row.items));
                self.run_validation(rows);
                Ok(())
            }
            FormatKind::FixedWidth => {
                let widths = self.fixed_widths()?;
                let encoding = data_format.encoding();
                let line_delimiter = data_format.line_delimiter();
                let rows = FixedWidthTokens::new(reader, encoding, widths, line_delimiter)
                    .map(|row| row.map(|row| row.items));
                self.run_validation(rows);
                Ok(())
            }
            kind => Err(IcdError::DataFormatSyntax(format!(
                "{} data must be supplied as a row iterator via validate_rows",
                kind.name()
            ))),
        }
    }

    /// Validates rows produced by an external reader, e.g. a spreadsheet
    /// cell extractor. Header skipping and check bookkeeping behave
    /// exactly as for text input.
    pub fn validate_rows<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = Result<Vec<String>, ParserSyntaxError>>,
    {
        self.run_validation(rows.into_iter());
    }

    fn run_validation<I>(&mut self, mut rows: I)
    where
        I: Iterator<Item = Result<Vec<String>, ParserSyntaxError>>,
    {
        let header = self
            .data_format
            .as_ref()
            .map(DataFormat::header)
            .unwrap_or(0);
        let mut source_rows = 0usize;

        for _ in 0..header {
            match rows.next() {
                Some(Ok(_)) => source_rows += 1,
                Some(Err(error)) => {
                    notify(&mut self.listeners, |listener| {
                        listener.data_format_failed(&error);
                    });
                    return;
                }
                None => break,
            }
        }

        let mut row_number = 0usize;
        for row in rows {
            source_rows += 1;
            match row {
                Ok(items) => {
                    row_number += 1;
                    let row = Row {
                        number: row_number,
                        items,
                    };
                    self.process_row(&row);
                }
                Err(error) => {
                    notify(&mut self.listeners, |listener| {
                        listener.data_format_failed(&error);
                    });
                    return;
                }
            }
        }

        // Completely empty input produces no events at all; once any
        // source row was consumed the end-of-data checks run.
        if source_rows == 0 {
            return;
        }
        for index in 0..self.checks.len() {
            if let Err(error) = self.checks[index].check_at_end() {
                notify(&mut self.listeners, |listener| {
                    listener.check_failed_at_end(&error);
                });
            }
        }
    }

    fn process_row(&mut self, row: &Row) {
        if let Err(error) = self.validate_items(row) {
            notify(&mut self.listeners, |listener| {
                listener.rejected_row(row, &error);
            });
            return;
        }

        let row_map: RowMap<'_> = self
            .field_formats
            .iter()
            .map(FieldFormat::name)
            .zip(row.items.iter().map(String::as_str))
            .collect();

        // Probe all checks first; state is committed only when the whole
        // row passed, so rejected rows leave no trace in any check.
        for check in &self.checks {
            if let Err(error) = check.check_row(row.number, &row_map) {
                notify(&mut self.listeners, |listener| {
                    listener.check_failed_at_row(row, &error);
                });
                return;
            }
        }
        for check in &mut self.checks {
            check.record_row(row.number, &row_map);
        }
        notify(&mut self.listeners, |listener| {
            listener.accepted_row(row);
        });
    }

    fn validate_items(&self, row: &Row) -> Result<(), IcdError> {
        if row.items.len() != self.field_formats.len() {
            return Err(IcdError::FieldValue(format!(
                "row must contain {} item(s) but contains {}",
                self.field_formats.len(),
                row.items.len()
            )));
        }
        let allowed_characters = self
            .data_format
            .as_ref()
            .map(DataFormat::allowed_characters);
        for (field, item) in self.field_formats.iter().zip(&row.items) {
            if let Some(allowed) = allowed_characters
                && !allowed.is_unconstrained()
                && let Some(outside) = item.chars().find(|c| !allowed.contains(*c as u32 as i64))
            {
                return Err(IcdError::FieldValue(format!(
                    "field {:?}: character {outside:?} (code point {}) must be within allowed range {allowed}",
                    field.name(),
                    outside as u32
                )));
            }
            field.validate(item).map_err(|error| {
                IcdError::FieldValue(format!("field {:?}: {error}", field.name()))
            })?;
        }
        Ok(())
    }
}

fn notify<F>(listeners: &mut [Box<dyn ValidationListener>], mut event: F)
where
    F: FnMut(&mut dyn ValidationListener),
{
    for listener in listeners {
        event(listener.as_mut());
    }
}

/// Sidecar-friendly delimiter for the accepted-rows output: the declared
/// item delimiter when it is a plain ASCII character, a comma otherwise.
pub fn output_delimiter(data_format: &DataFormat) -> u8 {
    match data_format.item_delimiter() {
        Some(ItemDelimiter::Char(c)) if c.is_ascii() && c != '"' => c as u8,
        _ => b',',
    }
}
