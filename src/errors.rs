//! Error taxonomy for ICD loading and validation.
//!
//! Every failure the engine can produce maps to one [`IcdError`] variant.
//! Load-time errors surface to the caller; per-row errors are routed to
//! listeners during validation and never abort the run. The only errors
//! that stop an in-flight validation are tokenizer and decoding failures,
//! carried by [`ParserSyntaxError`] with their source position.

use std::io;

use thiserror::Error;

/// Tokenizer-level failure with its position in the input.
///
/// `line` and `item` are 1-based; `column` is the 1-based character offset
/// within the physical line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("({line},{item},{column}): {message}")]
pub struct ParserSyntaxError {
    pub message: String,
    pub line: usize,
    pub item: usize,
    pub column: usize,
}

impl ParserSyntaxError {
    pub fn new(message: impl Into<String>, line: usize, item: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            item,
            column,
        }
    }
}

#[derive(Debug, Error)]
pub enum IcdError {
    /// Malformed ICD row, citing the ICD source line.
    #[error("ICD line {line}: {message}")]
    IcdSyntax { line: usize, message: String },

    /// Unknown option key, key forbidden for the format variant, or a
    /// required option missing.
    #[error("data format: {0}")]
    DataFormatSyntax(String),

    /// Option value that parses but is semantically invalid (unknown
    /// encoding, multi-character delimiter, ...).
    #[error("data format: {0}")]
    DataFormatValue(String),

    /// Required data-format section missing after load.
    #[error("{0}")]
    DataFormatLookup(String),

    /// Malformed field rule in the ICD.
    #[error("field: {0}")]
    FieldSyntax(String),

    /// Reference to a field name that does not exist (or a duplicate
    /// definition of one that does).
    #[error("field: {0}")]
    FieldLookup(String),

    /// Value rejected by a field format.
    #[error("{0}")]
    FieldValue(String),

    #[error("range: {0}")]
    RangeSyntax(String),

    #[error("{0}")]
    RangeValue(String),

    /// Malformed check declaration in the ICD.
    #[error("check: {0}")]
    CheckSyntax(String),

    /// A check assertion failed for a row or at end of data.
    #[error("{0}")]
    Check(String),

    #[error(transparent)]
    ParserSyntax(#[from] ParserSyntaxError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IcdError {
    /// Short kind token used in diagnostics and the rejected-rows sidecar.
    pub fn kind(&self) -> &'static str {
        match self {
            IcdError::IcdSyntax { .. } => "icd syntax",
            IcdError::DataFormatSyntax(_) => "data format syntax",
            IcdError::DataFormatValue(_) => "data format value",
            IcdError::DataFormatLookup(_) => "data format lookup",
            IcdError::FieldSyntax(_) => "field syntax",
            IcdError::FieldLookup(_) => "field lookup",
            IcdError::FieldValue(_) => "field value",
            IcdError::RangeSyntax(_) => "range syntax",
            IcdError::RangeValue(_) => "range value",
            IcdError::CheckSyntax(_) => "check syntax",
            IcdError::Check(_) => "check",
            IcdError::ParserSyntax(_) => "parser syntax",
            IcdError::Io(_) => "io",
        }
    }
}
