//! Typed field formats.
//!
//! Each column of an ICD schema is described by a [`FieldFormat`]: a name,
//! an emptiness policy, a length range, and a variant-specific rule. The
//! validation contract is three steps in order — emptiness, length, value —
//! where an allowed-empty value short-circuits the later steps. Value
//! validation produces a typed [`FieldValue`].

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::{errors::IcdError, ranges::Range};

/// Default limits for integer fields without an explicit range.
const INTEGER_DEFAULT_RANGE: &str = "-2147483648:2147483647";

/// Typed result of a successful value validation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
}

/// Extension point for field types beyond the built-in set. Registered
/// constructors produce one of these per field declaration.
pub trait CustomFieldFormat: fmt::Debug + Send + Sync {
    fn validate_value(&self, raw: &str) -> Result<FieldValue, IcdError>;
}

/// Borrowed view of a field declaration handed to custom constructors.
pub struct FieldSpec<'a> {
    pub name: &'a str,
    pub allow_empty: bool,
    pub length: &'a Range,
    pub rule: &'a str,
}

pub type FieldFormatCtor =
    Box<dyn Fn(&FieldSpec<'_>) -> Result<Box<dyn CustomFieldFormat>, IcdError> + Send + Sync>;

#[derive(Debug)]
enum FieldKind {
    Text,
    Choice(Vec<String>),
    Integer(Range),
    Decimal(Range),
    DateTime(Vec<DateTimeToken>),
    RegEx(Regex),
    Pattern(Regex),
    Custom(Box<dyn CustomFieldFormat>),
}

#[derive(Debug)]
pub struct FieldFormat {
    name: String,
    allow_empty: bool,
    length: Range,
    rule: String,
    kind: FieldKind,
}

pub fn is_builtin_type(type_token: &str) -> bool {
    matches!(
        type_token.trim().to_ascii_lowercase().as_str(),
        "text" | "choice" | "integer" | "decimal" | "datetime" | "regex" | "pattern"
    )
}

impl FieldFormat {
    /// Builds a built-in field format from its ICD declaration columns.
    pub fn new(
        name: &str,
        type_token: &str,
        allow_empty: bool,
        length_text: &str,
        rule: &str,
    ) -> Result<Self, IcdError> {
        let name = validated_name(name)?;
        let length = Range::parse(length_text, "")?;
        let rule = rule.trim().to_string();
        let kind = match type_token.trim().to_ascii_lowercase().as_str() {
            "text" => FieldKind::Text,
            "choice" => FieldKind::Choice(parse_choices(&rule)?),
            "integer" => FieldKind::Integer(Range::parse(&rule, INTEGER_DEFAULT_RANGE)?),
            "decimal" => FieldKind::Decimal(Range::parse(&rule, "")?),
            "datetime" => FieldKind::DateTime(compile_datetime_pattern(&rule)?),
            "regex" => FieldKind::RegEx(compile_regex(&rule, &rule)?),
            "pattern" => FieldKind::Pattern(compile_pattern(&rule)?),
            other => {
                return Err(IcdError::FieldSyntax(format!(
                    "unknown field type {other:?}; built-in types are: \
                     Choice, Integer, Decimal, DateTime, RegEx, Pattern, Text"
                )));
            }
        };
        Ok(Self {
            name,
            allow_empty,
            length,
            rule,
            kind,
        })
    }

    /// Wraps a registered custom type.
    pub fn custom(
        name: &str,
        allow_empty: bool,
        length_text: &str,
        rule: &str,
        format: Box<dyn CustomFieldFormat>,
    ) -> Result<Self, IcdError> {
        Ok(Self {
            name: validated_name(name)?,
            allow_empty,
            length: Range::parse(length_text, "")?,
            rule: rule.trim().to_string(),
            kind: FieldKind::Custom(format),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allow_empty(&self) -> bool {
        self.allow_empty
    }

    pub fn length(&self) -> &Range {
        &self.length
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Runs all three validation steps. `Ok(None)` means the value was
    /// empty and allowed to be.
    pub fn validate(&self, raw: &str) -> Result<Option<FieldValue>, IcdError> {
        self.validate_empty(raw)?;
        if raw.is_empty() {
            return Ok(None);
        }
        self.validate_length(raw)?;
        self.validate_value(raw).map(Some)
    }

    pub fn validate_empty(&self, raw: &str) -> Result<(), IcdError> {
        if raw.is_empty() && !self.allow_empty {
            return Err(IcdError::FieldValue("value must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn validate_length(&self, raw: &str) -> Result<(), IcdError> {
        if raw.is_empty() && self.allow_empty {
            return Ok(());
        }
        let count = raw.chars().count() as i64;
        self.length
            .validate("length", count)
            .map_err(|err| IcdError::FieldValue(err.to_string()))
    }

    pub fn validate_value(&self, raw: &str) -> Result<FieldValue, IcdError> {
        match &self.kind {
            FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
            FieldKind::Choice(choices) => {
                if choices.iter().any(|choice| choice.eq_ignore_ascii_case(raw)) {
                    Ok(FieldValue::Text(raw.to_string()))
                } else {
                    Err(IcdError::FieldValue(format!(
                        "value is {raw:?} but must be one of: {}",
                        choices.join(", ")
                    )))
                }
            }
            FieldKind::Integer(range) => {
                let value: i64 = raw.trim().parse().map_err(|_| {
                    IcdError::FieldValue(format!("value must be an integer number but is {raw:?}"))
                })?;
                range
                    .validate("value", value)
                    .map_err(|err| IcdError::FieldValue(err.to_string()))?;
                Ok(FieldValue::Integer(value))
            }
            FieldKind::Decimal(range) => {
                let value: Decimal = raw.trim().parse().map_err(|_| {
                    IcdError::FieldValue(format!("value must be a decimal number but is {raw:?}"))
                })?;
                if !range.is_unconstrained() {
                    let integer_part = value.trunc().to_i64().ok_or_else(|| {
                        IcdError::FieldValue(format!(
                            "integer part of {raw:?} is out of the representable range"
                        ))
                    })?;
                    range
                        .validate("integer part", integer_part)
                        .map_err(|err| IcdError::FieldValue(err.to_string()))?;
                }
                Ok(FieldValue::Decimal(value))
            }
            FieldKind::DateTime(tokens) => {
                parse_datetime(raw, tokens, &self.rule).map(FieldValue::DateTime)
            }
            FieldKind::RegEx(regex) => {
                if regex.is_match(raw) {
                    Ok(FieldValue::Text(raw.to_string()))
                } else {
                    Err(IcdError::FieldValue(format!(
                        "value {raw:?} must match regular expression {:?}",
                        self.rule
                    )))
                }
            }
            FieldKind::Pattern(regex) => {
                if regex.is_match(raw) {
                    Ok(FieldValue::Text(raw.to_string()))
                } else {
                    Err(IcdError::FieldValue(format!(
                        "value {raw:?} must match pattern {:?}",
                        self.rule
                    )))
                }
            }
            FieldKind::Custom(format) => format.validate_value(raw),
        }
    }
}

fn validated_name(name: &str) -> Result<String, IcdError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IcdError::FieldSyntax(
            "field name must not be empty".to_string(),
        ));
    }
    if !is_identifier(name) {
        return Err(IcdError::FieldSyntax(format!(
            "field name must be an identifier (letters, digits, underscore) but is {name:?}"
        )));
    }
    Ok(name.to_string())
}

pub(crate) fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_choices(rule: &str) -> Result<Vec<String>, IcdError> {
    if rule.trim().is_empty() {
        return Err(IcdError::FieldSyntax(
            "at least one choice must be specified".to_string(),
        ));
    }
    let mut choices = Vec::new();
    for alternative in rule.split(',') {
        let choice = alternative.trim();
        if choice.is_empty() {
            return Err(IcdError::FieldSyntax(format!(
                "choice list must not contain empty alternatives: {rule:?}"
            )));
        }
        choices.push(choice.to_string());
    }
    Ok(choices)
}

fn compile_regex(rule: &str, described_as: &str) -> Result<Regex, IcdError> {
    // Absolute anchors: the whole value must match even when it contains
    // line breaks; multi_line only affects ^/$ inside the rule itself.
    RegexBuilder::new(&format!(r"\A(?:{rule})\z"))
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .map_err(|err| {
            IcdError::FieldSyntax(format!(
                "cannot compile regular expression {described_as:?}: {err}"
            ))
        })
}

fn compile_pattern(rule: &str) -> Result<Regex, IcdError> {
    if rule.is_empty() {
        return Err(IcdError::FieldSyntax(
            "pattern must not be empty".to_string(),
        ));
    }
    let mut translated = String::new();
    for c in rule.chars() {
        match c {
            '?' => translated.push('.'),
            '*' => translated.push_str(".*"),
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    compile_regex(&translated, rule)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateTimeToken {
    Day,
    Month,
    Year4,
    Year2,
    Hour,
    Minute,
    Second,
    Literal(char),
}

impl DateTimeToken {
    fn digits(&self) -> usize {
        match self {
            DateTimeToken::Year4 => 4,
            DateTimeToken::Literal(_) => 0,
            _ => 2,
        }
    }
}

/// Translates a human-readable pattern (`DD.MM.YYYY hh:mm:ss`) into a
/// token sequence. `YYYY` is matched before `YY`; `MM` is the month and
/// `mm` the minute.
fn compile_datetime_pattern(rule: &str) -> Result<Vec<DateTimeToken>, IcdError> {
    if rule.is_empty() {
        return Err(IcdError::FieldSyntax(
            "date/time field must specify a pattern such as DD.MM.YYYY".to_string(),
        ));
    }
    let chars: Vec<char> = rule.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;
    while index < chars.len() {
        let rest = &chars[index..];
        let (token, consumed) = if rest.starts_with(&['Y', 'Y', 'Y', 'Y']) {
            (DateTimeToken::Year4, 4)
        } else if rest.starts_with(&['Y', 'Y']) {
            (DateTimeToken::Year2, 2)
        } else if rest.starts_with(&['D', 'D']) {
            (DateTimeToken::Day, 2)
        } else if rest.starts_with(&['M', 'M']) {
            (DateTimeToken::Month, 2)
        } else if rest.starts_with(&['h', 'h']) {
            (DateTimeToken::Hour, 2)
        } else if rest.starts_with(&['m', 'm']) {
            (DateTimeToken::Minute, 2)
        } else if rest.starts_with(&['s', 's']) {
            (DateTimeToken::Second, 2)
        } else {
            (DateTimeToken::Literal(chars[index]), 1)
        };
        tokens.push(token);
        index += consumed;
    }
    Ok(tokens)
}

/// Strict positional parse: every numeric token consumes exactly its digit
/// count and literals must match verbatim; leftover input is an error.
fn parse_datetime(
    raw: &str,
    tokens: &[DateTimeToken],
    pattern: &str,
) -> Result<NaiveDateTime, IcdError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut position = 0;
    let mut day = None;
    let mut month = None;
    let mut year = None;
    let mut hour = None;
    let mut minute = None;
    let mut second = None;

    let mismatch =
        || IcdError::FieldValue(format!("date must match pattern {pattern:?} but is {raw:?}"));

    for token in tokens {
        if let DateTimeToken::Literal(expected) = token {
            if chars.get(position) != Some(expected) {
                return Err(mismatch());
            }
            position += 1;
            continue;
        }
        let digits = token.digits();
        if position + digits > chars.len()
            || !chars[position..position + digits]
                .iter()
                .all(char::is_ascii_digit)
        {
            return Err(mismatch());
        }
        let value: u32 = chars[position..position + digits]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| mismatch())?;
        position += digits;
        match token {
            DateTimeToken::Day => day = Some(value),
            DateTimeToken::Month => month = Some(value),
            DateTimeToken::Year4 => year = Some(value as i32),
            DateTimeToken::Year2 => {
                // Two-digit years follow the strptime pivot.
                year = Some(if value <= 68 {
                    2000 + value as i32
                } else {
                    1900 + value as i32
                });
            }
            DateTimeToken::Hour => hour = Some(value),
            DateTimeToken::Minute => minute = Some(value),
            DateTimeToken::Second => second = Some(value),
            DateTimeToken::Literal(_) => unreachable!(),
        }
    }
    if position != chars.len() {
        return Err(mismatch());
    }

    let date = NaiveDate::from_ymd_opt(
        year.unwrap_or(1900),
        month.unwrap_or(1),
        day.unwrap_or(1),
    )
    .ok_or_else(|| {
        IcdError::FieldValue(format!("date {raw:?} must be a valid calendar date"))
    })?;
    let time = NaiveTime::from_hms_opt(
        hour.unwrap_or(0),
        minute.unwrap_or(0),
        second.unwrap_or(0),
    )
    .ok_or_else(|| IcdError::FieldValue(format!("time of day in {raw:?} must be valid")))?;
    Ok(NaiveDateTime::new(date, time))
}
