//! Multi-interval integer ranges.
//!
//! Ranges appear throughout an ICD: field length limits, integer value
//! limits, and the `allowed_characters` data-format option all use the
//! same grammar of comma-separated closed intervals, e.g. `1:60`,
//! `32:126, 160:`, `-5:5`. An empty specification means "no constraint".

use std::fmt;

use itertools::Itertools;

use crate::errors::IcdError;

/// One closed interval; `None` endpoints are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
}

impl Interval {
    fn contains(&self, value: i64) -> bool {
        self.lower.is_none_or(|lower| value >= lower)
            && self.upper.is_none_or(|upper| value <= upper)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper) {
            (Some(lower), Some(upper)) if lower == upper => write!(f, "{lower}"),
            (Some(lower), Some(upper)) => write!(f, "{lower}:{upper}"),
            (Some(lower), None) => write!(f, "{lower}:"),
            (None, Some(upper)) => write!(f, ":{upper}"),
            (None, None) => write!(f, ":"),
        }
    }
}

/// An ordered, disjoint list of closed integer intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Range {
    items: Vec<Interval>,
}

impl Range {
    /// Parses a range specification. When `text` is empty or whitespace,
    /// `default_text` is parsed instead; when both are empty the result
    /// is the unconstrained range.
    pub fn parse(text: &str, default_text: &str) -> Result<Self, IcdError> {
        let mut spec = text.trim();
        if spec.is_empty() {
            spec = default_text.trim();
        }
        if spec.is_empty() {
            return Ok(Self::default());
        }

        let mut items = Vec::new();
        for part in spec.split(',') {
            items.push(parse_interval(part.trim())?);
        }
        items.sort_by_key(|interval| interval.lower.unwrap_or(i64::MIN));
        for (left, right) in items.iter().tuple_windows() {
            let overlaps = match (left.upper, right.lower) {
                (None, _) => true,
                (Some(upper), Some(lower)) => lower <= upper,
                (Some(_), None) => true,
            };
            if overlaps {
                return Err(IcdError::RangeSyntax(format!(
                    "intervals must not overlap: {left} and {right}"
                )));
            }
        }
        Ok(Self { items })
    }

    /// True when no interval was specified, meaning any value is valid.
    pub fn is_unconstrained(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Interval] {
        &self.items
    }

    /// Returns the single exact value this range pins down, if any.
    /// Used to derive fixed-width column widths from field lengths.
    pub fn exact_value(&self) -> Option<i64> {
        match self.items.as_slice() {
            [
                Interval {
                    lower: Some(lower),
                    upper: Some(upper),
                },
            ] if lower == upper => Some(*lower),
            _ => None,
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        self.items.is_empty() || self.items.iter().any(|interval| interval.contains(value))
    }

    /// Validates `value` against the range, naming the checked quantity
    /// in the failure message.
    pub fn validate(&self, name: &str, value: i64) -> Result<(), IcdError> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(IcdError::RangeValue(format!(
                "{name} is {value} but must be within range {self}"
            )))
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.items.iter().join(", "))
    }
}

fn parse_interval(part: &str) -> Result<Interval, IcdError> {
    if part.is_empty() {
        return Err(IcdError::RangeSyntax(
            "interval between commas must not be empty".to_string(),
        ));
    }
    let (lower_text, upper_text) = match part.split_once(':') {
        None => (part, None),
        Some((lower, upper)) => {
            if upper.contains(':') {
                return Err(IcdError::RangeSyntax(format!(
                    "interval must contain at most one colon: {part:?}"
                )));
            }
            (lower, Some(upper))
        }
    };

    let lower = parse_endpoint(lower_text.trim())?;
    let interval = match upper_text.map(str::trim) {
        // A bare number is the point interval n:n.
        None => {
            let value = lower.ok_or_else(|| {
                IcdError::RangeSyntax("interval must contain a number".to_string())
            })?;
            Interval {
                lower: Some(value),
                upper: Some(value),
            }
        }
        Some(text) => {
            let upper = parse_endpoint(text)?;
            if lower.is_none() && upper.is_none() {
                return Err(IcdError::RangeSyntax(
                    "colon must be preceded and/or succeeded by a number".to_string(),
                ));
            }
            if let (Some(lower), Some(upper)) = (lower, upper)
                && lower > upper
            {
                return Err(IcdError::RangeSyntax(format!(
                    "lower limit {lower} must be less than or equal to upper limit {upper}"
                )));
            }
            Interval { lower, upper }
        }
    };
    Ok(interval)
}

fn parse_endpoint(text: &str) -> Result<Option<i64>, IcdError> {
    if text.is_empty() {
        return Ok(None);
    }
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(IcdError::RangeSyntax(format!(
            "limit must be an integer number but is {text:?}"
        )));
    }
    let value: i64 = text.parse().map_err(|_| {
        IcdError::RangeSyntax(format!("limit {text:?} is out of the representable range"))
    })?;
    Ok(Some(value))
}
