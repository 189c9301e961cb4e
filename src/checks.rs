//! Cross-row integrity checks.
//!
//! Checks span multiple rows and therefore carry state across a validation
//! run. The engine drives them with a probe/commit split: `check_row` must
//! not mutate state (it only asserts), `record_row` commits a row that
//! passed every check, and `check_at_end` asserts after the last row.
//! Rejected rows are never recorded, so their values cannot shadow later
//! duplicates or inflate distinct counts.

use std::collections::{HashMap, HashSet};
use std::fmt;

use itertools::Itertools;

use crate::errors::IcdError;
use crate::fields::is_identifier;

/// Per-row view handed to checks: field name → raw item text.
pub type RowMap<'a> = HashMap<&'a str, &'a str>;

pub trait Check: fmt::Debug + Send {
    fn description(&self) -> &str;

    fn rule(&self) -> &str;

    /// Asserts the row against current state without mutating it.
    fn check_row(&self, _row_number: usize, _row: &RowMap<'_>) -> Result<(), IcdError> {
        Ok(())
    }

    /// Commits a row that passed all checks into this check's state.
    fn record_row(&mut self, _row_number: usize, _row: &RowMap<'_>) {}

    /// Asserts the whole data set once the source is exhausted.
    fn check_at_end(&self) -> Result<(), IcdError> {
        Ok(())
    }

    /// Restores the initial empty state so the owning ICD can validate
    /// another input.
    fn reset(&mut self);
}

/// Borrowed view of a check declaration handed to custom constructors.
pub struct CheckSpec<'a> {
    pub description: &'a str,
    pub rule: &'a str,
    pub field_names: &'a [String],
}

pub type CheckCtor =
    Box<dyn Fn(&CheckSpec<'_>) -> Result<Box<dyn Check>, IcdError> + Send + Sync>;

pub fn is_builtin_type(type_token: &str) -> bool {
    matches!(
        type_token.trim().to_ascii_lowercase().as_str(),
        "isunique" | "distinctcount"
    )
}

/// Builds a built-in check from its ICD declaration columns.
pub fn new_builtin(
    type_token: &str,
    description: &str,
    rule: &str,
    field_names: &[String],
) -> Result<Box<dyn Check>, IcdError> {
    match type_token.trim().to_ascii_lowercase().as_str() {
        "isunique" => Ok(Box::new(IsUniqueCheck::new(description, rule, field_names)?)),
        "distinctcount" => Ok(Box::new(DistinctCountCheck::new(
            description,
            rule,
            field_names,
        )?)),
        other => Err(IcdError::CheckSyntax(format!(
            "unknown check type {other:?}; built-in types are: IsUnique, DistinctCount"
        ))),
    }
}

fn resolve_field_name(token: &str, field_names: &[String]) -> Result<String, IcdError> {
    if !is_identifier(token) {
        return Err(IcdError::CheckSyntax(format!(
            "field name must be an identifier but is {token:?}"
        )));
    }
    if !field_names.iter().any(|name| name == token) {
        return Err(IcdError::FieldLookup(format!(
            "unknown field name {token:?}; defined fields are: {}",
            field_names.iter().join(", ")
        )));
    }
    Ok(token.to_string())
}

/// Asserts that the combination of the named fields' raw values occurs at
/// most once across the whole data set.
pub struct IsUniqueCheck {
    description: String,
    rule: String,
    key_fields: Vec<String>,
    seen: HashMap<Vec<String>, usize>,
}

impl IsUniqueCheck {
    pub fn new(description: &str, rule: &str, field_names: &[String]) -> Result<Self, IcdError> {
        if rule.trim().is_empty() {
            return Err(IcdError::CheckSyntax(
                "field names to build the unique key must be specified".to_string(),
            ));
        }
        let mut key_fields = Vec::new();
        for token in rule.split(',') {
            let token = token.trim();
            if token.is_empty() {
                return Err(IcdError::CheckSyntax(format!(
                    "field name list must not contain empty entries: {rule:?}"
                )));
            }
            key_fields.push(resolve_field_name(token, field_names)?);
        }
        Ok(Self {
            description: description.to_string(),
            rule: rule.trim().to_string(),
            key_fields,
            seen: HashMap::new(),
        })
    }

    fn key_for(&self, row: &RowMap<'_>) -> Vec<String> {
        self.key_fields
            .iter()
            .map(|name| row.get(name.as_str()).copied().unwrap_or("").to_string())
            .collect()
    }
}

impl fmt::Debug for IsUniqueCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsUniqueCheck")
            .field("description", &self.description)
            .field("rule", &self.rule)
            .field("seen", &self.seen.len())
            .finish()
    }
}

impl Check for IsUniqueCheck {
    fn description(&self) -> &str {
        &self.description
    }

    fn rule(&self) -> &str {
        &self.rule
    }

    fn check_row(&self, _row_number: usize, row: &RowMap<'_>) -> Result<(), IcdError> {
        let key = self.key_for(row);
        if let Some(first_row) = self.seen.get(&key) {
            return Err(IcdError::Check(format!(
                "unique value for {} already occurred in row {first_row}: {}",
                self.rule,
                key.iter().map(|item| format!("{item:?}")).join(", ")
            )));
        }
        Ok(())
    }

    fn record_row(&mut self, row_number: usize, row: &RowMap<'_>) {
        let key = self.key_for(row);
        self.seen.entry(key).or_insert(row_number);
    }

    fn reset(&mut self) {
        self.seen.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationalOperator {
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    GreaterOrEqual,
    Greater,
}

impl RelationalOperator {
    fn evaluate(&self, left: i64, right: i64) -> bool {
        match self {
            RelationalOperator::Less => left < right,
            RelationalOperator::LessOrEqual => left <= right,
            RelationalOperator::Equal => left == right,
            RelationalOperator::NotEqual => left != right,
            RelationalOperator::GreaterOrEqual => left >= right,
            RelationalOperator::Greater => left > right,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RelationalOperator::Less => "<",
            RelationalOperator::LessOrEqual => "<=",
            RelationalOperator::Equal => "=",
            RelationalOperator::NotEqual => "!=",
            RelationalOperator::GreaterOrEqual => ">=",
            RelationalOperator::Greater => ">",
        }
    }
}

/// Collects the distinct raw values of one field and asserts
/// `count relop limit` once the data set ends.
pub struct DistinctCountCheck {
    description: String,
    rule: String,
    field: String,
    operator: RelationalOperator,
    limit: i64,
    values: HashSet<String>,
}

impl DistinctCountCheck {
    pub fn new(description: &str, rule: &str, field_names: &[String]) -> Result<Self, IcdError> {
        let (field, operator, limit) = parse_count_expression(rule, field_names)?;
        Ok(Self {
            description: description.to_string(),
            rule: rule.trim().to_string(),
            field,
            operator,
            limit,
            values: HashSet::new(),
        })
    }
}

impl fmt::Debug for DistinctCountCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistinctCountCheck")
            .field("description", &self.description)
            .field("rule", &self.rule)
            .field("distinct", &self.values.len())
            .finish()
    }
}

impl Check for DistinctCountCheck {
    fn description(&self) -> &str {
        &self.description
    }

    fn rule(&self) -> &str {
        &self.rule
    }

    fn record_row(&mut self, _row_number: usize, row: &RowMap<'_>) {
        let value = row.get(self.field.as_str()).copied().unwrap_or("");
        if !self.values.contains(value) {
            self.values.insert(value.to_string());
        }
    }

    fn check_at_end(&self) -> Result<(), IcdError> {
        let count = self.values.len() as i64;
        if self.operator.evaluate(count, self.limit) {
            Ok(())
        } else {
            Err(IcdError::Check(format!(
                "distinct count of field {:?} is {count} but must satisfy: {} {} {}",
                self.field,
                self.field,
                self.operator.as_str(),
                self.limit
            )))
        }
    }

    fn reset(&mut self) {
        self.values.clear();
    }
}

/// Parses the strict `field relop integer` form; anything else — arbitrary
/// arithmetic, parentheses, missing pieces — is a syntax error.
fn parse_count_expression(
    rule: &str,
    field_names: &[String],
) -> Result<(String, RelationalOperator, i64), IcdError> {
    let expression = rule.trim();
    if expression.is_empty() {
        return Err(IcdError::CheckSyntax(
            "rule must be of the form: field_name relation limit".to_string(),
        ));
    }
    let operator_start = expression
        .find(['<', '>', '=', '!'])
        .ok_or_else(|| {
            IcdError::CheckSyntax(format!(
                "rule {expression:?} must contain a relational operator (<, <=, =, !=, >=, >)"
            ))
        })?;
    let field_token = expression[..operator_start].trim();
    let rest = &expression[operator_start..];
    let (operator, operator_len) = if rest.starts_with("<=") {
        (RelationalOperator::LessOrEqual, 2)
    } else if rest.starts_with(">=") {
        (RelationalOperator::GreaterOrEqual, 2)
    } else if rest.starts_with("!=") {
        (RelationalOperator::NotEqual, 2)
    } else if rest.starts_with('<') {
        (RelationalOperator::Less, 1)
    } else if rest.starts_with('>') {
        (RelationalOperator::Greater, 1)
    } else if rest.starts_with('=') {
        (RelationalOperator::Equal, 1)
    } else {
        return Err(IcdError::CheckSyntax(format!(
            "operator in {expression:?} must be one of: <, <=, =, !=, >=, >"
        )));
    };
    let field = resolve_field_name(field_token, field_names)?;
    let limit_token = rest[operator_len..].trim();
    let limit: i64 = limit_token.parse().map_err(|_| {
        IcdError::CheckSyntax(format!(
            "limit in {expression:?} must be an integer literal but is {limit_token:?}"
        ))
    })?;
    Ok((field, operator, limit))
}
