// Transform rules: one source field in, one destination column out
//
// Each rule is a pure function of the raw record and the lookup
// tables. A rule may report a warning (lookup miss, unparseable date)
// without failing the record; failing is reserved for the pipeline's
// required-column check.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::dbf::{FieldValue, RawRecord};
use dmp_common::hashing;

use super::lookup::LookupTables;

/// A destination-typed value, ready for parameter binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
    Bool(bool),
    Integer(i32),
    Null,
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

/// Pure functions available to `calculated` rules. Each reads declared
/// raw fields only, never the partially built output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "name")]
pub enum CalculatedFn {
    /// Fiscal year of a date: the calendar year, plus one when the
    /// month is at or past the fiscal-year start month. Thai budget
    /// years start in October.
    FiscalYear { start_month: u32 },
}

/// The operation a rule applies to its source field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Operation {
    Passthrough,
    Hash,
    DateFormat,
    Lookup { table: String },
    Calculated { function: CalculatedFn },
}

/// One named transform rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRule {
    pub name: String,
    /// Source field name in the DBF table.
    pub source: String,
    #[serde(flatten)]
    pub operation: Operation,
    /// Destination column name.
    pub target: String,
    /// Destination column is NOT NULL; a null output fails the record.
    #[serde(default)]
    pub required: bool,
}

/// Result of applying one rule: the output value plus an optional
/// warning the pipeline forwards to the event stream.
pub(crate) struct RuleOutput {
    pub value: ColumnValue,
    pub warning: Option<String>,
}

impl RuleOutput {
    fn value(value: ColumnValue) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    fn null_with_warning(warning: String) -> Self {
        Self {
            value: ColumnValue::Null,
            warning: Some(warning),
        }
    }
}

impl TransformRule {
    pub(crate) fn apply(&self, raw: &RawRecord, lookups: &LookupTables) -> RuleOutput {
        let source = raw.get(&self.source).unwrap_or(&FieldValue::Null);

        match &self.operation {
            Operation::Passthrough => RuleOutput::value(passthrough(source)),
            Operation::Hash => RuleOutput::value(hash(source)),
            Operation::DateFormat => self.date_format(raw, source),
            Operation::Lookup { table } => self.lookup(raw, source, table, lookups),
            Operation::Calculated {
                function: CalculatedFn::FiscalYear { start_month },
            } => self.fiscal_year(raw, source, *start_month),
        }
    }

    fn date_format(&self, raw: &RawRecord, source: &FieldValue) -> RuleOutput {
        match as_date(source) {
            DateResult::Date(d) => RuleOutput::value(ColumnValue::Date(d)),
            DateResult::Absent => RuleOutput::value(ColumnValue::Null),
            DateResult::Invalid(text) => RuleOutput::null_with_warning(format!(
                "record {}: {} has invalid date {:?}",
                raw.index, self.source, text
            )),
        }
    }

    fn lookup(
        &self,
        raw: &RawRecord,
        source: &FieldValue,
        table: &str,
        lookups: &LookupTables,
    ) -> RuleOutput {
        let Some(code) = source.to_text() else {
            return RuleOutput::value(ColumnValue::Null);
        };
        match lookups.resolve(table, &code) {
            Some(name) => RuleOutput::value(ColumnValue::Text(name.to_string())),
            None => RuleOutput::null_with_warning(format!(
                "record {}: unresolved {} code {:?}",
                raw.index, table, code
            )),
        }
    }

    fn fiscal_year(&self, raw: &RawRecord, source: &FieldValue, start_month: u32) -> RuleOutput {
        match as_date(source) {
            DateResult::Date(d) => {
                let mut year = d.year();
                if d.month() >= start_month {
                    year += 1;
                }
                RuleOutput::value(ColumnValue::Integer(year))
            }
            DateResult::Absent => RuleOutput::value(ColumnValue::Null),
            DateResult::Invalid(text) => RuleOutput::null_with_warning(format!(
                "record {}: {} is not a date ({:?}), fiscal year unset",
                raw.index, self.source, text
            )),
        }
    }
}

fn passthrough(source: &FieldValue) -> ColumnValue {
    match source {
        FieldValue::Character(s) => ColumnValue::Text(s.clone()),
        FieldValue::Numeric(n) => ColumnValue::Number(*n),
        FieldValue::Date(d) => ColumnValue::Date(*d),
        FieldValue::Logical(b) => ColumnValue::Bool(*b),
        FieldValue::Null => ColumnValue::Null,
    }
}

fn hash(source: &FieldValue) -> ColumnValue {
    match source.to_text() {
        Some(text) => match hashing::hash_pii(&text) {
            Some(digest) => ColumnValue::Text(digest),
            None => ColumnValue::Null,
        },
        None => ColumnValue::Null,
    }
}

enum DateResult {
    Date(NaiveDate),
    Absent,
    Invalid(String),
}

/// Interpret a source value as a calendar date. Character sources may
/// carry compact `YYYYMMDD` dates when the table stores them in text
/// fields.
fn as_date(source: &FieldValue) -> DateResult {
    match source {
        FieldValue::Date(d) => DateResult::Date(*d),
        FieldValue::Null => DateResult::Absent,
        FieldValue::Character(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return DateResult::Absent;
            }
            match parse_compact_date(trimmed) {
                Some(d) => DateResult::Date(d),
                None => DateResult::Invalid(trimmed.to_string()),
            }
        }
        other => DateResult::Invalid(other.to_text().unwrap_or_default()),
    }
}

fn parse_compact_date(text: &str) -> Option<NaiveDate> {
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = text[0..4].parse().ok()?;
    let month: u32 = text[4..6].parse().ok()?;
    let day: u32 = text[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
