// Field decoding: fixed-width record bytes into typed values
//
// Every transform rule pattern-matches over this closed set of source
// kinds, so the decoder never produces an "unknown" value: anything it
// cannot interpret becomes Null, with an anomaly note when the bytes
// were non-blank.

use chrono::NaiveDate;
use encoding_rs::Encoding;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::header::{DbfField, FieldType};

/// A decoded source field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Character(String),
    Numeric(Decimal),
    Date(NaiveDate),
    Logical(bool),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Text form of the value, used for hashing and lookup keys.
    /// Null has no text form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            FieldValue::Character(s) => Some(s.clone()),
            FieldValue::Numeric(n) => Some(n.normalize().to_string()),
            FieldValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            FieldValue::Logical(b) => Some(b.to_string()),
            FieldValue::Null => None,
        }
    }
}

/// One physical record decoded from the source file.
///
/// Field order matches the table's descriptor order. Constructed once
/// by the reader and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Physical position in the file, 0-based.
    pub index: u32,
    pub deleted: bool,
    values: Vec<(String, FieldValue)>,
    /// Non-blank source values that failed to decode, e.g. an invalid
    /// calendar date. The record itself is still usable.
    pub anomalies: Vec<String>,
}

impl RawRecord {
    pub(crate) fn new(
        index: u32,
        deleted: bool,
        values: Vec<(String, FieldValue)>,
        anomalies: Vec<String>,
    ) -> Self {
        Self {
            index,
            deleted,
            values,
            anomalies,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Decode one field's bytes. Returns the value plus an anomaly note
/// when non-blank bytes could not be interpreted.
pub(crate) fn decode_field(
    field: &DbfField,
    raw: &[u8],
    encoding: &'static Encoding,
) -> (FieldValue, Option<String>) {
    match field.field_type {
        FieldType::Character => decode_character(raw, encoding),
        FieldType::Numeric | FieldType::Float => decode_numeric(field, raw),
        FieldType::Date => decode_date(field, raw),
        FieldType::Logical => decode_logical(raw),
        // Memo fields reference a .dbt sidecar that is not migrated.
        FieldType::Memo => (FieldValue::Null, None),
    }
}

fn decode_character(raw: &[u8], encoding: &'static Encoding) -> (FieldValue, Option<String>) {
    let (decoded, _, _) = encoding.decode(raw);
    let trimmed = decoded.trim_end_matches([' ', '\0']);
    if trimmed.is_empty() {
        (FieldValue::Null, None)
    } else {
        (FieldValue::Character(trimmed.to_string()), None)
    }
}

fn decode_numeric(field: &DbfField, raw: &[u8]) -> (FieldValue, Option<String>) {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (FieldValue::Null, None);
    }
    match Decimal::from_str(trimmed) {
        Ok(n) => (FieldValue::Numeric(n), None),
        Err(_) => (
            FieldValue::Null,
            Some(format!("{}: invalid numeric {:?}", field.name, trimmed)),
        ),
    }
}

fn decode_date(field: &DbfField, raw: &[u8]) -> (FieldValue, Option<String>) {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (FieldValue::Null, None);
    }

    let parsed = if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = trimmed[0..4].parse().unwrap_or(0);
        let month: u32 = trimmed[4..6].parse().unwrap_or(0);
        let day: u32 = trimmed[6..8].parse().unwrap_or(0);
        NaiveDate::from_ymd_opt(year, month, day)
    } else {
        None
    };

    match parsed {
        Some(date) => (FieldValue::Date(date), None),
        None => (
            FieldValue::Null,
            Some(format!("{}: invalid date {:?}", field.name, trimmed)),
        ),
    }
}

fn decode_logical(raw: &[u8]) -> (FieldValue, Option<String>) {
    match raw.first().copied().unwrap_or(b' ') {
        b'T' | b't' | b'Y' | b'y' => (FieldValue::Logical(true), None),
        b'F' | b'f' | b'N' | b'n' => (FieldValue::Logical(false), None),
        // '?' means explicitly unknown.
        _ => (FieldValue::Null, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, field_type: FieldType, length: u8) -> DbfField {
        DbfField {
            name: name.to_string(),
            field_type,
            length,
            decimal_count: 0,
        }
    }

    #[test]
    fn test_character_right_trimmed() {
        let f = field("NAME", FieldType::Character, 10);
        let (value, anomaly) =
            decode_field(&f, b"somchai   ", encoding_rs::WINDOWS_1252);
        assert_eq!(value, FieldValue::Character("somchai".to_string()));
        assert!(anomaly.is_none());
    }

    #[test]
    fn test_character_blank_is_null() {
        let f = field("NAME", FieldType::Character, 4);
        let (value, _) = decode_field(&f, b"    ", encoding_rs::WINDOWS_1252);
        assert_eq!(value, FieldValue::Null);
    }

    #[test]
    fn test_character_thai_codepage() {
        let f = field("AMPHUR", FieldType::Character, 4);
        // "กข" in windows-874
        let (value, _) = decode_field(&f, &[0xa1, 0xa2, 0x20, 0x20], encoding_rs::WINDOWS_874);
        assert_eq!(value, FieldValue::Character("\u{0e01}\u{0e02}".to_string()));
    }

    #[test]
    fn test_numeric_parsed_with_sign_and_decimals() {
        let f = field("COST", FieldType::Numeric, 8);
        let (value, _) = decode_field(&f, b" -123.45", encoding_rs::WINDOWS_1252);
        assert_eq!(value, FieldValue::Numeric(Decimal::from_str("-123.45").unwrap()));
    }

    #[test]
    fn test_numeric_blank_is_null_without_anomaly() {
        let f = field("COST", FieldType::Numeric, 8);
        let (value, anomaly) = decode_field(&f, b"        ", encoding_rs::WINDOWS_1252);
        assert_eq!(value, FieldValue::Null);
        assert!(anomaly.is_none());
    }

    #[test]
    fn test_numeric_garbage_is_null_with_anomaly() {
        let f = field("COST", FieldType::Numeric, 8);
        let (value, anomaly) = decode_field(&f, b"**(*(** ", encoding_rs::WINDOWS_1252);
        assert_eq!(value, FieldValue::Null);
        assert!(anomaly.unwrap().contains("COST"));
    }

    #[test]
    fn test_date_valid() {
        let f = field("DATEADM", FieldType::Date, 8);
        let (value, _) = decode_field(&f, b"20240115", encoding_rs::WINDOWS_1252);
        assert_eq!(
            value,
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
    }

    #[test]
    fn test_date_invalid_day_is_null_with_anomaly() {
        let f = field("DATEDSC", FieldType::Date, 8);
        let (value, anomaly) = decode_field(&f, b"20240231", encoding_rs::WINDOWS_1252);
        assert_eq!(value, FieldValue::Null);
        assert!(anomaly.unwrap().contains("DATEDSC"));
    }

    #[test]
    fn test_date_blank_is_null_without_anomaly() {
        let f = field("DATEDSC", FieldType::Date, 8);
        let (value, anomaly) = decode_field(&f, b"        ", encoding_rs::WINDOWS_1252);
        assert_eq!(value, FieldValue::Null);
        assert!(anomaly.is_none());
    }

    #[test]
    fn test_logical_variants() {
        let f = field("REFER", FieldType::Logical, 1);
        for (byte, expected) in [
            (b"T", FieldValue::Logical(true)),
            (b"y", FieldValue::Logical(true)),
            (b"F", FieldValue::Logical(false)),
            (b"n", FieldValue::Logical(false)),
            (b"?", FieldValue::Null),
            (b" ", FieldValue::Null),
        ] {
            let (value, _) = decode_field(&f, byte, encoding_rs::WINDOWS_1252);
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn test_to_text_normalizes_numeric() {
        assert_eq!(
            FieldValue::Numeric(Decimal::from_str("120.500").unwrap()).to_text(),
            Some("120.5".to_string())
        );
        assert_eq!(FieldValue::Null.to_text(), None);
    }
}
