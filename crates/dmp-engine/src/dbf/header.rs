// DBF header and field descriptor parsing
//
// Layout reference: 32-byte fixed prefix, then one 32-byte descriptor
// per field, terminated by 0x0D. Records follow as fixed-length rows,
// each prefixed with a one-byte deletion flag.

use chrono::NaiveDate;

use super::FormatError;

/// Fixed prefix size before the field descriptor area.
pub(crate) const HEADER_PREFIX_LEN: usize = 32;

/// Size of one field descriptor entry.
pub(crate) const FIELD_DESCRIPTOR_LEN: usize = 32;

/// Terminator byte closing the field descriptor area.
pub(crate) const HEADER_TERMINATOR: u8 = 0x0d;

/// Version bytes this reader accepts (dBASE III/IV/V, Visual FoxPro,
/// and their memo-bearing variants).
const KNOWN_VERSIONS: &[u8] = &[
    0x02, 0x03, 0x04, 0x05, 0x30, 0x31, 0x43, 0x63, 0x83, 0x8b, 0xcb, 0xf5, 0xfb,
];

/// Field data type tag from the descriptor area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Character,
    Numeric,
    Float,
    Date,
    Logical,
    Memo,
}

impl FieldType {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'C' => Some(FieldType::Character),
            b'N' => Some(FieldType::Numeric),
            b'F' => Some(FieldType::Float),
            b'D' => Some(FieldType::Date),
            b'L' => Some(FieldType::Logical),
            b'M' => Some(FieldType::Memo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Character => "character",
            FieldType::Numeric => "numeric",
            FieldType::Float => "float",
            FieldType::Date => "date",
            FieldType::Logical => "logical",
            FieldType::Memo => "memo",
        }
    }
}

/// One parsed field descriptor. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct DbfField {
    pub name: String,
    pub field_type: FieldType,
    pub length: u8,
    pub decimal_count: u8,
}

/// Parsed DBF header.
#[derive(Debug, Clone)]
pub struct DbfHeader {
    pub record_count: u32,
    pub header_len: u16,
    pub record_len: u16,
    pub last_update: Option<NaiveDate>,
    pub language_driver: u8,
    pub fields: Vec<DbfField>,
}

impl DbfHeader {
    /// Parse a complete header area (`header_len` bytes, prefix plus
    /// descriptors plus terminator).
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < HEADER_PREFIX_LEN {
            return Err(FormatError::TruncatedHeader(buf.len()));
        }

        let version = buf[0];
        if !KNOWN_VERSIONS.contains(&version) {
            return Err(FormatError::UnknownVersion(version));
        }

        let last_update = parse_last_update(buf[1], buf[2], buf[3]);
        let record_count = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let header_len = u16::from_le_bytes([buf[8], buf[9]]);
        let record_len = u16::from_le_bytes([buf[10], buf[11]]);
        let language_driver = buf[29];

        if (header_len as usize) > buf.len() {
            return Err(FormatError::TruncatedHeader(buf.len()));
        }

        let fields = parse_descriptors(&buf[..header_len as usize])?;

        // Every record starts with a one-byte deletion flag.
        let layout_len: u16 = 1 + fields.iter().map(|f| f.length as u16).sum::<u16>();
        if layout_len != record_len {
            return Err(FormatError::RecordLengthMismatch {
                record_len,
                layout_len,
            });
        }

        Ok(DbfHeader {
            record_count,
            header_len,
            record_len,
            last_update,
            language_driver,
            fields,
        })
    }

    /// Bytes the data area must hold according to this header.
    pub fn expected_data_size(&self) -> u64 {
        self.header_len as u64 + self.record_len as u64 * self.record_count as u64
    }

    pub fn field(&self, name: &str) -> Option<&DbfField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

fn parse_last_update(yy: u8, mm: u8, dd: u8) -> Option<NaiveDate> {
    // Stored as years since 1900.
    NaiveDate::from_ymd_opt(1900 + yy as i32, mm as u32, dd as u32)
}

fn parse_descriptors(header: &[u8]) -> Result<Vec<DbfField>, FormatError> {
    let mut fields = Vec::new();
    let mut offset = HEADER_PREFIX_LEN;

    loop {
        if offset >= header.len() {
            return Err(FormatError::FieldDescriptors(
                "missing terminator".to_string(),
            ));
        }
        if header[offset] == HEADER_TERMINATOR {
            break;
        }
        if offset + FIELD_DESCRIPTOR_LEN > header.len() {
            return Err(FormatError::FieldDescriptors(format!(
                "descriptor at offset {} runs past the header area",
                offset
            )));
        }

        let entry = &header[offset..offset + FIELD_DESCRIPTOR_LEN];
        let name_end = entry[..11].iter().position(|&b| b == 0).unwrap_or(11);
        let name = String::from_utf8_lossy(&entry[..name_end])
            .trim()
            .to_uppercase();
        if name.is_empty() {
            return Err(FormatError::FieldDescriptors(format!(
                "empty field name at offset {}",
                offset
            )));
        }

        let field_type = FieldType::from_tag(entry[11]).ok_or_else(|| {
            FormatError::FieldDescriptors(format!(
                "field {}: unknown type tag 0x{:02x}",
                name, entry[11]
            ))
        })?;

        fields.push(DbfField {
            name,
            field_type,
            length: entry[16],
            decimal_count: entry[17],
        });

        offset += FIELD_DESCRIPTOR_LEN;
    }

    if fields.is_empty() {
        return Err(FormatError::FieldDescriptors(
            "table declares no fields".to_string(),
        ));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, tag: u8, length: u8, decimals: u8) -> [u8; 32] {
        let mut entry = [0u8; 32];
        entry[..name.len()].copy_from_slice(name.as_bytes());
        entry[11] = tag;
        entry[16] = length;
        entry[17] = decimals;
        entry
    }

    fn header_bytes(fields: &[[u8; 32]], record_len: u16, record_count: u32) -> Vec<u8> {
        let header_len = (HEADER_PREFIX_LEN + fields.len() * 32 + 1) as u16;
        let mut buf = vec![0u8; HEADER_PREFIX_LEN];
        buf[0] = 0x03;
        buf[1] = 124; // 2024
        buf[2] = 6;
        buf[3] = 15;
        buf[4..8].copy_from_slice(&record_count.to_le_bytes());
        buf[8..10].copy_from_slice(&header_len.to_le_bytes());
        buf[10..12].copy_from_slice(&record_len.to_le_bytes());
        for f in fields {
            buf.extend_from_slice(f);
        }
        buf.push(HEADER_TERMINATOR);
        buf
    }

    #[test]
    fn test_parse_valid_header() {
        let fields = [descriptor("HN", b'C', 9, 0), descriptor("AGE", b'N', 3, 0)];
        let buf = header_bytes(&fields, 13, 42);

        let header = DbfHeader::parse(&buf).unwrap();
        assert_eq!(header.record_count, 42);
        assert_eq!(header.record_len, 13);
        assert_eq!(header.fields.len(), 2);
        assert_eq!(header.fields[0].name, "HN");
        assert_eq!(header.fields[1].field_type, FieldType::Numeric);
        assert_eq!(
            header.last_update,
            NaiveDate::from_ymd_opt(2024, 6, 15)
        );
    }

    #[test]
    fn test_unknown_version_rejected() {
        let fields = [descriptor("HN", b'C', 9, 0)];
        let mut buf = header_bytes(&fields, 10, 1);
        buf[0] = 0x77;

        assert!(matches!(
            DbfHeader::parse(&buf),
            Err(FormatError::UnknownVersion(0x77))
        ));
    }

    #[test]
    fn test_record_length_mismatch_rejected() {
        let fields = [descriptor("HN", b'C', 9, 0)];
        let buf = header_bytes(&fields, 99, 1);

        assert!(matches!(
            DbfHeader::parse(&buf),
            Err(FormatError::RecordLengthMismatch {
                record_len: 99,
                layout_len: 10
            })
        ));
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        let fields = [descriptor("HN", b'X', 9, 0)];
        let buf = header_bytes(&fields, 10, 1);

        assert!(matches!(
            DbfHeader::parse(&buf),
            Err(FormatError::FieldDescriptors(_))
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(matches!(
            DbfHeader::parse(&[0x03, 0x00]),
            Err(FormatError::TruncatedHeader(2))
        ));
    }
}
