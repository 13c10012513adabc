//! DBF (dBASE table) binary reader
//!
//! Parses the fixed-size header and field descriptor area of a DBF
//! file, then yields records lazily as [`RawRecord`]s. The reader is
//! single-pass and read-only; migration never writes back to the
//! source file.
//!
//! Error granularity follows the recovery strategy: [`FormatError`] is
//! fatal to the whole file (bad magic, inconsistent header), while
//! [`RecordError`] covers a single malformed record which the caller
//! skips and logs without aborting the run.

mod header;
mod reader;
mod value;

pub use header::{DbfField, DbfHeader, FieldType};
pub use reader::{DbfReader, ReaderOptions};
pub use value::{FieldValue, RawRecord};

use encoding_rs::Encoding;
use thiserror::Error;

/// File-level format violation. Not retryable without a corrected file.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("not a DBF file: unrecognized version byte 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("file too short for a DBF header ({0} bytes)")]
    TruncatedHeader(usize),

    #[error("malformed field descriptor area: {0}")]
    FieldDescriptors(String),

    #[error("declared record length {record_len} does not match field layout ({layout_len})")]
    RecordLengthMismatch { record_len: u16, layout_len: u16 },

    #[error("header declares {expected} bytes of table data but the file holds {actual}")]
    FileTruncated { expected: u64, actual: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record-level corruption. Recoverable: the record is skipped and the
/// reader continues with the next physical record.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record {index}: unexpected end of file")]
    Truncated { index: u32 },

    #[error("record {index}: invalid deletion flag 0x{flag:02x}")]
    DeletionFlag { index: u32, flag: u8 },
}

impl RecordError {
    /// Physical index of the record the error refers to.
    pub fn index(&self) -> u32 {
        match self {
            RecordError::Truncated { index } | RecordError::DeletionFlag { index, .. } => *index,
        }
    }
}

/// Map a DBF language driver id to a character encoding.
///
/// Only the drivers that occur in the files this platform serves are
/// mapped; anything else falls back to [`ReaderOptions::fallback_encoding`].
pub(crate) fn encoding_for_language_driver(ldid: u8) -> Option<&'static Encoding> {
    match ldid {
        0x03 | 0x57 => Some(encoding_rs::WINDOWS_1252),
        0x65 => Some(encoding_rs::IBM866),
        0x7c => Some(encoding_rs::WINDOWS_874),
        0x7d => Some(encoding_rs::WINDOWS_1255),
        0x7e => Some(encoding_rs::WINDOWS_1256),
        0xc8 => Some(encoding_rs::WINDOWS_1250),
        0xc9 => Some(encoding_rs::WINDOWS_1251),
        0xca => Some(encoding_rs::WINDOWS_1254),
        0xcb => Some(encoding_rs::WINDOWS_1253),
        0xcc => Some(encoding_rs::WINDOWS_1257),
        _ => None,
    }
}
