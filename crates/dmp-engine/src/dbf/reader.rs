// Lazy single-pass record reader
//
// Opening validates the header against the actual file size before any
// record is touched; after that, records stream one fixed-length row
// at a time so arbitrarily large tables never sit in memory twice.

use encoding_rs::Encoding;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use super::header::{DbfHeader, HEADER_PREFIX_LEN};
use super::value::{decode_field, FieldValue, RawRecord};
use super::{encoding_for_language_driver, FormatError, RecordError};

const FLAG_ACTIVE: u8 = 0x20;
const FLAG_DELETED: u8 = 0x2a;

/// Reader behavior options.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Yield records whose deletion flag is set instead of skipping
    /// them.
    pub include_deleted: bool,
    /// Encoding used when the header's language driver byte is absent
    /// or unmapped. The legacy hospital exports this platform serves
    /// are Thai, so the fallback is Windows-874.
    pub fallback_encoding: &'static Encoding,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            include_deleted: false,
            fallback_encoding: encoding_rs::WINDOWS_874,
        }
    }
}

/// Streaming DBF reader. Single-pass: reaching end-of-file consumes
/// the reader's usefulness; reprocessing a file means reopening it.
pub struct DbfReader<R> {
    header: DbfHeader,
    encoding: &'static Encoding,
    options: ReaderOptions,
    inner: R,
    record_buf: Vec<u8>,
    next_index: u32,
    skipped_deleted: u64,
    exhausted: bool,
}

impl DbfReader<BufReader<File>> {
    /// Open a DBF file from disk, validating the header.
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self, FormatError> {
        let file = File::open(path.as_ref())?;
        let total_size = file.metadata()?.len();
        Self::from_reader(BufReader::new(file), total_size, options)
    }
}

impl DbfReader<Cursor<Vec<u8>>> {
    /// Open a DBF image already held in memory (uploaded byte stream).
    pub fn from_bytes(bytes: Vec<u8>, options: ReaderOptions) -> Result<Self, FormatError> {
        let total_size = bytes.len() as u64;
        Self::from_reader(Cursor::new(bytes), total_size, options)
    }
}

impl<R: Read> DbfReader<R> {
    fn from_reader(
        mut inner: R,
        total_size: u64,
        options: ReaderOptions,
    ) -> Result<Self, FormatError> {
        let mut prefix = [0u8; HEADER_PREFIX_LEN];
        inner
            .read_exact(&mut prefix)
            .map_err(|_| FormatError::TruncatedHeader(total_size as usize))?;

        let header_len = u16::from_le_bytes([prefix[8], prefix[9]]) as usize;
        if header_len < HEADER_PREFIX_LEN {
            return Err(FormatError::TruncatedHeader(header_len));
        }

        let mut header_buf = prefix.to_vec();
        header_buf.resize(header_len, 0);
        inner
            .read_exact(&mut header_buf[HEADER_PREFIX_LEN..])
            .map_err(|_| FormatError::TruncatedHeader(total_size as usize))?;

        let header = DbfHeader::parse(&header_buf)?;

        let expected = header.expected_data_size();
        if expected > total_size {
            return Err(FormatError::FileTruncated {
                expected,
                actual: total_size,
            });
        }

        let encoding = encoding_for_language_driver(header.language_driver)
            .unwrap_or(options.fallback_encoding);
        let record_buf = vec![0u8; header.record_len as usize];

        Ok(Self {
            header,
            encoding,
            options,
            inner,
            record_buf,
            next_index: 0,
            skipped_deleted: 0,
            exhausted: false,
        })
    }

    pub fn header(&self) -> &DbfHeader {
        &self.header
    }

    /// Physical records declared by the header, deleted ones included.
    pub fn records_total(&self) -> u32 {
        self.header.record_count
    }

    /// Deleted records skipped so far (zero when `include_deleted`).
    pub fn skipped_deleted(&self) -> u64 {
        self.skipped_deleted
    }

    /// Pull the next record. `None` means end of file. A `RecordError`
    /// covers only the one record; the caller may keep pulling.
    pub fn next_record(&mut self) -> Option<Result<RawRecord, RecordError>> {
        loop {
            if self.exhausted || self.next_index >= self.header.record_count {
                return None;
            }

            let index = self.next_index;
            self.next_index += 1;

            if self.inner.read_exact(&mut self.record_buf).is_err() {
                // Size was validated at open, so a short read means the
                // file changed underneath us. Nothing after it is
                // trustworthy.
                self.exhausted = true;
                return Some(Err(RecordError::Truncated { index }));
            }

            let deleted = match self.record_buf[0] {
                FLAG_ACTIVE => false,
                FLAG_DELETED => true,
                flag => {
                    // Fixed-length rows keep the stream aligned, so a
                    // bad flag poisons only this record.
                    return Some(Err(RecordError::DeletionFlag { index, flag }));
                }
            };

            if deleted && !self.options.include_deleted {
                self.skipped_deleted += 1;
                continue;
            }

            return Some(Ok(self.decode_record(index, deleted)));
        }
    }

    fn decode_record(&self, index: u32, deleted: bool) -> RawRecord {
        let mut values: Vec<(String, FieldValue)> = Vec::with_capacity(self.header.fields.len());
        let mut anomalies = Vec::new();
        let mut offset = 1usize;

        for field in &self.header.fields {
            let end = offset + field.length as usize;
            let (value, anomaly) = decode_field(field, &self.record_buf[offset..end], self.encoding);
            if let Some(note) = anomaly {
                anomalies.push(note);
            }
            values.push((field.name.clone(), value));
            offset = end;
        }

        RawRecord::new(index, deleted, values, anomalies)
    }
}
