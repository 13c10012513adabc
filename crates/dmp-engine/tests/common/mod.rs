// Shared test support: DBF byte-image builder and an in-memory
// destination with scriptable failures.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dmp_engine::config::MigrationConfig;
use dmp_engine::events::EventSink;
use dmp_engine::job::JobOrchestrator;
use dmp_engine::transform::{LookupService, LookupTables, TransformedRow};
use dmp_engine::writer::{Destination, DestinationFactory, WriteError};

pub const FLAG_ACTIVE: u8 = 0x20;
pub const FLAG_DELETED: u8 = 0x2a;

/// Builds DBF byte images for tests.
pub struct DbfBuilder {
    version: u8,
    language_driver: u8,
    fields: Vec<(String, u8, u8)>,
    records: Vec<(u8, Vec<String>)>,
}

impl Default for DbfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DbfBuilder {
    pub fn new() -> Self {
        Self {
            version: 0x03,
            language_driver: 0,
            fields: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn field(mut self, name: &str, tag: u8, length: u8) -> Self {
        self.fields.push((name.to_string(), tag, length));
        self
    }

    pub fn record(self, values: &[&str]) -> Self {
        self.raw_record(FLAG_ACTIVE, values)
    }

    pub fn deleted_record(self, values: &[&str]) -> Self {
        self.raw_record(FLAG_DELETED, values)
    }

    pub fn raw_record(mut self, flag: u8, values: &[&str]) -> Self {
        assert_eq!(values.len(), self.fields.len(), "value count != field count");
        self.records
            .push((flag, values.iter().map(|v| v.to_string()).collect()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let header_len = (32 + self.fields.len() * 32 + 1) as u16;
        let record_len = 1 + self.fields.iter().map(|(_, _, l)| *l as u16).sum::<u16>();

        let mut buf = vec![0u8; 32];
        buf[0] = self.version;
        buf[1] = 124; // 2024
        buf[2] = 1;
        buf[3] = 20;
        buf[4..8].copy_from_slice(&(self.records.len() as u32).to_le_bytes());
        buf[8..10].copy_from_slice(&header_len.to_le_bytes());
        buf[10..12].copy_from_slice(&record_len.to_le_bytes());
        buf[29] = self.language_driver;

        for (name, tag, length) in &self.fields {
            let mut entry = [0u8; 32];
            let name_bytes = name.as_bytes();
            entry[..name_bytes.len().min(11)]
                .copy_from_slice(&name_bytes[..name_bytes.len().min(11)]);
            entry[11] = *tag;
            entry[16] = *length;
            buf.extend_from_slice(&entry);
        }
        buf.push(0x0d);

        for (flag, values) in &self.records {
            buf.push(*flag);
            for ((_, tag, length), value) in self.fields.iter().zip(values) {
                buf.extend_from_slice(&pad_field(value, *tag, *length as usize));
            }
        }
        buf.push(0x1a); // EOF marker

        buf
    }
}

fn pad_field(value: &str, tag: u8, length: usize) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = vec![b' '; length];
    if bytes.len() >= length {
        out.copy_from_slice(&bytes[..length]);
    } else if tag == b'N' || tag == b'F' {
        // Numerics are right-justified.
        out[length - bytes.len()..].copy_from_slice(bytes);
    } else {
        out[..bytes.len()].copy_from_slice(bytes);
    }
    out
}

/// The standard inpatient table layout the ipd_visit profile expects.
pub fn ipd_table() -> DbfBuilder {
    DbfBuilder::new()
        .field("HN", b'C', 9)
        .field("CID", b'C', 13)
        .field("NAME", b'C', 20)
        .field("SEX", b'C', 1)
        .field("AGE", b'N', 3)
        .field("DATEADM", b'D', 8)
        .field("DATEDSC", b'D', 8)
        .field("CHANGWAT", b'C', 2)
        .field("AMPHUR", b'C', 4)
        .field("WARD", b'C', 10)
        .field("PDX", b'C', 6)
        .field("LOS", b'N', 3)
}

/// A well-formed inpatient record, in `ipd_table` field order.
pub fn ipd_record() -> Vec<&'static str> {
    vec![
        "650001234",
        "1234567890123",
        "Somchai",
        "M",
        "62",
        "20240110",
        "20240115",
        "50",
        "5001",
        "MED1",
        "J18.9",
        "5",
    ]
}

/// In-memory destination with all-or-nothing batch semantics and
/// scriptable failures.
pub struct MockDestination {
    committed: Mutex<Vec<TransformedRow>>,
    script: Mutex<VecDeque<WriteError>>,
    fail_always: Mutex<Option<WriteError>>,
    commit_delay: Mutex<Option<Duration>>,
    insert_calls: AtomicU32,
}

impl Default for MockDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDestination {
    pub fn new() -> Self {
        Self {
            committed: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fail_always: Mutex::new(None),
            commit_delay: Mutex::new(None),
            insert_calls: AtomicU32::new(0),
        }
    }

    /// Queue an error for the next insert call; later calls succeed
    /// once the queue drains.
    pub fn fail_next(&self, err: WriteError) {
        self.script.lock().unwrap().push_back(err);
    }

    /// Fail every insert until `repair` is called.
    pub fn fail_always(&self, err: WriteError) {
        *self.fail_always.lock().unwrap() = Some(err);
    }

    pub fn repair(&self) {
        *self.fail_always.lock().unwrap() = None;
    }

    pub fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock().unwrap() = Some(delay);
    }

    pub fn committed_rows(&self) -> Vec<TransformedRow> {
        self.committed.lock().unwrap().clone()
    }

    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Destination for MockDestination {
    async fn insert_rows(&self, rows: &[TransformedRow]) -> Result<(), WriteError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);

        let delay = *self.commit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.fail_always.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }

        self.committed.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }
}

pub struct MockFactory {
    pub destination: Arc<MockDestination>,
}

impl DestinationFactory for MockFactory {
    fn create(&self, _table: &str, _columns: Vec<String>) -> Arc<dyn Destination> {
        Arc::clone(&self.destination) as Arc<dyn Destination>
    }
}

/// Fast-turnaround settings for tests.
pub fn test_settings() -> MigrationConfig {
    MigrationConfig {
        batch_size: 500,
        max_retries: 3,
        retry_backoff_ms: 1,
        channel_capacity: 64,
        include_deleted: false,
        fiscal_year_start_month: 10,
        idempotent_inserts: false,
    }
}

/// Lookup tables covering the fixture records.
pub fn test_lookups() -> LookupTables {
    let mut tables = LookupTables::empty();
    tables
        .load_csv(
            "changwat",
            "code,name\n10,Bangkok\n50,Chiang Mai\n".as_bytes(),
        )
        .unwrap();
    tables
        .load_csv(
            "amphur",
            "code,name\n1001,Phra Nakhon\n5001,Mueang Chiang Mai\n".as_bytes(),
        )
        .unwrap();
    tables
}

/// Orchestrator wired to a mock destination.
pub fn test_orchestrator(
    destination: Arc<MockDestination>,
    settings: MigrationConfig,
) -> (JobOrchestrator, Arc<EventSink>) {
    let events = Arc::new(EventSink::new());
    let orchestrator = JobOrchestrator::new(
        Arc::new(MockFactory { destination }),
        Arc::new(LookupService::new(test_lookups())),
        Arc::clone(&events),
        settings,
    );
    (orchestrator, events)
}
