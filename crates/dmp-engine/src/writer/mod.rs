//! Batch writer: transactional inserts with bounded retry
//!
//! Rows accumulate into fixed-size batches; each batch commits as one
//! transaction through a [`Destination`]. A transient failure
//! (connection drop, timeout, serialization conflict) is retried with
//! exponential backoff up to a fixed bound; anything else fails the
//! batch immediately and, through the orchestrator, the job.

mod postgres;

pub use postgres::{connect_pool, PgDestination, PgDestinationFactory};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::events::{EventCategory, EventLevel, EventSink};
use crate::transform::TransformedRow;

/// Batch-level write failure.
#[derive(Error, Debug, Clone)]
pub enum WriteError {
    /// Worth retrying: the destination may recover on its own.
    #[error("transient database error: {0}")]
    Transient(String),

    /// A row violates a destination constraint. `record` is the
    /// offending row's physical position in the source file.
    #[error("constraint violation at source record {record}: {message}")]
    Constraint { record: u32, message: String },

    /// The destination table does not match the profile's columns.
    #[error("destination schema mismatch: {0}")]
    Schema(String),

    #[error("database error: {0}")]
    Fatal(String),
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }
}

/// A transactional batch-insert target.
///
/// Implementations must be atomic per call: after an error, none of
/// the rows from that call may be visible in the destination.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn insert_rows(&self, rows: &[TransformedRow]) -> Result<(), WriteError>;
}

/// Builds the destination for one job, given the table and column
/// list its profile produces.
pub trait DestinationFactory: Send + Sync {
    fn create(&self, table: &str, columns: Vec<String>) -> Arc<dyn Destination>;
}

/// A bounded group of rows committed as one transaction.
#[derive(Debug)]
pub struct Batch {
    pub number: u32,
    pub rows: Vec<TransformedRow>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Source index of the first row, for progress reporting.
    pub fn first_record(&self) -> Option<u32> {
        self.rows.first().map(|r| r.source_index)
    }
}

/// Retry policy for transient commit failures.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitResult {
    pub rows: usize,
    pub retries: u32,
}

/// Commits batches against a destination with bounded retry.
pub struct BatchWriter {
    destination: Arc<dyn Destination>,
    config: WriterConfig,
    events: Arc<EventSink>,
}

impl BatchWriter {
    pub fn new(
        destination: Arc<dyn Destination>,
        config: WriterConfig,
        events: Arc<EventSink>,
    ) -> Self {
        Self {
            destination,
            config,
            events,
        }
    }

    /// Commit one batch. Returns how many retries it took; the error
    /// path means either a non-transient failure or an exhausted retry
    /// budget.
    pub async fn commit(&self, batch: &Batch) -> Result<CommitResult, WriteError> {
        let mut attempt = 0u32;

        loop {
            match self.destination.insert_rows(&batch.rows).await {
                Ok(()) => {
                    return Ok(CommitResult {
                        rows: batch.rows.len(),
                        retries: attempt,
                    });
                }
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff_base * 2u32.pow(attempt - 1);
                    self.events.emit(
                        EventLevel::Warning,
                        EventCategory::Database,
                        format!(
                            "Batch {} commit failed, retry {}/{} in {}ms",
                            batch.number,
                            attempt,
                            self.config.max_retries,
                            delay.as_millis()
                        ),
                        Some(err.to_string()),
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
