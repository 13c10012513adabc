// Per-job pipeline: reader -> transform -> batch writer
//
// The producer half (file I/O plus pure transforms) runs on a blocking
// thread and feeds a bounded channel; the async half drains it into
// batches and commits them strictly in file order. Backpressure from a
// slow destination therefore throttles the reader instead of buffering
// the whole file.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::MigrationConfig;
use crate::dbf::{DbfReader, RawRecord, ReaderOptions};
use crate::events::{EventCategory, EventLevel, EventSink};
use crate::transform::{TransformPipeline, TransformedRow};
use crate::writer::{Batch, BatchWriter, WriteError};

use super::types::{FailureKind, Job, JobFailure, SourceData, SourceFile};

pub(crate) struct JobRunner {
    pub job: Arc<RwLock<Job>>,
    pub source: SourceFile,
    pub pipeline: Arc<TransformPipeline>,
    pub writer: BatchWriter,
    pub events: Arc<EventSink>,
    pub settings: MigrationConfig,
    pub cancel: CancellationToken,
}

impl JobRunner {
    pub async fn run(self) {
        let (job_id, filename) = {
            let mut job = match self.job.write() {
                Ok(job) => job,
                Err(_) => return,
            };
            job.mark_running();
            (job.id, job.filename.clone())
        };

        self.events.emit(
            EventLevel::Info,
            EventCategory::Migration,
            format!("Started migration job for {}", filename),
            Some(format!(
                "Job ID: {}, target table: {}",
                job_id,
                self.pipeline.target_table()
            )),
        );

        if let Err(failure) = self.run_pipeline(&filename).await {
            let cancelled = failure.kind == FailureKind::Cancelled;
            if let Ok(mut job) = self.job.write() {
                job.mark_failed(failure.clone());
            }
            if cancelled {
                self.events.warning(
                    EventCategory::Migration,
                    format!("Migration job for {} cancelled", filename),
                );
            } else {
                self.events.emit(
                    EventLevel::Error,
                    EventCategory::Migration,
                    format!("Migration job for {} failed", filename),
                    Some(failure.message),
                );
            }
        }
    }

    async fn run_pipeline(&self, filename: &str) -> Result<(), JobFailure> {
        let reader_options = ReaderOptions {
            include_deleted: self.settings.include_deleted,
            ..ReaderOptions::default()
        };

        // Open and validate before anything flows. A FormatError here
        // is fatal to the job and not retryable without a fixed file.
        let skipped = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::channel::<TransformedRow>(self.settings.channel_capacity);

        let producer = match &self.source.data {
            SourceData::Path(path) => {
                let reader = DbfReader::open(path, reader_options)
                    .map_err(|e| JobFailure::new(FailureKind::Format, e.to_string()))?;
                self.start_producer(reader, filename, tx, Arc::clone(&skipped))?
            }
            SourceData::Bytes(bytes) => {
                let reader = DbfReader::from_bytes(bytes.as_ref().clone(), reader_options)
                    .map_err(|e| JobFailure::new(FailureKind::Format, e.to_string()))?;
                self.start_producer(reader, filename, tx, Arc::clone(&skipped))?
            }
        };

        let outcome = self.consume(rx, &skipped).await;

        match outcome {
            Ok(()) => {
                // Producer has closed the channel; collect its final
                // skip count before declaring completion.
                let _ = producer.await;
                let (processed, skipped_total) = {
                    let mut job = self
                        .job
                        .write()
                        .map_err(|_| JobFailure::new(FailureKind::Internal, "job lock poisoned"))?;
                    job.records_skipped = skipped.load(Ordering::Relaxed);
                    job.mark_completed();
                    (job.records_processed, job.records_skipped)
                };
                self.events.emit(
                    EventLevel::Success,
                    EventCategory::Migration,
                    format!(
                        "Successfully migrated {} records from {}",
                        processed, filename
                    ),
                    Some(format!(
                        "{} records skipped, PII hashed, dates normalized, fiscal year calculated",
                        skipped_total
                    )),
                );
                Ok(())
            }
            Err(failure) => {
                // Dropping the receiver already unblocked the producer;
                // record the skips observed so far.
                if let Ok(mut job) = self.job.write() {
                    job.records_skipped = skipped.load(Ordering::Relaxed);
                }
                Err(failure)
            }
        }
    }

    fn start_producer<R: Read + Send + 'static>(
        &self,
        reader: DbfReader<R>,
        filename: &str,
        tx: mpsc::Sender<TransformedRow>,
        skipped: Arc<AtomicU64>,
    ) -> Result<tokio::task::JoinHandle<()>, JobFailure> {
        let header = reader.header();

        self.pipeline
            .validate_sources(header)
            .map_err(|e| JobFailure::new(FailureKind::Transform, e.to_string()))?;

        let total = reader.records_total();
        self.events.emit(
            EventLevel::Info,
            EventCategory::FileProcessing,
            format!("DBF file validation completed for {}", filename),
            Some(format!(
                "{} records detected, {} fields, record length {}",
                total,
                header.fields.len(),
                header.record_len
            )),
        );

        if let Ok(mut job) = self.job.write() {
            job.records_total = total as u64;
        }

        let pipeline = Arc::clone(&self.pipeline);
        let events = Arc::clone(&self.events);
        let cancel = self.cancel.clone();

        Ok(tokio::task::spawn_blocking(move || {
            produce(reader, &pipeline, &events, &tx, &cancel, &skipped)
        }))
    }

    /// Drain rows into batches and commit them in order. Cancellation
    /// is observed between receives, so an in-flight commit always
    /// finishes.
    async fn consume(
        &self,
        mut rx: mpsc::Receiver<TransformedRow>,
        skipped: &AtomicU64,
    ) -> Result<(), JobFailure> {
        let mut pending: Vec<TransformedRow> = Vec::with_capacity(self.settings.batch_size);
        let mut batch_number = 0u32;

        loop {
            let next = tokio::select! {
                // Checked first so buffered rows cannot starve a
                // pending cancellation.
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(JobFailure::cancelled());
                }
                next = rx.recv() => next,
            };

            match next {
                Some(row) => {
                    pending.push(row);
                    if pending.len() >= self.settings.batch_size {
                        batch_number += 1;
                        self.commit_batch(batch_number, std::mem::take(&mut pending), skipped)
                            .await?;
                        pending.reserve(self.settings.batch_size);
                    }
                }
                None => break,
            }
        }

        if !pending.is_empty() {
            batch_number += 1;
            self.commit_batch(batch_number, pending, skipped).await?;
        }

        Ok(())
    }

    async fn commit_batch(
        &self,
        number: u32,
        rows: Vec<TransformedRow>,
        skipped: &AtomicU64,
    ) -> Result<(), JobFailure> {
        let batch = Batch { number, rows };
        let result = self.writer.commit(&batch).await;

        match result {
            Ok(commit) => {
                if let Ok(mut job) = self.job.write() {
                    job.records_processed += commit.rows as u64;
                    job.batches_committed += 1;
                    job.records_skipped = skipped.load(Ordering::Relaxed);
                }
                tracing::debug!(
                    batch = number,
                    rows = commit.rows,
                    retries = commit.retries,
                    "Batch committed"
                );
                Ok(())
            }
            Err(err) => {
                let detail = match &err {
                    WriteError::Constraint { record, .. } => {
                        format!("Failed at source record {}, transaction rolled back", record)
                    }
                    _ => format!("Failed to commit batch {}, transaction rolled back", number),
                };
                self.events.emit(
                    EventLevel::Error,
                    EventCategory::Database,
                    err.to_string(),
                    Some(detail),
                );
                Err(JobFailure::new(FailureKind::Write, err.to_string()))
            }
        }
    }
}

/// Blocking half of the pipeline: read, decode, transform, send.
/// Record-level problems are logged and counted, never fatal.
fn produce<R: Read>(
    mut reader: DbfReader<R>,
    pipeline: &TransformPipeline,
    events: &EventSink,
    tx: &mpsc::Sender<TransformedRow>,
    cancel: &CancellationToken,
    skipped: &AtomicU64,
) {
    let mut local_skips = 0u64;

    while let Some(result) = reader.next_record() {
        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(raw) => {
                report_anomalies(&raw, events);
                match pipeline.apply(&raw) {
                    Ok(row) => {
                        // A closed channel means the consumer gave up
                        // (failure or cancel); stop reading.
                        if tx.blocking_send(row).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        local_skips += 1;
                        events.warning(EventCategory::Transform, err.to_string());
                    }
                }
            }
            Err(err) => {
                local_skips += 1;
                events.warning(EventCategory::FileProcessing, err.to_string());
            }
        }

        skipped.store(local_skips + reader.skipped_deleted(), Ordering::Relaxed);
    }

    skipped.store(local_skips + reader.skipped_deleted(), Ordering::Relaxed);
}

fn report_anomalies(raw: &RawRecord, events: &EventSink) {
    for note in &raw.anomalies {
        events.warning(
            EventCategory::FileProcessing,
            format!("Record {}: {}", raw.index, note),
        );
    }
}
