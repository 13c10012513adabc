// Job orchestrator: owns every Job and its state machine
//
// States: pending -> running -> {completed, failed}; failed -> running
// only through an explicit retry, which starts a fresh run. At most
// one active run per job id; control calls against the wrong state are
// rejected, never queued.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::events::{EventCategory, EventSink};
use crate::transform::{LookupService, MigrationProfile, TransformPipeline};
use crate::writer::{BatchWriter, DestinationFactory, WriterConfig};

use super::runner::JobRunner;
use super::types::{Job, JobError, JobFailure, JobStatus, SourceFile};
use super::FailureKind;

struct JobEntry {
    job: Arc<RwLock<Job>>,
    /// Retained so a retry can re-read from record 0. Absent for jobs
    /// restored from a snapshot.
    source: Option<SourceFile>,
    profile: MigrationProfile,
    /// Cancellation token of the current run; replaced on retry.
    cancel: CancellationToken,
}

#[derive(Default)]
struct JobTable {
    entries: HashMap<Uuid, JobEntry>,
    /// Submission order, for stable listing.
    order: Vec<Uuid>,
}

/// Owns all migration jobs and drives one pipeline per running job.
pub struct JobOrchestrator {
    jobs: RwLock<JobTable>,
    destinations: Arc<dyn DestinationFactory>,
    lookups: Arc<LookupService>,
    events: Arc<EventSink>,
    settings: MigrationConfig,
}

impl JobOrchestrator {
    pub fn new(
        destinations: Arc<dyn DestinationFactory>,
        lookups: Arc<LookupService>,
        events: Arc<EventSink>,
        settings: MigrationConfig,
    ) -> Self {
        Self {
            jobs: RwLock::new(JobTable::default()),
            destinations,
            lookups,
            events,
            settings,
        }
    }

    pub fn events(&self) -> &Arc<EventSink> {
        &self.events
    }

    /// Submit a new migration job. The pipeline starts immediately;
    /// the returned id is valid for `get`/`cancel`/`retry` right away.
    pub fn submit(
        &self,
        source: SourceFile,
        profile: MigrationProfile,
    ) -> anyhow::Result<Uuid> {
        profile.validate()?;

        let job = Job::new(source.filename.clone());
        let id = job.id;
        let job = Arc::new(RwLock::new(job));
        let cancel = CancellationToken::new();

        {
            let mut table = self
                .jobs
                .write()
                .map_err(|_| anyhow::anyhow!("job table lock poisoned"))?;
            table.entries.insert(
                id,
                JobEntry {
                    job: Arc::clone(&job),
                    source: Some(source.clone()),
                    profile: profile.clone(),
                    cancel: cancel.clone(),
                },
            );
            table.order.push(id);
        }

        self.spawn_run(job, source, profile, cancel);
        Ok(id)
    }

    /// Snapshot of one job.
    pub fn get(&self, id: Uuid) -> Result<Job, JobError> {
        let table = self.jobs.read().map_err(|_| JobError::NotFound(id))?;
        let entry = table.entries.get(&id).ok_or(JobError::NotFound(id))?;
        entry
            .job
            .read()
            .map(|job| job.clone())
            .map_err(|_| JobError::NotFound(id))
    }

    /// Snapshots of all jobs, in submission order.
    pub fn list(&self) -> Vec<Job> {
        let Ok(table) = self.jobs.read() else {
            return Vec::new();
        };
        table
            .order
            .iter()
            .filter_map(|id| table.entries.get(id))
            .filter_map(|entry| entry.job.read().ok().map(|job| job.clone()))
            .collect()
    }

    /// Request cancellation of a running job. Takes effect at the next
    /// batch boundary; the in-flight commit is allowed to finish.
    pub fn cancel(&self, id: Uuid) -> Result<(), JobError> {
        let table = self.jobs.read().map_err(|_| JobError::NotFound(id))?;
        let entry = table.entries.get(&id).ok_or(JobError::NotFound(id))?;

        let status = entry
            .job
            .read()
            .map(|job| job.status)
            .map_err(|_| JobError::NotFound(id))?;
        if status != JobStatus::Running {
            return Err(JobError::InvalidState {
                id,
                expected: JobStatus::Running,
                actual: status,
            });
        }

        entry.cancel.cancel();
        Ok(())
    }

    /// Retry a failed job: a fresh run attempt from record 0 with
    /// progress reset and the prior error cleared. Rejected while the
    /// job is in any other state, so concurrent retries cannot stack.
    pub fn retry(&self, id: Uuid) -> Result<(), JobError> {
        let (job, source, profile, cancel) = {
            let mut table = self.jobs.write().map_err(|_| JobError::NotFound(id))?;
            let entry = table.entries.get_mut(&id).ok_or(JobError::NotFound(id))?;

            {
                let mut job = entry.job.write().map_err(|_| JobError::NotFound(id))?;
                if job.status != JobStatus::Failed {
                    return Err(JobError::InvalidState {
                        id,
                        expected: JobStatus::Failed,
                        actual: job.status,
                    });
                }
                if entry.source.is_none() {
                    return Err(JobError::SourceUnavailable(id));
                }
                job.reset_for_retry();
            }

            entry.cancel = CancellationToken::new();
            (
                Arc::clone(&entry.job),
                entry.source.clone().ok_or(JobError::SourceUnavailable(id))?,
                entry.profile.clone(),
                entry.cancel.clone(),
            )
        };

        self.events.info(
            EventCategory::Migration,
            format!("Retrying migration job {}", id),
        );
        self.spawn_run(job, source, profile, cancel);
        Ok(())
    }

    /// Serializable snapshots of every job, for external persistence.
    pub fn snapshot(&self) -> Vec<Job> {
        self.list()
    }

    /// Re-register jobs from a persisted snapshot. Jobs that were
    /// mid-flight when the process died are demoted to failed; their
    /// pipelines did not survive.
    pub fn restore(&self, jobs: Vec<Job>) {
        let Ok(mut table) = self.jobs.write() else {
            return;
        };

        for mut job in jobs {
            if !job.status.is_terminal() {
                job.mark_failed(JobFailure::new(
                    FailureKind::Internal,
                    "interrupted by process restart",
                ));
            }
            let id = job.id;
            if table.entries.contains_key(&id) {
                continue;
            }
            table.entries.insert(
                id,
                JobEntry {
                    job: Arc::new(RwLock::new(job)),
                    source: None,
                    profile: MigrationProfile::ipd_visit(
                        self.settings.fiscal_year_start_month,
                    ),
                    cancel: CancellationToken::new(),
                },
            );
            table.order.push(id);
        }
    }

    /// Poll a job until it reaches a terminal state.
    pub async fn wait_terminal(&self, id: Uuid, timeout: Duration) -> Result<Job, JobError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.get(id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(job);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn spawn_run(
        &self,
        job: Arc<RwLock<Job>>,
        source: SourceFile,
        profile: MigrationProfile,
        cancel: CancellationToken,
    ) {
        let pipeline = Arc::new(TransformPipeline::new(
            profile.clone(),
            self.lookups.current(),
            Arc::clone(&self.events),
        ));
        let destination = self
            .destinations
            .create(pipeline.target_table(), pipeline.columns());
        let writer = BatchWriter::new(
            destination,
            WriterConfig {
                max_retries: self.settings.max_retries,
                backoff_base: Duration::from_millis(self.settings.retry_backoff_ms),
            },
            Arc::clone(&self.events),
        );

        let runner = JobRunner {
            job,
            source,
            pipeline,
            writer,
            events: Arc::clone(&self.events),
            settings: self.settings.clone(),
            cancel,
        };

        tokio::spawn(runner.run());
    }
}
