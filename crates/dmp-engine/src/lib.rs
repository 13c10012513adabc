//! DMP Engine
//!
//! Migration engine for moving legacy DBF (dBASE) tables into a
//! PostgreSQL warehouse, applying field transformations in flight.
//!
//! # Architecture
//!
//! One pipeline per job, three stages connected by bounded queues:
//!
//! - **dbf**: lazy binary reader yielding typed raw records
//! - **transform**: ordered rule set (hash, date, lookup, calculated)
//!   shaping each record for the destination table
//! - **writer**: fixed-size batches committed as single transactions,
//!   with bounded retry on transient destination failures
//!
//! The **job** module owns the state machine (`pending -> running ->
//! completed | failed`) and the control surface; **events** carries
//! the operator-facing log stream.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dmp_engine::config::EngineConfig;
//! use dmp_engine::events::EventSink;
//! use dmp_engine::job::{JobOrchestrator, SourceFile};
//! use dmp_engine::transform::{LookupService, LookupTables, MigrationProfile};
//! use dmp_engine::writer::{connect_pool, PgDestinationFactory};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::load()?;
//!     let pool = connect_pool(&config.database).await?;
//!     let orchestrator = JobOrchestrator::new(
//!         Arc::new(PgDestinationFactory::new(pool, false)),
//!         Arc::new(LookupService::new(LookupTables::empty())),
//!         Arc::new(EventSink::new()),
//!         config.migration.clone(),
//!     );
//!
//!     let profile = MigrationProfile::ipd_visit(config.migration.fiscal_year_start_month);
//!     let job_id = orchestrator.submit(SourceFile::from_path("ipd_records_jan.dbf"), profile)?;
//!     println!("submitted {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dbf;
pub mod events;
pub mod job;
pub mod transform;
pub mod writer;

// Re-export commonly used types
pub use config::EngineConfig;
pub use events::{EventCategory, EventLevel, EventSink, LogEvent};
pub use job::{Job, JobError, JobOrchestrator, JobStatus, SourceFile};
pub use transform::{MigrationProfile, TransformPipeline};
