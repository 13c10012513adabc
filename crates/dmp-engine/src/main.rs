//! DMP Migrate - DBF to PostgreSQL migration tool

use anyhow::Result;
use clap::Parser;
use dmp_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use dmp_engine::config::EngineConfig;
use dmp_engine::dbf::{DbfReader, ReaderOptions};
use dmp_engine::events::EventSink;
use dmp_engine::job::{JobOrchestrator, JobStatus, SourceFile};
use dmp_engine::transform::{LookupService, LookupTables, MigrationProfile};
use dmp_engine::writer::{connect_pool, PgDestinationFactory};

#[derive(Parser, Debug)]
#[command(name = "dmp-migrate")]
#[command(author, version, about = "DBF to PostgreSQL migration tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Migrate a DBF file into the destination table
    Migrate {
        /// Source DBF file
        file: PathBuf,

        /// Migration profile JSON (defaults to the built-in ipd_visit
        /// profile)
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Also migrate records whose deletion flag is set
        #[arg(long)]
        include_deleted: bool,
    },

    /// Print a DBF file's header and field layout
    Inspect {
        /// Source DBF file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_level(log_level)
        .with_file_prefix("dmp-migrate");
    init_logging(&log_config)?;

    match cli.command {
        Command::Migrate {
            file,
            profile,
            include_deleted,
        } => migrate(file, profile, include_deleted).await,
        Command::Inspect { file } => inspect(file),
    }
}

async fn migrate(
    file: PathBuf,
    profile_path: Option<PathBuf>,
    include_deleted: bool,
) -> Result<()> {
    let mut config = EngineConfig::load()?;
    if include_deleted {
        config.migration.include_deleted = true;
    }

    let profile = match profile_path {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            let profile = MigrationProfile::from_json(&json)?;
            profile.validate()?;
            profile
        }
        None => MigrationProfile::ipd_visit(config.migration.fiscal_year_start_month),
    };

    let lookups = match &config.lookup_dir {
        Some(dir) => {
            let tables = LookupTables::load_dir(dir)?;
            info!(
                tables = tables.table_names().len(),
                entries = tables.entry_count(),
                "Lookup tables loaded"
            );
            tables
        }
        None => {
            warn!("No lookup directory configured; lookup rules will resolve nothing");
            LookupTables::empty()
        }
    };

    info!(
        host = %config.database.host,
        database = %config.database.database,
        table = %config.database.table,
        "Connecting to destination"
    );
    let pool = connect_pool(&config.database).await?;

    let orchestrator = JobOrchestrator::new(
        Arc::new(PgDestinationFactory::new(
            pool,
            config.migration.idempotent_inserts,
        )),
        Arc::new(LookupService::new(lookups)),
        Arc::new(EventSink::new()),
        config.migration.clone(),
    );

    let job_id = orchestrator.submit(SourceFile::from_path(&file), profile)?;
    info!(job_id = %job_id, file = %file.display(), "Migration job submitted");

    let job = orchestrator
        .wait_terminal(job_id, Duration::from_secs(24 * 60 * 60))
        .await?;

    match job.status {
        JobStatus::Completed => {
            info!(
                records_total = job.records_total,
                records_processed = job.records_processed,
                records_skipped = job.records_skipped,
                batches = job.batches_committed,
                "Migration completed"
            );
            Ok(())
        }
        status => {
            let message = job
                .failure
                .map(|f| f.message)
                .unwrap_or_else(|| "no terminal state reached".to_string());
            error!(
                status = status.as_str(),
                records_processed = job.records_processed,
                records_skipped = job.records_skipped,
                error = %message,
                "Migration did not complete"
            );
            anyhow::bail!("migration failed: {}", message);
        }
    }
}

fn inspect(file: PathBuf) -> Result<()> {
    let mut reader = DbfReader::open(&file, ReaderOptions::default())?;

    let header = reader.header().clone();
    info!(
        file = %file.display(),
        records = header.record_count,
        record_len = header.record_len,
        fields = header.fields.len(),
        last_update = ?header.last_update,
        language_driver = %format!("0x{:02x}", header.language_driver),
        "DBF header"
    );

    for field in &header.fields {
        info!(
            name = %field.name,
            field_type = field.field_type.as_str(),
            length = field.length,
            decimals = field.decimal_count,
            "Field"
        );
    }

    // Surface per-record corruption the same way a migration would.
    let mut active = 0u64;
    while let Some(result) = reader.next_record() {
        match result {
            Ok(_) => active += 1,
            Err(err) => warn!("{}", err),
        }
    }
    info!(
        active_records = active,
        deleted_records = reader.skipped_deleted(),
        "Scan complete"
    );

    Ok(())
}
