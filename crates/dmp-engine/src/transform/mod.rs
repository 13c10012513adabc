//! Field transformation pipeline
//!
//! Maps each [`RawRecord`](crate::dbf::RawRecord) through an ordered
//! set of rules into a row shaped for the destination table. Rules are
//! pure functions of the raw record plus the read-only lookup tables;
//! no rule observes the partially built output row, so rules stay
//! independent and reorderable.

mod lookup;
mod pipeline;
mod profile;
mod rules;

pub use lookup::{LoadError, LookupService, LookupTables};
pub use pipeline::{TransformPipeline, TransformedRow};
pub use profile::MigrationProfile;
pub use rules::{CalculatedFn, ColumnValue, Operation, TransformRule};

use thiserror::Error;

/// Record-level transform failure. Recoverable: the record is skipped,
/// counted, and the pipeline advances. The engine never silently
/// writes a null into a required destination column.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("record {record}: required column {column} would be null (rule {rule})")]
    RequiredNull {
        record: u32,
        rule: String,
        column: String,
    },

    #[error("rule {rule} reads source field {field}, which the table does not declare")]
    MissingSource { rule: String, field: String },
}
