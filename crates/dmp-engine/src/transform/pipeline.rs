// Pipeline: ordered rule application over one record

use std::sync::Arc;

use crate::dbf::{DbfHeader, RawRecord};
use crate::events::{EventCategory, EventSink};

use super::lookup::LookupTables;
use super::profile::MigrationProfile;
use super::rules::ColumnValue;
use super::TransformError;

/// One row shaped for the destination table. Values are ordered to
/// match [`TransformPipeline::columns`].
#[derive(Debug, Clone)]
pub struct TransformedRow {
    /// Physical index of the source record, for error reporting.
    pub source_index: u32,
    pub values: Vec<ColumnValue>,
}

/// Applies a migration profile's rules, in declaration order, to raw
/// records. Holds an immutable lookup snapshot for its whole lifetime.
pub struct TransformPipeline {
    profile: MigrationProfile,
    lookups: Arc<LookupTables>,
    events: Arc<EventSink>,
}

impl TransformPipeline {
    pub fn new(
        profile: MigrationProfile,
        lookups: Arc<LookupTables>,
        events: Arc<EventSink>,
    ) -> Self {
        Self {
            profile,
            lookups,
            events,
        }
    }

    /// Destination column names, in rule order. Fixed for the life of
    /// the pipeline.
    pub fn columns(&self) -> Vec<String> {
        self.profile
            .rules
            .iter()
            .map(|r| r.target.clone())
            .collect()
    }

    pub fn target_table(&self) -> &str {
        &self.profile.target_table
    }

    /// Check every rule's source field against the table layout before
    /// the first record flows. A missing source fails the job up
    /// front instead of nulling a column a thousand times.
    pub fn validate_sources(&self, header: &DbfHeader) -> Result<(), TransformError> {
        for rule in &self.profile.rules {
            if header.field(&rule.source).is_none() {
                return Err(TransformError::MissingSource {
                    rule: rule.name.clone(),
                    field: rule.source.clone(),
                });
            }
        }
        Ok(())
    }

    /// Transform one record. Warnings (lookup misses, bad dates) go to
    /// the event stream; only a required-column violation fails the
    /// record.
    pub fn apply(&self, raw: &RawRecord) -> Result<TransformedRow, TransformError> {
        let mut values = Vec::with_capacity(self.profile.rules.len());

        for rule in &self.profile.rules {
            let output = rule.apply(raw, &self.lookups);

            if let Some(warning) = output.warning {
                self.events
                    .warning(EventCategory::Transform, warning);
            }

            if output.value.is_null() && rule.required {
                return Err(TransformError::RequiredNull {
                    record: raw.index,
                    rule: rule.name.clone(),
                    column: rule.target.clone(),
                });
            }

            values.push(output.value);
        }

        Ok(TransformedRow {
            source_index: raw.index,
            values,
        })
    }
}
