// PostgreSQL destination
//
// One transaction per batch, multi-row INSERT built with QueryBuilder.
// Postgres limits a statement to 65,535 bind parameters; batch sizes
// stay far below that (500 rows of ~13 columns), so one statement per
// batch is safe.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::{Acquire, QueryBuilder};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::transform::{ColumnValue, TransformedRow};

use super::{Destination, DestinationFactory, WriteError};
use std::sync::Arc;

/// Build the shared connection pool for the destination store.
pub async fn connect_pool(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url())
        .await?;
    Ok(pool)
}

/// Writes transformed rows into one Postgres table.
pub struct PgDestination {
    pool: PgPool,
    table: String,
    columns: Vec<String>,
    idempotent_inserts: bool,
}

impl PgDestination {
    pub fn new(
        pool: PgPool,
        table: impl Into<String>,
        columns: Vec<String>,
        idempotent_inserts: bool,
    ) -> Self {
        Self {
            pool,
            table: table.into(),
            columns,
            idempotent_inserts,
        }
    }

    fn insert_builder<'a>(&self, rows: &'a [TransformedRow]) -> QueryBuilder<'a, Postgres> {
        let mut builder = QueryBuilder::new(format!("INSERT INTO {} (", quote_ident(&self.table)));

        let mut separated = builder.separated(", ");
        for column in &self.columns {
            separated.push(quote_ident(column));
        }
        builder.push(") ");

        builder.push_values(rows, |mut b, row| {
            for value in &row.values {
                match value {
                    ColumnValue::Text(s) => {
                        b.push_bind(s.clone());
                    }
                    ColumnValue::Number(n) => {
                        b.push_bind(*n);
                    }
                    ColumnValue::Date(d) => {
                        b.push_bind(*d);
                    }
                    ColumnValue::Bool(v) => {
                        b.push_bind(*v);
                    }
                    ColumnValue::Integer(i) => {
                        b.push_bind(*i);
                    }
                    ColumnValue::Null => {
                        // A literal keeps the NULL untyped; a bound
                        // None would carry a parameter type that must
                        // match the column's.
                        b.push("NULL");
                    }
                }
            }
        });

        if self.idempotent_inserts {
            builder.push(" ON CONFLICT DO NOTHING");
        }

        builder
    }

    /// Re-run a failed batch row by row under savepoints (all rolled
    /// back) to find which source record violates a constraint.
    async fn locate_offender(&self, rows: &[TransformedRow]) -> Option<u32> {
        let mut tx = self.pool.begin().await.ok()?;

        for row in rows {
            let single = std::slice::from_ref(row);
            let mut savepoint = tx.begin().await.ok()?;
            let result = self
                .insert_builder(single)
                .build()
                .execute(&mut *savepoint)
                .await;

            match result {
                Err(err) if matches!(classify(&err), ErrorClass::Constraint) => {
                    return Some(row.source_index);
                }
                _ => {
                    savepoint.rollback().await.ok()?;
                }
            }
        }

        None
    }
}

#[async_trait]
impl Destination for PgDestination {
    async fn insert_rows(&self, rows: &[TransformedRow]) -> Result<(), WriteError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.map_error(e, rows))?;

        let execute = self.insert_builder(rows).build().execute(&mut *tx).await;
        if let Err(err) = execute {
            // Dropping tx rolls the partial statement back.
            drop(tx);
            return Err(self.map_error_with_probe(err, rows).await);
        }

        tx.commit().await.map_err(|e| self.map_error(e, rows))?;
        Ok(())
    }
}

impl PgDestination {
    fn map_error(&self, err: sqlx::Error, rows: &[TransformedRow]) -> WriteError {
        match classify(&err) {
            ErrorClass::Transient => WriteError::Transient(err.to_string()),
            ErrorClass::Schema => WriteError::Schema(err.to_string()),
            ErrorClass::Constraint => WriteError::Constraint {
                record: rows.first().map(|r| r.source_index).unwrap_or(0),
                message: err.to_string(),
            },
            ErrorClass::Fatal => WriteError::Fatal(err.to_string()),
        }
    }

    async fn map_error_with_probe(
        &self,
        err: sqlx::Error,
        rows: &[TransformedRow],
    ) -> WriteError {
        if matches!(classify(&err), ErrorClass::Constraint) {
            if let Some(record) = self.locate_offender(rows).await {
                return WriteError::Constraint {
                    record,
                    message: err.to_string(),
                };
            }
        }
        self.map_error(err, rows)
    }
}

/// Creates one [`PgDestination`] per job over a shared pool.
pub struct PgDestinationFactory {
    pool: PgPool,
    idempotent_inserts: bool,
}

impl PgDestinationFactory {
    pub fn new(pool: PgPool, idempotent_inserts: bool) -> Self {
        Self {
            pool,
            idempotent_inserts,
        }
    }
}

impl DestinationFactory for PgDestinationFactory {
    fn create(&self, table: &str, columns: Vec<String>) -> Arc<dyn Destination> {
        Arc::new(PgDestination::new(
            self.pool.clone(),
            table,
            columns,
            self.idempotent_inserts,
        ))
    }
}

enum ErrorClass {
    Transient,
    Constraint,
    Schema,
    Fatal,
}

/// Sort a sqlx error into the retry taxonomy.
///
/// SQLSTATE classes: 08 connection exception, 40 transaction rollback
/// (serialization failure, deadlock), 57P03 server starting up, 23
/// integrity constraint violation, 42 syntax/undefined object.
fn classify(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            ErrorClass::Transient
        }
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => {
                let code = code.as_ref();
                if code.starts_with("08") || code.starts_with("40") || code == "57P03" {
                    ErrorClass::Transient
                } else if code.starts_with("23") {
                    ErrorClass::Constraint
                } else if code.starts_with("42") {
                    ErrorClass::Schema
                } else {
                    ErrorClass::Fatal
                }
            }
            None => ErrorClass::Fatal,
        },
        _ => ErrorClass::Fatal,
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
