//! Parquet decode and staging table appends.
//!
//! The staging write path is deliberately dumb: decode the chunk's Parquet
//! file into record batches and append them into the pre-existing staging
//! table with plain INSERTs. No schema creation, no deduplication - a
//! retried job appends the same rows again and the promoter collapses
//! duplicates when copying into production.

use arrow_array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, TimeUnit};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use sqlx::PgPool;
use tracing::debug;

use crate::error::StageError;

/// Upper bound on bind parameters per INSERT statement.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Rows per INSERT statement regardless of column count.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

/// Parquet reader batch size.
const READ_BATCH_SIZE: usize = 8192;

/// Write seam over the warehouse staging area.
#[async_trait]
pub trait StagingWriter: Send + Sync {
    /// Append `batches` into `staging_table`, returning the rows written.
    async fn append(&self, staging_table: &str, batches: &[RecordBatch])
        -> Result<u64, StageError>;
}

/// Decode a Parquet file into record batches.
pub fn decode_parquet(data: Bytes) -> Result<Vec<RecordBatch>, StageError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(data)
        .map_err(|e| StageError::Decode(e.to_string()))?
        .with_batch_size(READ_BATCH_SIZE)
        .build()
        .map_err(|e| StageError::Decode(e.to_string()))?;

    reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StageError::Decode(e.to_string()))
}

/// PostgreSQL [`StagingWriter`].
pub struct PgStagingWriter {
    pool: PgPool,
    schema: String,
}

impl PgStagingWriter {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// The job never creates schema; a missing staging table is an operator
    /// problem, not something to paper over.
    async fn ensure_table_exists(&self, qualified_table: &str) -> Result<(), StageError> {
        let resolved: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(qualified_table)
            .fetch_one(&self.pool)
            .await?;

        if resolved.is_none() {
            return Err(StageError::StagingTableMissing(qualified_table.to_string()));
        }

        Ok(())
    }

    async fn append_batch(
        &self,
        qualified_table: &str,
        batch: &RecordBatch,
    ) -> Result<u64, StageError> {
        if batch.num_rows() == 0 {
            return Ok(0);
        }

        let schema = batch.schema();
        let columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect();

        let rows_per_statement = (MAX_BIND_PARAMS / columns.len().max(1))
            .clamp(1, MAX_ROWS_PER_STATEMENT);

        let mut written = 0u64;
        let mut start = 0;
        while start < batch.num_rows() {
            let end = (start + rows_per_statement).min(batch.num_rows());
            let sql = insert_statement(qualified_table, &columns, end - start);

            let mut query = sqlx::query(&sql);
            for row in start..end {
                for (index, column) in columns.iter().enumerate() {
                    query = bind_value(query, column, batch.column(index), row)?;
                }
            }
            query.execute(&self.pool).await?;

            written += (end - start) as u64;
            start = end;
        }

        Ok(written)
    }
}

#[async_trait]
impl StagingWriter for PgStagingWriter {
    async fn append(
        &self,
        staging_table: &str,
        batches: &[RecordBatch],
    ) -> Result<u64, StageError> {
        let qualified_table = format!(
            "{}.{}",
            quote_ident(&self.schema),
            quote_ident(staging_table)
        );

        self.ensure_table_exists(&qualified_table).await?;

        let mut total = 0;
        for batch in batches {
            total += self.append_batch(&qualified_table, batch).await?;
        }

        debug!(table = %qualified_table, rows = total, "Appended rows to staging table");

        Ok(total)
    }
}

/// Multi-row INSERT with numbered placeholders.
pub(crate) fn insert_statement(qualified_table: &str, columns: &[String], rows: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut parameter = 1;
    let groups = (0..rows)
        .map(|_| {
            let placeholders = (0..columns.len())
                .map(|_| {
                    let placeholder = format!("${}", parameter);
                    parameter += 1;
                    placeholder
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", placeholders)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table, column_list, groups
    )
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Bind one cell onto the query, mapping the Arrow type to a Postgres bind.
fn bind_value<'q>(
    query: PgQuery<'q>,
    column: &str,
    array: &ArrayRef,
    row: usize,
) -> Result<PgQuery<'q>, StageError> {
    let query = match array.data_type() {
        DataType::Boolean => {
            let values = downcast::<BooleanArray>(column, array)?;
            query.bind((!values.is_null(row)).then(|| values.value(row)))
        },
        DataType::Int16 => {
            let values = downcast::<Int16Array>(column, array)?;
            query.bind((!values.is_null(row)).then(|| values.value(row)))
        },
        DataType::Int32 => {
            let values = downcast::<Int32Array>(column, array)?;
            query.bind((!values.is_null(row)).then(|| values.value(row)))
        },
        DataType::Int64 => {
            let values = downcast::<Int64Array>(column, array)?;
            query.bind((!values.is_null(row)).then(|| values.value(row)))
        },
        DataType::Float32 => {
            let values = downcast::<Float32Array>(column, array)?;
            query.bind((!values.is_null(row)).then(|| values.value(row)))
        },
        DataType::Float64 => {
            let values = downcast::<Float64Array>(column, array)?;
            query.bind((!values.is_null(row)).then(|| values.value(row)))
        },
        DataType::Utf8 => {
            let values = downcast::<StringArray>(column, array)?;
            query.bind((!values.is_null(row)).then(|| values.value(row).to_string()))
        },
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let values = downcast::<TimestampMicrosecondArray>(column, array)?;
            let value: Option<DateTime<Utc>> = if values.is_null(row) {
                None
            } else {
                let micros = values.value(row);
                Some(DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                    StageError::Decode(format!(
                        "Column '{}' timestamp out of range: {}",
                        column, micros
                    ))
                })?)
            };
            query.bind(value)
        },
        other => {
            return Err(StageError::UnsupportedColumn {
                column: column.to_string(),
                data_type: other.to_string(),
            })
        },
    };

    Ok(query)
}

fn downcast<'a, T: Array + 'static>(
    column: &str,
    array: &'a ArrayRef,
) -> Result<&'a T, StageError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        StageError::Decode(format!("Column '{}' does not match its declared type", column))
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Parquet fixtures and a recording writer double for the crate's tests.

    use std::sync::{Arc, Mutex};

    use arrow_array::ArrayRef;
    use arrow_schema::{Field, Schema};
    use parquet::arrow::ArrowWriter;

    use super::*;

    /// Serialize `(name, array)` columns into an in-memory Parquet file.
    pub fn parquet_bytes(columns: Vec<(&str, ArrayRef)>) -> Bytes {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, array)| array).collect();
        let batch = RecordBatch::try_new(schema.clone(), arrays).unwrap();

        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        Bytes::from(buffer)
    }

    /// Writer double recording every append.
    #[derive(Default)]
    pub struct RecordingWriter {
        pub appends: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl StagingWriter for RecordingWriter {
        async fn append(
            &self,
            staging_table: &str,
            batches: &[RecordBatch],
        ) -> Result<u64, StageError> {
            let rows: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();
            self.appends
                .lock()
                .unwrap()
                .push((staging_table.to_string(), rows));
            Ok(rows)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::parquet_bytes;
    use super::*;

    #[test]
    fn test_decode_parquet_roundtrip() {
        let ids: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3]));
        let names: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None, Some("c")]));
        let scores: ArrayRef = Arc::new(Float64Array::from(vec![0.5, 1.5, 2.5]));
        let data = parquet_bytes(vec![
            ("apdb_replica_chunk", ids),
            ("name", names),
            ("score", scores),
        ]);

        let batches = decode_parquet(data).unwrap();
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 3);
        assert_eq!(batches[0].num_columns(), 3);
    }

    #[test]
    fn test_decode_parquet_rejects_garbage() {
        let err = decode_parquet(Bytes::from_static(b"not a parquet file")).unwrap_err();
        assert!(matches!(err, StageError::Decode(_)));
    }

    #[test]
    fn test_insert_statement_placeholders() {
        let columns = vec!["apdb_replica_chunk".to_string(), "flux".to_string()];
        let sql = insert_statement("\"public\".\"_t_staging\"", &columns, 2);
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"_t_staging\" (\"apdb_replica_chunk\", \"flux\") \
             VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("dia_object"), "\"dia_object\"");
        assert_eq!(quote_ident("od\"d"), "\"od\"\"d\"");
    }

    #[test]
    fn test_bind_value_rejects_unsupported_types() {
        let values: ArrayRef = Arc::new(arrow_array::BinaryArray::from(vec![
            Some(b"blob".as_ref()),
        ]));
        let sql = "INSERT INTO t (c) VALUES ($1)";
        let query = sqlx::query(sql);

        let err = bind_value(query, "c", &values, 0).err().unwrap();
        assert!(matches!(err, StageError::UnsupportedColumn { .. }));
    }
}
