use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, TypeInfo, ValueRef};

use crate::error::StoreError;
use crate::model::{ParamNameValueMap, PrimitiveType, SqlStatement, Value};
use crate::store::traits::{DbRow, SqlExecutor};

/// [`SqlExecutor`] over a PostgreSQL (PostGIS) connection pool.
#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    /// Create a new executor with its own connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

// Nulls still need a concrete type so the server can plan the statement.
fn bind_null(query: PgQuery<'_>, declared_type: PrimitiveType) -> PgQuery<'_> {
    match declared_type {
        PrimitiveType::String => query.bind(None::<String>),
        PrimitiveType::Int => query.bind(None::<i32>),
        PrimitiveType::Long => query.bind(None::<i64>),
        PrimitiveType::Double => query.bind(None::<f64>),
        PrimitiveType::Bool => query.bind(None::<bool>),
        PrimitiveType::DateTime => query.bind(None::<DateTime<Utc>>),
        PrimitiveType::Binary | PrimitiveType::Stream => query.bind(None::<Vec<u8>>),
    }
}

fn bind_params<'q>(mut query: PgQuery<'q>, params: &'q ParamNameValueMap) -> PgQuery<'q> {
    for param in params.iter() {
        query = match &param.value {
            Value::Null => bind_null(query, param.declared_type),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Long(v) => query.bind(*v),
            Value::Double(v) => query.bind(*v),
            Value::String(v) => query.bind(v.as_str()),
            Value::DateTime(v) => query.bind(*v),
            Value::Binary(v) => query.bind(v.as_slice()),
        };
    }
    query
}

fn decode_column(row: &PgRow, index: usize) -> Result<Value, StoreError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::String(row.try_get(index)?),
        "INT2" => Value::Int(i32::from(row.try_get::<i16, _>(index)?)),
        "INT4" => Value::Int(row.try_get(index)?),
        "INT8" => Value::Long(row.try_get(index)?),
        "FLOAT4" => Value::Double(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => Value::Double(row.try_get(index)?),
        "BOOL" => Value::Bool(row.try_get(index)?),
        "TIMESTAMPTZ" => Value::DateTime(row.try_get(index)?),
        "TIMESTAMP" => Value::DateTime(row.try_get::<NaiveDateTime, _>(index)?.and_utc()),
        "BYTEA" => Value::Binary(row.try_get(index)?),
        _ => return Err(StoreError::Decode { index, type_name }),
    };
    Ok(value)
}

fn decode_row(row: &PgRow) -> Result<DbRow, StoreError> {
    (0..row.len()).map(|i| decode_column(row, i)).collect()
}

fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::UniqueViolation(db.message().to_string())
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait::async_trait]
impl SqlExecutor for PostgresExecutor {
    async fn fetch_rows(&self, statement: &SqlStatement) -> Result<Vec<DbRow>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        debug!("fetch ({} params): {}", statement.params.len(), statement.sql);

        let rows = bind_params(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&mut *conn)
            .await
            .map_err(classify)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, statement: &SqlStatement) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        debug!("execute ({} params): {}", statement.params.len(), statement.sql);

        let result = bind_params(sqlx::query(&statement.sql), &statement.params)
            .execute(&mut *conn)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }
}
