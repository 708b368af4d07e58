//! PostgreSQL implementation of [`RelationalStore`].

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Executor, Postgres, Row as SqlxRow, Transaction};
use tracing::{debug, trace};

use casefile_core::{
    Column, ColumnType, Predicate, RelationalStore, Result, Row, Select, StoreTransaction, Table,
    Update, Value,
};

use crate::render::{PgRenderer, QueryParam};

fn bind_params<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    params: &'q [QueryParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        q = match param {
            QueryParam::Int(v) => q.bind(v),
            QueryParam::Text(v) => q.bind(v),
            QueryParam::Bool(v) => q.bind(v),
            QueryParam::Timestamp(v) => q.bind(v),
            QueryParam::Uuid(v) => q.bind(v),
            QueryParam::Null(ColumnType::Int) => q.bind(None::<i64>),
            QueryParam::Null(ColumnType::Text) => q.bind(None::<String>),
            QueryParam::Null(ColumnType::Bool) => q.bind(None::<bool>),
            QueryParam::Null(ColumnType::Timestamp) => {
                q.bind(None::<chrono::DateTime<chrono::Utc>>)
            }
            QueryParam::Null(ColumnType::Uuid) => q.bind(None::<uuid::Uuid>),
            QueryParam::IntArray(v) => q.bind(v),
            QueryParam::TextArray(v) => q.bind(v),
            QueryParam::BoolArray(v) => q.bind(v),
            QueryParam::TimestampArray(v) => q.bind(v),
            QueryParam::UuidArray(v) => q.bind(v),
        };
    }
    q
}

/// Decode a result row by position, following the selected columns' types.
///
/// Every column decodes as nullable: a left join can null out any of them.
fn decode_row(pg_row: &PgRow, columns: &[Column]) -> Result<Row> {
    let mut row = Row::new();
    for (i, column) in columns.iter().enumerate() {
        let value = match column.ty {
            ColumnType::Int => pg_row.try_get::<Option<i64>, _>(i)?.map(Value::Int),
            ColumnType::Text => pg_row.try_get::<Option<String>, _>(i)?.map(Value::Text),
            ColumnType::Bool => pg_row.try_get::<Option<bool>, _>(i)?.map(Value::Bool),
            ColumnType::Timestamp => pg_row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(Value::Timestamp),
            ColumnType::Uuid => pg_row.try_get::<Option<uuid::Uuid>, _>(i)?.map(Value::Uuid),
        };
        row.set(*column, value.unwrap_or(Value::Null));
    }
    Ok(row)
}

async fn fetch_rows<'c, E>(executor: E, query: &Select) -> Result<Vec<Row>>
where
    E: Executor<'c, Database = Postgres>,
{
    let start = Instant::now();
    let mut renderer = PgRenderer::new();
    let sql = renderer.select(query)?;
    let params = renderer.into_params();
    trace!(subsystem = "database", component = "store", sql = %sql, "select");

    let pg_rows = bind_params(sqlx::query(&sql), &params)
        .fetch_all(executor)
        .await?;
    let rows = pg_rows
        .iter()
        .map(|r| decode_row(r, &query.columns))
        .collect::<Result<Vec<_>>>()?;

    debug!(
        subsystem = "database",
        component = "store",
        op = "select",
        db_table = query.from.name(),
        result_count = rows.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Query complete"
    );
    Ok(rows)
}

async fn execute_statement<'c, E>(
    executor: E,
    op: &'static str,
    table: Table,
    sql: String,
    params: Vec<QueryParam>,
) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let start = Instant::now();
    trace!(subsystem = "database", component = "store", sql = %sql, op);

    let affected = bind_params(sqlx::query(&sql), &params)
        .execute(executor)
        .await?
        .rows_affected();

    debug!(
        subsystem = "database",
        component = "store",
        op,
        db_table = table.name(),
        rows_affected = affected,
        duration_ms = start.elapsed().as_millis() as u64,
        "Statement complete"
    );
    Ok(affected)
}

async fn insert_rows<'c, E>(executor: E, table: Table, rows: Vec<Row>) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    if rows.is_empty() {
        return Ok(0);
    }
    let mut renderer = PgRenderer::new();
    let sql = renderer.insert(table, &rows)?;
    execute_statement(executor, "insert", table, sql, renderer.into_params()).await
}

async fn update_rows<'c, E>(executor: E, update: &Update) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut renderer = PgRenderer::new();
    let sql = renderer.update(update)?;
    execute_statement(executor, "update", update.table, sql, renderer.into_params()).await
}

async fn delete_rows<'c, E>(executor: E, table: Table, filter: &Predicate) -> Result<u64>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut renderer = PgRenderer::new();
    let sql = renderer.delete(table, filter)?;
    execute_statement(executor, "delete", table, sql, renderer.into_params()).await
}

/// Relational store over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgRelationalStore {
    pool: PgPool,
}

impl PgRelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RelationalStore for PgRelationalStore {
    type Transaction = PgStoreTransaction;

    async fn select(&self, query: &Select) -> Result<Vec<Row>> {
        fetch_rows(&self.pool, query).await
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<u64> {
        insert_rows(&self.pool, table, rows).await
    }

    async fn update(&self, update: &Update) -> Result<u64> {
        update_rows(&self.pool, update).await
    }

    async fn delete(&self, table: Table, filter: &Predicate) -> Result<u64> {
        delete_rows(&self.pool, table, filter).await
    }

    async fn begin(&self) -> Result<PgStoreTransaction> {
        let tx = self.pool.begin().await?;
        Ok(PgStoreTransaction { tx })
    }
}

/// An open PostgreSQL transaction; rolls back when dropped uncommitted.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn select(&mut self, query: &Select) -> Result<Vec<Row>> {
        fetch_rows(&mut *self.tx, query).await
    }

    async fn insert(&mut self, table: Table, rows: Vec<Row>) -> Result<u64> {
        insert_rows(&mut *self.tx, table, rows).await
    }

    async fn update(&mut self, update: &Update) -> Result<u64> {
        update_rows(&mut *self.tx, update).await
    }

    async fn delete(&mut self, table: Table, filter: &Predicate) -> Result<u64> {
        delete_rows(&mut *self.tx, table, filter).await
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
