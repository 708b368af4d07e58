//! In-memory relational and content stores.
//!
//! [`MemoryStore`] evaluates [`Predicate`] trees directly, following SQL
//! semantics for NULL (three-valued logic, `NOT IN` over a set containing
//! NULL is unknown). A transaction holds the store lock for its lifetime and
//! works on a snapshot that is published on commit, so transactions are
//! serialized and a dropped transaction leaves no trace.
//!
//! Both stores support failure injection for exercising rollback and
//! best-effort cleanup paths.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::predicate::{
    Aggregate, Having, Join, JoinKind, OrderBy, Predicate, Row, Select, Subquery, Update, Value,
};
use crate::schema::{Column, Table};
use crate::traits::{ContentStore, RelationalStore, StoreTransaction};

/// SQL three-valued truth: `None` is UNKNOWN.
type Truth = Option<bool>;

// =============================================================================
// TABLE STATE
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<Table, Vec<Row>>,
    next_id: BTreeMap<Table, i64>,
    failing_deletes: BTreeSet<Table>,
}

impl Tables {
    fn rows(&self, table: Table) -> &[Row] {
        self.rows.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn select(&self, query: &Select) -> Result<Vec<Row>> {
        let mut matched = Vec::new();
        for row in self.joined_rows(query.from, &query.joins) {
            if self.eval(&query.filter, &row)? == Some(true) {
                matched.push(row);
            }
        }
        if !query.order_by.is_empty() {
            matched.sort_by(|a, b| compare_rows(a, b, &query.order_by));
        }
        Ok(matched
            .into_iter()
            .map(|row| {
                query
                    .columns
                    .iter()
                    .fold(Row::new(), |acc, c| acc.with(*c, row.value(c)))
            })
            .collect())
    }

    fn insert(&mut self, table: Table, rows: Vec<Row>) -> Result<u64> {
        let mut prepared = Vec::with_capacity(rows.len());
        let mut next_id = self.next_id.get(&table).copied().unwrap_or(1);

        for row in rows {
            if let Some(foreign) = row.columns().find(|c| c.table != table) {
                return Err(Error::Internal(format!(
                    "column {} inserted into {}",
                    foreign, table
                )));
            }
            let mut full = Row::new();
            for column in table.columns() {
                let mut value = row.value(column);
                if value.is_null() && Some(*column) == table.id_column() {
                    value = Value::Int(next_id);
                }
                if value.is_null() && !column.nullable {
                    return Err(Error::Storage(format!(
                        "null value in column \"{}\" violates not-null constraint",
                        column
                    )));
                }
                if let (Some(id_column), Value::Int(id)) = (table.id_column(), &value) {
                    if id_column == *column {
                        next_id = next_id.max(id + 1);
                    }
                }
                full.set(*column, value);
            }
            prepared.push(full);
        }

        let count = prepared.len() as u64;
        self.next_id.insert(table, next_id);
        self.rows.entry(table).or_default().extend(prepared);
        Ok(count)
    }

    fn update(&mut self, update: &Update) -> Result<u64> {
        let mut hits = Vec::new();
        for (idx, row) in self.rows(update.table).iter().enumerate() {
            if self.eval(&update.filter, row)? == Some(true) {
                hits.push(idx);
            }
        }
        let rows = self.rows.entry(update.table).or_default();
        for idx in &hits {
            for (column, value) in &update.set {
                rows[*idx].set(*column, value.clone());
            }
        }
        Ok(hits.len() as u64)
    }

    fn delete(&mut self, table: Table, filter: &Predicate) -> Result<u64> {
        if self.failing_deletes.contains(&table) {
            return Err(Error::Storage(format!(
                "injected failure deleting from {}",
                table
            )));
        }
        let mut keep = Vec::new();
        let mut removed = 0u64;
        for row in self.rows(table) {
            if self.eval(filter, row)? == Some(true) {
                removed += 1;
            } else {
                keep.push(row.clone());
            }
        }
        self.rows.insert(table, keep);
        Ok(removed)
    }

    /// Rows of `from` extended with the columns of each joined table.
    fn joined_rows(&self, from: Table, joins: &[Join]) -> Vec<Row> {
        let mut rows: Vec<Row> = self.rows(from).to_vec();
        for join in joins {
            let right_rows = self.rows(join.table);
            let mut next = Vec::new();
            for left in rows {
                let key = left.value(&join.left);
                let mut matched = false;
                for right in right_rows {
                    if key.sql_cmp(&right.value(&join.right)) == Some(Ordering::Equal) {
                        let mut combined = left.clone();
                        combined.extend(right);
                        next.push(combined);
                        matched = true;
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut combined = left;
                    for column in join.table.columns() {
                        combined.set(*column, Value::Null);
                    }
                    next.push(combined);
                }
            }
            rows = next;
        }
        rows
    }

    fn eval(&self, predicate: &Predicate, row: &Row) -> Result<Truth> {
        Ok(match predicate {
            Predicate::True => Some(true),
            Predicate::False => Some(false),
            Predicate::And(parts) => {
                let mut acc = Some(true);
                for part in parts {
                    acc = and(acc, self.eval(part, row)?);
                    if acc == Some(false) {
                        break;
                    }
                }
                acc
            }
            Predicate::Or(parts) => {
                let mut acc = Some(false);
                for part in parts {
                    acc = or(acc, self.eval(part, row)?);
                    if acc == Some(true) {
                        break;
                    }
                }
                acc
            }
            Predicate::Not(inner) => self.eval(inner, row)?.map(|b| !b),
            Predicate::Compare { column, op, value } => row
                .value(column)
                .sql_cmp(value)
                .map(|ordering| op.holds(ordering)),
            Predicate::InList {
                column,
                values,
                negated,
            } => membership(&row.value(column), values, *negated),
            Predicate::InSubquery {
                column,
                subquery,
                negated,
            } => {
                let values = self.subquery_values(subquery)?;
                membership(&row.value(column), &values, *negated)
            }
            Predicate::Contains { columns, needle } => {
                let needle = needle.to_lowercase();
                let mut acc = Some(false);
                for column in columns {
                    let hit = match row.value(column) {
                        Value::Null => None,
                        Value::Text(text) => Some(text.to_lowercase().contains(&needle)),
                        other => {
                            return Err(Error::Internal(format!(
                                "substring match on non-text column {} ({:?})",
                                column, other
                            )))
                        }
                    };
                    acc = or(acc, hit);
                }
                acc
            }
        })
    }

    fn subquery_values(&self, subquery: &Subquery) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for row in self.joined_rows(subquery.from, &subquery.joins) {
            if self.eval(&subquery.filter, &row)? == Some(true) {
                rows.push(row);
            }
        }

        let Some(group_column) = subquery.group_by else {
            return Ok(rows.iter().map(|r| r.value(&subquery.select)).collect());
        };

        let mut groups: BTreeMap<Value, Vec<Row>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.value(&group_column)).or_default().push(row);
        }

        let mut values = Vec::new();
        for (key, members) in groups {
            let keep = match &subquery.having {
                Some(having) => eval_having(having, &members) == Some(true),
                None => true,
            };
            if keep {
                if subquery.select == group_column {
                    values.push(key);
                } else if let Some(first) = members.first() {
                    values.push(first.value(&subquery.select));
                }
            }
        }
        Ok(values)
    }
}

fn and(a: Truth, b: Truth) -> Truth {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or(a: Truth, b: Truth) -> Truth {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// `value [NOT] IN set` with SQL NULL semantics.
fn membership(value: &Value, set: &[Value], negated: bool) -> Truth {
    let found = if set.is_empty() {
        Some(false)
    } else if value.is_null() {
        None
    } else if set
        .iter()
        .any(|v| value.sql_cmp(v) == Some(Ordering::Equal))
    {
        Some(true)
    } else if set.iter().any(Value::is_null) {
        None
    } else {
        Some(false)
    };
    if negated {
        found.map(|b| !b)
    } else {
        found
    }
}

fn aggregate(aggregate: &Aggregate, rows: &[Row]) -> Value {
    let non_null = |column: &Column| -> Vec<Value> {
        rows.iter()
            .map(|r| r.value(column))
            .filter(|v| !v.is_null())
            .collect()
    };
    match aggregate {
        Aggregate::Min(column) => non_null(column).into_iter().min().unwrap_or(Value::Null),
        Aggregate::Max(column) => non_null(column).into_iter().max().unwrap_or(Value::Null),
        Aggregate::CountDistinct(column) => {
            let distinct: BTreeSet<Value> = non_null(column).into_iter().collect();
            Value::Int(distinct.len() as i64)
        }
    }
}

fn eval_having(having: &Having, rows: &[Row]) -> Truth {
    match having {
        Having::And(parts) => parts
            .iter()
            .fold(Some(true), |acc, part| and(acc, eval_having(part, rows))),
        Having::Compare {
            aggregate: agg,
            op,
            value,
        } => aggregate(agg, rows)
            .sql_cmp(value)
            .map(|ordering| op.holds(ordering)),
    }
}

/// PostgreSQL ordering: NULLs last ascending, first descending.
fn compare_rows(a: &Row, b: &Row, order_by: &[OrderBy]) -> Ordering {
    for key in order_by {
        let ordering = match (a.value(&key.column), b.value(&key.column)) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (x, y) => x.cmp(&y),
        };
        let ordering = if key.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

// =============================================================================
// RELATIONAL STORE
// =============================================================================

/// Relational store backed by in-process tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delete from `table` fail until [`MemoryStore::clear_failures`].
    pub async fn fail_deletes_from(&self, table: Table) {
        self.tables.lock().await.failing_deletes.insert(table);
    }

    pub async fn clear_failures(&self) {
        self.tables.lock().await.failing_deletes.clear();
    }

    /// Committed rows of `table`, with every column.
    pub async fn rows(&self, table: Table) -> Vec<Row> {
        self.tables.lock().await.rows(table).to_vec()
    }

    pub async fn count(&self, table: Table) -> usize {
        self.tables.lock().await.rows(table).len()
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn select(&self, query: &Select) -> Result<Vec<Row>> {
        self.tables.lock().await.select(query)
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<u64> {
        let mut tx = self.begin().await?;
        let count = tx.insert(table, rows).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn update(&self, update: &Update) -> Result<u64> {
        let mut tx = self.begin().await?;
        let count = tx.update(update).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn delete(&self, table: Table, filter: &Predicate) -> Result<u64> {
        let mut tx = self.begin().await?;
        let count = tx.delete(table, filter).await?;
        tx.commit().await?;
        Ok(count)
    }

    async fn begin(&self) -> Result<MemoryTransaction> {
        let guard = self.tables.clone().lock_owned().await;
        let snapshot = guard.clone();
        trace!(subsystem = "core", component = "memory_store", "Transaction started");
        Ok(MemoryTransaction { guard, snapshot })
    }
}

/// Snapshot transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Tables,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn select(&mut self, query: &Select) -> Result<Vec<Row>> {
        self.snapshot.select(query)
    }

    async fn insert(&mut self, table: Table, rows: Vec<Row>) -> Result<u64> {
        self.snapshot.insert(table, rows)
    }

    async fn update(&mut self, update: &Update) -> Result<u64> {
        self.snapshot.update(update)
    }

    async fn delete(&mut self, table: Table, filter: &Predicate) -> Result<u64> {
        self.snapshot.delete(table, filter)
    }

    async fn commit(self) -> Result<()> {
        let MemoryTransaction {
            mut guard,
            snapshot,
        } = self;
        *guard = snapshot;
        trace!(subsystem = "core", component = "memory_store", "Transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(subsystem = "core", component = "memory_store", "Transaction rolled back");
        Ok(())
    }
}

// =============================================================================
// CONTENT STORE
// =============================================================================

/// Content store holding blobs in a map; records every delete attempt.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    delete_calls: Arc<Mutex<Vec<String>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys passed to `delete`, in call order, including failed calls.
    pub async fn delete_calls(&self) -> Vec<String> {
        self.delete_calls.lock().await.clone()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no such key: {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_calls.lock().await.push(key.to_string());
        match self.blobs.lock().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("no such key: {}", key))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.lock().await.contains_key(key))
    }
}
