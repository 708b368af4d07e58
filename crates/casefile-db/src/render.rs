//! PostgreSQL rendering of predicate trees and queries.
//!
//! Produces SQL with `$n` placeholders plus the parameters in placeholder
//! order. Value lists bind as one array (`= ANY($n)`, `<> ALL($n)`), so the
//! statement text only depends on the shape of the tree.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use casefile_core::predicate::{Aggregate, Having, Join, JoinKind, Subquery};
use casefile_core::{Column, ColumnType, Error, Predicate, Result, Row, Select, Table, Update, Value};

use crate::escape_like;

/// Type-safe parameter binding for rendered statements.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Int(i64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    /// Typed SQL NULL.
    Null(ColumnType),
    IntArray(Vec<i64>),
    TextArray(Vec<String>),
    BoolArray(Vec<bool>),
    TimestampArray(Vec<DateTime<Utc>>),
    UuidArray(Vec<Uuid>),
}

fn type_mismatch(column: &Column, value: &Value) -> Error {
    Error::Internal(format!(
        "value {:?} does not fit column {} ({:?})",
        value, column, column.ty
    ))
}

/// Scalar parameter for `value` compared against or stored in `column`.
fn scalar_param(column: &Column, value: &Value) -> Result<QueryParam> {
    Ok(match (column.ty, value) {
        (ty, Value::Null) => QueryParam::Null(ty),
        (ColumnType::Int, Value::Int(v)) => QueryParam::Int(*v),
        (ColumnType::Text, Value::Text(v)) => QueryParam::Text(v.clone()),
        (ColumnType::Bool, Value::Bool(v)) => QueryParam::Bool(*v),
        (ColumnType::Timestamp, Value::Timestamp(v)) => QueryParam::Timestamp(*v),
        (ColumnType::Uuid, Value::Uuid(v)) => QueryParam::Uuid(*v),
        _ => return Err(type_mismatch(column, value)),
    })
}

/// Array parameter holding the non-null `values`.
fn array_param<'a>(
    column: &Column,
    values: impl Iterator<Item = &'a Value>,
) -> Result<QueryParam> {
    let mut param = match column.ty {
        ColumnType::Int => QueryParam::IntArray(Vec::new()),
        ColumnType::Text => QueryParam::TextArray(Vec::new()),
        ColumnType::Bool => QueryParam::BoolArray(Vec::new()),
        ColumnType::Timestamp => QueryParam::TimestampArray(Vec::new()),
        ColumnType::Uuid => QueryParam::UuidArray(Vec::new()),
    };
    for value in values {
        match (&mut param, value) {
            (QueryParam::IntArray(a), Value::Int(v)) => a.push(*v),
            (QueryParam::TextArray(a), Value::Text(v)) => a.push(v.clone()),
            (QueryParam::BoolArray(a), Value::Bool(v)) => a.push(*v),
            (QueryParam::TimestampArray(a), Value::Timestamp(v)) => a.push(*v),
            (QueryParam::UuidArray(a), Value::Uuid(v)) => a.push(*v),
            _ => return Err(type_mismatch(column, value)),
        }
    }
    Ok(param)
}

fn aggregate_sql(aggregate: &Aggregate) -> String {
    match aggregate {
        Aggregate::Min(c) => format!("MIN({})", c.qualified()),
        Aggregate::Max(c) => format!("MAX({})", c.qualified()),
        Aggregate::CountDistinct(c) => format!("COUNT(DISTINCT {})", c.qualified()),
    }
}

/// Accumulates placeholders and parameters for one statement.
#[derive(Debug, Default)]
pub struct PgRenderer {
    params: Vec<QueryParam>,
    param_offset: usize,
}

impl PgRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering after `param_offset` parameters already in the statement.
    pub fn with_offset(param_offset: usize) -> Self {
        Self {
            params: Vec::new(),
            param_offset,
        }
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }

    pub fn into_params(self) -> Vec<QueryParam> {
        self.params
    }

    fn push(&mut self, param: QueryParam) -> String {
        self.params.push(param);
        format!("${}", self.param_offset + self.params.len())
    }

    /// Render a boolean expression.
    pub fn predicate(&mut self, predicate: &Predicate) -> Result<String> {
        Ok(match predicate {
            Predicate::True => "TRUE".to_string(),
            Predicate::False => "FALSE".to_string(),
            Predicate::And(parts) if parts.is_empty() => "TRUE".to_string(),
            Predicate::Or(parts) if parts.is_empty() => "FALSE".to_string(),
            Predicate::And(parts) => self.joined(parts, " AND ")?,
            Predicate::Or(parts) => self.joined(parts, " OR ")?,
            Predicate::Not(inner) => format!("NOT ({})", self.predicate(inner)?),
            Predicate::Compare { column, op, value } => {
                let placeholder = self.push(scalar_param(column, value)?);
                format!("{} {} {}", column.qualified(), op.as_sql(), placeholder)
            }
            Predicate::InList {
                column,
                values,
                negated,
            } => self.in_list(column, values, *negated)?,
            Predicate::InSubquery {
                column,
                subquery,
                negated,
            } => format!(
                "{} {} ({})",
                column.qualified(),
                if *negated { "NOT IN" } else { "IN" },
                self.subquery(subquery)?
            ),
            Predicate::Contains { columns, needle } => {
                let placeholder =
                    self.push(QueryParam::Text(format!("%{}%", escape_like(needle))));
                let terms: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{} ILIKE {}", c.qualified(), placeholder))
                    .collect();
                match terms.len() {
                    0 => "FALSE".to_string(),
                    1 => terms.concat(),
                    _ => format!("({})", terms.join(" OR ")),
                }
            }
        })
    }

    fn joined(&mut self, parts: &[Predicate], separator: &str) -> Result<String> {
        let rendered = parts
            .iter()
            .map(|p| self.predicate(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", rendered.join(separator)))
    }

    /// `IN` ignores NULL members; a NULL member makes `NOT IN` never true.
    fn in_list(&mut self, column: &Column, values: &[Value], negated: bool) -> Result<String> {
        let has_null = values.iter().any(Value::is_null);
        if negated && has_null {
            return Ok("FALSE".to_string());
        }
        if values.iter().all(Value::is_null) {
            return Ok(if negated { "TRUE" } else { "FALSE" }.to_string());
        }
        let placeholder = self.push(array_param(column, values.iter().filter(|v| !v.is_null()))?);
        Ok(if negated {
            format!("{} <> ALL({})", column.qualified(), placeholder)
        } else {
            format!("{} = ANY({})", column.qualified(), placeholder)
        })
    }

    fn joins(&self, joins: &[Join]) -> String {
        joins
            .iter()
            .map(|j| {
                let kind = match j.kind {
                    JoinKind::Inner => "INNER JOIN",
                    JoinKind::Left => "LEFT JOIN",
                };
                format!(
                    " {} {} ON {} = {}",
                    kind,
                    j.table.name(),
                    j.left.qualified(),
                    j.right.qualified()
                )
            })
            .collect()
    }

    fn having(&mut self, having: &Having) -> Result<String> {
        Ok(match having {
            Having::And(parts) if parts.is_empty() => "TRUE".to_string(),
            Having::And(parts) => {
                let rendered = parts
                    .iter()
                    .map(|h| self.having(h))
                    .collect::<Result<Vec<_>>>()?;
                format!("({})", rendered.join(" AND "))
            }
            Having::Compare {
                aggregate,
                op,
                value,
            } => {
                let param = match (aggregate, value) {
                    (Aggregate::CountDistinct(_), Value::Int(n)) => QueryParam::Int(*n),
                    (Aggregate::Min(c) | Aggregate::Max(c), value) => scalar_param(c, value)?,
                    (Aggregate::CountDistinct(c), other) => return Err(type_mismatch(c, other)),
                };
                let placeholder = self.push(param);
                format!("{} {} {}", aggregate_sql(aggregate), op.as_sql(), placeholder)
            }
        })
    }

    pub fn subquery(&mut self, subquery: &Subquery) -> Result<String> {
        let mut sql = format!(
            "SELECT {} FROM {}",
            subquery.select.qualified(),
            subquery.from.name()
        );
        sql.push_str(&self.joins(&subquery.joins));
        if subquery.filter != Predicate::True {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicate(&subquery.filter)?);
        }
        if let Some(group_by) = subquery.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.qualified());
            if let Some(having) = &subquery.having {
                sql.push_str(" HAVING ");
                sql.push_str(&self.having(having)?);
            }
        }
        Ok(sql)
    }

    pub fn select(&mut self, query: &Select) -> Result<String> {
        let columns: Vec<String> = query.columns.iter().map(Column::qualified).collect();
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), query.from.name());
        sql.push_str(&self.joins(&query.joins));
        if query.filter != Predicate::True {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicate(&query.filter)?);
        }
        if !query.order_by.is_empty() {
            let order: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    format!(
                        "{} {}",
                        o.column.qualified(),
                        if o.descending { "DESC" } else { "ASC" }
                    )
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        if query.for_update {
            sql.push_str(" FOR UPDATE OF ");
            sql.push_str(query.from.name());
        }
        Ok(sql)
    }

    /// Multi-row insert; every row must carry the same columns.
    pub fn insert(&mut self, table: Table, rows: &[Row]) -> Result<String> {
        let first = rows
            .first()
            .ok_or_else(|| Error::Internal(format!("empty insert into {}", table)))?;
        let columns: Vec<Column> = first.columns().copied().collect();
        if let Some(foreign) = columns.iter().find(|c| c.table != table) {
            return Err(Error::Internal(format!(
                "column {} does not belong to {}",
                foreign, table
            )));
        }

        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.columns().copied().eq(columns.iter().copied()) {
                return Err(Error::Internal(format!(
                    "rows inserted into {} carry different columns",
                    table
                )));
            }
            let placeholders = columns
                .iter()
                .map(|c| Ok(self.push(scalar_param(c, &row.value(c))?)))
                .collect::<Result<Vec<_>>>()?;
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            table.name(),
            names.join(", "),
            tuples.join(", ")
        ))
    }

    pub fn update(&mut self, update: &Update) -> Result<String> {
        if update.set.is_empty() {
            return Err(Error::Internal(format!(
                "update of {} sets no columns",
                update.table
            )));
        }
        let assignments = update
            .set
            .iter()
            .map(|(column, value)| {
                if column.table != update.table {
                    return Err(Error::Internal(format!(
                        "column {} does not belong to {}",
                        column, update.table
                    )));
                }
                Ok(format!("{} = {}", column.name, self.push(scalar_param(column, value)?)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "UPDATE {} SET {} WHERE {}",
            update.table.name(),
            assignments.join(", "),
            self.predicate(&update.filter)?
        ))
    }

    pub fn delete(&mut self, table: Table, filter: &Predicate) -> Result<String> {
        Ok(format!(
            "DELETE FROM {} WHERE {}",
            table.name(),
            self.predicate(filter)?
        ))
    }
}
