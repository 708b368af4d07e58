//! Storage-agnostic query predicates.
//!
//! A [`Predicate`] is a tree over schema columns. The compiler produces one
//! per listing request; each store renders or evaluates it its own way
//! (parameterised SQL for PostgreSQL, direct evaluation in memory). Every
//! value list is a single node, so the shape of the tree only depends on
//! which fields and modifiers are present, never on how many values.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::{Column, Table};

/// A typed scalar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL comparison: `None` when either side is NULL or the types differ.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }

    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

/// Boolean expression over schema columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        column: Column,
        op: CompareOp,
        value: Value,
    },
    /// `column [NOT] IN (values...)`
    InList {
        column: Column,
        values: Vec<Value>,
        negated: bool,
    },
    /// `column [NOT] IN (SELECT ...)`
    InSubquery {
        column: Column,
        subquery: Box<Subquery>,
        negated: bool,
    },
    /// Case-insensitive substring match on any of `columns`.
    Contains { columns: Vec<Column>, needle: String },
}

impl Predicate {
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Predicate::And(predicates)
    }

    pub fn or(predicates: Vec<Predicate>) -> Self {
        Predicate::Or(predicates)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    pub fn compare(column: Column, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: Column, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// `column IN values` when `include`, `column NOT IN values` otherwise.
    pub fn in_list<V: Into<Value>>(
        column: Column,
        values: impl IntoIterator<Item = V>,
        include: bool,
    ) -> Self {
        Predicate::InList {
            column,
            values: values.into_iter().map(Into::into).collect(),
            negated: !include,
        }
    }

    pub fn in_subquery(column: Column, subquery: Subquery, include: bool) -> Self {
        Predicate::InSubquery {
            column,
            subquery: Box::new(subquery),
            negated: !include,
        }
    }

    pub fn contains(columns: Vec<Column>, needle: impl Into<String>) -> Self {
        Predicate::Contains {
            columns,
            needle: needle.into(),
        }
    }

    /// Number of top-level conjuncts.
    pub fn clause_count(&self) -> usize {
        match self {
            Predicate::And(parts) => parts.len(),
            Predicate::True => 0,
            _ => 1,
        }
    }
}

/// Join clause of a [`Subquery`] or [`Select`].
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: Table,
    /// Column of an already joined table.
    pub left: Column,
    /// Column of `table`.
    pub right: Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl Join {
    pub fn inner(table: Table, left: Column, right: Column) -> Self {
        Self {
            kind: JoinKind::Inner,
            table,
            left,
            right,
        }
    }

    pub fn left(table: Table, left: Column, right: Column) -> Self {
        Self {
            kind: JoinKind::Left,
            table,
            left,
            right,
        }
    }
}

/// Aggregate used in a `HAVING` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Min(Column),
    Max(Column),
    CountDistinct(Column),
}

/// `HAVING` condition over the groups of a [`Subquery`].
#[derive(Debug, Clone, PartialEq)]
pub enum Having {
    And(Vec<Having>),
    Compare {
        aggregate: Aggregate,
        op: CompareOp,
        value: Value,
    },
}

/// Uncorrelated single-column sub-select.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub select: Column,
    pub from: Table,
    pub joins: Vec<Join>,
    pub filter: Predicate,
    pub group_by: Option<Column>,
    pub having: Option<Having>,
}

impl Subquery {
    pub fn new(select: Column) -> Self {
        Self {
            select,
            from: select.table,
            joins: Vec::new(),
            filter: Predicate::True,
            group_by: None,
            having: None,
        }
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    pub fn group_by(mut self, column: Column, having: Having) -> Self {
        self.group_by = Some(column);
        self.having = Some(having);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: Column,
    pub descending: bool,
}

/// A row-returning query.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub columns: Vec<Column>,
    pub from: Table,
    pub joins: Vec<Join>,
    pub filter: Predicate,
    pub order_by: Vec<OrderBy>,
    /// Lock the selected rows of `from` until the transaction ends.
    pub for_update: bool,
}

impl Select {
    /// All columns of `table`.
    pub fn from(table: Table) -> Self {
        Self {
            columns: table.columns().to_vec(),
            from: table,
            joins: Vec::new(),
            filter: Predicate::True,
            order_by: Vec::new(),
            for_update: false,
        }
    }

    /// Append every column of a joined table.
    pub fn join(mut self, join: Join) -> Self {
        self.columns.extend_from_slice(join.table.columns());
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, column: Column, descending: bool) -> Self {
        self.order_by.push(OrderBy { column, descending });
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}

/// `UPDATE table SET ... WHERE filter`
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: Table,
    pub set: Vec<(Column, Value)>,
    pub filter: Predicate,
}

impl Update {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            set: Vec::new(),
            filter: Predicate::True,
        }
    }

    pub fn set(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.set.push((column, value.into()));
        self
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }
}

/// One result or insert row, keyed by column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<Column, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.values.insert(column, value.into());
        self
    }

    pub fn set(&mut self, column: Column, value: impl Into<Value>) {
        self.values.insert(column, value.into());
    }

    pub fn get(&self, column: &Column) -> Option<&Value> {
        self.values.get(column)
    }

    /// Missing columns read as NULL.
    pub fn value(&self, column: &Column) -> Value {
        self.values.get(column).cloned().unwrap_or(Value::Null)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Value)> {
        self.values.iter()
    }

    pub fn extend(&mut self, other: &Row) {
        for (column, value) in &other.values {
            self.values.insert(*column, value.clone());
        }
    }

    fn require(&self, column: &Column) -> Result<&Value> {
        self.values
            .get(column)
            .ok_or_else(|| Error::Internal(format!("column {} missing from row", column)))
    }

    fn mismatch(column: &Column, expected: &str, found: &Value) -> Error {
        Error::Internal(format!(
            "column {} expected {}, found {:?}",
            column, expected, found
        ))
    }

    pub fn int(&self, column: &Column) -> Result<i64> {
        match self.require(column)? {
            Value::Int(v) => Ok(*v),
            other => Err(Self::mismatch(column, "int", other)),
        }
    }

    pub fn opt_int(&self, column: &Column) -> Result<Option<i64>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(*v)),
            other => Err(Self::mismatch(column, "int", other)),
        }
    }

    pub fn text(&self, column: &Column) -> Result<String> {
        match self.require(column)? {
            Value::Text(v) => Ok(v.clone()),
            other => Err(Self::mismatch(column, "text", other)),
        }
    }

    pub fn opt_text(&self, column: &Column) -> Result<Option<String>> {
        match self.require(column)? {
            Value::Null => Ok(None),
            Value::Text(v) => Ok(Some(v.clone())),
            other => Err(Self::mismatch(column, "text", other)),
        }
    }

    pub fn bool(&self, column: &Column) -> Result<bool> {
        match self.require(column)? {
            Value::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(column, "bool", other)),
        }
    }

    pub fn timestamp(&self, column: &Column) -> Result<DateTime<Utc>> {
        match self.require(column)? {
            Value::Timestamp(v) => Ok(*v),
            other => Err(Self::mismatch(column, "timestamp", other)),
        }
    }

    pub fn uuid(&self, column: &Column) -> Result<Uuid> {
        match self.require(column)? {
            Value::Uuid(v) => Ok(*v),
            other => Err(Self::mismatch(column, "uuid", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{evidence, tags};

    #[test]
    fn test_sql_cmp_null_is_unknown() {
        assert_eq!(Value::Null.sql_cmp(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Null), None);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Text("1".into())), None);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Int(2)), Some(Ordering::Less));
    }

    #[test]
    fn test_compare_op_holds() {
        assert!(CompareOp::GtEq.holds(Ordering::Equal));
        assert!(CompareOp::GtEq.holds(Ordering::Greater));
        assert!(!CompareOp::GtEq.holds(Ordering::Less));
        assert!(CompareOp::NotEq.holds(Ordering::Less));
        assert!(!CompareOp::Lt.holds(Ordering::Equal));
    }

    #[test]
    fn test_in_list_is_single_node() {
        let p = Predicate::in_list(tags::NAME, ["a", "b", "c"], false);
        match p {
            Predicate::InList {
                column,
                values,
                negated,
            } => {
                assert_eq!(column, tags::NAME);
                assert_eq!(values.len(), 3);
                assert!(negated);
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_select_from_lists_all_columns() {
        let select = Select::from(Table::Evidence);
        assert_eq!(select.columns, evidence::ALL.to_vec());
        assert!(!select.for_update);
    }

    #[test]
    fn test_row_typed_getters() {
        let row = Row::new()
            .with(evidence::ID, 7)
            .with(evidence::DESCRIPTION, "login page");

        assert_eq!(row.int(&evidence::ID).unwrap(), 7);
        assert_eq!(row.text(&evidence::DESCRIPTION).unwrap(), "login page");
        assert!(row.text(&evidence::ID).is_err());
        assert!(row.int(&evidence::OPERATOR_ID).is_err());
        assert_eq!(row.value(&evidence::OPERATOR_ID), Value::Null);
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<String> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
    }
}
