use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A backend row: column name -> JSON value
pub type Row = serde_json::Map<String, Value>;

/// One condition of a count predicate. All clauses of a query are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Clause {
    Eq { column: String, value: Value },
    NotEq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
}

impl Clause {
    /// A missing column never satisfies `Eq`/`In` and always satisfies `NotEq`
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Clause::Eq { column, value } => row.get(column) == Some(value),
            Clause::NotEq { column, value } => row.get(column) != Some(value),
            Clause::In { column, values } => row
                .get(column)
                .is_some_and(|actual| values.iter().any(|v| v == actual)),
        }
    }
}

/// "Count rows of `table` matching every clause", optionally counting
/// distinct values of one column instead of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountQuery {
    pub table: String,
    pub clauses: Vec<Clause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct_on: Option<String>,
}

impl CountQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            clauses: Vec::new(),
            distinct_on: None,
        }
    }

    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_not_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::NotEq {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_in<V: Into<Value>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.clauses.push(Clause::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn distinct(mut self, column: &str) -> Self {
        self.distinct_on = Some(column.to_string());
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.clauses.iter().all(|clause| clause.matches(row))
    }

    /// Evaluate the query over a set of rows
    pub fn evaluate<'a>(&self, rows: impl IntoIterator<Item = &'a Row>) -> u64 {
        let matching = rows.into_iter().filter(|row| self.matches(row));
        match &self.distinct_on {
            Some(column) => {
                let distinct: HashSet<String> = matching
                    .filter_map(|row| row.get(column))
                    .map(|v| v.to_string())
                    .collect();
                distinct.len() as u64
            }
            None => matching.count() as u64,
        }
    }
}

/// Subscription filter. Advisory only: a backend may deliver signals for rows
/// outside the filter, so consumers re-run the authoritative count query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_eq: Option<(String, Value)>,
}

impl ChangeFilter {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column_eq: None,
        }
    }

    pub fn with_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.column_eq = Some((column.to_string(), value.into()));
        self
    }

    pub fn accepts(&self, row: &Row) -> bool {
        match &self.column_eq {
            Some((column, value)) => row.get(column) == Some(value),
            None => true,
        }
    }
}
