//! A small SQL abstract syntax tree.
//!
//! Renderers build [`Select`] statements out of [`Expr`] nodes and only turn
//! them into text at the very end, so fragments can still be inspected (for
//! example to see which columns a filter touches) while a query is being
//! assembled. Rendering numbers bound parameters as `?1`, `?2`, ... in the
//! order they appear in the statement text.

mod expr;
mod select;

use chrono::{DateTime, Utc};

pub use expr::{Column, CompareOp, Expr};
pub use select::{Join, JoinKind, OrderBy, Select, SelectItem, SortOrder, TableRef};

/// Text format of bound timestamps. Lexical order matches time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A rendered statement with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    /// The SQL text with `?N` placeholders.
    pub sql: String,
    /// Bound parameter values, `params[0]` binds `?1`.
    pub params: Vec<SqlParam>,
}

impl SqlFragment {
    /// Creates a new SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Adds a parameter and returns its placeholder.
    pub fn add_param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("?{}", self.params.len())
    }

    /// Returns true if this fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Appends raw text.
    pub(crate) fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Appends a parameter placeholder.
    pub(crate) fn push_param(&mut self, param: SqlParam) {
        let placeholder = self.add_param(param);
        self.sql.push_str(&placeholder);
    }
}

impl std::fmt::Display for SqlFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
    /// Timestamp parameter.
    Timestamp(DateTime<Utc>),
    /// Null parameter.
    Null,
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    /// Creates an integer parameter.
    pub fn integer(i: i64) -> Self {
        SqlParam::Integer(i)
    }

    /// Creates a float parameter.
    pub fn float(f: f64) -> Self {
        SqlParam::Float(f)
    }

    /// Creates a timestamp parameter.
    pub fn timestamp(t: DateTime<Utc>) -> Self {
        SqlParam::Timestamp(t)
    }
}

#[cfg(feature = "sqlite")]
impl rusqlite::ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{Null, ToSqlOutput};

        Ok(match self {
            SqlParam::String(s) => ToSqlOutput::from(s.as_str()),
            SqlParam::Integer(i) => ToSqlOutput::from(*i),
            SqlParam::Float(f) => ToSqlOutput::from(*f),
            SqlParam::Timestamp(t) => ToSqlOutput::from(t.format(TIMESTAMP_FORMAT).to_string()),
            SqlParam::Null => ToSqlOutput::from(Null),
        })
    }
}
