use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;
use tokio_postgres::Row;

use super::value::extract_value;
use crate::template::ParamValue;

/// A result row: column name to JSON value, in column order.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// A fully materialized statement ready for a driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    /// Positional values for `$1..$n`. Empty for textual statements.
    pub params: Vec<ParamValue>,
}

impl Statement {
    pub fn bound(sql: impl Into<String>, params: Vec<ParamValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Categorized error types for SQL query failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, constraint violation)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Query cancelled by the server or by us
    Cancelled,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Cancelled => write!(f, "Cancelled"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Driver failure with the context PostgreSQL reports.
#[derive(Debug, Clone, Serialize)]
pub struct DriverError {
    pub category: ErrorCategory,
    /// SQLSTATE error code (e.g., "42601" for syntax_error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// 1-based line/column in the executed statement, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col: Option<usize>,
}

impl DriverError {
    /// Build from a tokio_postgres error, using the query text to compute
    /// line/column from the reported byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code().to_string();
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let (line, col) = match position {
                Some(pos) => byte_offset_to_line_col(query, pos as usize),
                None => (None, None),
            };

            DriverError {
                category: categorize_sqlstate(&code),
                code: Some(code),
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.is_closed() || err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            DriverError {
                category,
                code: None,
                message: err.to_string(),
                detail: err.source().map(|e| e.to_string()),
                hint: None,
                line: None,
                col: None,
            }
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)?;
        if let (Some(line), Some(col)) = (self.line, self.col) {
            write!(f, " (line {}, column {})", line, col)?;
        }
        if let Some(code) = &self.code {
            write!(f, " [SQLSTATE {}]", code)?;
        }
        Ok(())
    }
}

impl StdError for DriverError {}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len()); // PostgreSQL positions are 1-based
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        "22" | "23" | "53" | "54" | "55" => ErrorCategory::Execution,
        // 57014 = query_canceled
        "57" if code == "57014" => ErrorCategory::Cancelled,
        "57" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// Shape a driver row into a JSON object, keeping column order.
pub fn row_to_json(row: &Row) -> JsonRow {
    let mut object = JsonRow::with_capacity(row.len());
    for (i, col) in row.columns().iter().enumerate() {
        object.insert(
            col.name().to_string(),
            extract_value(row, i, col.type_()).to_json(),
        );
    }
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ParamValue;

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Syntax.to_string(), "Syntax Error");
        assert_eq!(ErrorCategory::Semantic.to_string(), "Semantic Error");
        assert_eq!(ErrorCategory::Connection.to_string(), "Connection Error");
        assert_eq!(ErrorCategory::Unknown.to_string(), "Error");
    }

    #[test]
    fn test_categorize_sqlstate() {
        assert_eq!(categorize_sqlstate("42601"), ErrorCategory::Syntax);
        assert_eq!(categorize_sqlstate("42P01"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("23505"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("25001"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("08006"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("57014"), ErrorCategory::Cancelled);
        assert_eq!(categorize_sqlstate("57P01"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("XX000"), ErrorCategory::Unknown);
        assert_eq!(categorize_sqlstate("4"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_byte_offset_to_line_col() {
        let query = "SELECT *\nFROM users\nWHERE id = 1";
        assert_eq!(byte_offset_to_line_col(query, 1), (Some(1), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 10), (Some(2), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 21), (Some(3), Some(1)));
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError {
            category: ErrorCategory::Semantic,
            code: Some("42P01".into()),
            message: "relation \"nope\" does not exist".into(),
            detail: None,
            hint: None,
            line: Some(1),
            col: Some(15),
        };
        assert_eq!(
            err.to_string(),
            "Semantic Error: relation \"nope\" does not exist (line 1, column 15) [SQLSTATE 42P01]"
        );
    }

    #[test]
    fn test_statement_constructors() {
        let s = Statement::bound("SELECT $1::int8", vec![ParamValue::Integer(1)]);
        assert_eq!(s.params.len(), 1);
        let s = Statement::text("SELECT 1");
        assert!(s.params.is_empty());
    }
}
