//! Error types for template compilation, registries and query execution.
//!
//! Every variant carries enough context (parameter name, datasource id, path)
//! for the HTTP layer to build a structured failure without string parsing.

use std::time::Duration;

use axum::http::Method;
use thiserror::Error;

use crate::db::DriverError;

/// Raised while turning a SQL template into an endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("parameter name in slot {slot} must not be empty")]
    MissingParameterName { slot: String },

    #[error(
        "type annotation '{annotation}' of parameter '{name}' is not one of \
         string, str, varchar, char, int, integer, float, double"
    )]
    InvalidTypeAnnotation { name: String, annotation: String },

    #[error("template syntax error: {0}")]
    TemplateSyntax(String),

    #[error("invalid endpoint path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

impl CompileError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::MissingParameterName { .. } => "MissingParameterName",
            CompileError::InvalidTypeAnnotation { .. } => "InvalidTypeAnnotation",
            CompileError::TemplateSyntax(_) => "TemplateSyntaxError",
            CompileError::InvalidPath { .. } => "InvalidPath",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("an endpoint is already registered for {method} {path}")]
    Conflict { method: Method, path: String },
}

/// Failures reported by a datasource driver or its connector.
#[derive(Error, Debug, Clone)]
pub enum DatasourceError {
    #[error("invalid connection URI: {0}")]
    InvalidUri(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("invalid TLS configuration: {0}")]
    Tls(String),

    #[error("{0}")]
    Query(DriverError),

    #[error("datasource is closed")]
    Closed,
}

/// Raised while serving a request against a compiled endpoint.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("invalid value for field '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("datasource '{0}' not found")]
    DatasourceNotFound(String),

    #[error("query execution failed: {0}")]
    QueryExecution(#[source] DatasourceError),

    #[error("query did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ExecutionError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ExecutionError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Validation { .. } => "ValidationError",
            ExecutionError::DatasourceNotFound(_) => "DatasourceNotFound",
            ExecutionError::QueryExecution(_) => "QueryExecutionError",
            ExecutionError::Timeout(_) => "ExecutionTimeout",
        }
    }
}
