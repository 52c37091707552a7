/// Endpoint compiler.
///
/// Validates a SQL template and packages it, together with its routing
/// metadata, into an immutable [`EndpointSpec`].
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::Method;
use chrono::{DateTime, Utc};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser as SqlParser;

use super::parser::parse_template;
use super::render::{self, Materialization};
use super::types::{ParameterSpec, ParsedTemplate, Segment};
use crate::error::CompileError;

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

/// Everything an operator supplies when declaring an endpoint.
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    pub path: String,
    pub sql_template: String,
    pub datasource_id: String,
    pub summary: String,
    pub description: String,
}

/// A compiled, immutable endpoint definition.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    path: String,
    method: Method,
    summary: String,
    description: String,
    datasource_id: String,
    template: ParsedTemplate,
    bound_sql: String,
    revision: u64,
    created_at: DateTime<Utc>,
}

impl EndpointSpec {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn key(&self) -> (Method, String) {
        (self.method.clone(), self.path.clone())
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn datasource_id(&self) -> &str {
        &self.datasource_id
    }

    pub fn template(&self) -> &ParsedTemplate {
        &self.template
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.template.parameters
    }

    /// Statement text used for bound execution.
    pub fn bound_sql(&self) -> &str {
        &self.bound_sql
    }

    /// Unique, strictly increasing across every compilation in the process.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The statement as it will be executed under `mode`.
    pub fn compiled_text(&self, mode: Materialization) -> String {
        match mode {
            Materialization::Bound => self.bound_sql.clone(),
            Materialization::Textual => render::textual_preview(&self.template),
        }
    }
}

/// Compile a template into an endpoint. Nothing is registered here.
pub fn compile(request: CompileRequest) -> Result<EndpointSpec, CompileError> {
    let path = normalize_path(&request.path)?;

    if request.sql_template.trim().is_empty() {
        return Err(CompileError::TemplateSyntax(
            "SQL template must not be empty".to_string(),
        ));
    }

    let template = parse_template(&request.sql_template)?;
    check_literals(&template)?;

    let bound_sql = render::bound_sql(&template);
    check_single_statement(&bound_sql)?;

    Ok(EndpointSpec {
        path,
        method: Method::POST,
        summary: request.summary,
        description: request.description,
        datasource_id: request.datasource_id,
        template,
        bound_sql,
        revision: NEXT_REVISION.fetch_add(1, Ordering::Relaxed),
        created_at: Utc::now(),
    })
}

/// Endpoint paths are absolute, have at least one segment and carry no
/// whitespace, query or fragment. A trailing `/` is dropped.
pub fn normalize_path(path: &str) -> Result<String, CompileError> {
    let invalid = |reason| CompileError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path
        .chars()
        .any(|c| c.is_whitespace() || c == '?' || c == '#')
    {
        return Err(invalid("must not contain whitespace, '?' or '#'"));
    }
    let normalized = path.trim_end_matches('/');
    if normalized.is_empty() {
        return Err(invalid("must name at least one segment"));
    }
    Ok(normalized.to_string())
}

fn check_literals(template: &ParsedTemplate) -> Result<(), CompileError> {
    if template.literals().any(|text| text.contains("\"\"\"")) {
        return Err(CompileError::TemplateSyntax(
            "SQL must not contain three consecutive double quotes".to_string(),
        ));
    }

    if let Some(Segment::Literal(last)) = template.segments.last() {
        let tail = last.trim_end();
        if tail.ends_with('"') && !tail.ends_with("\\\"") {
            return Err(CompileError::TemplateSyntax(
                "SQL must not end with a double quote; end the statement with ';'".to_string(),
            ));
        }
    }

    Ok(())
}

fn check_single_statement(sql: &str) -> Result<(), CompileError> {
    match SqlParser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) if statements.len() > 1 => Err(CompileError::TemplateSyntax(format!(
            "expected a single statement, found {}",
            statements.len()
        ))),
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!("template not understood by the SQL parser, deferring to the database: {e}");
            Ok(())
        }
    }
}
