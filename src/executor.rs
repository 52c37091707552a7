//! Request-time interpreter for compiled endpoints.
//!
//! For each call the executor validates the request body against the
//! endpoint's declared parameters, resolves the datasource, materializes the
//! statement and runs it under a timeout. Nothing reaches a driver until every
//! argument has been validated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::db::{DatasourceRegistry, JsonRow, Statement};
use crate::error::ExecutionError;
use crate::template::render::{self, Materialization};
use crate::template::{EndpointSpec, ParamValue, ParameterSpec, ParameterType};

pub struct Executor {
    datasources: Arc<DatasourceRegistry>,
    materialization: Materialization,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl Executor {
    pub fn new(
        datasources: Arc<DatasourceRegistry>,
        materialization: Materialization,
        default_timeout: Duration,
        max_timeout: Duration,
    ) -> Self {
        Self {
            datasources,
            materialization,
            default_timeout,
            max_timeout,
        }
    }

    pub fn datasources(&self) -> &Arc<DatasourceRegistry> {
        &self.datasources
    }

    pub fn materialization(&self) -> Materialization {
        self.materialization
    }

    /// The caller's timeout, or the default, never above the configured cap.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Build the statement for already validated arguments.
    ///
    /// `args` must be ordered like `spec.parameters()`.
    pub fn materialize(&self, spec: &EndpointSpec, args: Vec<ParamValue>) -> Statement {
        match self.materialization {
            Materialization::Bound => Statement::bound(spec.bound_sql(), args),
            Materialization::Textual => Statement::text(render::textual_sql(spec.template(), &args)),
        }
    }

    pub async fn execute(
        &self,
        spec: &EndpointSpec,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<Vec<JsonRow>, ExecutionError> {
        let args = bind_arguments(spec.parameters(), body)?;

        let handle = self
            .datasources
            .get(spec.datasource_id())
            .ok_or_else(|| ExecutionError::DatasourceNotFound(spec.datasource_id().to_string()))?;

        let statement = self.materialize(spec, args);
        let limit = self.effective_timeout(timeout);
        let started = Instant::now();

        match tokio::time::timeout(limit, handle.source().query(&statement)).await {
            Ok(Ok(rows)) => {
                debug!(
                    path = spec.path(),
                    revision = spec.revision(),
                    datasource = handle.id(),
                    rows = rows.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "statement executed"
                );
                Ok(rows)
            }
            Ok(Err(e)) => {
                debug!(path = spec.path(), datasource = handle.id(), "statement failed: {e}");
                Err(ExecutionError::QueryExecution(e))
            }
            Err(_) => {
                warn!(
                    path = spec.path(),
                    datasource = handle.id(),
                    timeout_ms = limit.as_millis() as u64,
                    "statement timed out"
                );
                Err(ExecutionError::Timeout(limit))
            }
        }
    }
}

/// Check a request body against the declared parameters and convert each
/// value to its declared type. Fields not declared are ignored.
pub fn bind_arguments(
    parameters: &[ParameterSpec],
    body: &Value,
) -> Result<Vec<ParamValue>, ExecutionError> {
    let Value::Object(fields) = body else {
        return Err(ExecutionError::validation(
            "body",
            "request body must be a JSON object",
        ));
    };

    parameters
        .iter()
        .map(|param| match fields.get(&param.name) {
            None | Some(Value::Null) => Err(ExecutionError::validation(
                &param.name,
                format!("missing required {} parameter", param.ty),
            )),
            Some(value) => convert(param, value),
        })
        .collect()
}

fn convert(param: &ParameterSpec, value: &Value) -> Result<ParamValue, ExecutionError> {
    let mismatch = || {
        ExecutionError::validation(
            &param.name,
            format!("expected {}, got {}", param.ty, json_kind(value)),
        )
    };

    match param.ty {
        ParameterType::String => match value {
            Value::String(s) => Ok(ParamValue::Text(s.clone())),
            _ => Err(mismatch()),
        },
        ParameterType::Integer => match value {
            Value::Number(n) => integer_from_number(n)
                .map(ParamValue::Integer)
                .ok_or_else(mismatch),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(ParamValue::Integer)
                .map_err(|_| ExecutionError::validation(&param.name, format!("'{s}' is not an integer"))),
            _ => Err(mismatch()),
        },
        ParameterType::Float => match value {
            Value::Number(n) => n.as_f64().map(ParamValue::Float).ok_or_else(mismatch),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(ParamValue::Float(f)),
                _ => Err(ExecutionError::validation(
                    &param.name,
                    format!("'{s}' is not a finite number"),
                )),
            },
            _ => Err(mismatch()),
        },
    }
}

// 5 and 5.0 are both accepted; 5.5 and values beyond i64 are not.
fn integer_from_number(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then_some(f as i64)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
