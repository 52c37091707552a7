use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::envelope::{ApiError, Envelope};
use super::AppState;
use crate::db::JsonRow;
use crate::template::{compile, compiler::normalize_path, CompileRequest, EndpointSpec, ParameterSpec};

/// Optional per-request query timeout, in milliseconds.
pub const TIMEOUT_HEADER: &str = "x-query-timeout-ms";

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub async fn health() -> Json<Envelope<&'static str>> {
    Envelope::ok("health")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileBody {
    pub path: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub datasource_id: String,
    pub sql_template: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub compiled_text: String,
    pub revision: u64,
}

pub async fn compile_query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CompileBody>, JsonRejection>,
) -> ApiResult<CompileResponse> {
    let Json(body) = body?;

    let spec = compile(CompileRequest {
        path: body.path,
        sql_template: body.sql_template,
        datasource_id: body.datasource_id,
        summary: body.summary,
        description: body.description,
    })?;

    if !state.executor.datasources().contains(spec.datasource_id()) {
        warn!(
            path = spec.path(),
            datasource = spec.datasource_id(),
            "endpoint refers to a datasource that is not registered yet"
        );
    }

    let response = CompileResponse {
        compiled_text: spec.compiled_text(state.executor.materialization()),
        revision: spec.revision(),
    };
    state.endpoints.register(spec)?;
    Ok(Envelope::ok(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointView {
    pub path: String,
    pub method: String,
    pub summary: String,
    pub description: String,
    pub datasource_id: String,
    pub parameters: Vec<ParameterSpec>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&EndpointSpec> for EndpointView {
    fn from(spec: &EndpointSpec) -> Self {
        Self {
            path: spec.path().to_string(),
            method: spec.method().to_string(),
            summary: spec.summary().to_string(),
            description: spec.description().to_string(),
            datasource_id: spec.datasource_id().to_string(),
            parameters: spec.parameters().to_vec(),
            revision: spec.revision(),
            created_at: spec.created_at(),
        }
    }
}

pub async fn list_queries(State(state): State<Arc<AppState>>) -> Json<Envelope<Vec<EndpointView>>> {
    let views = state
        .endpoints
        .list()
        .iter()
        .map(|spec| EndpointView::from(spec.as_ref()))
        .collect();
    Envelope::ok(views)
}

#[derive(Debug, Deserialize)]
pub struct DeleteQueryBody {
    pub path: String,
}

pub async fn delete_query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DeleteQueryBody>, JsonRejection>,
) -> ApiResult<String> {
    let Json(body) = body?;
    let path = normalize_path(&body.path)?;
    let message = match state.endpoints.deregister(&Method::POST, &path) {
        Some(_) => format!("endpoint {path} removed"),
        None => format!("endpoint {path} was not registered"),
    };
    Ok(Envelope::ok(message))
}

#[derive(Debug, Deserialize)]
pub struct PutDatasourceBody {
    pub id: String,
    #[serde(rename = "connectionURI")]
    pub connection_uri: String,
}

pub async fn put_datasource(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PutDatasourceBody>, JsonRejection>,
) -> ApiResult<String> {
    let Json(body) = body?;
    let id = body.id.trim();
    if id.is_empty() {
        return Err(ApiError::invalid_field("id", "datasource id must not be empty"));
    }

    let replaced = state.executor.datasources().add(id, &body.connection_uri)?;
    let message = if replaced {
        format!("datasource {id} replaced")
    } else {
        format!("datasource {id} created")
    };
    Ok(Envelope::ok(message))
}

#[derive(Debug, Deserialize)]
pub struct DeleteDatasourceBody {
    pub id: String,
}

pub async fn delete_datasource(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DeleteDatasourceBody>, JsonRejection>,
) -> ApiResult<String> {
    let Json(body) = body?;
    let message = if state.executor.datasources().remove(&body.id) {
        format!("datasource {} removed", body.id)
    } else {
        format!("datasource {} was not registered", body.id)
    };
    Ok(Envelope::ok(message))
}

pub async fn list_datasources(State(state): State<Arc<AppState>>) -> Json<Envelope<Vec<String>>> {
    Envelope::ok(state.executor.datasources().ids())
}

/// `POST /dynamic/*path`: run the endpoint registered for `/<path>`.
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Vec<JsonRow>> {
    let path = format!("/{}", path.trim_end_matches('/'));
    let spec = state
        .endpoints
        .resolve(&Method::POST, &path)
        .ok_or_else(|| ApiError::endpoint_not_found(&Method::POST, &path))?;

    let timeout = requested_timeout(&headers)?;
    let body: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::malformed_body(e.to_string()))?
    };

    let rows = state.executor.execute(&spec, &body, timeout).await?;
    info!(path = %path, revision = spec.revision(), rows = rows.len(), "endpoint served");
    Ok(Envelope::ok(rows))
}

fn requested_timeout(headers: &HeaderMap) -> Result<Option<Duration>, ApiError> {
    let Some(raw) = headers.get(TIMEOUT_HEADER) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(|ms| Some(Duration::from_millis(ms)))
        .ok_or_else(|| {
            ApiError::invalid_header(
                TIMEOUT_HEADER,
                format!("{TIMEOUT_HEADER} must be a positive integer number of milliseconds"),
            )
        })
}
