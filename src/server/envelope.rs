//! Response envelope shared by every route.
//!
//! Success and failure both serialize as `{code, message, data}` where `code`
//! repeats the HTTP status. On failure `data` is an object whose `kind` names
//! the error, plus whatever context the error carries.

use axum::extract::rejection::JsonRejection;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::error::{CompileError, DatasourceError, ExecutionError, RegistryError};

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: StatusCode::OK.as_u16(),
            message: "success".to_string(),
            data,
        })
    }
}

/// Error returned by handlers; renders as a failure envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub data: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, data: Value) -> Self {
        Self {
            status,
            message: message.into(),
            data,
        }
    }

    pub fn endpoint_not_found(method: &Method, path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("no endpoint registered for {method} {path}"),
            json!({"kind": "EndpointNotFound", "method": method.as_str(), "path": path}),
        )
    }

    /// The path exists but does not accept `method`.
    pub fn method_not_allowed(method: &Method, path: &str) -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{method} is not allowed on {path}"),
            json!({"kind": "MethodNotAllowed", "method": method.as_str(), "path": path}),
        )
    }

    pub fn malformed_body(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            StatusCode::BAD_REQUEST,
            format!("malformed request body: {reason}"),
            json!({"kind": "MalformedBody"}),
        )
    }

    /// Same status and kind as an argument that fails endpoint validation.
    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            reason,
            json!({"kind": "ValidationError", "field": field}),
        )
    }

    pub fn invalid_header(header: &str, reason: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            reason,
            json!({"kind": "InvalidHeader", "header": header}),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), "{}", self.message);
        } else {
            debug!(status = self.status.as_u16(), "{}", self.message);
        }
        let body = Envelope {
            code: self.status.as_u16(),
            message: self.message,
            data: self.data,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::malformed_body(rejection.body_text())
    }
}

impl From<CompileError> for ApiError {
    fn from(err: CompileError) -> Self {
        let data = match &err {
            CompileError::MissingParameterName { slot } => {
                json!({"kind": err.kind(), "slot": slot})
            }
            CompileError::InvalidTypeAnnotation { name, annotation } => {
                json!({"kind": err.kind(), "parameter": name, "annotation": annotation})
            }
            CompileError::TemplateSyntax(_) => json!({"kind": err.kind()}),
            CompileError::InvalidPath { path, .. } => json!({"kind": err.kind(), "path": path}),
        };
        ApiError::new(StatusCode::BAD_REQUEST, err.to_string(), data)
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let RegistryError::Conflict { method, path } = &err;
        let data = json!({"kind": "RegistryConflict", "method": method.as_str(), "path": path});
        ApiError::new(StatusCode::CONFLICT, err.to_string(), data)
    }
}

impl From<DatasourceError> for ApiError {
    fn from(err: DatasourceError) -> Self {
        let (status, data) = match &err {
            DatasourceError::InvalidUri(_) => (
                StatusCode::BAD_REQUEST,
                json!({"kind": "InvalidConnectionUri"}),
            ),
            DatasourceError::Tls(_) => (
                StatusCode::BAD_REQUEST,
                json!({"kind": "InvalidTlsConfig"}),
            ),
            DatasourceError::Query(cause) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"kind": "DatasourceError", "cause": cause}),
            ),
            DatasourceError::Pool(_) | DatasourceError::Closed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"kind": "DatasourceError"}),
            ),
        };
        ApiError::new(status, err.to_string(), data)
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        let (status, data) = match &err {
            ExecutionError::Validation { field, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"kind": err.kind(), "field": field}),
            ),
            ExecutionError::DatasourceNotFound(id) => (
                StatusCode::NOT_FOUND,
                json!({"kind": err.kind(), "datasourceId": id}),
            ),
            ExecutionError::QueryExecution(DatasourceError::Query(cause)) => (
                StatusCode::BAD_REQUEST,
                json!({"kind": err.kind(), "cause": cause}),
            ),
            ExecutionError::QueryExecution(_) => (StatusCode::BAD_REQUEST, json!({"kind": err.kind()})),
            ExecutionError::Timeout(limit) => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({"kind": err.kind(), "timeoutMs": limit.as_millis() as u64}),
            ),
        };
        ApiError::new(status, err.to_string(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_execution_status_mapping() {
        let cases = [
            (ExecutionError::validation("id", "missing"), StatusCode::UNPROCESSABLE_ENTITY),
            (ExecutionError::DatasourceNotFound("x".into()), StatusCode::NOT_FOUND),
            (
                ExecutionError::QueryExecution(DatasourceError::Closed),
                StatusCode::BAD_REQUEST,
            ),
            (
                ExecutionError::Timeout(Duration::from_millis(10)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (err, status) in cases {
            let kind = err.kind();
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.data["kind"], kind);
        }
    }

    #[test]
    fn test_validation_data_names_field() {
        let api = ApiError::from(ExecutionError::validation("id", "missing"));
        assert_eq!(api.data, json!({"kind": "ValidationError", "field": "id"}));
    }

    #[test]
    fn test_compile_and_registry_mapping() {
        let api = ApiError::from(CompileError::TemplateSyntax("bad".into()));
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.data["kind"], "TemplateSyntaxError");

        let api = ApiError::from(RegistryError::Conflict {
            method: Method::POST,
            path: "/a".into(),
        });
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.data["method"], "POST");
    }

    #[test]
    fn test_invalid_uri_is_bad_request() {
        let api = ApiError::from(DatasourceError::InvalidUri("nope".into()));
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.data["kind"], "InvalidConnectionUri");
    }

    #[test]
    fn test_tls_failure_is_bad_request() {
        let api = ApiError::from(DatasourceError::Tls("no certificates found in ca.pem".into()));
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.data, json!({"kind": "InvalidTlsConfig"}));
        assert!(api.message.contains("ca.pem"));
    }

    #[test]
    fn test_one_status_per_kind() {
        let field = ApiError::invalid_field("id", "must not be empty");
        let executed = ApiError::from(ExecutionError::validation("id", "missing"));
        assert_eq!(field.status, executed.status);
        assert_eq!(field.data, executed.data);

        let header = ApiError::invalid_header("x-query-timeout-ms", "not a number");
        assert_eq!(header.status, StatusCode::BAD_REQUEST);
        assert_eq!(header.data["kind"], "InvalidHeader");
        assert_ne!(header.data["kind"], field.data["kind"]);
    }

    #[test]
    fn test_method_not_allowed() {
        let api = ApiError::method_not_allowed(&Method::GET, "/dynamic/users");
        assert_eq!(api.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            api.data,
            json!({"kind": "MethodNotAllowed", "method": "GET", "path": "/dynamic/users"})
        );
    }
}
