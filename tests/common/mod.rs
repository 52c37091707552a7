//! Shared fixtures: an in-memory datasource and request helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::Router;
use dynapi::config::Config;
use dynapi::db::{Connector, Datasource, JsonRow, Statement};
use dynapi::error::DatasourceError;
use dynapi::server::{build_router, AppState};
use http_body_util::BodyExt;
use hyper::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Returns fixed rows when configured, otherwise echoes the statement back
/// as a single `{sql, params}` row.
pub struct StubConnector {
    pub rows: Option<Vec<JsonRow>>,
    pub delay: Option<Duration>,
    pub calls: Arc<AtomicUsize>,
    pub closed: Mutex<Vec<Arc<AtomicBool>>>,
}

impl StubConnector {
    pub fn echo() -> Self {
        Self {
            rows: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rows(rows: Value) -> Self {
        let rows = match rows {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => map,
                    other => panic!("row must be an object, got {other}"),
                })
                .collect(),
            other => panic!("rows must be an array, got {other}"),
        };
        Self {
            rows: Some(rows),
            ..Self::echo()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether the `n`th datasource built by this connector was released.
    pub fn is_closed(&self, n: usize) -> bool {
        self.closed.lock().unwrap()[n].load(Ordering::SeqCst)
    }
}

struct StubDatasource {
    rows: Option<Vec<JsonRow>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Datasource for StubDatasource {
    fn driver(&self) -> &'static str {
        "stub"
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<JsonRow>, DatasourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatasourceError::Closed);
        }
        match &self.rows {
            Some(rows) => Ok(rows.clone()),
            None => {
                let echo = json!({"sql": statement.sql, "params": statement.params});
                match echo {
                    Value::Object(row) => Ok(vec![row]),
                    _ => unreachable!(),
                }
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Connector for StubConnector {
    fn connect(&self, uri: &str) -> Result<Box<dyn Datasource>, DatasourceError> {
        if !uri.starts_with("stub://") {
            return Err(DatasourceError::InvalidUri(format!("unsupported scheme in {uri}")));
        }
        let closed = Arc::new(AtomicBool::new(false));
        self.closed.lock().unwrap().push(Arc::clone(&closed));
        Ok(Box::new(StubDatasource {
            rows: self.rows.clone(),
            delay: self.delay,
            calls: Arc::clone(&self.calls),
            closed,
        }))
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub connector: Arc<StubConnector>,
}

impl TestApp {
    pub fn new(connector: StubConnector) -> Self {
        Self::with_config(connector, Config::default())
    }

    pub fn with_config(connector: StubConnector, config: Config) -> Self {
        let connector = Arc::new(connector);
        let state = Arc::new(AppState::from_config(&config, connector.clone()));
        let router = build_router(Arc::clone(&state));
        Self {
            router,
            state,
            connector,
        }
    }

    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        self.call(request).await
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn add_datasource(&self, id: &str, uri: &str) {
        let (status, _) = self
            .send(
                "PUT",
                "/meta/datasource",
                Some(json!({"id": id, "connectionURI": uri})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    /// Compile against datasource `main` and return the response envelope.
    pub async fn compile(&self, path: &str, sql: &str) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/meta/query/compile",
            Some(json!({
                "path": path,
                "summary": "test endpoint",
                "datasourceId": "main",
                "sqlTemplate": sql,
            })),
        )
        .await
    }
}
