//! HTTP surface: the admin API under `/meta`, the liveness check and the
//! dynamic endpoints under `/dynamic`.

pub mod envelope;
pub mod handlers;

use std::sync::Arc;

use axum::extract::OriginalUri;
use axum::http::{Method, Uri};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::{Connector, DatasourceRegistry};
use crate::executor::Executor;
use crate::registry::EndpointRegistry;

pub use envelope::{ApiError, Envelope};

/// Registries and executor shared by every handler.
pub struct AppState {
    pub endpoints: EndpointRegistry,
    pub executor: Executor,
}

impl AppState {
    pub fn new(endpoints: EndpointRegistry, executor: Executor) -> Self {
        Self {
            endpoints,
            executor,
        }
    }

    /// Empty registries configured from `config`. Seed datasources are not
    /// added here.
    pub fn from_config(config: &Config, connector: Arc<dyn Connector>) -> Self {
        let datasources = Arc::new(DatasourceRegistry::new(connector));
        let executor = Executor::new(
            datasources,
            config.materialization,
            config.default_timeout(),
            config.max_timeout(),
        );
        Self::new(EndpointRegistry::new(config.overwrite_policy), executor)
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let meta = Router::new()
        .route(
            "/query/compile",
            post(handlers::compile_query).fallback(method_not_allowed),
        )
        .route(
            "/query",
            get(handlers::list_queries)
                .delete(handlers::delete_query)
                .fallback(method_not_allowed),
        )
        .route(
            "/datasource",
            get(handlers::list_datasources)
                .put(handlers::put_datasource)
                .delete(handlers::delete_datasource)
                .fallback(method_not_allowed),
        );

    Router::new()
        .route(
            "/health/live",
            get(handlers::health).fallback(method_not_allowed),
        )
        .nest("/meta", meta)
        .route(
            "/dynamic/*path",
            post(handlers::invoke).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::endpoint_not_found(&method, uri.path())
}

// Nested routes see a stripped `Uri`; report the path the client sent.
async fn method_not_allowed(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::method_not_allowed(&method, uri.path())
}
