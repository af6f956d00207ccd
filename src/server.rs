//! HTTP endpoints for health checks, categories and reference lookups.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tracing::info;

use crate::{
    aggregator::{Aggregator, CategoryContent, DiscoveryError},
    category::CATEGORIES,
    config::csv_strings,
    coordinate::Coordinate,
    event::Event,
    resolver::Resolver,
};

#[derive(Clone)]
struct HttpState {
    aggregator: Aggregator,
    resolver: Resolver,
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// JSON error body with a status code.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(e: DiscoveryError) -> Self {
        let status = match e {
            DiscoveryError::CategoryNotFound(_) => StatusCode::NOT_FOUND,
            DiscoveryError::LoadFailed(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response();
        response.headers_mut().insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        response
    }
}

/// Wrap a JSON body with a permissive CORS header.
fn cors<T: Serialize>(body: T) -> impl IntoResponse {
    ([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], Json(body))
}

/// Start an HTTP server exposing `/healthz`, `/categories`, `/resolve` and
/// `/events`.
pub async fn serve_http(
    addr: SocketAddr,
    aggregator: Aggregator,
    resolver: Resolver,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http listening");
    axum::serve(listener, router(aggregator, resolver).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn router(aggregator: Aggregator, resolver: Resolver) -> Router {
    let state = Arc::new(HttpState {
        aggregator,
        resolver,
    });
    Router::new()
        .route("/healthz", get(healthz))
        .route("/categories", get(categories))
        .route("/categories/:id", get(category_content))
        .route("/resolve/:coordinate", get(resolve))
        .route("/events/:id", get(event))
        .with_state(state)
}

/// Health check endpoint.
async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

async fn categories() -> impl IntoResponse {
    cors(CATEGORIES)
}

async fn category_content(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let content: CategoryContent = state.aggregator.load_category_content(&id).await?;
    Ok(cors(content))
}

/// Query parameters shared by the lookup endpoints.
#[derive(Deserialize, Default)]
struct LookupParams {
    /// Comma-separated relay hints.
    relay: Option<String>,
    /// Author pubkey, for event lookups.
    author: Option<String>,
}

impl LookupParams {
    fn hints(&self) -> Vec<String> {
        self.relay.as_deref().map(csv_strings).unwrap_or_default()
    }
}

async fn resolve(
    State(state): State<Arc<HttpState>>,
    Path(coordinate): Path<String>,
    Query(params): Query<LookupParams>,
) -> Result<impl IntoResponse, ApiError> {
    let coord = coordinate
        .parse::<Coordinate>()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    let ev: Event = state
        .resolver
        .resolve_coordinate(&coord, &params.hints())
        .await
        .ok_or_else(|| ApiError::not_found("Event"))?;
    Ok(cors(ev))
}

async fn event(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Query(params): Query<LookupParams>,
) -> Result<impl IntoResponse, ApiError> {
    let ev = state
        .resolver
        .fetch_event(&id, &params.hints(), params.author.as_deref())
        .await
        .ok_or_else(|| ApiError::not_found("Event"))?;
    Ok(cors(ev))
}
