//! dtou policy server.
//!
//! The calling application is identified by the `X-Client-Id` header, the
//! acting user (optional) by `X-User-Id`.
//!
//! **Registration:**
//! - `POST /dtou`: register or replace the application policy (`{"policy": "<turtle>"}`)
//!
//! **Policy operations (text/turtle responses):**
//! - `GET  /dtou/compliance`: conflicts
//! - `GET  /dtou/activated-obligations`: activated obligations
//! - `GET  /dtou/derived-policies`: every derived fact
//! - `GET  /dtou/derived-policies/{port}`: derived policy of one port
//! - `POST /dtou/derived-policies/{port}`: commit a port's policy to targets (`{"url": ...}`)
//!
//! **Health:**
//! - `GET  /health`: server status
//!
//! Build and run: `cargo run --features server --bin dtou-server`

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use dtou_engine::engine::{CommitReport, EngineConfig, PolicyEngine, RequestContext};
use dtou_engine::error::{PolicyError, PolicyResult};
use dtou_engine::graph::PolicyDocument;
use dtou_engine::paths::DtouPaths;

const CLIENT_HEADER: &str = "x-client-id";
const USER_HEADER: &str = "x-user-id";
const TURTLE: &str = "text/turtle";

type ApiError = (StatusCode, String);

// ── Request / response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterBody {
    policy: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Targets {
    One(String),
    Many(Vec<String>),
}

impl Targets {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(url) => vec![url],
            Self::Many(urls) => urls,
        }
    }
}

#[derive(Deserialize)]
struct CommitBody {
    url: Targets,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    applications: usize,
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn status_of(err: &PolicyError) -> StatusCode {
    match err {
        PolicyError::MissingPolicyNode { .. }
        | PolicyError::MalformedDocument { .. }
        | PolicyError::MissingPort => StatusCode::BAD_REQUEST,
        PolicyError::UnregisteredApplication { .. } => StatusCode::UNAUTHORIZED,
        PolicyError::DataPolicyUnavailable { .. } => StatusCode::BAD_GATEWAY,
        PolicyError::ReasoningFailure { .. }
        | PolicyError::Storage { .. }
        | PolicyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn request_context(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let client = value(CLIENT_HEADER).ok_or((
        StatusCode::UNAUTHORIZED,
        "missing X-Client-Id header".to_string(),
    ))?;
    Ok(RequestContext::now(client, value(USER_HEADER)))
}

/// Run engine work off the async executor and map its errors to statuses.
async fn blocking<T, F>(engine: Arc<PolicyEngine>, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PolicyEngine) -> PolicyResult<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || work(&engine))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("engine task failed: {e}")))?;
    result.map_err(|e| {
        let status = status_of(&e);
        if status.is_server_error() {
            tracing::error!(error = ?e, "policy operation failed");
        }
        (status, e.to_string())
    })
}

/// Commit targets from the request body. An empty list is a 400, even though
/// the engine would accept it as a no-op commit.
fn require_targets(body: CommitBody) -> Result<Vec<String>, ApiError> {
    let targets = body.url.into_vec();
    if targets.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "no target url given".to_string()));
    }
    Ok(targets)
}

fn turtle(document: PolicyDocument) -> Response {
    ([(header::CONTENT_TYPE, TURTLE)], document.into_string()).into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health(State(engine): State<Arc<PolicyEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        applications: engine.registry().len(),
    })
}

async fn register(
    State(engine): State<Arc<PolicyEngine>>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<StatusCode, ApiError> {
    let request = request_context(&headers)?;
    blocking(engine, move |engine| {
        engine.register(request.application_id, body.policy)
    })
    .await?;
    Ok(StatusCode::OK)
}

async fn compliance(
    State(engine): State<Arc<PolicyEngine>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = request_context(&headers)?;
    let document = blocking(engine, move |engine| engine.check_compliance(&request)).await?;
    Ok(turtle(document))
}

async fn obligations(
    State(engine): State<Arc<PolicyEngine>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = request_context(&headers)?;
    let document = blocking(engine, move |engine| engine.check_obligations(&request)).await?;
    Ok(turtle(document))
}

async fn derived_all(
    State(engine): State<Arc<PolicyEngine>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = request_context(&headers)?;
    let document = blocking(engine, move |engine| engine.derive_policies(&request, None)).await?;
    Ok(turtle(document))
}

async fn derived_port(
    State(engine): State<Arc<PolicyEngine>>,
    headers: HeaderMap,
    Path(port): Path<String>,
) -> Result<Response, ApiError> {
    let request = request_context(&headers)?;
    let document = blocking(engine, move |engine| {
        engine.derive_policies(&request, Some(port.as_str()))
    })
    .await?;
    Ok(turtle(document))
}

/// Commit addressed to no port; always rejected with 400.
async fn commit_all(
    State(engine): State<Arc<PolicyEngine>>,
    headers: HeaderMap,
    Json(body): Json<CommitBody>,
) -> Result<Json<CommitReport>, ApiError> {
    let request = request_context(&headers)?;
    let targets = body.url.into_vec();
    let report = blocking(engine, move |engine| {
        engine.commit_derived_policies(&request, None, &targets)
    })
    .await?;
    Ok(Json(report))
}

/// Commit a port's derived policy to every target URL.
///
/// `{"url": []}` is rejected with 400 before any reasoning; a single URL or
/// a non-empty list is committed and answered with the [`CommitReport`].
async fn commit_port(
    State(engine): State<Arc<PolicyEngine>>,
    headers: HeaderMap,
    Path(port): Path<String>,
    Json(body): Json<CommitBody>,
) -> Result<Json<CommitReport>, ApiError> {
    let request = request_context(&headers)?;
    let targets = require_targets(body)?;
    let report = blocking(engine, move |engine| {
        engine.commit_derived_policies(&request, Some(port.as_str()), &targets)
    })
    .await?;
    Ok(Json(report))
}

// ── Main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let bind = std::env::var("DTOU_SERVER_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("DTOU_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("{bind}:{port}");

    let config = match DtouPaths::resolve() {
        Ok(paths) => EngineConfig::load_or_default(&paths.config_file()),
        Err(e) => {
            tracing::warn!("failed to resolve XDG paths, using defaults: {e}");
            Ok(EngineConfig::default())
        }
    };
    let config = config.unwrap_or_else(|e| {
        tracing::error!("invalid configuration: {e}");
        std::process::exit(1);
    });
    let engine = PolicyEngine::new(config).unwrap_or_else(|e| {
        tracing::error!("failed to initialize engine: {e}");
        std::process::exit(1);
    });
    let engine = Arc::new(engine);

    let app = Router::new()
        // Health.
        .route("/health", get(health))
        // Registration.
        .route("/dtou", post(register))
        // Policy operations.
        .route("/dtou/compliance", get(compliance))
        .route("/dtou/activated-obligations", get(obligations))
        .route("/dtou/derived-policies", get(derived_all).post(commit_all))
        .route(
            "/dtou/derived-policies/{port}",
            get(derived_port).post(commit_port),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine);

    tracing::info!("dtou server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: &str) -> CommitBody {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn empty_target_list_is_a_bad_request() {
        let (status, message) = require_targets(body(r#"{"url": []}"#)).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message, "no target url given");
    }

    #[test]
    fn single_or_listed_targets_are_accepted() {
        assert_eq!(
            require_targets(body(r#"{"url": "http://d/a"}"#)).unwrap(),
            vec!["http://d/a"]
        );
        assert_eq!(
            require_targets(body(r#"{"url": ["http://d/a", "http://d/b"]}"#)).unwrap(),
            vec!["http://d/a", "http://d/b"]
        );
    }

    #[test]
    fn missing_client_header_is_unauthorized() {
        let (status, _) = request_context(&HeaderMap::new()).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
