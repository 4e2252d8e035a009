//! HTTP transport for search and index maintenance.
//!
//! # Endpoints
//!
//! | Method   | Path                 | Description |
//! |----------|----------------------|-------------|
//! | `GET`    | `/api/search`        | Ranked, excerpted search (`q`, `page`, `per_page`, `section`, `fragmenter`, `max_chars`, `surround`, `sort`) |
//! | `PUT`    | `/api/index`         | Replace the index with an uploaded generation archive (`secret`, `archive`) |
//! | `PUT`    | `/api/index/sources` | Index an uploaded source tree in place (`secret`, `config`, `archive`), streaming progress lines |
//! | `DELETE` | `/api/index`         | Wipe the index (`secret`) |
//! | `GET`    | `/health`            | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "forbidden", "message": "invalid secret" } }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `conflict` (409),
//! `internal` (500).
//!
//! Write endpoints compare the shared secret in constant time and are
//! rejected outright while no secret is configured. Builds are serialized
//! by a server-wide lock; searches never wait on it.

use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Form, Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::convert::Infallible;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::archive;
use crate::config::Config;
use crate::error::Error;
use crate::generation::IndexRoot;
use crate::highlight::{ExcerptOptions, Fragmenter};
use crate::indexer::{self, IndexTarget};
use crate::models::SearchResults;
use crate::progress::ChannelProgress;
use crate::search::{self, SearchRequest};
use crate::sources::{ResolvedSource, SourceConfig};

type HmacSha256 = Hmac<Sha256>;

const SECRET_CONTEXT: &[u8] = b"sidx write secret";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    root: Arc<IndexRoot>,
    /// Held for the whole duration of any build or index replacement.
    build_lock: Arc<Mutex<()>>,
}

impl AppState {
    fn new(config: &Config) -> Self {
        Self {
            root: Arc::new(config.index.root()),
            config: Arc::new(config.clone()),
            build_lock: Arc::new(Mutex::new(())),
        }
    }

    fn check_secret(&self, given: &str) -> Result<(), AppError> {
        if secret_matches(self.config.index.secret.as_deref(), given) {
            Ok(())
        } else {
            warn!("Rejected write with invalid secret");
            Err(forbidden("invalid secret"))
        }
    }
}

/// Builds the application router for `config`.
pub fn router(config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", get(handle_search))
        .route("/api/index", put(handle_put_index).delete(handle_wipe))
        .route("/api/index/sources", put(handle_index_sources))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState::new(config))
}

/// Serves the API on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    if config.index.secret.is_none() {
        warn!("No [index].secret configured, write endpoints are disabled");
    }
    let app = router(config);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, root = ?config.index.path, "Search server listening");
    println!("Search server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constant-time secret check. Both sides are reduced to an HMAC tag over a
/// fixed message, so the comparison never depends on where they differ.
fn secret_matches(expected: Option<&str>, given: &str) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    let (Ok(mut want), Ok(mut got)) = (
        HmacSha256::new_from_slice(expected.as_bytes()),
        HmacSha256::new_from_slice(given.as_bytes()),
    ) else {
        return false;
    };
    want.update(SECRET_CONTEXT);
    got.update(SECRET_CONTEXT);
    got.verify_slice(&want.finalize().into_bytes()).is_ok()
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        match e {
            Error::Archive(_)
            | Error::Config(_)
            | Error::Json(_)
            | Error::InvalidSelector { .. }
            | Error::InvalidPattern(_) => bad_request(e.to_string()),
            Error::WriterBusy(_) => AppError {
                status: StatusCode::CONFLICT,
                code: "conflict".to_string(),
                message: e.to_string(),
            },
            other => internal(other.to_string()),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "forbidden".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/search ============

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    page: Option<u32>,
    per_page: Option<u32>,
    section: Option<String>,
    fragmenter: Option<Fragmenter>,
    max_chars: Option<usize>,
    surround: Option<usize>,
    /// `relevance` (default) or `stable`.
    sort: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResults>, AppError> {
    let defaults = &state.config.search;
    let stable = match params.sort.as_deref() {
        None | Some("relevance") => false,
        Some("stable") => true,
        Some(other) => {
            return Err(bad_request(format!(
                "unknown sort '{}', use relevance or stable",
                other
            )))
        }
    };
    if params.page == Some(0) || params.per_page == Some(0) {
        return Err(bad_request("page and per_page must be at least 1"));
    }

    let request = SearchRequest {
        query: params.q,
        section: params.section.filter(|s| !s.is_empty()),
        page: params.page.unwrap_or(1),
        per_page: params.per_page.unwrap_or(defaults.per_page),
        excerpt: ExcerptOptions {
            fragmenter: params.fragmenter.unwrap_or_default(),
            max_chars: params.max_chars.unwrap_or(defaults.max_chars).max(1),
            surround: params.surround.unwrap_or(defaults.surround),
        },
        stable,
    };

    let results = search::search(&state.root, &request).await?;
    Ok(Json(results))
}

// ============ PUT /api/index ============

#[derive(Serialize)]
struct IndexResponse {
    generation: String,
}

/// Text fields and files of a multipart write request.
#[derive(Default)]
struct Upload {
    secret: String,
    config: Option<Vec<u8>>,
    archive: Option<Vec<u8>>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut upload = Upload::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| bad_request(e.to_string()))?;
        match name.as_str() {
            "secret" => upload.secret = String::from_utf8_lossy(&data).into_owned(),
            "config" => upload.config = Some(data.to_vec()),
            "archive" => upload.archive = Some(data.to_vec()),
            _ => {}
        }
    }
    Ok(upload)
}

async fn handle_put_index(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<IndexResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    state.check_secret(&upload.secret)?;
    let archive = upload
        .archive
        .ok_or_else(|| bad_request("missing archive"))?;

    let _build = state.build_lock.lock().await;
    let generation = archive::replace_from_archive(&state.root, Cursor::new(archive)).await?;
    Ok(Json(IndexResponse { generation }))
}

// ============ PUT /api/index/sources ============

async fn handle_index_sources(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let upload = read_upload(multipart).await?;
    state.check_secret(&upload.secret)?;
    let config = upload.config.ok_or_else(|| bad_request("missing config"))?;
    let archive = upload
        .archive
        .ok_or_else(|| bad_request("missing archive"))?;

    let build = state.build_lock.clone().lock_owned().await;

    let tree = tempfile::tempdir().map_err(|e| internal(e.to_string()))?;
    let dest = tree.path().to_path_buf();
    tokio::task::spawn_blocking(move || archive::unpack(Cursor::new(archive), &dest))
        .await
        .map_err(|e| internal(e.to_string()))??;

    let resolved = resolve_upload(&state.config, &config, tree.path())?;
    let root = state.root.clone();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let _build = build;
        let _tree = tree;
        let reporter = ChannelProgress::new(tx.clone());
        if let Err(e) = indexer::index_tree(&resolved, IndexTarget::InPlace(&root), &reporter).await
        {
            warn!(error = %e, "Source build failed");
            let _ = tx.send(format!("Error: {}\n", e));
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Parses an uploaded source configuration and resolves it inside the
/// unpacked tree. Paths escaping the tree are rejected.
fn resolve_upload(
    config: &Config,
    json: &[u8],
    tree: &Path,
) -> Result<Vec<ResolvedSource>, AppError> {
    let sources = SourceConfig::from_json(&String::from_utf8_lossy(json))?;
    Ok(sources.resolve_within(tree, &config.extract, &config.indexer)?)
}

// ============ DELETE /api/index ============

#[derive(Deserialize)]
struct WipeForm {
    #[serde(default)]
    secret: String,
}

async fn handle_wipe(
    State(state): State<AppState>,
    Form(form): Form<WipeForm>,
) -> Result<StatusCode, AppError> {
    state.check_secret(&form.secret)?;
    let _build = state.build_lock.lock().await;
    state.root.wipe()?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state(tmp: &TempDir, secret: Option<&str>) -> AppState {
        let mut config = Config::default();
        config.index.path = tmp.path().join("index");
        config.index.secret = secret.map(str::to_string);
        AppState::new(&config)
    }

    #[test]
    fn secret_comparison() {
        assert!(secret_matches(Some("s3cret"), "s3cret"));
        assert!(!secret_matches(Some("s3cret"), "s3cre"));
        assert!(!secret_matches(Some("s3cret"), ""));
        assert!(!secret_matches(None, ""));
        assert!(!secret_matches(None, "anything"));
    }

    #[test]
    fn error_mapping() {
        let e: AppError = Error::Archive("bad zip".to_string()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        let e: AppError = Error::WriterBusy("g".to_string()).into();
        assert_eq!(e.status, StatusCode::CONFLICT);
        let e: AppError = Error::Io(std::io::Error::other("disk")).into();
        assert_eq!(e.code, "internal");
    }

    #[test]
    fn uploaded_sources_stay_inside_tree() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside");
        let json = format!(
            r#"{{"groups": [{{"sources": [{{"path": "{}"}}]}}]}}"#,
            outside.display()
        );
        let err = resolve_upload(&Config::default(), json.as_bytes(), &tmp.path().join("tree"))
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let json = br#"{"groups": [{"sources": [{"path": "../outside"}]}]}"#;
        let err = resolve_upload(&Config::default(), json, tmp.path()).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let json = br#"{"groups": [{"sources": [{"path": "html"}]}]}"#;
        let resolved = resolve_upload(&Config::default(), json, tmp.path()).unwrap();
        assert_eq!(resolved[0].path, tmp.path().join("html"));
    }

    #[tokio::test]
    async fn search_on_fresh_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let params = SearchParams {
            q: "hello".to_string(),
            ..SearchParams::default()
        };
        let Json(results) = handle_search(State(state(&tmp, None)), Query(params))
            .await
            .unwrap();
        assert!(results.items.is_empty());
        assert_eq!(results.page, 1);
        assert_eq!(results.per_page, 20);
    }

    #[tokio::test]
    async fn search_rejects_unknown_sort() {
        let tmp = TempDir::new().unwrap();
        let params = SearchParams {
            q: "hello".to_string(),
            sort: Some("random".to_string()),
            ..SearchParams::default()
        };
        let err = handle_search(State(state(&tmp, None)), Query(params))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wipe_requires_configured_secret() {
        let tmp = TempDir::new().unwrap();
        let form = || {
            Form(WipeForm {
                secret: String::new(),
            })
        };
        let err = handle_wipe(State(state(&tmp, None)), form())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let state = state(&tmp, Some("key"));
        state.root.ensure().await.unwrap();
        let err = handle_wipe(State(state.clone()), form()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let ok = handle_wipe(
            State(state.clone()),
            Form(WipeForm {
                secret: "key".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(ok, StatusCode::NO_CONTENT);
        assert_eq!(state.root.current_id().unwrap(), None);
    }
}
