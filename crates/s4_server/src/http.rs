//! HTTP surface: route table, request parsing, status mapping.
//!
//! Bodies are JSON where the route table says so; error statuses carry
//! either nothing (409/404/429) or the `{stdout, stderr, exitcode}`
//! triple (400/500). Handlers never block: every filesystem or
//! subprocess call goes through a pool.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use s4_protocol::{ListEntry, Result, S4Error};

use crate::node::Node;
use crate::storage;
use crate::{ops, transfer};

/// Error wrapper carrying the status mapping.
pub struct ApiError(S4Error);

impl From<S4Error> for ApiError {
    fn from(e: S4Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            S4Error::Conflict(msg) | S4Error::InvalidKey(msg) => {
                info!("conflict: {}", msg);
                StatusCode::CONFLICT.into_response()
            }
            S4Error::NotFound(msg) => {
                info!("not found: {}", msg);
                StatusCode::NOT_FOUND.into_response()
            }
            S4Error::Overloaded(msg) => {
                info!("shedding load: {}", msg);
                StatusCode::TOO_MANY_REQUESTS.into_response()
            }
            S4Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            S4Error::UserCommand(out) => (StatusCode::BAD_REQUEST, Json(out)).into_response(),
            S4Error::Integrity(out) => {
                error!("integrity failure: {}", out.stderr);
                (StatusCode::INTERNAL_SERVER_ERROR, Json(out)).into_response()
            }
            other => {
                error!("internal error: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: String,
}

#[derive(Debug, Deserialize)]
struct PrepareGetQuery {
    key: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct ConfirmQuery {
    uuid: String,
    checksum: String,
}

#[derive(Debug, Deserialize)]
struct PrefixQuery {
    prefix: String,
    recursive: Option<String>,
}

impl PrefixQuery {
    fn recursive(&self) -> bool {
        self.recursive.as_deref() == Some("true")
    }
}

#[derive(Debug, Deserialize)]
struct EvalQuery {
    key: String,
    b64cmd: String,
}

#[derive(Debug, Deserialize)]
struct CmdQuery {
    b64cmd: String,
}

#[derive(Debug, Deserialize)]
struct MapFromNQuery {
    b64cmd: String,
    outdir: String,
}

/// The node's route table.
pub fn router(node: Arc<Node>) -> Router {
    let timeout = node.settings.max_timeout();
    Router::new()
        .route("/prepare_put", post(prepare_put_handler))
        .route("/confirm_put", post(confirm_put_handler))
        .route("/prepare_get", post(prepare_get_handler))
        .route("/confirm_get", post(confirm_get_handler))
        .route("/delete", post(delete_handler))
        .route("/eval", post(eval_handler))
        .route("/map", post(map_handler))
        .route("/map_to_n", post(map_to_n_handler))
        .route("/map_from_n", post(map_from_n_handler))
        .route("/list", get(list_handler))
        .route("/list_buckets", get(list_buckets_handler))
        .route("/health", get(health_handler))
        .layer(TimeoutLayer::new(timeout))
        .with_state(node)
}

/// Bind and serve until shutdown.
pub async fn serve(node: Arc<Node>, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let app = router(node);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn prepare_put_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<KeyQuery>,
) -> ApiResult<Json<(String, u16)>> {
    let (uuid, port) = transfer::prepare_put(&node, &q.key).await?;
    Ok(Json((uuid, port)))
}

async fn confirm_put_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<ConfirmQuery>,
) -> ApiResult<StatusCode> {
    transfer::confirm_put(&node, &q.uuid, &q.checksum).await?;
    Ok(StatusCode::OK)
}

async fn prepare_get_handler(
    State(node): State<Arc<Node>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(q): Query<PrepareGetQuery>,
) -> ApiResult<String> {
    let uuid = transfer::prepare_get(&node, &q.key, peer.ip(), q.port).await?;
    Ok(uuid)
}

async fn confirm_get_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<ConfirmQuery>,
) -> ApiResult<StatusCode> {
    transfer::confirm_get(&node, &q.uuid, &q.checksum).await?;
    Ok(StatusCode::OK)
}

async fn delete_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<PrefixQuery>,
) -> ApiResult<StatusCode> {
    let root = node.data_root.clone();
    let prefix = q.prefix.clone();
    let recursive = q.recursive();
    node.pools
        .solo
        .run_blocking(move || storage::delete_prefix(&root, &prefix, recursive))
        .await??;
    Ok(StatusCode::OK)
}

async fn list_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<PrefixQuery>,
) -> ApiResult<Json<Vec<ListEntry>>> {
    let root = node.data_root.clone();
    let prefix = q.prefix.clone();
    let recursive = q.recursive();
    let rows = node
        .pools
        .find
        .run_blocking(move || storage::list(&root, &prefix, recursive))
        .await??;
    Ok(Json(rows))
}

async fn list_buckets_handler(State(node): State<Arc<Node>>) -> ApiResult<Json<Vec<ListEntry>>> {
    let root = node.data_root.clone();
    let rows = node
        .pools
        .find
        .run_blocking(move || storage::list_buckets(&root))
        .await??;
    Ok(Json(rows))
}

async fn eval_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<EvalQuery>,
) -> ApiResult<String> {
    let cmd = decode_cmd(&q.b64cmd)?;
    let stdout = ops::eval(&node, &q.key, &cmd).await?;
    Ok(stdout)
}

async fn map_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<CmdQuery>,
    Json(pairs): Json<Vec<(String, String)>>,
) -> ApiResult<StatusCode> {
    let cmd = decode_cmd(&q.b64cmd)?;
    ops::map(&node, pairs, cmd).await?;
    Ok(StatusCode::OK)
}

async fn map_to_n_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<CmdQuery>,
    Json(pairs): Json<Vec<(String, String)>>,
) -> ApiResult<StatusCode> {
    let cmd = decode_cmd(&q.b64cmd)?;
    ops::map_to_n(&node, pairs, cmd).await?;
    Ok(StatusCode::OK)
}

async fn map_from_n_handler(
    State(node): State<Arc<Node>>,
    Query(q): Query<MapFromNQuery>,
    Json(inkeys): Json<Vec<String>>,
) -> ApiResult<StatusCode> {
    let cmd = decode_cmd(&q.b64cmd)?;
    ops::map_from_n(&node, inkeys, &q.outdir, cmd).await?;
    Ok(StatusCode::OK)
}

fn decode_cmd(b64: &str) -> Result<String> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|e| S4Error::BadRequest(format!("bad b64cmd: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| S4Error::BadRequest(format!("b64cmd is not utf-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cmd() {
        let encoded = BASE64.encode("awk '{print $1}'");
        assert_eq!(decode_cmd(&encoded).unwrap(), "awk '{print $1}'");
        assert!(decode_cmd("not base64!!!").is_err());
    }

    #[test]
    fn test_recursive_flag_parsing() {
        let q = PrefixQuery {
            prefix: "s4://b/".to_string(),
            recursive: Some("true".to_string()),
        };
        assert!(q.recursive());
        let q = PrefixQuery {
            prefix: "s4://b/".to_string(),
            recursive: None,
        };
        assert!(!q.recursive());
    }
}
