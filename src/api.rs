//! HTTP status and control surface
//!
//! | Route                         | Method | Effect                              |
//! |-------------------------------|--------|-------------------------------------|
//! | `/health`                     | GET    | liveness                            |
//! | `/api/status`                 | GET    | controller, chain and recovery view |
//! | `/api/island/disconnect`      | POST   | pin offline                         |
//! | `/api/island/reconnect`       | POST   | clear pin, go online                |
//! | `/api/sync`                   | POST   | sync cached updates now             |
//! | `/api/recovery/persist`       | POST   | write the recovery record           |
//! | `/api/chain/verify`           | GET    | verify the snapshot chain           |

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::island::{Mode, SyncReport};
use crate::node::{IslandNode, NodeStatus};
use crate::state::{ChainFault, ChainVerdict};

pub type SharedNode = Arc<IslandNode>;

pub fn create_router(node: SharedNode) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/island/disconnect", post(api_disconnect))
        .route("/api/island/reconnect", post(api_reconnect))
        .route("/api/sync", post(api_sync))
        .route("/api/recovery/persist", post(api_persist))
        .route("/api/chain/verify", get(api_verify_chain))
        .with_state(node)
}

pub async fn health() -> impl IntoResponse {
    "OK"
}

/// GET /api/status
pub async fn api_status(State(node): State<SharedNode>) -> Json<NodeStatus> {
    Json(node.status().await)
}

#[derive(Serialize)]
pub struct ModeChangeResponse {
    /// False when the node was already in the requested mode
    pub changed: bool,
    pub mode: Mode,
}

/// POST /api/island/disconnect
pub async fn api_disconnect(State(node): State<SharedNode>) -> Json<ModeChangeResponse> {
    let changed = node.controller().force_disconnect().await;
    Json(ModeChangeResponse {
        changed,
        mode: node.controller().mode().await,
    })
}

/// POST /api/island/reconnect
pub async fn api_reconnect(State(node): State<SharedNode>) -> Json<ModeChangeResponse> {
    let changed = node.controller().force_reconnect().await;
    Json(ModeChangeResponse {
        changed,
        mode: node.controller().mode().await,
    })
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/sync - Sync cached updates and wait for the result
pub async fn api_sync(State(node): State<SharedNode>) -> impl IntoResponse {
    match node.controller().sync_now().await {
        Ok(report) => (
            StatusCode::OK,
            Json(SyncResponse {
                success: true,
                report,
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(SyncResponse {
                success: false,
                report: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

#[derive(Serialize)]
pub struct PersistResponse {
    pub success: bool,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/recovery/persist
pub async fn api_persist(State(node): State<SharedNode>) -> impl IntoResponse {
    let path = node.recovery().path().display().to_string();

    match node.recovery().persist().await {
        Ok(()) => (
            StatusCode::OK,
            Json(PersistResponse {
                success: true,
                path,
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(PersistResponse {
                success: false,
                path,
                error: Some(e.to_string()),
            }),
        ),
    }
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<ChainFault>,
}

/// GET /api/chain/verify
pub async fn api_verify_chain(State(node): State<SharedNode>) -> Json<VerifyResponse> {
    let length = node.chain().read().await.len();

    Json(match node.verify_chain().await {
        ChainVerdict::Valid => VerifyResponse {
            valid: true,
            length,
            broken_index: None,
            fault: None,
        },
        ChainVerdict::Broken { index, fault } => VerifyResponse {
            valid: false,
            length,
            broken_index: Some(index),
            fault: Some(fault),
        },
    })
}
