//! Client-facing REST facade
//!
//! A thin HTTP layer over the coordinator: it translates JSON requests
//! into coordinated operations and never touches the engine directly.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use driftdb_cluster::SwimCluster;
use driftdb_core::Error;
use driftdb_replication::Coordinator;

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    pub cluster: Arc<SwimCluster>,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/kv/:key", get(get_key).put(put_key))
        .route("/nodes", get(get_nodes))
        .with_state(state)
}

#[derive(Serialize)]
struct GetKeyResponse {
    version: String,
    values: Vec<String>,
    exists: bool,
    value: String,
}

#[derive(Deserialize)]
struct PutKeyParams {
    value: String,
    #[serde(default)]
    version: String,
}

#[derive(Serialize)]
struct PutKeyResponse {
    acknowledged: usize,
    version: String,
}

#[derive(Serialize)]
struct NodeView {
    id: u32,
    name: String,
    address: String,
    status: String,
    generation: u64,
    run_id: i64,
    error: String,
}

async fn get_key(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<GetKeyResponse>, ApiError> {
    let result = state.coordinator.get(&key).await?;

    let values: Vec<String> = result
        .values
        .iter()
        .filter(|value| !value.tombstone)
        .map(|value| String::from_utf8_lossy(&value.data).into_owned())
        .collect();

    let exists = !values.is_empty();
    let value = values.first().cloned().unwrap_or_default();

    Ok(Json(GetKeyResponse {
        version: result.version,
        values,
        exists,
        value,
    }))
}

async fn put_key(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(params): Json<PutKeyParams>,
) -> Result<Json<PutKeyResponse>, ApiError> {
    let result = state
        .coordinator
        .put(&key, params.value.into_bytes(), &params.version)
        .await?;

    Ok(Json(PutKeyResponse {
        acknowledged: result.acknowledged,
        version: result.version,
    }))
}

async fn get_nodes(State(state): State<ApiState>) -> Json<Vec<NodeView>> {
    let nodes = state
        .cluster
        .nodes()
        .into_iter()
        .map(|node| NodeView {
            id: node.id,
            name: node.name,
            address: node.public_addr,
            status: node.status.to_string(),
            generation: node.gen,
            run_id: node.run_id,
            error: node.error,
        })
        .collect();

    Json(nodes)
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidVersion(_) | Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::Unavailable(_) | Error::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            Error::KeyNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
