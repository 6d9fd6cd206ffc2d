// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Liveness and readiness endpoints and a read-only view of aggregated cluster health.

use crate::types::v1::cluster::{CephCluster, CephHealth};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use kube::{Api, Client};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("cephcluster {namespace}/{name} not found"))]
    NotFound { namespace: String, name: String },

    #[snafu(display("Kubernetes API error: {source}"))]
    KubeApi { source: kube::Error },

    #[snafu(display("failed to serve: {source}"))]
    Serve { source: std::io::Error },
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NotFound"),
            Error::KubeApi { .. } => (StatusCode::BAD_GATEWAY, "KubeApi"),
            Error::Serve { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
        };
        let body = ErrorResponse {
            error: error.to_owned(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    client: Client,
}

fn router(client: Client) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(ready_check))
        .route("/api/v1/namespaces/{namespace}/cephclusters/{name}", get(cluster_health))
        .with_state(AppState { client })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        )
}

/// Serves until `shutdown` fires.
pub async fn run(client: Client, port: u16, shutdown: CancellationToken) -> Result<(), Error> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await.context(ServeSnafu)?;
    tracing::info!("ops server listening on http://{}", addr);

    axum::serve(listener, router(client))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context(ServeSnafu)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.client.apiserver_version().await {
        Ok(_) => (StatusCode::OK, "Ready"),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "NotReady")
        }
    }
}

async fn cluster_health(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<CephHealth>, Error> {
    let api: Api<CephCluster> = Api::namespaced(state.client, &namespace);
    let Some(cluster) = api.get_opt(&name).await.context(KubeApiSnafu)? else {
        return NotFoundSnafu { namespace, name }.fail();
    };
    Ok(Json(
        cluster
            .status
            .and_then(|s| s.ceph)
            .unwrap_or_else(|| CephHealth {
                health: "Unknown".to_owned(),
                ..Default::default()
            }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let err = Error::NotFound {
            namespace: "rook-ceph".to_owned(),
            name: "my-cluster".to_owned(),
        };
        assert_eq!(err.to_string(), "cephcluster rook-ceph/my-cluster not found");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
