//! HTTP boundary - wires the seven registry components onto one Axum router
//!
//! Route shapes and the `(StatusCode, Json(T))` response idiom follow the
//! control-plane API server (`cluster/api.rs::create_control_plane_router`);
//! the `AppState`-as-`Clone`-bag-of-`Arc`s pattern follows
//! `server/state.rs::AppState`.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::aggregator::{AggregatorConfig, GlobalAggregator};
use super::credentials::CredentialStore;
use super::error::ApiError;
use super::events::EventHub;
use super::heartbeat::{HeartbeatIngester, HeartbeatPayload, MAX_HEARTBEAT_BODY_BYTES};
use super::pool::ClientPool;
use super::registration::Registration;
use super::router::{RequestRouter, RouteTarget};
use super::store::RegistrationStore;

#[derive(Clone)]
pub struct RegistryState {
    pub store: Arc<RegistrationStore>,
    pub credentials: Arc<CredentialStore>,
    pub pool: Arc<ClientPool>,
    pub router: Arc<RequestRouter>,
    pub aggregator: Arc<GlobalAggregator>,
    pub events: Arc<EventHub>,
    pub heartbeat: Arc<HeartbeatIngester>,
    /// Shared token every agent must present in its heartbeat body.
    /// `None` accepts any heartbeat unauthenticated.
    pub heartbeat_token: Option<Arc<String>>,
}

impl RegistryState {
    pub fn new(store: Arc<RegistrationStore>, credentials: Arc<CredentialStore>, pool: Arc<ClientPool>) -> Self {
        Self::with_config(store, credentials, pool, None, AggregatorConfig::default())
    }

    pub fn with_heartbeat_token(
        store: Arc<RegistrationStore>,
        credentials: Arc<CredentialStore>,
        pool: Arc<ClientPool>,
        heartbeat_token: Option<String>,
    ) -> Self {
        Self::with_config(store, credentials, pool, heartbeat_token, AggregatorConfig::default())
    }

    pub fn with_config(
        store: Arc<RegistrationStore>,
        credentials: Arc<CredentialStore>,
        pool: Arc<ClientPool>,
        heartbeat_token: Option<String>,
        aggregator_config: AggregatorConfig,
    ) -> Self {
        let router = Arc::new(RequestRouter::new(pool.clone()));
        let aggregator = Arc::new(GlobalAggregator::new(pool.clone(), aggregator_config));
        let events = Arc::new(EventHub::new());
        let heartbeat = Arc::new(HeartbeatIngester::new(store.clone()));

        Self {
            store,
            credentials,
            pool,
            router,
            aggregator,
            events,
            heartbeat,
            heartbeat_token: heartbeat_token.map(Arc::new),
        }
    }
}

pub fn create_registry_router(state: RegistryState) -> Router {
    Router::new()
        .route("/clusters", get(list_clusters).post(create_cluster))
        .route("/clusters/{name}", delete(delete_cluster))
        .route("/clusters/{name}/detail", get(get_cluster_detail))
        .route("/clusters/{name}/test", post(test_cluster))
        .route("/clusters/{name}/install-agent", post(install_agent))
        .route("/clusters/{name}/heartbeat", post(receive_heartbeat))
        .route("/clusters/summary", get(clusters_summary))
        .route("/global/{resource}", get(global_resource))
        .route("/ws/{topic}", get(ws_topic))
        .route("/ws/global/{topic}", get(ws_global_topic))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

// ============================================================================
// Registration endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateClusterRequest {
    #[serde(flatten)]
    registration: Registration,
    /// Base64-encoded kubeconfig bytes, stored under `credentialRef` if present.
    #[serde(default)]
    credential_blob: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClusterListResponse {
    items: Vec<super::registration::RegistrationRecord>,
}

async fn list_clusters(State(state): State<RegistryState>) -> impl IntoResponse {
    Json(ClusterListResponse {
        items: state.store.list(),
    })
}

async fn create_cluster(
    State(state): State<RegistryState>,
    Json(req): Json<CreateClusterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let (Some(cred_name), Some(b64)) = (&req.registration.credential_ref, &req.credential_blob) {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| ApiError::Invalid(format!("invalid base64 credential blob: {}", e)))?;
        state.credentials.put_inline(cred_name, bytes);
    }

    let record = state.store.create(req.registration)?;
    state.pool.sync().await;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn delete_cluster(
    State(state): State<RegistryState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    state.store.delete(&name);
    state.pool.sync().await;
    StatusCode::NO_CONTENT
}

async fn get_cluster_detail(
    State(state): State<RegistryState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.store.get(&name)?;
    Ok(Json(record))
}

#[derive(Debug, Serialize)]
struct TestClusterResponse {
    reachable: bool,
    error: Option<String>,
}

async fn test_cluster(
    State(state): State<RegistryState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let target = state
        .router
        .resolve(Some(&name), &std::collections::HashMap::new(), &headers)
        .await?;
    let RouteTarget::Cluster(name) = target else {
        return Err(ApiError::Invalid(
            "the test endpoint does not support the __all__ selector".to_string(),
        ));
    };

    let (client, breaker, permit) = state.pool.get(&name).await?;
    match client.client.apiserver_version().await {
        Ok(_) => {
            breaker.record_success(permit).await;
            Ok(Json(TestClusterResponse {
                reachable: true,
                error: None,
            }))
        }
        Err(e) => {
            breaker.record_failure(permit).await;
            Ok(Json(TestClusterResponse {
                reachable: false,
                error: Some(e.to_string()),
            }))
        }
    }
}

/// Aggregate counts across every registration, served from `GET /clusters/summary`:
/// total and healthy cluster counts, plus the sum of each resource-count and
/// capacity key across every cluster that reports it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSummaryResponse {
    total: usize,
    healthy: usize,
    resource_counts: std::collections::HashMap<String, i64>,
    capacity: std::collections::HashMap<String, f64>,
}

async fn clusters_summary(State(state): State<RegistryState>) -> impl IntoResponse {
    let records = state.store.list();

    let total = records.len();
    let healthy = records
        .iter()
        .filter(|r| r.status.phase == super::registration::Phase::Ready)
        .count();

    let mut resource_counts = std::collections::HashMap::new();
    let mut capacity = std::collections::HashMap::new();

    for record in &records {
        for (kind, count) in &record.status.resource_counts {
            *resource_counts.entry(kind.clone()).or_insert(0) += count;
        }
        for (key, value) in &record.status.capacity {
            if let Some(n) = value.as_f64() {
                *capacity.entry(key.clone()).or_insert(0.0) += n;
            }
        }
    }

    Json(ClusterSummaryResponse {
        total,
        healthy,
        resource_counts,
        capacity,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallAgentResponse {
    install_command: String,
    bootstrap_token: String,
}

/// Generate a one-time bootstrap token and the shell command an operator
/// runs inside the target cluster to install the heartbeat agent. The token
/// is not persisted against the Registration; unregistering a cluster has no
/// effect on tokens already handed out.
async fn install_agent(
    State(state): State<RegistryState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get(&name)?;

    let bootstrap_token = uuid::Uuid::new_v4().to_string();
    let install_command = format!(
        "curl -fsSL https://install.internal.invalid/agent-installer.sh | \
         CLUSTER_NAME={} BOOTSTRAP_TOKEN={} sh -",
        name, bootstrap_token
    );

    Ok(Json(InstallAgentResponse {
        install_command,
        bootstrap_token,
    }))
}

// ============================================================================
// Heartbeat endpoint
// ============================================================================

async fn receive_heartbeat(
    State(state): State<RegistryState>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    HeartbeatIngester::check_body_size(body.len())?;

    let payload: HeartbeatPayload = serde_json::from_slice(&body)
        .map_err(|e| super::error::HeartbeatError::BadRequest(e.to_string()))?;

    let expected_token = state.heartbeat_token.as_deref().map(|s| s.as_str());
    state.heartbeat.ingest(&name, expected_token, payload)?;

    state.events.publish(super::events::Event {
        topic: "heartbeats".to_string(),
        cluster_name: Some(name),
        payload: serde_json::json!({"received": true}),
    }).await;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Global aggregation endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
struct GlobalQuery {
    #[serde(default)]
    strict: bool,
}

/// Find `resource` (a plural resource name, e.g. "pods" or "widgets") via
/// discovery and list every instance of it cluster-wide. Mirrors the
/// reference orchestrator's `discovery::pinned_kind` + `Api<DynamicObject>`
/// shape, generalized to resources this control plane has no compiled-in
/// type for.
async fn fetch_resource_items(
    client: &kube::Client,
    resource: &str,
) -> Result<Vec<kube::core::DynamicObject>, String> {
    let discovery = kube::discovery::Discovery::new(client.clone())
        .run()
        .await
        .map_err(|e| e.to_string())?;

    for group in discovery.groups() {
        for (ar, _caps) in group.recommended_resources() {
            if ar.plural == resource {
                let api: kube::Api<kube::core::DynamicObject> = kube::Api::all_with(client.clone(), &ar);
                let list = api.list(&Default::default()).await.map_err(|e| e.to_string())?;
                return Ok(list.items);
            }
        }
    }

    Err(format!("resource '{}' not found via discovery", resource))
}

async fn global_resource(
    State(state): State<RegistryState>,
    Path(resource): Path<String>,
    Query(params): Query<GlobalQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .aggregator
        .query(move |client| {
            let resource = resource.clone();
            async move { fetch_resource_items(&client.client, &resource).await }
        })
        .await;

    if params.strict && !result.failed_clusters.is_empty() {
        return Err(ApiError::Unreachable);
    }

    Ok(Json(result))
}

// ============================================================================
// WebSocket endpoints
// ============================================================================

async fn ws_topic(
    State(state): State<RegistryState>,
    Path(topic): Path<String>,
    Query(params): Query<std::collections::HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let cluster_filter = params.get("cluster").cloned();
    ws.on_upgrade(move |socket| handle_topic_socket(socket, state, topic, cluster_filter))
}

async fn ws_global_topic(
    State(state): State<RegistryState>,
    Path(topic): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_topic_socket(socket, state, topic, None))
}

async fn handle_topic_socket(
    mut socket: WebSocket,
    state: RegistryState,
    topic: String,
    cluster_filter: Option<String>,
) {
    let mut subscription = state.events.subscribe(&topic, cluster_filter).await;

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.events.unsubscribe(&topic, subscription.id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_state() -> RegistryState {
        let store = Arc::new(RegistrationStore::new());
        let credentials = Arc::new(CredentialStore::new());
        let pool = Arc::new(ClientPool::new(store.clone(), credentials.clone()));
        RegistryState::new(store, credentials, pool)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_registry_router(make_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_clusters_empty() {
        let app = create_registry_router(make_state());
        let response = app
            .oneshot(Request::builder().uri("/clusters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_cluster_local() {
        let app = create_registry_router(make_state());
        let body = serde_json::json!({
            "name": "gpu-east",
            "isLocal": true
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/clusters")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_get_cluster_detail_not_found() {
        let app = create_registry_router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/clusters/ghost/detail")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_cluster_returns_not_found() {
        let app = create_registry_router(make_state());
        let body = serde_json::json!({"clusterName": "ghost"});

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/clusters/ghost/heartbeat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_install_agent_unknown_cluster_not_found() {
        let app = create_registry_router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/clusters/ghost/install-agent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clusters_summary_empty() {
        let app = create_registry_router(make_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/clusters/summary")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
