use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kongossa_shared::constants::{APP_NAME, STATE_API};
use kongossa_shared::{Message, NodeId, NodeSnapshot, TunnelId, WireEnvelope};
use kongossa_store::ImportStats;
use kongossa_sync::{activity::evaluate, normalize_peer_url, Phase, ShareLink, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::state::Node;

const MAX_PARTICIPANT_LEN: usize = 64;

pub fn build_router(node: Node) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/share", get(share_link))
        .route(
            "/subscriptions",
            post(subscribe).get(list_subscriptions).delete(unsubscribe),
        )
        .route("/tunnels/:id/messages", post(post_message).get(list_messages))
        .route("/tunnels/:id/heartbeat", post(heartbeat))
        .route("/tunnels/:id/presence", get(presence))
        .route("/tunnels/:id/activity", get(activity))
        .route("/tunnels/:id/export", get(export_tunnel))
        .route("/tunnels/:id/import", post(import_tunnel))
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

fn parse_tunnel(raw: &str) -> Result<TunnelId, NodeError> {
    Ok(raw.parse::<TunnelId>()?)
}

// ─── Responses ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct NodeInfoResponse {
    name: &'static str,
    version: &'static str,
    node_id: String,
    public_url: String,
    tunnels: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct ShareResponse {
    node: String,
    url: String,
    link: String,
}

#[derive(Serialize)]
struct SubscribeResponse {
    peer_url: String,
    created: bool,
}

#[derive(Serialize)]
struct AppendResponse {
    id: String,
    version: u64,
    evicted: usize,
    /// `false` when the tunnel was full and the message was older than
    /// everything it keeps.
    retained: bool,
}

#[derive(Serialize)]
struct UnsubscribeResponse {
    peer_url: String,
}

#[derive(Serialize)]
struct PresenceResponse {
    participants: Vec<String>,
    ttl_secs: u64,
}

#[derive(Serialize)]
struct ActivityResponse {
    phase: Phase,
    rho: f64,
    phi: f64,
    gamma: f64,
    tick: u64,
    refresh_ms: u64,
}

// ─── Requests ───

#[derive(Deserialize)]
struct RootQuery {
    api: Option<String>,
    node: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize)]
struct SubscribeRequest {
    url: String,
}

#[derive(Deserialize)]
struct UnsubscribeQuery {
    url: String,
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct HeartbeatRequest {
    participant: String,
}

// ─── Handlers ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `?api=state` exposes ciphertext to peers, `?node=&url=` registers a
/// subscription from a share link, anything else describes the node.
async fn root(
    State(node): State<Node>,
    Query(query): Query<RootQuery>,
) -> Result<Response, NodeError> {
    if let Some(api) = query.api.as_deref() {
        if api != STATE_API {
            return Err(NodeError::BadRequest(format!("unknown api: {api}")));
        }
        let snapshot = NodeSnapshot {
            node_id: node.config.node_id.clone(),
            tunnels: node.store.snapshot().await,
        };
        return Ok(Json(snapshot).into_response());
    }

    match (query.node, query.url) {
        (Some(peer_node), Some(url)) => {
            let link = ShareLink::new(NodeId(peer_node), &url)?;
            let created = node.engine.subscribe(&link.url).await?;
            info!(peer = %link.url, node = %link.node, "subscription from share link");
            Ok(Json(SubscribeResponse {
                peer_url: link.url,
                created,
            })
            .into_response())
        }
        (None, None) => Ok(Json(NodeInfoResponse {
            name: APP_NAME,
            version: env!("CARGO_PKG_VERSION"),
            node_id: node.config.node_id.to_string(),
            public_url: node.config.public_url.clone(),
            tunnels: node.store.tunnel_ids().await.len(),
            uptime_secs: node.started_at.elapsed().as_secs(),
        })
        .into_response()),
        _ => Err(NodeError::BadRequest(
            "share links need both node and url".into(),
        )),
    }
}

async fn share_link(State(node): State<Node>) -> Result<Json<ShareResponse>, NodeError> {
    let link = ShareLink::new(node.config.node_id.clone(), &node.config.public_url)?;
    let rendered = link.to_url(&node.config.public_url)?;
    Ok(Json(ShareResponse {
        node: link.node.to_string(),
        url: link.url,
        link: rendered,
    }))
}

async fn subscribe(
    State(node): State<Node>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, NodeError> {
    let peer_url = normalize_peer_url(&req.url)?;
    let created = node.engine.subscribe(&peer_url).await?;
    Ok(Json(SubscribeResponse { peer_url, created }))
}

async fn list_subscriptions(
    headers: HeaderMap,
    State(node): State<Node>,
) -> Result<Json<Vec<SubscriptionStatus>>, NodeError> {
    verify_admin_token(&headers, &node.config)?;
    Ok(Json(node.engine.subscriptions().await))
}

async fn unsubscribe(
    headers: HeaderMap,
    State(node): State<Node>,
    Query(query): Query<UnsubscribeQuery>,
) -> Result<Json<UnsubscribeResponse>, NodeError> {
    verify_admin_token(&headers, &node.config)?;
    let peer_url = normalize_peer_url(&query.url)?;
    if !node.engine.unsubscribe(&peer_url).await? {
        return Err(NodeError::NotFound(format!("subscription {peer_url}")));
    }
    Ok(Json(UnsubscribeResponse { peer_url }))
}

async fn post_message(
    State(node): State<Node>,
    Path(id): Path<String>,
    Json(envelope): Json<WireEnvelope>,
) -> Result<Json<AppendResponse>, NodeError> {
    let tunnel = parse_tunnel(&id)?;
    let message = Message::try_from(envelope)?;
    let message_id = message.id.to_string();

    let outcome = node.store.append(&tunnel, message).await?;
    node.engine.clocks().nudge(&tunnel).await;
    if !outcome.retained {
        debug!(tunnel = %tunnel, message = %message_id, "message older than a full tunnel, evicted on insert");
    }

    Ok(Json(AppendResponse {
        id: message_id,
        version: outcome.version,
        evicted: outcome.evicted,
        retained: outcome.retained,
    }))
}

async fn list_messages(
    State(node): State<Node>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<WireEnvelope>>, NodeError> {
    let tunnel = parse_tunnel(&id)?;
    let limit = query.limit.unwrap_or(node.config.tunnel_capacity);
    let envelopes = node
        .store
        .messages(&tunnel, limit)
        .await
        .iter()
        .map(WireEnvelope::from)
        .collect();
    Ok(Json(envelopes))
}

async fn heartbeat(
    State(node): State<Node>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<PresenceResponse>, NodeError> {
    let tunnel = parse_tunnel(&id)?;
    let participant = req.participant.trim();
    if participant.is_empty() || participant.len() > MAX_PARTICIPANT_LEN {
        return Err(NodeError::BadRequest(format!(
            "participant must be 1..={MAX_PARTICIPANT_LEN} bytes"
        )));
    }

    node.presence.heartbeat(participant, &tunnel).await;
    Ok(Json(presence_response(&node, &tunnel).await))
}

async fn presence(
    State(node): State<Node>,
    Path(id): Path<String>,
) -> Result<Json<PresenceResponse>, NodeError> {
    let tunnel = parse_tunnel(&id)?;
    Ok(Json(presence_response(&node, &tunnel).await))
}

async fn presence_response(node: &Node, tunnel: &TunnelId) -> PresenceResponse {
    let participants = node
        .presence
        .active_participants(tunnel, node.presence_ttl())
        .await
        .into_iter()
        .collect();
    PresenceResponse {
        participants,
        ttl_secs: node.config.presence_ttl.as_secs(),
    }
}

async fn activity(
    State(node): State<Node>,
    Path(id): Path<String>,
) -> Result<Json<ActivityResponse>, NodeError> {
    let tunnel = parse_tunnel(&id)?;
    let clocks = node.engine.clocks();

    let response = match clocks.state(&tunnel).await {
        Some(state) => ActivityResponse {
            phase: state.phase,
            rho: state.rho,
            phi: state.phi,
            gamma: state.gamma,
            tick: state.tick,
            refresh_ms: state.phase.refresh_interval().as_millis() as u64,
        },
        None => {
            let idle = evaluate(clocks.config(), 0.0, 0);
            ActivityResponse {
                phase: idle.phase,
                rho: 0.0,
                phi: idle.phi,
                gamma: idle.gamma,
                tick: 0,
                refresh_ms: idle.phase.refresh_interval().as_millis() as u64,
            }
        }
    };
    Ok(Json(response))
}

async fn export_tunnel(
    headers: HeaderMap,
    State(node): State<Node>,
    Path(id): Path<String>,
) -> Result<Json<Vec<WireEnvelope>>, NodeError> {
    verify_admin_token(&headers, &node.config)?;
    let tunnel = parse_tunnel(&id)?;
    Ok(Json(node.store.export_tunnel(&tunnel).await?))
}

async fn import_tunnel(
    headers: HeaderMap,
    State(node): State<Node>,
    Path(id): Path<String>,
    Json(envelopes): Json<Vec<WireEnvelope>>,
) -> Result<Json<ImportStats>, NodeError> {
    verify_admin_token(&headers, &node.config)?;
    let tunnel = parse_tunnel(&id)?;
    Ok(Json(node.store.import_tunnel(&tunnel, envelopes).await?))
}

fn verify_admin_token(headers: &HeaderMap, config: &NodeConfig) -> Result<(), NodeError> {
    let Some(ref expected) = config.admin_token else {
        return Err(NodeError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(NodeError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

pub async fn serve(
    node: Node,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(node);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use kongossa_shared::{ContentType, MessageId};
    use kongossa_sync::HttpFetcher;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    const TUNNEL: &str = "1d5fa7b32c7096501b6c";
    const TOKEN: &str = "admin-token";

    fn config() -> NodeConfig {
        NodeConfig {
            node_id: NodeId("node-0badf00d".to_string()),
            public_url: "http://10.0.0.1:8080".to_string(),
            admin_token: Some(TOKEN.to_string()),
            ..NodeConfig::default()
        }
    }

    fn node_with(config: NodeConfig) -> Node {
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(1)).unwrap());
        Node::new(config, None, fetcher)
    }

    fn node() -> Node {
        node_with(config())
    }

    fn envelope_at(id: &str, created_at: chrono::DateTime<Utc>) -> Value {
        let message = Message {
            id: MessageId(id.to_string()),
            author: "u1".to_string(),
            content_type: ContentType::text(),
            fragments: vec![vec![0xAB; 40], vec![0xCD; 8]],
            created_at,
        };
        serde_json::to_value(WireEnvelope::from(&message)).unwrap()
    }

    fn envelope(id: &str) -> Value {
        envelope_at(id, Utc::now())
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_token(mut req: Request<Body>) -> Request<Body> {
        req.headers_mut()
            .insert("authorization", format!("Bearer {TOKEN}").parse().unwrap());
        req
    }

    #[tokio::test]
    async fn test_health() {
        let router = build_router(node());
        let (status, body) = send(&router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_root_describes_node() {
        let router = build_router(node());
        let (status, body) = send(&router, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "node-0badf00d");
        assert_eq!(body["tunnels"], 0);
    }

    #[tokio::test]
    async fn test_posted_message_appears_in_state() {
        let router = build_router(node());
        let uri = format!("/tunnels/{TUNNEL}/messages");

        let (status, body) = send(&router, post_json(&uri, &envelope("u1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);

        let (status, body) = send(&router, get("/?api=state")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ID"], "node-0badf00d");
        assert_eq!(body["TUNNELS"][TUNNEL]["version"], 1);
        assert_eq!(body["TUNNELS"][TUNNEL]["messages"][0]["id"], "u1");
        assert!(body.get("subscriptions").is_none());

        let (status, body) = send(&router, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_reports_eviction_on_full_tunnel() {
        let router = build_router(node_with(NodeConfig {
            tunnel_capacity: 1,
            ..config()
        }));
        let uri = format!("/tunnels/{TUNNEL}/messages");

        let (status, body) = send(&router, post_json(&uri, &envelope("now"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retained"], true);
        assert_eq!(body["evicted"], 0);

        let old = envelope_at("old", Utc::now() - chrono::Duration::hours(1));
        let (status, body) = send(&router, post_json(&uri, &old)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retained"], false);
        assert_eq!(body["evicted"], 1);
        assert_eq!(body["version"], 2);

        let (_, body) = send(&router, get(&uri)).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], "now");
    }

    #[tokio::test]
    async fn test_duplicate_message_conflicts() {
        let router = build_router(node());
        let uri = format!("/tunnels/{TUNNEL}/messages");
        send(&router, post_json(&uri, &envelope("dup"))).await;
        let (status, _) = send(&router, post_json(&uri, &envelope("dup"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let router = build_router(node());
        let (status, _) = send(&router, post_json("/tunnels/not-hex/messages", &envelope("a"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut bad = envelope("b");
        bad["f"] = json!(["%%%"]);
        let uri = format!("/tunnels/{TUNNEL}/messages");
        let (status, _) = send(&router, post_json(&uri, &bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, get("/?api=peers")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_share_link_subscribes() {
        let router = build_router(node());

        let (status, body) = send(&router, get("/share")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "http://10.0.0.1:8080");
        let link = body["link"].as_str().unwrap().to_string();
        assert!(link.contains("node=node-0badf00d"));

        let uri = "/?node=node-1a2b3c4d&url=http%3A%2F%2F10.0.0.2%3A8080%2F";
        let (status, body) = send(&router, get(uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["peer_url"], "http://10.0.0.2:8080");
        assert_eq!(body["created"], true);

        let (_, body) = send(&router, get(uri)).await;
        assert_eq!(body["created"], false);

        let (status, _) = send(&router, get("/?node=node-1a2b3c4d")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_subscription_list_is_admin_only() {
        let router = build_router(node());
        let (status, _) = send(
            &router,
            post_json("/subscriptions", &json!({ "url": "http://10.0.0.3:8080" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&router, get("/subscriptions")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&router, with_token(get("/subscriptions"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["peer_url"], "http://10.0.0.3:8080");
        assert_eq!(body[0]["failures"], 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_peer() {
        let router = build_router(node());
        send(
            &router,
            post_json("/subscriptions", &json!({ "url": "http://10.0.0.3:8080" })),
        )
        .await;

        let uri = "/subscriptions?url=http%3A%2F%2F10.0.0.3%3A8080%2F";
        let (status, _) = send(&router, delete(uri)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&router, with_token(delete(uri))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["peer_url"], "http://10.0.0.3:8080");

        let (_, body) = send(&router, with_token(get("/subscriptions"))).await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, _) = send(&router, with_token(delete(uri))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_heartbeat_and_presence() {
        let router = build_router(node());
        let uri = format!("/tunnels/{TUNNEL}/heartbeat");
        let (status, body) = send(&router, post_json(&uri, &json!({ "participant": "ada" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["participants"], json!(["ada"]));

        let (_, body) = send(&router, get(&format!("/tunnels/{TUNNEL}/presence"))).await;
        assert_eq!(body["participants"], json!(["ada"]));
        assert_eq!(body["ttl_secs"], 30);

        let (status, _) = send(&router, post_json(&uri, &json!({ "participant": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_activity_defaults_to_calm() {
        let router = build_router(node());
        let (status, body) = send(&router, get(&format!("/tunnels/{TUNNEL}/activity"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "calm");
        assert_eq!(body["refresh_ms"], 7000);
    }

    #[tokio::test]
    async fn test_export_import_between_nodes() {
        let source = build_router(node());
        let target = build_router(node());
        let messages = format!("/tunnels/{TUNNEL}/messages");
        send(&source, post_json(&messages, &envelope("a"))).await;
        send(&source, post_json(&messages, &envelope("b"))).await;

        let export = format!("/tunnels/{TUNNEL}/export");
        let (status, _) = send(&source, get(&export)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, backup) = send(&source, with_token(get(&export))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(backup.as_array().unwrap().len(), 2);

        let import = format!("/tunnels/{TUNNEL}/import");
        let (status, stats) = send(&target, with_token(post_json(&import, &backup))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["messages_imported"], 2);

        let (_, stats) = send(&target, with_token(post_json(&import, &backup))).await;
        assert_eq!(stats["messages_imported"], 0);

        let (status, _) = send(&target, with_token(get("/tunnels/00000000000000000000/export"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
