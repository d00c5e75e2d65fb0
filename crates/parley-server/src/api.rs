use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use parley_engine::{new_message_now, ConversationListEvent, Engine};
use parley_media::MediaResolver;
use parley_shared::{ConversationId, Cursor, MessageId, MessageKind, UserId};
use parley_store::{ConversationSummary, Identity, Message, NewMessage};

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub media: Arc<MediaResolver>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let max_body = state.config.max_media_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/session/login", post(login))
        .route("/session/logout", post(logout))
        .route("/directory/:id", get(directory_lookup))
        .route("/directory/:id/exists", get(directory_exists))
        .route("/search", get(search))
        .route("/conversations", post(start_conversation))
        .route("/conversations", get(list_conversations))
        .route("/conversations/find", get(find_conversation))
        .route("/conversations/subscribe", get(subscribe_conversation_list))
        .route("/conversations/:id", delete(delete_conversation))
        .route("/conversations/:id/messages", post(send_message))
        .route("/conversations/:id/messages", get(list_messages))
        .route("/conversations/:id/subscribe", get(subscribe_messages))
        .route("/media/*path", post(media_upload))
        .route("/media/*path", get(media_download))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth helper
// ---------------------------------------------------------------------------

/// Resolve the bearer session token to its user.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ServerError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::Unauthorized)?;

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);
    let token = Uuid::parse_str(token.trim()).map_err(|_| ServerError::Unauthorized)?;

    Ok(state.engine.authenticate(&token).await?)
}

fn parse_conversation_id(raw: &str) -> Result<ConversationId, ServerError> {
    ConversationId::parse(raw)
        .map_err(|_| ServerError::BadRequest(format!("invalid conversation id: {raw}")))
}

// ---------------------------------------------------------------------------
// Health & sessions
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    display_name: String,
    #[serde(default)]
    profile_image_path: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    token: Uuid,
    user_id: UserId,
    issued_at: DateTime<Utc>,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let session = state
        .engine
        .login(&req.email, &req.display_name, req.profile_image_path.as_deref())
        .await?;

    Ok(Json(LoginResponse {
        token: session.token,
        user_id: session.user,
        issued_at: session.issued_at,
    }))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::Unauthorized)?;
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);
    let token = Uuid::parse_str(token.trim()).map_err(|_| ServerError::Unauthorized)?;

    let revoked = state.engine.logout(&token).await;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

// ---------------------------------------------------------------------------
// Directory & search
// ---------------------------------------------------------------------------

async fn directory_lookup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Identity>, ServerError> {
    authenticate(&state, &headers).await?;
    let identity = state.engine.get_identity(&UserId(id)).await?;
    Ok(Json(identity))
}

async fn directory_exists(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    authenticate(&state, &headers).await?;
    let exists = state.engine.identity_exists(&UserId(id)).await?;
    Ok(Json(serde_json::json!({ "exists": exists })))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<parley_store::DirectoryEntry>,
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ServerError> {
    let user = authenticate(&state, &headers).await?;
    let results = state.engine.search(&query.q, &user).await?;
    Ok(Json(SearchResponse { results }))
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StartConversationRequest {
    other_user: UserId,
    kind: MessageKind,
    /// Client-derived message id; derived server-side when absent.
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    sent_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct StartConversationResponse {
    conversation_id: ConversationId,
    created: bool,
    message: Message,
}

async fn start_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StartConversationRequest>,
) -> Result<Json<StartConversationResponse>, ServerError> {
    let user = authenticate(&state, &headers).await?;

    let message = build_message(&user, &req.other_user, req.kind, req.message_id, req.sent_at);
    let outcome = state
        .engine
        .start_conversation(&user, &req.other_user, message)
        .await?;

    info!(
        conversation = %outcome.conversation_id,
        created = outcome.created,
        user = %user,
        "conversation started"
    );

    Ok(Json(StartConversationResponse {
        conversation_id: outcome.conversation_id,
        created: outcome.created,
        message: outcome.append.message,
    }))
}

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<ConversationSummary>,
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConversationListResponse>, ServerError> {
    let user = authenticate(&state, &headers).await?;
    let conversations = state.engine.list_conversations(&user).await?;
    Ok(Json(ConversationListResponse { conversations }))
}

#[derive(Deserialize)]
struct FindQuery {
    other: UserId,
}

async fn find_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FindQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = authenticate(&state, &headers).await?;
    let found = state.engine.find_conversation(&user, &query.other).await?;
    Ok(Json(serde_json::json!({ "conversation_id": found })))
}

async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let user = authenticate(&state, &headers).await?;
    let id = parse_conversation_id(&id)?;

    // Best-effort by contract: absence is a false outcome, not a failure.
    let removed = state.engine.delete_conversation(&user, &id).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SendMessageRequest {
    kind: MessageKind,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    sent_at: Option<DateTime<Utc>>,
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let user = authenticate(&state, &headers).await?;
    let id = parse_conversation_id(&id)?;

    let other = state.engine.counterpart(&user, &id).await?;
    let message = build_message(&user, &other, req.kind, req.message_id, req.sent_at);

    let stored = state.engine.append_message(&user, &id, message).await?;
    Ok(Json(stored))
}

#[derive(Deserialize)]
struct ListMessagesQuery {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Serialize)]
struct ListMessagesResponse {
    messages: Vec<Message>,
    /// Cursor of the last returned message; pass as `after` to resume.
    next_cursor: Option<String>,
}

async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<ListMessagesResponse>, ServerError> {
    let user = authenticate(&state, &headers).await?;
    let id = parse_conversation_id(&id)?;

    let after = query
        .after
        .as_deref()
        .map(Cursor::decode)
        .transpose()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let messages = state
        .engine
        .list_messages(&user, &id, after, query.limit)
        .await?;

    let next_cursor = messages.last().map(|m| m.cursor().encode());
    Ok(Json(ListMessagesResponse {
        messages,
        next_cursor,
    }))
}

// ---------------------------------------------------------------------------
// Live subscriptions (SSE)
// ---------------------------------------------------------------------------

async fn subscribe_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let user = authenticate(&state, &headers).await?;
    let id = parse_conversation_id(&id)?;

    let subscription = state.engine.subscribe(&user, &id).await?;
    info!(conversation = %id, user = %user, "message subscription opened");

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let delivery = subscription.next().await?;
        let event = match Event::default().json_data(&delivery) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize delivery");
                return None;
            }
        };
        Some((Ok(event), subscription))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn subscribe_conversation_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let user = authenticate(&state, &headers).await?;

    let subscription = state.engine.subscribe_conversation_list(&user).await;
    info!(user = %user, "conversation-list subscription opened");

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let event: ConversationListEvent = subscription.next().await?;
        let event = match Event::default().json_data(&event) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize list event");
                return None;
            }
        };
        Some((Ok(event), subscription))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MediaUploadResponse {
    path: String,
}

async fn media_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<MediaUploadResponse>, ServerError> {
    authenticate(&state, &headers).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;

            let stable = state
                .media
                .register_upload(&path, &data, content_type.as_deref())
                .await?;

            info!(path = %stable, size = data.len(), "media uploaded via API");
            return Ok(Json(MediaUploadResponse { path: stable }));
        }
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn media_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    authenticate(&state, &headers).await?;

    let (data, content_type) = state.media.fetch(&path).await?;
    let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());

    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build the message to append, honoring a client-supplied id/timestamp
/// and deriving them otherwise.
fn build_message(
    sender: &UserId,
    recipient: &UserId,
    kind: MessageKind,
    message_id: Option<String>,
    sent_at: Option<DateTime<Utc>>,
) -> NewMessage {
    match (message_id, sent_at) {
        (Some(id), sent_at) => NewMessage {
            id: MessageId(id),
            sender: sender.clone(),
            sent_at: sent_at.unwrap_or_else(Utc::now),
            kind,
        },
        (None, Some(sent_at)) => NewMessage {
            id: MessageId::derive(sender, recipient, sent_at),
            sender: sender.clone(),
            sent_at,
            kind,
        },
        (None, None) => new_message_now(sender, recipient, kind),
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use parley_store::Database;

    async fn test_router(dir: &TempDir) -> Router {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(tokio::sync::Mutex::new(db));
        let engine = Arc::new(Engine::new(store.clone()));
        let blobs = parley_media::BlobStore::new(dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        let media = Arc::new(MediaResolver::new(blobs, store));
        build_router(AppState {
            engine,
            media,
            config: Arc::new(ServerConfig::default()),
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(app: &Router, email: &str, display_name: &str) -> String {
        let body = serde_json::json!({ "email": email, "display_name": display_name });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/session/login")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["token"].as_str().unwrap().to_string()
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/conversations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn conversation_flow_over_http() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let alice = login(&app, "alice@x.com", "Alice").await;
        let bob = login(&app, "bob@x.com", "Bob").await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/conversations",
                &alice,
                serde_json::json!({
                    "other_user": "bob_x_com",
                    "kind": { "type": "text", "body": "hi" },
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["created"], true);
        let conversation_id = created["conversation_id"].as_str().unwrap().to_string();

        // Bob sees the conversation with Alice's name and preview.
        let response = app.clone().oneshot(get("/conversations", &bob)).await.unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed["conversations"][0]["other_display_name"], "Alice");
        assert_eq!(listed["conversations"][0]["last_message"]["preview"], "hi");

        // And can read the log.
        let uri = format!("/conversations/{conversation_id}/messages");
        let response = app.clone().oneshot(get(&uri, &bob)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        assert_eq!(page["messages"].as_array().unwrap().len(), 1);
        assert!(page["next_cursor"].is_string());

        // An outsider is forbidden.
        let mallory = login(&app, "mallory@x.com", "Mallory").await;
        let response = app.clone().oneshot(get(&uri, &mallory)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_cursor_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let alice = login(&app, "alice@x.com", "Alice").await;
        login(&app, "bob@x.com", "Bob").await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/conversations",
                &alice,
                serde_json::json!({
                    "other_user": "bob_x_com",
                    "kind": { "type": "text", "body": "hi" },
                }),
            ))
            .await
            .unwrap();
        let created = body_json(response).await;
        let conversation_id = created["conversation_id"].as_str().unwrap().to_string();

        let uri = format!("/conversations/{conversation_id}/messages?after=garbage");
        let response = app.clone().oneshot(get(&uri, &alice)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_excludes_requester() {
        let dir = TempDir::new().unwrap();
        let app = test_router(&dir).await;

        let alice = login(&app, "alice@x.com", "Alice").await;
        login(&app, "albert@x.com", "Albert").await;

        let response = app
            .clone()
            .oneshot(get("/search?q=al", &alice))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let hits = body_json(response).await;
        let results = hits["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["display_name"], "Albert");
    }
}
