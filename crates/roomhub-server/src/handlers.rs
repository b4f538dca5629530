//! HTTP and WebSocket handlers for the roomhub server.
//!
//! Room management lives under `/chat` and identifies the caller by the
//! `x-user-id` header set by the upstream auth gateway. `/ws` upgrades to a
//! session for the user named in its query string.

use crate::config::Config;
use crate::directory::{HubBackedDirectory, UserDirectory};
use crate::metrics;
use crate::session::{Session, SessionConfig};
use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{
        rejection::JsonRejection, ws::WebSocketUpgrade, FromRequestParts, Path, Query, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use roomhub_core::{spawn_persister, Hub, HubError, MemoryRoomStore};
use roomhub_transport::websocket;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Header carrying the authenticated user ID.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared server state.
pub struct AppState {
    /// The room hub.
    pub hub: Arc<Hub>,
    /// User lookups for room management.
    pub directory: Arc<dyn UserDirectory>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(hub: Arc<Hub>, directory: Arc<dyn UserDirectory>, config: Config) -> Self {
        Self {
            hub,
            directory,
            config,
        }
    }
}

/// API errors, rendered as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::RoomNotFound(_) => Self::NotFound("Room not found".into()),
            HubError::Forbidden { .. } => {
                Self::Forbidden("Only admins can add users to this room".into())
            }
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// The authenticated caller, taken from the `x-user-id` header.
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Self(value.to_string()))
            .ok_or(ApiError::Unauthorized("User not authenticated"))
    }
}

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let chat = Router::new()
        .route("/rooms", get(list_rooms_handler))
        .route("/rooms/:room_id", get(get_room_handler))
        .route("/createroom", post(create_room_handler))
        .route("/addusertoroom", post(add_user_handler));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .nest("/chat", chat)
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // In-process store: rooms do not survive a restart.
    let store = Arc::new(MemoryRoomStore::new());
    let (persister, _persister_task) = spawn_persister(store.clone());
    let hub = Arc::new(Hub::with_persistence(persister));
    hub.load_rooms(store.as_ref())
        .await
        .context("Failed to load rooms")?;
    metrics::set_rooms(hub.room_count());

    let directory = Arc::new(HubBackedDirectory::new(
        Arc::clone(&hub),
        &config.directory.users,
    ));
    info!(users = directory.len(), "User directory ready");

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!(error = %e, "Failed to start metrics server");
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("roomhub listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let state = Arc::new(AppState::new(hub, directory, config));
    serve(listener, state).await
}

/// Serve the application on an already bound listener until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Query parameters of the WebSocket upgrade.
#[derive(Debug, Deserialize)]
struct WsParams {
    user_id: Option<String>,
    username: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    let (Some(user_id), Some(username)) = (non_empty(params.user_id), non_empty(params.username))
    else {
        return Err(ApiError::Unauthorized("Unauthorized"));
    };
    let ws = ws.ok_or_else(|| ApiError::BadRequest("WebSocket upgrade required".into()))?;

    if state.hub.connection_count() >= state.config.limits.max_connections {
        warn!(user = %user_id, "Connection limit reached");
        metrics::record_error("connection_limit");
        return Err(ApiError::Unavailable("Too many connections".into()));
    }

    debug!(user = %user_id, "WebSocket upgrade");
    let hub = Arc::clone(&state.hub);
    let session_config = SessionConfig::from(&state.config);

    Ok(ws
        .max_message_size(session_config.max_message_size)
        .on_upgrade(move |socket| async move {
            let session = Session::register(hub, user_id, username, session_config);
            let (sink, source) = websocket::split(socket);
            session.run(sink, source).await;
        }))
}

/// List the rooms the caller is authorized for.
async fn list_rooms_handler(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
) -> impl IntoResponse {
    Json(json!({ "rooms": state.hub.rooms_for_user(&caller) }))
}

/// Get one room.
async fn get_room_handler(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state
        .hub
        .get_room(&room_id)
        .ok_or_else(|| ApiError::NotFound("Room not found".into()))?;

    if room.is_private() && !room.is_authorized(&caller) {
        return Err(ApiError::Forbidden("Not authorized for this room".into()));
    }

    Ok(Json(json!({
        "id": room.id(),
        "name": room.name(),
        "is_private": room.is_private(),
        "active_members": room.active_members().len(),
    })))
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    roomname: String,
    guest_email: String,
    #[serde(default)]
    is_private: bool,
}

/// Create a room between the caller and a guest.
async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    payload: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    if req.roomname.trim().is_empty() {
        return Err(ApiError::BadRequest("roomname is required".into()));
    }

    let guest_id = resolve_email(&state, &req.guest_email)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(format!("Guest user not found with email: {}", req.guest_email))
        })?;

    let room = state.hub.create_room(&req.roomname, &caller, req.is_private);
    state
        .hub
        .add_authorized_member(room.id(), &guest_id, &caller)
        .map_err(|e| {
            error!(room = %room.id(), error = %e, "Failed to add guest");
            ApiError::Internal("Failed to add guest user to room".into())
        })?;
    metrics::set_rooms(state.hub.room_count());

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "room_id": room.id(),
            "name": room.name(),
            "message": "Room created successfully and guest user added",
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct AddUserRequest {
    room_id: String,
    user_email: String,
    #[serde(default)]
    make_admin: bool,
}

/// Add a user to a room, optionally as an admin.
async fn add_user_handler(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    payload: Result<Json<AddUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    if !state.hub.room_exists(&req.room_id) {
        return Err(ApiError::NotFound("Room not found".into()));
    }

    let is_admin = state
        .directory
        .is_user_admin(&caller, &req.room_id)
        .await
        .map_err(|e| {
            error!(error = %e, "Admin check failed");
            ApiError::Internal("Failed to check admin status".into())
        })?;
    if !is_admin {
        return Err(ApiError::Forbidden(
            "Only admins can add users to this room".into(),
        ));
    }

    let user_id = resolve_email(&state, &req.user_email)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(format!("User not found with email: {}", req.user_email))
        })?;

    let role = if req.make_admin {
        state.hub.add_admin(&req.room_id, &user_id, &caller)?;
        "admin"
    } else {
        state
            .hub
            .add_authorized_member(&req.room_id, &user_id, &caller)?;
        "member"
    };

    Ok(Json(json!({
        "message": format!("User added to room as {role}"),
        "room_id": req.room_id,
    })))
}

async fn resolve_email(state: &AppState, email: &str) -> Result<Option<String>, ApiError> {
    state.directory.user_id_by_email(email).await.map_err(|e| {
        error!(error = %e, "Directory lookup failed");
        ApiError::Internal("Failed to look up user".into())
    })
}
