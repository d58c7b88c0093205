//! Relay HTTP and WebSocket server
//!
//! Routes:
//! - `GET /` with an upgrade: the signaling WebSocket
//! - `GET /health`, `GET /stats`: JSON status
//! - `POST /upload`: multipart store-and-forward upload, announced to the room
//! - `GET /uploads/*`: uploaded files
//!
//! One task per WebSocket reads client messages and hands them to the
//! [`RelayCoordinator`]; a second task per connection drains the member's
//! outbound queue into the socket.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::multipart::Field;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{DefaultBodyLimit, Multipart, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use beam_core::{MemberId, RoomId, SignalConfig, DEFAULT_MAX_UPLOAD_BYTES};

use crate::coordinator::RelayCoordinator;
use crate::messages::{ClientMessage, ErrorCode, ServerMessage, SharedFile};

/// Signal server state
#[derive(Clone)]
pub struct SignalServer {
    coordinator: Arc<RelayCoordinator>,
    upload_dir: Arc<PathBuf>,
    max_upload_bytes: usize,
}

impl SignalServer {
    pub fn new(max_members_per_room: usize) -> Self {
        Self {
            coordinator: Arc::new(RelayCoordinator::new(max_members_per_room)),
            upload_dir: Arc::new(PathBuf::from("uploads")),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn from_config(config: &SignalConfig) -> Self {
        Self::new(config.max_members_per_room)
            .with_upload_dir(config.upload_dir.clone())
            .with_max_upload_bytes(config.max_upload_bytes)
    }

    /// Store uploads under `dir`
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Arc::new(dir.into());
        self
    }

    pub fn with_max_upload_bytes(mut self, max: usize) -> Self {
        self.max_upload_bytes = max;
        self
    }

    /// Start the signal server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signal server listening on {}", addr);
        self.serve_listener(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        tokio::fs::create_dir_all(self.upload_dir.as_path()).await?;
        debug!("Serving uploads from {:?}", self.upload_dir);
        axum::serve(listener, self.router()).await
    }

    /// All routes, ready to serve
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(ws_handler))
            .route("/health", get(health))
            .route("/stats", get(stats))
            .route("/upload", post(upload))
            .nest_service("/uploads", ServeDir::new(self.upload_dir.as_path()))
            .fallback(not_found)
            .layer(DefaultBodyLimit::max(self.max_upload_bytes))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub fn coordinator(&self) -> &Arc<RelayCoordinator> {
        &self.coordinator
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Get room count (for monitoring)
    pub fn room_count(&self) -> usize {
        self.coordinator.room_count()
    }

    /// Get connected member count (for monitoring)
    pub fn member_count(&self) -> usize {
        self.coordinator.member_count()
    }
}

impl Default for SignalServer {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_MEMBERS_PER_ROOM)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(server): State<SignalServer>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, server.coordinator))
}

/// Run one signaling connection until either side hangs up
async fn handle_socket(socket: WebSocket, coordinator: Arc<RelayCoordinator>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let member_id = MemberId::generate();
    debug!("New connection as {}", member_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    coordinator.connect(member_id.clone(), tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode relay message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error: {:?}", e);
                break;
            }
        };

        match ClientMessage::from_json(&text) {
            Ok(message) => coordinator.handle(&member_id, message),
            Err(e) => {
                warn!("Invalid message from {}: {}", member_id, e);
                coordinator.send_to(
                    &member_id,
                    ServerMessage::error(ErrorCode::InvalidMessage, format!("Invalid message: {}", e)),
                );
            }
        }
    }

    // Cleanup on disconnect; dropping the queue stops the writer
    coordinator.disconnect(&member_id);
    let _ = writer.await;

    debug!("Connection closed: {}", member_id);
}

async fn health(State(server): State<SignalServer>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "rooms": server.room_count(),
        "members": server.member_count(),
    }))
}

async fn stats(State(server): State<SignalServer>) -> Json<serde_json::Value> {
    Json(json!({
        "rooms": server.room_count(),
        "members": server.member_count(),
    }))
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}

#[derive(Debug, Default, Deserialize)]
struct UploadQuery {
    #[serde(rename = "roomId")]
    room_id: Option<String>,
}

/// Body of a successful upload
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    #[serde(flatten)]
    pub file: SharedFile,
}

fn upload_error(status: StatusCode, message: impl Into<String>) -> Response {
    let message: String = message.into();
    (status, Json(json!({ "error": message }))).into_response()
}

/// Store the `file` field and tell the room about it
///
/// The room comes from a `roomId` form field, else the `roomId` query
/// parameter. Without either the file is stored but nobody is told.
async fn upload(
    State(server): State<SignalServer>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Response {
    let mut stored: Option<SharedFile> = None;
    let mut form_room = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return upload_error(StatusCode::BAD_REQUEST, e.body_text()),
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" if stored.is_none() => match store_field(&server.upload_dir, field).await {
                Ok(file) => stored = Some(file),
                Err(e) => {
                    error!("Failed to store upload: {}", e);
                    return upload_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store file");
                }
            },
            "roomId" => match field.text().await {
                Ok(text) => form_room = Some(text),
                Err(e) => return upload_error(StatusCode::BAD_REQUEST, e.body_text()),
            },
            _ => {}
        }
    }

    let Some(file) = stored else {
        return upload_error(StatusCode::BAD_REQUEST, "No file uploaded");
    };
    info!("Stored upload '{}' as {}", file.originalname, file.filename);

    if let Some(room) = form_room.or(query.room_id).filter(|r| !r.is_empty()) {
        match RoomId::new(room) {
            Ok(room_id) => {
                let told = server
                    .coordinator
                    .broadcast(&room_id, ServerMessage::FileShared(file.clone()));
                info!("File shared in room {} with {} member(s)", room_id, told);
            }
            Err(e) => warn!("Not announcing upload: {}", e),
        }
    }

    Json(UploadResponse {
        message: "File uploaded successfully".into(),
        file,
    })
    .into_response()
}

/// Stream one multipart field to disk under a unique name
async fn store_field(dir: &Path, mut field: Field<'_>) -> std::io::Result<SharedFile> {
    let originalname = field.file_name().unwrap_or("upload").to_string();
    let filename = stored_name(&originalname);

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&filename);
    let mut out = tokio::fs::File::create(&path).await?;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => out.write_all(&chunk).await?,
            Ok(None) => break,
            Err(e) => {
                drop(out);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.body_text()));
            }
        }
    }
    out.flush().await?;

    Ok(SharedFile {
        path: format!("/uploads/{}", filename),
        filename,
        originalname,
    })
}

/// `<millis>-<random>-<name>`, with the name reduced to a safe file name
fn stored_name(originalname: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = getrandom::u32().unwrap_or(millis as u32) % 1_000_000_000;
    format!("{}-{}-{}", millis, suffix, sanitize_file_name(originalname))
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    match cleaned.trim_start_matches('.') {
        "" => "upload".to_string(),
        rest => rest.to_string(),
    }
}
