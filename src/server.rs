//! JSON HTTP server.
//!
//! Exposes chat sessions and ticket operations over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sessions` | Start a session, returns `{ "session_id" }` |
//! | `DELETE` | `/sessions/{id}` | End a session |
//! | `POST`   | `/sessions/{id}/ask` | `{ "question", "mode"? }` → answer with sources |
//! | `GET`    | `/sessions/{id}/turns` | Chat log of the session |
//! | `GET`    | `/incidents` | List incidents (`?state=&priority=&limit=`) |
//! | `POST`   | `/incidents` | Create an incident |
//! | `GET`    | `/incidents/{number}` | Incident detail |
//! | `PATCH`  | `/incidents/{number}` | Update fields (JSON object of field → value) |
//! | `POST`   | `/incidents/{number}/close` | Close, optional `{ "notes" }` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "session not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream_error`
//! (status of the ticketing system), `ticket_service_unavailable` (502),
//! `tickets_unconfigured` (503).
//!
//! Sessions live in a mutex-guarded [`SessionStore`]; the lock is never held
//! while a question is being answered. Sessions idle past
//! `[server].session_idle_secs` answer 404, and creating one beyond
//! `[server].max_sessions` evicts the least recently active.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, SearchMode, ServerConfig};
use crate::error::TicketServiceError;
use crate::models::ChatTurn;
use crate::rag::{RagPipeline, RagResponse};
use crate::session::{Session, SessionStore};
use crate::tickets::{Incident, IncidentFilter, NewIncident, TicketClient};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    rag: Arc<RagPipeline>,
    tickets: Option<TicketClient>,
    sessions: Arc<Mutex<SessionStore>>,
}

impl AppState {
    /// State with the default session limits of `[server]`.
    pub fn new(rag: Arc<RagPipeline>, tickets: Option<TicketClient>) -> Self {
        let defaults = ServerConfig::default();
        Self::with_session_limits(
            rag,
            tickets,
            Duration::from_secs(defaults.session_idle_secs),
            defaults.max_sessions,
        )
    }

    pub fn with_session_limits(
        rag: Arc<RagPipeline>,
        tickets: Option<TicketClient>,
        idle_ttl: Duration,
        max_sessions: usize,
    ) -> Self {
        Self {
            rag,
            tickets,
            sessions: Arc::new(Mutex::new(SessionStore::new(idle_ttl, max_sessions))),
        }
    }
}

/// Build the router. Exposed separately so tests can serve it on any listener.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route("/sessions/{id}", axum::routing::delete(handle_end_session))
        .route("/sessions/{id}/ask", post(handle_ask))
        .route("/sessions/{id}/turns", get(handle_turns))
        .route("/incidents", get(handle_list_incidents).post(handle_create_incident))
        .route(
            "/incidents/{number}",
            get(handle_get_incident).patch(handle_update_incident),
        )
        .route("/incidents/{number}/close", post(handle_close_incident))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, rag: Arc<RagPipeline>, tickets: Option<TicketClient>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::with_session_limits(
        rag,
        tickets,
        Duration::from_secs(config.server.session_idle_secs),
        config.server.max_sessions,
    );
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("Incident assistant listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
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

/// Ticket failures keep the upstream status when there is one.
impl From<TicketServiceError> for AppError {
    fn from(err: TicketServiceError) -> Self {
        let message = err.to_string();
        match (&err, err.status()) {
            (TicketServiceError::NotFound(_), _) => not_found(message),
            (TicketServiceError::InvalidNumber(_), _) => bad_request(message),
            (_, Some(status)) => AppError {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                code: "upstream_error".to_string(),
                message,
            },
            (_, None) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "ticket_service_unavailable".to_string(),
                message,
            },
        }
    }
}

fn parse_session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| bad_request(format!("invalid session id: {}", raw)))
}

fn tickets(state: &AppState) -> Result<&TicketClient, AppError> {
    state.tickets.as_ref().ok_or_else(|| AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "tickets_unconfigured".to_string(),
        message: "ticket service not configured: set [tickets].base_url".to_string(),
    })
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

// ============ Sessions ============

#[derive(Serialize)]
struct SessionCreated {
    session_id: Uuid,
}

async fn handle_create_session(State(state): State<AppState>) -> Result<(StatusCode, Json<SessionCreated>), AppError> {
    let session = Session::new();
    let session_id = session.id;
    state
        .sessions
        .lock()
        .map_err(|_| internal("session store poisoned"))?
        .insert(session);
    Ok((StatusCode::CREATED, Json(SessionCreated { session_id })))
}

async fn handle_end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_session_id(&id)?;
    let removed = state
        .sessions
        .lock()
        .map_err(|_| internal("session store poisoned"))?
        .remove(&id);
    match removed {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(not_found("session not found")),
    }
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    mode: Option<SearchMode>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<RagResponse>, AppError> {
    let id = parse_session_id(&id)?;
    let exists = state
        .sessions
        .lock()
        .map_err(|_| internal("session store poisoned"))?
        .touch(&id)
        .is_some();
    if !exists {
        return Err(not_found("session not found"));
    }

    let response = state.rag.ask(&req.question, req.mode).await;

    let mut sessions = state
        .sessions
        .lock()
        .map_err(|_| internal("session store poisoned"))?;
    match sessions.touch(&id) {
        Some(session) => {
            session.record(&req.question, &response);
            Ok(Json(response))
        }
        None => Err(not_found("session ended while answering")),
    }
}

async fn handle_turns(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChatTurn>>, AppError> {
    let id = parse_session_id(&id)?;
    let mut sessions = state
        .sessions
        .lock()
        .map_err(|_| internal("session store poisoned"))?;
    sessions
        .touch(&id)
        .map(|s| Json(s.turns().to_vec()))
        .ok_or_else(|| not_found("session not found"))
}

// ============ Incidents ============

async fn handle_list_incidents(
    State(state): State<AppState>,
    Query(filter): Query<IncidentFilter>,
) -> Result<Json<Vec<Incident>>, AppError> {
    Ok(Json(tickets(&state)?.list(&filter).await?))
}

async fn handle_get_incident(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<Incident>, AppError> {
    Ok(Json(tickets(&state)?.get(&number).await?))
}

async fn handle_create_incident(
    State(state): State<AppState>,
    Json(new): Json<NewIncident>,
) -> Result<(StatusCode, Json<Incident>), AppError> {
    if new.short_description.trim().is_empty() {
        return Err(bad_request("short_description must not be empty"));
    }
    let created = tickets(&state)?.create(&new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn handle_update_incident(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(fields): Json<Map<String, Value>>,
) -> Result<Json<Incident>, AppError> {
    if fields.is_empty() {
        return Err(bad_request("no fields to update"));
    }
    Ok(Json(tickets(&state)?.update(&number, &fields).await?))
}

#[derive(Deserialize, Default)]
struct CloseRequest {
    #[serde(default)]
    notes: Option<String>,
}

async fn handle_close_incident(
    State(state): State<AppState>,
    Path(number): Path<String>,
    body: Bytes,
) -> Result<Json<Incident>, AppError> {
    let req: CloseRequest = if body.is_empty() {
        CloseRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid close request: {}", e)))?
    };
    Ok(Json(tickets(&state)?.close(&number, req.notes.as_deref()).await?))
}
