//! HTTP endpoint for notification action buttons.
//!
//! ## Endpoints
//!
//! - `POST /reminders/{id}/action` with `{"action": "DONE" | "SNOOZE_30" | "DELAY_2H", "token"?: "..."}`
//!
//! Responses: 200 `{ok, id, status, due_at}`, 400 unknown action or malformed
//! body, 401 bad token, 404 unknown reminder, 409 canceled reminder. Every
//! error carries an `{ok: false, error}` JSON body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::NudgeError;
use crate::ledger::{ActionLedger, EntityType, Operation, RecordParams};
use crate::reminders::{
    AppliedAction, Reminder, ReminderAction, ReminderStatus, ReminderStore, StoreError,
    now_epoch_secs,
};

/// Ledger session used for mutations arriving through callbacks.
pub const CALLBACK_SESSION: &str = "callback";

/// `[callback]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CallbackConfig {
    pub enabled: bool,
    pub host: String,
    /// Use `0` to let the OS pick a port.
    pub port: u16,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_owned(),
            port: 8787,
        }
    }
}

/// Body of an action callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Success body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionResponse {
    pub ok: bool,
    pub id: i64,
    pub status: ReminderStatus,
    pub due_at: u64,
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

/// Shared state for the handlers.
#[derive(Clone)]
pub struct CallbackApp {
    store: Arc<ReminderStore>,
    ledger: Option<Arc<ActionLedger>>,
    token: Option<String>,
}

impl CallbackApp {
    pub fn new(store: Arc<ReminderStore>) -> Self {
        Self {
            store,
            ledger: None,
            token: None,
        }
    }

    /// Record every applied action in `ledger` so it can be undone.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<ActionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Require callers to echo `token`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/reminders/{id}/action", post(handle_action))
            .with_state(self)
    }
}

/// Running callback server.
pub struct CallbackServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind `{config.host}:{config.port}` and serve in a background task.
    pub async fn start(app: CallbackApp, config: &CallbackConfig) -> crate::error::Result<Self> {
        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| NudgeError::Callback(format!("callback server bind failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| NudgeError::Callback(format!("failed to get local addr: {e}")))?;

        info!("callback server listening on http://{addr}/reminders");

        let router = app.router();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("callback server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// `POST /reminders/{id}/action`
async fn handle_action(
    State(app): State<CallbackApp>,
    id: Result<Path<i64>, PathRejection>,
    request: Result<Json<ActionRequest>, JsonRejection>,
) -> Response {
    let Path(id) = match id {
        Ok(path) => path,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.body_text()),
    };
    let Json(request) = match request {
        Ok(json) => json,
        Err(e) => {
            warn!(id, "callback rejected: {}", e.body_text());
            return error_response(StatusCode::BAD_REQUEST, &e.body_text());
        }
    };

    if let Some(expected) = &app.token
        && request.token.as_deref() != Some(expected.as_str())
    {
        warn!(id, "callback rejected: bad token");
        return error_response(StatusCode::UNAUTHORIZED, "invalid callback token");
    }

    let action: ReminderAction = match request.action.parse() {
        Ok(a) => a,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let now = now_epoch_secs();
    let AppliedAction {
        before,
        after: updated,
    } = match app.store.apply_action(id, action, now) {
        Ok(applied) => applied,
        Err(e) => return store_error_response(&e),
    };
    info!(id, action = action.label(), status = %updated.status, "callback action applied");

    if let Some(ledger) = &app.ledger {
        let params = RecordParams::new(
            CALLBACK_SESSION,
            EntityType::Reminder,
            id.to_string(),
            Operation::Update,
            snapshot(&updated),
        )
        .with_before(snapshot(&before));
        if let Err(e) = ledger.record(&params, now) {
            warn!(id, "callback action not recorded in ledger: {e}");
        }
    }

    (
        StatusCode::OK,
        Json(ActionResponse {
            ok: true,
            id,
            status: updated.status,
            due_at: updated.due_at,
        }),
    )
        .into_response()
}

/// Fields an action can change, in the shape a restore accepts.
fn snapshot(reminder: &Reminder) -> serde_json::Value {
    serde_json::json!({
        "message": reminder.message,
        "due_at": reminder.due_at,
        "status": reminder.status,
        "sent_at": reminder.sent_at,
    })
}

fn store_error_response(e: &StoreError) -> Response {
    let status = match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => {
            tracing::error!("callback store failure: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, &e.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: message.to_owned(),
        }),
    )
        .into_response()
}
