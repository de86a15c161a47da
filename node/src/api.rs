//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the relay's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                          |
//! |--------|------------------------|--------------------------------------|
//! | GET    | `/health`              | Liveness probe                       |
//! | GET    | `/status`              | Version, sessions by state, sockets  |
//! | GET    | `/ws`                  | Relay protocol (merchant and client) |
//! | GET    | `/sessions/{id}/qr`    | Payment QR code as a PNG data URL    |
//! | POST   | `/convert-ars-to-usdc` | ARS amount to USDC at the live rate  |
//! | POST   | `/convert-usdc-to-ars` | USDC amount to ARS at the live rate  |

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use mapp_protocol::pricing::{self, CurrencyUnit, PriceFeed, PricingError};
use mapp_protocol::qr::{self, MerchantDirectory};
use mapp_protocol::session::{SessionError, StateCounts};
use mapp_protocol::{Outbound, RelayProtocol, SessionId};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The relay's reported version string.
    pub version: String,
    pub protocol: Arc<RelayProtocol>,
    pub price_feed: Arc<dyn PriceFeed>,
    pub merchants: Arc<MerchantDirectory>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(protocol: Arc<RelayProtocol>, price_feed: Arc<dyn PriceFeed>) -> Self {
        Self {
            version: format!(
                "{} (protocol {})",
                env!("CARGO_PKG_VERSION"),
                mapp_protocol::config::PROTOCOL_VERSION,
            ),
            protocol,
            price_feed,
            merchants: Arc::new(MerchantDirectory::new()),
            started_at: Utc::now(),
        }
    }

    pub fn with_merchants(mut self, merchants: Arc<MerchantDirectory>) -> Self {
        self.merchants = merchants;
        self
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ws", get(ws_handler))
        .route("/sessions/:id/qr", get(qr_handler))
        .route("/convert-ars-to-usdc", post(ars_to_usdc_handler))
        .route("/convert-usdc-to-ars", post(usdc_to_ars_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: i64,
    pub connections: usize,
    pub sessions: SessionsSummary,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionsSummary {
    pub total: usize,
    pub created: usize,
    pub joined: usize,
    pub submitted: usize,
    pub finalized: usize,
    pub expired: usize,
}

impl From<StateCounts> for SessionsSummary {
    fn from(counts: StateCounts) -> Self {
        Self {
            total: counts.total(),
            created: counts.created,
            joined: counts.joined,
            submitted: counts.submitted,
            finalized: counts.finalized,
            expired: counts.expired,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub ars_value: f64,
    pub usdc_value: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
    pub session_id: String,
    /// `data:image/png;base64,...`
    pub qr_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: plain-text liveness probe.
async fn health_handler() -> &'static str {
    "OK"
}

/// `GET /status`: relay summary.
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let protocol = &state.protocol;
    Json(StatusResponse {
        version: state.version.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        connections: protocol.router().len(),
        sessions: protocol.store().count_by_state().into(),
    })
}

async fn ars_to_usdc_handler(
    State(state): State<AppState>,
    Json(req): Json<ConvertRequest>,
) -> Response {
    convert_handler(&state, req, CurrencyUnit::Ars, CurrencyUnit::Usdc).await
}

async fn usdc_to_ars_handler(
    State(state): State<AppState>,
    Json(req): Json<ConvertRequest>,
) -> Response {
    convert_handler(&state, req, CurrencyUnit::Usdc, CurrencyUnit::Ars).await
}

async fn convert_handler(
    state: &AppState,
    req: ConvertRequest,
    from: CurrencyUnit,
    to: CurrencyUnit,
) -> Response {
    let amount = match req.amount {
        Some(amount) if amount != 0.0 => amount,
        _ => return error_response(StatusCode::BAD_REQUEST, format!("{from} amount is required")),
    };

    match pricing::convert(state.price_feed.as_ref(), amount, from, to).await {
        Ok(converted) => {
            let (ars_value, usdc_value) = match from {
                CurrencyUnit::Ars => (amount, converted),
                CurrencyUnit::Usdc => (converted, amount),
            };
            Json(ConvertResponse {
                ars_value,
                usdc_value,
            })
            .into_response()
        }
        Err(PricingError::InvalidAmount) => {
            error_response(StatusCode::BAD_REQUEST, PricingError::InvalidAmount.to_string())
        }
        Err(e) => {
            tracing::warn!(error = %e, %from, %to, "currency conversion failed");
            error_response(StatusCode::BAD_GATEWAY, "Error converting currency")
        }
    }
}

/// `GET /sessions/{id}/qr`: the QR code a merchant shows to the customer.
async fn qr_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session_id = SessionId::from(id);
    let snapshot = match state.protocol.store().get(&session_id) {
        Ok(snapshot) => snapshot,
        Err(e @ SessionError::Expired(_)) => return error_response(StatusCode::GONE, e.to_string()),
        Err(e) => return error_response(StatusCode::NOT_FOUND, e.to_string()),
    };

    let merchant = state.merchants.get(snapshot.details.merchant_id());
    if merchant.is_none() {
        tracing::debug!(
            session_id = %session_id,
            merchant_id = snapshot.details.merchant_id(),
            "merchant not in directory, QR carries no merchant details"
        );
    }

    match qr::payment_qr_data_url(&session_id, &snapshot.details, merchant, Utc::now()) {
        Ok(qr_code) => Json(QrResponse {
            session_id: session_id.to_string(),
            qr_code,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "failed to render payment QR");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Error generating QR code")
        }
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// `GET /ws`: upgrades to the relay protocol.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let protocol = Arc::clone(&state.protocol);
    ws.on_upgrade(move |socket| handle_ws_connection(socket, protocol))
}

/// Pumps one socket. The writer half drains the relay's outbound queue
/// for this connection; the reader half feeds frames into the relay. The
/// connection ends when either half does.
async fn handle_ws_connection(socket: WebSocket, protocol: Arc<RelayProtocol>) {
    let (connection, mut outbound) = protocol.connect();
    let (mut sink, mut stream) = socket.split();
    tracing::debug!(connection_id = %connection, "websocket connected");

    let mut writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Frame(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => protocol.handle_text(connection, &text),
                Some(Ok(Message::Binary(_))) => protocol.handle_binary(connection),
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by axum.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection, error = %e, "websocket read failed");
                    break;
                }
            },
        }
    }

    // Unregistering drops the outbound sender, which ends the writer.
    protocol.disconnect(connection);
}
