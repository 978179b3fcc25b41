//! # Feature: Webhook Relay
//!
//! Small HTTP side-channel that forwards help requests and monitoring alerts
//! into Discord channels.
//!
//! - `POST /help`  `{user, email, subject, message}` → help channel
//! - `POST /alert` `{status, alerts: [{annotations: {summary}}]}` → alerts channel
//! - `GET /`       health check

use anyhow::{anyhow, Context as _, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::{json, Value};
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::id::ChannelId;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::ConfigHandle;

/// Destination for relayed notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel_id: &str, text: &str) -> Result<()>;
}

/// Posts notifications through the Discord REST API.
pub struct DiscordSink {
    http: Arc<Http>,
}

impl DiscordSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let id: u64 = channel_id
            .parse()
            .map_err(|_| anyhow!("Invalid channel id {:?}", channel_id))?;
        ChannelId(id)
            .say(&self.http, text)
            .await
            .with_context(|| format!("Failed to send message to channel {}", channel_id))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<dyn NotificationSink>,
    pub config: ConfigHandle,
}

#[derive(Debug, Deserialize)]
pub struct HelpRequest {
    pub user: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    pub status: String,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

pub fn format_help(tag: &str, request: &HelpRequest) -> String {
    format!(
        "{} Help pls\n\n```From: {}\nEmail: {}\n\nSubject: {}\n\n{}```",
        tag, request.user, request.email, request.subject, request.message
    )
}

pub fn format_alert(tag: &str, request: &AlertRequest) -> String {
    let mut msg = format!("{} Alerts are {}:", tag, request.status);
    for alert in &request.alerts {
        let summary = alert.annotations.get("summary").map(String::as_str).unwrap_or("");
        msg.push_str(&format!("\n - {}", summary));
    }
    msg
}

pub fn create_server(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/help", post(handle_help))
        .route("/alert", post(handle_alert))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Webhook relay is running",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn handle_help(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, (StatusCode, String)> {
    let config = state.config.current();
    relay(
        &state,
        "help",
        &config.help_channel_id,
        &body,
        |request: HelpRequest| format_help(&config.sys_admin_tag, &request),
    )
    .await
}

async fn handle_alert(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, (StatusCode, String)> {
    let config = state.config.current();
    relay(
        &state,
        "alerts",
        &config.alerts_channel_id,
        &body,
        |request: AlertRequest| format_alert(&config.sys_admin_tag, &request),
    )
    .await
}

/// Parses `body`, formats it and sends it to `channel_id`. A malformed body is
/// reported to the same channel before the request is rejected.
async fn relay<T, F>(
    state: &AppState,
    kind: &str,
    channel_id: &str,
    body: &[u8],
    format: F,
) -> Result<StatusCode, (StatusCode, String)>
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> String,
{
    let request_id = uuid::Uuid::new_v4();
    info!("[{}] Received {} request | Body length: {}", request_id, kind, body.len());
    debug!("[{}] Request body: {}", request_id, String::from_utf8_lossy(body));

    let request: T = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            let err = format!("Failed to unmarshal request JSON: {}", e);
            error!("[{}] {}", request_id, err);
            if let Err(send_err) = state
                .sink
                .send(channel_id, &format!("{} request error: {}", kind, err))
                .await
            {
                error!(
                    "[{}] Failed to send failure notice to discord ({}): {:#}",
                    request_id, err, send_err
                );
            }
            return Err((StatusCode::BAD_REQUEST, err));
        }
    };

    state.sink.send(channel_id, &format(request)).await.map_err(|e| {
        error!("[{}] Failed to relay {} request: {:#}", request_id, kind, e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    })?;

    info!("[{}] Relayed {} request to channel {}", request_id, kind, channel_id);
    Ok(StatusCode::OK)
}

pub async fn start_http_server(state: AppState, address: &str) -> Result<()> {
    let app = create_server(state);

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {}: {}", address, e))?;

    info!("Serving http server on {}", address);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
