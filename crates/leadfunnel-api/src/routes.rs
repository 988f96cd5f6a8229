//! Route handlers for the funnel API.
//!
//! Every action answers `{"ok": true, ...}` or `{"ok": false, "error": "..."}`.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use leadfunnel_kernel::country::HeaderSource;
use leadfunnel_kernel::{ActionError, LeadFunnelKernel, StartLeadRequest, StepAnswers};
use serde::Deserialize;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub kernel: Arc<LeadFunnelKernel>,
}

/// Request headers as seen by the country detector.
struct RequestHeaders<'a>(&'a HeaderMap);

impl HeaderSource for RequestHeaders<'_> {
    fn header(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Deserialize)]
pub struct SendOtpBody {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpBody {
    pub phone: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SetChannelBody {
    pub channel: String,
}

fn error_status(err: &ActionError) -> StatusCode {
    match err {
        ActionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ActionError::Provider(_) => StatusCode::BAD_GATEWAY,
        ActionError::NotFound => StatusCode::NOT_FOUND,
        ActionError::Throttled { .. } | ActionError::Locked => StatusCode::TOO_MANY_REQUESTS,
        ActionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond(result: Result<(), ActionError>) -> (StatusCode, Json<serde_json::Value>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))),
        Err(e) => failure(e),
    }
}

fn failure(e: ActionError) -> (StatusCode, Json<serde_json::Value>) {
    (
        error_status(&e),
        Json(serde_json::json!({
            "ok": false,
            "error": e.to_string(),
            "kind": e.kind(),
        })),
    )
}

/// POST /api/leads
pub async fn start_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartLeadRequest>,
) -> impl IntoResponse {
    match state
        .kernel
        .funnel
        .start_lead(&body, &RequestHeaders(&headers))
        .await
    {
        Ok(started) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "leadId": started.lead_id,
                "country": started.country,
            })),
        ),
        Err(e) => failure(e),
    }
}

/// POST /api/leads/{id}/steps
pub async fn save_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<StepAnswers>,
) -> impl IntoResponse {
    respond(state.kernel.funnel.save_step(&id, &body).await)
}

/// POST /api/leads/{id}/otp/send
pub async fn send_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SendOtpBody>,
) -> impl IntoResponse {
    respond(state.kernel.funnel.send_otp(&id, &body.phone).await)
}

/// POST /api/leads/{id}/otp/verify
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<VerifyOtpBody>,
) -> impl IntoResponse {
    respond(
        state
            .kernel
            .funnel
            .verify_otp(&id, &body.phone, &body.code)
            .await,
    )
}

/// POST /api/leads/{id}/channel
pub async fn set_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SetChannelBody>,
) -> impl IntoResponse {
    respond(state.kernel.funnel.set_channel(&id, &body.channel).await)
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "provider": state.kernel.funnel.provider_name(),
        "tracked_leads": state.kernel.funnel.tracked_leads(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
