//! Facebook Lead Ads webhook endpoints.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use leadrelay_core::domain::lead::Lead;
use leadrelay_core::errors::ApplicationError;
use leadrelay_core::signature::{verify_signature, SIGNATURE_HEADER};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::app::{ApiResult, AppState};

#[derive(Clone, Debug, Serialize)]
pub struct WebhookAck {
    pub ok: bool,
    pub lead: Lead,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deduped: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/facebook", get(verify_subscription).post(receive_notification))
        .with_state(state)
}

/// Subscription handshake: echoes `hub.challenge` when the verify token
/// matches the configured one.
pub async fn verify_subscription(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let expected = state.webhook.verify_token.as_ref().map(|token| token.expose_secret());

    match (mode, token, expected) {
        (Some("subscribe"), Some(token), Some(expected)) if token == expected => {
            info!(
                event_name = "webhook.subscription.verified",
                correlation_id = "webhook",
                "webhook subscription verified"
            );
            let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!(
                event_name = "webhook.subscription.rejected",
                correlation_id = "webhook",
                "webhook verification failed"
            );
            state.failure(ApplicationError::Forbidden("Verification failed".to_string())).into_response()
        }
    }
}

/// Takes the raw body so the signature is checked over the exact bytes sent.
pub async fn receive_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let secret = state.webhook.app_secret.as_ref().map(|secret| secret.expose_secret());
    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());

    if !verify_signature(secret, &body, signature) {
        warn!(
            event_name = "webhook.signature.rejected",
            correlation_id = "webhook",
            "webhook signature mismatch"
        );
        return Err(state.failure(ApplicationError::Forbidden("Invalid signature".to_string())));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|error| {
            state.failure(ApplicationError::InvalidRequest(format!("Invalid JSON payload: {error}")))
        })?;

    let outcome =
        state.intake.ingest_webhook(payload).await.map_err(|error| state.failure(error))?;
    Ok(Json(WebhookAck { ok: true, lead: outcome.lead, deduped: outcome.deduped }))
}
