use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit},
    http::StatusCode,
    Json, Router,
};
use leadrelay_core::config::{AppConfig, Environment, MetaConfig, WebhookConfig};
use leadrelay_core::conversions::ConversionsDestination;
use leadrelay_core::errors::ApplicationError;
use leadrelay_core::oauth::OAuthStateStore;
use leadrelay_db::LeadStore;
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;

use crate::intake::LeadIntake;
use crate::meta::MetaApi;
use crate::{auth, health, leads, webhooks};

/// Request bodies above this size are rejected with 413.
pub const BODY_LIMIT_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub error: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { error: message.into() }))
}

#[derive(Clone)]
pub struct AppState {
    pub intake: LeadIntake,
    pub oauth_states: Arc<OAuthStateStore>,
    pub meta_config: Arc<MetaConfig>,
    pub webhook: Arc<WebhookConfig>,
    pub environment: Environment,
}

impl AppState {
    pub fn new(config: &AppConfig, store: Arc<dyn LeadStore>, meta: Arc<dyn MetaApi>) -> Self {
        let destination =
            ConversionsDestination::from_config(&config.conversions, &config.meta.conversions_base_url);
        Self {
            intake: LeadIntake::new(store, meta, destination),
            oauth_states: Arc::new(OAuthStateStore::new(config.meta.oauth_state_ttl_secs)),
            meta_config: Arc::new(config.meta.clone()),
            webhook: Arc::new(config.webhook.clone()),
            environment: config.server.environment,
        }
    }

    /// Maps a failure to its HTTP response. Server-side failures are logged
    /// with a fresh correlation id, and their detail is withheld in
    /// production.
    pub fn failure(&self, error: impl Into<ApplicationError>) -> (StatusCode, Json<ApiError>) {
        let interface = error.into().into_interface(Uuid::new_v4().to_string());
        let status = StatusCode::from_u16(interface.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(
                event_name = "http.request.failed",
                correlation_id = interface.correlation_id(),
                error = interface.message(),
                "request failed"
            );
        }

        let message = if self.environment.is_production() {
            interface.user_message()
        } else {
            interface.message()
        };
        api_error(status, message)
    }
}

/// Unwraps a JSON body, reporting extractor rejections in the `{"error"}`
/// shape used by every other failure. Anything but an oversized body is a
/// 400, including type mismatches and a missing content type.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        api_error(status, rejection.body_text())
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .merge(auth::router(state.clone()))
        .merge(webhooks::router(state.clone()))
        .merge(leads::router(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}


#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use leadrelay_core::config::{AppConfig, Environment};
    use leadrelay_core::errors::ApplicationError;
    use serde_json::json;

    use super::testing::{harness, json_request, send};
    use super::BODY_LIMIT_BYTES;
    use crate::meta::fake::FakeMetaApi;

    #[tokio::test]
    async fn internal_detail_is_hidden_in_production() {
        let mut config = AppConfig::default();
        config.server.environment = Environment::Production;
        let production = harness(config, FakeMetaApi::default());

        let (status, body) =
            production.state.failure(ApplicationError::Integration("meta api returned 500".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "Internal server error");

        let development = harness(AppConfig::default(), FakeMetaApi::default());
        let (_, body) =
            development.state.failure(ApplicationError::Integration("meta api returned 500".into()));
        assert_eq!(body.error, "meta api returned 500");
    }

    #[tokio::test]
    async fn client_errors_keep_their_message_in_production() {
        let mut config = AppConfig::default();
        config.server.environment = Environment::Production;
        let app = harness(config, FakeMetaApi::default());

        let (status, body) = app.state.failure(ApplicationError::NotFound("Lead not found".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "Lead not found");
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let app = harness(AppConfig::default(), FakeMetaApi::default());
        let huge = "x".repeat(BODY_LIMIT_BYTES + 1);

        let (status, _) =
            send(&app.router, json_request("POST", "/leads", json!({"fullName": huge}))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn mistyped_fields_are_bad_requests() {
        let app = harness(AppConfig::default(), FakeMetaApi::default());

        for (method, uri, body) in [
            ("PATCH", "/leads/lead-1", json!({"stage": 5})),
            ("POST", "/leads", json!({"fullName": 123})),
            ("POST", "/events/meta", json!({"userData": [1]})),
        ] {
            let (status, response) = send(&app.router, json_request(method, uri, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {uri}");
            assert!(response["error"].as_str().is_some(), "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn body_without_content_type_is_a_bad_request() {
        let app = harness(AppConfig::default(), FakeMetaApi::default());
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/leads")
            .body(axum::body::Body::from(r#"{"fullName":"Ana"}"#))
            .expect("request");

        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = harness(AppConfig::default(), FakeMetaApi::default());
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/leads")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{not json"))
            .expect("request");

        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());
    }
}
