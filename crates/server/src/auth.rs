//! Page-connect OAuth flow.
//!
//! `start` sends the operator to the consent dialog with a single-use state,
//! `callback` exchanges the code, stores every page token and subscribes each
//! page to `leadgen`, then either redirects back to the caller or answers
//! with JSON when no trusted redirect was supplied.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use leadrelay_core::domain::page::{FacebookPage, NewFacebookPage};
use leadrelay_core::errors::ApplicationError;
use leadrelay_core::oauth::{build_redirect_url, resolve_redirect_uri};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use crate::app::{api_error, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    pub tenant: Option<String>,
    pub redirect: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PagesParams {
    pub tenant: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackSummary {
    pub ok: bool,
    pub pages: usize,
    pub stored: Vec<FacebookPage>,
}

#[derive(Debug, Serialize)]
pub struct PageList {
    pub data: Vec<FacebookPage>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/meta/start", get(start))
        .route("/auth/meta/callback", get(callback))
        .route("/auth/meta/pages", get(list_pages))
        .with_state(state)
}

fn found(location: &Url) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.as_str().to_string())]).into_response()
}

pub async fn start(
    State(state): State<AppState>,
    Query(params): Query<StartParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let meta = &state.meta_config;
    let (Some(app_id), Some(redirect_uri)) = (meta.app_id.as_deref(), meta.redirect_uri.as_deref())
    else {
        return Err(state.failure(ApplicationError::Configuration(
            "meta.app_id/meta.redirect_uri missing".to_string(),
        )));
    };

    let origin = [header::ORIGIN, header::REFERER]
        .iter()
        .find_map(|name| headers.get(name).and_then(|value| value.to_str().ok()));
    let redirect = resolve_redirect_uri(params.redirect.as_deref(), origin, &meta.redirect_allowlist);
    if params.redirect.is_some() && redirect.is_none() {
        warn!(
            event_name = "oauth.redirect.discarded",
            correlation_id = "oauth",
            "untrusted post-auth redirect ignored"
        );
    }

    let token = state.oauth_states.create_state(params.tenant, redirect);

    let mut dialog = Url::parse(&meta.oauth_base_url).map_err(|error| {
        state.failure(ApplicationError::Configuration(format!("invalid meta.oauth_base_url: {error}")))
    })?;
    dialog
        .query_pairs_mut()
        .append_pair("client_id", app_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", &token)
        .append_pair("scope", &meta.scopes);

    info!(event_name = "oauth.started", correlation_id = "oauth", "redirecting to consent dialog");
    Ok(found(&dialog))
}

pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Response> {
    let oauth_state = match params.state.as_deref() {
        Some(token) => Some(
            state
                .oauth_states
                .validate_state(token)
                .map_err(|error| api_error(StatusCode::BAD_REQUEST, error.to_string()))?,
        ),
        None => None,
    };
    let redirect = oauth_state.as_ref().and_then(|stored| stored.redirect_uri.clone());

    if let Some(error) = params.error {
        warn!(
            event_name = "oauth.denied",
            correlation_id = "oauth",
            error = %error,
            "provider returned an OAuth error"
        );
        if let Some(redirect) = redirect {
            return Ok(found(&build_redirect_url(&redirect, &[("ok", "0"), ("error", &error)])));
        }
        let body = json!({"error": error, "errorDescription": params.error_description});
        return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
    }

    let (Some(code), Some(oauth_state)) = (params.code.as_deref(), oauth_state) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing code/state"));
    };

    let meta = state.intake.meta();
    let store = state.intake.store();
    let user_token = meta
        .exchange_code_for_token(code)
        .await
        .map_err(|error| state.failure(ApplicationError::Integration(error.to_string())))?;
    let pages = meta
        .fetch_user_pages(&user_token)
        .await
        .map_err(|error| state.failure(ApplicationError::Integration(error.to_string())))?;

    let mut stored = Vec::with_capacity(pages.len());
    for page in pages {
        let saved = store
            .upsert_facebook_page(NewFacebookPage {
                page_id: page.id.clone(),
                access_token: page.access_token.clone(),
                name: page.name.clone(),
                tenant_id: oauth_state.tenant_id.clone(),
            })
            .await
            .map_err(|error| state.failure(ApplicationError::Persistence(error.to_string())))?;
        stored.push(saved);

        if let Err(error) = meta.subscribe_page(&page.id, &page.access_token).await {
            warn!(
                event_name = "oauth.page.subscribe_failed",
                correlation_id = "oauth",
                page_id = %page.id,
                error = %error,
                "could not subscribe page to leadgen"
            );
        }
    }

    info!(
        event_name = "oauth.completed",
        correlation_id = "oauth",
        pages = stored.len(),
        tenant_id = oauth_state.tenant_id.as_deref().unwrap_or("none"),
        "pages connected"
    );

    if let Some(redirect) = redirect {
        let count = stored.len().to_string();
        return Ok(found(&build_redirect_url(&redirect, &[("ok", "1"), ("pages", &count)])));
    }
    Ok(Json(CallbackSummary { ok: true, pages: stored.len(), stored }).into_response())
}

pub async fn list_pages(
    State(state): State<AppState>,
    Query(params): Query<PagesParams>,
) -> ApiResult<Json<PageList>> {
    let tenant = params.tenant.as_deref().filter(|tenant| !tenant.trim().is_empty());
    let data = state
        .intake
        .store()
        .list_facebook_pages(tenant)
        .await
        .map_err(|error| state.failure(ApplicationError::Persistence(error.to_string())))?;
    Ok(Json(PageList { data }))
}
