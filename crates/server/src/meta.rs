//! Outbound calls to the Graph API and the Conversions API.
//!
//! Handlers and the intake pipeline depend on the [`MetaApi`] trait so tests
//! can substitute a recording fake for the HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use leadrelay_core::config::MetaConfig;
use leadrelay_core::conversions::OutboundEvent;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Extra fields requested alongside `field_data` when pulling a lead.
pub const LEAD_DETAIL_FIELDS: &str = "field_data,created_time,form_id,ad_id,adgroup_id,campaign_id";
const PAGE_FIELDS: &str = "id,name,access_token";

#[derive(Debug, Error)]
pub enum MetaApiError {
    #[error("missing Meta OAuth credentials ({0})")]
    MissingCredentials(&'static str),
    #[error("meta request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("meta api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected meta api response: {0}")]
    Decode(String),
}

/// A page returned by `/me/accounts`, carrying its page access token.
#[derive(Clone)]
pub struct ConnectedPage {
    pub id: String,
    pub name: Option<String>,
    pub access_token: SecretString,
}

impl std::fmt::Debug for ConnectedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedPage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait MetaApi: Send + Sync {
    async fn exchange_code_for_token(&self, code: &str) -> Result<SecretString, MetaApiError>;

    async fn fetch_user_pages(
        &self,
        user_token: &SecretString,
    ) -> Result<Vec<ConnectedPage>, MetaApiError>;

    /// Subscribes the app to the page's `leadgen` webhook field.
    async fn subscribe_page(
        &self,
        page_id: &str,
        page_token: &SecretString,
    ) -> Result<(), MetaApiError>;

    async fn fetch_lead_details(
        &self,
        leadgen_id: &str,
        page_token: &SecretString,
    ) -> Result<Value, MetaApiError>;

    /// Single POST, no retry. The response body is returned verbatim.
    async fn send_conversion_event(&self, event: &OutboundEvent) -> Result<Value, MetaApiError>;
}

pub struct HttpMetaApi {
    client: Client,
    graph_base_url: String,
    app_id: Option<String>,
    app_secret: Option<SecretString>,
    redirect_uri: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    data: Vec<AccountEntry>,
}

#[derive(Deserialize)]
struct AccountEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl HttpMetaApi {
    pub fn new(client: Client, config: &MetaConfig) -> Self {
        Self {
            client,
            graph_base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        }
    }

    pub fn build_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
        Client::builder().timeout(Duration::from_secs(timeout_secs.max(1))).build()
    }

    fn graph_url(&self, path: &str) -> String {
        format!("{}/{}", self.graph_base_url, path.trim_start_matches('/'))
    }
}

async fn json_body(response: Response) -> Result<Value, MetaApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MetaApiError::Status { status: status.as_u16(), body });
    }
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|error| MetaApiError::Decode(error.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, MetaApiError> {
    serde_json::from_value(value).map_err(|error| MetaApiError::Decode(error.to_string()))
}

#[async_trait]
impl MetaApi for HttpMetaApi {
    async fn exchange_code_for_token(&self, code: &str) -> Result<SecretString, MetaApiError> {
        let (Some(app_id), Some(app_secret), Some(redirect_uri)) =
            (self.app_id.as_deref(), self.app_secret.as_ref(), self.redirect_uri.as_deref())
        else {
            return Err(MetaApiError::MissingCredentials(
                "meta.app_id, meta.app_secret and meta.redirect_uri are required",
            ));
        };

        let response = self
            .client
            .get(self.graph_url("oauth/access_token"))
            .query(&[
                ("client_id", app_id),
                ("redirect_uri", redirect_uri),
                ("client_secret", app_secret.expose_secret()),
                ("code", code),
            ])
            .send()
            .await?;

        let token: TokenResponse = decode(json_body(response).await?)?;
        token
            .access_token
            .filter(|token| !token.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| MetaApiError::Decode("token response has no access_token".to_string()))
    }

    async fn fetch_user_pages(
        &self,
        user_token: &SecretString,
    ) -> Result<Vec<ConnectedPage>, MetaApiError> {
        let response = self
            .client
            .get(self.graph_url("me/accounts"))
            .query(&[("access_token", user_token.expose_secret()), ("fields", PAGE_FIELDS)])
            .send()
            .await?;

        let accounts: AccountsResponse = decode(json_body(response).await?)?;
        Ok(accounts
            .data
            .into_iter()
            .filter_map(|entry| {
                let token = entry.access_token.filter(|token| !token.is_empty())?;
                Some(ConnectedPage {
                    id: entry.id,
                    name: entry.name,
                    access_token: SecretString::from(token),
                })
            })
            .collect())
    }

    async fn subscribe_page(
        &self,
        page_id: &str,
        page_token: &SecretString,
    ) -> Result<(), MetaApiError> {
        let response = self
            .client
            .post(self.graph_url(&format!("{page_id}/subscribed_apps")))
            .query(&[("access_token", page_token.expose_secret()), ("subscribed_fields", "leadgen")])
            .send()
            .await?;

        json_body(response).await.map(|_| ())
    }

    async fn fetch_lead_details(
        &self,
        leadgen_id: &str,
        page_token: &SecretString,
    ) -> Result<Value, MetaApiError> {
        let response = self
            .client
            .get(self.graph_url(leadgen_id))
            .query(&[("access_token", page_token.expose_secret()), ("fields", LEAD_DETAIL_FIELDS)])
            .send()
            .await?;

        json_body(response).await
    }

    async fn send_conversion_event(&self, event: &OutboundEvent) -> Result<Value, MetaApiError> {
        let response = self.client.post(event.url.clone()).json(&event.body).send().await?;
        json_body(response).await
    }
}
