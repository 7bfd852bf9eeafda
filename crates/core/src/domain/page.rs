use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

/// A Facebook page connected through the OAuth flow.
///
/// The page access token is only handed to the Graph API client; it is
/// never serialized into API responses.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookPage {
    pub id: String,
    pub page_id: String,
    #[serde(skip_serializing)]
    pub access_token: SecretString,
    pub name: Option<String>,
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewFacebookPage {
    pub page_id: String,
    pub access_token: SecretString,
    pub name: Option<String>,
    pub tenant_id: Option<String>,
}
