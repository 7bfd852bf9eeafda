//! Correlation state for the page-connect OAuth flow.
//!
//! States live in process memory only. A restart invalidates flows that are
//! in flight, which is acceptable because the round trip through the
//! platform's consent screen takes seconds to minutes.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use url::Url;

pub const DEFAULT_STATE_TTL_SECS: u64 = 900;
/// Upper bound accepted for the state TTL, one day.
pub const MAX_STATE_TTL_SECS: u64 = 86_400;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthState {
    pub created_at: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub redirect_uri: Option<Url>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OAuthStateError {
    #[error("Invalid OAuth state")]
    Invalid,
}

#[derive(Debug)]
pub struct OAuthStateStore {
    states: Mutex<HashMap<String, OAuthState>>,
    ttl: Duration,
}

impl Default for OAuthStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL_SECS)
    }
}

impl OAuthStateStore {
    pub fn new(ttl_secs: u64) -> Self {
        let bounded = ttl_secs.clamp(1, MAX_STATE_TTL_SECS);
        let ttl = Duration::seconds(i64::try_from(bounded).unwrap_or(DEFAULT_STATE_TTL_SECS as i64));
        Self { states: Mutex::new(HashMap::new()), ttl }
    }

    pub fn create_state(&self, tenant_id: Option<String>, redirect_uri: Option<Url>) -> String {
        let token = hex::encode(rand::random::<[u8; 16]>());
        let now = Utc::now();
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.retain(|_, state| !self.is_expired(state, now));
        states.insert(
            token.clone(),
            OAuthState {
                created_at: now,
                tenant_id: tenant_id.filter(|value| !value.trim().is_empty()),
                redirect_uri,
            },
        );
        token
    }

    /// Consumes the state: a token validates at most once.
    pub fn validate_state(&self, token: &str) -> Result<OAuthState, OAuthStateError> {
        let stored = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .ok_or(OAuthStateError::Invalid)?;

        if self.is_expired(&stored, Utc::now()) {
            return Err(OAuthStateError::Invalid);
        }
        Ok(stored)
    }

    pub fn len(&self) -> usize {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, state: &OAuthState, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(state.created_at) > self.ttl
    }
}

/// Decides whether a caller-supplied post-auth redirect can be trusted.
///
/// Only `http`/`https` targets qualify, and only when their origin matches the
/// request's own `Origin`/`Referer` or is listed in `allowlist`. Anything
/// else is dropped so the callback answers with JSON instead.
pub fn resolve_redirect_uri(
    requested: Option<&str>,
    origin_header: Option<&str>,
    allowlist: &[String],
) -> Option<Url> {
    let requested = Url::parse(requested?.trim()).ok()?;
    if !matches!(requested.scheme(), "http" | "https") {
        return None;
    }
    let requested_origin = requested.origin().ascii_serialization();

    if let Some(header) = origin_header.map(str::trim).filter(|value| !value.is_empty()) {
        let origin = Url::parse(header).ok()?.origin().ascii_serialization();
        if origin == requested_origin {
            return Some(requested);
        }
    }

    allowlist
        .iter()
        .map(|entry| entry.trim().trim_end_matches('/'))
        .any(|entry| entry == requested_origin)
        .then_some(requested)
}

/// Sets each parameter on `base`, replacing any existing value for the key.
pub fn build_redirect_url(base: &Url, params: &[(&str, &str)]) -> Url {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| !params.iter().any(|(name, _)| name == key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = base.clone();
    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in &kept {
            query.append_pair(key, value);
        }
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    url
}
