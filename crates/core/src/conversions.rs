//! Conversions API payload construction and identifier hashing.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::config::ConversionsConfig;

pub const ACTION_SOURCE: &str = "system_generated";

/// User data keys the Conversions API expects as arrays of hashes.
const ARRAY_IDENTIFIER_KEYS: &[&str] = &["em", "ph"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionsError {
    #[error("conversions destination is not configured (set dataset_id or pixel_id)")]
    MissingDestination,
    #[error("conversions access token is not configured")]
    MissingAccessToken,
    #[error("invalid conversions endpoint `{0}`")]
    InvalidEndpoint(String),
}

/// Where and how outbound events are delivered.
#[derive(Clone, Debug, Default)]
pub struct ConversionsDestination {
    pub base_url: String,
    pub dataset_id: Option<String>,
    pub pixel_id: Option<String>,
    pub access_token: Option<SecretString>,
    pub test_event_code: Option<String>,
    pub attribution: SourceAttribution,
}

impl ConversionsDestination {
    pub fn from_config(config: &ConversionsConfig, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            dataset_id: config.dataset_id.clone(),
            pixel_id: config.pixel_id.clone(),
            access_token: config.access_token.clone(),
            test_event_code: config.test_event_code.clone(),
            attribution: SourceAttribution {
                event_source: config.event_source.clone(),
                lead_event_source: config.crm_name.clone(),
            },
        }
    }

    /// Dataset id wins over the legacy pixel id; blank values are ignored.
    pub fn destination_id(&self) -> Result<&str, ConversionsError> {
        [self.dataset_id.as_deref(), self.pixel_id.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|value| !value.is_empty())
            .ok_or(ConversionsError::MissingDestination)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceAttribution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_event_source: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversionEventRequest {
    pub event_name: String,
    pub event_time: i64,
    pub event_id: String,
    pub user_data: Map<String, Value>,
    pub custom_data: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServerEvent {
    pub event_name: String,
    pub event_time: i64,
    pub event_id: String,
    pub action_source: &'static str,
    pub user_data: Map<String, Value>,
    pub custom_data: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundEventBody {
    pub data: Vec<ServerEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_event_code: Option<String>,
}

/// A ready-to-send request. The URL embeds the access token, so `Debug`
/// prints it without the query string.
#[derive(Clone, PartialEq)]
pub struct OutboundEvent {
    pub url: Url,
    pub body: OutboundEventBody,
}

impl std::fmt::Debug for OutboundEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut redacted = self.url.clone();
        redacted.set_query(None);
        f.debug_struct("OutboundEvent")
            .field("url", &redacted.as_str())
            .field("body", &self.body)
            .finish()
    }
}

pub fn build_outbound_event(
    destination: &ConversionsDestination,
    request: ConversionEventRequest,
) -> Result<OutboundEvent, ConversionsError> {
    let destination_id = destination.destination_id()?;
    let access_token = destination
        .access_token
        .as_ref()
        .map(|token| token.expose_secret().trim())
        .filter(|token| !token.is_empty())
        .ok_or(ConversionsError::MissingAccessToken)?;

    let endpoint =
        format!("{}/{}/events", destination.base_url.trim_end_matches('/'), destination_id);
    let mut url =
        Url::parse(&endpoint).map_err(|_| ConversionsError::InvalidEndpoint(endpoint.clone()))?;
    url.query_pairs_mut().append_pair("access_token", access_token);

    let mut custom_data = request.custom_data;
    merge_attribution(&mut custom_data, &destination.attribution);

    let event = ServerEvent {
        event_name: request.event_name,
        event_time: request.event_time,
        event_id: request.event_id,
        action_source: ACTION_SOURCE,
        user_data: normalize_user_data(request.user_data),
        custom_data,
    };

    Ok(OutboundEvent {
        url,
        body: OutboundEventBody {
            data: vec![event],
            test_event_code: destination
                .test_event_code
                .clone()
                .filter(|code| !code.trim().is_empty()),
        },
    })
}

/// Wraps scalar `em`/`ph` values in arrays and drops null ones. Other keys
/// pass through untouched.
pub fn normalize_user_data(user_data: Map<String, Value>) -> Map<String, Value> {
    user_data
        .into_iter()
        .filter_map(|(key, value)| {
            if !ARRAY_IDENTIFIER_KEYS.contains(&key.as_str()) {
                return Some((key, value));
            }
            match value {
                Value::Null => None,
                Value::Array(_) => Some((key, value)),
                scalar => Some((key, Value::Array(vec![scalar]))),
            }
        })
        .collect()
}

/// Hashes raw `em` and `ph` values in caller-supplied user data. Values that
/// are already hashed pass through; values that hash to nothing are removed.
pub fn hash_user_identifiers(mut user_data: Map<String, Value>) -> Map<String, Value> {
    for (key, hasher) in [("em", hash_identifier as fn(&str) -> Option<String>), ("ph", hash_phone)]
    {
        let Some(value) = user_data.remove(key) else {
            continue;
        };
        let hashed = match value {
            Value::String(raw) => hasher(&raw).map(Value::String),
            Value::Array(items) => {
                let hashed: Vec<Value> = items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(hasher)
                    .map(Value::String)
                    .collect();
                (!hashed.is_empty()).then_some(Value::Array(hashed))
            }
            _ => None,
        };
        if let Some(hashed) = hashed {
            user_data.insert(key.to_string(), hashed);
        }
    }
    user_data
}

fn merge_attribution(custom_data: &mut Map<String, Value>, attribution: &SourceAttribution) {
    if let Some(event_source) = &attribution.event_source {
        custom_data.insert("event_source".to_string(), Value::String(event_source.clone()));
    }
    if let Some(lead_event_source) = &attribution.lead_event_source {
        custom_data
            .insert("lead_event_source".to_string(), Value::String(lead_event_source.clone()));
    }
}

/// Trim, lowercase, then SHA-256 unless the value is already a hex digest.
pub fn hash_identifier(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    if is_sha256_hex(&normalized) {
        return Some(normalized);
    }
    Some(sha256_hex(normalized.as_bytes()))
}

/// Phone numbers keep digits only before hashing.
pub fn hash_phone(raw: &str) -> Option<String> {
    if is_sha256_hex(raw.trim()) {
        return hash_identifier(raw);
    }
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    hash_identifier(&digits)
}

pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|byte| byte.is_ascii_hexdigit())
}

fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::{json, Map, Value};

    use super::{
        build_outbound_event, hash_identifier, hash_phone, hash_user_identifiers,
        normalize_user_data, ConversionEventRequest, ConversionsDestination, ConversionsError,
        SourceAttribution,
    };

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn destination() -> ConversionsDestination {
        ConversionsDestination {
            base_url: "https://graph.facebook.com/v19.0/".to_string(),
            dataset_id: Some("DATASET".to_string()),
            pixel_id: Some("PIXEL".to_string()),
            access_token: Some(SecretString::from("tok en&x".to_string())),
            test_event_code: None,
            attribution: SourceAttribution::default(),
        }
    }

    fn request() -> ConversionEventRequest {
        ConversionEventRequest {
            event_name: "Purchase".to_string(),
            event_time: 1_700_000_000,
            event_id: "evt-1".to_string(),
            user_data: object(json!({"em": "abc", "ph": ["def"], "lead_id": "L1"})),
            custom_data: object(json!({"stage": "closed_sale"})),
        }
    }

    #[test]
    fn builds_single_event_batch_for_dataset() {
        let event = build_outbound_event(&destination(), request()).expect("build event");

        assert_eq!(event.url.path(), "/v19.0/DATASET/events");
        assert_eq!(event.url.query(), Some("access_token=tok+en%26x"));

        let body = serde_json::to_value(&event.body).expect("serialize body");
        assert_eq!(
            body,
            json!({
                "data": [{
                    "event_name": "Purchase",
                    "event_time": 1_700_000_000,
                    "event_id": "evt-1",
                    "action_source": "system_generated",
                    "user_data": {"em": ["abc"], "ph": ["def"], "lead_id": "L1"},
                    "custom_data": {"stage": "closed_sale"}
                }]
            })
        );
        assert!(!format!("{event:?}").contains("tok"), "debug output must not leak token");
    }

    #[test]
    fn pixel_id_is_used_when_dataset_is_blank() {
        let mut destination = destination();
        destination.dataset_id = Some("  ".to_string());

        let event = build_outbound_event(&destination, request()).expect("build event");
        assert_eq!(event.url.path(), "/v19.0/PIXEL/events");
    }

    #[test]
    fn missing_destination_or_token_is_a_configuration_error() {
        let mut no_destination = destination();
        no_destination.dataset_id = None;
        no_destination.pixel_id = None;
        assert_eq!(
            build_outbound_event(&no_destination, request()).expect_err("no destination"),
            ConversionsError::MissingDestination
        );

        let mut no_token = destination();
        no_token.access_token = None;
        assert_eq!(
            build_outbound_event(&no_token, request()).expect_err("no token"),
            ConversionsError::MissingAccessToken
        );
    }

    #[test]
    fn attribution_and_test_code_are_only_serialized_when_set() {
        let mut destination = destination();
        destination.test_event_code = Some("TEST123".to_string());
        destination.attribution = SourceAttribution {
            event_source: Some("crm".to_string()),
            lead_event_source: Some("Lead Relay CRM".to_string()),
        };

        let body = serde_json::to_value(
            &build_outbound_event(&destination, request()).expect("build event").body,
        )
        .expect("serialize body");
        assert_eq!(body["test_event_code"], "TEST123");
        assert_eq!(body["data"][0]["custom_data"]["event_source"], "crm");
        assert_eq!(body["data"][0]["custom_data"]["lead_event_source"], "Lead Relay CRM");

        let plain = serde_json::to_value(
            &build_outbound_event(&self::destination(), request()).expect("build event").body,
        )
        .expect("serialize body");
        assert!(plain.get("test_event_code").is_none());
        assert!(plain["data"][0]["custom_data"].get("event_source").is_none());
    }

    #[test]
    fn null_identifiers_are_dropped_and_other_fields_untouched() {
        let normalized = normalize_user_data(object(json!({
            "em": null,
            "ph": "123",
            "fbc": "fb.1.abc",
            "external_id": ["x"]
        })));

        assert!(normalized.get("em").is_none());
        assert_eq!(normalized["ph"], json!(["123"]));
        assert_eq!(normalized["fbc"], json!("fb.1.abc"));
        assert_eq!(normalized["external_id"], json!(["x"]));
    }

    #[test]
    fn hashing_is_case_and_whitespace_insensitive() {
        let first = hash_identifier("  Ana@Example.COM ").expect("hash");
        let second = hash_identifier("ana@example.com").expect("hash");

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(
            hash_identifier("test@example.com").as_deref(),
            Some("973dfe463ec85785f5f95af5ba3906eedb2d931c24e69824a89ea65dba4e813b")
        );
    }

    #[test]
    fn hashing_an_existing_digest_is_idempotent() {
        let digest = hash_identifier("ana@example.com").expect("hash");

        assert_eq!(hash_identifier(&digest), Some(digest.clone()));
        assert_eq!(hash_identifier(&digest.to_uppercase()), Some(digest.clone()));
        assert_eq!(hash_phone(&digest), Some(digest));
    }

    #[test]
    fn phones_are_reduced_to_digits_before_hashing() {
        assert_eq!(hash_phone("+34 (600) 111-222"), hash_identifier("34600111222"));
        assert_eq!(hash_phone("n/a"), None);
        assert_eq!(hash_identifier("   "), None);
    }

    #[test]
    fn user_identifiers_are_hashed_in_place() {
        let hashed = hash_user_identifiers(object(json!({
            "em": ["A@B.com", 7],
            "ph": "+1 555 0100",
            "lead_id": "L9"
        })));

        assert_eq!(hashed["em"], json!([hash_identifier("a@b.com")]));
        assert_eq!(hashed["ph"], json!(hash_identifier("15550100")));
        assert_eq!(hashed["lead_id"], "L9");

        let emptied = hash_user_identifiers(object(json!({"em": "  ", "ph": 5})));
        assert!(emptied.is_empty());
    }
}
