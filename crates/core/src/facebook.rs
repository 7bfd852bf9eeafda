//! Translation of Facebook Lead Ads payloads into lead fields.
//!
//! Webhook envelopes and Graph API lead details arrive in several shapes, so
//! everything here works on loosely typed `serde_json::Value` input and never
//! fails: missing pieces become `None` or the placeholder name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name stored when a submission carries no usable name field.
pub const PLACEHOLDER_NAME: &str = "Sin nombre";

const NAME_FIELDS: &[&str] = &["full_name", "nombre"];
const EMAIL_FIELDS: &[&str] = &["email"];
const PHONE_FIELDS: &[&str] = &["phone_number", "phone"];

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LeadField {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LeadField {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self { name: name.into(), values: values.iter().map(|value| value.to_string()).collect() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLead {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadgenInfo {
    pub leadgen_id: String,
    pub page_id: Option<String>,
    pub form_id: Option<String>,
    pub created_time: Option<String>,
}

pub fn parse_lead_fields(fields: &[LeadField]) -> ParsedLead {
    let lookup = |names: &[&str]| names.iter().find_map(|name| first_value(fields, name));

    ParsedLead {
        full_name: lookup(NAME_FIELDS).unwrap_or_else(|| PLACEHOLDER_NAME.to_string()),
        email: lookup(EMAIL_FIELDS),
        phone: lookup(PHONE_FIELDS),
    }
}

/// Parses the legacy shape that carries `field_data` inline.
pub fn parse_lead_payload(payload: &Value) -> ParsedLead {
    parse_lead_fields(&lead_fields_from_value(payload.get("field_data")))
}

/// Lenient conversion of a `field_data` array; malformed entries are skipped
/// and non-string scalar values are rendered as text.
pub fn lead_fields_from_value(value: Option<&Value>) -> Vec<LeadField> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let values = item
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(scalar_text).collect())
                .unwrap_or_default();
            Some(LeadField { name, values })
        })
        .collect()
}

/// Returns the first `leadgen` change carrying a lead id, scanning entries and
/// their changes in delivery order.
pub fn extract_leadgen_info(payload: &Value) -> Option<LeadgenInfo> {
    let entries = payload.get("entry")?.as_array()?;

    for entry in entries {
        let entry_page_id = entry.get("id").and_then(scalar_text);
        let Some(changes) = entry.get("changes").and_then(Value::as_array) else {
            continue;
        };

        for change in changes {
            if change.get("field").and_then(Value::as_str) != Some("leadgen") {
                continue;
            }
            let value = change.get("value").unwrap_or(&Value::Null);
            let leadgen_id = value
                .get("leadgen_id")
                .and_then(scalar_text)
                .or_else(|| value.get("lead_id").and_then(scalar_text));
            let Some(leadgen_id) = leadgen_id else {
                continue;
            };

            return Some(LeadgenInfo {
                leadgen_id,
                page_id: value.get("page_id").and_then(scalar_text).or(entry_page_id),
                form_id: value.get("form_id").and_then(scalar_text),
                created_time: value.get("created_time").and_then(scalar_text),
            });
        }
    }

    None
}

fn first_value(fields: &[LeadField], name: &str) -> Option<String> {
    fields
        .iter()
        .find(|field| field.name == name)
        .and_then(|field| field.values.first())
        .filter(|value| !value.is_empty())
        .cloned()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
