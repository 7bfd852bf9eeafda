use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::lead::LeadId;

pub const LEAD_INGESTED: &str = "lead_ingested";

/// Audit record name for a Conversions API dispatch, e.g. `meta_Purchase`.
pub fn conversion_event_name(event_name: &str) -> String {
    format!("meta_{event_name}")
}

/// Append-only audit entry. Never mutated once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadEvent {
    pub id: String,
    pub lead_id: LeadId,
    pub event_name: String,
    pub event_time: DateTime<Utc>,
    pub payload: Value,
}

impl LeadEvent {
    pub fn new(lead_id: LeadId, event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            lead_id,
            event_name: event_name.into(),
            event_time: Utc::now(),
            payload,
        }
    }
}
