//! Lead intake and conversion dispatch.
//!
//! `LeadIntake` owns the workflow behind the webhook, lead and event
//! endpoints. It talks to storage and to Meta only through the `LeadStore`
//! and `MetaApi` traits, so handlers stay thin.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use leadrelay_core::conversions::{
    build_outbound_event, hash_identifier, hash_phone, hash_user_identifiers,
    ConversionEventRequest, ConversionsDestination, ConversionsError,
};
use leadrelay_core::domain::event::{conversion_event_name, LEAD_INGESTED};
use leadrelay_core::domain::lead::{Lead, LeadId, LeadSource, LeadStage, NewLead};
use leadrelay_core::errors::{ApplicationError, DomainError};
use leadrelay_core::facebook::{
    extract_leadgen_info, lead_fields_from_value, parse_lead_fields, parse_lead_payload,
};
use leadrelay_db::{LeadStore, RepositoryError};

use crate::meta::{MetaApi, MetaApiError};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("No page token for leadgen")]
    MissingPageToken,
    #[error("Lead not found")]
    LeadNotFound,
    #[error(transparent)]
    Store(#[from] RepositoryError),
    #[error(transparent)]
    Meta(#[from] MetaApiError),
    #[error(transparent)]
    Conversions(#[from] ConversionsError),
}

impl From<IntakeError> for ApplicationError {
    fn from(error: IntakeError) -> Self {
        match error {
            IntakeError::Domain(error) => Self::Domain(error),
            IntakeError::InvalidRequest(message) => Self::InvalidRequest(message),
            IntakeError::MissingPageToken => {
                Self::InvalidRequest("No page token for leadgen".to_string())
            }
            IntakeError::LeadNotFound => Self::NotFound("Lead not found".to_string()),
            IntakeError::Store(error) => Self::Persistence(error.to_string()),
            IntakeError::Meta(error) => Self::Integration(error.to_string()),
            IntakeError::Conversions(error) => Self::Configuration(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestOutcome {
    pub lead: Lead,
    pub deduped: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ManualLead {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageChange {
    pub lead: Lead,
    /// Conversions API response, `None` when the stage maps to no event.
    pub meta: Option<Value>,
}

#[derive(Clone, Debug, Default)]
pub struct ManualEvent {
    pub event_name: Option<String>,
    pub event_id: Option<String>,
    pub user_data: Option<Map<String, Value>>,
    pub custom_data: Option<Map<String, Value>>,
    pub lead_id: Option<String>,
}

#[derive(Clone)]
pub struct LeadIntake {
    store: Arc<dyn LeadStore>,
    meta: Arc<dyn MetaApi>,
    destination: ConversionsDestination,
}

impl LeadIntake {
    pub fn new(
        store: Arc<dyn LeadStore>,
        meta: Arc<dyn MetaApi>,
        destination: ConversionsDestination,
    ) -> Self {
        Self { store, meta, destination }
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.store
    }

    pub fn meta(&self) -> &Arc<dyn MetaApi> {
        &self.meta
    }

    /// Handles an already verified webhook notification.
    ///
    /// Envelopes carrying a `leadgen` change are resolved through the Graph
    /// API and deduplicated on the leadgen id. Anything else is treated as a
    /// lead with inline `field_data`.
    pub async fn ingest_webhook(&self, payload: Value) -> Result<IngestOutcome, IntakeError> {
        let Some(info) = extract_leadgen_info(&payload) else {
            return self.ingest_inline(payload).await;
        };

        if let Some(existing) = self.store.find_lead_by_external_id(&info.leadgen_id).await? {
            info!(
                event_name = "lead.deduped",
                correlation_id = %info.leadgen_id,
                lead_id = %existing.id,
                "leadgen notification already ingested"
            );
            return Ok(IngestOutcome { lead: existing, deduped: true });
        }

        let page_token = match info.page_id.as_deref() {
            Some(page_id) => self.store.get_facebook_page_token(page_id).await?,
            None => None,
        };
        let Some(page_token) = page_token else {
            warn!(
                event_name = "lead.page_token_missing",
                correlation_id = %info.leadgen_id,
                page_id = info.page_id.as_deref().unwrap_or("unknown"),
                "no stored page token for leadgen notification"
            );
            return Err(IntakeError::MissingPageToken);
        };

        let details = self.meta.fetch_lead_details(&info.leadgen_id, &page_token).await?;
        let parsed = parse_lead_fields(&lead_fields_from_value(details.get("field_data")));

        let outcome = self
            .store
            .create_lead_if_absent(NewLead {
                external_id: Some(info.leadgen_id.clone()),
                full_name: parsed.full_name,
                email: parsed.email,
                phone: parsed.phone,
                source: LeadSource::Facebook,
            })
            .await?;

        if outcome.is_existing() {
            info!(
                event_name = "lead.deduped",
                correlation_id = %info.leadgen_id,
                lead_id = %outcome.lead().id,
                "concurrent delivery stored the lead first"
            );
            return Ok(IngestOutcome { lead: outcome.into_lead(), deduped: true });
        }
        let lead = outcome.into_lead();

        self.store
            .add_lead_event(&lead.id, LEAD_INGESTED, json!({"webhook": payload, "lead": details}))
            .await?;
        info!(
            event_name = "lead.ingested",
            correlation_id = %info.leadgen_id,
            lead_id = %lead.id,
            flow = "leadgen",
            "lead ingested from leadgen notification"
        );

        Ok(IngestOutcome { lead, deduped: false })
    }

    async fn ingest_inline(&self, payload: Value) -> Result<IngestOutcome, IntakeError> {
        let parsed = parse_lead_payload(&payload);
        let lead = self
            .store
            .create_lead(NewLead {
                external_id: None,
                full_name: parsed.full_name,
                email: parsed.email,
                phone: parsed.phone,
                source: LeadSource::Facebook,
            })
            .await?;

        self.store.add_lead_event(&lead.id, LEAD_INGESTED, payload).await?;
        info!(
            event_name = "lead.ingested",
            correlation_id = %lead.id,
            lead_id = %lead.id,
            flow = "inline",
            "lead ingested from inline field data"
        );

        Ok(IngestOutcome { lead, deduped: false })
    }

    pub async fn create_manual_lead(&self, input: ManualLead) -> Result<Lead, IntakeError> {
        let full_name = input
            .full_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or(DomainError::MissingField("fullName"))?;

        let lead = self
            .store
            .create_lead(NewLead {
                external_id: None,
                full_name,
                email: non_blank(input.email),
                phone: non_blank(input.phone),
                source: LeadSource::Manual,
            })
            .await?;

        info!(
            event_name = "lead.created",
            correlation_id = %lead.id,
            lead_id = %lead.id,
            "manual lead created"
        );
        Ok(lead)
    }

    /// Moves a lead to a new stage and reports the matching conversion.
    ///
    /// The stage change is committed before dispatch; a failed dispatch is
    /// returned as an error but the new stage stays.
    pub async fn change_stage(
        &self,
        id: &LeadId,
        raw_stage: Option<&str>,
    ) -> Result<StageChange, IntakeError> {
        let raw_stage = raw_stage
            .map(str::trim)
            .filter(|stage| !stage.is_empty())
            .ok_or(DomainError::MissingField("stage"))?;
        let stage: LeadStage = raw_stage.parse()?;

        let lead =
            self.store.update_lead_stage(id, stage).await?.ok_or(IntakeError::LeadNotFound)?;

        let Some(event_name) = stage.conversion_event() else {
            info!(
                event_name = "lead.stage_changed",
                correlation_id = %lead.id,
                stage = stage.as_str(),
                "stage has no conversion event"
            );
            return Ok(StageChange { lead, meta: None });
        };

        let mut user_data = Map::new();
        if let Some(email) = lead.email.as_deref().and_then(hash_identifier) {
            user_data.insert("em".to_string(), Value::String(email));
        }
        if let Some(phone) = lead.phone.as_deref().and_then(hash_phone) {
            user_data.insert("ph".to_string(), Value::String(phone));
        }
        if let Some(external_id) = &lead.external_id {
            user_data.insert("lead_id".to_string(), Value::String(external_id.clone()));
        }

        let mut custom_data = Map::new();
        custom_data.insert("lead_id".to_string(), Value::String(lead.id.to_string()));
        custom_data.insert("stage".to_string(), Value::String(stage.as_str().to_string()));

        let request = ConversionEventRequest {
            event_name: event_name.to_string(),
            event_time: Utc::now().timestamp(),
            event_id: Uuid::new_v4().to_string(),
            user_data,
            custom_data,
        };
        let response = self.dispatch(request).await?;

        self.store
            .add_lead_event(&lead.id, &conversion_event_name(event_name), response.clone())
            .await?;
        info!(
            event_name = "lead.stage_changed",
            correlation_id = %lead.id,
            stage = stage.as_str(),
            conversion = event_name,
            "stage change reported"
        );

        Ok(StageChange { lead, meta: Some(response) })
    }

    /// Sends a caller-described event. `em`/`ph` in the user data are hashed
    /// unless they already are.
    pub async fn send_manual_event(&self, input: ManualEvent) -> Result<Value, IntakeError> {
        let (Some(event_name), Some(event_id)) = (non_blank(input.event_name), non_blank(input.event_id))
        else {
            return Err(IntakeError::InvalidRequest("eventName and eventId are required".to_string()));
        };

        let mut user_data = input.user_data.unwrap_or_default();
        if let Some(lead_id) = non_blank(input.lead_id) {
            user_data.entry("lead_id").or_insert(Value::String(lead_id));
        }

        let request = ConversionEventRequest {
            event_name,
            event_time: Utc::now().timestamp(),
            event_id,
            user_data: hash_user_identifiers(user_data),
            custom_data: input.custom_data.unwrap_or_default(),
        };
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: ConversionEventRequest) -> Result<Value, IntakeError> {
        let event_name = request.event_name.clone();
        let event_id = request.event_id.clone();
        let event = build_outbound_event(&self.destination, request)?;

        let response = self.meta.send_conversion_event(&event).await?;
        info!(
            event_name = "conversion.dispatched",
            correlation_id = %event_id,
            conversion = %event_name,
            "conversion event sent"
        );
        Ok(response)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
