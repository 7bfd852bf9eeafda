use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use leadrelay_core::domain::event::LeadEvent;
use leadrelay_core::domain::lead::{Lead, LeadId, LeadStage, NewLead};
use leadrelay_core::domain::page::{FacebookPage, NewFacebookPage};

use super::{CreateOutcome, LeadStore, RepositoryError, StorageHealth, StorageMode};

/// Process-local store used when no database is configured.
///
/// All collections sit behind one lock so insert-if-absent is a single
/// critical section.
#[derive(Default)]
pub struct InMemoryLeadStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    leads: Vec<Lead>,
    events: Vec<LeadEvent>,
    pages: Vec<FacebookPage>,
}

#[async_trait::async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn create_lead(&self, lead: NewLead) -> Result<Lead, RepositoryError> {
        let lead = lead.into_lead(Utc::now());
        self.state.write().await.leads.push(lead.clone());
        Ok(lead)
    }

    async fn create_lead_if_absent(&self, lead: NewLead) -> Result<CreateOutcome, RepositoryError> {
        let lead = lead.into_lead(Utc::now());
        let mut state = self.state.write().await;

        if let Some(external_id) = lead.external_id.as_deref() {
            let existing =
                state.leads.iter().find(|stored| stored.external_id.as_deref() == Some(external_id));
            if let Some(existing) = existing {
                return Ok(CreateOutcome::Existing(existing.clone()));
            }
        }

        state.leads.push(lead.clone());
        Ok(CreateOutcome::Created(lead))
    }

    async fn list_leads(&self) -> Result<Vec<Lead>, RepositoryError> {
        Ok(self.state.read().await.leads.iter().rev().cloned().collect())
    }

    async fn find_lead_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.leads.iter().find(|lead| lead.external_id.as_deref() == Some(external_id)).cloned())
    }

    async fn update_lead_stage(
        &self,
        id: &LeadId,
        stage: LeadStage,
    ) -> Result<Option<Lead>, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(lead) = state.leads.iter_mut().find(|lead| &lead.id == id) else {
            return Ok(None);
        };

        lead.stage = stage;
        lead.updated_at = Utc::now();
        Ok(Some(lead.clone()))
    }

    async fn add_lead_event(
        &self,
        lead_id: &LeadId,
        event_name: &str,
        payload: Value,
    ) -> Result<LeadEvent, RepositoryError> {
        let event = LeadEvent::new(lead_id.clone(), event_name, payload);
        self.state.write().await.events.push(event.clone());
        Ok(event)
    }

    async fn list_lead_events(&self, lead_id: &LeadId) -> Result<Vec<LeadEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.events.iter().filter(|event| &event.lead_id == lead_id).cloned().collect())
    }

    async fn upsert_facebook_page(
        &self,
        page: NewFacebookPage,
    ) -> Result<FacebookPage, RepositoryError> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        if let Some(stored) = state.pages.iter_mut().find(|stored| stored.page_id == page.page_id) {
            stored.access_token = page.access_token;
            stored.name = page.name;
            stored.tenant_id = page.tenant_id;
            stored.updated_at = now;
            return Ok(stored.clone());
        }

        let stored = FacebookPage {
            id: Uuid::new_v4().to_string(),
            page_id: page.page_id,
            access_token: page.access_token,
            name: page.name,
            tenant_id: page.tenant_id,
            created_at: now,
            updated_at: now,
        };
        state.pages.push(stored.clone());
        Ok(stored)
    }

    async fn get_facebook_page_token(
        &self,
        page_id: &str,
    ) -> Result<Option<SecretString>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .pages
            .iter()
            .find(|page| page.page_id == page_id)
            .map(|page| page.access_token.clone())
            .filter(|token| !token.expose_secret().is_empty()))
    }

    async fn list_facebook_pages(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<FacebookPage>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .pages
            .iter()
            .rev()
            .filter(|page| tenant_id.is_none() || page.tenant_id.as_deref() == tenant_id)
            .cloned()
            .collect())
    }

    async fn storage_health(&self) -> StorageHealth {
        StorageHealth::from_checks(StorageMode::Memory, Default::default())
    }
}
