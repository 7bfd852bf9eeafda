use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use leadrelay_core::config::{StorageBackend, TableNames};
use leadrelay_core::domain::event::LeadEvent;
use leadrelay_core::domain::lead::{Lead, LeadId, LeadStage, NewLead};
use leadrelay_core::domain::page::{FacebookPage, NewFacebookPage};

pub mod lead;
pub mod memory;

pub use lead::SqlLeadStore;
pub use memory::InMemoryLeadStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result of an insert keyed on the external lead id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Lead),
    Existing(Lead),
}

impl CreateOutcome {
    pub fn lead(&self) -> &Lead {
        match self {
            Self::Created(lead) | Self::Existing(lead) => lead,
        }
    }

    pub fn into_lead(self) -> Lead {
        match self {
            Self::Created(lead) | Self::Existing(lead) => lead,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Memory,
    Sql,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableCheck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableCheck {
    pub fn passed() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { ok: false, error: Some(error.into()) }
    }
}

/// Readiness report served by `/health/db` and `leadrelay doctor`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageHealth {
    pub mode: StorageMode,
    pub ok: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, TableCheck>,
}

impl StorageHealth {
    pub fn from_checks(mode: StorageMode, checks: BTreeMap<String, TableCheck>) -> Self {
        let ok = checks.values().all(|check| check.ok);
        Self { mode, ok, checks }
    }
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn create_lead(&self, lead: NewLead) -> Result<Lead, RepositoryError>;

    /// Inserts unless a lead with the same external id already exists.
    ///
    /// Check and insert happen atomically, so concurrent deliveries of one
    /// webhook produce a single row. Leads without an external id are always
    /// created.
    async fn create_lead_if_absent(&self, lead: NewLead) -> Result<CreateOutcome, RepositoryError>;

    /// Newest first.
    async fn list_leads(&self) -> Result<Vec<Lead>, RepositoryError>;

    async fn find_lead_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Lead>, RepositoryError>;

    async fn update_lead_stage(
        &self,
        id: &LeadId,
        stage: LeadStage,
    ) -> Result<Option<Lead>, RepositoryError>;

    async fn add_lead_event(
        &self,
        lead_id: &LeadId,
        event_name: &str,
        payload: Value,
    ) -> Result<LeadEvent, RepositoryError>;

    /// Append order.
    async fn list_lead_events(&self, lead_id: &LeadId) -> Result<Vec<LeadEvent>, RepositoryError>;

    async fn upsert_facebook_page(
        &self,
        page: NewFacebookPage,
    ) -> Result<FacebookPage, RepositoryError>;

    async fn get_facebook_page_token(
        &self,
        page_id: &str,
    ) -> Result<Option<SecretString>, RepositoryError>;

    async fn list_facebook_pages(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<FacebookPage>, RepositoryError>;

    async fn storage_health(&self) -> StorageHealth;
}

/// Builds the store for the configured backend, bootstrapping the SQL schema
/// when needed.
pub async fn open_lead_store(
    backend: &StorageBackend,
    tables: &TableNames,
) -> Result<Arc<dyn LeadStore>, RepositoryError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryLeadStore::default())),
        StorageBackend::Sql { url, max_connections, timeout_secs } => {
            let pool = crate::connect_with_settings(url, *max_connections, *timeout_secs).await?;
            crate::migrations::run_pending(&pool, tables).await?;
            Ok(Arc::new(SqlLeadStore::new(pool, tables.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use leadrelay_core::config::{StorageBackend, TableNames};

    use super::{open_lead_store, StorageHealth, StorageMode, TableCheck};

    #[test]
    fn health_is_ok_only_when_every_check_passes() {
        let mut checks = BTreeMap::new();
        checks.insert("leads".to_string(), TableCheck::passed());
        checks.insert("leadEvents".to_string(), TableCheck::failed("no such table"));

        let health = StorageHealth::from_checks(StorageMode::Sql, checks);
        assert!(!health.ok);

        let json = serde_json::to_value(&health).expect("serialize health");
        assert_eq!(json["mode"], "sql");
        assert_eq!(json["checks"]["leads"], serde_json::json!({"ok": true}));
        assert_eq!(json["checks"]["leadEvents"]["error"], "no such table");
    }

    #[tokio::test]
    async fn memory_backend_reports_memory_mode() {
        let store = open_lead_store(&StorageBackend::Memory, &TableNames::default())
            .await
            .expect("open store");
        let health = store.storage_health().await;

        assert_eq!(health.mode, StorageMode::Memory);
        assert!(health.ok);
        let json = serde_json::to_value(&health).expect("serialize health");
        assert!(json.get("checks").is_none());
    }

    #[tokio::test]
    async fn sql_backend_is_bootstrapped_on_open() {
        let backend = StorageBackend::Sql {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 5,
        };
        let store = open_lead_store(&backend, &TableNames::default()).await.expect("open store");
        let health = store.storage_health().await;

        assert_eq!(health.mode, StorageMode::Sql);
        assert!(health.ok, "fresh schema should pass every probe: {health:?}");
        assert_eq!(health.checks.len(), 3);
    }
}
