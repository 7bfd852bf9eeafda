use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use leadrelay_core::config::TableNames;
use leadrelay_core::domain::event::LeadEvent;
use leadrelay_core::domain::lead::{Lead, LeadId, LeadSource, LeadStage, NewLead};
use leadrelay_core::domain::page::{FacebookPage, NewFacebookPage};

use super::{CreateOutcome, LeadStore, RepositoryError, StorageHealth, StorageMode, TableCheck};
use crate::DbPool;

const LEAD_COLUMNS: &str =
    "id, meta_lead_id, full_name, email, phone, source, stage, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, lead_id, event_name, event_time, payload_json";
const PAGE_COLUMNS: &str = "id, page_id, access_token, name, tenant_id, created_at, updated_at";

pub struct SqlLeadStore {
    pool: DbPool,
    tables: TableNames,
}

impl SqlLeadStore {
    /// `tables` must already be validated; names are interpolated into SQL.
    pub fn new(pool: DbPool, tables: TableNames) -> Self {
        Self { pool, tables }
    }

    async fn insert_lead(&self, lead: &Lead, skip_duplicate: bool) -> Result<u64, RepositoryError> {
        let conflict = if skip_duplicate { " ON CONFLICT(meta_lead_id) DO NOTHING" } else { "" };
        let sql = format!(
            "INSERT INTO {} ({LEAD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?){conflict}",
            self.tables.leads
        );

        let result = sqlx::query(&sql)
            .bind(&lead.id.0)
            .bind(&lead.external_id)
            .bind(&lead.full_name)
            .bind(&lead.email)
            .bind(&lead.phone)
            .bind(lead.source.as_str())
            .bind(lead.stage.as_str())
            .bind(timestamp(&lead.created_at))
            .bind(timestamp(&lead.updated_at))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_lead_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let sql = format!("SELECT {LEAD_COLUMNS} FROM {} WHERE id = ?", self.tables.leads);
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;

        row.as_ref().map(row_to_lead).transpose()
    }

    async fn probe(&self, table: &str) -> TableCheck {
        let sql = format!("SELECT id FROM {table} LIMIT 1");
        match sqlx::query(&sql).fetch_optional(&self.pool).await {
            Ok(_) => TableCheck::passed(),
            Err(error) => TableCheck::failed(error.to_string()),
        }
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn row_to_lead(row: &sqlx::sqlite::SqliteRow) -> Result<Lead, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let external_id: Option<String> =
        row.try_get("meta_lead_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let full_name: String =
        row.try_get("full_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let email: Option<String> =
        row.try_get("email").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let phone: Option<String> =
        row.try_get("phone").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let source_str: String =
        row.try_get("source").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let stage_str: String =
        row.try_get("stage").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let source = LeadSource::parse(&source_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead source `{source_str}`")))?;
    let stage = LeadStage::parse(&stage_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead stage `{stage_str}`")))?;

    Ok(Lead {
        id: LeadId(id),
        external_id,
        full_name,
        email,
        phone,
        source,
        stage,
        created_at: parse_timestamp("created_at", &created_at_str)?,
        updated_at: parse_timestamp("updated_at", &updated_at_str)?,
    })
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<LeadEvent, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let lead_id: String =
        row.try_get("lead_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let event_name: String =
        row.try_get("event_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let event_time_str: String =
        row.try_get("event_time").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let payload_json: String =
        row.try_get("payload_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let payload: Value = serde_json::from_str(&payload_json)
        .map_err(|e| RepositoryError::Decode(format!("payload_json: {e}")))?;

    Ok(LeadEvent {
        id,
        lead_id: LeadId(lead_id),
        event_name,
        event_time: parse_timestamp("event_time", &event_time_str)?,
        payload,
    })
}

fn row_to_page(row: &sqlx::sqlite::SqliteRow) -> Result<FacebookPage, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let page_id: String =
        row.try_get("page_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let access_token: String =
        row.try_get("access_token").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: Option<String> =
        row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: Option<String> =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(FacebookPage {
        id,
        page_id,
        access_token: SecretString::from(access_token),
        name,
        tenant_id,
        created_at: parse_timestamp("created_at", &created_at_str)?,
        updated_at: parse_timestamp("updated_at", &updated_at_str)?,
    })
}

#[async_trait::async_trait]
impl LeadStore for SqlLeadStore {
    async fn create_lead(&self, lead: NewLead) -> Result<Lead, RepositoryError> {
        let lead = lead.into_lead(Utc::now());
        self.insert_lead(&lead, false).await?;
        Ok(lead)
    }

    async fn create_lead_if_absent(&self, lead: NewLead) -> Result<CreateOutcome, RepositoryError> {
        let lead = lead.into_lead(Utc::now());
        let Some(external_id) = lead.external_id.clone() else {
            self.insert_lead(&lead, false).await?;
            return Ok(CreateOutcome::Created(lead));
        };

        if self.insert_lead(&lead, true).await? == 1 {
            return Ok(CreateOutcome::Created(lead));
        }

        self.find_lead_by_external_id(&external_id).await?.map(CreateOutcome::Existing).ok_or_else(
            || {
                RepositoryError::Decode(format!(
                    "insert of lead `{external_id}` was skipped but no existing row was found"
                ))
            },
        )
    }

    async fn list_leads(&self) -> Result<Vec<Lead>, RepositoryError> {
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM {} ORDER BY created_at DESC, rowid DESC",
            self.tables.leads
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_lead).collect::<Result<Vec<_>, _>>()
    }

    async fn find_lead_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM {} WHERE meta_lead_id = ? LIMIT 1",
            self.tables.leads
        );
        let row = sqlx::query(&sql).bind(external_id).fetch_optional(&self.pool).await?;

        row.as_ref().map(row_to_lead).transpose()
    }

    async fn update_lead_stage(
        &self,
        id: &LeadId,
        stage: LeadStage,
    ) -> Result<Option<Lead>, RepositoryError> {
        let sql =
            format!("UPDATE {} SET stage = ?, updated_at = ? WHERE id = ?", self.tables.leads);
        let result = sqlx::query(&sql)
            .bind(stage.as_str())
            .bind(timestamp(&Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_lead_by_id(id).await
    }

    async fn add_lead_event(
        &self,
        lead_id: &LeadId,
        event_name: &str,
        payload: Value,
    ) -> Result<LeadEvent, RepositoryError> {
        let event = LeadEvent::new(lead_id.clone(), event_name, payload);
        let payload_json = serde_json::to_string(&event.payload)
            .map_err(|e| RepositoryError::Decode(format!("payload_json: {e}")))?;

        let sql = format!(
            "INSERT INTO {} ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?)",
            self.tables.lead_events
        );
        sqlx::query(&sql)
            .bind(&event.id)
            .bind(&event.lead_id.0)
            .bind(&event.event_name)
            .bind(timestamp(&event.event_time))
            .bind(payload_json)
            .execute(&self.pool)
            .await?;

        Ok(event)
    }

    async fn list_lead_events(&self, lead_id: &LeadId) -> Result<Vec<LeadEvent>, RepositoryError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM {} WHERE lead_id = ? ORDER BY rowid ASC",
            self.tables.lead_events
        );
        let rows = sqlx::query(&sql).bind(&lead_id.0).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()
    }

    async fn upsert_facebook_page(
        &self,
        page: NewFacebookPage,
    ) -> Result<FacebookPage, RepositoryError> {
        let now = timestamp(&Utc::now());
        let upsert = format!(
            "INSERT INTO {} ({PAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(page_id) DO UPDATE SET
                 access_token = excluded.access_token,
                 name = excluded.name,
                 tenant_id = excluded.tenant_id,
                 updated_at = excluded.updated_at",
            self.tables.facebook_pages
        );
        sqlx::query(&upsert)
            .bind(Uuid::new_v4().to_string())
            .bind(&page.page_id)
            .bind(page.access_token.expose_secret())
            .bind(&page.name)
            .bind(&page.tenant_id)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        let select =
            format!("SELECT {PAGE_COLUMNS} FROM {} WHERE page_id = ?", self.tables.facebook_pages);
        let row = sqlx::query(&select).bind(&page.page_id).fetch_one(&self.pool).await?;
        row_to_page(&row)
    }

    async fn get_facebook_page_token(
        &self,
        page_id: &str,
    ) -> Result<Option<SecretString>, RepositoryError> {
        let sql =
            format!("SELECT access_token FROM {} WHERE page_id = ?", self.tables.facebook_pages);
        let row = sqlx::query(&sql).bind(page_id).fetch_optional(&self.pool).await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let token: String =
            row.try_get("access_token").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(Some(SecretString::from(token)).filter(|token| !token.expose_secret().is_empty()))
    }

    async fn list_facebook_pages(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<FacebookPage>, RepositoryError> {
        let rows = match tenant_id {
            Some(tenant_id) => {
                let sql = format!(
                    "SELECT {PAGE_COLUMNS} FROM {} WHERE tenant_id = ?
                     ORDER BY created_at DESC, rowid DESC",
                    self.tables.facebook_pages
                );
                sqlx::query(&sql).bind(tenant_id).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!(
                    "SELECT {PAGE_COLUMNS} FROM {} ORDER BY created_at DESC, rowid DESC",
                    self.tables.facebook_pages
                );
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };

        rows.iter().map(row_to_page).collect::<Result<Vec<_>, _>>()
    }

    async fn storage_health(&self) -> StorageHealth {
        let mut checks = BTreeMap::new();
        checks.insert("leads".to_string(), self.probe(&self.tables.leads).await);
        checks.insert("leadEvents".to_string(), self.probe(&self.tables.lead_events).await);
        checks.insert("facebookPages".to_string(), self.probe(&self.tables.facebook_pages).await);
        StorageHealth::from_checks(StorageMode::Sql, checks)
    }
}
