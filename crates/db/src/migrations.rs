//! Schema bootstrap.
//!
//! Table names come from configuration, so the DDL is rendered at runtime
//! instead of being embedded as static migration files. Every statement is
//! idempotent and safe to run at each startup.

use leadrelay_core::config::TableNames;

use crate::DbPool;

pub fn schema_statements(tables: &TableNames) -> Vec<String> {
    let leads = &tables.leads;
    let events = &tables.lead_events;
    let pages = &tables.facebook_pages;

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {leads} (
                id TEXT PRIMARY KEY NOT NULL,
                meta_lead_id TEXT,
                full_name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                source TEXT NOT NULL,
                stage TEXT NOT NULL DEFAULT 'new',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
        ),
        format!("CREATE UNIQUE INDEX IF NOT EXISTS idx_{leads}_meta_lead_id ON {leads} (meta_lead_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{leads}_created_at ON {leads} (created_at)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {events} (
                id TEXT PRIMARY KEY NOT NULL,
                lead_id TEXT NOT NULL,
                event_name TEXT NOT NULL,
                event_time TEXT NOT NULL,
                payload_json TEXT NOT NULL DEFAULT 'null'
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{events}_lead_id ON {events} (lead_id)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {pages} (
                id TEXT PRIMARY KEY NOT NULL,
                page_id TEXT NOT NULL UNIQUE,
                access_token TEXT NOT NULL,
                name TEXT,
                tenant_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{pages}_tenant_id ON {pages} (tenant_id)"),
    ]
}

pub async fn run_pending(pool: &DbPool, tables: &TableNames) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in schema_statements(tables) {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }
    tx.commit().await
}
