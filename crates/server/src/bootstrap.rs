use std::sync::Arc;

use axum::Router;
use leadrelay_core::config::{AppConfig, StorageBackend};
use leadrelay_db::{open_lead_store, RepositoryError};
use thiserror::Error;
use tracing::info;

use crate::app::{self, AppState};
use crate::meta::HttpMetaApi;

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
}

impl Application {
    pub fn router(&self) -> Router {
        app::router(self.state.clone())
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("storage initialization failed: {0}")]
    Storage(#[source] RepositoryError),
    #[error("http client initialization failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let backend = config.storage_backend();
    let mode = match backend {
        StorageBackend::Memory => "memory",
        StorageBackend::Sql { .. } => "sql",
    };
    let store = open_lead_store(&backend, &config.tables).await.map_err(BootstrapError::Storage)?;
    info!(
        event_name = "system.bootstrap.storage_ready",
        correlation_id = "bootstrap",
        mode,
        "lead storage ready"
    );

    let client = HttpMetaApi::build_client(config.meta.http_timeout_secs)
        .map_err(BootstrapError::HttpClient)?;
    let meta = Arc::new(HttpMetaApi::new(client, &config.meta));

    let state = AppState::new(&config, store, meta);
    Ok(Application { config, state })
}
