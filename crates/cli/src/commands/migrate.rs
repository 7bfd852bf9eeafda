use crate::commands::CommandResult;
use leadrelay_core::config::{AppConfig, LoadOptions, StorageBackend};
use leadrelay_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let StorageBackend::Sql { url, max_connections, timeout_secs } = config.storage_backend() else {
        return CommandResult::success(
            "migrate",
            "no database configured; in-memory storage needs no migrations",
        );
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(&url, max_connections, timeout_secs)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool, &config.tables)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "migrate",
            format!(
                "schema ready: {}, {}, {}",
                config.tables.leads, config.tables.lead_events, config.tables.facebook_pages
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
