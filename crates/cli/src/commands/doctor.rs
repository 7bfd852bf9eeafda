use leadrelay_core::config::{AppConfig, LoadOptions, StorageBackend};
use leadrelay_core::conversions::ConversionsDestination;
use leadrelay_db::{connect_with_settings, InMemoryLeadStore, LeadStore, SqlLeadStore, StorageHealth};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    run_with(LoadOptions::default(), json_output)
}

pub fn run_with(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::plain(exit_code, output);
    }

    CommandResult::plain(exit_code, render_human(&report))
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_webhook_security(&config));
            checks.push(check_oauth_readiness(&config));
            checks.push(check_conversions_readiness(&config));
            checks.push(check_storage(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in
                ["webhook_security", "oauth_readiness", "conversions_readiness", "storage_health"]
            {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let (overall_status, summary) = if any_fail {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else if all_pass {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    } else {
        (CheckStatus::Warn, "doctor: ready with warnings")
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_webhook_security(config: &AppConfig) -> DoctorCheck {
    let has = |secret: Option<&secrecy::SecretString>| {
        secret.is_some_and(|secret| !secret.expose_secret().trim().is_empty())
    };
    let signing = has(config.webhook.app_secret.as_ref());
    let verify = has(config.webhook.verify_token.as_ref());

    let (status, details) = match (signing, verify) {
        (true, true) => (CheckStatus::Pass, "signature verification and handshake token set"),
        (false, _) => (
            CheckStatus::Warn,
            "webhook.app_secret unset: inbound webhooks are accepted without signature checks",
        ),
        (true, false) => (
            CheckStatus::Warn,
            "webhook.verify_token unset: subscription handshakes will be rejected",
        ),
    };
    DoctorCheck { name: "webhook_security", status, details: details.to_string() }
}

fn check_oauth_readiness(config: &AppConfig) -> DoctorCheck {
    let meta = &config.meta;
    let missing: Vec<&str> = [
        ("meta.app_id", meta.app_id.is_some()),
        ("meta.app_secret", meta.app_secret.is_some()),
        ("meta.redirect_uri", meta.redirect_uri.is_some()),
    ]
    .into_iter()
    .filter(|(_, present)| !present)
    .map(|(key, _)| key)
    .collect();

    if missing.is_empty() {
        return DoctorCheck {
            name: "oauth_readiness",
            status: CheckStatus::Pass,
            details: "page-connect flow configured".to_string(),
        };
    }
    DoctorCheck {
        name: "oauth_readiness",
        status: CheckStatus::Warn,
        details: format!("page-connect flow disabled, missing {}", missing.join(", ")),
    }
}

fn check_conversions_readiness(config: &AppConfig) -> DoctorCheck {
    let destination =
        ConversionsDestination::from_config(&config.conversions, &config.meta.conversions_base_url);

    match destination.destination_id() {
        Ok(id) if destination.access_token.is_some() => DoctorCheck {
            name: "conversions_readiness",
            status: CheckStatus::Pass,
            details: format!("events are sent to `{id}`"),
        },
        _ => DoctorCheck {
            name: "conversions_readiness",
            status: CheckStatus::Warn,
            details: "conversions not configured: stage changes that map to an event will fail"
                .to_string(),
        },
    }
}

/// Probes tables without creating them, so a database that was never
/// migrated is reported instead of silently fixed.
fn check_storage(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "storage_health",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        match config.storage_backend() {
            StorageBackend::Memory => Ok(InMemoryLeadStore::default().storage_health().await),
            StorageBackend::Sql { url, max_connections, timeout_secs } => {
                let pool = connect_with_settings(&url, max_connections, timeout_secs)
                    .await
                    .map_err(|error| format!("failed to connect to database: {error}"))?;
                let store = SqlLeadStore::new(pool.clone(), config.tables.clone());
                let health = store.storage_health().await;
                pool.close().await;
                Ok::<StorageHealth, String>(health)
            }
        }
    });

    match result {
        Ok(health) if health.ok => DoctorCheck {
            name: "storage_health",
            status: CheckStatus::Pass,
            details: format!("{} storage ready", mode_label(&health)),
        },
        Ok(health) => {
            let failing: Vec<String> = health
                .checks
                .iter()
                .filter(|(_, check)| !check.ok)
                .map(|(name, check)| {
                    format!("{name}: {}", check.error.as_deref().unwrap_or("probe failed"))
                })
                .collect();
            DoctorCheck {
                name: "storage_health",
                status: CheckStatus::Fail,
                details: format!("{} (run `leadrelay migrate`)", failing.join("; ")),
            }
        }
        Err(error) => DoctorCheck { name: "storage_health", status: CheckStatus::Fail, details: error },
    }
}

fn mode_label(health: &StorageHealth) -> &'static str {
    match health.mode {
        leadrelay_db::StorageMode::Memory => "in-memory",
        leadrelay_db::StorageMode::Sql => "sql",
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
