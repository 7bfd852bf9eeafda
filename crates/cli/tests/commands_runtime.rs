use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use leadrelay_cli::commands::{config, doctor, migrate};
use leadrelay_core::config::LoadOptions;
use serde_json::Value;

#[test]
fn migrate_creates_schema_on_file_database() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("relay.db").display());

    with_env(&[("LEADRELAY_DATABASE_URL", url.as_str())], || {
        let first = migrate::run();
        assert_eq!(first.exit_code, 0, "expected successful migrate run: {}", first.output);

        let payload = parse_payload(&first.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("leads"));

        let second = migrate::run();
        assert_eq!(second.exit_code, 0, "migrate must be re-runnable");
    });

    assert!(dir.path().join("relay.db").exists());
}

#[test]
fn migrate_is_a_noop_without_database() {
    with_env(&[], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("in-memory"));
    });
}

#[test]
fn migrate_reports_config_failure_for_unsafe_table_name() {
    with_env(
        &[
            ("LEADRELAY_DATABASE_URL", "sqlite::memory:"),
            ("LEADRELAY_TABLES_LEADS", "leads; DROP TABLE x"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn config_failure_is_reported_as_json() {
    with_env(&[("LEADRELAY_SERVER_ENVIRONMENT", "staging")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_render_attributes_sources_and_redacts_secrets() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("leadrelay.toml");
    fs::write(&path, "[meta]\napp_id = \"1234\"\nredirect_uri = \"https://relay.example/cb\"\n")
        .expect("write config");

    with_env(
        &[
            ("LEADRELAY_WEBHOOK_APP_SECRET", "super-secret-value"),
            ("LEADRELAY_CONVERSIONS_DATASET_ID", "998877"),
            ("LEADRELAY_CONVERSIONS_ACCESS_TOKEN", "EAABsbCS1iHgBAKZCZA0ZD"),
        ],
        || {
            let output = config::render(LoadOptions {
                config_path: Some(path.clone()),
                ..LoadOptions::default()
            })
            .expect("config renders");

            assert!(output.contains("- meta.app_id = 1234 (source: file ("));
            assert!(output.contains(
                "- webhook.app_secret = <redacted> (source: env (LEADRELAY_WEBHOOK_APP_SECRET))"
            ));
            assert!(output.contains("- conversions.access_token = EAAB***"));
            assert!(output.contains("- server.port = 3000 (source: default)"));
            assert!(!output.contains("super-secret-value"));
            assert!(!output.contains("EAABsbCS1iHgBAKZCZA0ZD"));
        },
    );
}

#[test]
fn doctor_json_passes_storage_for_migrated_database() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("relay.db").display());

    with_env(&[("LEADRELAY_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "unexpected doctor failure: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "warn");
        let storage = find_check(&payload, "storage_health");
        assert_eq!(storage["status"], "pass");
        let webhook = find_check(&payload, "webhook_security");
        assert_eq!(webhook["status"], "warn");
    });
}

#[test]
fn doctor_fails_when_database_was_never_migrated() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("fresh.db").display());

    with_env(&[("LEADRELAY_DATABASE_URL", url.as_str())], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let storage = find_check(&payload, "storage_health");
        assert_eq!(storage["status"], "fail");
        assert!(storage["details"].as_str().unwrap_or_default().contains("leadrelay migrate"));
    });
}

#[test]
fn doctor_skips_dependent_checks_on_invalid_config() {
    with_env(&[("LEADRELAY_LOG_FORMAT", "xml")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] storage_health"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn find_check<'a>(payload: &'a Value, name: &str) -> &'a Value {
    payload["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .unwrap_or_else(|| panic!("missing check `{name}` in {payload}"))
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEADRELAY_DATABASE_URL",
        "LEADRELAY_DATABASE_MAX_CONNECTIONS",
        "LEADRELAY_DATABASE_TIMEOUT_SECS",
        "LEADRELAY_TABLES_LEADS",
        "LEADRELAY_TABLES_LEAD_EVENTS",
        "LEADRELAY_TABLES_FACEBOOK_PAGES",
        "LEADRELAY_SERVER_BIND_ADDRESS",
        "LEADRELAY_SERVER_PORT",
        "LEADRELAY_SERVER_ENVIRONMENT",
        "LEADRELAY_WEBHOOK_VERIFY_TOKEN",
        "LEADRELAY_WEBHOOK_APP_SECRET",
        "LEADRELAY_META_APP_ID",
        "LEADRELAY_META_APP_SECRET",
        "LEADRELAY_META_REDIRECT_URI",
        "LEADRELAY_META_SCOPES",
        "LEADRELAY_META_REDIRECT_ALLOWLIST",
        "LEADRELAY_META_GRAPH_BASE_URL",
        "LEADRELAY_META_OAUTH_BASE_URL",
        "LEADRELAY_META_CONVERSIONS_BASE_URL",
        "LEADRELAY_META_HTTP_TIMEOUT_SECS",
        "LEADRELAY_META_OAUTH_STATE_TTL_SECS",
        "LEADRELAY_CONVERSIONS_DATASET_ID",
        "LEADRELAY_CONVERSIONS_PIXEL_ID",
        "LEADRELAY_CONVERSIONS_ACCESS_TOKEN",
        "LEADRELAY_CONVERSIONS_TEST_EVENT_CODE",
        "LEADRELAY_CONVERSIONS_EVENT_SOURCE",
        "LEADRELAY_CONVERSIONS_CRM_NAME",
        "LEADRELAY_LOGGING_LEVEL",
        "LEADRELAY_LOGGING_FORMAT",
        "LEADRELAY_LOG_LEVEL",
        "LEADRELAY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
