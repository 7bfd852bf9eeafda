use std::env;
use std::fs;
use std::path::Path;

use leadrelay_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::CommandResult;

const UNSET: &str = "<unset>";

struct Entry {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Entry {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> CommandResult {
    match render(LoadOptions::default()) {
        Ok(output) => CommandResult::plain(0, output),
        Err(error) => CommandResult::failure(
            "config",
            "config_validation",
            format!("config validation failed: {error}"),
            2,
        ),
    }
}

/// Renders every effective setting as `- key = value (source: ...)`.
pub fn render(options: LoadOptions) -> Result<String, leadrelay_core::config::ConfigError> {
    let explicit_path = options.config_path.clone();
    let config = AppConfig::load(options)?;

    let config_file_path = resolve_config_path(explicit_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source =
            field_source(entry.key, entry.env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(entry.key, &entry.value, source));
    }

    Ok(lines.join("\n"))
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let meta = &config.meta;
    let conversions = &config.conversions;

    vec![
        Entry::new(
            "database.url",
            config.database.url.clone().unwrap_or_else(|| "<unset> (in-memory storage)".to_string()),
            &["LEADRELAY_DATABASE_URL"],
        ),
        Entry::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["LEADRELAY_DATABASE_MAX_CONNECTIONS"],
        ),
        Entry::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["LEADRELAY_DATABASE_TIMEOUT_SECS"],
        ),
        Entry::new("tables.leads", config.tables.leads.clone(), &["LEADRELAY_TABLES_LEADS"]),
        Entry::new(
            "tables.lead_events",
            config.tables.lead_events.clone(),
            &["LEADRELAY_TABLES_LEAD_EVENTS"],
        ),
        Entry::new(
            "tables.facebook_pages",
            config.tables.facebook_pages.clone(),
            &["LEADRELAY_TABLES_FACEBOOK_PAGES"],
        ),
        Entry::new(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["LEADRELAY_SERVER_BIND_ADDRESS"],
        ),
        Entry::new("server.port", config.server.port.to_string(), &["LEADRELAY_SERVER_PORT"]),
        Entry::new(
            "server.environment",
            config.server.environment.as_str(),
            &["LEADRELAY_SERVER_ENVIRONMENT"],
        ),
        Entry::new(
            "webhook.verify_token",
            redact_secret(config.webhook.verify_token.as_ref()),
            &["LEADRELAY_WEBHOOK_VERIFY_TOKEN"],
        ),
        Entry::new(
            "webhook.app_secret",
            redact_secret(config.webhook.app_secret.as_ref()),
            &["LEADRELAY_WEBHOOK_APP_SECRET"],
        ),
        Entry::new("meta.app_id", optional(meta.app_id.as_deref()), &["LEADRELAY_META_APP_ID"]),
        Entry::new(
            "meta.app_secret",
            redact_secret(meta.app_secret.as_ref()),
            &["LEADRELAY_META_APP_SECRET"],
        ),
        Entry::new(
            "meta.redirect_uri",
            optional(meta.redirect_uri.as_deref()),
            &["LEADRELAY_META_REDIRECT_URI"],
        ),
        Entry::new("meta.scopes", meta.scopes.clone(), &["LEADRELAY_META_SCOPES"]),
        Entry::new(
            "meta.redirect_allowlist",
            if meta.redirect_allowlist.is_empty() {
                "<empty>".to_string()
            } else {
                meta.redirect_allowlist.join(",")
            },
            &["LEADRELAY_META_REDIRECT_ALLOWLIST"],
        ),
        Entry::new(
            "meta.graph_base_url",
            meta.graph_base_url.clone(),
            &["LEADRELAY_META_GRAPH_BASE_URL"],
        ),
        Entry::new(
            "meta.oauth_base_url",
            meta.oauth_base_url.clone(),
            &["LEADRELAY_META_OAUTH_BASE_URL"],
        ),
        Entry::new(
            "meta.conversions_base_url",
            meta.conversions_base_url.clone(),
            &["LEADRELAY_META_CONVERSIONS_BASE_URL"],
        ),
        Entry::new(
            "meta.http_timeout_secs",
            meta.http_timeout_secs.to_string(),
            &["LEADRELAY_META_HTTP_TIMEOUT_SECS"],
        ),
        Entry::new(
            "meta.oauth_state_ttl_secs",
            meta.oauth_state_ttl_secs.to_string(),
            &["LEADRELAY_META_OAUTH_STATE_TTL_SECS"],
        ),
        Entry::new(
            "conversions.dataset_id",
            optional(conversions.dataset_id.as_deref()),
            &["LEADRELAY_CONVERSIONS_DATASET_ID"],
        ),
        Entry::new(
            "conversions.pixel_id",
            optional(conversions.pixel_id.as_deref()),
            &["LEADRELAY_CONVERSIONS_PIXEL_ID"],
        ),
        Entry::new(
            "conversions.access_token",
            conversions
                .access_token
                .as_ref()
                .map(|token| redact_token(token.expose_secret()))
                .unwrap_or_else(|| UNSET.to_string()),
            &["LEADRELAY_CONVERSIONS_ACCESS_TOKEN"],
        ),
        Entry::new(
            "conversions.test_event_code",
            optional(conversions.test_event_code.as_deref()),
            &["LEADRELAY_CONVERSIONS_TEST_EVENT_CODE"],
        ),
        Entry::new(
            "conversions.event_source",
            optional(conversions.event_source.as_deref()),
            &["LEADRELAY_CONVERSIONS_EVENT_SOURCE"],
        ),
        Entry::new(
            "conversions.crm_name",
            optional(conversions.crm_name.as_deref()),
            &["LEADRELAY_CONVERSIONS_CRM_NAME"],
        ),
        Entry::new(
            "logging.level",
            config.logging.level.clone(),
            &["LEADRELAY_LOGGING_LEVEL", "LEADRELAY_LOG_LEVEL"],
        ),
        Entry::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["LEADRELAY_LOGGING_FORMAT", "LEADRELAY_LOG_FORMAT"],
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn optional(value: Option<&str>) -> String {
    value.unwrap_or(UNSET).to_string()
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        Some(secret) if !secret.expose_secret().trim().is_empty() => "<redacted>".to_string(),
        Some(_) => "<empty>".to_string(),
        None => UNSET.to_string(),
    }
}

/// Keeps the first four characters of long tokens so operators can tell
/// which credential is loaded.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() > 12 {
        let prefix: String = trimmed.chars().take(4).collect();
        return format!("{prefix}***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_token};

    #[test]
    fn long_tokens_keep_a_short_prefix() {
        assert_eq!(redact_token("EAABsbCS1iHgBAKZCZA0ZD"), "EAAB***");
        assert_eq!(redact_token("short"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_toml() {
        let doc: toml::Value = "[meta]\napp_id = \"1\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "meta.app_id"));
        assert!(!contains_path(&doc, "meta.app_secret"));
        assert!(!contains_path(&doc, "webhook.verify_token"));
    }
}
