use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::oauth::MAX_STATE_TTL_SECS;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v24.0";
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://www.facebook.com/v24.0/dialog/oauth";
pub const DEFAULT_CONVERSIONS_BASE_URL: &str = "https://graph.facebook.com/v19.0";
pub const DEFAULT_SCOPES: &str =
    "pages_read_engagement,leads_retrieval,pages_show_list,pages_manage_metadata";

const CONFIG_FILE_CANDIDATES: [&str; 2] = ["leadrelay.toml", "config/leadrelay.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub tables: TableNames,
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub meta: MetaConfig,
    pub conversions: ConversionsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Absent means the process keeps everything in memory.
    pub url: Option<String>,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sql { url: String, max_connections: u32, timeout_secs: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    pub leads: String,
    pub lead_events: String,
    pub facebook_pages: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub environment: Environment,
}

#[derive(Clone, Debug, Default)]
pub struct WebhookConfig {
    pub verify_token: Option<SecretString>,
    /// Signing secret for `x-hub-signature-256`; unset disables verification.
    pub app_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct MetaConfig {
    pub app_id: Option<String>,
    pub app_secret: Option<SecretString>,
    pub redirect_uri: Option<String>,
    pub scopes: String,
    pub redirect_allowlist: Vec<String>,
    pub graph_base_url: String,
    pub oauth_base_url: String,
    pub conversions_base_url: String,
    pub http_timeout_secs: u64,
    pub oauth_state_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversionsConfig {
    pub dataset_id: Option<String>,
    pub pixel_id: Option<String>,
    pub access_token: Option<SecretString>,
    pub test_event_code: Option<String>,
    pub event_source: Option<String>,
    pub crm_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub port: Option<u16>,
    pub environment: Option<Environment>,
    pub log_level: Option<String>,
    pub webhook_verify_token: Option<String>,
    pub webhook_app_secret: Option<String>,
    pub meta_app_id: Option<String>,
    pub meta_redirect_uri: Option<String>,
    pub conversions_dataset_id: Option<String>,
    pub conversions_access_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig { url: None, max_connections: 5, timeout_secs: 30 },
            tables: TableNames::default(),
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 3000,
                environment: Environment::Development,
            },
            webhook: WebhookConfig::default(),
            meta: MetaConfig {
                app_id: None,
                app_secret: None,
                redirect_uri: None,
                scopes: DEFAULT_SCOPES.to_string(),
                redirect_allowlist: Vec::new(),
                graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
                oauth_base_url: DEFAULT_OAUTH_BASE_URL.to_string(),
                conversions_base_url: DEFAULT_CONVERSIONS_BASE_URL.to_string(),
                http_timeout_secs: 30,
                oauth_state_ttl_secs: crate::oauth::DEFAULT_STATE_TTL_SECS,
            },
            conversions: ConversionsConfig {
                dataset_id: None,
                pixel_id: None,
                access_token: None,
                test_event_code: None,
                event_source: Some("crm".to_string()),
                crm_name: Some("Lead Relay CRM".to_string()),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            leads: "leads".to_string(),
            lead_events: "lead_events".to_string(),
            facebook_pages: "facebook_pages".to_string(),
        }
    }
}

impl TableNames {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, name) in [
            ("tables.leads", &self.leads),
            ("tables.lead_events", &self.lead_events),
            ("tables.facebook_pages", &self.facebook_pages),
        ] {
            if !is_sql_identifier(name) {
                return Err(ConfigError::Validation(format!(
                    "{key} must be a plain SQL identifier (letters, digits, underscore), got `{name}`"
                )));
            }
        }

        if self.leads == self.lead_events
            || self.leads == self.facebook_pages
            || self.lead_events == self.facebook_pages
        {
            return Err(ConfigError::Validation("table names must be distinct".to_string()));
        }
        Ok(())
    }
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::Validation(format!(
                "unsupported environment `{other}` (expected development|production)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Resolved once at startup; every later component receives the result.
    pub fn storage_backend(&self) -> StorageBackend {
        match self.database.url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => StorageBackend::Sql {
                url: url.to_string(),
                max_connections: self.database.max_connections,
                timeout_secs: self.database.timeout_secs,
            },
            None => StorageBackend::Memory,
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = Some(url);
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(tables) = patch.tables {
            if let Some(leads) = tables.leads {
                self.tables.leads = leads;
            }
            if let Some(lead_events) = tables.lead_events {
                self.tables.lead_events = lead_events;
            }
            if let Some(facebook_pages) = tables.facebook_pages {
                self.tables.facebook_pages = facebook_pages;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(environment) = server.environment {
                self.server.environment = environment;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(verify_token) = webhook.verify_token {
                self.webhook.verify_token = Some(secret_value(verify_token));
            }
            if let Some(app_secret) = webhook.app_secret {
                self.webhook.app_secret = Some(secret_value(app_secret));
            }
        }

        if let Some(meta) = patch.meta {
            if let Some(app_id) = meta.app_id {
                self.meta.app_id = Some(app_id);
            }
            if let Some(app_secret) = meta.app_secret {
                self.meta.app_secret = Some(secret_value(app_secret));
            }
            if let Some(redirect_uri) = meta.redirect_uri {
                self.meta.redirect_uri = Some(redirect_uri);
            }
            if let Some(scopes) = meta.scopes {
                self.meta.scopes = scopes;
            }
            if let Some(redirect_allowlist) = meta.redirect_allowlist {
                self.meta.redirect_allowlist = redirect_allowlist;
            }
            if let Some(graph_base_url) = meta.graph_base_url {
                self.meta.graph_base_url = graph_base_url;
            }
            if let Some(oauth_base_url) = meta.oauth_base_url {
                self.meta.oauth_base_url = oauth_base_url;
            }
            if let Some(conversions_base_url) = meta.conversions_base_url {
                self.meta.conversions_base_url = conversions_base_url;
            }
            if let Some(http_timeout_secs) = meta.http_timeout_secs {
                self.meta.http_timeout_secs = http_timeout_secs;
            }
            if let Some(oauth_state_ttl_secs) = meta.oauth_state_ttl_secs {
                self.meta.oauth_state_ttl_secs = oauth_state_ttl_secs;
            }
        }

        if let Some(conversions) = patch.conversions {
            if let Some(dataset_id) = conversions.dataset_id {
                self.conversions.dataset_id = Some(dataset_id);
            }
            if let Some(pixel_id) = conversions.pixel_id {
                self.conversions.pixel_id = Some(pixel_id);
            }
            if let Some(access_token) = conversions.access_token {
                self.conversions.access_token = Some(secret_value(access_token));
            }
            if let Some(test_event_code) = conversions.test_event_code {
                self.conversions.test_event_code = Some(test_event_code);
            }
            if let Some(event_source) = conversions.event_source {
                self.conversions.event_source = Some(event_source);
            }
            if let Some(crm_name) = conversions.crm_name {
                self.conversions.crm_name = Some(crm_name);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADRELAY_DATABASE_URL") {
            self.database.url = Some(value);
        }
        if let Some(value) = read_env("LEADRELAY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADRELAY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADRELAY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADRELAY_TABLES_LEADS") {
            self.tables.leads = value;
        }
        if let Some(value) = read_env("LEADRELAY_TABLES_LEAD_EVENTS") {
            self.tables.lead_events = value;
        }
        if let Some(value) = read_env("LEADRELAY_TABLES_FACEBOOK_PAGES") {
            self.tables.facebook_pages = value;
        }

        if let Some(value) = read_env("LEADRELAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADRELAY_SERVER_PORT") {
            self.server.port = parse_u16("LEADRELAY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_SERVER_ENVIRONMENT") {
            self.server.environment = value.parse()?;
        }

        if let Some(value) = read_env("LEADRELAY_WEBHOOK_VERIFY_TOKEN") {
            self.webhook.verify_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADRELAY_WEBHOOK_APP_SECRET") {
            self.webhook.app_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("LEADRELAY_META_APP_ID") {
            self.meta.app_id = Some(value);
        }
        if let Some(value) = read_env("LEADRELAY_META_APP_SECRET") {
            self.meta.app_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADRELAY_META_REDIRECT_URI") {
            self.meta.redirect_uri = Some(value);
        }
        if let Some(value) = read_env("LEADRELAY_META_SCOPES") {
            self.meta.scopes = value;
        }
        if let Some(value) = read_env("LEADRELAY_META_REDIRECT_ALLOWLIST") {
            self.meta.redirect_allowlist = split_list(&value);
        }
        if let Some(value) = read_env("LEADRELAY_META_GRAPH_BASE_URL") {
            self.meta.graph_base_url = value;
        }
        if let Some(value) = read_env("LEADRELAY_META_OAUTH_BASE_URL") {
            self.meta.oauth_base_url = value;
        }
        if let Some(value) = read_env("LEADRELAY_META_CONVERSIONS_BASE_URL") {
            self.meta.conversions_base_url = value;
        }
        if let Some(value) = read_env("LEADRELAY_META_HTTP_TIMEOUT_SECS") {
            self.meta.http_timeout_secs = parse_u64("LEADRELAY_META_HTTP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_META_OAUTH_STATE_TTL_SECS") {
            self.meta.oauth_state_ttl_secs =
                parse_u64("LEADRELAY_META_OAUTH_STATE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADRELAY_CONVERSIONS_DATASET_ID") {
            self.conversions.dataset_id = Some(value);
        }
        if let Some(value) = read_env("LEADRELAY_CONVERSIONS_PIXEL_ID") {
            self.conversions.pixel_id = Some(value);
        }
        if let Some(value) = read_env("LEADRELAY_CONVERSIONS_ACCESS_TOKEN") {
            self.conversions.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADRELAY_CONVERSIONS_TEST_EVENT_CODE") {
            self.conversions.test_event_code = Some(value);
        }
        if let Some(value) = read_env("LEADRELAY_CONVERSIONS_EVENT_SOURCE") {
            self.conversions.event_source = Some(value);
        }
        if let Some(value) = read_env("LEADRELAY_CONVERSIONS_CRM_NAME") {
            self.conversions.crm_name = Some(value);
        }

        let log_level =
            read_env("LEADRELAY_LOGGING_LEVEL").or_else(|| read_env("LEADRELAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADRELAY_LOGGING_FORMAT").or_else(|| read_env("LEADRELAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = Some(database_url);
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(environment) = overrides.environment {
            self.server.environment = environment;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(verify_token) = overrides.webhook_verify_token {
            self.webhook.verify_token = Some(secret_value(verify_token));
        }
        if let Some(app_secret) = overrides.webhook_app_secret {
            self.webhook.app_secret = Some(secret_value(app_secret));
        }
        if let Some(app_id) = overrides.meta_app_id {
            self.meta.app_id = Some(app_id);
        }
        if let Some(redirect_uri) = overrides.meta_redirect_uri {
            self.meta.redirect_uri = Some(redirect_uri);
        }
        if let Some(dataset_id) = overrides.conversions_dataset_id {
            self.conversions.dataset_id = Some(dataset_id);
        }
        if let Some(access_token) = overrides.conversions_access_token {
            self.conversions.access_token = Some(secret_value(access_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        self.tables.validate()?;
        validate_server(&self.server)?;
        validate_meta(&self.meta)?;
        validate_conversions(&self.conversions)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// First config file that exists, explicit path first.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if let Some(url) = database.url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
        let sqlite_url =
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
        if !sqlite_url {
            return Err(ConfigError::Validation(
                "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                    .to_string(),
            ));
        }
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    Ok(())
}

fn validate_meta(meta: &MetaConfig) -> Result<(), ConfigError> {
    for (key, value) in [
        ("meta.graph_base_url", meta.graph_base_url.as_str()),
        ("meta.oauth_base_url", meta.oauth_base_url.as_str()),
        ("meta.conversions_base_url", meta.conversions_base_url.as_str()),
    ] {
        validate_http_url(key, value)?;
    }
    if let Some(redirect_uri) = &meta.redirect_uri {
        validate_http_url("meta.redirect_uri", redirect_uri)?;
    }
    for origin in &meta.redirect_allowlist {
        validate_http_url("meta.redirect_allowlist", origin)?;
    }

    if meta.http_timeout_secs == 0 || meta.http_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "meta.http_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if meta.oauth_state_ttl_secs == 0 || meta.oauth_state_ttl_secs > MAX_STATE_TTL_SECS {
        return Err(ConfigError::Validation(format!(
            "meta.oauth_state_ttl_secs must be in range 1..={MAX_STATE_TTL_SECS}"
        )));
    }

    Ok(())
}

fn validate_conversions(conversions: &ConversionsConfig) -> Result<(), ConfigError> {
    let has_destination = [&conversions.dataset_id, &conversions.pixel_id]
        .into_iter()
        .flatten()
        .any(|value| !value.trim().is_empty());
    let has_token = conversions
        .access_token
        .as_ref()
        .is_some_and(|token| !token.expose_secret().trim().is_empty());

    // Either half alone is almost certainly a deployment mistake.
    if has_token && !has_destination {
        return Err(ConfigError::Validation(
            "conversions.access_token is set but neither conversions.dataset_id nor conversions.pixel_id is"
                .to_string(),
        ));
    }
    if has_destination && !has_token {
        return Err(ConfigError::Validation(
            "conversions.dataset_id/pixel_id is set but conversions.access_token is missing"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value.trim())
        .map_err(|_| ConfigError::Validation(format!("{key} must be an absolute URL")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Validation(format!(
            "{key} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && name.len() <= 63
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    tables: Option<TablesPatch>,
    server: Option<ServerPatch>,
    webhook: Option<WebhookPatch>,
    meta: Option<MetaPatch>,
    conversions: Option<ConversionsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TablesPatch {
    leads: Option<String>,
    lead_events: Option<String>,
    facebook_pages: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    environment: Option<Environment>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    verify_token: Option<String>,
    app_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetaPatch {
    app_id: Option<String>,
    app_secret: Option<String>,
    redirect_uri: Option<String>,
    scopes: Option<String>,
    redirect_allowlist: Option<Vec<String>>,
    graph_base_url: Option<String>,
    oauth_base_url: Option<String>,
    conversions_base_url: Option<String>,
    http_timeout_secs: Option<u64>,
    oauth_state_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversionsPatch {
    dataset_id: Option<String>,
    pixel_id: Option<String>,
    access_token: Option<String>,
    test_event_code: Option<String>,
    event_source: Option<String>,
    crm_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, Environment, LoadOptions, LogFormat,
        StorageBackend, TableNames,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_select_memory_backend() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.storage_backend() == StorageBackend::Memory, "no url means memory")?;
        ensure(config.server.port == 3000, "default port should be 3000")?;
        ensure(
            config.server.environment == Environment::Development,
            "default environment should be development",
        )?;
        ensure(config.tables == TableNames::default(), "default table names")?;
        ensure(
            config.conversions.event_source.as_deref() == Some("crm"),
            "default event source should be crm",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_LEADRELAY_APP_SECRET", "signing-secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadrelay.toml");
            fs::write(
                &path,
                r#"
[webhook]
verify_token = "hub-token"
app_secret = "${TEST_LEADRELAY_APP_SECRET}"

[tables]
leads = "crm_leads"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .webhook
                    .app_secret
                    .as_ref()
                    .is_some_and(|secret| secret.expose_secret() == "signing-secret-from-env"),
                "app secret should be interpolated from environment",
            )?;
            ensure(config.tables.leads == "crm_leads", "leads table should come from file")?;
            ensure(config.tables.lead_events == "lead_events", "unset table keeps default")?;
            Ok(())
        })();

        clear_vars(&["TEST_LEADRELAY_APP_SECRET"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("LEADRELAY_SERVER_PORT", "4100");
        env::set_var("LEADRELAY_META_REDIRECT_ALLOWLIST", "https://a.example.com, https://b.example.com");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadrelay.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 4000
environment = "production"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url.as_deref() == Some("sqlite://from-override.db"),
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 4100, "env port should win over file")?;
            ensure(
                config.server.environment.is_production(),
                "file environment should win over default",
            )?;
            ensure(
                config.meta.redirect_allowlist
                    == vec!["https://a.example.com".to_string(), "https://b.example.com".to_string()],
                "allowlist env var should be split on commas",
            )?;
            ensure(
                matches!(config.storage_backend(), StorageBackend::Sql { ref url, .. } if url == "sqlite://from-override.db"),
                "sql backend should be selected when a url is configured",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "LEADRELAY_DATABASE_URL",
            "LEADRELAY_SERVER_PORT",
            "LEADRELAY_META_REDIRECT_ALLOWLIST",
        ]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_LOG_LEVEL", "warn");
        env::set_var("LEADRELAY_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )
        })();

        clear_vars(&["LEADRELAY_LOG_LEVEL", "LEADRELAY_LOG_FORMAT"]);
        result
    }

    #[test]
    fn invalid_table_name_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_TABLES_LEADS", "leads; DROP TABLE x");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("tables.leads")),
                "validation failure should mention tables.leads",
            )
        })();

        clear_vars(&["LEADRELAY_TABLES_LEADS"]);
        result
    }

    #[test]
    fn conversions_token_without_destination_fails_fast() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_CONVERSIONS_ACCESS_TOKEN", "EAAB-token");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("conversions.dataset_id")),
                "validation failure should name the missing destination",
            )
        })();

        clear_vars(&["LEADRELAY_CONVERSIONS_ACCESS_TOKEN"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_SERVER_PORT", "not-a-port");

        let result = (|| -> Result<(), String> {
            let outcome = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(outcome, Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "LEADRELAY_SERVER_PORT"),
                "bad port should surface as an invalid env override",
            )
        })();

        clear_vars(&["LEADRELAY_SERVER_PORT"]);
        result
    }

    #[test]
    fn oauth_state_ttl_must_stay_within_one_day() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.meta.oauth_state_ttl_secs = 100_000_000_000_000_000;
        ensure(
            matches!(config.validate(), Err(ConfigError::Validation(ref message)) if message.contains("meta.oauth_state_ttl_secs")),
            "oversized ttl should be rejected",
        )?;

        config.meta.oauth_state_ttl_secs = 0;
        ensure(config.validate().is_err(), "zero ttl should be rejected")?;

        config.meta.oauth_state_ttl_secs = 86_400;
        ensure(config.validate().is_ok(), "one day is the largest accepted ttl")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_WEBHOOK_APP_SECRET", "webhook-secret-value");
        env::set_var("LEADRELAY_CONVERSIONS_DATASET_ID", "1234567890");
        env::set_var("LEADRELAY_CONVERSIONS_ACCESS_TOKEN", "capi-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("webhook-secret-value"),
                "debug output should not contain the webhook secret",
            )?;
            ensure(
                !debug.contains("capi-secret-value"),
                "debug output should not contain the conversions token",
            )
        })();

        clear_vars(&[
            "LEADRELAY_WEBHOOK_APP_SECRET",
            "LEADRELAY_CONVERSIONS_DATASET_ID",
            "LEADRELAY_CONVERSIONS_ACCESS_TOKEN",
        ]);
        result
    }
}
