use std::env;
use std::fs;
use std::path::Path;

use dialgate_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = AppConfig::discovered_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", &["DIALGATE_DATABASE_URL"]),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", &["DIALGATE_DATABASE_MAX_CONNECTIONS"]),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", &["DIALGATE_DATABASE_TIMEOUT_SECS"]),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", &["DIALGATE_SERVER_BIND_ADDRESS"]),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", &["DIALGATE_SERVER_PORT", "PORT"]),
    ));
    lines.push(render_line(
        "server.public_base_url",
        config.server.public_base_url.as_deref().unwrap_or("<unset>"),
        source("server.public_base_url", &["DIALGATE_SERVER_PUBLIC_BASE_URL"]),
    ));
    let trusted_proxies = if config.server.trusted_proxies.is_empty() {
        "<none>".to_string()
    } else {
        config
            .server
            .trusted_proxies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    };
    lines.push(render_line(
        "server.trusted_proxies",
        &trusted_proxies,
        source("server.trusted_proxies", &["DIALGATE_SERVER_TRUSTED_PROXIES"]),
    ));

    lines.push(render_line(
        "telephony.auth_token",
        &redact_secret(config.telephony.auth_token.expose_secret()),
        source("telephony.auth_token", &["DIALGATE_TELEPHONY_AUTH_TOKEN"]),
    ));
    lines.push(render_line(
        "telephony.validate_signatures",
        &config.telephony.validate_signatures.to_string(),
        source("telephony.validate_signatures", &["DIALGATE_TELEPHONY_VALIDATE_SIGNATURES"]),
    ));
    lines.push(render_line(
        "telephony.media_stream_url",
        &config.telephony.media_stream_url,
        source("telephony.media_stream_url", &["DIALGATE_TELEPHONY_MEDIA_STREAM_URL"]),
    ));
    lines.push(render_line(
        "telephony.greeting",
        &config.telephony.greeting,
        source("telephony.greeting", &["DIALGATE_TELEPHONY_GREETING"]),
    ));
    lines.push(render_line(
        "telephony.decline_message",
        &config.telephony.decline_message,
        source("telephony.decline_message", &["DIALGATE_TELEPHONY_DECLINE_MESSAGE"]),
    ));

    let vault_key = config
        .vault
        .encryption_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    lines.push(render_line(
        "vault.encryption_key",
        &vault_key,
        source("vault.encryption_key", &["DIALGATE_VAULT_ENCRYPTION_KEY"]),
    ));
    lines.push(render_line(
        "api.access_token",
        &redact_secret(config.api.access_token.expose_secret()),
        source("api.access_token", &["DIALGATE_API_ACCESS_TOKEN"]),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", &["DIALGATE_LOGGING_LEVEL", "DIALGATE_LOG_LEVEL"]),
    ));
    lines.push(render_line(
        "logging.format",
        config.logging.format.as_str(),
        source("logging.format", &["DIALGATE_LOGGING_FORMAT", "DIALGATE_LOG_FORMAT"]),
    ));

    lines.join("\n")
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

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        return "<empty>".to_string();
    }
    "<redacted>".to_string()
}
