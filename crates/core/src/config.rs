use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "dialgate.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub telephony: TelephonyConfig,
    pub vault: VaultConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// When set, webhook signatures are checked against this origin instead of one rebuilt
    /// from forwarded headers.
    pub public_base_url: Option<String>,
    /// Peers whose `x-forwarded-for` / `x-real-ip` headers are believed. Empty means the
    /// socket peer address is the client address.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Clone, Debug)]
pub struct TelephonyConfig {
    pub auth_token: SecretString,
    pub validate_signatures: bool,
    pub media_stream_url: String,
    pub greeting: String,
    pub decline_message: String,
}

#[derive(Clone, Debug)]
pub struct VaultConfig {
    /// Checked on first use, not at load.
    pub encryption_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub access_token: SecretString,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub public_base_url: Option<String>,
    pub telephony_auth_token: Option<String>,
    pub api_access_token: Option<String>,
    pub vault_encryption_key: Option<String>,
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
            database: DatabaseConfig {
                url: "sqlite://dialgate.db".to_string(),
                max_connections: 5,
                timeout_secs: 5,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                public_base_url: None,
                trusted_proxies: Vec::new(),
            },
            telephony: TelephonyConfig {
                auth_token: String::new().into(),
                validate_signatures: true,
                media_stream_url: "wss://127.0.0.1:8765/media-stream".to_string(),
                greeting: "Connecting you to your assistant now.".to_string(),
                decline_message: "Sorry, this number is not available right now. Goodbye."
                    .to_string(),
            },
            vault: VaultConfig { encryption_key: None },
            api: ApiConfig { access_token: String::new().into() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Path of the file `load` would read, if any.
    pub fn discovered_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
        resolve_config_path(explicit_path)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(public_base_url) = server.public_base_url {
                self.server.public_base_url = Some(public_base_url);
            }
            if let Some(trusted_proxies) = server.trusted_proxies {
                self.server.trusted_proxies = trusted_proxies;
            }
        }

        if let Some(telephony) = patch.telephony {
            if let Some(auth_token) = telephony.auth_token {
                self.telephony.auth_token = secret_value(auth_token);
            }
            if let Some(validate_signatures) = telephony.validate_signatures {
                self.telephony.validate_signatures = validate_signatures;
            }
            if let Some(media_stream_url) = telephony.media_stream_url {
                self.telephony.media_stream_url = media_stream_url;
            }
            if let Some(greeting) = telephony.greeting {
                self.telephony.greeting = greeting;
            }
            if let Some(decline_message) = telephony.decline_message {
                self.telephony.decline_message = decline_message;
            }
        }

        if let Some(vault) = patch.vault {
            if let Some(encryption_key) = vault.encryption_key {
                self.vault.encryption_key = Some(secret_value(encryption_key));
            }
        }

        if let Some(api) = patch.api {
            if let Some(access_token) = api.access_token {
                self.api.access_token = secret_value(access_token);
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
        if let Some(value) = read_env("DIALGATE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("DIALGATE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("DIALGATE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("DIALGATE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("DIALGATE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DIALGATE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("DIALGATE_SERVER_PORT").or_else(|| read_env("PORT")) {
            self.server.port = parse_u16("DIALGATE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("DIALGATE_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = Some(value);
        }
        if let Some(value) = read_env("DIALGATE_SERVER_TRUSTED_PROXIES") {
            self.server.trusted_proxies =
                parse_ip_list("DIALGATE_SERVER_TRUSTED_PROXIES", &value)?;
        }

        if let Some(value) = read_env("DIALGATE_TELEPHONY_AUTH_TOKEN") {
            self.telephony.auth_token = secret_value(value);
        }
        if let Some(value) = read_env("DIALGATE_TELEPHONY_VALIDATE_SIGNATURES") {
            self.telephony.validate_signatures =
                parse_bool("DIALGATE_TELEPHONY_VALIDATE_SIGNATURES", &value)?;
        }
        if let Some(value) = read_env("DIALGATE_TELEPHONY_MEDIA_STREAM_URL") {
            self.telephony.media_stream_url = value;
        }
        if let Some(value) = read_env("DIALGATE_TELEPHONY_GREETING") {
            self.telephony.greeting = value;
        }
        if let Some(value) = read_env("DIALGATE_TELEPHONY_DECLINE_MESSAGE") {
            self.telephony.decline_message = value;
        }

        if let Some(value) = read_env("DIALGATE_VAULT_ENCRYPTION_KEY") {
            self.vault.encryption_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("DIALGATE_API_ACCESS_TOKEN") {
            self.api.access_token = secret_value(value);
        }

        let log_level =
            read_env("DIALGATE_LOGGING_LEVEL").or_else(|| read_env("DIALGATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DIALGATE_LOGGING_FORMAT").or_else(|| read_env("DIALGATE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(public_base_url) = overrides.public_base_url {
            self.server.public_base_url = Some(public_base_url);
        }
        if let Some(auth_token) = overrides.telephony_auth_token {
            self.telephony.auth_token = secret_value(auth_token);
        }
        if let Some(access_token) = overrides.api_access_token {
            self.api.access_token = secret_value(access_token);
        }
        if let Some(encryption_key) = overrides.vault_encryption_key {
            self.vault.encryption_key = Some(secret_value(encryption_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_telephony(&self.telephony, &self.logging)?;
        validate_api(&self.api)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
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
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
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
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if let Some(base_url) = &server.public_base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "server.public_base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_telephony(
    telephony: &TelephonyConfig,
    logging: &LoggingConfig,
) -> Result<(), ConfigError> {
    if telephony.validate_signatures {
        if telephony.auth_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "telephony.auth_token is required. Copy the Auth Token from the provider console \
                 or set DIALGATE_TELEPHONY_AUTH_TOKEN"
                    .to_string(),
            ));
        }
    } else {
        let level = logging.level.trim().to_ascii_lowercase();
        if level != "debug" && level != "trace" {
            return Err(ConfigError::Validation(
                "telephony.validate_signatures = false is only allowed with logging.level \
                 debug or trace"
                    .to_string(),
            ));
        }
    }

    let stream = telephony.media_stream_url.trim();
    if !stream.starts_with("wss://") && !stream.starts_with("ws://") {
        return Err(ConfigError::Validation(
            "telephony.media_stream_url must start with wss:// or ws://".to_string(),
        ));
    }

    if telephony.decline_message.trim().is_empty() {
        return Err(ConfigError::Validation(
            "telephony.decline_message must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_api(api: &ApiConfig) -> Result<(), ConfigError> {
    let token = api.access_token.expose_secret();
    if token.trim().is_empty() {
        return Err(ConfigError::Validation(
            "api.access_token is required (set DIALGATE_API_ACCESS_TOKEN)".to_string(),
        ));
    }
    if token.len() < 16 {
        return Err(ConfigError::Validation(
            "api.access_token must be at least 16 characters".to_string(),
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_ip_list(key: &str, value: &str) -> Result<Vec<IpAddr>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry.parse::<IpAddr>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
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

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    telephony: Option<TelephonyPatch>,
    vault: Option<VaultPatch>,
    api: Option<ApiPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    public_base_url: Option<String>,
    trusted_proxies: Option<Vec<IpAddr>>,
}

#[derive(Debug, Default, Deserialize)]
struct TelephonyPatch {
    auth_token: Option<String>,
    validate_signatures: Option<bool>,
    media_stream_url: Option<String>,
    greeting: Option<String>,
    decline_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VaultPatch {
    encryption_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiPatch {
    access_token: Option<String>,
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
    use std::net::{IpAddr, Ipv6Addr};
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const REQUIRED_VARS: [&str; 2] = ["DIALGATE_TELEPHONY_AUTH_TOKEN", "DIALGATE_API_ACCESS_TOKEN"];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_required_vars() {
        env::set_var("DIALGATE_TELEPHONY_AUTH_TOKEN", "provider-auth-token");
        env::set_var("DIALGATE_API_ACCESS_TOKEN", "api-access-token-0123456789");
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
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TELEPHONY_TOKEN", "token-from-env");
        env::set_var("TEST_API_TOKEN", "api-token-from-env-0001");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("dialgate.toml");
            fs::write(
                &path,
                r#"
[telephony]
auth_token = "${TEST_TELEPHONY_TOKEN}"

[api]
access_token = "${TEST_API_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.telephony.auth_token.expose_secret() == "token-from-env",
                "auth token should be loaded from environment",
            )?;
            ensure(
                config.api.access_token.expose_secret() == "api-token-from-env-0001",
                "api token should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_TELEPHONY_TOKEN", "TEST_API_TOKEN"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("dialgate.toml");
        fs::write(&path, "[vault]\nencryption_key = \"${DIALGATE_TEST_UNSET_KEY}\"\n")
            .map_err(|err| err.to_string())?;

        let error = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            .err()
            .ok_or_else(|| "expected interpolation failure".to_string())?;

        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "DIALGATE_TEST_UNSET_KEY"),
            "missing variable should be named",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("DIALGATE_LOG_LEVEL", "warn");
        env::set_var("DIALGATE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&REQUIRED_VARS);
        clear_vars(&["DIALGATE_LOG_LEVEL", "DIALGATE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DIALGATE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("DIALGATE_TELEPHONY_AUTH_TOKEN", "token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("dialgate.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 9090

[telephony]
auth_token = "token-from-file"

[api]
access_token = "api-token-from-file-0001"

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
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9090, "file port should win over defaults")?;
            ensure(
                config.telephony.auth_token.expose_secret() == "token-from-env",
                "env auth token should win over file and defaults",
            )?;
            ensure(
                config.api.access_token.expose_secret() == "api-token-from-file-0001",
                "file api token should be kept when env is unset",
            )?;
            Ok(())
        })();

        clear_vars(&["DIALGATE_DATABASE_URL", "DIALGATE_TELEPHONY_AUTH_TOKEN"]);
        result
    }

    #[test]
    fn trusted_proxies_load_from_file_and_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_required_vars();

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("dialgate.toml");
            fs::write(&path, "[server]\ntrusted_proxies = [\"10.0.0.1\", \"::1\"]\n")
                .map_err(|err| err.to_string())?;

            let from_file = AppConfig::load(LoadOptions {
                config_path: Some(path.clone()),
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                from_file.server.trusted_proxies
                    == vec![IpAddr::from([10, 0, 0, 1]), IpAddr::from(Ipv6Addr::LOCALHOST)],
                "file trusted proxies should be parsed",
            )?;

            env::set_var("DIALGATE_SERVER_TRUSTED_PROXIES", "192.0.2.10, 192.0.2.11");
            let from_env = AppConfig::load(LoadOptions {
                config_path: Some(path.clone()),
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                from_env.server.trusted_proxies
                    == vec![IpAddr::from([192, 0, 2, 10]), IpAddr::from([192, 0, 2, 11])],
                "env trusted proxies should replace the file list",
            )?;

            env::set_var("DIALGATE_SERVER_TRUSTED_PROXIES", "10.0.0.1,proxy.internal");
            let invalid = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(invalid, Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "DIALGATE_SERVER_TRUSTED_PROXIES"),
                "hostnames are not accepted as trusted proxies",
            )?;
            Ok(())
        })();

        clear_vars(&REQUIRED_VARS);
        clear_vars(&["DIALGATE_SERVER_TRUSTED_PROXIES"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DIALGATE_API_ACCESS_TOKEN", "api-access-token-0123456789");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("telephony.auth_token")
            );
            ensure(has_message, "validation failure should mention telephony.auth_token")
        })();

        clear_vars(&["DIALGATE_API_ACCESS_TOKEN"]);
        result
    }

    #[test]
    fn disabling_signature_checks_requires_debug_logging() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("DIALGATE_TELEPHONY_VALIDATE_SIGNATURES", "false");

        let result = (|| -> Result<(), String> {
            let rejected = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(rejected, Err(ConfigError::Validation(ref message)) if message.contains("validate_signatures")),
                "disabled signatures at info level should be rejected",
            )?;

            let accepted = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(!accepted.telephony.validate_signatures, "signature checks should be off")
        })();

        clear_vars(&REQUIRED_VARS);
        clear_vars(&["DIALGATE_TELEPHONY_VALIDATE_SIGNATURES"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_required_vars();
        env::set_var("DIALGATE_DATABASE_TIMEOUT_SECS", "soon");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "expected invalid override".to_string())?;
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "DIALGATE_DATABASE_TIMEOUT_SECS"),
                "invalid override should name the variable",
            )
        })();

        clear_vars(&REQUIRED_VARS);
        clear_vars(&["DIALGATE_DATABASE_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DIALGATE_TELEPHONY_AUTH_TOKEN", "auth-secret-value");
        env::set_var("DIALGATE_API_ACCESS_TOKEN", "api-secret-value-0001");
        env::set_var("DIALGATE_VAULT_ENCRYPTION_KEY", "vault-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("auth-secret-value"), "debug output should not contain auth token")?;
            ensure(!debug.contains("api-secret-value"), "debug output should not contain api token")?;
            ensure(!debug.contains("vault-secret-value"), "debug output should not contain vault key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&REQUIRED_VARS);
        clear_vars(&["DIALGATE_VAULT_ENCRYPTION_KEY"]);
        result
    }
}
