use axum::response::Response;
use secrecy::SecretString;
use serde_json::Value;

use dialgate_core::config::{
    ApiConfig, AppConfig, DatabaseConfig, LogFormat, LoggingConfig, ServerConfig,
    TelephonyConfig, VaultConfig,
};

pub const AUTH_TOKEN: &str = "test-provider-auth-token";
pub const API_TOKEN: &str = "test-api-token-0123456789";

pub fn test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 30,
        },
        server: ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            public_base_url: None,
            trusted_proxies: Vec::new(),
        },
        telephony: TelephonyConfig {
            auth_token: SecretString::from(AUTH_TOKEN.to_string()),
            validate_signatures: true,
            media_stream_url: "wss://bridge.example.com/media-stream".to_string(),
            greeting: "Connecting you now.".to_string(),
            decline_message: "Sorry, this number is not taking calls.".to_string(),
        },
        vault: VaultConfig { encryption_key: Some(SecretString::from("42".repeat(32))) },
        api: ApiConfig { access_token: SecretString::from(API_TOKEN.to_string()) },
        logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
    }
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("json body")
}
