use std::env;
use std::sync::{Mutex, OnceLock};

use dialgate_cli::commands::blueprint::{self, BlueprintArgs};
use dialgate_cli::commands::{config, doctor, keygen, migrate};
use serde_json::Value;

const VAULT_KEY: &str = "4242424242424242424242424242424242424242424242424242424242424242";

fn base_env() -> Vec<(&'static str, &'static str)> {
    vec![
        ("DIALGATE_TELEPHONY_AUTH_TOKEN", "provider-auth-token"),
        ("DIALGATE_API_ACCESS_TOKEN", "api-access-token-0123456789"),
        ("DIALGATE_DATABASE_URL", "sqlite::memory:"),
    ]
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&base_env(), || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied migrations: 1 (dialgate core)");
        assert_eq!(payload["details"]["schema_version"], 1);
        assert_eq!(payload["details"]["applied"][0]["version"], 1);
    });
}

#[test]
fn migrate_returns_config_failure_without_api_token() {
    with_env(&[("DIALGATE_TELEPHONY_AUTH_TOKEN", "provider-auth-token")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("api.access_token"));
    });
}

#[test]
fn doctor_passes_with_vault_key_and_reachable_database() {
    let mut vars = base_env();
    vars.push(("DIALGATE_VAULT_ENCRYPTION_KEY", VAULT_KEY));
    with_env(&vars, || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "unexpected report: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        let names: Vec<&str> = payload["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(names, ["config_validation", "vault_key_readiness", "database_connectivity"]);
    });
}

#[test]
fn doctor_flags_missing_vault_key() {
    with_env(&base_env(), || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(payload["checks"][1]["name"], "vault_key_readiness");
        assert_eq!(payload["checks"][1]["status"], "fail");
        assert_eq!(payload["checks"][2]["status"], "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] vault_key_readiness"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

#[test]
fn config_output_attributes_sources_and_redacts_secrets() {
    let mut vars = base_env();
    vars.push(("DIALGATE_VAULT_ENCRYPTION_KEY", VAULT_KEY));
    vars.push(("PORT", "9191"));
    vars.push(("DIALGATE_SERVER_TRUSTED_PROXIES", "10.0.0.1, 10.0.0.2"));
    with_env(&vars, || {
        let output = config::run();

        assert!(output.contains("- database.url = sqlite::memory: (source: env (DIALGATE_DATABASE_URL))"));
        assert!(output.contains("- server.port = 9191 (source: env (PORT))"));
        assert!(output.contains("- logging.level = info (source: default)"));
        assert!(output.contains("- api.access_token = <redacted>"));
        assert!(output.contains("- server.public_base_url = <unset> (source: default)"));
        assert!(output.contains(
            "- server.trusted_proxies = 10.0.0.1,10.0.0.2 (source: env (DIALGATE_SERVER_TRUSTED_PROXIES))"
        ));
        assert!(!output.contains("api-access-token-0123456789"));
        assert!(!output.contains("provider-auth-token"));
        assert!(!output.contains(VAULT_KEY));
    });
}

#[test]
fn keygen_emits_a_usable_hex_key() {
    let result = keygen::run();
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    let key = payload["message"].as_str().expect("key message");
    assert_eq!(key.len(), 64);
    assert!(key.bytes().all(|byte| byte.is_ascii_hexdigit()));
    assert_ne!(key, parse_payload(&keygen::run().output)["message"].as_str().unwrap_or_default());
}

#[test]
fn blueprint_prints_the_importable_document() {
    let result = blueprint::run(BlueprintArgs {
        url: "https://gateway.example.com/api/webhooks/ingest".to_string(),
        secret: "relay-secret".to_string(),
        name: "Front Desk".to_string(),
        workflow_name: Some("Front Desk Relay".to_string()),
        active: false,
    });
    assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

    let document = parse_payload(&result.output);
    assert_eq!(document["name"], "Front Desk Relay");
    assert_eq!(document["nodes"].as_array().map(Vec::len), Some(2));
}

#[test]
fn blueprint_rejects_non_http_url() {
    let result = blueprint::run(BlueprintArgs {
        url: "ftp://gateway.example.com/ingest".to_string(),
        secret: "relay-secret".to_string(),
        name: "Front Desk".to_string(),
        workflow_name: None,
        active: false,
    });
    assert_eq!(result.exit_code, 2);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "blueprint");
    assert_eq!(payload["error_class"], "validation");
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "DIALGATE_API_ACCESS_TOKEN",
        "DIALGATE_DATABASE_MAX_CONNECTIONS",
        "DIALGATE_DATABASE_TIMEOUT_SECS",
        "DIALGATE_DATABASE_URL",
        "DIALGATE_LOGGING_FORMAT",
        "DIALGATE_LOGGING_LEVEL",
        "DIALGATE_LOG_FORMAT",
        "DIALGATE_LOG_LEVEL",
        "DIALGATE_SERVER_BIND_ADDRESS",
        "DIALGATE_SERVER_PORT",
        "DIALGATE_SERVER_PUBLIC_BASE_URL",
        "DIALGATE_SERVER_TRUSTED_PROXIES",
        "DIALGATE_TELEPHONY_AUTH_TOKEN",
        "DIALGATE_TELEPHONY_DECLINE_MESSAGE",
        "DIALGATE_TELEPHONY_GREETING",
        "DIALGATE_TELEPHONY_MEDIA_STREAM_URL",
        "DIALGATE_TELEPHONY_VALIDATE_SIGNATURES",
        "DIALGATE_VAULT_ENCRYPTION_KEY",
        "PORT",
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
