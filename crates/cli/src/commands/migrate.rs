use serde_json::json;

use crate::commands::CommandResult;
use dialgate_core::config::{AppConfig, LoadOptions};
use dialgate_db::migrations::{self, AppliedMigration, MIGRATOR};
use dialgate_db::connect_with_settings;

const EXIT_CONFIG: u8 = 2;
const EXIT_RUNTIME: u8 = 3;
const EXIT_CONNECT: u8 = 4;
const EXIT_MIGRATION: u8 = 5;

/// Applies pending schema steps and reports which versions this run brought in.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    let outcome = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), EXIT_CONNECT))?;
        let applied = migrations::run_pending(&pool).await;
        pool.close().await;
        applied.map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))
    });

    match outcome {
        Ok(applied) => report(&applied),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

fn report(applied: &[AppliedMigration]) -> CommandResult {
    let schema_version = MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .map(|migration| migration.version)
        .max()
        .unwrap_or_default();
    let message = if applied.is_empty() {
        format!("schema already at version {schema_version}")
    } else {
        let versions = applied
            .iter()
            .map(|migration| format!("{} ({})", migration.version, migration.description))
            .collect::<Vec<_>>()
            .join(", ");
        format!("applied migrations: {versions}")
    };
    let details = json!({
        "schema_version": schema_version,
        "applied": applied
            .iter()
            .map(|migration| json!({ "version": migration.version, "description": migration.description }))
            .collect::<Vec<_>>(),
    });
    CommandResult::success_with_details("migrate", message, Some(details))
}
