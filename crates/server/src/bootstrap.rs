use dialgate_core::config::{AppConfig, ConfigError, LoadOptions};
use dialgate_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::{info, warn};

use crate::state::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("twiml templates failed to load: {0}")]
    Templates(#[source] tera::Error),
}

#[cfg_attr(not(test), allow(dead_code))]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    let applied = migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        applied = applied.len(),
        "database migrations applied"
    );

    if !config.telephony.validate_signatures {
        warn!(
            event_name = "system.bootstrap.signatures_disabled",
            "webhook signature validation is disabled"
        );
    }
    let state = AppState::from_pool(&config, db_pool.clone()).map_err(BootstrapError::Templates)?;
    if !state.vault.is_configured() {
        warn!(
            event_name = "system.bootstrap.vault_unconfigured",
            "vault key missing or unusable, agent provisioning will fail"
        );
    }

    Ok(Application { config, db_pool, state })
}
