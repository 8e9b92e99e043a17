use std::net::IpAddr;
use std::sync::Arc;

use secrecy::SecretString;

use dialgate_core::config::AppConfig;
use dialgate_core::ratelimit::{RateLimitStore, RateLimiter};
use dialgate_core::signature::WebhookGate;
use dialgate_core::vault::SecretVault;
use dialgate_db::repositories::{
    ActivityRepository, AgentRepository, CallReportRepository, CallSessionRepository,
    SqlActivityRepository, SqlAgentRepository, SqlCallReportRepository, SqlCallSessionRepository,
    SqlRateLimitStore,
};
use dialgate_db::DbPool;

use crate::calls::CallOrchestrator;
use crate::twiml::TwimlRenderer;

/// Storage seams the handlers talk to.
#[derive(Clone)]
pub struct Repositories {
    pub agents: Arc<dyn AgentRepository>,
    pub sessions: Arc<dyn CallSessionRepository>,
    pub activity: Arc<dyn ActivityRepository>,
    pub reports: Arc<dyn CallReportRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            agents: Arc::new(SqlAgentRepository::new(pool.clone())),
            sessions: Arc::new(SqlCallSessionRepository::new(pool.clone())),
            activity: Arc::new(SqlActivityRepository::new(pool.clone())),
            reports: Arc::new(SqlCallReportRepository::new(pool)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repositories: Repositories,
    pub orchestrator: Arc<CallOrchestrator>,
    pub limiter: RateLimiter,
    /// `None` only when signature validation is switched off for local development.
    pub gate: Option<Arc<WebhookGate>>,
    pub vault: Arc<SecretVault>,
    pub api_token: SecretString,
    pub public_base_url: Option<String>,
    pub trusted_proxies: Arc<[IpAddr]>,
    pub twiml: Arc<TwimlRenderer>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        repositories: Repositories,
        rate_limit_store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, tera::Error> {
        let gate = config.telephony.validate_signatures.then(|| {
            Arc::new(WebhookGate::new(
                config.telephony.auth_token.clone(),
                config.server.public_base_url.clone(),
            ))
        });

        Ok(Self {
            orchestrator: Arc::new(CallOrchestrator::new(
                repositories.agents.clone(),
                repositories.sessions.clone(),
            )),
            repositories,
            limiter: RateLimiter::new(rate_limit_store),
            gate,
            vault: Arc::new(SecretVault::new(config.vault.encryption_key.clone())),
            api_token: config.api.access_token.clone(),
            public_base_url: config.server.public_base_url.clone(),
            trusted_proxies: config.server.trusted_proxies.clone().into(),
            twiml: Arc::new(TwimlRenderer::new(&config.telephony)?),
        })
    }

    pub fn from_pool(config: &AppConfig, pool: DbPool) -> Result<Self, tera::Error> {
        let store = Arc::new(SqlRateLimitStore::new(pool.clone()));
        Self::new(config, Repositories::sql(pool), store)
    }
}
