pub mod api;
mod compile;
pub mod config;
pub mod http_store;
pub mod index;
pub mod matcher;
pub mod metrics_defs;
pub mod notification;
pub mod refresher;
pub mod scanner;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

use config::{Config, ValidationError};
use http_store::HttpRuleStore;
use service::GrayReleaseRules;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ValidationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Starts the rule cache and serves the query and admin listeners until one fails.
pub async fn run(config: Config) -> Result<(), RunError> {
    config.validate()?;

    let store = Arc::new(HttpRuleStore::new(&config.rule_store.url));
    let rules = GrayReleaseRules::new(store, config.scan_settings());

    let readiness = rules.clone();
    let admin_service = AdminService::new(move || readiness.is_ready());

    let api_task = api::serve(&config.listener, rules.clone());
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let result = tokio::try_join!(api_task, admin_task);
    rules.shutdown().await;
    result?;
    Ok(())
}
