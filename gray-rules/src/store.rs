use crate::types::GrayReleaseRuleRecord;
use async_trait::async_trait;

/// Number of records requested per page when scanning the rule store.
pub const PAGE_SIZE: usize = 500;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("rule store returned {0} after retries")]
    RetriesExceeded(reqwest::StatusCode),
    #[error("rule store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the persistent gray release rule table.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Up to `limit` records with an id greater than `id`, ascending by id.
    async fn list_since(
        &self,
        id: u64,
        limit: usize,
    ) -> Result<Vec<GrayReleaseRuleRecord>, StoreError>;

    /// All records for an (app, cluster, namespace) scope, regardless of status.
    async fn find_by(
        &self,
        app_id: &str,
        cluster_name: &str,
        namespace_name: &str,
    ) -> Result<Vec<GrayReleaseRuleRecord>, StoreError>;
}
