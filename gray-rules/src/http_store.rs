const BASE_DELAY: u64 = 500;
const MAX_RETRIES: u32 = 3;

use crate::store::{RuleStore, StoreError};
use crate::types::GrayReleaseRuleRecord;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tokio::time::{Duration, sleep};

/// Rule store served by the configuration admin service over HTTP.
pub struct HttpRuleStore {
    client: reqwest::Client,
    full_url: String,
}

impl HttpRuleStore {
    pub fn new(base_url: &str) -> Self {
        let full_url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            "gray-release-rules"
        );

        HttpRuleStore {
            client: reqwest::Client::new(),
            full_url,
        }
    }

    async fn fetch(&self, query: &[(&str, &str)]) -> Result<Vec<GrayReleaseRuleRecord>, StoreError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let mut url =
            Url::parse(&self.full_url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().extend_pairs(query);

        let mut retries = 0;
        loop {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response.json::<Vec<GrayReleaseRuleRecord>>().await?);
            }

            if RETRIABLE_STATUS_CODES.contains(&status) && retries < MAX_RETRIES {
                let retry_millis = BASE_DELAY * 2_u64.pow(retries);
                tracing::debug!(%status, retry_millis, "Retrying rule store request");
                sleep(Duration::from_millis(retry_millis)).await;
                retries += 1;
                continue;
            }

            return Err(StoreError::RetriesExceeded(status));
        }
    }
}

#[async_trait]
impl RuleStore for HttpRuleStore {
    async fn list_since(
        &self,
        id: u64,
        limit: usize,
    ) -> Result<Vec<GrayReleaseRuleRecord>, StoreError> {
        let id = id.to_string();
        let limit = limit.to_string();
        self.fetch(&[("sinceId", &id), ("limit", &limit)]).await
    }

    async fn find_by(
        &self,
        app_id: &str,
        cluster_name: &str,
        namespace_name: &str,
    ) -> Result<Vec<GrayReleaseRuleRecord>, StoreError> {
        self.fetch(&[
            ("appId", app_id),
            ("clusterName", cluster_name),
            ("namespaceName", namespace_name),
        ])
        .await
    }
}
