use crate::compile::compile_all;
use crate::index::RuleIndex;
use crate::metrics_defs::{NOTIFICATIONS_DROPPED, REFRESH_COUNT, REFRESH_FAILURES};
use crate::notification::{RELEASE_TOPIC, ReleaseMessage, parse_payload};
use crate::store::{RuleStore, StoreError};
use crate::types::ExactKey;
use shared::counter;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Re-reads a single scope from the rule store and replaces its index entry.
#[derive(Clone)]
pub struct Refresher {
    store: Arc<dyn RuleStore>,
    index: Arc<RuleIndex>,
}

impl Refresher {
    pub fn new(store: Arc<dyn RuleStore>, index: Arc<RuleIndex>) -> Self {
        Refresher { store, index }
    }

    /// Replaces the rules for one scope with what the store holds now.
    /// Returns the number of active rules indexed for the scope.
    pub async fn refresh(
        &self,
        app_id: &str,
        cluster_name: &str,
        namespace_name: &str,
    ) -> Result<usize, StoreError> {
        let key = ExactKey::new(app_id, cluster_name, namespace_name);
        let mut records = self
            .store
            .find_by(app_id, cluster_name, namespace_name)
            .await?;
        records.retain(|record| record.exact_key() == key);

        let rules = compile_all(&records);
        let count = rules.len();
        self.index.put(&key, rules);
        counter!(REFRESH_COUNT).increment(1);

        tracing::debug!(key = %key, rules = count, "Refreshed gray release rules");
        Ok(count)
    }

    pub async fn handle_message(&self, message: &ReleaseMessage) {
        if message.topic != RELEASE_TOPIC {
            tracing::debug!(topic = %message.topic, "Ignoring message on unrelated topic");
            return;
        }

        let scope = match parse_payload(&message.message) {
            Ok(scope) => scope,
            Err(err) => {
                counter!(NOTIFICATIONS_DROPPED).increment(1);
                tracing::warn!(error = %err, "Dropping release notification");
                return;
            }
        };

        if let Err(err) = self
            .refresh(scope.app_id, scope.cluster_name, scope.namespace_name)
            .await
        {
            // The next scan pass reconciles this scope.
            counter!(REFRESH_FAILURES).increment(1);
            tracing::error!(
                app_id = scope.app_id,
                cluster_name = scope.cluster_name,
                namespace_name = scope.namespace_name,
                error = %err,
                "Failed to refresh gray release rules"
            );
        }
    }

    /// Consumes notifications until every sender has been dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<ReleaseMessage>) {
        while let Some(message) = rx.recv().await {
            self.handle_message(&message).await;
        }
        tracing::info!("Notification channel closed, refresher stopped");
    }
}
