use crate::compile::RuleBuffers;
use crate::index::RuleIndex;
use crate::metrics_defs::{SCAN_DURATION, SCAN_ROWS};
use crate::refresher::Refresher;
use crate::store::{PAGE_SIZE, RuleStore, StoreError};
use crate::types::{ExactKey, GrayReleaseRuleRecord};
use shared::histogram;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("rule store error during scan: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, PartialEq)]
pub struct ScanSummary {
    pub rows: usize,
    pub keys: usize,
    pub evicted: usize,
}

/// Pages through the rule store and reconciles the index with it.
pub struct Scanner {
    store: Arc<dyn RuleStore>,
    index: Arc<RuleIndex>,
    refresher: Refresher,
    // Highest rule id seen so far.
    watermark: u64,
}

impl Scanner {
    pub fn new(store: Arc<dyn RuleStore>, index: Arc<RuleIndex>) -> Self {
        let refresher = Refresher::new(store.clone(), index.clone());
        Scanner {
            store,
            index,
            refresher,
            watermark: 0,
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Reads every rule from id 0 and rebuilds each key in the index.
    ///
    /// Keys that were indexed before the pass and have no active rules left
    /// are evicted, which covers rows deleted or deactivated without a
    /// notification. Nothing is applied unless every page was read.
    pub async fn full_scan(&mut self) -> Result<ScanSummary, ScanError> {
        let started = Instant::now();
        let existing = self.index.keys();

        let mut buffers = RuleBuffers::default();
        let mut cursor = 0;
        let mut rows = 0;

        loop {
            let page = self.store.list_since(cursor, PAGE_SIZE).await?;
            for record in &page {
                buffers.add(record);
                cursor = cursor.max(record.id);
            }
            rows += page.len();

            if page.len() < PAGE_SIZE {
                break;
            }
        }

        let stale: Vec<ExactKey> = existing
            .into_iter()
            .filter(|key| !buffers.contains(key))
            .collect();

        let buffers = buffers.into_inner();
        let summary = ScanSummary {
            rows,
            keys: buffers.len(),
            evicted: stale.len(),
        };

        for (key, rules) in buffers {
            self.index.put(&key, rules);
        }
        for key in &stale {
            self.index.put(key, Vec::new());
        }
        self.watermark = self.watermark.max(cursor);

        histogram!(SCAN_DURATION).record(started.elapsed().as_secs_f64());
        histogram!(SCAN_ROWS).record(rows as f64);
        tracing::info!(
            rows = summary.rows,
            keys = summary.keys,
            evicted = summary.evicted,
            watermark = self.watermark,
            "Completed full gray release rule scan"
        );

        Ok(summary)
    }

    /// Reads rules past the watermark only. Every scope touched by a new row
    /// is re-read in full through the refresher, so earlier rules of that
    /// scope are kept. Deletions of older rows are not seen here.
    pub async fn incremental_scan(&mut self) -> Result<ScanSummary, ScanError> {
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        loop {
            let page = self.store.list_since(self.watermark, PAGE_SIZE).await?;

            let mut touched: BTreeMap<ExactKey, &GrayReleaseRuleRecord> = BTreeMap::new();
            for record in &page {
                touched.entry(record.exact_key()).or_insert(record);
            }

            for record in touched.values() {
                self.refresher
                    .refresh(&record.app_id, &record.cluster_name, &record.namespace_name)
                    .await?;
            }

            // Only advance once every touched scope has been applied.
            if let Some(max_id) = page.iter().map(|record| record.id).max() {
                self.watermark = self.watermark.max(max_id);
            }
            summary.rows += page.len();
            summary.keys += touched.len();

            if page.len() < PAGE_SIZE {
                break;
            }
        }

        histogram!(SCAN_DURATION).record(started.elapsed().as_secs_f64());
        histogram!(SCAN_ROWS).record(summary.rows as f64);
        tracing::debug!(
            rows = summary.rows,
            keys = summary.keys,
            watermark = self.watermark,
            "Completed incremental gray release rule scan"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::find_release_id;
    use crate::testutils::{InMemoryRuleStore, record, rules_json};
    use crate::types::{BranchStatus, Client};

    fn scanner(store: &Arc<InMemoryRuleStore>) -> (Scanner, Arc<RuleIndex>) {
        let index = Arc::new(RuleIndex::new());
        (Scanner::new(store.clone(), index.clone()), index)
    }

    #[tokio::test]
    async fn test_full_scan_pages_through_store() {
        let records: Vec<GrayReleaseRuleRecord> = (1..=1200)
            .map(|id| {
                record(
                    id,
                    "app",
                    &format!("cluster{}", id % 7),
                    &format!("ns{id}"),
                    &rules_json("c", &["1.1.1.1"], &[]),
                    id,
                )
            })
            .collect();
        let store = Arc::new(InMemoryRuleStore::new(records));
        let (mut scanner, index) = scanner(&store);

        let summary = scanner.full_scan().await.unwrap();

        assert_eq!(summary.rows, 1200);
        assert_eq!(summary.keys, 1200);
        assert_eq!(index.len(), 1200);
        assert_eq!(scanner.watermark(), 1200);
        // 500 + 500 + 200
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_full_scan_evicts_rows_deleted_in_storage() {
        let store = Arc::new(InMemoryRuleStore::new(vec![
            record(1, "app", "default", "ns1", &rules_json("c", &["*"], &[]), 1),
            record(2, "app", "default", "ns2", &rules_json("c", &["*"], &[]), 2),
        ]));
        let (mut scanner, index) = scanner(&store);
        scanner.full_scan().await.unwrap();
        assert_eq!(index.len(), 2);

        store.replace_where(|r| r.namespace_name == "ns1", vec![]);
        let mut deactivated = record(2, "app", "default", "ns2", "[]", 2);
        deactivated.branch_status = BranchStatus::Deleted;
        store.replace_where(|r| r.id == 2, vec![deactivated]);

        let summary = scanner.full_scan().await.unwrap();
        assert_eq!(summary.evicted, 2);
        assert!(index.is_empty());
        assert!(index.keys_for_namespace("ns1").is_empty());
    }

    #[tokio::test]
    async fn test_full_scan_is_idempotent() {
        let store = Arc::new(InMemoryRuleStore::new(vec![record(
            1,
            "app",
            "default",
            "ns",
            &rules_json("c", &["1.1.1.1"], &[]),
            3,
        )]));
        let (mut scanner, index) = scanner(&store);

        let first = scanner.full_scan().await.unwrap();
        let second = scanner.full_scan().await.unwrap();

        assert_eq!(first, second);
        let client = Client::new("c", "1.1.1.1", None);
        assert_eq!(find_release_id(&index, &client, "app", "default", "ns"), Some(3));
    }

    #[tokio::test]
    async fn test_failed_scan_keeps_index_and_watermark() {
        let store = Arc::new(InMemoryRuleStore::new(vec![record(
            1,
            "app",
            "default",
            "ns",
            &rules_json("c", &["*"], &[]),
            3,
        )]));
        let (mut scanner, index) = scanner(&store);
        scanner.full_scan().await.unwrap();

        store.clear();
        store.set_failing(true);
        assert!(matches!(
            scanner.full_scan().await,
            Err(ScanError::Store(StoreError::Unavailable(_)))
        ));
        assert!(scanner.incremental_scan().await.is_err());

        assert_eq!(index.len(), 1);
        assert_eq!(scanner.watermark(), 1);
    }

    #[tokio::test]
    async fn test_failure_on_later_page_applies_nothing() {
        let store = Arc::new(InMemoryRuleStore::new(vec![record(
            1,
            "app",
            "default",
            "ns",
            &rules_json("c", &["*"], &[]),
            3,
        )]));
        let (mut scanner, index) = scanner(&store);
        scanner.full_scan().await.unwrap();

        store.clear();
        for id in 2..=700 {
            store.insert(record(
                id,
                "app",
                "default",
                &format!("ns{id}"),
                &rules_json("c", &["*"], &[]),
                id,
            ));
        }
        store.fail_after_pages(1);

        assert!(matches!(
            scanner.full_scan().await,
            Err(ScanError::Store(StoreError::Unavailable(_)))
        ));

        // The first page of 500 rows was read but none of it was applied,
        // and the key that disappeared from storage was not evicted.
        assert_eq!(index.len(), 1);
        assert!(index.keys_for_namespace("ns2").is_empty());
        let client = Client::new("c", "1.1.1.1", None);
        assert_eq!(find_release_id(&index, &client, "app", "default", "ns"), Some(3));
        assert_eq!(scanner.watermark(), 1);
    }

    #[tokio::test]
    async fn test_incremental_scan_refreshes_touched_scopes() {
        let store = Arc::new(InMemoryRuleStore::new(vec![record(
            1,
            "app",
            "default",
            "ns",
            &rules_json("c1", &["1.1.1.1"], &[]),
            1,
        )]));
        let (mut scanner, index) = scanner(&store);
        scanner.full_scan().await.unwrap();

        let mut other_branch = record(2, "app", "default", "ns", &rules_json("c2", &["2.2.2.2"], &[]), 2);
        other_branch.branch_name = "otherBranch".into();
        store.insert(other_branch);
        store.insert(record(3, "other", "default", "ns", &rules_json("c3", &["*"], &[]), 3));

        let summary = scanner.incremental_scan().await.unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.keys, 2);
        assert_eq!(scanner.watermark(), 3);

        // The existing rule of the touched scope is kept alongside the new one.
        let rules = index.get(&ExactKey::new("app", "default", "ns")).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(index.keys_for_namespace("ns").len(), 2);

        let again = scanner.incremental_scan().await.unwrap();
        assert_eq!(again, ScanSummary::default());
    }
}
