use crate::store::{RuleStore, StoreError};
use crate::types::{BranchStatus, GrayReleaseRuleRecord, ReleaseId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub fn rules_json(client_app_id: &str, ips: &[&str], labels: &[&str]) -> String {
    serde_json::json!([{
        "clientAppId": client_app_id,
        "clientIpList": ips,
        "clientLabelList": labels,
    }])
    .to_string()
}

pub fn record(
    id: u64,
    app_id: &str,
    cluster_name: &str,
    namespace_name: &str,
    rules: &str,
    release_id: ReleaseId,
) -> GrayReleaseRuleRecord {
    GrayReleaseRuleRecord {
        id,
        app_id: app_id.into(),
        cluster_name: cluster_name.into(),
        namespace_name: namespace_name.into(),
        branch_name: "someBranch".into(),
        rules: rules.into(),
        release_id: Some(release_id),
        branch_status: BranchStatus::Active,
    }
}

/// Rule store backed by a vector, with switchable failures.
#[derive(Default)]
pub struct InMemoryRuleStore {
    records: Mutex<Vec<GrayReleaseRuleRecord>>,
    failing: AtomicBool,
    // list_since calls past this count fail.
    fail_after: Mutex<Option<usize>>,
    list_calls: AtomicUsize,
}

impl InMemoryRuleStore {
    pub fn new(records: Vec<GrayReleaseRuleRecord>) -> Self {
        InMemoryRuleStore {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn insert(&self, record: GrayReleaseRuleRecord) {
        self.records.lock().push(record);
    }

    /// Replaces every record matching the predicate's scope with `replacement`.
    pub fn replace_where<F>(&self, mut remove: F, replacement: Vec<GrayReleaseRuleRecord>)
    where
        F: FnMut(&GrayReleaseRuleRecord) -> bool,
    {
        let mut records = self.records.lock();
        records.retain(|r| !remove(r));
        records.extend(replacement);
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Lets the next `pages` list calls succeed and fails every one after.
    pub fn fail_after_pages(&self, pages: usize) {
        *self.fail_after.lock() = Some(self.list_calls() + pages);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list_since(
        &self,
        id: u64,
        limit: usize,
    ) -> Result<Vec<GrayReleaseRuleRecord>, StoreError> {
        let calls = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.check()?;
        if self.fail_after.lock().is_some_and(|limit| calls > limit) {
            return Err(StoreError::Unavailable("injected page failure".into()));
        }
        let mut page: Vec<GrayReleaseRuleRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.id > id)
            .cloned()
            .collect();
        page.sort_by_key(|r| r.id);
        page.truncate(limit);
        Ok(page)
    }

    async fn find_by(
        &self,
        app_id: &str,
        cluster_name: &str,
        namespace_name: &str,
    ) -> Result<Vec<GrayReleaseRuleRecord>, StoreError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| {
                r.app_id.eq_ignore_ascii_case(app_id)
                    && r.cluster_name.eq_ignore_ascii_case(cluster_name)
                    && r.namespace_name.eq_ignore_ascii_case(namespace_name)
            })
            .cloned()
            .collect())
    }
}

/// Polls `condition` until it holds or a couple of seconds have passed.
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}
