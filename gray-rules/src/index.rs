use crate::metrics_defs::INDEXED_KEYS;
use crate::types::{CompiledRule, ExactKey};
use parking_lot::RwLock;
use shared::gauge;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type RuleList = Arc<[CompiledRule]>;

#[derive(Default)]
struct IndexData {
    by_exact_key: HashMap<ExactKey, RuleList>,
    // Lower-cased namespace name to every exact key with at least one rule.
    by_namespace: HashMap<String, HashSet<ExactKey>>,
}

/// In-memory index of compiled gray release rules.
///
/// Rule lists are immutable once stored. A write builds the new list before
/// taking the lock and only swaps it in, so readers see either the old or
/// the new list for a key, never a mix. Both maps are updated under the same
/// write guard, so a key is registered under its namespace exactly when it
/// has a non-empty list.
#[derive(Default)]
pub struct RuleIndex {
    data: RwLock<IndexData>,
}

impl RuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the rule list for `key`. An empty list removes the key.
    pub fn put(&self, key: &ExactKey, rules: Vec<CompiledRule>) {
        let rules: Option<RuleList> = (!rules.is_empty()).then(|| rules.into());

        let mut write_guard = self.data.write();
        match rules {
            Some(rules) => {
                write_guard.by_exact_key.insert(key.clone(), rules);
                write_guard
                    .by_namespace
                    .entry(key.namespace_name().to_string())
                    .or_default()
                    .insert(key.clone());
            }
            None => {
                write_guard.by_exact_key.remove(key);
                if let Some(keys) = write_guard.by_namespace.get_mut(key.namespace_name()) {
                    keys.remove(key);
                    if keys.is_empty() {
                        write_guard.by_namespace.remove(key.namespace_name());
                    }
                }
            }
        }
        gauge!(INDEXED_KEYS).set(write_guard.by_exact_key.len() as f64);
    }

    pub fn get(&self, key: &ExactKey) -> Option<RuleList> {
        self.data.read().by_exact_key.get(key).cloned()
    }

    /// Exact keys registered under a lower-cased namespace name.
    pub fn keys_for_namespace(&self, namespace_name: &str) -> Vec<ExactKey> {
        self.data
            .read()
            .by_namespace
            .get(namespace_name)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<ExactKey> {
        self.data.read().by_exact_key.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.read().by_exact_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
