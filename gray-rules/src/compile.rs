//! Turns rule store records into the compiled rules held by the index.

use crate::metrics_defs::{MALFORMED_RULES, UNRELEASED_RULES};
use crate::types::{CompiledRule, ExactKey, GrayReleaseRuleRecord, ReleaseId, RuleItem};
use serde::Deserialize;
use shared::counter;
use std::collections::{BTreeMap, HashSet};

#[derive(thiserror::Error, Debug)]
#[error("malformed rule items for rule {rule_id}: {source}")]
pub struct RuleParseError {
    pub rule_id: u64,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleItemPayload {
    client_app_id: String,
    #[serde(default)]
    client_ip_list: HashSet<String>,
    #[serde(default)]
    client_label_list: HashSet<String>,
}

pub fn parse_rule_items(rule_id: u64, payload: &str) -> Result<Vec<RuleItem>, RuleParseError> {
    let items: Vec<RuleItemPayload> = serde_json::from_str(payload)
        .map_err(|source| RuleParseError { rule_id, source })?;

    Ok(items
        .into_iter()
        .map(|item| {
            RuleItem::new(
                &item.client_app_id,
                item.client_ip_list,
                item.client_label_list,
            )
        })
        .collect())
}

/// Compiles an ACTIVE, released record. Returns None for inactive records,
/// for records without a release and for records whose rule items cannot
/// be parsed.
pub fn compile(record: &GrayReleaseRuleRecord) -> Option<CompiledRule> {
    if !record.is_active() {
        return None;
    }
    let release_id = released(record)?;

    match parse_rule_items(record.id, &record.rules) {
        Ok(items) => Some(CompiledRule {
            rule_id: record.id,
            branch_name: record.branch_name.clone(),
            release_id,
            items,
        }),
        Err(err) => {
            counter!(MALFORMED_RULES).increment(1);
            tracing::warn!(
                rule_id = record.id,
                app_id = %record.app_id,
                cluster_name = %record.cluster_name,
                namespace_name = %record.namespace_name,
                error = %err,
                "Skipping gray release rule with malformed rule items"
            );
            None
        }
    }
}

fn released(record: &GrayReleaseRuleRecord) -> Option<ReleaseId> {
    let release_id = record.released_id();
    if release_id.is_none() {
        counter!(UNRELEASED_RULES).increment(1);
        tracing::warn!(
            rule_id = record.id,
            app_id = %record.app_id,
            cluster_name = %record.cluster_name,
            namespace_name = %record.namespace_name,
            branch_name = %record.branch_name,
            "Skipping gray release rule without a release"
        );
    }
    release_id
}

struct BranchEntry {
    branch_name: String,
    rule_id: u64,
    // None when the newest row of the branch is not ACTIVE.
    rule: Option<CompiledRule>,
}

/// The newest released row of each branch under one key.
///
/// A newer row replaces the older row of the same branch even when it is no
/// longer ACTIVE, which hides the older rule. A non-ACTIVE row for a branch
/// that has no entry yet is ignored. Rows without a release and rows with
/// malformed rule items are skipped and replace nothing.
#[derive(Default)]
pub struct KeyRules {
    entries: Vec<BranchEntry>,
}

impl KeyRules {
    pub fn push(&mut self, record: &GrayReleaseRuleRecord) {
        let existing = self
            .entries
            .iter()
            .position(|entry| entry.branch_name == record.branch_name);

        match existing {
            Some(pos) if self.entries[pos].rule_id >= record.id => return,
            None if !record.is_active() => return,
            _ => {}
        }

        let rule = if record.is_active() {
            let Some(rule) = compile(record) else {
                return;
            };
            Some(rule)
        } else if released(record).is_none() {
            return;
        } else {
            None
        };

        if let Some(pos) = existing {
            self.entries.remove(pos);
        }
        self.entries.push(BranchEntry {
            branch_name: record.branch_name.clone(),
            rule_id: record.id,
            rule,
        });
    }

    /// ACTIVE rules in the order their newest rows were loaded.
    pub fn into_rules(self) -> Vec<CompiledRule> {
        self.entries
            .into_iter()
            .filter_map(|entry| entry.rule)
            .collect()
    }
}

/// Compiles the records for a single key, ordered by ascending rule id.
pub fn compile_all(records: &[GrayReleaseRuleRecord]) -> Vec<CompiledRule> {
    let mut sorted: Vec<&GrayReleaseRuleRecord> = records.iter().collect();
    sorted.sort_by_key(|record| record.id);

    let mut rules = KeyRules::default();
    for record in sorted {
        rules.push(record);
    }
    rules.into_rules()
}

/// Per-key buffers built up over a scan pass. Records must be added in
/// ascending id order.
#[derive(Default)]
pub struct RuleBuffers {
    buffers: BTreeMap<ExactKey, KeyRules>,
}

impl RuleBuffers {
    pub fn add(&mut self, record: &GrayReleaseRuleRecord) {
        self.buffers.entry(record.exact_key()).or_default().push(record);
    }

    /// Whether the pass produced at least one ACTIVE rule for `key`.
    pub fn contains(&self, key: &ExactKey) -> bool {
        self.buffers
            .get(key)
            .is_some_and(|rules| rules.entries.iter().any(|entry| entry.rule.is_some()))
    }

    /// Non-empty rule lists per key.
    pub fn into_inner(self) -> BTreeMap<ExactKey, Vec<CompiledRule>> {
        self.buffers
            .into_iter()
            .map(|(key, rules)| (key, rules.into_rules()))
            .filter(|(_, rules)| !rules.is_empty())
            .collect()
    }
}
