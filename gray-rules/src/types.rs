use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// Joins app, cluster and namespace names in keys and notification payloads.
pub const KEY_SEPARATOR: char = '+';

/// Matches any client IP or any present client label.
pub const WILDCARD: &str = "*";

pub type ReleaseId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "i32")]
pub enum BranchStatus {
    Deleted,
    Active,
    Merged,
    Unknown(i32),
}

impl From<i32> for BranchStatus {
    fn from(value: i32) -> Self {
        match value {
            0 => BranchStatus::Deleted,
            1 => BranchStatus::Active,
            2 => BranchStatus::Merged,
            other => BranchStatus::Unknown(other),
        }
    }
}

impl From<BranchStatus> for i32 {
    fn from(status: BranchStatus) -> Self {
        match status {
            BranchStatus::Deleted => 0,
            BranchStatus::Active => 1,
            BranchStatus::Merged => 2,
            BranchStatus::Unknown(other) => other,
        }
    }
}

/// A gray release rule row as returned by the rule store.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrayReleaseRuleRecord {
    pub id: u64,
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
    pub branch_name: String,
    // Serialized list of rule items, parsed when the record is compiled.
    pub rules: String,
    // Null or 0 for a branch that was never released.
    #[serde(default)]
    pub release_id: Option<ReleaseId>,
    pub branch_status: BranchStatus,
}

impl GrayReleaseRuleRecord {
    pub fn is_active(&self) -> bool {
        self.branch_status == BranchStatus::Active
    }

    /// The release this row points at, unless the branch was never released.
    pub fn released_id(&self) -> Option<ReleaseId> {
        self.release_id.filter(|id| *id != 0)
    }

    pub fn exact_key(&self) -> ExactKey {
        ExactKey::new(&self.app_id, &self.cluster_name, &self.namespace_name)
    }
}

/// Lower-cased (app, cluster, namespace) scope that gray rules are grouped under.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExactKey {
    app_id: String,
    cluster_name: String,
    namespace_name: String,
}

impl ExactKey {
    pub fn new(app_id: &str, cluster_name: &str, namespace_name: &str) -> Self {
        ExactKey {
            app_id: app_id.to_lowercase(),
            cluster_name: cluster_name.to_lowercase(),
            namespace_name: namespace_name.to_lowercase(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// The namespace key this exact key is registered under.
    pub fn namespace_name(&self) -> &str {
        &self.namespace_name
    }
}

impl fmt::Display for ExactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.app_id, self.cluster_name, self.namespace_name
        )
    }
}

/// The identity a client presents when asking for its configuration.
#[derive(Clone, Debug)]
pub struct Client<'a> {
    app_id: String,
    ip: &'a str,
    label: Option<&'a str>,
}

impl<'a> Client<'a> {
    pub fn new(app_id: &str, ip: &'a str, label: Option<&'a str>) -> Self {
        Client {
            app_id: app_id.to_lowercase(),
            ip,
            label,
        }
    }

    /// Lower-cased app id.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn ip(&self) -> &'a str {
        self.ip
    }

    pub fn label(&self) -> Option<&'a str> {
        self.label
    }
}

/// One clause of a rule: a client app plus the IPs and labels it applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleItem {
    client_app_id: String,
    client_ips: HashSet<String>,
    client_labels: HashSet<String>,
}

impl RuleItem {
    pub fn new<I, L>(client_app_id: &str, client_ips: I, client_labels: L) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        RuleItem {
            client_app_id: client_app_id.to_lowercase(),
            client_ips: client_ips.into_iter().map(Into::into).collect(),
            client_labels: client_labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, client: &Client<'_>) -> bool {
        if self.client_app_id != client.app_id() {
            return false;
        }
        self.ip_matches(client.ip()) || self.label_matches(client.label())
    }

    fn ip_matches(&self, ip: &str) -> bool {
        self.client_ips.contains(WILDCARD) || self.client_ips.contains(ip)
    }

    fn label_matches(&self, label: Option<&str>) -> bool {
        match label {
            Some(label) if !label.trim().is_empty() => {
                self.client_labels.contains(WILDCARD) || self.client_labels.contains(label)
            }
            _ => false,
        }
    }
}

/// An ACTIVE rule with its items parsed, as held by the index.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledRule {
    pub rule_id: u64,
    pub branch_name: String,
    pub release_id: ReleaseId,
    pub items: Vec<RuleItem>,
}

impl CompiledRule {
    pub fn matches(&self, client: &Client<'_>) -> bool {
        self.items.iter().any(|item| item.matches(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> RuleItem {
        RuleItem::new("clientAppId1", ["1.1.1.1"], ["myLabel"])
    }

    #[test]
    fn test_item_matches_ip_or_label() {
        let item = item();

        assert!(item.matches(&Client::new("clientAppId1", "1.1.1.1", Some("other"))));
        assert!(item.matches(&Client::new("clientAppId1", "9.9.9.9", Some("myLabel"))));
        assert!(!item.matches(&Client::new("clientAppId1", "9.9.9.9", Some("other"))));
        assert!(!item.matches(&Client::new("clientAppId2", "1.1.1.1", Some("myLabel"))));
    }

    #[test]
    fn test_item_app_id_case_insensitive() {
        let item = item();
        let client = Client::new("CLIENTAPPID1", "1.1.1.1", None);
        assert_eq!(client.app_id(), "clientappid1");
        assert!(item.matches(&client));
    }

    #[test]
    fn test_absent_label_never_matches() {
        let item = RuleItem::new("app", Vec::<String>::new(), [WILDCARD]);

        assert!(!item.matches(&Client::new("app", "1.1.1.1", None)));
        assert!(!item.matches(&Client::new("app", "1.1.1.1", Some("  "))));
        assert!(item.matches(&Client::new("app", "1.1.1.1", Some("any"))));
    }

    #[test]
    fn test_label_is_matched_as_sent() {
        let item = item();

        assert!(!item.matches(&Client::new("clientAppId1", "9.9.9.9", Some("  myLabel "))));
        assert!(!item.matches(&Client::new("clientAppId1", "9.9.9.9", Some("mylabel"))));
        assert!(item.matches(&Client::new("clientAppId1", "9.9.9.9", Some("myLabel"))));
    }

    #[test]
    fn test_wildcard_ip() {
        let item = RuleItem::new("app", [WILDCARD], Vec::<String>::new());
        assert!(item.matches(&Client::new("app", "10.0.0.7", None)));
        assert!(!item.matches(&Client::new("other", "10.0.0.7", None)));
    }

    #[test]
    fn test_exact_key_is_lowercased() {
        let key = ExactKey::new("SomeApp", "Default", "Application");
        assert_eq!(key, ExactKey::new("someapp", "DEFAULT", "application"));
        assert_eq!(key.to_string(), "someapp+default+application");
        assert_eq!(key.namespace_name(), "application");
    }

    #[test]
    fn test_branch_status_from_wire() {
        let record: GrayReleaseRuleRecord = serde_json::from_str(
            r#"{
                "id": 7,
                "appId": "someAppId",
                "clusterName": "default",
                "namespaceName": "application",
                "branchName": "someBranch",
                "rules": "[]",
                "releaseId": 3,
                "branchStatus": 1
            }"#,
        )
        .unwrap();

        assert!(record.is_active());
        assert_eq!(record.released_id(), Some(3));
        assert_eq!(BranchStatus::from(0), BranchStatus::Deleted);
        assert_eq!(BranchStatus::from(9), BranchStatus::Unknown(9));
        assert_eq!(i32::from(BranchStatus::Merged), 2);
    }

    #[test]
    fn test_unreleased_records() {
        let record: GrayReleaseRuleRecord = serde_json::from_str(
            r#"{
                "id": 8,
                "appId": "someAppId",
                "clusterName": "default",
                "namespaceName": "application",
                "branchName": "someBranch",
                "rules": "[]",
                "releaseId": null,
                "branchStatus": 1
            }"#,
        )
        .unwrap();
        assert_eq!(record.release_id, None);
        assert_eq!(record.released_id(), None);

        let zero = GrayReleaseRuleRecord {
            release_id: Some(0),
            ..record
        };
        assert_eq!(zero.released_id(), None);
    }
}
