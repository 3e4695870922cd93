//! Read-only queries over the rule index.

use crate::index::RuleIndex;
use crate::types::{Client, ExactKey, ReleaseId};

/// The release a client should receive for a namespace, if any gray rule
/// under that exact scope targets it. The first matching rule wins.
pub fn find_release_id(
    index: &RuleIndex,
    client: &Client<'_>,
    app_id: &str,
    cluster_name: &str,
    namespace_name: &str,
) -> Option<ReleaseId> {
    let rules = index.get(&ExactKey::new(app_id, cluster_name, namespace_name))?;

    rules
        .iter()
        .find(|rule| rule.matches(client))
        .map(|rule| rule.release_id)
}

/// Whether any app or cluster has a gray rule for this namespace name that
/// targets the client.
pub fn has_gray_rule(index: &RuleIndex, client: &Client<'_>, namespace_name: &str) -> bool {
    index
        .keys_for_namespace(&namespace_name.to_lowercase())
        .iter()
        .filter_map(|key| index.get(key))
        .any(|rules| rules.iter().any(|rule| rule.matches(client)))
}
