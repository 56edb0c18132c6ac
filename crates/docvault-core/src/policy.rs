//! Classification access policy.
//!
//! Maps a workspace role to the set of classification labels its holder
//! may read. The mapping is a fixed monotone total order: every role's
//! allowed set includes all less-sensitive labels. Pure and total — any
//! unknown role string resolves to the most restrictive policy rather
//! than failing.

use std::collections::BTreeSet;

use crate::models::ClassificationLabel;

/// Action tag attached to the structured warning emitted when a query is
/// executed under a role outside the fixed vocabulary.
pub const UNKNOWN_ROLE_ACTION: &str = "query_policy_unknown_workspace_role";

/// Resolve the set of classification labels a role may read.
///
/// - `admin` — all four labels.
/// - `member` — `public` and `internal`.
/// - anything else — `public` only, with a structured warning. The
///   fallback is a defensive default, never a silent pass-through.
pub fn allowed_labels_for_role(role: &str) -> BTreeSet<ClassificationLabel> {
    match role {
        "admin" => ClassificationLabel::ALL.into_iter().collect(),
        "member" => [ClassificationLabel::Public, ClassificationLabel::Internal]
            .into_iter()
            .collect(),
        other => {
            tracing::warn!(
                action = UNKNOWN_ROLE_ACTION,
                role = other,
                "unknown workspace role, defaulting to public-only access"
            );
            [ClassificationLabel::Public].into_iter().collect()
        }
    }
}

/// Label names of an allowed set, sorted alphabetically for stable
/// reporting in query responses and audit payloads.
pub fn sorted_label_names(labels: &BTreeSet<ClassificationLabel>) -> Vec<String> {
    let mut names: Vec<String> = labels.iter().map(|l| l.as_str().to_string()).collect();
    names.sort();
    names
}
