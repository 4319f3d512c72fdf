//! Certificate revocation state.
//!
//! The referrer relationships between issued certificates form a forest:
//! `children[referrer]` lists every serial the referrer endorsed. A serial
//! is revoked iff it appears in the revoked map. Both structures live under
//! one reader/writer lock so subtree revocation is atomic with respect to
//! concurrent `is_revoked` queries from the TLS handshake path.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Default, Debug)]
struct RevocationState {
    revoked: HashMap<String, DateTime<Utc>>,
    children: HashMap<String, Vec<String>>,
}

/// Thread-safe revocation and referrer-tree registry.
#[derive(Default, Debug)]
pub struct RevocationManager {
    state: RwLock<RevocationState>,
}

impl RevocationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `referrer_id` authorized the issuance of `cert_id`.
    ///
    /// A certificate without a referrer (bootstrap issuance) is not recorded.
    pub fn register(&self, cert_id: &str, referrer_id: &str) {
        if referrer_id.is_empty() {
            return;
        }

        let mut state = self.state.write();
        state
            .children
            .entry(referrer_id.to_string())
            .or_default()
            .push(cert_id.to_string());
    }

    /// Revoke a single certificate. Descendants are unaffected.
    pub fn revoke(&self, cert_id: &str) {
        let mut state = self.state.write();
        state.revoked.insert(cert_id.to_string(), Utc::now());
    }

    /// Revoke a certificate and every descendant reachable through the
    /// referrer tree, all stamped with the same instant.
    ///
    /// The whole walk happens under the exclusive lock, so readers never
    /// observe a partially revoked subtree.
    pub fn revoke_with_children(&self, cert_id: &str) {
        let mut state = self.state.write();
        let now = Utc::now();

        let mut visited = HashSet::new();
        let mut stack = vec![cert_id.to_string()];
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(children) = state.children.get(&id) {
                stack.extend(children.iter().cloned());
            }
            state.revoked.insert(id, now);
        }
    }

    /// Whether `cert_id` has been revoked.
    pub fn is_revoked(&self, cert_id: &str) -> bool {
        self.state.read().revoked.contains_key(cert_id)
    }

    /// Whether `cert_id` was issued on the authority of `referrer_id`.
    pub fn is_referrer_of(&self, referrer_id: &str, cert_id: &str) -> bool {
        self.state
            .read()
            .children
            .get(referrer_id)
            .is_some_and(|children| children.iter().any(|c| c == cert_id))
    }

    /// Copy of the revoked set with revocation instants.
    pub fn revoked_snapshot(&self) -> HashMap<String, DateTime<Utc>> {
        self.state.read().revoked.clone()
    }

    /// Number of certificates issued on the authority of `referrer_id`.
    pub fn child_count(&self, referrer_id: &str) -> usize {
        self.state
            .read()
            .children
            .get(referrer_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root ── child1 ── {grandchild1 ── greatgrandchild, grandchild2}
    ///      └─ child2
    fn registry_with_tree() -> RevocationManager {
        let rm = RevocationManager::new();
        rm.register("child1", "root");
        rm.register("child2", "root");
        rm.register("grandchild1", "child1");
        rm.register("grandchild2", "child1");
        rm.register("greatgrandchild", "grandchild1");
        rm
    }

    #[test]
    fn nothing_revoked_initially() {
        let rm = registry_with_tree();
        assert!(!rm.is_revoked("root"));
        assert!(!rm.is_revoked("child1"));
        assert!(rm.revoked_snapshot().is_empty());
    }

    #[test]
    fn revoke_is_local() {
        let rm = registry_with_tree();
        rm.revoke("child1");

        assert!(rm.is_revoked("child1"));
        assert!(!rm.is_revoked("root"));
        assert!(!rm.is_revoked("child2"));
        assert!(!rm.is_revoked("grandchild1"));
    }

    #[test]
    fn revoke_with_children_covers_subtree_only() {
        let rm = registry_with_tree();
        rm.revoke_with_children("child1");

        assert!(rm.is_revoked("child1"));
        assert!(rm.is_revoked("grandchild1"));
        assert!(rm.is_revoked("grandchild2"));
        assert!(rm.is_revoked("greatgrandchild"));
        assert!(!rm.is_revoked("root"));
        assert!(!rm.is_revoked("child2"));
    }

    #[test]
    fn subtree_revocation_shares_one_instant() {
        let rm = registry_with_tree();
        rm.revoke_with_children("child1");

        let snapshot = rm.revoked_snapshot();
        assert_eq!(snapshot.len(), 4);
        let instants: HashSet<_> = snapshot.values().collect();
        assert_eq!(instants.len(), 1);
    }

    #[test]
    fn revocation_is_monotonic() {
        let rm = registry_with_tree();
        rm.revoke("child2");
        rm.revoke("child2");
        assert!(rm.is_revoked("child2"));
    }

    #[test]
    fn child_counts() {
        let rm = registry_with_tree();
        assert_eq!(rm.child_count("root"), 2);
        assert_eq!(rm.child_count("child1"), 2);
        assert_eq!(rm.child_count("grandchild1"), 1);
        assert_eq!(rm.child_count("nonexistent"), 0);
    }

    #[test]
    fn empty_referrer_is_not_registered() {
        let rm = RevocationManager::new();
        rm.register("bootstrap-cert", "");
        assert_eq!(rm.child_count(""), 0);
    }

    #[test]
    fn referrer_relationship_lookup() {
        let rm = registry_with_tree();
        assert!(rm.is_referrer_of("root", "child1"));
        assert!(rm.is_referrer_of("child1", "grandchild2"));
        assert!(!rm.is_referrer_of("root", "grandchild1"));
        assert!(!rm.is_referrer_of("child1", "root"));
    }
}
