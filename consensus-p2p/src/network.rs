//! Self identity and peer trust management for consensus engines.

use {
    crate::node::{NodeId, NodeRecord},
    std::collections::BTreeSet,
};

/// Access to the local node's identity and to the peer label sets.
///
/// Label operations are idempotent set operations: adding a present label
/// or removing an absent one does nothing. The implementation owns the
/// label state; engines only request changes.
pub trait NetworkService: Send + Sync {
    /// The local node's own record.
    fn self_node(&self) -> NodeRecord;

    /// Attach a static label to `node`.
    fn add_peer_label(&self, node: &NodeRecord, label: &str);

    /// Detach a static label from `node`.
    fn remove_peer_label(&self, node: &NodeRecord, label: &str);

    /// Attach a trusted label to `node`. Trusted peers bypass admission limits.
    fn add_trusted_peer_label(&self, node: &NodeRecord, label: &str);

    /// Detach a trusted label from `node`.
    fn remove_trusted_peer_label(&self, node: &NodeRecord, label: &str);

    /// Every label `id` carries, static and trusted combined.
    fn peer_labels(&self, id: &NodeId) -> BTreeSet<String>;

    /// Whether `id` carries at least one trusted label.
    fn is_trusted(&self, id: &NodeId) -> bool;
}
