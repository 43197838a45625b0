//! The block propagation capability handed to consensus engines.

use {
    crate::{node::NodeId, peer::Peer},
    solana_keypair::Keypair,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
};

/// Block propagation and targeted peer lookup.
///
/// Every method takes `&self` and must be safe to call from several engine
/// threads at once; implementations serialize their own state.
pub trait Broadcaster: Send + Sync {
    /// The block type carried by the propagation queue.
    type Block: Send;

    /// Submit `block`, attributed to `origin`, to the propagation queue.
    ///
    /// Fire-and-forget: the queue owns deduplication, ordering and relay.
    fn enqueue(&self, origin: &str, block: Self::Block);

    /// Handles for every id in `targets` that is connected and carries
    /// `label`, in either the static or the trusted classification.
    ///
    /// An empty `label` does not filter: every connected target is returned.
    /// Ids that are not connected, not labeled, or whose handle has closed
    /// are absent from the map. Absence is not an error.
    fn find_peers(&self, targets: &HashSet<NodeId>, label: &str) -> HashMap<NodeId, Arc<dyn Peer>>;

    /// The local signing key. Fixed for the lifetime of the process.
    fn node_key(&self) -> &Keypair;
}
