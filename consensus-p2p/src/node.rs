//! Node identity as seen across the boundary.

use {
    serde::{Deserialize, Serialize},
    solana_pubkey::Pubkey,
    std::{fmt, net::SocketAddr},
};

/// Opaque node identifier, derived from the node's public key.
pub type NodeId = Pubkey;

/// A node's identity together with the address it is reachable on.
///
/// Owned by the transport; consensus engines only ever borrow or clone it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Public identity.
    pub id: NodeId,
    /// Network address.
    pub addr: SocketAddr,
}

impl NodeRecord {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}
