//! Reference server implementing [`Broadcaster`] and [`NetworkService`].
//!
//! [`P2pServer`] is what a node's composition root hands to its consensus
//! engine. It owns:
//!
//! - the node key and self record,
//! - the advertised protocol descriptors,
//! - the peer label store ([`PeerLabels`]),
//! - the set of connected peer handles,
//! - the producer side of the block propagation queue.
//!
//! Transports register handles with [`P2pServer::add_peer`] after a
//! successful handshake. Admission is capped by `max_peers`, except for
//! peers carrying a trusted label. A connection that negotiated several
//! protocols registers one handle per protocol with
//! [`P2pServer::add_connection`]; [`Broadcaster::find_peers`] hands out the
//! primary one and [`P2pServer::peer_for`] the others.

use {
    crate::{
        broadcaster::Broadcaster,
        config::{ConfigError, P2pConfig},
        error::ServerError,
        labels::{LabelKind, PeerLabels},
        message::Hello,
        network::NetworkService,
        node::{NodeId, NodeRecord},
        peer::Peer,
        protocol::{Capability, Protocol},
        queue::BlockQueue,
    },
    dashmap::{mapref::entry::Entry, DashMap},
    log::{debug, info, warn},
    parking_lot::Mutex,
    solana_keypair::Keypair,
    solana_signer::Signer,
    std::{
        collections::{BTreeSet, HashMap, HashSet},
        fmt,
        iter,
        net::SocketAddr,
        sync::Arc,
    },
};

/// Every handle registered for one remote node. They share one close signal.
struct Connection {
    primary: Arc<dyn Peer>,
    secondary: Vec<Arc<dyn Peer>>,
}

impl Connection {
    fn handles(&self) -> impl Iterator<Item = &Arc<dyn Peer>> {
        iter::once(&self.primary).chain(&self.secondary)
    }

    fn is_closed(&self) -> bool {
        self.primary.is_closed()
    }
}

pub struct P2pServer<B> {
    config: P2pConfig,
    node_key: Keypair,
    self_node: NodeRecord,
    protocols: Vec<Protocol>,
    labels: PeerLabels,
    peers: DashMap<NodeId, Connection>,
    /// Serializes the count-then-insert in `add_peer`.
    admission: Mutex<()>,
    queue: BlockQueue<B>,
}

impl<B> P2pServer<B> {
    /// Create a server for the node identified by `node_key`, reachable at
    /// `listen_addr`.
    pub fn new(
        config: P2pConfig,
        node_key: Keypair,
        listen_addr: SocketAddr,
        protocols: Vec<Protocol>,
        queue: BlockQueue<B>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if protocols.is_empty() {
            return Err(ConfigError::NoProtocols);
        }
        let mut names = HashSet::new();
        if let Some(dup) = protocols.iter().find(|p| !names.insert(p.name())) {
            return Err(ConfigError::DuplicateProtocol(dup.name().to_string()));
        }
        let self_node = NodeRecord::new(node_key.pubkey(), listen_addr);
        info!(
            "p2p server {} advertising {:?}",
            self_node,
            protocols.iter().map(Protocol::name).collect::<Vec<_>>()
        );
        Ok(Self {
            config,
            node_key,
            self_node,
            protocols,
            labels: PeerLabels::new(),
            peers: DashMap::new(),
            admission: Mutex::new(()),
            queue,
        })
    }

    pub fn config(&self) -> &P2pConfig {
        &self.config
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// Every protocol/version pair this node advertises.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.protocols
            .iter()
            .flat_map(Protocol::capabilities)
            .collect()
    }

    /// The hello frame body this node sends on every new connection.
    pub fn hello(&self) -> Hello {
        Hello {
            node: self.self_node,
            capabilities: self.capabilities(),
        }
    }

    // ── Peer lifecycle ──────────────────────────────────────────────────

    /// Register a handle for a freshly handshaken connection.
    ///
    /// A closed handle for the same node is replaced; a live one is an
    /// error. Untrusted peers are refused once `max_peers` live handles
    /// exist.
    pub fn add_peer(&self, peer: Arc<dyn Peer>) -> Result<(), ServerError> {
        self.add_connection(peer, Vec::new())
    }

    /// Register a connection that speaks more than one protocol.
    ///
    /// `peer` is the primary handle, the one engines get from `find_peers`.
    /// `secondary` holds handles on the same connection for the other
    /// matched protocols and must share `peer`'s close signal. Admission
    /// follows [`Self::add_peer`].
    pub fn add_connection(
        &self,
        peer: Arc<dyn Peer>,
        secondary: Vec<Arc<dyn Peer>>,
    ) -> Result<(), ServerError> {
        let id = peer.node().id;
        if id == self.self_node.id {
            return Err(ServerError::SelfConnection(id));
        }

        let _guard = self.admission.lock();
        self.prune_closed();

        if self.peers.contains_key(&id) {
            return Err(ServerError::PeerAlreadyConnected(id));
        }
        let trusted = self.labels.is_trusted(&id);
        if !trusted && self.peers.len() >= self.config.max_peers {
            debug!("refusing {}: {} peers connected", peer.node(), self.peers.len());
            return Err(ServerError::MaxPeersReached(self.config.max_peers));
        }

        info!(
            "adding peer {} (trusted={}, protocols={})",
            peer.node(),
            trusted,
            secondary.len().saturating_add(1)
        );
        self.peers.insert(
            id,
            Connection {
                primary: peer,
                secondary,
            },
        );
        Ok(())
    }

    /// Drop and close every handle for `id`. Returns the primary one.
    pub fn remove_peer(&self, id: &NodeId) -> Option<Arc<dyn Peer>> {
        let (_, connection) = self.peers.remove(id)?;
        connection.handles().for_each(|peer| peer.close());
        info!("removed peer {}", connection.primary.node());
        Some(connection.primary)
    }

    /// Forget every handle whose connection has closed.
    ///
    /// Returns the ids that were dropped.
    pub fn prune_closed(&self) -> Vec<NodeId> {
        let closed: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|entry| entry.value().is_closed())
            .map(|entry| *entry.key())
            .collect();
        for id in &closed {
            if let Entry::Occupied(entry) = self.peers.entry(*id) {
                if entry.get().is_closed() {
                    warn!("dropping closed peer {}", entry.get().primary.node());
                    entry.remove();
                }
            }
        }
        closed
    }

    /// The live primary handle for `id`, if connected.
    pub fn peer(&self, id: &NodeId) -> Option<Arc<dyn Peer>> {
        self.peers
            .get(id)
            .map(|entry| entry.value().primary.clone())
            .filter(|peer| !peer.is_closed())
    }

    /// The live handle for `id` speaking `protocol`, if that protocol was
    /// negotiated on the connection.
    pub fn peer_for(&self, id: &NodeId, protocol: &str) -> Option<Arc<dyn Peer>> {
        self.peers
            .get(id)
            .and_then(|entry| {
                entry
                    .value()
                    .handles()
                    .find(|peer| peer.protocol().name == protocol)
                    .cloned()
            })
            .filter(|peer| !peer.is_closed())
    }

    /// Number of live handles.
    pub fn peer_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .count()
    }

    // ── Label sets consumed by the transport ────────────────────────────

    /// Nodes with at least one static label; the transport keeps these dialed.
    pub fn static_nodes(&self) -> Vec<NodeRecord> {
        self.labels.nodes(LabelKind::Static)
    }

    /// Nodes with at least one trusted label.
    pub fn trusted_nodes(&self) -> Vec<NodeRecord> {
        self.labels.nodes(LabelKind::Trusted)
    }
}

impl<B> fmt::Debug for P2pServer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("P2pServer")
            .field("self_node", &self.self_node)
            .field(
                "protocols",
                &self.protocols.iter().map(Protocol::name).collect::<Vec<_>>(),
            )
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl<B: Send> Broadcaster for P2pServer<B> {
    type Block = B;

    fn enqueue(&self, origin: &str, block: B) {
        self.queue.push(origin, block);
    }

    fn find_peers(&self, targets: &HashSet<NodeId>, label: &str) -> HashMap<NodeId, Arc<dyn Peer>> {
        targets
            .iter()
            .filter_map(|id| self.peer(id).map(|peer| (*id, peer)))
            .filter(|(id, _)| label.is_empty() || self.labels.has_label(id, label))
            .collect()
    }

    fn node_key(&self) -> &Keypair {
        &self.node_key
    }
}

impl<B: Send> NetworkService for P2pServer<B> {
    fn self_node(&self) -> NodeRecord {
        self.self_node
    }

    fn add_peer_label(&self, node: &NodeRecord, label: &str) {
        self.labels.add(LabelKind::Static, node, label);
    }

    fn remove_peer_label(&self, node: &NodeRecord, label: &str) {
        self.labels.remove(LabelKind::Static, node, label);
    }

    fn add_trusted_peer_label(&self, node: &NodeRecord, label: &str) {
        self.labels.add(LabelKind::Trusted, node, label);
    }

    fn remove_trusted_peer_label(&self, node: &NodeRecord, label: &str) {
        self.labels.remove(LabelKind::Trusted, node, label);
    }

    fn peer_labels(&self, id: &NodeId) -> BTreeSet<String> {
        self.labels.labels(id)
    }

    fn is_trusted(&self, id: &NodeId) -> bool {
        self.labels.is_trusted(id)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            message::Frame,
            peer::ChannelPeer,
            protocol::{match_protocols, NegotiatedProtocol},
            queue::{block_queue, BlockQueueReceiver},
        },
        assert_matches::assert_matches,
        solana_hash::Hash,
        solana_pubkey::Pubkey,
        std::thread,
        tokio::sync::mpsc,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestBlock {
        height: u64,
        hash: Hash,
    }

    fn test_block(height: u64) -> TestBlock {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&height.to_le_bytes());
        TestBlock {
            height,
            hash: Hash::new_from_array(bytes),
        }
    }

    fn eth63() -> NegotiatedProtocol {
        let remote: Vec<Capability> = Protocol::eth().capabilities().collect();
        match_protocols(&[Protocol::eth()], &remote).remove(0)
    }

    fn node(n: u8) -> NodeRecord {
        NodeRecord::new(
            Pubkey::new_from_array([n; 32]),
            SocketAddr::from(([127, 0, 0, n], 30303)),
        )
    }

    fn test_server(max_peers: usize) -> (P2pServer<TestBlock>, BlockQueueReceiver<TestBlock>) {
        let mut config = P2pConfig::dev_default();
        config.max_peers = max_peers;
        let (queue, rx) = block_queue();
        let server = P2pServer::new(
            config,
            Keypair::new(),
            SocketAddr::from(([127, 0, 0, 1], 30303)),
            vec![Protocol::eth()],
            queue,
        )
        .unwrap();
        (server, rx)
    }

    fn connect(server: &P2pServer<TestBlock>, n: u8) -> (Arc<ChannelPeer>, mpsc::Receiver<Frame>) {
        let (peer, rx) = ChannelPeer::new(node(n), eth63(), 8, 1_024);
        let peer = Arc::new(peer);
        server.add_peer(peer.clone()).unwrap();
        (peer, rx)
    }

    fn ids(ns: &[u8]) -> HashSet<NodeId> {
        ns.iter().map(|&n| node(n).id).collect()
    }

    #[test]
    fn test_new_rejects_empty_protocols() {
        let (queue, _rx) = block_queue::<TestBlock>();
        let result = P2pServer::new(
            P2pConfig::dev_default(),
            Keypair::new(),
            SocketAddr::from(([127, 0, 0, 1], 0)),
            vec![],
            queue,
        );
        assert_matches!(result, Err(ConfigError::NoProtocols));
    }

    #[test]
    fn test_new_rejects_duplicate_protocol_names() {
        let (queue, _rx) = block_queue::<TestBlock>();
        let newer_eth = Protocol::new("eth", vec![64], vec![20], false).unwrap();
        let result = P2pServer::new(
            P2pConfig::dev_default(),
            Keypair::new(),
            SocketAddr::from(([127, 0, 0, 1], 0)),
            vec![Protocol::eth(), newer_eth],
            queue,
        );
        assert_matches!(result, Err(ConfigError::DuplicateProtocol(name)) if name == "eth");
    }

    #[test]
    fn test_self_node_matches_node_key() {
        let (server, _rx) = test_server(10);
        assert_eq!(server.self_node().id, server.node_key().pubkey());
        assert_eq!(server.hello().node, server.self_node());
        assert_eq!(server.capabilities().len(), 2);
    }

    #[test]
    fn test_find_peers_returns_connected_labeled_subset() {
        let (server, _rx) = test_server(10);
        // A: connected + trusted, B: connected only, C: trusted but not connected.
        let _a = connect(&server, 1);
        let _b = connect(&server, 2);
        server.add_trusted_peer_label(&node(1), "trusted");
        server.add_trusted_peer_label(&node(3), "trusted");

        let found = server.find_peers(&ids(&[1, 2, 3]), "trusted");
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&node(1).id));
        assert_eq!(found[&node(1).id].node(), &node(1));
    }

    #[test]
    fn test_find_peers_empty_label_matches_all_connected() {
        let (server, _rx) = test_server(10);
        let _a = connect(&server, 1);
        let _b = connect(&server, 2);
        let found = server.find_peers(&ids(&[1, 2, 3]), "");
        assert_eq!(found.keys().copied().collect::<HashSet<_>>(), ids(&[1, 2]));
    }

    #[test]
    fn test_find_peers_matches_static_labels() {
        let (server, _rx) = test_server(10);
        let _a = connect(&server, 1);
        server.add_peer_label(&node(1), "validators");
        assert_eq!(server.find_peers(&ids(&[1]), "validators").len(), 1);
        assert!(server.find_peers(&ids(&[1]), "other").is_empty());
        server.remove_peer_label(&node(1), "validators");
        assert!(server.find_peers(&ids(&[1]), "validators").is_empty());
    }

    #[test]
    fn test_find_peers_skips_closed_handles() {
        let (server, _rx) = test_server(10);
        let (a, _a_rx) = connect(&server, 1);
        a.close();
        assert!(server.find_peers(&ids(&[1]), "").is_empty());
        assert_eq!(server.peer_count(), 0);
    }

    #[test]
    fn test_label_operations_are_idempotent() {
        let (server, _rx) = test_server(10);
        let a = node(1);
        server.add_peer_label(&a, "x");
        server.add_peer_label(&a, "x");
        assert_eq!(server.peer_labels(&a.id).len(), 1);
        server.remove_peer_label(&a, "never-added");
        server.remove_trusted_peer_label(&a, "x");
        assert_eq!(server.peer_labels(&a.id).len(), 1);
        assert_eq!(server.static_nodes(), vec![a]);
        assert!(server.trusted_nodes().is_empty());
    }

    #[test]
    fn test_max_peers_enforced_for_untrusted() {
        let (server, _rx) = test_server(1);
        let _a = connect(&server, 1);
        let (b, _b_rx) = ChannelPeer::new(node(2), eth63(), 8, 1_024);
        assert_eq!(
            server.add_peer(Arc::new(b)),
            Err(ServerError::MaxPeersReached(1))
        );
    }

    #[test]
    fn test_trusted_peer_bypasses_max_peers() {
        let (server, _rx) = test_server(1);
        let _a = connect(&server, 1);
        server.add_trusted_peer_label(&node(2), "validator");
        assert!(server.is_trusted(&node(2).id));
        let _b = connect(&server, 2);
        assert_eq!(server.peer_count(), 2);
    }

    #[test]
    fn test_duplicate_and_self_connections_rejected() {
        let (server, _rx) = test_server(10);
        let (a, _a_rx) = connect(&server, 1);
        let (dup, _dup_rx) = ChannelPeer::new(node(1), eth63(), 8, 1_024);
        assert_eq!(
            server.add_peer(Arc::new(dup)),
            Err(ServerError::PeerAlreadyConnected(node(1).id))
        );

        let me = server.self_node();
        let (own, _own_rx) = ChannelPeer::new(me, eth63(), 8, 1_024);
        assert_eq!(
            server.add_peer(Arc::new(own)),
            Err(ServerError::SelfConnection(me.id))
        );

        // A closed handle is replaced by a reconnect.
        a.close();
        let _again = connect(&server, 1);
        assert_eq!(server.peer_count(), 1);
    }

    #[test]
    fn test_remove_peer_closes_handle() {
        let (server, _rx) = test_server(10);
        let (a, _a_rx) = connect(&server, 1);
        assert!(server.remove_peer(&node(1).id).is_some());
        assert!(a.is_closed());
        assert!(server.remove_peer(&node(1).id).is_none());
        assert!(server.peer(&node(1).id).is_none());
    }

    #[test]
    fn test_secondary_protocol_handles_share_the_connection() {
        let (server, _rx) = test_server(10);
        let bft = Protocol::new("bft", vec![1], vec![4], true).unwrap();
        let remote: Vec<Capability> = Protocol::eth()
            .capabilities()
            .chain(bft.capabilities())
            .collect();
        let matched = match_protocols(&[Protocol::eth(), bft], &remote);
        assert_eq!(matched.len(), 2);

        let (primary, mut rx) = ChannelPeer::new(node(1), matched[0].clone(), 8, 1_024);
        let secondary: Arc<dyn Peer> = Arc::new(primary.for_protocol(matched[1].clone()));
        let primary = Arc::new(primary);
        server.add_connection(primary.clone(), vec![secondary]).unwrap();

        assert_eq!(server.peer(&node(1).id).unwrap().protocol().name, "bft");
        let eth = server.peer_for(&node(1).id, "eth").unwrap();
        eth.send(2, vec![9]).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Frame::Message {
                code: matched[1].wire_code(2).unwrap(),
                payload: vec![9],
            }
        );
        assert!(server.peer_for(&node(1).id, "les").is_none());

        primary.close();
        assert!(eth.is_closed());
        assert!(server.peer_for(&node(1).id, "eth").is_none());
        assert!(server.remove_peer(&node(1).id).is_some());
        assert!(server.peer_for(&node(1).id, "bft").is_none());
    }

    #[test]
    fn test_enqueue_reaches_queue() {
        let (server, rx) = test_server(10);
        server.enqueue("peer-1", test_block(7));
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.origin, "peer-1");
        assert_eq!(queued.block, test_block(7));
    }

    #[test]
    fn test_concurrent_enqueue_loses_and_duplicates_nothing() {
        let (server, rx) = test_server(10);
        let server = Arc::new(server);
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let server = server.clone();
                thread::spawn(move || {
                    for i in 0..100u64 {
                        server.enqueue("engine", test_block(t * 100 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained = rx.drain();
        assert_eq!(drained.len(), 400);
        let hashes: HashSet<Hash> = drained.iter().map(|q| q.block.hash.clone()).collect();
        assert_eq!(hashes.len(), 400);
    }

    #[test]
    fn test_engine_usage_through_trait_objects() {
        let (server, _rx) = test_server(10);
        let (_a, mut a_rx) = connect(&server, 1);
        let server = Arc::new(server);
        let network: Arc<dyn NetworkService> = server.clone();
        let broadcaster: Arc<dyn Broadcaster<Block = TestBlock>> = server;

        network.add_trusted_peer_label(&node(1), "validators");
        let peers = broadcaster.find_peers(&ids(&[1, 2]), "validators");
        let failures = crate::peer::send_to_all(&peers, 0, b"proposal");
        assert!(failures.is_empty());
        assert_matches!(a_rx.try_recv(), Ok(Frame::Message { .. }));
    }
}
