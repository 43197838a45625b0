//! Peer label store.
//!
//! [`PeerLabels`] is the single owner of per-peer label sets. Labels come in
//! two classifications: *static* labels mark peers the transport should keep
//! dialing, *trusted* labels additionally exempt a peer from admission
//! limits. A node stays in a classification while it carries at least one
//! label of that kind.
//!
//! Every operation takes the lock once, so callers never observe a
//! half-applied add or remove.

use {
    crate::node::{NodeId, NodeRecord},
    log::debug,
    parking_lot::RwLock,
    std::collections::{BTreeSet, HashMap},
};

/// Which label classification an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    Static,
    Trusted,
}

impl LabelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Trusted => "trusted",
        }
    }
}

#[derive(Debug)]
struct LabeledNode {
    record: NodeRecord,
    labels: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct LabelTables {
    static_nodes: HashMap<NodeId, LabeledNode>,
    trusted_nodes: HashMap<NodeId, LabeledNode>,
}

impl LabelTables {
    fn table(&self, kind: LabelKind) -> &HashMap<NodeId, LabeledNode> {
        match kind {
            LabelKind::Static => &self.static_nodes,
            LabelKind::Trusted => &self.trusted_nodes,
        }
    }

    fn table_mut(&mut self, kind: LabelKind) -> &mut HashMap<NodeId, LabeledNode> {
        match kind {
            LabelKind::Static => &mut self.static_nodes,
            LabelKind::Trusted => &mut self.trusted_nodes,
        }
    }
}

/// Thread-safe mapping from peer identity to its label sets.
#[derive(Debug, Default)]
pub struct PeerLabels {
    tables: RwLock<LabelTables>,
}

impl PeerLabels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `label` to `node`. Returns `false` if it was already present.
    ///
    /// The stored address is refreshed from `node` either way.
    pub fn add(&self, kind: LabelKind, node: &NodeRecord, label: &str) -> bool {
        let mut tables = self.tables.write();
        let entry = tables
            .table_mut(kind)
            .entry(node.id)
            .or_insert_with(|| LabeledNode {
                record: *node,
                labels: BTreeSet::new(),
            });
        entry.record = *node;
        let added = entry.labels.insert(label.to_string());
        if added {
            debug!("added {} label {:?} to {}", kind.as_str(), label, node);
        }
        added
    }

    /// Detach `label` from `node`. Returns `false` if it was not present.
    pub fn remove(&self, kind: LabelKind, node: &NodeRecord, label: &str) -> bool {
        let mut tables = self.tables.write();
        let table = tables.table_mut(kind);
        let Some(entry) = table.get_mut(&node.id) else {
            return false;
        };
        let removed = entry.labels.remove(label);
        if entry.labels.is_empty() {
            table.remove(&node.id);
        }
        if removed {
            debug!("removed {} label {:?} from {}", kind.as_str(), label, node);
        }
        removed
    }

    /// Labels of one classification carried by `id`.
    pub fn labels_of(&self, kind: LabelKind, id: &NodeId) -> BTreeSet<String> {
        self.tables
            .read()
            .table(kind)
            .get(id)
            .map(|entry| entry.labels.clone())
            .unwrap_or_default()
    }

    /// All labels carried by `id`, across both classifications.
    pub fn labels(&self, id: &NodeId) -> BTreeSet<String> {
        let tables = self.tables.read();
        [LabelKind::Static, LabelKind::Trusted]
            .into_iter()
            .filter_map(|kind| tables.table(kind).get(id))
            .flat_map(|entry| entry.labels.iter().cloned())
            .collect()
    }

    /// Whether `id` carries `label` in either classification.
    pub fn has_label(&self, id: &NodeId, label: &str) -> bool {
        let tables = self.tables.read();
        [LabelKind::Static, LabelKind::Trusted]
            .into_iter()
            .filter_map(|kind| tables.table(kind).get(id))
            .any(|entry| entry.labels.contains(label))
    }

    /// Whether `id` carries at least one trusted label.
    pub fn is_trusted(&self, id: &NodeId) -> bool {
        self.tables.read().trusted_nodes.contains_key(id)
    }

    /// Records of every node carrying at least one label of `kind`.
    pub fn nodes(&self, kind: LabelKind) -> Vec<NodeRecord> {
        self.tables
            .read()
            .table(kind)
            .values()
            .map(|entry| entry.record)
            .collect()
    }
}
