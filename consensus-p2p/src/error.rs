//! Error types for the consensus/P2P boundary.
//!
//! The taxonomy is deliberately narrow: configuration errors are fatal at
//! startup, transport errors on a peer handle are recoverable by the caller,
//! and "peer not found" is not an error at all.

use {
    crate::node::NodeId,
    std::net::SocketAddr,
    thiserror::Error,
};

/// A protocol descriptor failed validation.
///
/// Returned by [`crate::protocol::Protocol::new`]; a node must refuse to
/// advertise a protocol that produces one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The protocol name is empty.
    #[error("protocol name must not be empty")]
    EmptyName,

    /// No versions were supplied.
    #[error("protocol {0} declares no versions")]
    NoVersions(String),

    /// `versions` and `lengths` differ in length.
    #[error("protocol {name}: {versions} versions but {lengths} message lengths")]
    LengthMismatch {
        /// Protocol name.
        name: String,
        /// Number of versions.
        versions: usize,
        /// Number of message-table lengths.
        lengths: usize,
    },

    /// The same version number appears twice.
    #[error("protocol {name}: duplicate version {version}")]
    DuplicateVersion {
        /// Protocol name.
        name: String,
        /// The repeated version.
        version: u32,
    },

    /// A version declares an empty message table.
    #[error("protocol {name}: version {version} has zero messages")]
    EmptyMessageTable {
        /// Protocol name.
        name: String,
        /// The offending version.
        version: u32,
    },
}

/// Failure of a [`crate::peer::Peer`] handle.
///
/// Callers should treat every variant except `QueueFull` as "peer
/// unreachable" and stop using the handle.
#[derive(Error, Debug)]
pub enum PeerError {
    /// The underlying connection is gone. Sticky: every later send fails too.
    #[error("peer {0} connection closed")]
    Closed(NodeId),

    /// The bounded outbound queue is full; the message was dropped.
    #[error("peer {peer} outbound queue full ({capacity} messages)")]
    QueueFull {
        /// Remote peer.
        peer: NodeId,
        /// Queue capacity.
        capacity: usize,
    },

    /// The message code is outside the negotiated message table.
    #[error("message code {code} outside negotiated table of {length} for {protocol}")]
    InvalidMessageCode {
        /// Requested code.
        code: u64,
        /// Negotiated table size.
        length: u64,
        /// Protocol name.
        protocol: String,
    },

    /// Payload exceeds the configured maximum.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Payload could not be encoded.
    #[error("payload encoding error: {0}")]
    Encode(#[from] bincode::Error),
}

/// Errors raised by the reference TCP transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket-level I/O error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be (de)serialized.
    #[error("frame codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Frame exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Frame size announced or produced.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The remote sent something other than the expected frame.
    #[error("unexpected {got} frame from {addr}, expected {expected}")]
    UnexpectedFrame {
        /// Remote address.
        addr: SocketAddr,
        /// Expected frame kind.
        expected: &'static str,
        /// Received frame kind.
        got: &'static str,
    },

    /// Capability negotiation found no shared protocol version.
    #[error("no common protocol with {0}")]
    NoCommonProtocol(NodeId),

    /// The handshake did not finish in time.
    #[error("handshake with {addr} timed out after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Remote address.
        addr: SocketAddr,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The server refused the peer after a successful handshake.
    #[error("peer rejected: {0}")]
    Rejected(#[from] ServerError),
}

/// Admission errors from [`crate::server::P2pServer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Maximum peer count reached and the peer is not trusted.
    #[error("maximum peers reached: {0}")]
    MaxPeersReached(usize),

    /// A live handle for this node already exists.
    #[error("peer already connected: {0}")]
    PeerAlreadyConnected(NodeId),

    /// The remote advertised our own identity.
    #[error("refusing connection to self ({0})")]
    SelfConnection(NodeId),
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
