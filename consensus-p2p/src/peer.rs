//! Peer handles.
//!
//! A [`Peer`] is the consensus engine's view of one live connection: it can
//! send a message and report who is on the other end. The handle is bound
//! to the protocol negotiated for it, so message codes are relative to that
//! protocol's table (`0..length`).
//!
//! [`ChannelPeer`] is the transport-agnostic implementation: `send` pushes a
//! frame into a bounded queue that a transport task drains. It never blocks;
//! a full queue drops the message with [`PeerError::QueueFull`]. Once the
//! handle is closed, by the caller or by the transport noticing a dead
//! socket, every later `send` fails with [`PeerError::Closed`].

use {
    crate::{
        error::PeerError,
        message::Frame,
        node::{NodeId, NodeRecord},
        protocol::NegotiatedProtocol,
    },
    log::{debug, warn},
    serde::Serialize,
    std::{
        collections::HashMap,
        fmt,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
    tokio::sync::{
        futures::Notified,
        mpsc::{self, error::TrySendError},
        Notify,
    },
};

/// One connected remote node, as seen by a consensus engine.
///
/// Implementations must be cheap to share (`Arc<dyn Peer>`) and safe to use
/// from several threads. `send` must return promptly: a slow peer may cause
/// failures but never an unbounded wait.
pub trait Peer: Send + Sync + fmt::Debug {
    /// Transmit an encoded payload under the protocol-relative `code`.
    fn send(&self, code: u64, payload: Vec<u8>) -> Result<(), PeerError>;

    /// The remote node's identity. Stable for the lifetime of the handle.
    fn node(&self) -> &NodeRecord;

    /// The protocol this handle speaks.
    fn protocol(&self) -> &NegotiatedProtocol;

    /// Whether the underlying connection is known to be gone.
    fn is_closed(&self) -> bool;

    /// Invalidate the handle.
    fn close(&self);
}

/// Typed sending on top of [`Peer::send`].
pub trait PeerExt: Peer {
    /// Bincode-encode `msg` and send it under `code`.
    fn send_msg<T: Serialize + ?Sized>(&self, code: u64, msg: &T) -> Result<(), PeerError> {
        let payload = bincode::serialize(msg)?;
        self.send(code, payload)
    }
}

impl<P: Peer + ?Sized> PeerExt for P {}

/// Send the same payload to every handle in `peers`.
///
/// Returns the peers that failed. Failures do not stop the fan-out.
pub fn send_to_all(
    peers: &HashMap<NodeId, Arc<dyn Peer>>,
    code: u64,
    payload: &[u8],
) -> Vec<(NodeId, PeerError)> {
    peers
        .iter()
        .filter_map(|(id, peer)| {
            peer.send(code, payload.to_vec())
                .err()
                .map(|err| (*id, err))
        })
        .collect()
}

/// Liveness flag shared between a handle and the tasks that own its socket.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CloseSignal {
    /// Mark the connection closed and wake every task waiting in
    /// [`Self::notified`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves on the next [`Self::close`]. Create it before checking
    /// [`Self::is_closed`] to avoid missing a wakeup.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

/// Peer handle backed by a bounded outbound frame queue.
#[derive(Debug, Clone)]
pub struct ChannelPeer {
    node: NodeRecord,
    protocol: NegotiatedProtocol,
    outbound: mpsc::Sender<Frame>,
    closed: CloseSignal,
    capacity: usize,
    max_message_size: usize,
}

impl ChannelPeer {
    /// Create a handle and the receiving end of its outbound queue.
    ///
    /// `capacity` must be non-zero (see [`crate::config::P2pConfig::validate`]).
    pub fn new(
        node: NodeRecord,
        protocol: NegotiatedProtocol,
        capacity: usize,
        max_message_size: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let peer = Self {
            node,
            protocol,
            outbound,
            closed: CloseSignal::default(),
            capacity,
            max_message_size,
        };
        (peer, rx)
    }

    /// Another handle on the same connection, speaking a different protocol.
    pub fn for_protocol(&self, protocol: NegotiatedProtocol) -> Self {
        Self {
            protocol,
            ..self.clone()
        }
    }

    /// The liveness flag, for the transport task that owns the socket.
    pub fn close_signal(&self) -> CloseSignal {
        self.closed.clone()
    }
}

impl Peer for ChannelPeer {
    fn send(&self, code: u64, payload: Vec<u8>) -> Result<(), PeerError> {
        if self.closed.is_closed() {
            return Err(PeerError::Closed(self.node.id));
        }
        let Some(wire_code) = self.protocol.wire_code(code) else {
            return Err(PeerError::InvalidMessageCode {
                code,
                length: self.protocol.length,
                protocol: self.protocol.name.clone(),
            });
        };
        if payload.len() > self.max_message_size {
            return Err(PeerError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }

        let frame = Frame::Message {
            code: wire_code,
            payload,
        };
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    "outbound queue to {} full, dropping message code {}",
                    self.node, code
                );
                Err(PeerError::QueueFull {
                    peer: self.node.id,
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                debug!("outbound queue to {} closed", self.node);
                self.closed.close();
                Err(PeerError::Closed(self.node.id))
            }
        }
    }

    fn node(&self) -> &NodeRecord {
        &self.node
    }

    fn protocol(&self) -> &NegotiatedProtocol {
        &self.protocol
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    fn close(&self) {
        if !self.closed.is_closed() {
            debug!("closing handle to {}", self.node);
        }
        self.closed.close();
    }
}
