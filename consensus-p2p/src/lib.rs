//! TRv1 Consensus/P2P Boundary
//!
//! This crate is the seam between a pluggable consensus engine and the
//! node's peer-to-peer transport. Engines depend only on three traits:
//!
//! - [`Broadcaster`]: push blocks into the propagation queue, look up
//!   connected peers by identity and label, borrow the node key.
//! - [`NetworkService`]: read the local node record, manage static and
//!   trusted peer labels.
//! - [`Peer`]: send a message to one connected node, read its identity.
//!
//! Protocols are described by [`Protocol`] values that are validated once
//! at startup and negotiated per connection with [`match_protocols`].
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  Consensus engine (PoW, PoA, BFT, ...)          │
//!  └───────┬──────────────────────┬──────────────────┘
//!          │ Broadcaster          │ NetworkService
//!  ┌───────▼──────────────────────▼──────────────────┐
//!  │  P2pServer                                      │
//!  │  • PeerLabels (static / trusted)                │
//!  │  • connected Peer handles                       │
//!  │  • BlockQueue producer                          │
//!  └───────┬─────────────────────────────────────────┘
//!          │ add_peer / ChannelPeer
//!  ┌───────▼─────────────────────────────────────────┐
//!  │  Transport (TCP, hello handshake, frames)       │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`protocol`]    | Protocol descriptors and capability negotiation |
//! | [`broadcaster`] | `Broadcaster` trait |
//! | [`network`]     | `NetworkService` trait |
//! | [`peer`]        | `Peer` trait and the channel-backed handle |
//! | [`labels`]      | Peer label store |
//! | [`queue`]       | Block propagation queue |
//! | [`server`]      | `P2pServer`, the reference implementation |
//! | [`transport`]   | TCP transport and handshake |
//! | [`message`]     | Wire frames |
//! | [`node`]        | Node identity |
//! | [`config`]      | `P2pConfig` defaults and validation |
//! | [`error`]       | Error enums |

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod labels;
pub mod message;
pub mod network;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod transport;

pub use {
    broadcaster::Broadcaster,
    config::P2pConfig,
    error::{PeerError, ProtocolError, ServerError, TransportError},
    network::NetworkService,
    node::{NodeId, NodeRecord},
    peer::{ChannelPeer, Peer, PeerExt},
    protocol::{match_protocols, Capability, NegotiatedProtocol, Protocol},
    queue::{block_queue, BlockQueue, BlockQueueReceiver, QueuedBlock},
    server::P2pServer,
    transport::{InboundMessage, Transport},
};
