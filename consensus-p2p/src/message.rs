//! Wire frames exchanged by the reference transport.
//!
//! Every frame is a length-prefixed bincode encoding of [`Frame`]:
//!
//! ```text
//! [4 bytes: payload length (u32-le)] [N bytes: bincode(Frame)]
//! ```
//!
//! Protocol message payloads are opaque here; the consensus engine decides
//! how to encode them (see [`crate::peer::PeerExt::send_msg`]).

use {
    crate::{
        error::{Result, TransportError},
        node::NodeRecord,
        protocol::Capability,
    },
    serde::{Deserialize, Serialize},
};

/// First frame each side sends after the TCP connection is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Sender identity and listening address.
    pub node: NodeRecord,
    /// Every protocol/version pair the sender speaks.
    pub capabilities: Vec<Capability>,
}

/// Top-level wire type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Capability announcement.
    Hello(Hello),

    /// A protocol message. `code` is a wire code, i.e. already shifted by
    /// the owning protocol's offset.
    Message {
        /// Wire message code.
        code: u64,
        /// Encoded message body.
        payload: Vec<u8>,
    },

    /// Orderly shutdown notice.
    Disconnect {
        /// Human-readable reason.
        reason: String,
    },
}

impl Frame {
    /// Serialize this frame to bytes using bincode.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(TransportError::Codec)
    }

    /// Deserialize a frame from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(TransportError::Codec)
    }

    /// Serialize with a 4-byte little-endian length prefix.
    pub fn serialize_framed(&self, max_size: usize) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        if payload.len() > max_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: max_size,
            });
        }
        let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;
        let mut buf = Vec::with_capacity(4usize.saturating_add(payload.len()));
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Read the length prefix from a 4-byte buffer.
    pub fn read_frame_len(header: &[u8; 4]) -> usize {
        u32::from_le_bytes(*header) as usize
    }

    /// Return a human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::Message { .. } => "message",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        assert_matches::assert_matches,
        solana_pubkey::Pubkey,
        std::net::SocketAddr,
    };

    #[test]
    fn test_framed_hello() {
        let frame = Frame::Hello(Hello {
            node: NodeRecord::new(
                Pubkey::new_from_array([7; 32]),
                SocketAddr::from(([127, 0, 0, 1], 30303)),
            ),
            capabilities: crate::protocol::Protocol::eth().capabilities().collect(),
        });
        let framed = frame.serialize_framed(1_048_576).unwrap();
        let len = Frame::read_frame_len(framed[..4].try_into().unwrap());
        assert_eq!(len, framed.len() - 4);
        assert_eq!(Frame::deserialize(&framed[4..]).unwrap(), frame);
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::Message {
            code: 16,
            payload: vec![0u8; 64],
        };
        assert_matches!(
            frame.serialize_framed(8),
            Err(TransportError::FrameTooLarge { max: 8, .. })
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert_matches!(Frame::deserialize(&[0xff; 3]), Err(TransportError::Codec(_)));
    }

    #[test]
    fn test_kind_tags() {
        let frame = Frame::Disconnect {
            reason: "shutdown".to_string(),
        };
        assert_eq!(frame.kind(), "disconnect");
    }
}
