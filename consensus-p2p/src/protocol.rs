//! Protocol descriptors and capability negotiation.
//!
//! A [`Protocol`] is static configuration: a short name, the versions this
//! node speaks (first is preferred), and the size of the message table at
//! each version. During the handshake both ends advertise their
//! [`Capability`] lists and [`match_protocols`] picks, per protocol name, the
//! highest version both sides support.
//!
//! Several protocols can share one connection. Each matched protocol gets a
//! contiguous range of wire message codes starting at its `offset`; codes
//! below [`BASE_PROTOCOL_LENGTH`] are reserved for the transport itself.

use {
    crate::error::ProtocolError,
    serde::{Deserialize, Serialize},
    std::collections::HashSet,
};

/// Eth protocol version 62.
pub const ETH62: u32 = 62;
/// Eth protocol version 63.
pub const ETH63: u32 = 63;

/// Number of wire codes reserved for transport-level frames.
pub const BASE_PROTOCOL_LENGTH: u64 = 16;

/// Immutable description of one named wire protocol.
///
/// Fields are private so that every value in circulation has passed
/// [`Protocol::new`]'s validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    name: String,
    versions: Vec<u32>,
    lengths: Vec<u64>,
    primary: bool,
}

impl Protocol {
    /// Build a validated descriptor.
    ///
    /// `versions` and `lengths` are parallel: `lengths[i]` is the number of
    /// message types defined at `versions[i]`.
    pub fn new(
        name: impl Into<String>,
        versions: Vec<u32>,
        lengths: Vec<u64>,
        primary: bool,
    ) -> Result<Self, ProtocolError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        if versions.is_empty() {
            return Err(ProtocolError::NoVersions(name));
        }
        if versions.len() != lengths.len() {
            return Err(ProtocolError::LengthMismatch {
                name,
                versions: versions.len(),
                lengths: lengths.len(),
            });
        }
        let mut seen = HashSet::with_capacity(versions.len());
        for (&version, &length) in versions.iter().zip(&lengths) {
            if !seen.insert(version) {
                return Err(ProtocolError::DuplicateVersion { name, version });
            }
            if length == 0 {
                return Err(ProtocolError::EmptyMessageTable { name, version });
            }
        }
        Ok(Self {
            name,
            versions,
            lengths,
            primary,
        })
    }

    /// The `eth` protocol at versions 62 and 63.
    pub fn eth() -> Self {
        Self {
            name: "eth".to_string(),
            versions: vec![ETH62, ETH63],
            lengths: vec![17, 8],
            primary: false,
        }
    }

    /// Short name used during capability negotiation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Supported versions, preferred first.
    pub fn versions(&self) -> &[u32] {
        &self.versions
    }

    /// Message-table size per entry of [`Self::versions`].
    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    /// Whether this is the node's main channel when several protocols match.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// The preferred version.
    pub fn primary_version(&self) -> u32 {
        self.versions[0]
    }

    /// Message-table size at `version`, if supported.
    pub fn length_of(&self, version: u32) -> Option<u64> {
        self.versions
            .iter()
            .position(|&v| v == version)
            .map(|i| self.lengths[i])
    }

    /// Capabilities to advertise in a hello, one per supported version.
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.versions.iter().map(|&version| Capability {
            name: self.name.clone(),
            version,
        })
    }

    /// Pick the highest version present in both `self` and `remote_versions`.
    ///
    /// The returned protocol has `offset == 0`; [`match_protocols`] assigns
    /// real offsets when several protocols share a connection.
    pub fn negotiate(&self, remote_versions: &[u32]) -> Option<NegotiatedProtocol> {
        self.versions
            .iter()
            .zip(&self.lengths)
            .filter(|(v, _)| remote_versions.contains(*v))
            .max_by_key(|(v, _)| **v)
            .map(|(&version, &length)| NegotiatedProtocol {
                name: self.name.clone(),
                version,
                length,
                offset: 0,
                primary: self.primary,
            })
    }
}

/// A protocol/version pair as advertised by a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    /// Protocol name.
    pub name: String,
    /// Protocol version.
    pub version: u32,
}

/// Outcome of negotiating one protocol on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedProtocol {
    /// Protocol name.
    pub name: String,
    /// Agreed version.
    pub version: u32,
    /// Size of the message table at `version`.
    pub length: u64,
    /// First wire code belonging to this protocol.
    pub offset: u64,
    /// Copied from the local descriptor.
    pub primary: bool,
}

impl NegotiatedProtocol {
    /// Whether `code` (relative to this protocol) is in the message table.
    pub fn contains_code(&self, code: u64) -> bool {
        code < self.length
    }

    /// Translate a protocol-relative code to a wire code.
    pub fn wire_code(&self, code: u64) -> Option<u64> {
        if self.contains_code(code) {
            self.offset.checked_add(code)
        } else {
            None
        }
    }

    /// Translate a wire code back to a protocol-relative code.
    pub fn local_code(&self, wire_code: u64) -> Option<u64> {
        let code = wire_code.checked_sub(self.offset)?;
        self.contains_code(code).then_some(code)
    }
}

/// Negotiate every local protocol against the remote's capabilities.
///
/// Matches are ordered by protocol name and laid out back to back in the
/// wire code space, starting after the reserved transport codes. Protocols
/// with no common version are left out; an empty result means the
/// connection must be rejected.
pub fn match_protocols(local: &[Protocol], remote: &[Capability]) -> Vec<NegotiatedProtocol> {
    let mut sorted: Vec<&Protocol> = local.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut offset = BASE_PROTOCOL_LENGTH;
    let mut matched = Vec::new();
    for protocol in sorted {
        let remote_versions: Vec<u32> = remote
            .iter()
            .filter(|cap| cap.name == protocol.name)
            .map(|cap| cap.version)
            .collect();
        if let Some(mut negotiated) = protocol.negotiate(&remote_versions) {
            negotiated.offset = offset;
            offset = offset.saturating_add(negotiated.length);
            matched.push(negotiated);
        }
    }
    matched
}

/// The protocol a connection should treat as its main channel: the first
/// match flagged primary, otherwise the first match.
pub fn primary_protocol(matched: &[NegotiatedProtocol]) -> Option<&NegotiatedProtocol> {
    matched
        .iter()
        .find(|p| p.primary)
        .or_else(|| matched.first())
}
