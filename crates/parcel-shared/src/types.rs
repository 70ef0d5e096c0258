use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CHANNEL_ID_PREFIX, GROUP_ID_PREFIX, KDF_CONTEXT_UNIQUE_ID, SELF_DESTINATION};
use crate::error::DestinationError;

// Logical destination identifier. The encoding is persisted with the
// session, so it must stay stable:
//   "self"       -> the user's own notes chat
//   "-100<id>"   -> broadcast channel
//   "-<id>"      -> small group
//   "<id>"       -> direct-message peer
//   anything else is a transport-native handle (e.g. a username)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn self_notes() -> Self {
        Self(SELF_DESTINATION.to_string())
    }

    pub fn for_peer(peer: NumericPeer) -> Self {
        match peer {
            NumericPeer::User(id) => Self(id.to_string()),
            NumericPeer::Group(id) => Self(format!("{GROUP_ID_PREFIX}{id}")),
            NumericPeer::Channel(id) => Self(format!("{CHANNEL_ID_PREFIX}{id}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_self(&self) -> bool {
        self.0 == SELF_DESTINATION
    }

    /// Parse the numeric fallback form of this identifier.
    pub fn parse_numeric(&self) -> Result<NumericPeer, DestinationError> {
        NumericPeer::parse(&self.0)
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A destination expressed as a bare transport integer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NumericPeer {
    User(u64),
    Group(u64),
    Channel(u64),
}

impl NumericPeer {
    pub fn parse(s: &str) -> Result<Self, DestinationError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DestinationError::Empty);
        }

        let digits = |rest: &str| -> Result<u64, DestinationError> {
            if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DestinationError::NotNumeric(s.to_string()));
            }
            rest.parse::<u64>()
                .map_err(|_| DestinationError::NotNumeric(s.to_string()))
        };

        if let Some(rest) = s.strip_prefix(CHANNEL_ID_PREFIX) {
            if !rest.is_empty() {
                return digits(rest).map(Self::Channel);
            }
        }
        if let Some(rest) = s.strip_prefix(GROUP_ID_PREFIX) {
            return digits(rest).map(Self::Group);
        }
        digits(s).map(Self::User)
    }

    pub fn raw_id(&self) -> u64 {
        match self {
            Self::User(id) | Self::Group(id) | Self::Channel(id) => *id,
        }
    }

    pub fn kind(&self) -> DestinationKind {
        match self {
            Self::User(_) => DestinationKind::DirectMessage,
            Self::Group(_) => DestinationKind::Group,
            Self::Channel(_) => DestinationKind::Channel,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    DirectMessage,
    Group,
    Channel,
    SelfNotes,
}

/// The conversation chosen to hold every blob of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageDestination {
    pub id: DestinationId,
    pub title: String,
    pub kind: DestinationKind,
}

impl StorageDestination {
    pub fn self_notes() -> Self {
        Self {
            id: DestinationId::self_notes(),
            title: crate::constants::SELF_DESTINATION_TITLE.to_string(),
            kind: DestinationKind::SelfNotes,
        }
    }
}

/// Message sequence number of a blob inside the destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RemoteLocator(pub i64);

impl std::fmt::Display for RemoteLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable local key of a stored file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct FileUniqueId(pub String);

impl FileUniqueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Key for a record that has not reached the transport yet.
    pub fn pending(upload: &UploadId) -> Self {
        Self(format!("pending-{}", upload.0))
    }

    /// Key derived from where the blob lives, for transports that expose no
    /// unique document id of their own.
    pub fn derive(destination: &DestinationId, locator: RemoteLocator) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_UNIQUE_ID);
        hasher.update(destination.as_str().as_bytes());
        hasher.update(&locator.0.to_le_bytes());
        let hash = hasher.finalize();
        Self(hex::encode(&hash.as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileUniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated identifier of one upload attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UploadId(pub Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
