use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::StorageDestination;

/// An authenticated login: the transport's opaque credential plus the
/// destination every blob of this session is written to.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    credential: Vec<u8>,
    pub destination: Option<StorageDestination>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(credential: impl Into<Vec<u8>>) -> Self {
        Self {
            credential: credential.into(),
            destination: None,
            created_at: Utc::now(),
        }
    }

    pub fn credential(&self) -> &[u8] {
        &self.credential
    }

    pub fn with_destination(mut self, destination: StorageDestination) -> Self {
        self.destination = Some(destination);
        self
    }
}

// Never print the credential.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("credential", &format_args!("<{} bytes>", self.credential.len()))
            .field("destination", &self.destination)
            .field("created_at", &self.created_at)
            .finish()
    }
}

fn to_base64<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(bytes))
}

fn from_base64<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(d)?;
    STANDARD.decode(text).map_err(serde::de::Error::custom)
}
