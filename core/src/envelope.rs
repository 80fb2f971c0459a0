//! Message envelopes.
//!
//! An [`Envelope`] is what travels over the bus: a kind tag, a payload whose
//! shape is determined by the kind, and optional routing metadata.
//!
//! # Design
//!
//! Payloads are serialized with `bincode`. Metadata is a small JSON object so
//! that routing hints (`reply_to`, `origin`, `reservation`, `correlation_id`)
//! can be copied between envelopes without knowing their meaning.
//!
//! Decoding is done per inbox: each service defines a sum type of the messages
//! it accepts and implements [`Inbound`] for it. A payload that does not match
//! the shape its kind requires is an [`EnvelopeError::Malformed`], never a panic.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Metadata key: destination the final response should be sent to
pub const REPLY_TO: &str = "reply_to";

/// Metadata key: routing key of the service that sent the envelope
pub const ORIGIN: &str = "origin";

/// Metadata key: reservation number an outcome concerns
pub const RESERVATION: &str = "reservation";

/// Metadata key: requester-chosen id echoed on direct replies
pub const CORRELATION_ID: &str = "correlation_id";

/// Error types for envelope encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The kind tag is not part of the protocol
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    /// The payload does not have the shape its kind requires
    #[error("Malformed {kind} payload: {reason}")]
    Malformed {
        /// Kind of the offending message
        kind: String,
        /// What was wrong
        reason: String,
    },

    /// A metadata entry the receiver needs is absent
    #[error("{kind} message is missing '{key}' metadata")]
    MissingMetadata {
        /// Kind of the offending message
        kind: String,
        /// Missing key
        key: &'static str,
    },

    /// The payload could not be serialized
    #[error("Failed to encode {kind} payload: {reason}")]
    Encode {
        /// Kind of the message being encoded
        kind: String,
        /// Serializer error
        reason: String,
    },
}

/// A message as carried by the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Kind tag selecting the payload shape
    pub kind: String,
    /// Serialized payload (may be empty)
    pub payload: Vec<u8>,
    /// Optional routing metadata (a JSON object)
    pub metadata: Option<serde_json::Value>,
}

impl Envelope {
    /// Create an envelope from already-serialized parts.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Vec<u8>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            metadata,
        }
    }

    /// Create an envelope with no payload.
    #[must_use]
    pub fn empty(kind: impl Into<String>) -> Self {
        Self::new(kind, Vec::new(), None)
    }

    /// Serialize `payload` into a new envelope of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn encode<T: Serialize + ?Sized>(kind: impl Into<String>, payload: &T) -> Result<Self, EnvelopeError> {
        let kind = kind.into();
        let bytes = bincode::serialize(payload).map_err(|e| EnvelopeError::Encode {
            kind: kind.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(kind, bytes, None))
    }

    /// Deserialize the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the bytes are not a `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        bincode::deserialize(&self.payload).map_err(|e| EnvelopeError::Malformed {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }

    /// Set a string metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }

    /// Set a string metadata entry in place.
    ///
    /// Non-object metadata is replaced by an object.
    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        let metadata = self
            .metadata
            .get_or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if !metadata.is_object() {
            *metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = metadata.as_object_mut() {
            map.insert(key.to_string(), serde_json::Value::String(value.into()));
        }
    }

    /// Replace the metadata wholesale.
    #[must_use]
    pub fn with_metadata_from(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Read a string metadata entry.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }

    /// Read a string metadata entry the receiver cannot do without.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MissingMetadata`] when the entry is absent.
    pub fn require_metadata(&self, key: &'static str) -> Result<&str, EnvelopeError> {
        self.metadata_str(key).ok_or_else(|| EnvelopeError::MissingMetadata {
            kind: self.kind.clone(),
            key,
        })
    }

    /// Error for a payload whose decoded value is out of shape.
    #[must_use]
    pub fn malformed(&self, reason: impl Into<String>) -> EnvelopeError {
        EnvelopeError::Malformed {
            kind: self.kind.clone(),
            reason: reason.into(),
        }
    }
}

/// A typed message set accepted by one inbox.
pub trait Inbound: Sized {
    /// Decode an envelope.
    ///
    /// Returns `Ok(None)` for kinds this inbox does not handle; those are
    /// ignored by the receiver so that the protocol can grow.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] when a handled kind carries a payload or
    /// metadata of the wrong shape.
    fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, EnvelopeError>;
}
