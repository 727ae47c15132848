//! Deferred request payloads.
//!
//! A payload is stored as an owned value and encoded once, right before
//! dispatch. Setting a new payload drops the previous one unencoded.

use crate::error::{PayloadFormat, RemoteError};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// Object-safe JSON payload; implemented for every owned `Serialize` value.
pub trait JsonPayload: Send {
    /// # Errors
    /// Returns the serializer's error
    fn encode_json(&self) -> Result<Vec<u8>, serde_json::Error>;
}

impl<T: Serialize + Send> JsonPayload for T {
    fn encode_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Object-safe binary payload; implemented for every `prost::Message`.
pub trait BinaryPayload: Send {
    /// # Errors
    /// Returns `prost::EncodeError` if the buffer cannot hold the message
    fn encode_binary(&self) -> Result<Vec<u8>, prost::EncodeError>;
}

impl<M: prost::Message> BinaryPayload for M {
    fn encode_binary(&self) -> Result<Vec<u8>, prost::EncodeError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

/// Payload strategy of a pending call.
#[derive(Default)]
pub enum Payload {
    /// No request body
    #[default]
    None,
    /// `serde_json` encoding of any serializable value
    Json(Box<dyn JsonPayload>),
    /// Protobuf encoding of a schema-declared message
    Binary(Box<dyn BinaryPayload>),
}

impl Payload {
    #[must_use]
    pub fn json<T: Serialize + Send + 'static>(value: T) -> Self {
        Self::Json(Box::new(value))
    }

    #[must_use]
    pub fn binary<M: prost::Message + 'static>(message: M) -> Self {
        Self::Binary(Box::new(message))
    }

    #[must_use]
    pub fn format(&self) -> Option<PayloadFormat> {
        match self {
            Self::None => None,
            Self::Json(_) => Some(PayloadFormat::Json),
            Self::Binary(_) => Some(PayloadFormat::Binary),
        }
    }

    /// Encode the payload, consuming it.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Encode`; no partial body is ever produced.
    pub fn encode(self) -> Result<Bytes, RemoteError> {
        match self {
            Self::None => Ok(Bytes::new()),
            Self::Json(value) => value
                .encode_json()
                .map(Bytes::from)
                .map_err(|e| RemoteError::encode(PayloadFormat::Json, e)),
            Self::Binary(message) => message
                .encode_binary()
                .map(Bytes::from)
                .map_err(|e| RemoteError::encode(PayloadFormat::Binary, e)),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format() {
            None => f.write_str("Payload::None"),
            Some(format) => write!(f, "Payload::{format}"),
        }
    }
}
