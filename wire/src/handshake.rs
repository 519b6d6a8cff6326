//! Connection handshake: a client announces readiness with a literal
//! `ready` item, then identifies itself with `"<name> <chunk_size>"`.

use thiserror::Error;

/// First item a client must send after connecting.
pub const READY: &[u8] = b"ready";

#[derive(Debug, Error, PartialEq)]
pub enum HandshakeError {
    #[error("expected ready announcement, got {0:?}")]
    NotReady(Vec<u8>),

    #[error("malformed identification: {0}")]
    MalformedHello(String),

    #[error("chunk size must be a positive integer, got {0:?}")]
    BadChunkSize(String),
}

/// Check the readiness announcement byte-for-byte.
pub fn expect_ready(raw: &[u8]) -> Result<(), HandshakeError> {
    if raw == READY {
        Ok(())
    } else {
        Err(HandshakeError::NotReady(raw.to_vec()))
    }
}

/// Client identification sent right after the readiness announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub name: String,
    pub chunk_size: usize,
}

impl Hello {
    pub fn new(name: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            chunk_size,
        }
    }

    /// Parse the `"<name> <chunk_size>"` wire form.
    pub fn parse(raw: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| HandshakeError::MalformedHello("identification is not ASCII".into()))?;
        let (name, chunk_size) = text.split_once(' ').ok_or_else(|| {
            HandshakeError::MalformedHello(format!("missing chunk size in {text:?}"))
        })?;
        if name.is_empty() {
            return Err(HandshakeError::MalformedHello("empty client name".into()));
        }
        let chunk_size: usize = chunk_size
            .parse()
            .map_err(|_| HandshakeError::BadChunkSize(chunk_size.into()))?;
        if chunk_size == 0 {
            return Err(HandshakeError::BadChunkSize("0".into()));
        }
        Ok(Hello {
            name: name.to_string(),
            chunk_size,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{} {}", self.name, self.chunk_size).into_bytes()
    }
}
