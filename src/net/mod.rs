pub mod client;
pub mod connection;
pub mod packet;
pub mod server;
pub mod userarea;

use crate::persistence::store::StoreError;

/// Everything that can go wrong inside a single client exchange. Any of
/// these terminates the connection that raised it.
#[derive(Debug)]
pub enum ProtocolError {
    Io(std::io::Error),
    TlsHandshake(String),
    InvalidPayloadSize { actual: usize, expected: usize },
    UnknownPacket { type_id: u8, name_id: u16 },
    UnexpectedPacket { expected: &'static str, actual: &'static str },
    InvalidPropertyIndex(u8),
    InvalidBlob(String),
    Db(StoreError),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Io(err) => write!(f, "io error: {}", err),
            ProtocolError::TlsHandshake(reason) => {
                write!(f, "tls handshake failed: {}", reason)
            }
            ProtocolError::InvalidPayloadSize { actual, expected } => write!(
                f,
                "invalid payload size {} bytes expected {} bytes",
                actual, expected
            ),
            ProtocolError::UnknownPacket { type_id, name_id } => {
                write!(f, "unknown packet type {:#04x} name {:#06x}", type_id, name_id)
            }
            ProtocolError::UnexpectedPacket { expected, actual } => {
                write!(f, "unexpected packet '{}', expected '{}'", actual, expected)
            }
            ProtocolError::InvalidPropertyIndex(index) => {
                write!(f, "invalid property index {}", index)
            }
            ProtocolError::InvalidBlob(reason) => write!(f, "invalid user area: {}", reason),
            ProtocolError::Db(err) => write!(f, "database error: {}", err),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(err) => Some(err),
            ProtocolError::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Io(err)
    }
}

impl From<StoreError> for ProtocolError {
    fn from(err: StoreError) -> Self {
        ProtocolError::Db(err)
    }
}

impl From<crate::game::dragon::PropertyIndexError> for ProtocolError {
    fn from(err: crate::game::dragon::PropertyIndexError) -> Self {
        ProtocolError::InvalidPropertyIndex(err.index)
    }
}
