use thiserror::Error;
use uuid::Uuid;

use btleplug::api::BDAddr;

pub type Result<T, E = ScaleError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("link error: {0}")]
    Link(#[from] btleplug::Error),

    #[error("service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("not connected")]
    NotConnected,

    #[error("no plugin handles {name} [{address}]")]
    NoPlugin { name: String, address: BDAddr },
}

/// Per-frame decode failures. These never end a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("checksum mismatch: calculated {computed:02X}, received {received:02X}")]
    ChecksumMismatch { computed: u8, received: u8 },

    #[error("unknown header {0:02X}")]
    UnknownHeader(u8),
}
