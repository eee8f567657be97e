use thiserror::Error;

pub type Result<T> = std::result::Result<T, SealdupError>;

#[derive(Debug, Error)]
pub enum SealdupError {
    #[error("invalid dedup state tag: {0}")]
    InvalidDedupState(u8),

    #[error("unknown index variant: '{0}'")]
    UnknownVariant(String),

    #[error("persisted state error: {0}")]
    Persistence(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("boundary call failed: {0}")]
    Boundary(String),

    #[error("corrupt delta stream: {0}")]
    DeltaCorrupt(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("unknown object type tag: {0}")]
    UnknownObjectType(u8),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session aborted after an earlier fatal error")]
    SessionAborted,

    #[error("{0}")]
    Other(String),
}
