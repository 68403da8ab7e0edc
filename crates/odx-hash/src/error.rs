/// Errors for object-id parsing and hash computation.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hash length: expected {expected} bytes, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("invalid hex length: expected {expected} chars, got {actual}")]
    InvalidHexLength { expected: usize, actual: usize },

    #[error("invalid hex character '{character}' at position {position}")]
    InvalidHex { position: usize, character: char },

    #[error("unknown hash algorithm id {0}")]
    UnknownAlgorithm(u8),

    #[error("SHA-1 collision attack detected")]
    Sha1Collision,
}
