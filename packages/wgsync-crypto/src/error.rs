use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Unspecified ring error")]
    Unspecified,

    #[error("Invalid key encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

impl From<ring::error::Unspecified> for CryptoError {
    fn from(_: ring::error::Unspecified) -> Self {
        CryptoError::Unspecified
    }
}
