use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The secret key does not match the secret key used during upload")]
    SecretKeyMismatch,

    #[error("The sealing algorithm '{0}' is not supported")]
    UnsupportedSealAlgorithm(String),

    #[error("The object metadata is missing the internal encryption IV")]
    MissingIv,

    #[error("The internal encryption IV is malformed")]
    InvalidIv,

    #[error("The object metadata is missing the internal seal algorithm")]
    MissingSealAlgorithm,

    #[error("The internal seal algorithm is invalid and not supported")]
    InvalidSealAlgorithm,

    #[error("The object metadata is missing the internal sealed key for {0}")]
    MissingSealedKey(&'static str),

    #[error("The internal sealed key for {0} is invalid")]
    InvalidSealedKey(&'static str),

    #[error("The object metadata is missing the internal KMS key-ID for SSE-S3")]
    MissingKmsKeyId,

    #[error("The object metadata is missing the internal sealed KMS data key for SSE-S3")]
    MissingKmsSealedKey,

    #[error("The internal sealed KMS data key for SSE-S3 is invalid")]
    InvalidKmsSealedKey,

    #[error("invalid object metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid KMS master key: {0}")]
    InvalidMasterKey(String),

    #[error("KMS: {0}")]
    Kms(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Sio(#[from] ipos_sio::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
