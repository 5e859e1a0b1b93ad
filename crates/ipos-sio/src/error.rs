use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by DARE encryption and decryption.
///
/// Every authentication failure is reported as [`Error::TagMismatch`],
/// regardless of which byte of a package was modified.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sio: unsupported version")]
    UnsupportedVersion,

    #[error("sio: unsupported cipher suite")]
    UnsupportedCipher,

    #[error("sio: invalid payload size")]
    InvalidPayloadSize,

    #[error("sio: authentication failed")]
    TagMismatch,

    #[error("sio: size is too large for DARE")]
    UnexpectedSize,

    #[error("sio: size is not valid")]
    InvalidSize,

    #[error("sio: sequence number mismatch")]
    PackageOutOfOrder,

    #[error("sio: header nonce mismatch")]
    NonceMismatch,

    #[error("sio: unexpected EOF")]
    UnexpectedEof,

    #[error("sio: unexpected data after final package")]
    UnexpectedData,

    #[error("sio: write to stream after final package")]
    Finalized,

    #[error("sio: invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("sio: unable to read randomness: {0}")]
    Rand(String),

    #[error("sio: I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Recover a typed error from an `io::Error` returned by one of the
    /// `io::Read` / `io::Write` implementations of this crate.
    pub fn from_io(err: io::Error) -> Self {
        let is_sio = err.get_ref().is_some_and(|inner| inner.is::<Error>());
        if !is_sio {
            return Error::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(sio)) => *sio,
            Some(Err(other)) => Error::Io(io::Error::new(kind, other)),
            None => Error::Io(kind.into()),
        }
    }

    /// True for errors raised because a package failed authentication.
    pub fn is_tampered(&self) -> bool {
        matches!(self, Error::TagMismatch)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
