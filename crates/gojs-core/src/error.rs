//! Error types shared across the runtime.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Out-of-bounds linear-memory access.
    #[error("bad address")]
    Fault,

    #[error("type mismatch: {0}")]
    Type(String),

    #[error("index out of range")]
    OutOfRange,

    #[error("{0}: not found")]
    NotFound(String),

    #[error("{0}: missing reference count for id")]
    MissingRef(u32),

    #[error("{0}: invalid file descriptor")]
    InvalidFd(i64),

    /// ENOSYS-equivalent; surfaced to guest callbacks as `{code:"ENOSYS"}`.
    #[error("not implemented")]
    NotImplemented,

    /// Error reported by the guest over waPC.
    #[error("guest error: {0}")]
    Guest(String),

    #[error("command line and environment variables exceed the argv area")]
    ArgsTooLarge,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
