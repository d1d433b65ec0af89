use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the storage engine.
///
/// Logical not-found on hot lookup paths is reported as `Ok(None)`, not an
/// error; `NotFound` is reserved for resources that must exist (a store
/// opened without `create_if_missing`, a transaction id that was never
/// registered).
#[derive(Debug, Error)]
pub enum StoreError {
    /// An underlying file read, write, or open failed. Fatal to the
    /// enclosing operation; never retried.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A container file or record decoded to an impossible state.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// A required resource is absent.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The caller supplied an argument the engine cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
