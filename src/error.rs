//! Error taxonomy (see spec §7) and the thread-local diagnostic buffer.
//!
//! Every public operation in this crate returns a `Result<T>`. Callers that
//! only care about success/failure can still recover the last diagnostic
//! message via [`last_error`], mirroring the C library's `GDKerrbuf`
//! convention.

use std::cell::RefCell;

use thiserror::Error;

/// Error taxonomy from spec §7.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Heap or file allocation failed; the column is left in its pre-call
    /// state.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An operation would violate a column invariant (e.g. updating a
    /// committed slot without `force`).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Operand atom types are incompatible with the requested operation.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Directory or heap file is unreadable, short, or otherwise corrupt.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A concurrency precondition was violated (e.g. unloading a column
    /// that is still fixed).
    #[error("concurrency error: {0}")]
    Concurrency(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

thread_local! {
    static LAST_ERROR: RefCell<Option<Error>> = const { RefCell::new(None) };
}

/// Record `err` as the calling thread's last diagnostic and return it,
/// so call sites can write `return Err(error::record(Error::...))`.
pub fn record(err: Error) -> Error {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(err.clone()));
    err
}

/// The last error recorded on the calling thread, if any.
pub fn last_error() -> Option<Error> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

/// Clear the calling thread's diagnostic buffer.
pub fn clear_last_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}
