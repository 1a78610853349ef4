use std::io;
use thiserror::Error;

/// Recoverable failures surfaced to callers. Programmer misuse
/// (recursive lock acquire, release by a non-holder, corrupt inode
/// magic) panics instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("free map exhausted")]
    AllocationExhausted,
    #[error("file name too long")]
    NameTooLong,
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory in use or not empty")]
    NotEmpty,
    #[error("writes denied")]
    WriteDenied,
    #[error("offset out of range")]
    OutOfRange,
    #[error("device i/o failed: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
