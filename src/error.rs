use std::num::ParseIntError;
use thiserror::Error;

/// Errors surfaced by the public API and the network backend.
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// `run` was called while a session is still being serviced.
    #[error("a session is already running")]
    AlreadyRunning,

    /// A thread, runtime or buffer could not be allocated.
    #[error("resource allocation failed: {0}")]
    Resource(String),
}

pub type Result<T> = std::result::Result<T, LiveError>;
