//! Error types shared by the coordinator and worker processes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for map-reduce operations
pub type Result<T> = std::result::Result<T, MrError>;

/// Every failure the engine can report. All of them are fatal for a run
/// except where the caller explicitly logs and carries on (an invalid
/// request on a worker endpoint).
#[derive(Error, Debug)]
pub enum MrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not open input {path:?}: {source}")]
    InputOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("could not connect to worker on port {port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unexpected reply from worker on port {port}: {detail}")]
    UnexpectedReply { port: u16, detail: String },

    #[error("exchange with worker on port {port} yielded no result")]
    ExchangeLost { port: u16 },

    #[error("malformed reduce input at byte {offset}: {byte:#04x}")]
    MalformedReduceInput { offset: usize, byte: u8 },

    #[error("word {0:?} appears twice in the merged result table")]
    DuplicateKey(String),

    #[error("scheduler queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MrError {
    pub fn encode<E: std::fmt::Display>(err: E) -> Self {
        Self::Encode(err.to_string())
    }

    pub fn decode<E: std::fmt::Display>(err: E) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn queue<E: std::fmt::Display>(err: E) -> Self {
        Self::Queue(err.to_string())
    }
}
