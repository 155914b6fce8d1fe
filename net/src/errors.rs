use std::io;

use thiserror::Error;

/// Failure to turn a value into bytes or back. On the receiving side of an RPC this is a
/// protocol violation: the message is logged and dropped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("failed to serialize {what}: {msg}")]
    Serialize { what: &'static str, msg: String },

    #[error("failed to deserialize {what}: {msg}")]
    Deserialize { what: &'static str, msg: String },

    #[error("buffer is empty")]
    EmptyBuffer,

    #[error("unknown response marker byte {0}")]
    UnknownMarker(u8),
}

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum StateStreamError {
    #[error("state stream ended part way through {0}")]
    Truncated(&'static str),

    #[error("service name in state stream is not valid UTF-8")]
    InvalidServiceName,

    #[error("service name of {0} bytes does not fit in a state record")]
    ServiceNameTooLong(usize),

    #[error("state payload of {0} bytes does not fit in a state record")]
    PayloadTooLarge(usize),

    #[error("I/O error on state stream: {0}")]
    Io(#[from] io::Error),
}

pub type StateStreamResult<T> = Result<T, StateStreamError>;
