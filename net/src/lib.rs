/// Type aliases and small value types shared between the wire format and the service
pub mod data_types;

/// Error types for encoding and decoding
pub mod errors;

/// Opaque application values serialized with MessagePack
pub mod payload;

/// Request and response envelopes for group RPC
pub mod bin_serialization;

/// Framing for the multi-service state stream exchanged during state transfer
pub mod state_stream;

pub use data_types::*;
pub use errors::{CodecError, CodecResult, StateStreamError};
pub use payload::Payload;
