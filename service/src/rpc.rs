/// Handlers that services register to receive group RPCs, and the contexts that decode
/// their arguments and results
pub mod handlers;

/// Response filters that let a caller stop waiting early
pub mod filter;

/// Sends group RPCs and dispatches inbound requests to handlers
pub mod dispatcher;

pub use dispatcher::CallOptions;
pub use filter::ResponseFilter;
pub use handlers::{DecodeContext, DefaultDecodeContext, RpcHandler, RpcResult};
