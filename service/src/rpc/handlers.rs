use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

use groupcomm_net::{bin_serialization::RemoteFailure, CodecResult, Payload};
use log::warn;

/// What a handler produced: a value, nothing, or the handler's own failure
pub type RpcResult = Result<Option<Payload>, RemoteFailure>;

/// Receives the method calls addressed to one service name
pub trait RpcHandler: Send + Sync {
    fn invoke(self: &Self, method_name: &str, args: &Payload) -> RpcResult;
}

impl<F> RpcHandler for F
where
    F: Fn(&str, &Payload) -> RpcResult + Send + Sync,
{
    fn invoke(self: &Self, method_name: &str, args: &Payload) -> RpcResult {
        self(method_name, args)
    }
}

/// Turns bytes received for a service into the payload its handlers expect. A service that
/// needs to read values written by other versions of itself registers its own context.
pub trait DecodeContext: Send + Sync {
    fn decode(self: &Self, bytes: &[u8]) -> CodecResult<Payload>;
}

/// Passes bytes through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecodeContext;

impl DecodeContext for DefaultDecodeContext {
    fn decode(self: &Self, bytes: &[u8]) -> CodecResult<Payload> {
        Ok(Payload::from_bytes(bytes.to_vec()))
    }
}

#[derive(Clone)]
pub(crate) struct RegisteredHandler {
    pub(crate) handler: Arc<dyn RpcHandler>,
    pub(crate) context: Option<Arc<dyn DecodeContext>>,
}

impl RegisteredHandler {
    /// Runs the handler, turning a panic into a failure result
    pub(crate) fn invoke(self: &Self, service_name: &str, method_name: &str, args: &Payload) -> RpcResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.handler.invoke(method_name, args))) {
            Ok(result) => result,
            Err(_) => {
                warn!("RpcHandlerRegistry: handler for {service_name} panicked in {method_name}");
                Err(RemoteFailure::new(format!("{service_name}.{method_name} panicked")))
            }
        }
    }

    /// Arguments as the handler expects them, whether they came off the wire or from this node
    pub(crate) fn decode_args(self: &Self, args: &Payload) -> CodecResult<Payload> {
        match &self.context {
            Some(context) => context.decode(args.as_bytes()),
            None => Ok(args.clone()),
        }
    }

    /// Runs the handler the way a remote caller would see it: arguments and returned value
    /// both pass through the service's decode context
    pub(crate) fn invoke_in_context(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
    ) -> CodecResult<RpcResult> {
        let args = self.decode_args(args)?;
        match (self.invoke(service_name, method_name, &args), &self.context) {
            (Ok(Some(value)), Some(context)) => Ok(Ok(Some(context.decode(value.as_bytes())?))),
            (result, _) => Ok(result),
        }
    }
}

pub(crate) struct RpcHandlerRegistry {
    handlers: RwLock<HashMap<String, RegisteredHandler>>,
}

impl RpcHandlerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn register(
        self: &Self,
        service_name: &str,
        handler: Arc<dyn RpcHandler>,
        context: Option<Arc<dyn DecodeContext>>,
    ) {
        let replaced = self
            .handlers
            .write()
            .unwrap()
            .insert(service_name.to_owned(), RegisteredHandler { handler, context });
        if replaced.is_some() {
            warn!("RpcHandlerRegistry: replaced the handler registered for {service_name}");
        }
    }

    pub(crate) fn unregister(self: &Self, service_name: &str) -> bool {
        self.handlers.write().unwrap().remove(service_name).is_some()
    }

    pub(crate) fn get(self: &Self, service_name: &str) -> Option<RegisteredHandler> {
        self.handlers.read().unwrap().get(service_name).cloned()
    }

    #[cfg(test)]
    pub(crate) fn contains(self: &Self, service_name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(service_name)
    }

    pub(crate) fn context(self: &Self, service_name: &str) -> Option<Arc<dyn DecodeContext>> {
        self.handlers
            .read()
            .unwrap()
            .get(service_name)
            .and_then(|registered| registered.context.clone())
    }
}
