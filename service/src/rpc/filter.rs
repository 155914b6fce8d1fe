use groupcomm_net::{
    bin_serialization::{ContractSerializer, Response},
    Address, CodecError, CodecResult,
};
use log::warn;

use crate::{
    model::ClusterNode,
    transport::{binding::TransportBinding, RspFilter},
};

use super::handlers::{RpcHandlerRegistry, RpcResult};

/// Lets a caller decide which responses count and when to stop waiting for more
pub trait ResponseFilter {
    fn is_acceptable(self: &mut Self, response: &RpcResult, sender: &ClusterNode) -> bool;
    fn need_more_responses(self: &Self) -> bool;
}

/// Decodes an encoded response. `Ok(None)` is the answer of a node with no handler for
/// the service, which callers never see.
pub(crate) fn decode_response(
    serializer: &ContractSerializer,
    handlers: &RpcHandlerRegistry,
    bytes: &[u8],
) -> CodecResult<Option<RpcResult>> {
    match serializer.deserialize_response(bytes)? {
        Response::Scoped { service_name, payload } => {
            let response = serializer.deserialize_response(&payload)?;
            match (response, handlers.context(&service_name)) {
                (Response::Value(value), Some(context)) => Ok(Some(Ok(Some(context.decode(value.as_bytes())?)))),
                (Response::Scoped { .. }, _) => Err(CodecError::Deserialize {
                    what: "response",
                    msg: String::from("scoped response inside a scoped response"),
                }),
                (response, _) => Ok(unscoped(response)),
            }
        }
        response => Ok(unscoped(response)),
    }
}

fn unscoped(response: Response) -> Option<RpcResult> {
    match response {
        Response::Null => Some(Ok(None)),
        Response::Value(value) => Some(Ok(Some(value))),
        Response::Failure(failure) => Some(Err(failure)),
        Response::NoHandler | Response::Scoped { .. } => None,
    }
}

/// Sits between the transport and the caller's filter. Rejects answers from nodes without a
/// handler and answers that cannot be decoded, and shows the caller's filter decoded results
/// from cluster nodes rather than raw bytes from transport addresses.
pub(crate) struct NoHandlerFilter<'a, 'f> {
    serializer: &'a ContractSerializer,
    handlers: &'a RpcHandlerRegistry,
    binding: &'a TransportBinding,
    user_filter: Option<&'a mut (dyn ResponseFilter + 'f)>,
}

impl<'a, 'f> NoHandlerFilter<'a, 'f> {
    pub(crate) fn new(
        serializer: &'a ContractSerializer,
        handlers: &'a RpcHandlerRegistry,
        binding: &'a TransportBinding,
        user_filter: Option<&'a mut (dyn ResponseFilter + 'f)>,
    ) -> Self {
        Self {
            serializer,
            handlers,
            binding,
            user_filter,
        }
    }
}

impl RspFilter for NoHandlerFilter<'_, '_> {
    fn is_acceptable(self: &mut Self, response: &[u8], sender: &Address) -> bool {
        let result = match decode_response(self.serializer, self.handlers, response) {
            Ok(Some(result)) => result,
            Ok(None) => return false,
            Err(err) => {
                warn!("RpcDispatcher: discarding response from {sender}: {err}");
                return false;
            }
        };

        match &mut self.user_filter {
            None => true,
            Some(filter) => match self.binding.cluster_node(sender) {
                Ok(node) => filter.is_acceptable(&result, &node),
                Err(err) => {
                    warn!("RpcDispatcher: discarding response from {sender}: {err}");
                    false
                }
            },
        }
    }

    fn need_more_responses(self: &Self) -> bool {
        match &self.user_filter {
            None => true,
            Some(filter) => filter.need_more_responses(),
        }
    }
}
