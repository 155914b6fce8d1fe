/*
For group RPC, wraps requests and responses in envelopes for transmission by the transport.
- A request carries the name of the target service outside of the serialized invocation, so the
  receiver can route it, and choose the decode context registered for that service, before it
  decodes the invocation itself
- A response starts with a marker byte that distinguishes a null result from a value. Responses
  from services registered with their own decode context are wrapped again with the service
  name so the caller can decode them the same way
*/

use rmp_serde::{Deserializer, Serializer};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{
    errors::{CodecError, CodecResult},
    payload::{raw_bytes, Payload},
};

pub const NULL_VALUE: u8 = 0;
pub const SERIALIZABLE_VALUE: u8 = 1;

const BUFFER_CAPACITY: usize = 256;

/// The name of a method and its arguments, addressed to one service
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MethodCall {
    pub method_name: String,
    pub args: Payload,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RequestEnvelope {
    pub service_name: String,
    #[serde(with = "raw_bytes")]
    pub body: Vec<u8>,
}

/// A failure raised by an RPC handler. Failures travel back to the caller as ordinary
/// responses, so callers inspect results rather than catching errors from the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error, Deserialize, Serialize)]
#[error("{message}")]
pub struct RemoteFailure {
    pub message: String,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Response {
    /// The handler ran and returned nothing
    Null,

    /// The handler ran and returned a value
    Value(Payload),

    /// The handler ran and failed
    Failure(RemoteFailure),

    /// No handler is registered under the requested service name on the responding node
    NoHandler,

    /// An encoded response from a service that decodes with its own context
    Scoped {
        service_name: String,
        #[serde(with = "raw_bytes")]
        payload: Vec<u8>,
    },
}

pub struct ContractSerializer {
    buffer_capacity: usize,
}

impl ContractSerializer {
    pub fn new() -> Self {
        Self {
            buffer_capacity: BUFFER_CAPACITY,
        }
    }

    pub fn serialize_request(
        self: &Self,
        service_name: &str,
        method_call: &MethodCall,
    ) -> CodecResult<Vec<u8>> {
        let envelope = RequestEnvelope {
            service_name: service_name.to_owned(),
            body: self.serialize_entity(method_call, "method call")?,
        };
        self.serialize_entity(&envelope, "request envelope")
    }

    pub fn deserialize_request(self: &Self, buffer: &[u8]) -> CodecResult<RequestEnvelope> {
        if buffer.is_empty() {
            return Err(CodecError::EmptyBuffer);
        }
        self.deserialize_entity(buffer, "request envelope")
    }

    pub fn deserialize_method_call(self: &Self, body: &[u8]) -> CodecResult<MethodCall> {
        self.deserialize_entity(body, "method call")
    }

    pub fn serialize_response(self: &Self, response: &Response) -> CodecResult<Vec<u8>> {
        match response {
            Response::Null => Ok(vec![NULL_VALUE]),
            _ => {
                let mut buffer = Vec::with_capacity(self.buffer_capacity);
                buffer.push(SERIALIZABLE_VALUE);
                let mut serializer = Serializer::new(&mut buffer).with_struct_map();
                match response.serialize(&mut serializer) {
                    Ok(_) => Ok(buffer),
                    Err(err) => Err(CodecError::Serialize {
                        what: "response",
                        msg: format!("{err}"),
                    }),
                }
            }
        }
    }

    pub fn deserialize_response(self: &Self, buffer: &[u8]) -> CodecResult<Response> {
        match buffer.first() {
            None => Err(CodecError::EmptyBuffer),
            Some(&NULL_VALUE) => Ok(Response::Null),
            Some(&SERIALIZABLE_VALUE) => self.deserialize_entity(&buffer[1..], "response"),
            Some(&marker) => Err(CodecError::UnknownMarker(marker)),
        }
    }

    /// Wraps an already built response so that the caller knows which service's decode
    /// context applies to it
    pub fn scope_response(self: &Self, service_name: &str, response: &Response) -> CodecResult<Response> {
        Ok(Response::Scoped {
            service_name: service_name.to_owned(),
            payload: self.serialize_response(response)?,
        })
    }

    fn serialize_entity<T: Serialize>(self: &Self, entity: &T, what: &'static str) -> CodecResult<Vec<u8>> {
        let mut buffer = Vec::with_capacity(self.buffer_capacity);
        let mut serializer = Serializer::new(&mut buffer).with_struct_map();
        match entity.serialize(&mut serializer) {
            Ok(_) => Ok(buffer),
            Err(err) => Err(CodecError::Serialize {
                what,
                msg: format!("{err}"),
            }),
        }
    }

    fn deserialize_entity<T: DeserializeOwned>(self: &Self, buffer: &[u8], what: &'static str) -> CodecResult<T> {
        let mut deserializer = Deserializer::new(buffer);
        match Deserialize::deserialize(&mut deserializer) {
            Ok(entity) => Ok(entity),
            Err(err) => Err(CodecError::Deserialize {
                what,
                msg: format!("{err:?}"),
            }),
        }
    }
}

impl Default for ContractSerializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_keep_service_name_outside_of_method_call() {
        let serializer = ContractSerializer::new();
        let call = MethodCall {
            method_name: String::from("put"),
            args: Payload::encode(&("key", 42u32)).unwrap(),
        };

        let buffer = serializer.serialize_request("DistributedCache", &call).unwrap();
        let envelope = serializer.deserialize_request(&buffer).unwrap();

        assert_eq!(envelope.service_name, "DistributedCache");
        let decoded = serializer.deserialize_method_call(&envelope.body).unwrap();
        assert_eq!(decoded, call);
    }

    #[test]
    fn should_carry_binary_arguments_as_raw_bytes() {
        let serializer = ContractSerializer::new();
        let call = MethodCall {
            method_name: String::from("put"),
            args: Payload::from_bytes(vec![0xff; 200]),
        };

        let buffer = serializer.serialize_request("blobs", &call).unwrap();
        assert!(buffer.len() < 300, "request took {} bytes", buffer.len());

        let envelope = serializer.deserialize_request(&buffer).unwrap();
        assert_eq!(serializer.deserialize_method_call(&envelope.body).unwrap(), call);
    }

    #[test]
    fn should_encode_null_as_single_marker_byte() {
        let serializer = ContractSerializer::new();
        let buffer = serializer.serialize_response(&Response::Null).unwrap();
        assert_eq!(buffer, vec![NULL_VALUE]);
        assert_eq!(serializer.deserialize_response(&buffer).unwrap(), Response::Null);
    }

    #[test]
    fn should_prefix_values_with_marker() {
        let serializer = ContractSerializer::new();
        let response = Response::Value(Payload::encode(&"hello").unwrap());
        let buffer = serializer.serialize_response(&response).unwrap();
        assert_eq!(buffer[0], SERIALIZABLE_VALUE);
        assert_eq!(serializer.deserialize_response(&buffer).unwrap(), response);
    }

    #[test]
    fn should_nest_scoped_responses() {
        let serializer = ContractSerializer::new();
        let inner = Response::Failure(RemoteFailure::new("boom"));
        let scoped = serializer.scope_response("sessions", &inner).unwrap();
        let buffer = serializer.serialize_response(&scoped).unwrap();

        match serializer.deserialize_response(&buffer).unwrap() {
            Response::Scoped { service_name, payload } => {
                assert_eq!(service_name, "sessions");
                assert_eq!(serializer.deserialize_response(&payload).unwrap(), inner);
            }
            other => panic!("Wrong type of response {other:?}"),
        }
    }

    #[test]
    fn should_reject_unknown_marker_and_empty_buffers() {
        let serializer = ContractSerializer::new();
        assert_eq!(
            serializer.deserialize_response(&[7, 1, 2]),
            Err(CodecError::UnknownMarker(7))
        );
        assert_eq!(serializer.deserialize_response(&[]), Err(CodecError::EmptyBuffer));
        assert_eq!(serializer.deserialize_request(&[]), Err(CodecError::EmptyBuffer));
    }

    #[test]
    fn should_fail_on_garbage_request() {
        let serializer = ContractSerializer::new();
        match serializer.deserialize_request(&[0xc1, 0xc1, 0xc1]) {
            Err(CodecError::Deserialize { what, .. }) => assert_eq!(what, "request envelope"),
            other => panic!("Expected deserialize error, got {other:?}"),
        }
    }
}
