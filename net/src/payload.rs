use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{CodecError, CodecResult};

/// An application value in its serialized form. Arguments, return values and transferred
/// state all travel as payloads; the service never needs to know their concrete types.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Serializes a value with MessagePack, keeping struct field names so that payloads
    /// survive fields being added by later versions of a service.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Self> {
        match rmp_serde::to_vec_named(value) {
            Ok(bytes) => Ok(Self(bytes)),
            Err(err) => Err(CodecError::Serialize {
                what: "payload",
                msg: format!("{err}"),
            }),
        }
    }

    pub fn decode<T: DeserializeOwned>(self: &Self) -> CodecResult<T> {
        rmp_serde::from_slice(&self.0).map_err(|err| CodecError::Deserialize {
            what: "payload",
            msg: format!("{err}"),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(self: &Self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self: Self) -> Vec<u8> {
        self.0
    }

    pub fn len(self: &Self) -> usize {
        self.0.len()
    }

    pub fn is_empty(self: &Self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        raw_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        raw_bytes::deserialize(deserializer).map(Self)
    }
}

/// Writes a byte vector as one MessagePack bin rather than an array of integers. Use with
/// `#[serde(with = "raw_bytes")]`. Arrays of integers are still accepted on the way in.
pub mod raw_bytes {
    use std::fmt;

    use serde::{
        de::{SeqAccess, Visitor},
        Deserializer, Serializer,
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_byte_buf(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: serde::de::Error>(self, bytes: &[u8]) -> Result<Vec<u8>, E> {
            Ok(bytes.to_vec())
        }

        fn visit_byte_buf<E: serde::de::Error>(self, bytes: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(bytes)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                bytes.push(byte);
            }
            Ok(bytes)
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}
