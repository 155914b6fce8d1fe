/*
Aliases for data types for readability and to allow resizing in future
*/
use std::fmt;

use serde::{Deserialize, Serialize};

pub type ViewId = i64; // Assigned by the transport, -1 until the first view is accepted
pub type ScopeId = u16; // Distinguishes services sharing one transport channel
pub type ServiceNameLength = u16; // Length prefix of a service name in the state stream
pub type PayloadLength = u32; // Length prefix of a state payload, up to 4GB per service

pub const NO_VIEW_ID: ViewId = -1;

/// Opaque identity of a group member as assigned by the transport. Addresses are only
/// meaningful to the transport that issued them; the service translates them into
/// cluster nodes before handing them to applications.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(self: &Self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}
