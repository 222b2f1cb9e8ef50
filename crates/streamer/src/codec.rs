//! # Wire Codec
//!
//! The two message shapes exchanged on a channel, and their JSON layout.
//!
//! ```text
//! Request  { "Id": 4, "M": "Sample.EchoHandler.Echo", "A": ["hi"] }
//! Response { "Id": 4, "R": "hi" }
//! Response { "Id": 5, "E": "Unknown method 'Sample.Nope'" }
//! ```
//!
//! ## Invariants
//! - `Id` is always present.
//! - `M`, `A`, `R` and `E` are omitted when absent or empty.
//! - Arguments and results stay opaque [`Value`]s here. Conversion to concrete
//!   types happens only once the target parameter or result type is known.

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

/// Encoding or decoding failures for a single message.
#[derive(Debug, Clone)]
pub enum Error {
    /// The bytes did not hold a well-formed message.
    Malformed(String),
    /// The message could not be serialized.
    Encode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            Self::Encode(msg) => write!(f, "Failed to encode message: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A call issued by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "Id")]
    pub id: u64,
    /// Fully qualified wire name, matched case-insensitively by the server.
    #[serde(rename = "M", default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Positional arguments.
    #[serde(
        rename = "A",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_empty"
    )]
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            method: Some(method.into()),
            args,
        }
    }

    /// The method name, or an empty string when the request carries none.
    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or("")
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
    }
}

/// The answer to one [`Request`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Id")]
    pub id: u64,
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// A successful response. A `null` result is folded into "no value".
    pub fn ok(id: u64, result: Option<Value>) -> Self {
        Self {
            id,
            result: result.filter(|v| !v.is_null()),
            error: None,
        }
    }

    /// A failed response carrying only a human-readable message.
    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn unknown_method(id: u64, method: &str) -> Self {
        Self::err(id, format!("Unknown method '{}'", method))
    }

    /// Splits the response into its outcome. An error wins over a result if a
    /// misbehaving peer sends both.
    pub fn into_outcome(self) -> std::result::Result<Option<Value>, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self.result),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}
