//! The message envelope exchanged between client and server.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::value::{missing_key, Object, Value};
use crate::error::TransportResult;

/// Outcome carried by a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Error,
}

/// A single protocol message.
///
/// Requests carry a `message_type` and usually some `data`; replies echo
/// the request's type and id and always carry a `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Operation name, e.g. "PING" or "ACCOUNT_CREATE".
    #[serde(rename = "type")]
    pub message_type: String,

    /// Request identifier used to correlate replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Present on replies only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// Human-readable text. `None` = absent, `Some(None)` = explicit null.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub content: Option<Option<String>>,

    /// Ordered payload.
    #[serde(default)]
    pub data: Object,
}

/// Distinguishes an explicit `null` from a missing field.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl Message {
    /// Create a request of the given type with no payload.
    pub fn request(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            id: None,
            status: None,
            content: None,
            data: Object::new(),
        }
    }

    /// Create a success reply.
    pub fn success(message_type: impl Into<String>) -> Self {
        Self::request(message_type).with_status(Status::Success)
    }

    /// Create an error reply with a description.
    pub fn error(message_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self::request(message_type)
            .with_status(Status::Error)
            .with_content(content)
    }

    /// Success reply to `self`, keeping its type and id.
    pub fn reply_success(&self) -> Self {
        let mut reply = Self::success(self.message_type.clone());
        reply.id = self.id;
        reply
    }

    /// Error reply to `self`, keeping its type and id.
    pub fn reply_error(&self, content: impl Into<String>) -> Self {
        let mut reply = Self::error(self.message_type.clone(), content);
        reply.id = self.id;
        reply
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(Some(content.into()));
        self
    }

    pub fn with_null_content(mut self) -> Self {
        self.content = Some(None);
        self
    }

    /// Add a payload entry (builder pattern).
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Add a serialized domain object as a payload entry.
    pub fn with_encoded<T: Serialize + ?Sized>(
        mut self,
        key: impl Into<String>,
        value: &T,
    ) -> TransportResult<Self> {
        self.data.insert(key.into(), Value::encode(value)?);
        Ok(self)
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(Status::Success)
    }

    pub fn is_error(&self) -> bool {
        self.status == Some(Status::Error)
    }

    /// The content text, if present and not null.
    pub fn content(&self) -> Option<&str> {
        self.content.as_ref().and_then(|c| c.as_deref())
    }

    /// Get a required payload entry.
    pub fn get(&self, key: &str) -> TransportResult<&Value> {
        self.data.get(key).ok_or_else(|| missing_key(key))
    }

    pub fn get_str(&self, key: &str) -> TransportResult<&str> {
        self.get(key)?.as_str()
    }

    /// Get an optional string entry; absent, null and non-string all yield `None`.
    pub fn get_optional_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str().ok())
    }

    pub fn get_i64(&self, key: &str) -> TransportResult<i64> {
        self.get(key)?.as_i64()
    }

    pub fn get_f64(&self, key: &str) -> TransportResult<f64> {
        self.get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> TransportResult<bool> {
        self.get(key)?.as_bool()
    }

    /// Decode a payload entry into a domain type.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> TransportResult<T> {
        self.get(key)?.decode()
    }
}
