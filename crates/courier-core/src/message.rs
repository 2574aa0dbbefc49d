//! The immutable event value object and its canonical JSON form.
//!
//! A message is identified by a library-generated UUID and a
//! `<topic>.<event>` name; the topic is the segment before the first dot.
//! Timestamps are unset at construction and stamped by the publisher, so a
//! message built inside a request keeps the wall-clock time of the publish
//! call rather than the time of construction.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de, ser, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// An immutable domain event.
///
/// The payload is opaque bytes; callers serialize their own object before
/// construction (or use [`Message::json`]). Equality covers every field,
/// which makes encode/decode round-trips directly assertable in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    uuid: Uuid,
    name: String,
    published_at: Option<DateTime<Utc>>,
    deliver_at: Option<DateTime<Utc>>,
    payload: Bytes,
}

impl Message {
    /// Creates a message with the given name and payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] unless the name matches
    /// `<topic>.<event>` where both segments consist of alphanumerics,
    /// underscores, and dashes.
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Result<Self, Error> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(Error::InvalidName { name });
        }
        Ok(Self {
            uuid: Uuid::new_v4(),
            name,
            published_at: None,
            deliver_at: None,
            payload: payload.into(),
        })
    }

    /// Creates a message by JSON-encoding the given payload object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for a malformed name and
    /// [`Error::InvalidMessage`] when the payload fails to serialize.
    pub fn json<T: Serialize>(name: impl Into<String>, payload: &T) -> Result<Self, Error> {
        let data = serde_json::to_vec(payload).map_err(|e| Error::InvalidMessage(e.to_string()))?;
        Self::new(name, data)
    }

    /// Sets the earliest delivery time for the message.
    #[must_use]
    pub fn with_deliver_at(mut self, deliver_at: DateTime<Utc>) -> Self {
        self.deliver_at = Some(deliver_at);
        self
    }

    /// Sets the publish time explicitly.
    ///
    /// Normally left unset; the publisher stamps it when the message is
    /// accepted. Useful when encoding messages outside a publisher.
    #[must_use]
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    /// The unique identifier assigned at construction.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The full `<topic>.<event>` name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The topic, i.e. the name segment before the first dot.
    pub fn topic(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// When the message was published, once stamped by the publisher.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    /// The earliest time the message may be delivered.
    pub fn deliver_at(&self) -> Option<DateTime<Utc>> {
        self.deliver_at
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Decodes the payload as JSON into the given type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] when the payload is not valid JSON
    /// for `T`.
    pub fn payload_json<T: de::DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.payload).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    /// Encodes the message into its canonical JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] when the message has not been
    /// stamped with a publish time yet.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    /// Decodes a message from its canonical JSON form.
    ///
    /// A missing `deliver_at` is backfilled from `published_at`; any other
    /// missing meta field is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] for malformed or incomplete input.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    /// Fills in unset timestamps at publish time.
    pub(crate) fn stamp(&mut self, now: DateTime<Utc>) {
        let published_at = *self.published_at.get_or_insert(now);
        self.published_at = Some(published_at);
        if self.deliver_at.is_none() {
            self.deliver_at = Some(published_at);
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut segments = name.split('.');
    let (Some(topic), Some(event), None) = (segments.next(), segments.next(), segments.next())
    else {
        return false;
    };
    let segment_ok = |segment: &str| {
        !segment.is_empty()
            && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    };
    segment_ok(topic) && segment_ok(event)
}

#[derive(Serialize, Deserialize)]
struct EncodedMeta {
    uuid: Uuid,
    published_at: DateTime<Utc>,
    #[serde(default)]
    deliver_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct EncodedMessage {
    name: String,
    meta: EncodedMeta,
    payload: String,
}

impl Serialize for Message {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine as _;

        let published_at = self
            .published_at
            .ok_or_else(|| ser::Error::custom("message has not been stamped with a publish time"))?;
        let deliver_at = self.deliver_at.unwrap_or(published_at);
        EncodedMessage {
            name: self.name.clone(),
            meta: EncodedMeta { uuid: self.uuid, published_at, deliver_at: Some(deliver_at) },
            payload: base64::engine::general_purpose::STANDARD.encode(&self.payload),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use base64::Engine as _;

        let encoded = EncodedMessage::deserialize(deserializer)?;
        if encoded.name.is_empty() {
            return Err(de::Error::custom("message name must not be empty"));
        }
        let payload = base64::engine::general_purpose::STANDARD
            .decode(encoded.payload.as_bytes())
            .map_err(|e| de::Error::custom(format!("payload is not valid base64: {e}")))?;
        let deliver_at = encoded.meta.deliver_at.unwrap_or(encoded.meta.published_at);
        Ok(Self {
            uuid: encoded.meta.uuid,
            name: encoded.name,
            published_at: Some(encoded.meta.published_at),
            deliver_at: Some(deliver_at),
            payload: payload.into(),
        })
    }
}
