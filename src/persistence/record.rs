//! Log records
//!
//! One durable unit per mutating operation, written to the append-only log as
//! a single whitespace-separated line:
//!
//! ```text
//! SET <key> <value> <ttl_ms>
//! DELETE <key>
//! FLUSHALL
//! ```
//!
//! Keys and values are not escaped. A record whose key or value is empty or
//! contains ASCII whitespace cannot be read back, so [`LogRecord::check_encodable`]
//! rejects it before it is applied or written.
//! The same records travel over the replication stream as JSON, with values
//! written as strings when they are valid UTF-8.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum LogRecord {
    #[serde(rename = "SET")]
    Set {
        key: String,
        #[serde(with = "text_value")]
        value: Bytes,
        /// TTL in milliseconds, 0 = no expiration
        ttl_ms: u64,
    },
    #[serde(rename = "DELETE")]
    Delete { key: String },
    #[serde(rename = "FLUSHALL")]
    FlushAll,
}

impl LogRecord {
    pub fn set(key: &str, value: Bytes, ttl: Duration) -> Self {
        LogRecord::Set {
            key: key.to_string(),
            value,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Operation name as written to the log.
    pub fn op(&self) -> &'static str {
        match self {
            LogRecord::Set { .. } => "SET",
            LogRecord::Delete { .. } => "DELETE",
            LogRecord::FlushAll => "FLUSHALL",
        }
    }

    /// Fails when the record would not parse back from its own log line.
    pub fn check_encodable(&self) -> Result<()> {
        match self {
            LogRecord::Set { key, value, .. } => {
                check_field("key", key.as_bytes())?;
                check_field("value", value)
            }
            LogRecord::Delete { key } => check_field("key", key.as_bytes()),
            LogRecord::FlushAll => Ok(()),
        }
    }

    /// Formats the record as one newline-terminated log line.
    ///
    /// Only records that pass [`check_encodable`](Self::check_encodable)
    /// round-trip through [`parse`](Self::parse).
    pub fn encode(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(64);
        line.extend_from_slice(self.op().as_bytes());
        match self {
            LogRecord::Set { key, value, ttl_ms } => {
                line.push(b' ');
                line.extend_from_slice(key.as_bytes());
                line.push(b' ');
                line.extend_from_slice(value);
                line.push(b' ');
                line.extend_from_slice(ttl_ms.to_string().as_bytes());
            }
            LogRecord::Delete { key } => {
                line.push(b' ');
                line.extend_from_slice(key.as_bytes());
            }
            LogRecord::FlushAll => {}
        }
        line.push(b'\n');
        line
    }

    /// Parses one log line (with or without its trailing newline).
    ///
    /// A SET line without a TTL field is read as "no expiration". `DEL` is
    /// accepted as an alias of `DELETE`.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let mut fields = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|field| !field.is_empty());
        let op = fields
            .next()
            .ok_or_else(|| CacheError::Protocol("empty record".to_string()))?;
        let rest: Vec<&[u8]> = fields.collect();

        match (op, rest.as_slice()) {
            (b"SET", [key, value]) => Ok(LogRecord::Set {
                key: utf8(key)?,
                value: Bytes::copy_from_slice(value),
                ttl_ms: 0,
            }),
            (b"SET", [key, value, ttl]) => Ok(LogRecord::Set {
                key: utf8(key)?,
                value: Bytes::copy_from_slice(value),
                ttl_ms: utf8(ttl)?
                    .parse()
                    .map_err(|_| CacheError::Protocol("TTL must be numeric".to_string()))?,
            }),
            (b"DELETE" | b"DEL", [key]) => Ok(LogRecord::Delete { key: utf8(key)? }),
            (b"FLUSHALL", []) => Ok(LogRecord::FlushAll),
            _ => Err(CacheError::Protocol(format!(
                "unrecognised record: {}",
                String::from_utf8_lossy(line).trim_end()
            ))),
        }
    }
}

/// JSON form of a cache value: a string when the bytes are UTF-8, an array
/// of byte values otherwise. Both forms are accepted on input.
pub(crate) mod text_value {
    use std::fmt;

    use bytes::Bytes;
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(value) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => serializer.serialize_bytes(value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Bytes;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or an array of bytes")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Bytes, E> {
            Ok(Bytes::copy_from_slice(v.as_bytes()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Bytes, E> {
            Ok(Bytes::from(v))
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Bytes, E> {
            Ok(Bytes::copy_from_slice(v))
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Bytes, E> {
            Ok(Bytes::from(v))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Bytes, A::Error> {
            let mut buf = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                buf.push(byte);
            }
            Ok(Bytes::from(buf))
        }
    }
}

fn check_field(name: &str, field: &[u8]) -> Result<()> {
    if field.is_empty() {
        return Err(CacheError::InvalidRequest(format!("{} cannot be empty", name)));
    }
    if field.iter().any(u8::is_ascii_whitespace) {
        return Err(CacheError::InvalidRequest(format!(
            "{} cannot contain whitespace",
            name
        )));
    }
    Ok(())
}

fn utf8(field: &[u8]) -> Result<String> {
    String::from_utf8(field.to_vec())
        .map_err(|_| CacheError::Protocol("field is not valid UTF-8".to_string()))
}
