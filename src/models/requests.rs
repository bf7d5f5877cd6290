//! Request DTOs for the cache node API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Request body for `POST /cache/set`
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: String,
    /// Optional TTL in milliseconds; absent or 0 means no expiration
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key).or_else(|| validate_value(&self.value))
    }
}

/// Query string carrying a single key, e.g. `/cache/get?key=foo`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

impl KeyQuery {
    /// Returns the key, rejecting a missing or empty parameter.
    pub fn require(self) -> Result<String> {
        match self.key {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(CacheError::InvalidRequest(
                "Missing key parameter".to_string(),
            )),
        }
    }
}

fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    // Keys are written unescaped to the append-only log.
    if key.chars().any(char::is_whitespace) {
        return Some("Key cannot contain whitespace".to_string());
    }
    None
}

// Values share the log line with the key, so the same separators are banned.
fn validate_value(value: &str) -> Option<String> {
    if value.is_empty() {
        return Some("Value cannot be empty".to_string());
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Some("Value cannot contain whitespace or control characters".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"key": "test", "value": "hello"}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.key, "test");
        assert_eq!(req.value, "hello");
        assert!(req.ttl_ms.is_none());
    }

    #[test]
    fn test_set_request_with_ttl() {
        let json = r#"{"key": "test", "value": "hello", "ttl_ms": 1500}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.ttl_ms, Some(1500));
    }

    #[test]
    fn test_validate_rejects_bad_keys() {
        for key in ["", "has space", "tab\there", "x".repeat(MAX_KEY_LENGTH + 1).as_str()] {
            let req = SetRequest {
                key: key.to_string(),
                value: "v".to_string(),
                ttl_ms: None,
            };
            assert!(req.validate().is_some(), "{key:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        for value in ["", "hello world", "x\nFLUSHALL\nSET y z", "cr\r", "nul\0"] {
            let req = SetRequest {
                key: "k".to_string(),
                value: value.to_string(),
                ttl_ms: None,
            };
            assert!(req.validate().is_some(), "{value:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_valid_request() {
        let req = SetRequest {
            key: "valid_key".to_string(),
            value: "any_value-at.all".to_string(),
            ttl_ms: Some(60_000),
        };
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_key_query_require() {
        let present = KeyQuery {
            key: Some("k".to_string()),
        };
        assert_eq!(present.require().unwrap(), "k");
        assert!(KeyQuery::default().require().is_err());
        assert!(KeyQuery {
            key: Some(String::new())
        }
        .require()
        .is_err());
    }
}
