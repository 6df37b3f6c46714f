//! Session key extraction from responses.
//!
//! The server may hand out (or rotate) the anonymous session key on any
//! response, in one of three places. Each place has a pure extractor; they
//! are evaluated in priority order and the first non-empty value wins:
//!
//! 1. `body.owner.sessionKey`
//! 2. `body.sessionKey`
//! 3. the session key response header

use serde::Deserialize;

/// The parts of a response body that can carry a session key.
#[derive(Debug, Default, Deserialize)]
pub struct SessionEnvelope {
    #[serde(default)]
    owner: Option<OwnerEnvelope>,
    #[serde(default, rename = "sessionKey", alias = "session_key")]
    session_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OwnerEnvelope {
    #[serde(default, rename = "sessionKey", alias = "session_key")]
    session_key: Option<String>,
}

/// A response reduced to the places a session key can appear.
#[derive(Debug, Default)]
pub struct ResponseEnvelope {
    body: SessionEnvelope,
    header: Option<String>,
}

impl ResponseEnvelope {
    /// Build an envelope from a JSON body and the session header value.
    ///
    /// Bodies that are not objects (or do not match) carry no key.
    #[must_use]
    pub fn new(body: &serde_json::Value, header: Option<String>) -> Self {
        let body = if body.is_object() {
            SessionEnvelope::deserialize(body).unwrap_or_default()
        } else {
            SessionEnvelope::default()
        };
        Self { body, header }
    }
}

type Extractor = fn(&ResponseEnvelope) -> Option<&str>;

fn from_owner(envelope: &ResponseEnvelope) -> Option<&str> {
    envelope.body.owner.as_ref()?.session_key.as_deref()
}

fn from_body(envelope: &ResponseEnvelope) -> Option<&str> {
    envelope.body.session_key.as_deref()
}

fn from_header(envelope: &ResponseEnvelope) -> Option<&str> {
    envelope.header.as_deref()
}

/// Extractors in priority order.
const EXTRACTORS: [(&str, Extractor); 3] = [
    ("owner.sessionKey", from_owner),
    ("sessionKey", from_body),
    ("header", from_header),
];

/// Find the session key carried by a response, with the location it came from.
#[must_use]
pub fn extract_session_key(envelope: &ResponseEnvelope) -> Option<(&'static str, &str)> {
    EXTRACTORS.iter().find_map(|(source, extract)| {
        extract(envelope)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| (*source, key))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_owner_key_wins_over_everything() {
        let body = json!({"owner": {"sessionKey": "owner-key"}, "sessionKey": "top-key"});
        let envelope = ResponseEnvelope::new(&body, Some("header-key".to_string()));
        assert_eq!(
            extract_session_key(&envelope),
            Some(("owner.sessionKey", "owner-key"))
        );
    }

    #[test]
    fn test_top_level_key_wins_over_header() {
        let body = json!({"owner": {"type": "session"}, "sessionKey": "top-key"});
        let envelope = ResponseEnvelope::new(&body, Some("header-key".to_string()));
        assert_eq!(extract_session_key(&envelope), Some(("sessionKey", "top-key")));
    }

    #[test]
    fn test_header_used_as_last_resort() {
        let envelope = ResponseEnvelope::new(&json!({"items": []}), Some("header-key".to_string()));
        assert_eq!(extract_session_key(&envelope), Some(("header", "header-key")));
    }

    #[test]
    fn test_blank_values_fall_through() {
        let body = json!({"owner": {"sessionKey": "  "}, "sessionKey": ""});
        let envelope = ResponseEnvelope::new(&body, Some("header-key".to_string()));
        assert_eq!(extract_session_key(&envelope), Some(("header", "header-key")));
    }

    #[test]
    fn test_snake_case_alias_and_non_object_bodies() {
        let body = json!({"owner": {"session_key": "snake"}});
        let envelope = ResponseEnvelope::new(&body, None);
        assert_eq!(extract_session_key(&envelope), Some(("owner.sessionKey", "snake")));

        let envelope = ResponseEnvelope::new(&json!([1, 2, 3]), None);
        assert_eq!(extract_session_key(&envelope), None);
        let envelope = ResponseEnvelope::new(&serde_json::Value::Null, None);
        assert_eq!(extract_session_key(&envelope), None);
    }

    #[test]
    fn test_mistyped_fields_do_not_panic() {
        let body = json!({"owner": "user", "sessionKey": 42});
        let envelope = ResponseEnvelope::new(&body, Some("header-key".to_string()));
        assert_eq!(extract_session_key(&envelope), Some(("header", "header-key")));
    }
}
