//! Canonical tracking events built from loosely-typed beacon requests.
//!
//! Building is total: missing fields, wrong JSON types, and unparseable
//! bodies all fall back to documented defaults instead of failing.

use axum::http::HeaderMap;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Flat beacon fields older front-end builds send next to `event_type`
/// instead of nesting them under `event_data`.
const LEGACY_DATA_FIELDS: [&str; 4] = ["element", "text", "scroll_depth", "time_on_page"];

pub const UNKNOWN: &str = "unknown";

/// One unit of telemetry. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingEvent {
    id: String,
    #[serde(serialize_with = "iso8601_millis")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "ip")]
    client_address: String,
    url: String,
    referrer: String,
    user_agent: String,
    host: String,
    event_type: String,
    event_data: Map<String, Value>,
}

fn iso8601_millis<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl TrackingEvent {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Timestamp in the wire format (`2024-05-01T12:00:00.000Z`).
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn client_address(&self) -> &str {
        &self.client_address
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_data(&self) -> &Map<String, Value> {
        &self.event_data
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Parse a raw request body. Anything that is not valid JSON becomes `{}`.
pub fn parse_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Best-effort caller address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then `"unknown"`.
pub fn client_address(headers: &HeaderMap) -> String {
    header(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header(headers, "x-real-ip"))
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn string_field(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn event_data(body: &Value) -> Map<String, Value> {
    match body.get("event_data") {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => Map::new(),
        None => LEGACY_DATA_FIELDS
            .iter()
            .filter_map(|&key| {
                body.get(key)
                    .filter(|v| !v.is_null())
                    .map(|v| (key.to_string(), v.clone()))
            })
            .collect(),
    }
}

/// Build a tracking event from a beacon body and its request headers.
pub fn build(body: &Value, headers: &HeaderMap) -> TrackingEvent {
    let event_type = body
        .get("event_type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string();

    TrackingEvent {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        client_address: client_address(headers),
        url: string_field(body, "url"),
        referrer: string_field(body, "referrer"),
        user_agent: string_field(body, "user_agent"),
        host: string_field(body, "host"),
        event_type,
        event_data: event_data(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;
    use std::collections::HashSet;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.append(name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn copies_known_fields() {
        let body = json!({
            "url": "https://x.test/",
            "referrer": "https://search.test/",
            "user_agent": "Mozilla/5.0",
            "host": "x.test",
            "event_type": "button_click",
            "event_data": {"element": "cta", "position": 3},
            "session_secret": "not copied"
        });
        let event = build(&body, &HeaderMap::new());

        assert_eq!(event.url(), "https://x.test/");
        assert_eq!(event.referrer(), "https://search.test/");
        assert_eq!(event.user_agent(), "Mozilla/5.0");
        assert_eq!(event.host(), "x.test");
        assert_eq!(event.event_type(), "button_click");
        assert_eq!(event.event_data().get("position"), Some(&json!(3)));

        let wire: Value = serde_json::from_slice(&event.to_json_bytes().unwrap()).unwrap();
        assert!(wire.get("session_secret").is_none());
    }

    #[test]
    fn malformed_bodies_get_defaults() {
        let bodies = [
            json!({}),
            json!(null),
            json!([1, 2, 3]),
            json!("page_view"),
            json!({"url": 42, "event_type": ["x"], "event_data": "nope", "host": null}),
            json!({"event_type": ""}),
        ];
        for body in bodies {
            let event = build(&body, &HeaderMap::new());
            assert_eq!(event.url(), "");
            assert_eq!(event.referrer(), "");
            assert_eq!(event.user_agent(), "");
            assert_eq!(event.host(), "");
            assert_eq!(event.event_type(), UNKNOWN);
            assert!(event.event_data().is_empty());
            assert_eq!(event.client_address(), UNKNOWN);
            assert!(!event.id().is_empty());
        }
    }

    #[test]
    fn unparseable_body_is_empty_object() {
        assert_eq!(parse_body(b"{not json"), json!({}));
        assert_eq!(parse_body(b""), json!({}));
        assert_eq!(parse_body(br#"{"url":"a"}"#), json!({"url": "a"}));
    }

    #[test]
    fn legacy_flat_fields_fold_into_event_data() {
        let body = json!({
            "event_type": "scroll_depth",
            "scroll_depth": 75,
            "time_on_page": 12.5,
            "text": null
        });
        let event = build(&body, &HeaderMap::new());
        assert_eq!(event.event_data().len(), 2);
        assert_eq!(event.event_data().get("scroll_depth"), Some(&json!(75)));
        assert!(event.event_data().get("text").is_none());
    }

    #[test]
    fn explicit_event_data_wins_over_legacy_fields() {
        let body = json!({"event_data": {"a": 1}, "element": "ignored"});
        let event = build(&body, &HeaderMap::new());
        assert_eq!(event.event_data().len(), 1);
        assert!(event.event_data().get("element").is_none());
    }

    #[test]
    fn client_address_precedence() {
        let both = headers(&[
            ("x-forwarded-for", " 203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_address(&both), "203.0.113.7");

        let real_only = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_address(&real_only), "198.51.100.2");

        let empty_forwarded = headers(&[("x-forwarded-for", ""), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_address(&empty_forwarded), "198.51.100.2");

        assert_eq!(client_address(&HeaderMap::new()), UNKNOWN);
    }

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<String> = (0..500)
            .map(|_| build(&json!({}), &HeaderMap::new()).id().to_string())
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn wire_format_uses_beacon_field_names() {
        let event = build(&json!({"event_type": "page_view"}), &headers(&[("x-real-ip", "192.0.2.1")]));
        let wire: Value = serde_json::from_slice(&event.to_json_bytes().unwrap()).unwrap();

        assert_eq!(wire["id"], json!(event.id()));
        assert_eq!(wire["ip"], json!("192.0.2.1"));
        assert_eq!(wire["event_type"], json!("page_view"));
        assert_eq!(wire["event_data"], json!({}));
        let ts = wire["timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts, event.timestamp_iso());
    }
}
