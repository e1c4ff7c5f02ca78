//! Request and response envelopes
//!
//! [`RequestEnvelope`] is the inbound HTTP request detached from the
//! transport. [`ProxyEvent`] is the payload a proxy integration forwards to
//! the target, and [`HandlerResponse`] is the `{statusCode, headers, body}`
//! shape the target returns.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::body::Bytes;
use hyper::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Payload format version of [`ProxyEvent`]
pub const PAYLOAD_VERSION: &str = "2.0";

/// Inbound request as received by the gateway
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub request_id: String,
    pub source_ip: Option<String>,
    pub protocol: String,
}

impl RequestEnvelope {
    /// Minimal envelope with no headers or body
    #[cfg(test)]
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path_and_query.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            headers: Vec::new(),
            body: Bytes::new(),
            request_id: crate::dispatch::next_request_id(),
            source_ip: None,
            protocol: "HTTP/1.1".to_string(),
        }
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP details inside the request context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpDescription {
    pub method: String,
    pub path: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub api_id: String,
    pub stage: String,
    pub request_id: String,
    pub route_key: String,
    pub time_epoch: i64,
    pub http: HttpDescription,
}

/// Event forwarded by a proxy integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEvent {
    pub version: String,
    pub route_key: String,
    pub raw_path: String,
    pub raw_query_string: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_string_parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_parameters: BTreeMap<String, String>,
    pub request_context: RequestContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl ProxyEvent {
    /// Build the event for a matched request
    pub fn from_request(
        request: &RequestEnvelope,
        route_key: &str,
        path_parameters: BTreeMap<String, String>,
        api_id: &str,
        stage: &str,
    ) -> Self {
        let raw_query_string = request.query.clone().unwrap_or_default();

        let (body, is_base64_encoded) = if request.body.is_empty() {
            (None, false)
        } else {
            match std::str::from_utf8(&request.body) {
                Ok(text) => (Some(text.to_string()), false),
                Err(_) => (Some(STANDARD.encode(&request.body)), true),
            }
        };

        Self {
            version: PAYLOAD_VERSION.to_string(),
            route_key: route_key.to_string(),
            raw_path: request.path.clone(),
            query_string_parameters: parse_query(&raw_query_string),
            raw_query_string,
            headers: join_headers(&request.headers),
            path_parameters,
            request_context: RequestContext {
                api_id: api_id.to_string(),
                stage: stage.to_string(),
                request_id: request.request_id.clone(),
                route_key: route_key.to_string(),
                time_epoch: chrono::Utc::now().timestamp_millis(),
                http: HttpDescription {
                    method: request.method.to_string(),
                    path: request.path.clone(),
                    protocol: request.protocol.clone(),
                    source_ip: request.source_ip.clone(),
                    user_agent: request.header("user-agent").map(ToString::to_string),
                },
            },
            body,
            is_base64_encoded,
        }
    }
}

/// Decode a query string; repeated keys are joined with commas
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    params
}

/// Lowercase header names; repeated headers are joined with commas
fn join_headers(headers: &[(String, String)]) -> BTreeMap<String, String> {
    let mut joined: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        joined
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    joined
}

/// Response returned by a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

impl HandlerResponse {
    /// Interpret a handler result
    ///
    /// A result carrying `statusCode` is taken as a full response. Anything
    /// else is a 200 with the result as a JSON body.
    pub fn from_result(result: Value) -> Result<Self, String> {
        if result.get("statusCode").is_some() {
            return serde_json::from_value(result)
                .map_err(|e| format!("Malformed handler response: {e}"));
        }

        let body = match result {
            Value::String(text) => text,
            other => other.to_string(),
        };
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Ok(Self {
            status_code: 200,
            headers,
            body: Some(body),
            is_base64_encoded: false,
        })
    }

    /// Response body as bytes, decoding base64 if flagged
    pub fn body_bytes(&self) -> Result<Bytes, String> {
        let Some(body) = &self.body else {
            return Ok(Bytes::new());
        };
        if self.is_base64_encoded {
            STANDARD
                .decode(body)
                .map(Bytes::from)
                .map_err(|e| format!("Invalid base64 body: {e}"))
        } else {
            Ok(Bytes::from(body.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_splits_query() {
        let req = RequestEnvelope::new(Method::GET, "/?name=Ada");
        assert_eq!(req.path, "/");
        assert_eq!(req.query.as_deref(), Some("name=Ada"));
    }

    #[test]
    fn test_proxy_event_fields() {
        let mut req = RequestEnvelope::new(Method::POST, "/users/7?name=Ada&tag=a&tag=b");
        req.headers.push(("User-Agent".to_string(), "test".to_string()));
        req.headers.push(("X-Trace".to_string(), "1".to_string()));
        req.headers.push(("x-trace".to_string(), "2".to_string()));
        req.body = Bytes::from_static(b"{\"k\":1}");

        let mut params = BTreeMap::new();
        params.insert("id".to_string(), "7".to_string());
        let event = ProxyEvent::from_request(&req, "POST /users/{id}", params, "api", "$default");

        assert_eq!(event.version, "2.0");
        assert_eq!(event.route_key, "POST /users/{id}");
        assert_eq!(event.query_string_parameters["name"], "Ada");
        assert_eq!(event.query_string_parameters["tag"], "a,b");
        assert_eq!(event.headers["x-trace"], "1,2");
        assert_eq!(event.path_parameters["id"], "7");
        assert_eq!(event.body.as_deref(), Some("{\"k\":1}"));
        assert!(!event.is_base64_encoded);
        assert_eq!(event.request_context.http.method, "POST");
        assert_eq!(event.request_context.http.user_agent.as_deref(), Some("test"));
    }

    #[test]
    fn test_proxy_event_binary_body() {
        let mut req = RequestEnvelope::new(Method::POST, "/upload");
        req.body = Bytes::from_static(&[0xff, 0xfe, 0x00]);
        let event = ProxyEvent::from_request(&req, "POST /upload", BTreeMap::new(), "api", "s");
        assert!(event.is_base64_encoded);
        assert_eq!(event.body.as_deref(), Some("//4A"));
    }

    #[test]
    fn test_proxy_event_serializes_camel_case() {
        let req = RequestEnvelope::new(Method::GET, "/?name=Ada");
        let event = ProxyEvent::from_request(&req, "GET /", BTreeMap::new(), "api", "$default");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["queryStringParameters"]["name"], "Ada");
        assert_eq!(value["requestContext"]["stage"], "$default");
        assert!(value.get("pathParameters").is_none());
    }

    #[test]
    fn test_handler_response_full() {
        let resp = HandlerResponse::from_result(json!({
            "statusCode": 201,
            "headers": { "x-a": "1" },
            "body": "created"
        }))
        .unwrap();
        assert_eq!(resp.status_code, 201);
        assert_eq!(resp.headers["x-a"], "1");
        assert_eq!(resp.body_bytes().unwrap(), Bytes::from("created"));
    }

    #[test]
    fn test_handler_response_bare_value() {
        let resp = HandlerResponse::from_result(json!({ "ok": true })).unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body.as_deref(), Some("{\"ok\":true}"));
        assert_eq!(resp.headers["content-type"], "application/json");
    }

    #[test]
    fn test_handler_response_malformed() {
        assert!(HandlerResponse::from_result(json!({ "statusCode": "abc" })).is_err());
    }

    #[test]
    fn test_handler_response_base64() {
        let resp = HandlerResponse {
            status_code: 200,
            headers: BTreeMap::new(),
            body: Some("//4A".to_string()),
            is_base64_encoded: true,
        };
        assert_eq!(resp.body_bytes().unwrap().as_ref(), &[0xff, 0xfe, 0x00]);
    }
}
