//! Field mapping for mapped integrations
//!
//! A mapping declares how the target payload is assembled from the request
//! and how the target's result is turned into the HTTP response. Source
//! expressions:
//! - `query.<name>`, `header.<name>`, `path.<name>`
//! - `body` (parsed as JSON when possible, raw text otherwise)
//! - `method`, `stage`, `request_id`
//! - `const:<value>`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::envelope::{HandlerResponse, ProxyEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// Payload field → source expression
    #[serde(default)]
    pub request: BTreeMap<String, String>,
    /// Status code of a successful response
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_status() -> u16 {
    200
}

impl Default for Mapping {
    fn default() -> Self {
        Self {
            request: BTreeMap::new(),
            status: default_status(),
            content_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source<'a> {
    Query(&'a str),
    Header(&'a str),
    Path(&'a str),
    Body,
    Method,
    Stage,
    RequestId,
    Const(&'a str),
}

fn parse_source(expr: &str) -> Result<Source<'_>, String> {
    if let Some(value) = expr.strip_prefix("const:") {
        return Ok(Source::Const(value));
    }
    let source = match expr.split_once('.') {
        Some(("query", name)) if !name.is_empty() => Source::Query(name),
        Some(("header", name)) if !name.is_empty() => Source::Header(name),
        Some(("path", name)) if !name.is_empty() => Source::Path(name),
        None if expr == "body" => Source::Body,
        None if expr == "method" => Source::Method,
        None if expr == "stage" => Source::Stage,
        None if expr == "request_id" => Source::RequestId,
        _ => return Err(format!("unknown source expression '{expr}'")),
    };
    Ok(source)
}

impl Mapping {
    /// Reject unknown source expressions and invalid status codes
    pub fn validate(&self) -> Result<(), String> {
        if !(100..=599).contains(&self.status) {
            return Err(format!("invalid status code {}", self.status));
        }
        for (field, expr) in &self.request {
            parse_source(expr).map_err(|e| format!("field '{field}': {e}"))?;
        }
        Ok(())
    }

    /// Assemble the target payload; missing values become `null`
    pub fn map_request(&self, event: &ProxyEvent) -> Value {
        let mut payload = Map::new();
        for (field, expr) in &self.request {
            let value = match parse_source(expr) {
                Ok(source) => resolve(&source, event),
                Err(_) => Value::Null,
            };
            payload.insert(field.clone(), value);
        }
        Value::Object(payload)
    }

    /// Turn a target result into the HTTP response
    ///
    /// A handler-shaped result contributes only its body, and only when its
    /// `statusCode` is 2xx. Any other status is returned as the error detail.
    pub fn map_response(&self, result: Value) -> Result<HandlerResponse, String> {
        let result = match result {
            Value::Object(mut obj) if obj.contains_key("statusCode") => {
                let status = &obj["statusCode"];
                if !status.as_u64().is_some_and(|code| (200..300).contains(&code)) {
                    return Err(format!("handler returned status {status}"));
                }
                obj.remove("body").unwrap_or(Value::Null)
            }
            other => other,
        };

        let (body, default_type) = match result {
            Value::Null => (None, "text/plain; charset=utf-8"),
            Value::String(text) => (Some(text), "text/plain; charset=utf-8"),
            other => (Some(other.to_string()), "application/json"),
        };

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            self.content_type
                .clone()
                .unwrap_or_else(|| default_type.to_string()),
        );

        Ok(HandlerResponse {
            status_code: self.status,
            headers,
            body,
            is_base64_encoded: false,
        })
    }
}

fn resolve(source: &Source<'_>, event: &ProxyEvent) -> Value {
    let text = |value: Option<&String>| value.map_or(Value::Null, |v| Value::String(v.clone()));
    match source {
        Source::Query(name) => text(event.query_string_parameters.get(*name)),
        Source::Header(name) => text(event.headers.get(&name.to_ascii_lowercase())),
        Source::Path(name) => text(event.path_parameters.get(*name)),
        Source::Body => match &event.body {
            None => Value::Null,
            Some(body) if event.is_base64_encoded => Value::String(body.clone()),
            Some(body) => {
                serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.clone()))
            }
        },
        Source::Method => Value::String(event.request_context.http.method.clone()),
        Source::Stage => Value::String(event.request_context.stage.clone()),
        Source::RequestId => Value::String(event.request_context.request_id.clone()),
        Source::Const(value) => Value::String((*value).to_string()),
    }
}
