//! Built-in handlers

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Handler, HandlerError};

/// Greeting formatter
///
/// Reads `name` from the query string parameters (or a top-level `name`
/// field for mapped payloads), defaulting to "World".
pub struct GreetHandler;

impl GreetHandler {
    pub fn greeting(name: &str) -> String {
        format!("Hello {name} from AWS Lambda!")
    }
}

#[async_trait]
impl Handler for GreetHandler {
    async fn invoke(&self, event: Value) -> Result<Value, HandlerError> {
        let name = event
            .pointer("/queryStringParameters/name")
            .or_else(|| event.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("World");

        Ok(json!({
            "statusCode": 200,
            "body": Self::greeting(name),
        }))
    }
}

/// Returns the received event as a JSON body
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn invoke(&self, event: Value) -> Result<Value, HandlerError> {
        let body = serde_json::to_string(&event)
            .map_err(|e| HandlerError::new(format!("Failed to encode event: {e}")))?;
        Ok(json!({
            "statusCode": 200,
            "headers": { "content-type": "application/json" },
            "body": body,
        }))
    }
}
