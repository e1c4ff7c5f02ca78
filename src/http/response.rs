//! HTTP response building module
//!
//! Turns dispatch results into hyper responses. Error bodies are JSON
//! `{"message": ...}` objects; fault responses also carry the fault reason.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

use crate::dispatch::DispatchError;
use crate::integration::HandlerResponse;

/// Header carrying the gateway request id
pub const REQUEST_ID_HEADER: &str = "apigw-requestid";

/// Build the client response from a target's response
///
/// A body flagged as base64 is decoded; an undecodable body or invalid
/// status code is reported as an invalid response fault.
pub fn build_proxy_response(
    response: &HandlerResponse,
    request_id: &str,
    server_name: &str,
) -> Result<Response<Full<Bytes>>, String> {
    let status = StatusCode::from_u16(response.status_code)
        .map_err(|_| format!("Invalid status code {}", response.status_code))?;
    let body = response.body_bytes()?;

    let mut builder = Response::builder()
        .status(status)
        .header("Server", server_name)
        .header(REQUEST_ID_HEADER, request_id);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Full::new(body))
        .map_err(|e| format!("Invalid response header: {e}"))
}

/// Build the client response for a failed dispatch
pub fn build_dispatch_error_response(
    error: &DispatchError,
    request_id: &str,
    server_name: &str,
) -> Response<Full<Bytes>> {
    let status = error.status();
    let message = match error {
        DispatchError::NoRoute { .. } => "Not Found",
        DispatchError::Forbidden { .. } => "Forbidden",
        _ if status == StatusCode::GATEWAY_TIMEOUT => "Endpoint request timed out",
        _ => "Internal Server Error",
    };

    let body = match error {
        DispatchError::Fault { .. } | DispatchError::TargetNotFound(_) => {
            serde_json::json!({ "message": message, "reason": error.kind() })
        }
        _ => serde_json::json!({ "message": message }),
    };

    build_json_error(status, &body, request_id, server_name)
}

/// Build 413 Payload Too Large response
pub fn build_413_response(request_id: &str, server_name: &str) -> Response<Full<Bytes>> {
    build_json_error(
        StatusCode::PAYLOAD_TOO_LARGE,
        &serde_json::json!({ "message": "Request Entity Too Large" }),
        request_id,
        server_name,
    )
}

/// Build 400 Bad Request response
pub fn build_400_response(request_id: &str, server_name: &str) -> Response<Full<Bytes>> {
    build_json_error(
        StatusCode::BAD_REQUEST,
        &serde_json::json!({ "message": "Bad Request" }),
        request_id,
        server_name,
    )
}

/// Build plain text health check response
pub fn build_health_response(status: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(200)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(status.to_string())))
        .unwrap_or_else(|e| {
            log_build_error("health", &e);
            Response::new(Full::new(Bytes::from("ok")))
        })
}

fn build_json_error(
    status: StatusCode,
    body: &serde_json::Value,
    request_id: &str,
    server_name: &str,
) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Server", server_name)
        .header(REQUEST_ID_HEADER, request_id)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
            *response.status_mut() = status;
            response
        })
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FaultReason;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_proxy_response_headers_and_body() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        let handler = HandlerResponse {
            status_code: 201,
            headers,
            body: Some("created".to_string()),
            is_base64_encoded: false,
        };

        let response = build_proxy_response(&handler, "req-1", "test").unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-1");
        assert_eq!(body_string(response).await, "created");
    }

    #[tokio::test]
    async fn test_proxy_response_base64() {
        let handler = HandlerResponse {
            status_code: 200,
            headers: BTreeMap::new(),
            body: Some("aGk=".to_string()),
            is_base64_encoded: true,
        };
        let response = build_proxy_response(&handler, "req-1", "test").unwrap();
        assert_eq!(body_string(response).await, "hi");
    }

    #[test]
    fn test_proxy_response_rejects_bad_status() {
        let handler = HandlerResponse {
            status_code: 42,
            headers: BTreeMap::new(),
            body: None,
            is_base64_encoded: false,
        };
        assert!(build_proxy_response(&handler, "req-1", "test").is_err());
    }

    #[tokio::test]
    async fn test_error_bodies() {
        let forbidden = DispatchError::Forbidden {
            target: "greet:1".to_string(),
        };
        let response = build_dispatch_error_response(&forbidden, "req-1", "test");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, r#"{"message":"Forbidden"}"#);

        let timeout = DispatchError::fault("greet:1", FaultReason::Timeout, "slow");
        let response = build_dispatch_error_response(&timeout, "req-1", "test");
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["reason"], "Timeout");
        assert_eq!(body["message"], "Endpoint request timed out");
    }
}
