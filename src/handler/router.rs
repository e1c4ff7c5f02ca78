//! Application request entry point
//!
//! Converts the hyper request into a [`RequestEnvelope`], dispatches it
//! through the gateway and converts the result back, writing one access log
//! line per request.

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, Version};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppState;
use crate::dispatch::{next_request_id, DispatchError, FaultReason};
use crate::http;
use crate::integration::RequestEnvelope;
use crate::logger::{self, AccessLogEntry};

/// Main entry point for HTTP request handling
pub async fn handle_request(
    req: Request<Incoming>,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let request_id = next_request_id();
    let server_name = state.config.http.server_name.as_str();

    let mut entry = AccessLogEntry::new(
        request_id.clone(),
        peer_addr.ip().to_string(),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.query = req.uri().query().map(ToString::to_string);
    entry.http_version = http_version(req.version()).to_string();
    entry.user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    logger::log_headers_count(req.headers().len(), state.config.logging.show_headers);

    let response = match read_envelope(req, peer_addr, &request_id, state.config.http.max_body_size).await {
        Ok(envelope) => dispatch(&envelope, &state, &mut entry).await,
        Err(BodyError::TooLarge) => {
            entry.error = Some("PayloadTooLarge".to_string());
            http::build_413_response(&request_id, server_name)
        }
        Err(BodyError::Unreadable) => {
            entry.error = Some("BadRequest".to_string());
            http::build_400_response(&request_id, server_name)
        }
    };

    state.requests_served.fetch_add(1, Ordering::Relaxed);
    if state.access_log_enabled() {
        entry.status = response.status().as_u16();
        entry.body_bytes = body_len(&response);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

enum BodyError {
    TooLarge,
    Unreadable,
}

/// Collect the body (bounded by `max_body_size`) and detach the request
async fn read_envelope(
    req: Request<Incoming>,
    peer_addr: SocketAddr,
    request_id: &str,
    max_body_size: u64,
) -> Result<RequestEnvelope, BodyError> {
    if let Some(size) = content_length(&req) {
        if size > max_body_size {
            logger::log_warning(&format!(
                "Request body too large: {size} bytes (max: {max_body_size})"
            ));
            return Err(BodyError::TooLarge);
        }
    }

    let (parts, body) = req.into_parts();
    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<http_body_util::LengthLimitError>() => {
            logger::log_warning(&format!("Request body exceeded {max_body_size} bytes"));
            return Err(BodyError::TooLarge);
        }
        Err(e) => {
            logger::log_warning(&format!("Failed to read request body: {e}"));
            return Err(BodyError::Unreadable);
        }
    };

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Ok(RequestEnvelope {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(ToString::to_string),
        headers,
        body,
        request_id: request_id.to_string(),
        source_ip: Some(peer_addr.ip().to_string()),
        protocol: format!("HTTP/{}", http_version(parts.version)),
    })
}

async fn dispatch(
    envelope: &RequestEnvelope,
    state: &AppState,
    entry: &mut AccessLogEntry,
) -> Response<Full<Bytes>> {
    let server_name = state.config.http.server_name.as_str();

    let error = match state.gateway.dispatch(envelope).await {
        Ok(dispatched) => {
            entry.stage = Some(dispatched.stage);
            entry.route_key = Some(dispatched.route_key);
            entry.deployment_id = Some(dispatched.deployment_id);
            match http::build_proxy_response(&dispatched.response, &envelope.request_id, server_name) {
                Ok(response) => return response,
                Err(detail) => {
                    let route = entry.route_key.clone().unwrap_or_default();
                    logger::log_fault(&envelope.request_id, &route, FaultReason::InvalidResponse, &detail);
                    DispatchError::fault(&route, FaultReason::InvalidResponse, detail)
                }
            }
        }
        Err(e) => e,
    };

    entry.error = Some(error.kind());
    http::build_dispatch_error_response(&error, &envelope.request_id, server_name)
}

fn content_length(req: &Request<Incoming>) -> Option<u64> {
    req.headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn body_len(response: &Response<Full<Bytes>>) -> usize {
    use hyper::body::Body;
    response
        .body()
        .size_hint()
        .exact()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or_default()
}

const fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}
