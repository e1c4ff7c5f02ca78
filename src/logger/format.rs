//! Access log format module
//!
//! Supports multiple log formats:
//! - `combined` (Apache/Nginx combined format plus request id)
//! - `common` (Common Log Format - CLF)
//! - `json` (one JSON object per request)
//! - Custom patterns with `$variables`

use chrono::{DateTime, Local};
use serde::Serialize;

/// One served request, as written to the access log
#[derive(Debug, Clone, Serialize)]
pub struct AccessLogEntry {
    pub request_id: String,
    pub remote_addr: String,
    pub time: DateTime<Local>,
    pub method: String,
    pub path: String,
    /// Query string (without leading ?)
    pub query: Option<String>,
    pub http_version: String,
    pub status: u16,
    pub body_bytes: usize,
    pub user_agent: Option<String>,
    /// Stage that served the request, if one was resolved
    pub stage: Option<String>,
    /// Matched route key
    pub route_key: Option<String>,
    /// Deployment the stage was serving
    pub deployment_id: Option<u64>,
    /// Dispatch failure ("Forbidden", "Timeout", ...)
    pub error: Option<String>,
    /// Request processing time in microseconds
    pub request_time_us: u64,
}

impl AccessLogEntry {
    pub fn new(request_id: String, remote_addr: String, method: String, path: String) -> Self {
        Self {
            request_id,
            remote_addr,
            time: Local::now(),
            method,
            path,
            query: None,
            http_version: "1.1".to_string(),
            status: 200,
            body_bytes: 0,
            user_agent: None,
            stage: None,
            route_key: None,
            deployment_id: None,
            error: None,
            request_time_us: 0,
        }
    }

    pub fn format(&self, format: &str) -> String {
        match format {
            "combined" => self.format_combined(),
            "common" => self.format_common(),
            "json" => self.format_json(),
            custom => self.format_custom(custom),
        }
    }

    fn request_uri(&self) -> String {
        self.query
            .as_ref()
            .map_or_else(|| self.path.clone(), |q| format!("{}?{q}", self.path))
    }

    fn time_local(&self) -> String {
        self.time.format("%d/%b/%Y:%H:%M:%S %z").to_string()
    }

    /// `$remote_addr - - [$time_local] "$request" $status $body_bytes_sent "$http_user_agent" $request_id`
    fn format_combined(&self) -> String {
        format!(
            "{} - - [{}] \"{} {} HTTP/{}\" {} {} \"{}\" {}",
            self.remote_addr,
            self.time_local(),
            self.method,
            self.request_uri(),
            self.http_version,
            self.status,
            self.body_bytes,
            self.user_agent.as_deref().unwrap_or("-"),
            self.request_id,
        )
    }

    fn format_common(&self) -> String {
        format!(
            "{} - - [{}] \"{} {} HTTP/{}\" {} {}",
            self.remote_addr,
            self.time_local(),
            self.method,
            self.request_uri(),
            self.http_version,
            self.status,
            self.body_bytes,
        )
    }

    fn format_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"request_id":"{}","error":"{e}"}}"#, self.request_id)
        })
    }

    /// Custom format with variable substitution
    ///
    /// Supported variables:
    /// - `$request_id`, `$remote_addr`, `$status`, `$body_bytes_sent`
    /// - `$time_local`, `$time_iso8601`
    /// - `$request` ("METHOD /uri HTTP/version"), `$request_method`, `$request_uri`
    /// - `$http_user_agent`
    /// - `$stage`, `$route_key`, `$deployment_id`, `$error` ("-" when absent)
    /// - `$request_time` in seconds, 3 decimal places
    fn format_custom(&self, pattern: &str) -> String {
        let request_uri = self.request_uri();
        let request_line = format!("{} {} HTTP/{}", self.method, request_uri, self.http_version);
        #[allow(clippy::cast_precision_loss)]
        let request_time = self.request_time_us as f64 / 1_000_000.0;

        // Longer names first: $request_time and $request_id before $request
        let vars: [(&str, String); 16] = [
            ("$request_time", format!("{request_time:.3}")),
            ("$request_id", self.request_id.clone()),
            ("$request_method", self.method.clone()),
            ("$request_uri", request_uri),
            ("$request", request_line),
            ("$remote_addr", self.remote_addr.clone()),
            ("$time_local", self.time_local()),
            ("$time_iso8601", self.time.to_rfc3339()),
            ("$status", self.status.to_string()),
            ("$body_bytes_sent", self.body_bytes.to_string()),
            (
                "$http_user_agent",
                self.user_agent.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("$stage", self.stage.clone().unwrap_or_else(|| "-".to_string())),
            (
                "$route_key",
                self.route_key.clone().unwrap_or_else(|| "-".to_string()),
            ),
            (
                "$deployment_id",
                self.deployment_id
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
            ),
            ("$error", self.error.clone().unwrap_or_else(|| "-".to_string())),
            ("$http_version", self.http_version.clone()),
        ];

        vars.iter()
            .fold(pattern.to_string(), |acc, (name, value)| acc.replace(name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_entry() -> AccessLogEntry {
        let mut entry = AccessLogEntry::new(
            "18f2a-000001".to_string(),
            "192.168.1.1".to_string(),
            "GET".to_string(),
            "/prod/users/7".to_string(),
        );
        entry.query = Some("name=Ada".to_string());
        entry.status = 200;
        entry.body_bytes = 26;
        entry.user_agent = Some("curl/8.0".to_string());
        entry.stage = Some("prod".to_string());
        entry.route_key = Some("GET /users/{id}".to_string());
        entry.deployment_id = Some(4);
        entry.request_time_us = 12_000;
        entry
    }

    #[test]
    fn test_format_combined() {
        let log = create_test_entry().format("combined");
        assert!(log.contains("192.168.1.1"));
        assert!(log.contains("GET /prod/users/7?name=Ada HTTP/1.1"));
        assert!(log.contains("200 26"));
        assert!(log.contains("curl/8.0"));
        assert!(log.ends_with("18f2a-000001"));
    }

    #[test]
    fn test_format_common() {
        let log = create_test_entry().format("common");
        assert!(log.contains("GET /prod/users/7?name=Ada HTTP/1.1"));
        assert!(!log.contains("curl/8.0"));
    }

    #[test]
    fn test_format_json() {
        let log = create_test_entry().format("json");
        let value: serde_json::Value = serde_json::from_str(&log).unwrap();
        assert_eq!(value["request_id"], "18f2a-000001");
        assert_eq!(value["status"], 200);
        assert_eq!(value["route_key"], "GET /users/{id}");
        assert_eq!(value["deployment_id"], 4);
        assert!(value["error"].is_null());
    }

    #[test]
    fn test_format_custom() {
        let mut entry = create_test_entry();
        entry.status = 504;
        entry.error = Some("Timeout".to_string());
        let log = entry.format(
            "$request_id $stage@$deployment_id \"$route_key\" $status $error $request_time",
        );
        assert_eq!(log, "18f2a-000001 prod@4 \"GET /users/{id}\" 504 Timeout 0.012");
    }

    #[test]
    fn test_format_custom_missing_fields() {
        let entry = AccessLogEntry::new(
            "id".to_string(),
            "127.0.0.1".to_string(),
            "POST".to_string(),
            "/".to_string(),
        );
        assert_eq!(
            entry.format("$request $stage $deployment_id $error"),
            "POST / HTTP/1.1 - - -"
        );
    }
}
