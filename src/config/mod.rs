// Configuration module entry point
// Manages application configuration, runtime state, and version control

mod persist;
mod state;
mod types;
mod version;

use std::net::SocketAddr;

// Re-export public types
pub use persist::{create_state_manager, to_toml};
pub use state::AppState;
pub use types::Config;
pub use version::ResourceType;

impl Config {
    /// Load configuration from specified file path (without extension)
    ///
    /// Values from `GATEWAY_<SECTION>__<KEY>` environment variables override
    /// the file, e.g. `GATEWAY_SERVER__PORT=9000`.
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.api_host", "127.0.0.1")?
            .set_default("server.api_port", 8000)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("logging.show_headers", false)?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 30)?
            .set_default("performance.write_timeout", 30)?
            .set_default("http.server_name", "lambda-dispatch/0.1")?
            .set_default("http.max_body_size", 6_291_456)? // 6MB
            .set_default("gateway.api_id", "local")?
            .set_default("gateway.caller_principal", "apigateway.amazonaws.com")?
            .set_default("gateway.execution_principal", "lambda.amazonaws.com")?
            .set_default("gateway.default_timeout_ms", 30_000)?
            .set_default("gateway.persist_state", false)?
            .build()?;

        settings.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }

    pub fn get_api_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.api_host, self.server.api_port)
            .parse()
            .map_err(|e| format!("Invalid API address: {e}"))
    }
}
