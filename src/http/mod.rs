//! HTTP protocol layer module
//!
//! Response builders shared by the gateway request handler.

pub mod response;

pub use response::{
    build_400_response, build_413_response, build_dispatch_error_response, build_health_response,
    build_proxy_response,
};
