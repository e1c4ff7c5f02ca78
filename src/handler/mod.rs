//! Request handler module
//!
//! Entry point for application traffic. Every request goes through the
//! gateway dispatcher; there is no static content.

pub mod router;

// Re-export main entry point
pub use router::handle_request;
