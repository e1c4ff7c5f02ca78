//! Routing module
//!
//! Provides the gateway's request resolution:
//! - Stage selection based on the first path segment
//! - Route table build with conflict detection
//! - Deterministic method + path matching

mod matcher;
mod stage;
mod table;

pub use stage::{resolve_stage, DEFAULT_STAGE};
pub use table::{Route, RouteSpec, RouteTable, RouteTableError};
