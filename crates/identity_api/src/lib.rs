//! Boundary layer for contact identity reconciliation.
//!
//! Callers hand in raw request fields and get back a status code plus a JSON
//! body; everything below this crate sees normalized input only.

pub mod api;

pub use api::{
    configure_db_path, health, identify, identify_json, identify_with_connection, init_logging,
    ApiResponse,
};
