//! Core domain logic for contact identity reconciliation.
//! This crate is the single source of truth for merge invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, ResolverConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::contact::{
    Contact, ContactId, ContactUpdate, ContactValidationError, LinkPrecedence, NewContact,
};
pub use model::identify::{
    ConsolidatedContact, IdentifyRequest, IdentifyRequestError, IdentifyResponse,
};
pub use repo::contact_repo::{ContactRepository, RepoError, RepoResult, SqliteContactRepository};
pub use service::identity_resolver::{IdentityError, IdentityResolver, IdentityResult, Resolution};
pub use service::identity_service::IdentityService;

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Liveness report. Independent of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    /// Epoch ms at which the report was produced.
    pub timestamp: u64,
}

/// Liveness check for boundary layers.
pub fn health() -> HealthStatus {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default();
    HealthStatus {
        status: "ok",
        timestamp,
    }
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
