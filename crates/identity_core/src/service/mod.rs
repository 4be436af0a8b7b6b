//! Core use-case services.
//!
//! # Responsibility
//! - Run identity resolution over repository contracts.
//! - Own transaction boundaries and conflict replay.

pub mod identity_resolver;
pub mod identity_service;
