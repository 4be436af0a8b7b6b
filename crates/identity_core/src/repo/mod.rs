//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the contact store contract used by identity resolution.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Repository writes must enforce contact validation before persistence.
//! - Every read path filters soft-deleted rows.
//! - Repositories never make merge decisions.

pub mod contact_repo;
