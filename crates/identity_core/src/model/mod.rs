//! Domain model for contact identity reconciliation.
//!
//! # Responsibility
//! - Define the contact record and its link topology.
//! - Define the normalized request and consolidated response shapes.
//!
//! # Invariants
//! - Every contact is identified by a store-assigned `ContactId`.
//! - Deletion is represented by a `deleted_at` tombstone, not hard delete.
//! - Secondaries point directly at a primary (star topology per cluster).

pub mod contact;
pub mod identify;
