//! Transactional identify use-case.
//!
//! # Responsibility
//! - Open one `BEGIN IMMEDIATE` transaction per attempt and run the resolver in it.
//! - Replay the whole call when SQLite reports a lock conflict.
//! - Emit one metadata-only log event per call.
//!
//! # Invariants
//! - Every read and write of one attempt shares a single transaction.
//! - A failed attempt is rolled back entirely before any replay.
//! - Contact values (emails, phones) never reach the logs.

use crate::config::ResolverConfig;
use crate::model::contact::ContactId;
use crate::model::identify::{ConsolidatedContact, IdentifyRequest, IdentifyResponse};
use crate::repo::contact_repo::SqliteContactRepository;
use crate::service::identity_resolver::{
    IdentityError, IdentityResolver, IdentityResult, Resolution,
};
use log::{error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::time::Instant;

/// Identify service bound to one SQLite connection.
pub struct IdentityService<'conn> {
    conn: &'conn mut Connection,
    config: ResolverConfig,
}

impl<'conn> IdentityService<'conn> {
    /// Creates a service over a migrated connection.
    ///
    /// Applies `config.busy_timeout` to the connection.
    pub fn new(conn: &'conn mut Connection, config: ResolverConfig) -> IdentityResult<Self> {
        config.validate()?;
        conn.busy_timeout(config.busy_timeout)?;
        Ok(Self { conn, config })
    }

    /// Resolves `request` inside one atomic transaction, replaying on conflict.
    ///
    /// # Errors
    /// - `ConflictRetriesExhausted` after `max_attempts` lock conflicts.
    /// - Any non-retryable resolver or store failure, unmodified.
    pub fn identify(&mut self, request: &IdentifyRequest) -> IdentityResult<IdentifyResponse> {
        let started_at = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.identify_once(request) {
                Ok(resolution) => {
                    info!(
                        "event=identify module=service status=ok attempt={} duration_ms={} has_email={} has_phone={} primary_id={} created={} demoted={}",
                        attempt,
                        started_at.elapsed().as_millis(),
                        request.email().is_some(),
                        request.phone_number().is_some(),
                        resolution.contact.primary_contact_id,
                        format_created(resolution.created_contact_id),
                        resolution.demoted_primary_ids.len()
                    );
                    return Ok(IdentifyResponse {
                        contact: resolution.contact,
                    });
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        "event=identify_retry module=service status=retry attempt={} max_attempts={} error={}",
                        attempt, self.config.max_attempts, err
                    );
                    std::thread::sleep(self.config.retry_backoff * attempt);
                }
                Err(err) => {
                    let err = if err.is_retryable() {
                        IdentityError::ConflictRetriesExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        }
                    } else {
                        err
                    };
                    error!(
                        "event=identify module=service status=error attempt={} duration_ms={} has_email={} has_phone={} error_code={} error={}",
                        attempt,
                        started_at.elapsed().as_millis(),
                        request.email().is_some(),
                        request.phone_number().is_some(),
                        err.code(),
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Returns the consolidated view of the cluster containing `contact_id`.
    ///
    /// Read-only; runs in a deferred transaction so the view is consistent.
    pub fn lookup_cluster(
        &mut self,
        contact_id: ContactId,
    ) -> IdentityResult<Option<ConsolidatedContact>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        let view = {
            let repo = SqliteContactRepository::try_new(&tx)?;
            IdentityResolver::new(repo).view_cluster(contact_id)?
        };
        tx.commit()?;
        Ok(view)
    }

    fn identify_once(&mut self, request: &IdentifyRequest) -> IdentityResult<Resolution> {
        // IMMEDIATE takes the write lock up front, so two overlapping calls
        // cannot both observe "no match" and both insert.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let resolution = {
            let repo = SqliteContactRepository::try_new(&tx)?;
            IdentityResolver::new(repo).identify(request)?
        };
        tx.commit()?;
        Ok(resolution)
    }
}

fn format_created(created: Option<ContactId>) -> String {
    created.map_or_else(|| "none".to_string(), |id| id.to_string())
}
