//! Identity resolution over one transaction-bound repository.
//!
//! # Responsibility
//! - Run match → cluster → merge → create → respond for one request.
//! - Keep merge decisions out of the store.
//!
//! # Invariants
//! - After `identify` returns, the touched cluster has exactly one primary.
//! - The oldest primary (`created_at`, then `id`) always survives a merge.
//! - An (email, phone) combination already present in the cluster is never
//!   written again.
//! - Nothing is deleted; demotion only flips link fields.
//!
//! The resolver carries no atomicity of its own. Callers hand it a repository
//! bound to an open transaction and commit only when it returns `Ok`.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::contact::{Contact, ContactId, ContactUpdate, NewContact};
use crate::model::identify::{ConsolidatedContact, IdentifyRequest};
use crate::repo::contact_repo::{ContactRepository, RepoError};
use log::{error, info};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Failures of one identify call.
#[derive(Debug)]
pub enum IdentityError {
    /// Store failure, propagated unmodified.
    Repo(RepoError),
    /// Persisted graph breaks the star topology. Fatal.
    InvariantViolation(String),
    /// Every attempt hit a lock conflict.
    ConflictRetriesExhausted {
        attempts: u32,
        last: Box<IdentityError>,
    },
    /// Resolver configuration is out of range.
    Config(ConfigError),
}

impl IdentityError {
    /// Returns whether the whole call may be replayed in a fresh transaction.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Repo(err) => err.is_lock_conflict(),
            _ => false,
        }
    }

    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Repo(err) if err.is_lock_conflict() => "lock_conflict",
            Self::Repo(_) => "store_failure",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::ConflictRetriesExhausted { .. } => "conflict_retries_exhausted",
            Self::Config(_) => "invalid_config",
        }
    }
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::InvariantViolation(details) => {
                write!(f, "identity graph invariant violated: {details}")
            }
            Self::ConflictRetriesExhausted { attempts, last } => {
                write!(f, "gave up after {attempts} conflicting attempt(s): {last}")
            }
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IdentityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::ConflictRetriesExhausted { last, .. } => Some(last.as_ref()),
            Self::Config(err) => Some(err),
            Self::InvariantViolation(_) => None,
        }
    }
}

impl From<RepoError> for IdentityError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for IdentityError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for IdentityError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

impl From<ConfigError> for IdentityError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Outcome of one resolution, with the mutations it performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub contact: ConsolidatedContact,
    /// Contact inserted by this call, primary or secondary.
    pub created_contact_id: Option<ContactId>,
    /// Primaries demoted under the surviving primary by this call.
    pub demoted_primary_ids: Vec<ContactId>,
}

/// Identity resolver over any `ContactRepository`.
pub struct IdentityResolver<R: ContactRepository> {
    repo: R,
}

impl<R: ContactRepository> IdentityResolver<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Resolves `request` to its consolidated identity, merging and creating
    /// contacts as needed.
    ///
    /// # Errors
    /// - `Repo` for store failures (lock conflicts included).
    /// - `InvariantViolation` when persisted links break the star topology.
    pub fn identify(&self, request: &IdentifyRequest) -> IdentityResult<Resolution> {
        let matches = self
            .repo
            .find_matching_contacts(request.email(), request.phone_number())?;

        if matches.is_empty() {
            let primary = self.repo.create_contact(&NewContact::primary(
                request.email().map(str::to_string),
                request.phone_number().map(str::to_string),
            ))?;
            info!(
                "event=contact_create module=resolver status=ok contact_id={} link_precedence=primary",
                primary.id
            );
            return Ok(Resolution {
                contact: assemble(&primary, &[]),
                created_contact_id: Some(primary.id),
                demoted_primary_ids: Vec::new(),
            });
        }

        let cluster = self.collect_cluster(matches)?;
        let (primary, demoted_primary_ids) = self.resolve_primary(&cluster)?;
        let (primary, mut secondaries) = self.load_cluster(primary.id)?;

        let mut created_contact_id = None;
        if needs_secondary(&primary, &secondaries, request) {
            let secondary = self.repo.create_contact(&NewContact::secondary(
                primary.id,
                request.email().map(str::to_string),
                request.phone_number().map(str::to_string),
            ))?;
            info!(
                "event=contact_create module=resolver status=ok contact_id={} link_precedence=secondary primary_id={}",
                secondary.id, primary.id
            );
            created_contact_id = Some(secondary.id);
            secondaries.push(secondary);
        }

        Ok(Resolution {
            contact: assemble(&primary, &secondaries),
            created_contact_id,
            demoted_primary_ids,
        })
    }

    /// Returns the consolidated view of the cluster containing `contact_id`
    /// without mutating anything. `None` when the contact is absent or deleted.
    pub fn view_cluster(
        &self,
        contact_id: ContactId,
    ) -> IdentityResult<Option<ConsolidatedContact>> {
        let Some(contact) = self.repo.find_contact_by_id(contact_id)? else {
            return Ok(None);
        };
        let (primary, secondaries) = self.load_cluster(contact.primary_id())?;
        Ok(Some(assemble(&primary, &secondaries)))
    }

    /// Expands matched contacts to every member of every cluster they touch.
    ///
    /// Returned contacts are deduplicated and ordered by `created_at ASC, id ASC`.
    fn collect_cluster(&self, matches: Vec<Contact>) -> IdentityResult<Vec<Contact>> {
        let mut members: BTreeMap<ContactId, Contact> = BTreeMap::new();
        let mut pending: Vec<ContactId> = Vec::new();
        for contact in matches {
            pending.push(contact.primary_id());
            members.insert(contact.id, contact);
        }

        let mut visited: HashSet<ContactId> = HashSet::new();
        while let Some(primary_id) = pending.pop() {
            if !visited.insert(primary_id) {
                continue;
            }

            let primary = match members.get(&primary_id) {
                Some(contact) => contact.clone(),
                None => self.require_contact(primary_id)?,
            };
            if !primary.is_primary() {
                return Err(violation(format!(
                    "contact {primary_id} is referenced as a primary but is secondary of {:?}",
                    primary.linked_id
                )));
            }
            members.insert(primary.id, primary);

            for secondary in self.repo.find_contacts_by_primary_id(primary_id)? {
                let owner = secondary.primary_id();
                if !visited.contains(&owner) {
                    pending.push(owner);
                }
                members.insert(secondary.id, secondary);
            }
        }

        if members.is_empty() {
            return Err(violation("collected cluster is empty".to_string()));
        }

        let mut cluster: Vec<Contact> = members.into_values().collect();
        cluster.sort_by_key(Contact::creation_order_key);
        Ok(cluster)
    }

    /// Picks the oldest primary and demotes every other primary under it.
    fn resolve_primary(&self, cluster: &[Contact]) -> IdentityResult<(Contact, Vec<ContactId>)> {
        let mut primaries = cluster.iter().filter(|contact| contact.is_primary());
        let Some(oldest) = primaries.next() else {
            return Err(violation(format!(
                "cluster of {} contact(s) has no primary",
                cluster.len()
            )));
        };

        let mut demoted = Vec::new();
        for newer in primaries {
            let mut relinked = 0usize;
            for secondary in self.repo.find_contacts_by_primary_id(newer.id)? {
                self.repo
                    .update_contact(secondary.id, ContactUpdate::link_to(oldest.id))?;
                relinked += 1;
            }
            self.repo
                .update_contact(newer.id, ContactUpdate::link_to(oldest.id))?;
            info!(
                "event=cluster_merge module=resolver status=ok primary_id={} demoted_id={} relinked={}",
                oldest.id, newer.id, relinked
            );
            demoted.push(newer.id);
        }

        Ok((oldest.clone(), demoted))
    }

    /// Re-reads a primary and its secondaries from the store.
    fn load_cluster(&self, primary_id: ContactId) -> IdentityResult<(Contact, Vec<Contact>)> {
        let primary = self.require_contact(primary_id)?;
        if !primary.is_primary() {
            return Err(violation(format!(
                "contact {primary_id} was expected to be primary after resolution"
            )));
        }
        let secondaries = self.repo.find_contacts_by_primary_id(primary_id)?;
        Ok((primary, secondaries))
    }

    fn require_contact(&self, id: ContactId) -> IdentityResult<Contact> {
        self.repo
            .find_contact_by_id(id)?
            .ok_or_else(|| violation(format!("linked contact {id} is missing or deleted")))
    }
}

/// Decides whether `request` carries information the cluster lacks.
fn needs_secondary(primary: &Contact, secondaries: &[Contact], request: &IdentifyRequest) -> bool {
    let members = || std::iter::once(primary).chain(secondaries.iter());
    let email = request.email();
    let phone_number = request.phone_number();

    let exact = members().any(|contact| {
        email.map_or(true, |value| contact.email.as_deref() == Some(value))
            && phone_number.map_or(true, |value| contact.phone_number.as_deref() == Some(value))
    });
    if exact {
        return false;
    }

    let email_is_new = email
        .is_some_and(|value| !members().any(|contact| contact.email.as_deref() == Some(value)));
    let phone_is_new = phone_number.is_some_and(|value| {
        !members().any(|contact| contact.phone_number.as_deref() == Some(value))
    });
    email_is_new || phone_is_new
}

/// Builds the consolidated view: primary values first, then distinct
/// first-seen secondary values in cluster order.
fn assemble(primary: &Contact, secondaries: &[Contact]) -> ConsolidatedContact {
    let mut emails = Vec::new();
    let mut phone_numbers = Vec::new();
    push_distinct(&mut emails, primary.email.as_deref());
    push_distinct(&mut phone_numbers, primary.phone_number.as_deref());

    let mut secondary_contact_ids = Vec::with_capacity(secondaries.len());
    for secondary in secondaries {
        push_distinct(&mut emails, secondary.email.as_deref());
        push_distinct(&mut phone_numbers, secondary.phone_number.as_deref());
        secondary_contact_ids.push(secondary.id);
    }

    ConsolidatedContact {
        primary_contact_id: primary.id,
        emails,
        phone_numbers,
        secondary_contact_ids,
    }
}

fn push_distinct(values: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value {
        if !values.iter().any(|existing| existing == value) {
            values.push(value.to_string());
        }
    }
}

fn violation(details: String) -> IdentityError {
    error!(
        "event=invariant_violation module=resolver status=error details={}",
        details
    );
    IdentityError::InvariantViolation(details)
}
