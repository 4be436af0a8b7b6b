//! Contact repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the fixed query contract the identity resolver runs on.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - All reads exclude rows with `deleted_at` set.
//! - Listings are ordered by `created_at ASC, id ASC`.
//! - Only `linked_id` and `link_precedence` are mutable after insert.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::contact::{
    Contact, ContactId, ContactUpdate, ContactValidationError, LinkPrecedence, NewContact,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    linked_id,
    link_precedence,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

const CONTACT_COLUMNS: &[&str] = &[
    "id",
    "email",
    "phone_number",
    "linked_id",
    "link_precedence",
    "created_at",
    "updated_at",
    "deleted_at",
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for contact persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ContactValidationError),
    Db(DbError),
    NotFound(ContactId),
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required column is missing from `contacts`.
    MissingRequiredColumn(&'static str),
}

impl RepoError {
    /// Returns whether the failure is a lock conflict that allows a replay.
    pub fn is_lock_conflict(&self) -> bool {
        match self {
            Self::Db(err) => err.is_lock_conflict(),
            _ => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
            Self::MissingRequiredColumn(column) => {
                write!(f, "contacts table is missing column `{column}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContactValidationError> for RepoError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Store contract for identity resolution.
///
/// Implementations run every call on the caller's transaction; they provide
/// no atomicity of their own.
pub trait ContactRepository {
    /// OR-match on the provided identifiers. Absent sides are not matched.
    fn find_matching_contacts(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;
    /// Active secondaries whose `linked_id` is `primary_id`.
    fn find_contacts_by_primary_id(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>>;
    fn find_contact_by_id(&self, id: ContactId) -> RepoResult<Option<Contact>>;
    fn create_contact(&self, contact: &NewContact) -> RepoResult<Contact>;
    fn update_contact(&self, id: ContactId, update: ContactUpdate) -> RepoResult<Contact>;
}

/// SQLite-backed contact repository.
///
/// Borrow a `Transaction` (it derefs to `Connection`) to scope every call to
/// one atomic unit.
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_contact_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ContactRepository for SqliteContactRepository<'_> {
    fn find_matching_contacts(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        let mut predicates = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(email) = email {
            predicates.push("email = ?");
            bind_values.push(Value::Text(email.to_string()));
        }
        if let Some(phone_number) = phone_number {
            predicates.push("phone_number = ?");
            bind_values.push(Value::Text(phone_number.to_string()));
        }
        if predicates.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND ({})
             ORDER BY created_at ASC, id ASC;",
            predicates.join(" OR ")
        );
        query_contacts(self.conn, &sql, bind_values)
    }

    fn find_contacts_by_primary_id(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        query_contacts(
            self.conn,
            &format!(
                "{CONTACT_SELECT_SQL}
                 WHERE linked_id = ?
                   AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC;"
            ),
            vec![Value::Integer(primary_id)],
        )
    }

    fn find_contact_by_id(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE id = ?1
               AND deleted_at IS NULL;"
        ))?;

        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }

        Ok(None)
    }

    fn create_contact(&self, contact: &NewContact) -> RepoResult<Contact> {
        contact.validate()?;

        self.conn.execute(
            "INSERT INTO contacts (
                email,
                phone_number,
                linked_id,
                link_precedence
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                contact.email.as_deref(),
                contact.phone_number.as_deref(),
                contact.linked_id,
                contact.link_precedence.as_str(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.find_contact_by_id(id)?.ok_or(RepoError::NotFound(id))
    }

    fn update_contact(&self, id: ContactId, update: ContactUpdate) -> RepoResult<Contact> {
        let mut next = self.find_contact_by_id(id)?.ok_or(RepoError::NotFound(id))?;
        if let Some(link_precedence) = update.link_precedence {
            next.link_precedence = link_precedence;
        }
        if let Some(linked_id) = update.linked_id {
            next.linked_id = Some(linked_id);
        }
        if next.link_precedence == LinkPrecedence::Primary {
            next.linked_id = None;
        }
        next.validate()?;

        let changed = self.conn.execute(
            "UPDATE contacts
             SET
                linked_id = ?1,
                link_precedence = ?2,
                updated_at = CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)
             WHERE id = ?3
               AND deleted_at IS NULL;",
            params![next.linked_id, next.link_precedence.as_str(), id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        self.find_contact_by_id(id)?.ok_or(RepoError::NotFound(id))
    }
}

fn query_contacts(
    conn: &Connection,
    sql: &str,
    bind_values: Vec<Value>,
) -> RepoResult<Vec<Contact>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut contacts = Vec::new();

    while let Some(row) = rows.next()? {
        contacts.push(parse_contact_row(row)?);
    }

    Ok(contacts)
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence"
        ))
    })?;

    let contact = Contact {
        id: row.get("id")?,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        linked_id: row.get("linked_id")?,
        link_precedence,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    contact.validate()?;
    Ok(contact)
}

fn ensure_contact_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    let mut stmt = conn.prepare("PRAGMA table_info(contacts);")?;
    let mut rows = stmt.query([])?;
    let mut present = Vec::new();
    while let Some(row) = rows.next()? {
        present.push(row.get::<_, String>(1)?);
    }

    for &column in CONTACT_COLUMNS {
        if !present.iter().any(|name| name == column) {
            return Err(RepoError::MissingRequiredColumn(column));
        }
    }

    Ok(())
}
