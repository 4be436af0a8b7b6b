//! Request-level API for identify and liveness calls.
//!
//! # Responsibility
//! - Normalize raw request fields before they reach the core.
//! - Map core outcomes onto 200/400/500 responses with JSON bodies.
//! - Resolve the process-wide database location once.
//!
//! # Invariants
//! - Exported functions never panic on bad input.
//! - Only validation failures are reported with detail (400); every other
//!   failure is an opaque 500 whose cause is logged.

use identity_core::db::open_db;
use identity_core::{
    health as core_health, init_logging as core_init_logging, IdentifyRequest, IdentityService,
    LoggingError, ResolverConfig,
};
use log::{error, warn};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

const DB_FILE_NAME: &str = "identity.sqlite3";
const DB_PATH_ENV: &str = "IDENTITY_DB_PATH";
const INTERNAL_ERROR_MESSAGE: &str = "internal error";

static DB_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Status code plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: STATUS_OK,
            body,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            body: json!({ "error": message.into() }),
        }
    }

    fn internal_error() -> Self {
        Self {
            status: STATUS_INTERNAL_ERROR,
            body: json!({ "error": INTERNAL_ERROR_MESSAGE }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// JSON request body. `phoneNumber` is accepted as text or as a bare number.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyPayload {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone_number: Option<PhoneValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PhoneValue {
    Text(String),
    Number(u64),
}

impl PhoneValue {
    fn into_text(self) -> String {
        match self {
            Self::Text(value) => value,
            Self::Number(value) => value.to_string(),
        }
    }
}

/// Starts process logging. See `identity_core::init_logging`.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), LoggingError> {
    core_init_logging(level, log_dir)
}

/// Pins the database file used by `identify`.
///
/// Must run before the first `identify`; a later call with a different path
/// is rejected.
pub fn configure_db_path(path: impl AsRef<Path>) -> Result<(), String> {
    let requested = path.as_ref().to_path_buf();
    let active = DB_PATH.get_or_init(|| requested.clone());
    if *active != requested {
        return Err(format!(
            "database path already set to `{}`; refusing to switch to `{}`",
            active.display(),
            requested.display()
        ));
    }
    Ok(())
}

/// Liveness check; never touches the database.
pub fn health() -> ApiResponse {
    match serde_json::to_value(core_health()) {
        Ok(body) => ApiResponse::ok(body),
        Err(err) => {
            error!(
                "event=health module=api status=error error_code=encode_failed error={}",
                err
            );
            ApiResponse::internal_error()
        }
    }
}

/// Resolves raw identify fields against the process database.
pub fn identify(email: Option<String>, phone_number: Option<String>) -> ApiResponse {
    let request = match IdentifyRequest::new(email.as_deref(), phone_number.as_deref()) {
        Ok(request) => request,
        Err(err) => return ApiResponse::bad_request(err.to_string()),
    };

    let config = match ResolverConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(
                "event=identify module=api status=error error_code=invalid_config error={}",
                err
            );
            return ApiResponse::internal_error();
        }
    };

    let mut conn = match open_db(resolve_db_path()) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=identify module=api status=error error_code=db_open_failed error={}",
                err
            );
            return ApiResponse::internal_error();
        }
    };

    run_identify(&mut conn, &request, config)
}

/// Resolves raw identify fields on a caller-owned connection.
pub fn identify_with_connection(
    conn: &mut Connection,
    email: Option<&str>,
    phone_number: Option<&str>,
    config: ResolverConfig,
) -> ApiResponse {
    match IdentifyRequest::new(email, phone_number) {
        Ok(request) => run_identify(conn, &request, config),
        Err(err) => ApiResponse::bad_request(err.to_string()),
    }
}

/// Resolves a JSON request body (`{"email": ..., "phoneNumber": ...}`).
pub fn identify_json(conn: &mut Connection, body: &str, config: ResolverConfig) -> ApiResponse {
    let payload: IdentifyPayload = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(err) => return ApiResponse::bad_request(format!("malformed request body: {err}")),
    };
    let phone_number = payload.phone_number.map(PhoneValue::into_text);
    identify_with_connection(
        conn,
        payload.email.as_deref(),
        phone_number.as_deref(),
        config,
    )
}

fn run_identify(
    conn: &mut Connection,
    request: &IdentifyRequest,
    config: ResolverConfig,
) -> ApiResponse {
    let mut service = match IdentityService::new(conn, config) {
        Ok(service) => service,
        Err(err) => {
            error!(
                "event=identify module=api status=error error_code={} error={}",
                err.code(),
                err
            );
            return ApiResponse::internal_error();
        }
    };
    let response = match service.identify(request) {
        Ok(response) => response,
        Err(err) => {
            // The service already logged the failure with its cause.
            warn!(
                "event=identify module=api status=error error_code={}",
                err.code()
            );
            return ApiResponse::internal_error();
        }
    };

    match serde_json::to_value(&response) {
        Ok(body) => ApiResponse::ok(body),
        Err(err) => {
            error!(
                "event=identify module=api status=error error_code=encode_failed error={}",
                err
            );
            ApiResponse::internal_error()
        }
    }
}

fn resolve_db_path() -> PathBuf {
    DB_PATH
        .get_or_init(|| {
            if let Ok(raw) = std::env::var(DB_PATH_ENV) {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return PathBuf::from(trimmed);
                }
            }
            std::env::temp_dir().join(DB_FILE_NAME)
        })
        .clone()
}
