use identity_core::db::open_db;
use identity_core::{IdentifyRequest, IdentityError, IdentityService, ResolverConfig};
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 8;

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn run_concurrently(path: &Path, email: &'static str, phone: &'static str) -> Vec<i64> {
    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let path = path.to_path_buf();
            thread::spawn(move || {
                let mut conn = open_db(&path).unwrap();
                let mut service =
                    IdentityService::new(&mut conn, ResolverConfig::default()).unwrap();
                let request = IdentifyRequest::new(Some(email), Some(phone)).unwrap();
                barrier.wait();
                service.identify(&request).unwrap().contact.primary_contact_id
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect()
}

#[test]
fn concurrent_identical_requests_create_one_primary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("concurrent.db");
    drop(open_db(&path).unwrap());

    let primary_ids = run_concurrently(&path, "a@x.com", "111");

    assert!(primary_ids.iter().all(|id| *id == primary_ids[0]));
    let conn = open_db(&path).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM contacts;"), 1);
}

#[test]
fn concurrent_partial_requests_create_one_secondary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.db");
    {
        let mut conn = open_db(&path).unwrap();
        let mut service = IdentityService::new(&mut conn, ResolverConfig::default()).unwrap();
        let seed = IdentifyRequest::new(Some("a@x.com"), Some("111")).unwrap();
        service.identify(&seed).unwrap();
    }

    let primary_ids = run_concurrently(&path, "a@x.com", "222");

    assert!(primary_ids.iter().all(|id| *id == primary_ids[0]));
    let conn = open_db(&path).unwrap();
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM contacts WHERE link_precedence = 'secondary';"
        ),
        1
    );
}

#[test]
fn held_write_lock_exhausts_retries_then_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");
    let mut holder = open_db(&path).unwrap();
    let mut conn = open_db(&path).unwrap();
    let config = ResolverConfig {
        max_attempts: 2,
        busy_timeout: Duration::from_millis(50),
        retry_backoff: Duration::from_millis(1),
    };
    let request = IdentifyRequest::new(Some("a@x.com"), None).unwrap();

    let lock = holder
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .unwrap();
    {
        let mut service = IdentityService::new(&mut conn, config).unwrap();
        let err = service.identify(&request).unwrap_err();
        match err {
            IdentityError::ConflictRetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(last.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    lock.rollback().unwrap();

    let mut service = IdentityService::new(&mut conn, config).unwrap();
    let response = service.identify(&request).unwrap();
    assert!(response.contact.secondary_contact_ids.is_empty());
    drop(service);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM contacts;"), 1);
}
