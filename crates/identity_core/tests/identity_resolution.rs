use identity_core::db::open_db_in_memory;
use identity_core::{
    ConsolidatedContact, IdentifyRequest, IdentifyRequestError, IdentityError, IdentityService,
    LinkPrecedence, ResolverConfig,
};
use rusqlite::Connection;

fn identify(
    conn: &mut Connection,
    email: Option<&str>,
    phone: Option<&str>,
) -> ConsolidatedContact {
    let request = IdentifyRequest::new(email, phone).unwrap();
    let mut service = IdentityService::new(conn, ResolverConfig::default()).unwrap();
    service.identify(&request).unwrap().contact
}

fn contact_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM contacts;", [], |row| row.get(0))
        .unwrap()
}

fn link_of(conn: &Connection, id: i64) -> (String, Option<i64>) {
    conn.query_row(
        "SELECT link_precedence, linked_id FROM contacts WHERE id = ?1;",
        [id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .unwrap()
}

fn set_created_at(conn: &Connection, id: i64, created_at: i64) {
    conn.execute(
        "UPDATE contacts SET created_at = ?1 WHERE id = ?2;",
        [created_at, id],
    )
    .unwrap();
}

#[test]
fn no_match_creates_single_primary() {
    let mut conn = open_db_in_memory().unwrap();

    let view = identify(&mut conn, Some("a@x.com"), Some("111"));

    assert_eq!(contact_count(&conn), 1);
    assert_eq!(view.emails, vec!["a@x.com"]);
    assert_eq!(view.phone_numbers, vec!["111"]);
    assert!(view.secondary_contact_ids.is_empty());
    assert_eq!(
        link_of(&conn, view.primary_contact_id),
        ("primary".to_string(), None)
    );
}

#[test]
fn repeated_identical_requests_are_idempotent() {
    let mut conn = open_db_in_memory().unwrap();

    let first = identify(&mut conn, Some("a@x.com"), Some("111"));
    let second = identify(&mut conn, Some("a@x.com"), Some("111"));
    assert_eq!(first, second);
    assert_eq!(contact_count(&conn), 1);

    let partial = identify(&mut conn, Some("a@x.com"), Some("222"));
    let partial_again = identify(&mut conn, Some("a@x.com"), Some("222"));
    assert_eq!(partial, partial_again);
    assert_eq!(contact_count(&conn), 2);
}

#[test]
fn partial_match_creates_linked_secondary() {
    let mut conn = open_db_in_memory().unwrap();
    let primary = identify(&mut conn, Some("a@x.com"), Some("111"));

    let view = identify(&mut conn, Some("a@x.com"), Some("222"));

    assert_eq!(view.primary_contact_id, primary.primary_contact_id);
    assert_eq!(view.emails, vec!["a@x.com"]);
    assert_eq!(view.phone_numbers, vec!["111", "222"]);
    assert_eq!(view.secondary_contact_ids.len(), 1);
    let secondary_id = view.secondary_contact_ids[0];
    assert_eq!(
        link_of(&conn, secondary_id),
        ("secondary".to_string(), Some(primary.primary_contact_id))
    );
}

#[test]
fn single_field_request_already_covered_creates_nothing() {
    let mut conn = open_db_in_memory().unwrap();
    identify(&mut conn, Some("a@x.com"), Some("111"));
    identify(&mut conn, Some("b@x.com"), Some("111"));

    let by_phone = identify(&mut conn, None, Some("111"));
    let by_email = identify(&mut conn, Some("b@x.com"), None);

    assert_eq!(contact_count(&conn), 2);
    assert_eq!(by_phone, by_email);
    assert_eq!(by_phone.emails, vec!["a@x.com", "b@x.com"]);
}

#[test]
fn merge_keeps_oldest_primary_and_relinks_secondaries() {
    let mut conn = open_db_in_memory().unwrap();
    let lorraine = identify(&mut conn, Some("lorraine@hill.edu"), Some("123456"));
    let george = identify(&mut conn, Some("george@hill.edu"), Some("717171"));
    let george_alias = identify(&mut conn, Some("george@hill.edu"), Some("919191"));
    let p1 = lorraine.primary_contact_id;
    let p2 = george.primary_contact_id;
    let s3 = george_alias.secondary_contact_ids[0];
    set_created_at(&conn, p1, 1_000);
    set_created_at(&conn, p2, 2_000);
    set_created_at(&conn, s3, 3_000);

    let merged = identify(&mut conn, Some("lorraine@hill.edu"), Some("717171"));

    assert_eq!(merged.primary_contact_id, p1);
    assert_eq!(merged.emails, vec!["lorraine@hill.edu", "george@hill.edu"]);
    assert_eq!(merged.phone_numbers, vec!["123456", "717171", "919191"]);
    assert_eq!(merged.secondary_contact_ids, vec![p2, s3]);
    assert_eq!(link_of(&conn, p2), ("secondary".to_string(), Some(p1)));
    assert_eq!(link_of(&conn, s3), ("secondary".to_string(), Some(p1)));
    assert_eq!(contact_count(&conn), 3);
}

#[test]
fn merge_follows_created_at_not_id() {
    let mut conn = open_db_in_memory().unwrap();
    let first = identify(&mut conn, Some("a@x.com"), None).primary_contact_id;
    let second = identify(&mut conn, None, Some("222")).primary_contact_id;
    set_created_at(&conn, first, 9_000);
    set_created_at(&conn, second, 1_000);

    let merged = identify(&mut conn, Some("a@x.com"), Some("222"));

    assert_eq!(merged.primary_contact_id, second);
    assert_eq!(merged.emails, vec!["a@x.com"]);
    assert_eq!(merged.phone_numbers, vec!["222"]);
    assert_eq!(link_of(&conn, first), ("secondary".to_string(), Some(second)));
}

#[test]
fn merge_tie_on_created_at_prefers_lower_id() {
    let mut conn = open_db_in_memory().unwrap();
    let first = identify(&mut conn, Some("a@x.com"), None).primary_contact_id;
    let second = identify(&mut conn, None, Some("222")).primary_contact_id;
    set_created_at(&conn, first, 4_000);
    set_created_at(&conn, second, 4_000);

    let merged = identify(&mut conn, Some("a@x.com"), Some("222"));

    assert_eq!(merged.primary_contact_id, first.min(second));
}

#[test]
fn transitive_match_through_secondary_reaches_primary() {
    let mut conn = open_db_in_memory().unwrap();
    let a = identify(&mut conn, Some("a@x.com"), Some("111")).primary_contact_id;
    let b = identify(&mut conn, Some("a@x.com"), Some("222")).secondary_contact_ids[0];

    let view = identify(&mut conn, Some("c@x.com"), Some("222"));

    assert_eq!(view.primary_contact_id, a);
    assert_eq!(view.secondary_contact_ids.len(), 2);
    assert_eq!(view.secondary_contact_ids[0], b);
    let c = view.secondary_contact_ids[1];
    assert_eq!(link_of(&conn, c), ("secondary".to_string(), Some(a)));

    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM contacts child
             JOIN contacts parent ON parent.id = child.linked_id
             WHERE parent.link_precedence <> 'primary';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn merging_three_clusters_leaves_one_primary() {
    let mut conn = open_db_in_memory().unwrap();
    let a = identify(&mut conn, Some("a@x.com"), Some("111")).primary_contact_id;
    let b = identify(&mut conn, Some("b@x.com"), Some("222")).primary_contact_id;
    let c = identify(&mut conn, Some("c@x.com"), Some("333")).primary_contact_id;
    set_created_at(&conn, a, 3_000);
    set_created_at(&conn, b, 1_000);
    set_created_at(&conn, c, 2_000);

    identify(&mut conn, Some("a@x.com"), Some("222"));
    let merged = identify(&mut conn, Some("c@x.com"), Some("111"));

    assert_eq!(merged.primary_contact_id, b);
    assert_eq!(merged.emails, vec!["b@x.com", "c@x.com", "a@x.com"]);
    let primaries: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM contacts WHERE link_precedence = 'primary';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(primaries, 1);
}

#[test]
fn soft_deleted_contacts_do_not_match() {
    let mut conn = open_db_in_memory().unwrap();
    let old = identify(&mut conn, Some("a@x.com"), Some("111")).primary_contact_id;
    conn.execute("UPDATE contacts SET deleted_at = 1 WHERE id = ?1;", [old])
        .unwrap();

    let view = identify(&mut conn, Some("a@x.com"), Some("111"));

    assert_ne!(view.primary_contact_id, old);
    assert!(view.secondary_contact_ids.is_empty());
    assert_eq!(contact_count(&conn), 2);
}

#[test]
fn secondary_chain_is_an_invariant_violation_and_rolls_back() {
    let mut conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO contacts (id, email, link_precedence) VALUES (1, 'a@x.com', 'primary');
         INSERT INTO contacts (id, email, linked_id, link_precedence) VALUES (2, 'b@x.com', 1, 'secondary');
         INSERT INTO contacts (id, email, linked_id, link_precedence) VALUES (3, 'c@x.com', 2, 'secondary');",
    )
    .unwrap();

    let request = IdentifyRequest::new(Some("c@x.com"), Some("999")).unwrap();
    let mut service = IdentityService::new(&mut conn, ResolverConfig::default()).unwrap();
    let err = service.identify(&request).unwrap_err();

    assert!(matches!(err, IdentityError::InvariantViolation(_)));
    assert!(!err.is_retryable());
    assert_eq!(contact_count(&conn), 3);
}

#[test]
fn secondary_of_deleted_primary_is_an_invariant_violation_and_rolls_back() {
    let mut conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO contacts (id, email, phone_number, link_precedence) VALUES (1, 'a@x.com', '111', 'primary');
         INSERT INTO contacts (id, email, phone_number, linked_id, link_precedence) VALUES (2, 'b@x.com', '111', 1, 'secondary');
         UPDATE contacts SET deleted_at = 1 WHERE id = 1;",
    )
    .unwrap();

    let request = IdentifyRequest::new(Some("b@x.com"), Some("222")).unwrap();
    let mut service = IdentityService::new(&mut conn, ResolverConfig::default()).unwrap();
    let err = service.identify(&request).unwrap_err();

    assert!(matches!(err, IdentityError::InvariantViolation(_)));
    assert!(!err.is_retryable());
    assert_eq!(contact_count(&conn), 2);
    assert_eq!(link_of(&conn, 1), ("primary".to_string(), None));
    assert_eq!(link_of(&conn, 2), ("secondary".to_string(), Some(1)));
}

#[test]
fn lookup_cluster_reads_without_mutating() {
    let mut conn = open_db_in_memory().unwrap();
    let primary = identify(&mut conn, Some("a@x.com"), Some("111"));
    let with_alias = identify(&mut conn, Some("b@x.com"), Some("111"));
    let alias = with_alias.secondary_contact_ids[0];

    let mut service = IdentityService::new(&mut conn, ResolverConfig::default()).unwrap();
    let via_alias = service.lookup_cluster(alias).unwrap().unwrap();
    let via_primary = service
        .lookup_cluster(primary.primary_contact_id)
        .unwrap()
        .unwrap();
    let missing = service.lookup_cluster(9_999).unwrap();

    assert_eq!(via_alias, with_alias);
    assert_eq!(via_primary, with_alias);
    assert!(missing.is_none());
    drop(service);
    assert_eq!(contact_count(&conn), 2);
}

#[test]
fn null_input_is_rejected_before_the_store() {
    assert_eq!(
        IdentifyRequest::new(None, None),
        Err(IdentifyRequestError::MissingIdentifier)
    );
    assert_eq!(
        IdentifyRequest::new(Some("  "), Some("")),
        Err(IdentifyRequestError::MissingIdentifier)
    );
}

#[test]
fn response_serializes_to_wire_shape() {
    let mut conn = open_db_in_memory().unwrap();
    identify(&mut conn, Some("a@x.com"), Some("111"));
    let request = IdentifyRequest::new(Some("a@x.com"), Some("222")).unwrap();
    let mut service = IdentityService::new(&mut conn, ResolverConfig::default()).unwrap();
    let response = service.identify(&request).unwrap();

    let json = serde_json::to_value(&response).unwrap();
    let contact = &json["contact"];
    assert_eq!(contact["primaryContactId"], 1);
    assert_eq!(contact["emails"], serde_json::json!(["a@x.com"]));
    assert_eq!(contact["phoneNumbers"], serde_json::json!(["111", "222"]));
    assert_eq!(contact["secondaryContactIds"], serde_json::json!([2]));
}

#[test]
fn demoted_primary_keeps_its_values() {
    let mut conn = open_db_in_memory().unwrap();
    let first = identify(&mut conn, Some("a@x.com"), None).primary_contact_id;
    let second = identify(&mut conn, Some("b@x.com"), Some("555")).primary_contact_id;
    set_created_at(&conn, first, 1_000);
    set_created_at(&conn, second, 2_000);

    identify(&mut conn, Some("a@x.com"), Some("555"));

    let (email, precedence): (Option<String>, String) = conn
        .query_row(
            "SELECT email, link_precedence FROM contacts WHERE id = ?1;",
            [second],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(email.as_deref(), Some("b@x.com"));
    assert_eq!(precedence, LinkPrecedence::Secondary.as_str());
}
