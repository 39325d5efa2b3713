//! End-to-end behavior of the address book against the in-memory directory:
//! query compilation, creation naming, renames and server-down recovery.

mod common;

use common::*;
use rolodex_connector::error::ConnectorError;
use rolodex_connector::record::{FieldId, Record};
use rolodex_connector::traits::AddressBook;
use rolodex_connector_ldap::client::{LdapStatus, ResultCode};
use rolodex_connector_ldap::memory::{Call, DirOp};
use rolodex_connector_ldap::{QueryCompiler, SchemaCapabilities};

#[test]
fn test_exact_name_query_compiles_to_cn_filter() {
    let compiler = QueryCompiler::new(SchemaCapabilities::default());
    let filter = compiler.compile_str(r#"(is "full_name" "Jane Doe")"#).unwrap();
    assert_eq!(filter.as_deref(), Some("(cn=Jane Doe)"));
}

#[test]
fn test_contains_widens_interior_space() {
    let compiler = QueryCompiler::new(SchemaCapabilities::default());

    let filter = compiler.compile_str(r#"(contains "full_name" "jan doe")"#).unwrap();
    assert_eq!(filter.as_deref(), Some("(cn=*jan*doe*)"));

    let filter = compiler.compile_str(r#"(contains "full_name" "")"#).unwrap();
    assert_eq!(filter.as_deref(), Some("(cn=*)"));
}

#[tokio::test]
async fn test_create_names_entry_from_family_name() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();
    t.dir.clear_calls();

    let record = Record::contact()
        .with_text(FieldId::FamilyName, "Doe")
        .with_text(FieldId::GivenName, "Jane");
    let created = t.book.create(record).await.unwrap();

    let uid = created.uid.clone().unwrap();
    assert!(uid.starts_with("uid=doe."), "unexpected identity {uid}");
    assert!(uid.ends_with(",ou=people,dc=example"));
    let suffix = &uid["uid=doe.".len()..uid.len() - ",ou=people,dc=example".len()];
    assert!(suffix.parse::<i64>().is_ok(), "suffix should be a timestamp: {suffix}");

    assert_eq!(t.count_calls(|c| matches!(c, Call::Add { .. })), 1);
    let entry = t.dir.entry(&uid).expect("entry stored");
    assert_eq!(entry.first_text("sn").as_deref(), Some("Doe"));
    assert_eq!(entry.first_text("givenName").as_deref(), Some("Jane"));
    assert_eq!(created.text(FieldId::GivenName), Some("Jane"));
}

fn jane_named_by_cn() -> rolodex_connector_ldap::client::WireEntry {
    rolodex_connector_ldap::client::WireEntry::new(format!("cn=Jane Doe,{BASE_DN}"))
        .with_text(
            "objectClass",
            &["top", "person", "organizationalPerson", "inetOrgPerson"],
        )
        .with_text("uid", &["jdoe"])
        .with_text("cn", &["Jane Doe"])
        .with_text("sn", &["Doe"])
}

#[tokio::test]
async fn test_modify_of_naming_field_renames_first() {
    let t = TestBook::standard();
    t.dir.insert(jane_named_by_cn());
    t.book.open().await.unwrap();

    let mut record = t.book.fetch_one(&format!("cn=Jane Doe,{BASE_DN}")).await.unwrap();
    record.set_text(FieldId::FullName, "Jane Smith-Doe");
    t.dir.clear_calls();

    let updated = t.book.modify(record).await.unwrap();
    let new_dn = format!("uid=jdoe,{BASE_DN}");
    assert_eq!(updated.uid.as_deref(), Some(new_dn.as_str()));
    assert_eq!(updated.text(FieldId::FullName), Some("Jane Smith-Doe"));

    let writes: Vec<Call> = t
        .dir
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Rename { .. } | Call::Modify { .. }))
        .collect();
    assert_eq!(writes.len(), 2);
    assert!(matches!(&writes[0], Call::Rename { new_rdn, .. } if new_rdn == "uid=jdoe"));
    assert!(matches!(&writes[1], Call::Modify { dn, .. } if dn == &new_dn));

    let entry = t.dir.entry(&new_dn).expect("renamed entry");
    assert_eq!(entry.first_text("cn").as_deref(), Some("Jane Smith-Doe"));
    assert!(t.dir.entry(&format!("cn=Jane Doe,{BASE_DN}")).is_none());
}

#[tokio::test]
async fn test_failed_rename_skips_modify() {
    let t = TestBook::standard();
    t.dir.insert(jane_named_by_cn());
    t.book.open().await.unwrap();

    let mut record = t.book.fetch_one(&format!("cn=Jane Doe,{BASE_DN}")).await.unwrap();
    record.set_text(FieldId::FullName, "Jane Smith-Doe");
    t.dir
        .fail_next(DirOp::Rename, LdapStatus::new(ResultCode::INSUFFICIENT_ACCESS, "no"));
    t.dir.clear_calls();

    let err = t.book.modify(record).await.unwrap_err();
    assert!(matches!(err, ConnectorError::PermissionDenied { .. }), "got {err:?}");
    assert_eq!(t.count_calls(|c| matches!(c, Call::Rename { .. })), 1);
    assert_eq!(t.count_calls(|c| matches!(c, Call::Modify { .. })), 0);

    let entry = t.dir.entry(&format!("cn=Jane Doe,{BASE_DN}")).expect("entry untouched");
    assert_eq!(entry.first_text("cn").as_deref(), Some("Jane Doe"));
}

#[tokio::test]
async fn test_modify_of_base_attribute_does_not_rename() {
    let t = TestBook::standard();
    t.dir.insert(person("jdoe", "Jane Doe", "Doe").with_text("ou", &["Sales"]));
    t.book.open().await.unwrap();

    let dn = format!("uid=jdoe,{BASE_DN}");
    let mut record = t.book.fetch_one(&dn).await.unwrap();
    record.set_text(FieldId::OrgUnit, "Engineering");
    t.dir.clear_calls();

    let updated = t.book.modify(record).await.unwrap();
    assert_eq!(updated.uid.as_deref(), Some(dn.as_str()));

    assert_eq!(t.count_calls(|c| matches!(c, Call::Rename { .. })), 0);
    let modifies: Vec<Call> = t
        .dir
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Modify { .. }))
        .collect();
    assert_eq!(modifies.len(), 1);
    assert!(matches!(
        &modifies[0],
        Call::Modify { dn: target, changes } if target == &dn && changes.iter().any(|m| m.attr == "ou")
    ));

    let entry = t.dir.entry(&dn).expect("entry kept its name");
    assert_eq!(entry.first_text("ou").as_deref(), Some("Engineering"));
}

#[tokio::test]
async fn test_server_down_reissues_once() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();
    t.dir.clear_calls();
    let opens_before = t.dir.opens();

    t.dir.fail_server_down(1);
    let created = t.book.create(contact("Jane Doe", "Doe")).await.unwrap();

    assert_eq!(t.dir.opens(), opens_before + 1);
    assert_eq!(t.count_calls(|c| matches!(c, Call::Add { .. })), 2);
    assert!(t.dir.entry(created.uid.as_deref().unwrap()).is_some());
}

#[tokio::test]
async fn test_second_server_down_is_surfaced() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();
    t.dir.clear_calls();

    t.dir.fail_server_down(2);
    let err = t.book.create(contact("Jane Doe", "Doe")).await.unwrap_err();

    assert!(matches!(err, ConnectorError::ConnectionUnavailable { .. }), "got {err:?}");
    assert!(err.is_transient());
    assert_eq!(t.count_calls(|c| matches!(c, Call::Add { .. })), 2);
    assert!(t.dir.is_empty());
}

#[tokio::test]
async fn test_remove_deletes_entry() {
    let t = TestBook::standard();
    t.dir.insert(person("jdoe", "Jane Doe", "Doe"));
    t.book.open().await.unwrap();

    let dn = format!("uid=jdoe,{BASE_DN}");
    let removed = t.book.remove(&dn).await.unwrap();
    assert_eq!(removed, dn);
    assert!(t.dir.entry(&dn).is_none());

    let err = t.book.remove(&dn).await.unwrap_err();
    assert!(matches!(err, ConnectorError::NotFound { .. }), "got {err:?}");
}
