//! Records written through the address book read back unchanged, and batch
//! searches agree with local query evaluation.

mod common;

use chrono::NaiveDate;
use common::*;
use rolodex_connector::error::{ConnectorError, LimitKind};
use rolodex_connector::record::{FieldId, FieldValue, GroupMember, Record};
use rolodex_connector::traits::AddressBook;
use rolodex_connector_ldap::memory::MemoryDirectory;
use rolodex_connector_ldap::{RecordMatcher, SchemaCapabilities};

const ALL: &str = r#"(contains "x-evolution-any-field" "")"#;

fn rich_jane() -> Record {
    Record::contact()
        .with_text(FieldId::FullName, "Jane Doe")
        .with_text(FieldId::GivenName, "Jane")
        .with_text(FieldId::FamilyName, "Doe")
        .with_text(FieldId::FileAs, "Doe, Jane")
        .with_text(FieldId::Email1, "jane@example.com")
        .with_text(FieldId::Email2, "jd@example.org")
        .with_text(FieldId::BusinessPhone, "+1 555 0100")
        .with_text(FieldId::BusinessPhone2, "+1 555 0101")
        .with_text(FieldId::MobilePhone, "+1 555 0199")
        .with_text(FieldId::Org, "Example Corp")
        .with_text(FieldId::OrgUnit, "Research")
        .with_text(FieldId::Title, "CTO")
        .with_text(FieldId::AddressLabelWork, "1 Main St\nSpringfield")
        .with_text(FieldId::Note, "Met at the conference")
        .with_text(FieldId::HomepageUrl, "https://example.com/~jane")
        .with_text(FieldId::CalendarUri, "https://cal.example.com/jane")
        .with(
            FieldId::BirthDate,
            FieldValue::Date(NaiveDate::from_ymd_opt(1980, 4, 1).unwrap()),
        )
        .with(
            FieldId::CategoryList,
            FieldValue::TextList(vec!["Work".to_string(), "VIP".to_string()]),
        )
        .with(FieldId::Photo, FieldValue::Bytes(vec![0xff, 0xd8, 0xff, 0xe0]))
}

#[tokio::test]
async fn test_rich_record_round_trip() {
    let t = TestBook::new(MemoryDirectory::with_evolution_schema(), config());
    t.book.open().await.unwrap();

    let created = t.book.create(rich_jane()).await.unwrap();
    let fetched = t.book.fetch_one(created.uid.as_deref().unwrap()).await.unwrap();

    assert_eq!(fetched, created);
    assert_eq!(fetched.text(FieldId::FileAs), Some("Doe, Jane"));

    let entry = t.dir.entry(created.uid.as_deref().unwrap()).unwrap();
    let classes = entry.texts("objectClass");
    assert!(classes.iter().any(|c| c == "evolutionPerson"));
    assert!(classes.iter().any(|c| c == "calEntry"));
    assert_eq!(entry.first_text("postalAddress").as_deref(), Some("1 Main St$Springfield"));
}

#[tokio::test]
async fn test_standard_schema_drops_extended_fields() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();

    let created = t.book.create(rich_jane()).await.unwrap();
    let fetched = t.book.fetch_one(created.uid.as_deref().unwrap()).await.unwrap();

    assert_eq!(fetched.text(FieldId::Title), Some("CTO"));
    assert_eq!(fetched.text(FieldId::Email2), Some("jd@example.org"));
    assert!(fetched.get(FieldId::FileAs).is_none());
    assert!(fetched.get(FieldId::Note).is_none());
    assert!(fetched.get(FieldId::CalendarUri).is_none());
}

#[tokio::test]
async fn test_list_members_are_resolved() {
    let t = TestBook::standard();
    t.dir.insert(person("jdoe", "Jane Doe", "Doe").with_text("mail", &["jane@example.com"]));
    t.dir.insert(person("bob", "Bob Builder", "Builder"));
    t.book.open().await.unwrap();

    let jane_dn = format!("uid=jdoe,{BASE_DN}");
    let bob_dn = format!("uid=bob,{BASE_DN}");
    let gone_dn = format!("uid=gone,{BASE_DN}");
    let list = Record::list()
        .with_text(FieldId::FullName, "Team")
        .with(
            FieldId::Members,
            FieldValue::Members(vec![
                GroupMember::with_dn(&jane_dn),
                GroupMember::with_dn(&bob_dn),
                GroupMember::with_dn(&gone_dn),
            ]),
        );

    let created = t.book.create(list).await.unwrap();
    let uid = created.uid.clone().unwrap();
    assert!(uid.starts_with("description=team."), "unexpected identity {uid}");

    let fetched = t.book.fetch_one(&uid).await.unwrap();
    assert!(fetched.is_list);
    let members = fetched.members();
    assert_eq!(members.len(), 3);
    assert_eq!(members[0].name.as_deref(), Some("Jane Doe"));
    assert_eq!(members[0].email.as_deref(), Some("jane@example.com"));
    assert_eq!(members[1].name.as_deref(), Some("Bob Builder"));
    assert_eq!(members[1].email, None);
    assert_eq!(members[2].dn.as_deref(), Some(gone_dn.as_str()));
    assert_eq!(members[2].name, None);
}

#[tokio::test]
async fn test_list_without_members_is_rejected_before_sending() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();
    t.dir.clear_calls();

    let err = t
        .book
        .create(Record::list().with_text(FieldId::FullName, "Empty"))
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectorError::StructuralError { .. }), "got {err:?}");
    assert!(t.dir.calls().is_empty());
}

async fn seed(t: &TestBook) {
    let people = [
        contact("Jane Doe", "Doe")
            .with_text(FieldId::Title, "CTO")
            .with_text(FieldId::Email1, "jane@example.com")
            .with_text(FieldId::Email2, "jd@example.org"),
        contact("John Doerr", "Doerr")
            .with_text(FieldId::Email1, "john@example.com")
            .with_text(FieldId::BusinessPhone, "555-0100"),
        contact("Bob Builder", "Builder")
            .with_text(FieldId::Title, "Engineer")
            .with_text(FieldId::Email1, "bob@builder.org"),
        contact("Alice Smith", "Smith"),
    ];
    for record in people {
        t.book.create(record).await.unwrap();
    }
}

#[tokio::test]
async fn test_batch_search_agrees_with_matcher() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();
    seed(&t).await;

    let all = t.book.fetch_many(ALL).await.unwrap();
    assert_eq!(all.len(), 4);

    let queries = [
        r#"(contains "full_name" "jan doe")"#,
        r#"(contains "full_name" "")"#,
        r#"(contains "full_name" "DOE")"#,
        r#"(is "full_name" "Jane Doe")"#,
        r#"(is "title" "cto")"#,
        r#"(beginswith "full_name" "Do")"#,
        r#"(beginswith "full_name" "b")"#,
        r#"(beginswith "title" "")"#,
        r#"(endswith "email" ".org")"#,
        r#"(endswith "title" "")"#,
        r#"(exists "title")"#,
        r#"(exists "business_phone")"#,
        r#"(not (exists "title"))"#,
        r#"(contains "x-evolution-any-field" "example.org")"#,
        r#"(contains "x-evolution-any-field" "0100")"#,
        r#"(and (exists "title") (contains "full_name" "doe"))"#,
        r#"(or (is "title" "Engineer") (beginswith "email" "john"))"#,
        r#"(or (beginswith "title" "") (is "title" "CTO"))"#,
        r#"(is "shoe_size" "42")"#,
        r#"(not (is "shoe_size" "42"))"#,
    ];

    for query in queries {
        let mut from_server = t.book.list_ids(query).await.unwrap();
        from_server.sort();

        let matcher = RecordMatcher::parse(query, SchemaCapabilities::default()).unwrap();
        let mut local: Vec<String> = all
            .iter()
            .filter(|r| matcher.matches(r))
            .filter_map(|r| r.uid.clone())
            .collect();
        local.sort();

        assert_eq!(from_server, local, "query {query}");
    }
}

#[tokio::test]
async fn test_matcher_spot_checks() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();
    seed(&t).await;

    let names = |records: Vec<Record>| {
        let mut names: Vec<String> = records
            .iter()
            .filter_map(|r| r.text(FieldId::FullName).map(str::to_string))
            .collect();
        names.sort();
        names
    };

    let hits = t.book.fetch_many(r#"(beginswith "full_name" "Do")"#).await.unwrap();
    assert_eq!(names(hits), ["Jane Doe", "John Doerr"]);

    let hits = t.book.fetch_many(r#"(endswith "email" ".org")"#).await.unwrap();
    assert_eq!(names(hits), ["Bob Builder", "Jane Doe"]);

    let hits = t.book.fetch_many(r#"(not (exists "title"))"#).await.unwrap();
    assert_eq!(names(hits), ["Alice Smith", "John Doerr"]);
}

#[tokio::test]
async fn test_batch_size_limit_keeps_partial_results() {
    let t = TestBook::new(MemoryDirectory::new(), config().with_size_limit(2));
    for (uid, cn, sn) in [("a", "Ann A", "A"), ("b", "Ben B", "B"), ("c", "Cat C", "C")] {
        t.dir.insert(person(uid, cn, sn));
    }
    t.book.open().await.unwrap();

    let err = t.book.fetch_many(ALL).await.unwrap_err();
    match &err {
        ConnectorError::SearchLimitExceeded { kind, partial } => {
            assert_eq!(*kind, LimitKind::Size);
            assert_eq!(partial.len(), 2);
        }
        other => panic!("expected a size limit error, got {other:?}"),
    }
    assert_eq!(err.error_code(), "SIZE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_fetch_missing_entry_is_not_found() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();

    let err = t
        .book
        .fetch_one(&format!("uid=nobody,{BASE_DN}"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_invalid_query_is_rejected() {
    let t = TestBook::standard();
    t.book.open().await.unwrap();

    let err = t.book.fetch_many("(is \"full_name\"").await.unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidQuery { .. }), "got {err:?}");
}
