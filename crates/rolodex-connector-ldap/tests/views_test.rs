//! Live searches: streaming, limits, progress messages and cancellation.

mod common;

use std::time::Duration;

use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rolodex_connector::error::ConnectorError;
use rolodex_connector::traits::{AddressBook, ViewEvent};
use rolodex_connector_ldap::memory::{Call, MemoryDirectory};

const RECEIVING: &str = "Receiving LDAP search results...";
const ADDING: &str = "Adding contact to LDAP server...";

fn seeded() -> TestBook {
    let t = TestBook::standard();
    t.dir.insert(person("jdoe", "Jane Doe", "Doe"));
    t.dir.insert(person("jdoerr", "John Doerr", "Doerr"));
    t.dir.insert(person("bob", "Bob Builder", "Builder"));
    t
}

#[tokio::test]
async fn test_view_streams_matching_records() {
    let t = seeded();
    t.book.open().await.unwrap();

    let (_, rx) = t
        .book
        .start_view(r#"(beginswith "family_name" "Doe")"#, None)
        .await
        .unwrap();
    let out = collect_view(rx).await;

    assert!(out.result.is_ok(), "got {:?}", out.result);
    assert_eq!(out.statuses.first(), Some(&Some(RECEIVING.to_string())));
    let mut uids: Vec<String> = out.records.into_iter().filter_map(|r| r.uid).collect();
    uids.sort();
    assert_eq!(
        uids,
        [format!("uid=jdoe,{BASE_DN}"), format!("uid=jdoerr,{BASE_DN}")]
    );
}

#[tokio::test]
async fn test_unconstrained_view_without_browsing_is_empty() {
    let t = seeded();
    t.book.open().await.unwrap();
    t.dir.clear_calls();

    let (_, rx) = t
        .book
        .start_view(r#"(contains "x-evolution-any-field" "")"#, None)
        .await
        .unwrap();
    let out = collect_view(rx).await;

    assert!(out.result.is_ok());
    assert!(out.records.is_empty());
    assert_eq!(t.count_calls(|c| matches!(c, Call::Search { .. })), 0);
}

#[tokio::test]
async fn test_browsing_view_honours_max_results() {
    let t = TestBook::new(MemoryDirectory::new(), config().with_browsing(true));
    for (uid, cn, sn) in [("a", "Ann A", "A"), ("b", "Ben B", "B"), ("c", "Cat C", "C")] {
        t.dir.insert(person(uid, cn, sn));
    }
    t.book.open().await.unwrap();

    let (_, rx) = t
        .book
        .start_view(r#"(contains "x-evolution-any-field" "")"#, Some(2))
        .await
        .unwrap();
    let out = collect_view(rx).await;

    assert!(out.result.is_ok(), "browsing views end quietly at a limit: {:?}", out.result);
    assert_eq!(out.records.len(), 2);
    assert!(t
        .dir
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Search { filter, .. } if filter == "(cn=*)")));
}

#[tokio::test]
async fn test_view_limit_without_browsing_is_an_error() {
    let t = seeded();
    t.book.open().await.unwrap();

    let (_, rx) = t
        .book
        .start_view(r#"(exists "family_name")"#, Some(1))
        .await
        .unwrap();
    let out = collect_view(rx).await;

    assert_eq!(out.records.len(), 1);
    let err = out.result.unwrap_err();
    assert!(matches!(err, ConnectorError::SearchLimitExceeded { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_invalid_view_query_is_rejected() {
    let t = seeded();
    t.book.open().await.unwrap();

    let err = t.book.start_view("(frobnicate)", None).await.unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidQuery { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_stop_view_completes_with_cancelled() {
    let t = seeded();
    t.book.open().await.unwrap();
    t.dir.hold_completions(true);

    let (id, rx) = t.book.start_view(r#"(exists "family_name")"#, None).await.unwrap();
    t.book.stop_view(id).await.unwrap();
    let out = collect_view(rx).await;

    assert!(matches!(out.result, Err(ConnectorError::Cancelled)), "got {:?}", out.result);
    assert!(out.records.is_empty());
    assert_eq!(t.count_calls(|c| matches!(c, Call::Abandon { .. })), 1);

    // Stopping again is harmless.
    t.book.stop_view(id).await.unwrap();
}

#[tokio::test]
async fn test_write_progress_is_shown_on_first_view() {
    let t = seeded();
    t.book.open().await.unwrap();
    t.dir.hold_completions(true);

    let (id, rx) = t.book.start_view(r#"(exists "family_name")"#, None).await.unwrap();
    let book = t.book.clone();
    let create = tokio::spawn(async move { book.create(contact("Jane Roe", "Roe")).await });
    settle().await;

    t.book.stop_view(id).await.unwrap();
    let out = collect_view(rx).await;
    assert!(out.statuses.contains(&Some(ADDING.to_string())), "statuses {:?}", out.statuses);

    t.dir.hold_completions(false);
    let created = tokio::time::timeout(Duration::from_secs(5), create)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(created.uid.unwrap().starts_with("uid=roe."));
}

#[tokio::test]
async fn test_cancel_all_answers_every_caller() {
    let t = seeded();
    t.book.open().await.unwrap();
    t.dir.hold_completions(true);

    let (_, rx) = t.book.start_view(r#"(exists "family_name")"#, None).await.unwrap();
    let book = t.book.clone();
    let create = tokio::spawn(async move { book.create(contact("Jane Roe", "Roe")).await });
    settle().await;

    t.book.cancel_all().await.unwrap();

    let out = collect_view(rx).await;
    assert!(matches!(out.result, Err(ConnectorError::Cancelled)), "got {:?}", out.result);
    let result = tokio::time::timeout(Duration::from_secs(5), create)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ConnectorError::Cancelled)), "got {result:?}");
}

#[tokio::test]
async fn test_lost_connection_fails_outstanding_views() {
    let t = seeded();
    t.book.open().await.unwrap();
    t.dir.hold_completions(true);
    let opens = t.dir.opens();

    let (_, rx) = t.book.start_view(r#"(exists "family_name")"#, None).await.unwrap();
    t.dir.disconnect_all();
    let out = collect_view(rx).await;

    let err = out.result.unwrap_err();
    assert!(matches!(err, ConnectorError::ConnectionUnavailable { .. }), "got {err:?}");
    assert!(t.dir.opens() > opens, "the backend should reconnect");

    // The new session serves requests.
    t.dir.hold_completions(false);
    let record = t.book.fetch_one(&format!("uid=bob,{BASE_DN}")).await.unwrap();
    assert_eq!(record.display_name(), Some("Bob Builder"));
}

/// Every caller gets exactly one answer, whatever the interleaving of
/// completions and cancellations.
#[tokio::test]
async fn test_interleaved_cancellation_answers_each_request_once() {
    let t = seeded();
    t.book.open().await.unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..5 {
        let mut views = Vec::new();
        let mut writes = Vec::new();
        for i in 0..8 {
            if rng.gen_bool(0.5) {
                let (_, rx) = t.book.start_view(r#"(exists "family_name")"#, None).await.unwrap();
                views.push(rx);
            } else {
                let book = t.book.clone();
                let name = format!("Person{round}x{i}");
                writes.push(tokio::spawn(async move {
                    book.create(contact(&name, &name)).await
                }));
            }
        }

        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..40))).await;
        if rng.gen_bool(0.5) {
            t.book.cancel_all().await.unwrap();
        }

        for mut rx in views {
            let mut completions = 0;
            while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("view stalled")
            {
                if let ViewEvent::Complete(result) = event {
                    completions += 1;
                    assert!(
                        matches!(result, Ok(()) | Err(ConnectorError::Cancelled)),
                        "got {result:?}"
                    );
                }
            }
            assert_eq!(completions, 1);
        }
        for write in writes {
            let result = tokio::time::timeout(Duration::from_secs(5), write)
                .await
                .expect("create stalled")
                .unwrap();
            assert!(
                matches!(result, Ok(_) | Err(ConnectorError::Cancelled)),
                "got {result:?}"
            );
        }
    }
}
