//! Backend contract tests.
//!
//! Every [`Backend`] implementation must pass these. Each test works in its
//! own hash key so the suite can run against a shared table.

use std::sync::Arc;

use uuid::Uuid;

use tidemark::backend::{
    AttributeValue, Backend, BackendError, Condition, Item, Key, Query, Session, Update,
    HASH_KEY, ORDERING_INDEX, ORDERING_KEY, RANGE_KEY,
};

/// A hash key no other test uses.
pub fn partition(name: &str) -> String {
    format!("test_{}#{}", name, Uuid::new_v4().simple())
}

pub fn item(hash: &str, range: &str, data: &[u8]) -> Item {
    let mut item = Key::new(hash, range).to_item();
    item.insert("data".to_string(), AttributeValue::B(data.to_vec()));
    item
}

fn absent() -> Option<Condition> {
    Some(Condition::NotExists(RANGE_KEY.to_string()))
}

fn ranges(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .map(|i| Key::from_item(i).expect("item should carry its key").range)
        .collect()
}

/// Follow `last_key` until the query is exhausted.
pub async fn query_all(backend: &dyn Backend, query: Query) -> Vec<Item> {
    let mut items = Vec::new();
    let mut start = None;
    loop {
        let page = backend
            .query(&query.clone().start_after(start.take()))
            .await
            .expect("query should succeed");
        items.extend(page.items);
        match page.last_key {
            Some(last) => start = Some(last),
            None => return items,
        }
    }
}

// =============================================================================
// Single-item operations
// =============================================================================

pub async fn test_put_and_get(backend: &dyn Backend) {
    let hash = partition("put_get");
    backend
        .put_item(item(&hash, "a", b"hello"), None)
        .await
        .expect("put should succeed");

    let found = backend
        .get_item(&Key::new(&hash, "a"), true)
        .await
        .expect("get should succeed")
        .expect("item should exist");
    assert_eq!(found.get("data"), Some(&AttributeValue::B(b"hello".to_vec())));
    assert_eq!(
        found.get(HASH_KEY).and_then(AttributeValue::as_s),
        Some(hash.as_str())
    );
}

pub async fn test_get_missing(backend: &dyn Backend) {
    let hash = partition("get_missing");
    let found = backend
        .get_item(&Key::new(&hash, "nope"), true)
        .await
        .expect("get should succeed");
    assert!(found.is_none());
}

pub async fn test_put_if_absent(backend: &dyn Backend) {
    let hash = partition("put_if_absent");
    backend
        .put_item(item(&hash, "a", b"first"), absent())
        .await
        .expect("first put should succeed");

    let err = backend
        .put_item(item(&hash, "a", b"second"), absent())
        .await
        .expect_err("second put should fail");
    assert!(err.is_condition_failed(), "unexpected error: {err:?}");

    let found = backend
        .get_item(&Key::new(&hash, "a"), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.get("data"), Some(&AttributeValue::B(b"first".to_vec())));
}

pub async fn test_update_preconditions(backend: &dyn Backend) {
    let hash = partition("update");
    let key = Key::new(&hash, "a");
    let guard = Condition::All(vec![
        Condition::Exists(HASH_KEY.to_string()),
        Condition::NotExists(ORDERING_KEY.to_string()),
    ]);
    let set_gv = |v: &str| Update::new().set(ORDERING_KEY, AttributeValue::S(v.to_string()));

    // Missing item.
    let err = backend
        .update_item(&key, set_gv("1"), Some(guard.clone()))
        .await
        .expect_err("update of missing item should fail");
    assert!(err.is_condition_failed());
    assert!(backend.get_item(&key, true).await.unwrap().is_none());

    backend.put_item(item(&hash, "a", b"x"), None).await.unwrap();
    backend
        .update_item(&key, set_gv("1"), Some(guard.clone()))
        .await
        .expect("guarded update should succeed");

    // Already set.
    let err = backend
        .update_item(&key, set_gv("2"), Some(guard))
        .await
        .expect_err("second guarded update should fail");
    assert!(err.is_condition_failed());

    let found = backend.get_item(&key, true).await.unwrap().unwrap();
    assert_eq!(found.get(ORDERING_KEY).and_then(AttributeValue::as_s), Some("1"));
    assert_eq!(found.get("data"), Some(&AttributeValue::B(b"x".to_vec())));
}

pub async fn test_number_attributes(backend: &dyn Backend) {
    let hash = partition("numbers");
    let mut record = item(&hash, "a", b"x");
    record.insert("t0".to_string(), AttributeValue::N(1_700_000_000_123_456_789));
    record.insert("n".to_string(), AttributeValue::N(0));
    backend.put_item(record, None).await.unwrap();

    let found = backend
        .get_item(&Key::new(&hash, "a"), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        found.get("t0").and_then(AttributeValue::as_n),
        Some(1_700_000_000_123_456_789)
    );
    assert_eq!(found.get("n").and_then(AttributeValue::as_n), Some(0));
}

pub async fn test_conditional_delete(backend: &dyn Backend) {
    let hash = partition("delete");
    let key = Key::new(&hash, "a");
    backend.put_item(item(&hash, "a", b"x"), None).await.unwrap();

    let err = backend
        .delete_item(&key, Some(Condition::Exists(ORDERING_KEY.to_string())))
        .await
        .expect_err("delete should fail its condition");
    assert!(err.is_condition_failed());

    backend
        .delete_item(&key, Some(Condition::Exists(RANGE_KEY.to_string())))
        .await
        .expect("delete should succeed");
    assert!(backend.get_item(&key, true).await.unwrap().is_none());
}

// =============================================================================
// Queries
// =============================================================================

pub async fn test_query_between(backend: &dyn Backend) {
    let hash = partition("between");
    for r in ["a/t_1", "a/t_2", "a/t_3", "b/t_1"] {
        backend.put_item(item(&hash, r, b"x"), None).await.unwrap();
    }

    let items = query_all(
        backend,
        Query::new(&hash).between("a/t_2", "a/t_9").consistent(),
    )
    .await;
    assert_eq!(ranges(&items), vec!["a/t_2", "a/t_3"]);

    let items = query_all(
        backend,
        Query::new(&hash)
            .between("a/t_0", "a/t_9")
            .consistent()
            .backward(),
    )
    .await;
    assert_eq!(ranges(&items), vec!["a/t_3", "a/t_2", "a/t_1"]);
}

pub async fn test_query_begins_with(backend: &dyn Backend) {
    let hash = partition("prefix");
    for r in ["a/1", "a/2", "ab/1", "b/1"] {
        backend.put_item(item(&hash, r, b"x"), None).await.unwrap();
    }
    let items = query_all(backend, Query::new(&hash).begins_with("a/").consistent()).await;
    assert_eq!(ranges(&items), vec!["a/1", "a/2"]);
}

pub async fn test_query_pagination(backend: &dyn Backend) {
    let hash = partition("pages");
    let expected: Vec<String> = (0..7).map(|i| format!("r{:02}", i)).collect();
    for r in &expected {
        backend.put_item(item(&hash, r, b"x"), None).await.unwrap();
    }

    let mut pages = 0;
    let mut seen = Vec::new();
    let mut start = None;
    loop {
        let page = backend
            .query(&Query::new(&hash).consistent().limit(3).start_after(start.take()))
            .await
            .unwrap();
        assert!(page.items.len() <= 3);
        pages += 1;
        seen.extend(ranges(&page.items));
        match page.last_key {
            Some(last) => start = Some(last),
            None => break,
        }
    }
    assert_eq!(seen, expected);
    assert!(pages >= 3);
}

pub async fn test_ordering_index(backend: &dyn Backend) {
    let hash = partition("ordering");
    for (range, gv) in [("x", Some("003")), ("y", Some("001")), ("z", None), ("w", Some("002"))] {
        let mut record = item(&hash, range, b"x");
        if let Some(gv) = gv {
            record.insert(ORDERING_KEY.to_string(), AttributeValue::S(gv.to_string()));
        }
        backend.put_item(record, None).await.unwrap();
    }

    let items = query_all(
        backend,
        Query::new(&hash).on_index(ORDERING_INDEX).consistent(),
    )
    .await;
    assert_eq!(ranges(&items), vec!["y", "w", "x"]);

    let last = backend
        .query(
            &Query::new(&hash)
                .on_index(ORDERING_INDEX)
                .consistent()
                .backward()
                .limit(1),
        )
        .await
        .unwrap();
    assert_eq!(ranges(&last.items), vec!["x"]);

    let window = query_all(
        backend,
        Query::new(&hash)
            .on_index(ORDERING_INDEX)
            .between("002", "003")
            .consistent()
            .backward(),
    )
    .await;
    assert_eq!(ranges(&window), vec!["x", "w"]);
}

// =============================================================================
// Transactions
// =============================================================================

pub async fn test_transaction_commits_all(backend: Arc<dyn Backend>) {
    let hash = partition("txn_commit");
    let mut session = Session::new(backend.clone());
    session
        .put(item(&hash, "a", b"1"), absent())
        .put(item(&hash, "b", b"2"), absent());
    session.commit().await.expect("commit should succeed");

    let items = query_all(backend.as_ref(), Query::new(&hash).consistent()).await;
    assert_eq!(ranges(&items), vec!["a", "b"]);
}

pub async fn test_transaction_all_or_nothing(backend: Arc<dyn Backend>) {
    let hash = partition("txn_abort");
    backend.put_item(item(&hash, "taken", b"0"), None).await.unwrap();

    let mut session = Session::new(backend.clone());
    session
        .put(item(&hash, "a", b"1"), absent())
        .put(item(&hash, "taken", b"2"), absent());
    let err = session.commit().await.expect_err("commit should fail");
    assert_eq!(
        err,
        BackendError::ConditionFailed {
            key: Some(Key::new(&hash, "taken"))
        }
    );

    let items = query_all(backend.as_ref(), Query::new(&hash).consistent()).await;
    assert_eq!(ranges(&items), vec!["taken"]);
}

pub async fn test_transaction_check(backend: Arc<dyn Backend>) {
    let hash = partition("txn_check");
    let mut session = Session::new(backend.clone());
    session
        .check(
            Key::new(&hash, "guard"),
            Condition::Exists(RANGE_KEY.to_string()),
        )
        .put(item(&hash, "a", b"1"), absent());
    assert!(session.commit().await.unwrap_err().is_condition_failed());

    backend.put_item(item(&hash, "guard", b"g"), None).await.unwrap();
    let mut session = Session::new(backend.clone());
    session
        .check(
            Key::new(&hash, "guard"),
            Condition::Exists(RANGE_KEY.to_string()),
        )
        .put(item(&hash, "a", b"1"), absent());
    session.commit().await.expect("commit should succeed");
    assert!(backend
        .get_item(&Key::new(&hash, "a"), true)
        .await
        .unwrap()
        .is_some());
}

/// Run the whole contract against `$backend` (an `Arc<dyn Backend>`).
#[macro_export]
macro_rules! run_backend_tests {
    ($backend:expr) => {
        use $crate::backend::*;

        let backend: std::sync::Arc<dyn tidemark::backend::Backend> = $backend;

        test_put_and_get(backend.as_ref()).await;
        println!("  test_put_and_get: PASSED");

        test_get_missing(backend.as_ref()).await;
        println!("  test_get_missing: PASSED");

        test_put_if_absent(backend.as_ref()).await;
        println!("  test_put_if_absent: PASSED");

        test_update_preconditions(backend.as_ref()).await;
        println!("  test_update_preconditions: PASSED");

        test_number_attributes(backend.as_ref()).await;
        println!("  test_number_attributes: PASSED");

        test_conditional_delete(backend.as_ref()).await;
        println!("  test_conditional_delete: PASSED");

        test_query_between(backend.as_ref()).await;
        println!("  test_query_between: PASSED");

        test_query_begins_with(backend.as_ref()).await;
        println!("  test_query_begins_with: PASSED");

        test_query_pagination(backend.as_ref()).await;
        println!("  test_query_pagination: PASSED");

        test_ordering_index(backend.as_ref()).await;
        println!("  test_ordering_index: PASSED");

        test_transaction_commits_all(backend.clone()).await;
        println!("  test_transaction_commits_all: PASSED");

        test_transaction_all_or_nothing(backend.clone()).await;
        println!("  test_transaction_all_or_nothing: PASSED");

        test_transaction_check(backend.clone()).await;
        println!("  test_transaction_check: PASSED");
    };
}
