use super::*;

fn item(hash: &str, range: &str) -> Item {
    let mut item = Key::new(hash, range).to_item();
    item.insert("data".into(), AttributeValue::B(range.as_bytes().to_vec()));
    item
}

fn indexed(hash: &str, range: &str, gv: &str) -> Item {
    let mut item = item(hash, range);
    item.insert(ORDERING_KEY.into(), AttributeValue::S(gv.into()));
    item
}

fn ranges(page: &QueryPage) -> Vec<String> {
    page.items
        .iter()
        .map(|i| Key::from_item(i).unwrap().range)
        .collect()
}

// ============================================================================
// Failure injection
// ============================================================================

#[tokio::test]
async fn test_fail_on_write() {
    let backend = MemoryBackend::new();
    backend.set_fail_on_write(true).await;

    let result = backend.put_item(item("p", "a"), None).await;
    assert!(matches!(result, Err(BackendError::Unavailable(_))));
    assert!(backend.is_empty().await);

    backend.set_fail_on_write(false).await;
    backend.put_item(item("p", "a"), None).await.unwrap();
    assert_eq!(backend.len().await, 1);
}

#[tokio::test]
async fn test_fail_on_read() {
    let backend = MemoryBackend::new();
    backend.put_item(item("p", "a"), None).await.unwrap();
    backend.set_fail_on_read(true).await;

    assert!(backend.get_item(&Key::new("p", "a"), true).await.is_err());
    assert!(backend.query(&Query::new("p")).await.is_err());
}

#[tokio::test]
async fn test_counters() {
    let backend = MemoryBackend::new();
    backend.get_item(&Key::new("p", "a"), false).await.unwrap();
    backend.get_item(&Key::new("p", "b"), true).await.unwrap();
    assert_eq!(backend.get_item_count(), 2);

    backend
        .transact_write(vec![
            Operation::Put {
                item: item("p", "a"),
                condition: None,
            },
            Operation::Put {
                item: item("p", "b"),
                condition: None,
            },
        ])
        .await
        .unwrap();
    assert_eq!(backend.transaction_count(), 1);
    assert_eq!(backend.len().await, 2);
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_page_size_caps_results() {
    let backend = MemoryBackend::with_page_size(2);
    for r in ["a", "b", "c", "d", "e"] {
        backend.put_item(item("p", r), None).await.unwrap();
    }

    let mut seen = Vec::new();
    let mut start = None;
    let mut pages = 0;
    loop {
        let page = backend
            .query(&Query::new("p").start_after(start))
            .await
            .unwrap();
        pages += 1;
        seen.extend(ranges(&page));
        start = page.last_key;
        if start.is_none() {
            break;
        }
    }
    assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(pages, 3);
}

#[tokio::test]
async fn test_backward_pagination_on_index() {
    let backend = MemoryBackend::with_page_size(2);
    backend.put_item(indexed("p", "x", "3"), None).await.unwrap();
    backend.put_item(indexed("p", "y", "1"), None).await.unwrap();
    backend.put_item(indexed("p", "z", "2"), None).await.unwrap();
    backend.put_item(item("p", "unindexed"), None).await.unwrap();

    let first = backend
        .query(&Query::new("p").on_index(ORDERING_INDEX).backward())
        .await
        .unwrap();
    assert_eq!(ranges(&first), vec!["x", "z"]);
    let start = first.last_key.clone().unwrap();
    assert!(start.contains_key(ORDERING_KEY));

    let second = backend
        .query(
            &Query::new("p")
                .on_index(ORDERING_INDEX)
                .backward()
                .start_after(Some(start)),
        )
        .await
        .unwrap();
    assert_eq!(ranges(&second), vec!["y"]);
    assert!(second.last_key.is_none());
}

#[tokio::test]
async fn test_unknown_index() {
    let backend = MemoryBackend::new();
    let result = backend.query(&Query::new("p").on_index("nope")).await;
    assert!(matches!(result, Err(BackendError::Request(_))));
}

#[tokio::test]
async fn test_custom_index() {
    let backend = MemoryBackend::new().with_index("by-owner", "owner");
    let mut a = item("p", "a");
    a.insert("owner".into(), AttributeValue::S("zed".into()));
    let mut b = item("p", "b");
    b.insert("owner".into(), AttributeValue::S("amy".into()));
    backend.put_item(a, None).await.unwrap();
    backend.put_item(b, None).await.unwrap();

    let page = backend
        .query(&Query::new("p").on_index("by-owner"))
        .await
        .unwrap();
    assert_eq!(ranges(&page), vec!["b", "a"]);
}

#[tokio::test]
async fn test_malformed_start_key() {
    let backend = MemoryBackend::new();
    backend.put_item(item("p", "a"), None).await.unwrap();
    let result = backend
        .query(&Query::new("p").start_after(Some(Item::new())))
        .await;
    assert!(matches!(result, Err(BackendError::Malformed(_))));
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_update_cannot_touch_key_attributes() {
    let backend = MemoryBackend::new();
    let update = Update::new().set(RANGE_KEY, AttributeValue::S("other".into()));
    let result = backend
        .update_item(&Key::new("p", "a"), update, None)
        .await;
    assert!(matches!(result, Err(BackendError::Request(_))));
}

#[tokio::test]
async fn test_transaction_rejects_duplicate_targets() {
    let backend = MemoryBackend::new();
    let result = backend
        .transact_write(vec![
            Operation::Put {
                item: item("p", "a"),
                condition: None,
            },
            Operation::Delete {
                key: Key::new("p", "a"),
                condition: None,
            },
        ])
        .await;
    assert!(matches!(result, Err(BackendError::Request(_))));
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn test_transaction_reports_reason_per_operation() {
    let backend = MemoryBackend::new();
    backend.put_item(item("p", "b"), None).await.unwrap();

    let result = backend
        .transact_write(vec![
            Operation::Put {
                item: item("p", "a"),
                condition: Some(Condition::NotExists(RANGE_KEY.into())),
            },
            Operation::Check {
                key: Key::new("p", "b"),
                condition: Condition::NotExists(RANGE_KEY.into()),
            },
        ])
        .await;

    assert_eq!(
        result,
        Err(BackendError::TransactionCanceled {
            reasons: vec![None, Some(CONDITIONAL_CHECK_FAILED.to_string())]
        })
    );
    assert_eq!(backend.len().await, 1);
}

#[tokio::test]
async fn test_clear() {
    let backend = MemoryBackend::new();
    backend.put_item(item("p", "a"), None).await.unwrap();
    backend.clear().await;
    assert!(backend.is_empty().await);
}
