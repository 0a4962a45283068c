//! Integration tests for the libSQL customer store.

use mail_agent::crm::{CustomerPatch, CustomerStatus, CustomerStore, LibSqlStore};
use mail_agent::error::DatabaseError;

#[tokio::test]
async fn upsert_creates_row_with_defaults() {
    let store = LibSqlStore::new_memory().await.unwrap();

    store
        .upsert_partial("ana@example.com", CustomerPatch::default())
        .await
        .unwrap();

    let record = store
        .get_by_email("ana@example.com")
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(record.email, "ana@example.com");
    assert_eq!(record.status, CustomerStatus::InProgress);
    assert!(record.customer_name.is_none());
    assert!(record.order_id.is_none());
}

#[tokio::test]
async fn upsert_fills_missing_without_overwriting() {
    let store = LibSqlStore::new_memory().await.unwrap();

    store
        .upsert_partial(
            "ana@example.com",
            CustomerPatch {
                customer_name: Some("Ana".into()),
                product_issue: Some("broken screen".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Second upsert: name present again (different), order id new.
    store
        .upsert_partial(
            "ana@example.com",
            CustomerPatch {
                customer_name: Some("Someone Else".into()),
                order_id: Some("A-1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let record = store
        .get_by_email("ana@example.com")
        .await
        .unwrap()
        .unwrap();
    // Populated fields are kept; only the NULL ones are filled.
    assert_eq!(record.customer_name.as_deref(), Some("Ana"));
    assert_eq!(record.product_issue.as_deref(), Some("broken screen"));
    assert_eq!(record.order_id.as_deref(), Some("A-1"));
}

#[tokio::test]
async fn update_fields_overwrites_named_fields_only() {
    let store = LibSqlStore::new_memory().await.unwrap();

    store
        .upsert_partial(
            "bo@example.com",
            CustomerPatch {
                customer_name: Some("Bo".into()),
                product_issue: Some("late delivery".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    store
        .update_fields(
            "bo@example.com",
            CustomerPatch {
                status: Some(CustomerStatus::Solved),
                refund_requested: Some("no".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let record = store.get_by_email("bo@example.com").await.unwrap().unwrap();
    assert_eq!(record.status, CustomerStatus::Solved);
    assert_eq!(record.refund_requested.as_deref(), Some("no"));
    assert_eq!(record.customer_name.as_deref(), Some("Bo"));
    assert_eq!(record.product_issue.as_deref(), Some("late delivery"));
}

#[tokio::test]
async fn update_fields_unknown_email_is_not_found() {
    let store = LibSqlStore::new_memory().await.unwrap();

    let result = store
        .update_fields(
            "nobody@example.com",
            CustomerPatch {
                status: Some(CustomerStatus::Solved),
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(result, Err(DatabaseError::NotFound { email }) if email == "nobody@example.com"));
}

#[tokio::test]
async fn update_with_empty_patch_is_a_no_op() {
    let store = LibSqlStore::new_memory().await.unwrap();
    // No row exists, but an empty patch short-circuits before the query.
    store
        .update_fields("nobody@example.com", CustomerPatch::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn get_by_email_missing_is_none() {
    let store = LibSqlStore::new_memory().await.unwrap();
    assert!(store.get_by_email("x@y.com").await.unwrap().is_none());
}
