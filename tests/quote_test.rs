//! Quote integration tests for backoffice-service.
//! Covers number allocation, totals, lifecycle transitions, and stats.

mod common;

use backoffice_service::error::AppError;
use backoffice_service::models::{ListQuotesFilter, QuoteStatus, UpdateQuote};
use common::{dec, described_item, seed_accepted_quote, seed_customer, seed_quote, TestDb};
use uuid::Uuid;

#[tokio::test]
#[ignore] // Requires PostgreSQL - run with TEST_DATABASE_URL set
async fn create_quote_assigns_number_and_computed_totals() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.totals@example.com").await;

    let detail = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Floor coating", "5", "25.00")],
    )
    .await;

    assert_eq!(detail.quote.quote_number, "Q0001");
    assert_eq!(detail.quote.status, "draft");
    assert_eq!(detail.quote.subtotal, dec("125.00"));
    assert_eq!(detail.quote.discount_amount, dec("0.00"));
    assert_eq!(detail.quote.tax_amount, dec("26.25"));
    assert_eq!(detail.quote.total_amount, dec("151.25"));
    assert_eq!(detail.customer_name, "Jan Visser");
    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.items[0].total_price, dec("125.00"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn quote_numbers_increase_sequentially() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.sequence@example.com").await;

    let first = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Base layer", "1", "50.00")],
    )
    .await;
    let second = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Top layer", "1", "75.00")],
    )
    .await;

    assert_eq!(first.quote.quote_number, "Q0001");
    assert_eq!(second.quote.quote_number, "Q0002");

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn numbering_resumes_after_existing_documents() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.resume@example.com").await;

    // Pre-existing document inserted outside the allocator, as after an
    // import from the previous system.
    sqlx::query(
        r#"
        INSERT INTO quotes (quote_id, quote_number, customer_id, status, subtotal,
            discount_pct, discount_amount, tax_pct, tax_amount, total_amount)
        VALUES ($1, 'Q0041', $2, 'draft', 100, 0, 0, 21, 21, 121)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(customer_id)
    .execute(app.db.pool())
    .await
    .expect("Failed to insert quote directly");

    let detail = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Follow-up job", "1", "10.00")],
    )
    .await;

    assert_eq!(detail.quote.quote_number, "Q0042");

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn quote_numbers_are_never_reused_after_delete() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.noreuse@example.com").await;

    let first = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Scrapped job", "1", "10.00")],
    )
    .await;
    assert_eq!(first.quote.quote_number, "Q0001");

    let deleted = app
        .db
        .delete_quote(first.quote.quote_id)
        .await
        .expect("Failed to delete quote");
    assert!(deleted);

    let second = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Replacement job", "1", "10.00")],
    )
    .await;

    // The counter keeps climbing; Q0001 stays retired.
    assert_eq!(second.quote.quote_number, "Q0002");

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn update_quote_replaces_items_and_recomputes_totals() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.update@example.com").await;

    let detail = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Initial estimate", "1", "500.00")],
    )
    .await;

    let update = UpdateQuote {
        description: None,
        notes: Some("Reworked after site visit".to_string()),
        discount_pct: Some(dec("10")),
        tax_pct: None,
        valid_until: None,
        items: vec![
            described_item("Surface preparation", "3", "40.00"),
            described_item("Coating", "1", "30.00"),
        ],
    };

    let updated = app
        .db
        .update_quote(detail.quote.quote_id, &update)
        .await
        .expect("Failed to update quote")
        .expect("Quote should exist");

    // 150.00 subtotal, 10% discount, 21% tax on the remaining 135.00
    assert_eq!(updated.quote.subtotal, dec("150.00"));
    assert_eq!(updated.quote.discount_amount, dec("15.00"));
    assert_eq!(updated.quote.tax_amount, dec("28.35"));
    assert_eq!(updated.quote.total_amount, dec("163.35"));
    assert_eq!(updated.items.len(), 2);
    // Unset header fields keep their values
    assert_eq!(
        updated.quote.description.as_deref(),
        Some("Garage floor coating")
    );
    assert_eq!(
        updated.quote.notes.as_deref(),
        Some("Reworked after site visit")
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn accepted_quote_cannot_be_edited() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.frozen@example.com").await;
    let quote_id = seed_accepted_quote(
        &app.db,
        customer_id,
        vec![described_item("Fixed scope", "1", "200.00")],
    )
    .await;

    let update = UpdateQuote {
        description: Some("Should not land".to_string()),
        notes: None,
        discount_pct: None,
        tax_pct: None,
        valid_until: None,
        items: vec![described_item("Cheaper scope", "1", "1.00")],
    };

    let err = app
        .db
        .update_quote(quote_id, &update)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::InvalidState(_)),
        "expected InvalidState, got {:?}",
        err
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn lifecycle_walks_draft_sent_accepted() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.lifecycle@example.com").await;
    let detail = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Walkthrough", "1", "100.00")],
    )
    .await;
    let quote_id = detail.quote.quote_id;

    let sent = app
        .db
        .update_quote_status(quote_id, QuoteStatus::Sent)
        .await
        .expect("Failed to send")
        .expect("Quote should exist");
    assert_eq!(sent.status, "sent");

    let accepted = app
        .db
        .update_quote_status(quote_id, QuoteStatus::Accepted)
        .await
        .expect("Failed to accept")
        .expect("Quote should exist");
    assert_eq!(accepted.status, "accepted");

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn skipping_lifecycle_steps_is_rejected() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.skip@example.com").await;
    let detail = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Eager job", "1", "100.00")],
    )
    .await;

    // draft -> accepted skips sent
    let err = app
        .db
        .update_quote_status(detail.quote.quote_id, QuoteStatus::Accepted)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::InvalidState(_)),
        "expected InvalidState, got {:?}",
        err
    );

    // draft -> rejected is not a defined edge either
    let err = app
        .db
        .update_quote_status(detail.quote.quote_id, QuoteStatus::Rejected)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn converted_is_not_reachable_by_status_update() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.noconvert@example.com").await;
    let quote_id = seed_accepted_quote(
        &app.db,
        customer_id,
        vec![described_item("Conversion bait", "1", "100.00")],
    )
    .await;

    let err = app
        .db
        .update_quote_status(quote_id, QuoteStatus::Converted)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::InvalidState(_)),
        "expected InvalidState, got {:?}",
        err
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn get_missing_quote_returns_none() {
    let app = TestDb::spawn().await;

    let result = app
        .db
        .get_quote(Uuid::new_v4())
        .await
        .expect("Lookup should not error");
    assert!(result.is_none());

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn list_quotes_filters_by_status() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.list@example.com").await;

    let draft = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Still drafting", "1", "10.00")],
    )
    .await;
    let sent = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Out the door", "1", "20.00")],
    )
    .await;
    app.db
        .update_quote_status(sent.quote.quote_id, QuoteStatus::Sent)
        .await
        .expect("Failed to send");

    let quotes = app
        .db
        .list_quotes(&ListQuotesFilter {
            status: Some(QuoteStatus::Sent),
            page_size: 50,
            ..Default::default()
        })
        .await
        .expect("Failed to list quotes");

    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].quote_id, sent.quote.quote_id);
    assert_ne!(quotes[0].quote_id, draft.quote.quote_id);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn quote_stats_counts_statuses_and_values() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "quote.stats@example.com").await;

    // 151.25 draft
    seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Draft work", "5", "25.00")],
    )
    .await;
    // 60.50 accepted
    seed_accepted_quote(
        &app.db,
        customer_id,
        vec![described_item("Accepted work", "2", "25.00")],
    )
    .await;

    let stats = app.db.quote_stats().await.expect("Failed to get stats");

    assert_eq!(stats.total_quotes, 2);
    assert_eq!(stats.draft_count, 1);
    assert_eq!(stats.accepted_count, 1);
    assert_eq!(stats.sent_count, 0);
    assert_eq!(stats.total_value, dec("211.75"));
    assert_eq!(stats.accepted_value, dec("60.50"));
    assert_eq!(stats.average_value, dec("105.88"));

    app.cleanup().await;
}
