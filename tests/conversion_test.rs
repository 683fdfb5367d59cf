//! Quote-to-invoice conversion integration tests for backoffice-service.
//! The conversion is one transaction: number allocation, verbatim totals
//! copy, line item snapshot, and the quote's status flip commit together.

mod common;

use backoffice_service::error::AppError;
use backoffice_service::models::{
    CreateService, LineItemDraft, ListInvoicesFilter, QuoteStatus,
};
use chrono::Duration;
use common::{dec, described_item, seed_accepted_quote, seed_customer, seed_quote, TestDb};
use uuid::Uuid;

#[tokio::test]
#[ignore] // Requires PostgreSQL - run with TEST_DATABASE_URL set
async fn convert_accepted_quote_creates_pending_invoice() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "convert.basic@example.com").await;
    let quote_id = seed_accepted_quote(
        &app.db,
        customer_id,
        vec![
            described_item("Surface preparation", "2", "100.00"),
            described_item("Epoxy coating", "1", "250.00"),
        ],
    )
    .await;

    let quote = app
        .db
        .get_quote(quote_id)
        .await
        .expect("Lookup failed")
        .expect("Quote should exist");

    let invoice = app
        .db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .expect("Failed to convert quote");

    assert_eq!(invoice.invoice.invoice_number, "INV0001");
    assert_eq!(invoice.invoice.status, "pending");
    assert_eq!(invoice.invoice.quote_id, Some(quote_id));
    assert_eq!(invoice.quote_number.as_deref(), Some("Q0001"));
    assert_eq!(invoice.customer_name, "Jan Visser");

    // Totals are the quote's, copied field for field
    assert_eq!(invoice.invoice.subtotal, quote.quote.subtotal);
    assert_eq!(invoice.invoice.discount_amount, quote.quote.discount_amount);
    assert_eq!(invoice.invoice.tax_amount, quote.quote.tax_amount);
    assert_eq!(invoice.invoice.total_amount, quote.quote.total_amount);
    assert_eq!(invoice.invoice.total_amount, dec("544.50"));

    // Payment terms run from the quote's creation date
    let expected_due = quote.quote.created_utc.date_naive() + Duration::days(14);
    assert_eq!(invoice.invoice.due_date, Some(expected_due));

    // Lines copied in order with their stored totals
    assert_eq!(invoice.items.len(), 2);
    assert_eq!(invoice.items[0].service_name, "Surface preparation");
    assert_eq!(invoice.items[0].total_price, dec("200.00"));
    assert_eq!(invoice.items[1].service_name, "Epoxy coating");
    assert_eq!(invoice.items[1].total_price, dec("250.00"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn convert_flips_quote_to_converted_and_freezes_it() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "convert.freeze@example.com").await;
    let quote_id = seed_accepted_quote(
        &app.db,
        customer_id,
        vec![described_item("One-off job", "1", "300.00")],
    )
    .await;

    app.db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .expect("Failed to convert quote");

    let quote = app
        .db
        .get_quote(quote_id)
        .await
        .expect("Lookup failed")
        .expect("Quote should exist");
    assert_eq!(quote.quote.status, "converted");

    // No further edits, transitions, or deletion
    let err = app.db.delete_quote(quote_id).await.unwrap_err();
    assert!(
        matches!(err, AppError::InvalidState(_)),
        "expected InvalidState, got {:?}",
        err
    );
    let err = app
        .db
        .update_quote_status(quote_id, QuoteStatus::Sent)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn only_accepted_quotes_convert() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "convert.status@example.com").await;

    // draft
    let draft = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Too early", "1", "100.00")],
    )
    .await;
    let err = app
        .db
        .convert_quote_to_invoice(draft.quote.quote_id, 14)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::InvalidState(_)),
        "expected InvalidState, got {:?}",
        err
    );

    // sent
    let sent = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Still too early", "1", "100.00")],
    )
    .await;
    app.db
        .update_quote_status(sent.quote.quote_id, QuoteStatus::Sent)
        .await
        .expect("Failed to send");
    let err = app
        .db
        .convert_quote_to_invoice(sent.quote.quote_id, 14)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn convert_missing_quote_returns_not_found() {
    let app = TestDb::spawn().await;

    let err = app
        .db
        .convert_quote_to_invoice(Uuid::new_v4(), 14)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::NotFound(_)),
        "expected NotFound, got {:?}",
        err
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn second_conversion_is_refused() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "convert.twice@example.com").await;
    let quote_id = seed_accepted_quote(
        &app.db,
        customer_id,
        vec![described_item("Converted job", "1", "100.00")],
    )
    .await;

    app.db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .expect("Failed to convert quote");

    // The quote is now converted, so the status gate fires
    let err = app
        .db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::InvalidState(_)),
        "expected InvalidState, got {:?}",
        err
    );

    let invoices = app
        .db
        .list_invoices(&ListInvoicesFilter {
            page_size: 50,
            ..Default::default()
        })
        .await
        .expect("Failed to list invoices");
    assert_eq!(invoices.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn duplicate_check_catches_reset_quotes() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "convert.reset@example.com").await;
    let quote_id = seed_accepted_quote(
        &app.db,
        customer_id,
        vec![described_item("Tampered job", "1", "100.00")],
    )
    .await;

    app.db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .expect("Failed to convert quote");

    // Force the quote back to accepted behind the service's back; the
    // existing-invoice check must still refuse a second conversion.
    sqlx::query("UPDATE quotes SET status = 'accepted' WHERE quote_id = $1")
        .bind(quote_id)
        .execute(app.db.pool())
        .await
        .expect("Failed to reset status");

    let err = app
        .db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::Conflict(_)),
        "expected Conflict, got {:?}",
        err
    );

    let invoices = app
        .db
        .list_invoices(&ListInvoicesFilter {
            page_size: 50,
            ..Default::default()
        })
        .await
        .expect("Failed to list invoices");
    assert_eq!(invoices.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn convert_drops_unlabeled_items() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "convert.drop@example.com").await;

    // Second line has neither a catalog service nor a description, which
    // leaves the conversion nothing to label it with.
    let quote_id = seed_accepted_quote(
        &app.db,
        customer_id,
        vec![
            described_item("Epoxy base layer", "2", "100.00"),
            LineItemDraft {
                service_id: None,
                service_name: None,
                description: None,
                quantity: dec("1"),
                unit_price: dec("80.00"),
            },
        ],
    )
    .await;

    let invoice = app
        .db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .expect("Failed to convert quote");

    // The unlabeled line is gone from the invoice
    assert_eq!(invoice.items.len(), 1);
    assert_eq!(invoice.items[0].service_name, "Epoxy base layer");

    // Header totals are still the quote's, including the dropped line:
    // 280.00 subtotal and 21% tax, not the 200.00 the remaining line sums to.
    assert_eq!(invoice.invoice.subtotal, dec("280.00"));
    assert_eq!(invoice.invoice.tax_amount, dec("58.80"));
    assert_eq!(invoice.invoice.total_amount, dec("338.80"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn convert_prefers_catalog_name_for_labels() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "convert.catalog@example.com").await;

    let service = app
        .db
        .create_service(&CreateService {
            name: "Premium floor coating".to_string(),
            description: Some("Two-component epoxy".to_string()),
            base_price: dec("95.00"),
            active: true,
        })
        .await
        .expect("Failed to create service");

    let quote_id = seed_accepted_quote(
        &app.db,
        customer_id,
        vec![LineItemDraft {
            service_id: Some(service.service_id),
            service_name: None,
            description: Some("Ground floor, 40m2".to_string()),
            quantity: dec("1"),
            unit_price: dec("95.00"),
        }],
    )
    .await;

    let invoice = app
        .db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .expect("Failed to convert quote");

    assert_eq!(invoice.items.len(), 1);
    assert_eq!(invoice.items[0].service_name, "Premium floor coating");
    assert_eq!(
        invoice.items[0].description.as_deref(),
        Some("Ground floor, 40m2")
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn failed_conversion_leaves_no_partial_state() {
    let app = TestDb::spawn().await;
    let customer_id = seed_customer(&app.db, "convert.atomic@example.com").await;
    let detail = seed_quote(
        &app.db,
        customer_id,
        vec![described_item("Not ready yet", "1", "100.00")],
    )
    .await;
    let quote_id = detail.quote.quote_id;

    let err = app
        .db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let invoices = app
        .db
        .list_invoices(&ListInvoicesFilter {
            page_size: 50,
            ..Default::default()
        })
        .await
        .expect("Failed to list invoices");
    assert!(invoices.is_empty());

    let quote = app
        .db
        .get_quote(quote_id)
        .await
        .expect("Lookup failed")
        .expect("Quote should exist");
    assert_eq!(quote.quote.status, "draft");

    // Once accepted, the conversion goes through and takes the first
    // invoice number, so the failed attempt burned nothing.
    app.db
        .update_quote_status(quote_id, QuoteStatus::Sent)
        .await
        .expect("Failed to send");
    app.db
        .update_quote_status(quote_id, QuoteStatus::Accepted)
        .await
        .expect("Failed to accept");

    let invoice = app
        .db
        .convert_quote_to_invoice(quote_id, 14)
        .await
        .expect("Failed to convert quote");
    assert_eq!(invoice.invoice.invoice_number, "INV0001");

    app.cleanup().await;
}
