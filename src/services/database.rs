//! Database service for backoffice-service.

use crate::error::AppError;
use crate::models::{
    Certificate, CertificateDetail, CreateCertificate, CreateCustomer, CreateInvoice, CreateQuote,
    CreateService, Customer, Invoice, InvoiceDetail, InvoiceItem, InvoiceStats, InvoiceStatus,
    LineItemDraft, ListCertificatesFilter, ListCustomersFilter, ListInvoicesFilter,
    ListQuotesFilter, ListServicesFilter, Quote, QuoteDetail, QuoteItem, QuoteStats, QuoteStatus,
    Service, UpdateCertificate, UpdateCustomer, UpdateInvoice, UpdateQuote,
};
use crate::services::metrics::{DB_QUERY_DURATION, DOCUMENTS_CREATED, QUOTE_CONVERSIONS};
use crate::services::pricing;
use crate::services::sequence::{self, DocumentKind};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "backoffice-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Customer Operations
    // -------------------------------------------------------------------------

    /// Create a new customer.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_customer(&self, input: &CreateCustomer) -> Result<Customer, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_customer"])
            .start_timer();

        if input.first_name.trim().is_empty() || input.last_name.trim().is_empty() {
            return Err(AppError::Validation(anyhow::anyhow!(
                "First name and last name are required"
            )));
        }
        if input.email.trim().is_empty() || !input.email.contains('@') {
            return Err(AppError::Validation(anyhow::anyhow!(
                "A valid email address is required"
            )));
        }

        let customer_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (customer_id, first_name, last_name, email, phone, address, postal_code, city, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING customer_id, first_name, last_name, email, phone, address, postal_code, city, notes,
                created_utc, updated_utc
            "#,
        )
        .bind(customer_id)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.address)
        .bind(&input.postal_code)
        .bind(&input.city)
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await;

        let customer = match result {
            Ok(customer) => customer,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "A customer with email {} already exists",
                    input.email
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to create customer: {}",
                    e
                )));
            }
        };

        timer.observe_duration();

        info!(customer_id = %customer.customer_id, "Customer created");

        Ok(customer)
    }

    /// Get a customer by ID.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, first_name, last_name, email, phone, address, postal_code, city, notes,
                created_utc, updated_utc
            FROM customers
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    /// List customers, optionally matching a search term.
    #[instrument(skip(self, filter))]
    pub async fn list_customers(
        &self,
        filter: &ListCustomersFilter,
    ) -> Result<Vec<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_customers"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let customers = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Customer>(
                r#"
                SELECT customer_id, first_name, last_name, email, phone, address, postal_code, city, notes,
                    created_utc, updated_utc
                FROM customers
                WHERE ($1::varchar IS NULL
                       OR first_name ILIKE '%' || $1 || '%'
                       OR last_name ILIKE '%' || $1 || '%'
                       OR email ILIKE '%' || $1 || '%')
                  AND customer_id > $2
                ORDER BY customer_id
                LIMIT $3
                "#,
            )
            .bind(&filter.search)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Customer>(
                r#"
                SELECT customer_id, first_name, last_name, email, phone, address, postal_code, city, notes,
                    created_utc, updated_utc
                FROM customers
                WHERE ($1::varchar IS NULL
                       OR first_name ILIKE '%' || $1 || '%'
                       OR last_name ILIKE '%' || $1 || '%'
                       OR email ILIKE '%' || $1 || '%')
                ORDER BY customer_id
                LIMIT $2
                "#,
            )
            .bind(&filter.search)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list customers: {}", e)))?;

        timer.observe_duration();

        Ok(customers)
    }

    /// Update a customer. `None` fields keep their current value.
    #[instrument(skip(self, input), fields(customer_id = %customer_id))]
    pub async fn update_customer(
        &self,
        customer_id: Uuid,
        input: &UpdateCustomer,
    ) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_customer"])
            .start_timer();

        let result = sqlx::query_as::<_, Customer>(
            r#"
            UPDATE customers
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                email = COALESCE($4, email),
                phone = COALESCE($5, phone),
                address = COALESCE($6, address),
                postal_code = COALESCE($7, postal_code),
                city = COALESCE($8, city),
                notes = COALESCE($9, notes),
                updated_utc = NOW()
            WHERE customer_id = $1
            RETURNING customer_id, first_name, last_name, email, phone, address, postal_code, city, notes,
                created_utc, updated_utc
            "#,
        )
        .bind(customer_id)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.address)
        .bind(&input.postal_code)
        .bind(&input.city)
        .bind(&input.notes)
        .fetch_optional(&self.pool)
        .await;

        let customer = match result {
            Ok(customer) => customer,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Another customer already uses that email"
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to update customer: {}",
                    e
                )));
            }
        };

        timer.observe_duration();

        Ok(customer)
    }

    /// Delete a customer. Refused while quotes, invoices, or certificates
    /// still reference it.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn delete_customer(&self, customer_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_customer"])
            .start_timer();

        let result = sqlx::query("DELETE FROM customers WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&self.pool)
            .await;

        let deleted = match result {
            Ok(done) => done.rows_affected() > 0,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Customer still has documents and cannot be deleted"
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to delete customer: {}",
                    e
                )));
            }
        };

        timer.observe_duration();

        if deleted {
            info!(customer_id = %customer_id, "Customer deleted");
        }

        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Service Catalog Operations
    // -------------------------------------------------------------------------

    /// Create a catalog service.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_service(&self, input: &CreateService) -> Result<Service, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_service"])
            .start_timer();

        if input.name.trim().is_empty() || input.name.len() > 200 {
            return Err(AppError::Validation(anyhow::anyhow!(
                "Service name is required and may be at most 200 characters"
            )));
        }
        if input.base_price < Decimal::ZERO {
            return Err(AppError::Validation(anyhow::anyhow!(
                "Base price cannot be negative"
            )));
        }

        let service_id = Uuid::new_v4();
        let service = sqlx::query_as::<_, Service>(
            r#"
            INSERT INTO services (service_id, name, description, base_price, active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING service_id, name, description, base_price, active, created_utc
            "#,
        )
        .bind(service_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.base_price)
        .bind(input.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create service: {}", e)))?;

        timer.observe_duration();

        info!(service_id = %service.service_id, "Catalog service created");

        Ok(service)
    }

    /// Get a catalog service by ID.
    #[instrument(skip(self), fields(service_id = %service_id))]
    pub async fn get_service(&self, service_id: Uuid) -> Result<Option<Service>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_service"])
            .start_timer();

        let service = sqlx::query_as::<_, Service>(
            r#"
            SELECT service_id, name, description, base_price, active, created_utc
            FROM services
            WHERE service_id = $1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get service: {}", e)))?;

        timer.observe_duration();

        Ok(service)
    }

    /// List catalog services.
    #[instrument(skip(self, filter))]
    pub async fn list_services(
        &self,
        filter: &ListServicesFilter,
    ) -> Result<Vec<Service>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_services"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let services = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Service>(
                r#"
                SELECT service_id, name, description, base_price, active, created_utc
                FROM services
                WHERE (NOT $1 OR active)
                  AND service_id > $2
                ORDER BY service_id
                LIMIT $3
                "#,
            )
            .bind(filter.active_only)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Service>(
                r#"
                SELECT service_id, name, description, base_price, active, created_utc
                FROM services
                WHERE (NOT $1 OR active)
                ORDER BY service_id
                LIMIT $2
                "#,
            )
            .bind(filter.active_only)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list services: {}", e)))?;

        timer.observe_duration();

        Ok(services)
    }

    // -------------------------------------------------------------------------
    // Quote Operations
    // -------------------------------------------------------------------------

    /// Create a new draft quote with its line items.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_quote(&self, input: &CreateQuote) -> Result<QuoteDetail, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_quote"])
            .start_timer();

        let amounts = pricing::compute_amounts(&input.items, input.discount_pct, input.tax_pct)?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let quote_number = sequence::allocate_number(&mut tx, DocumentKind::Quote).await?;
        let quote_id = Uuid::new_v4();

        let result = sqlx::query_as::<_, Quote>(
            r#"
            INSERT INTO quotes (
                quote_id, quote_number, customer_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount, valid_until
            )
            VALUES ($1, $2, $3, 'draft', $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING quote_id, quote_number, customer_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                valid_until, created_utc, updated_utc
            "#,
        )
        .bind(quote_id)
        .bind(&quote_number)
        .bind(input.customer_id)
        .bind(&input.description)
        .bind(&input.notes)
        .bind(amounts.subtotal)
        .bind(input.discount_pct)
        .bind(amounts.discount_amount)
        .bind(input.tax_pct)
        .bind(amounts.tax_amount)
        .bind(amounts.total_amount)
        .bind(input.valid_until)
        .fetch_one(&mut *tx)
        .await;

        let quote = match result {
            Ok(quote) => quote,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Quote number {} is already in use",
                    quote_number
                )));
            }
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                tx.rollback().await.ok();
                return Err(AppError::Validation(anyhow::anyhow!("Unknown customer")));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to create quote: {}",
                    e
                )));
            }
        };

        let items = insert_quote_items(&mut tx, quote_id, &input.items).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        DOCUMENTS_CREATED.with_label_values(&["quote"]).inc();
        timer.observe_duration();

        info!(
            quote_id = %quote.quote_id,
            quote_number = %quote.quote_number,
            total_amount = %quote.total_amount,
            "Quote created"
        );

        self.assemble_quote_detail(quote, items).await
    }

    /// Get a quote with its line items and customer identity.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn get_quote(&self, quote_id: Uuid) -> Result<Option<QuoteDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote"])
            .start_timer();

        let Some(quote) = self.get_quote_row(quote_id).await? else {
            timer.observe_duration();
            return Ok(None);
        };
        let items = self.get_quote_items(quote_id).await?;

        timer.observe_duration();

        Ok(Some(self.assemble_quote_detail(quote, items).await?))
    }

    /// Get the line items of a quote.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn get_quote_items(&self, quote_id: Uuid) -> Result<Vec<QuoteItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote_items"])
            .start_timer();

        let items = sqlx::query_as::<_, QuoteItem>(
            r#"
            SELECT quote_item_id, quote_id, service_id, description, quantity, unit_price,
                total_price, sort_order, created_utc
            FROM quote_items
            WHERE quote_id = $1
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(quote_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quote items: {}", e)))?;

        timer.observe_duration();

        Ok(items)
    }

    /// List quotes.
    #[instrument(skip(self, filter))]
    pub async fn list_quotes(&self, filter: &ListQuotesFilter) -> Result<Vec<Quote>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_quotes"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let quotes = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Quote>(
                r#"
                SELECT quote_id, quote_number, customer_id, status, description, notes,
                    subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                    valid_until, created_utc, updated_utc
                FROM quotes
                WHERE ($1::varchar IS NULL OR status = $1)
                  AND ($2::uuid IS NULL OR customer_id = $2)
                  AND quote_id > $3
                ORDER BY quote_id
                LIMIT $4
                "#,
            )
            .bind(&status_str)
            .bind(filter.customer_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Quote>(
                r#"
                SELECT quote_id, quote_number, customer_id, status, description, notes,
                    subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                    valid_until, created_utc, updated_utc
                FROM quotes
                WHERE ($1::varchar IS NULL OR status = $1)
                  AND ($2::uuid IS NULL OR customer_id = $2)
                ORDER BY quote_id
                LIMIT $3
                "#,
            )
            .bind(&status_str)
            .bind(filter.customer_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list quotes: {}", e)))?;

        timer.observe_duration();

        Ok(quotes)
    }

    /// Update a draft or sent quote, replacing its full line item set and
    /// recomputing totals.
    #[instrument(skip(self, input), fields(quote_id = %quote_id))]
    pub async fn update_quote(
        &self,
        quote_id: Uuid,
        input: &UpdateQuote,
    ) -> Result<Option<QuoteDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_quote"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = sqlx::query_as::<_, Quote>(
            r#"
            SELECT quote_id, quote_number, customer_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                valid_until, created_utc, updated_utc
            FROM quotes
            WHERE quote_id = $1
            "#,
        )
        .bind(quote_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quote: {}", e)))?;

        let Some(existing) = existing else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        };

        let status = QuoteStatus::from_string(&existing.status);
        if !status.is_editable() {
            tx.rollback().await.ok();
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Quote {} is {}; only draft or sent quotes can be edited",
                existing.quote_number,
                existing.status
            )));
        }

        let discount_pct = input.discount_pct.unwrap_or(existing.discount_pct);
        let tax_pct = input.tax_pct.unwrap_or(existing.tax_pct);
        let amounts = match pricing::compute_amounts(&input.items, discount_pct, tax_pct) {
            Ok(amounts) => amounts,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };

        let quote = sqlx::query_as::<_, Quote>(
            r#"
            UPDATE quotes
            SET description = COALESCE($2, description),
                notes = COALESCE($3, notes),
                subtotal = $4,
                discount_pct = $5,
                discount_amount = $6,
                tax_pct = $7,
                tax_amount = $8,
                total_amount = $9,
                valid_until = COALESCE($10, valid_until),
                updated_utc = NOW()
            WHERE quote_id = $1
            RETURNING quote_id, quote_number, customer_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                valid_until, created_utc, updated_utc
            "#,
        )
        .bind(quote_id)
        .bind(&input.description)
        .bind(&input.notes)
        .bind(amounts.subtotal)
        .bind(discount_pct)
        .bind(amounts.discount_amount)
        .bind(tax_pct)
        .bind(amounts.tax_amount)
        .bind(amounts.total_amount)
        .bind(input.valid_until)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update quote: {}", e)))?;

        sqlx::query("DELETE FROM quote_items WHERE quote_id = $1")
            .bind(quote_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear quote items: {}", e))
            })?;

        let items = insert_quote_items(&mut tx, quote_id, &input.items).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(quote_id = %quote.quote_id, "Quote updated");

        Ok(Some(self.assemble_quote_detail(quote, items).await?))
    }

    /// Apply a lifecycle transition to a quote.
    ///
    /// `Converted` is refused here; only the converter sets it.
    #[instrument(skip(self), fields(quote_id = %quote_id, new_status = new_status.as_str()))]
    pub async fn update_quote_status(
        &self,
        quote_id: Uuid,
        new_status: QuoteStatus,
    ) -> Result<Option<Quote>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_quote_status"])
            .start_timer();

        if new_status == QuoteStatus::Converted {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Quotes become converted through conversion, not a status update"
            )));
        }

        let Some(existing) = self.get_quote_row(quote_id).await? else {
            timer.observe_duration();
            return Ok(None);
        };

        let current = QuoteStatus::from_string(&existing.status);
        if !current.can_transition_to(new_status) {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Quote {} cannot move from {} to {}",
                existing.quote_number,
                existing.status,
                new_status.as_str()
            )));
        }

        // The old status in the WHERE clause guards against a concurrent
        // transition between our read and this write.
        let quote = sqlx::query_as::<_, Quote>(
            r#"
            UPDATE quotes
            SET status = $2, updated_utc = NOW()
            WHERE quote_id = $1 AND status = $3
            RETURNING quote_id, quote_number, customer_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                valid_until, created_utc, updated_utc
            "#,
        )
        .bind(quote_id)
        .bind(new_status.as_str())
        .bind(&existing.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update quote status: {}", e))
        })?;

        let Some(quote) = quote else {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Quote {} changed concurrently",
                existing.quote_number
            )));
        };

        timer.observe_duration();

        info!(
            quote_id = %quote.quote_id,
            status = %quote.status,
            "Quote status updated"
        );

        Ok(Some(quote))
    }

    /// Delete a quote and its line items. Converted quotes are kept for the
    /// invoice's paper trail.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn delete_quote(&self, quote_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_quote"])
            .start_timer();

        let Some(existing) = self.get_quote_row(quote_id).await? else {
            timer.observe_duration();
            return Ok(false);
        };

        if QuoteStatus::from_string(&existing.status) == QuoteStatus::Converted {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Quote {} was converted and cannot be deleted",
                existing.quote_number
            )));
        }

        let done = sqlx::query("DELETE FROM quotes WHERE quote_id = $1 AND status != 'converted'")
            .bind(quote_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete quote: {}", e))
            })?;

        timer.observe_duration();

        let deleted = done.rows_affected() > 0;
        if deleted {
            info!(quote_id = %quote_id, quote_number = %existing.quote_number, "Quote deleted");
        }

        Ok(deleted)
    }

    /// Aggregate quote counts and values.
    #[instrument(skip(self))]
    pub async fn quote_stats(&self) -> Result<QuoteStats, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["quote_stats"])
            .start_timer();

        let stats = sqlx::query_as::<_, QuoteStats>(
            r#"
            SELECT
                COUNT(*) AS total_quotes,
                COUNT(*) FILTER (WHERE status = 'draft') AS draft_count,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent_count,
                COUNT(*) FILTER (WHERE status = 'accepted') AS accepted_count,
                COUNT(*) FILTER (WHERE status = 'rejected') AS rejected_count,
                COUNT(*) FILTER (WHERE status = 'expired') AS expired_count,
                COUNT(*) FILTER (WHERE status = 'converted') AS converted_count,
                COALESCE(SUM(total_amount), 0) AS total_value,
                COALESCE(SUM(total_amount) FILTER (WHERE status IN ('accepted', 'converted')), 0) AS accepted_value,
                ROUND(COALESCE(AVG(total_amount), 0), 2) AS average_value
            FROM quotes
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quote stats: {}", e)))?;

        timer.observe_duration();

        Ok(stats)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create a standalone invoice with its line items.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<InvoiceDetail, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        validate_invoice_item_names(&input.items)?;
        let amounts = pricing::compute_amounts(&input.items, input.discount_pct, input.tax_pct)?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice_number = sequence::allocate_number(&mut tx, DocumentKind::Invoice).await?;
        let invoice_id = Uuid::new_v4();

        let result = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                invoice_id, invoice_number, customer_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount, due_date
            )
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                due_date, paid_date, payment_method, created_utc, updated_utc
            "#,
        )
        .bind(invoice_id)
        .bind(&invoice_number)
        .bind(input.customer_id)
        .bind(&input.description)
        .bind(&input.notes)
        .bind(amounts.subtotal)
        .bind(input.discount_pct)
        .bind(amounts.discount_amount)
        .bind(input.tax_pct)
        .bind(amounts.tax_amount)
        .bind(amounts.total_amount)
        .bind(input.due_date)
        .fetch_one(&mut *tx)
        .await;

        let invoice = match result {
            Ok(invoice) => invoice,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice number {} is already in use",
                    invoice_number
                )));
            }
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                tx.rollback().await.ok();
                return Err(AppError::Validation(anyhow::anyhow!("Unknown customer")));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to create invoice: {}",
                    e
                )));
            }
        };

        let items = insert_invoice_items(&mut tx, invoice_id, &input.items).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        DOCUMENTS_CREATED.with_label_values(&["invoice"]).inc();
        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total_amount = %invoice.total_amount,
            "Invoice created"
        );

        self.assemble_invoice_detail(invoice, items).await
    }

    /// Get an invoice with its line items, customer identity, and source
    /// quote number.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<InvoiceDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let Some(invoice) = self.get_invoice_row(invoice_id).await? else {
            timer.observe_duration();
            return Ok(None);
        };
        let items = self.get_invoice_items(invoice_id).await?;

        timer.observe_duration();

        Ok(Some(self.assemble_invoice_detail(invoice, items).await?))
    }

    /// Get the line items of an invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_items"])
            .start_timer();

        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT invoice_item_id, invoice_id, service_name, description, quantity, unit_price,
                total_price, sort_order, created_utc
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY sort_order, created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice items: {}", e))
        })?;

        timer.observe_duration();

        Ok(items)
    }

    /// List invoices.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                    subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                    due_date, paid_date, payment_method, created_utc, updated_utc
                FROM invoices
                WHERE ($1::varchar IS NULL OR status = $1)
                  AND ($2::uuid IS NULL OR customer_id = $2)
                  AND (NOT $3 OR (status = 'pending' AND due_date < CURRENT_DATE))
                  AND invoice_id > $4
                ORDER BY invoice_id
                LIMIT $5
                "#,
            )
            .bind(&status_str)
            .bind(filter.customer_id)
            .bind(filter.overdue_only)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Invoice>(
                r#"
                SELECT invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                    subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                    due_date, paid_date, payment_method, created_utc, updated_utc
                FROM invoices
                WHERE ($1::varchar IS NULL OR status = $1)
                  AND ($2::uuid IS NULL OR customer_id = $2)
                  AND (NOT $3 OR (status = 'pending' AND due_date < CURRENT_DATE))
                ORDER BY invoice_id
                LIMIT $4
                "#,
            )
            .bind(&status_str)
            .bind(filter.customer_id)
            .bind(filter.overdue_only)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Update a pending invoice, replacing its full line item set and
    /// recomputing totals.
    #[instrument(skip(self, input), fields(invoice_id = %invoice_id))]
    pub async fn update_invoice(
        &self,
        invoice_id: Uuid,
        input: &UpdateInvoice,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        validate_invoice_item_names(&input.items)?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                due_date, paid_date, payment_method, created_utc, updated_utc
            FROM invoices
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        let Some(existing) = existing else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        };

        if InvoiceStatus::from_string(&existing.status) != InvoiceStatus::Pending {
            tx.rollback().await.ok();
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Invoice {} is {}; only pending invoices can be edited",
                existing.invoice_number,
                existing.status
            )));
        }

        let discount_pct = input.discount_pct.unwrap_or(existing.discount_pct);
        let tax_pct = input.tax_pct.unwrap_or(existing.tax_pct);
        let amounts = match pricing::compute_amounts(&input.items, discount_pct, tax_pct) {
            Ok(amounts) => amounts,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET description = COALESCE($2, description),
                notes = COALESCE($3, notes),
                subtotal = $4,
                discount_pct = $5,
                discount_amount = $6,
                tax_pct = $7,
                tax_amount = $8,
                total_amount = $9,
                due_date = COALESCE($10, due_date),
                updated_utc = NOW()
            WHERE invoice_id = $1
            RETURNING invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                due_date, paid_date, payment_method, created_utc, updated_utc
            "#,
        )
        .bind(invoice_id)
        .bind(&input.description)
        .bind(&input.notes)
        .bind(amounts.subtotal)
        .bind(discount_pct)
        .bind(amounts.discount_amount)
        .bind(tax_pct)
        .bind(amounts.tax_amount)
        .bind(amounts.total_amount)
        .bind(input.due_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear invoice items: {}", e))
            })?;

        let items = insert_invoice_items(&mut tx, invoice_id, &input.items).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, "Invoice updated");

        Ok(Some(self.assemble_invoice_detail(invoice, items).await?))
    }

    /// Mark a pending invoice as paid.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        paid_date: Option<NaiveDate>,
        payment_method: Option<&str>,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_paid"])
            .start_timer();

        let Some(existing) = self.get_invoice_row(invoice_id).await? else {
            timer.observe_duration();
            return Ok(None);
        };

        match InvoiceStatus::from_string(&existing.status) {
            InvoiceStatus::Pending => {}
            InvoiceStatus::Paid => {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "Invoice {} is already paid",
                    existing.invoice_number
                )));
            }
            InvoiceStatus::Cancelled => {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "Invoice {} is cancelled and cannot be marked paid",
                    existing.invoice_number
                )));
            }
        }

        let paid_date = paid_date.unwrap_or_else(|| Utc::now().date_naive());
        let payment_method = payment_method.unwrap_or("bank_transfer");

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'paid', paid_date = $2, payment_method = $3, updated_utc = NOW()
            WHERE invoice_id = $1 AND status = 'pending'
            RETURNING invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                due_date, paid_date, payment_method, created_utc, updated_utc
            "#,
        )
        .bind(invoice_id)
        .bind(paid_date)
        .bind(payment_method)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice paid: {}", e))
        })?;

        let Some(invoice) = invoice else {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} changed concurrently",
                existing.invoice_number
            )));
        };

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            payment_method = payment_method,
            "Invoice marked paid"
        );

        Ok(Some(invoice))
    }

    /// Cancel a pending invoice.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn cancel_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_invoice"])
            .start_timer();

        let Some(existing) = self.get_invoice_row(invoice_id).await? else {
            timer.observe_duration();
            return Ok(None);
        };

        match InvoiceStatus::from_string(&existing.status) {
            InvoiceStatus::Pending => {}
            InvoiceStatus::Paid => {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "Invoice {} is paid and cannot be cancelled",
                    existing.invoice_number
                )));
            }
            InvoiceStatus::Cancelled => {
                return Err(AppError::InvalidState(anyhow::anyhow!(
                    "Invoice {} is already cancelled",
                    existing.invoice_number
                )));
            }
        }

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'cancelled', updated_utc = NOW()
            WHERE invoice_id = $1 AND status = 'pending'
            RETURNING invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                due_date, paid_date, payment_method, created_utc, updated_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel invoice: {}", e)))?;

        let Some(invoice) = invoice else {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} changed concurrently",
                existing.invoice_number
            )));
        };

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Invoice cancelled"
        );

        Ok(Some(invoice))
    }

    /// Delete an invoice and its line items. Paid invoices are immutable
    /// bookkeeping records and cannot be deleted.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let Some(existing) = self.get_invoice_row(invoice_id).await? else {
            timer.observe_duration();
            return Ok(false);
        };

        if InvoiceStatus::from_string(&existing.status) == InvoiceStatus::Paid {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Invoice {} is paid and cannot be deleted",
                existing.invoice_number
            )));
        }

        let done = sqlx::query("DELETE FROM invoices WHERE invoice_id = $1 AND status != 'paid'")
            .bind(invoice_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e))
            })?;

        timer.observe_duration();

        let deleted = done.rows_affected() > 0;
        if deleted {
            info!(
                invoice_id = %invoice_id,
                invoice_number = %existing.invoice_number,
                "Invoice deleted"
            );
        }

        Ok(deleted)
    }

    /// List pending invoices past their due date, oldest due first.
    #[instrument(skip(self))]
    pub async fn list_overdue_invoices(&self) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_overdue_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                due_date, paid_date, payment_method, created_utc, updated_utc
            FROM invoices
            WHERE status = 'pending' AND due_date < CURRENT_DATE
            ORDER BY due_date, invoice_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list overdue invoices: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Aggregate invoice counts and values. Cancelled invoices are excluded
    /// from the monetary figures.
    #[instrument(skip(self))]
    pub async fn invoice_stats(&self) -> Result<InvoiceStats, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoice_stats"])
            .start_timer();

        let stats = sqlx::query_as::<_, InvoiceStats>(
            r#"
            SELECT
                COUNT(*) AS total_invoices,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending_count,
                COUNT(*) FILTER (WHERE status = 'paid') AS paid_count,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled_count,
                COUNT(*) FILTER (WHERE status = 'pending' AND due_date < CURRENT_DATE) AS overdue_count,
                COALESCE(SUM(total_amount) FILTER (WHERE status != 'cancelled'), 0) AS total_value,
                COALESCE(SUM(total_amount) FILTER (WHERE status = 'paid'), 0) AS paid_value,
                COALESCE(SUM(total_amount) FILTER (WHERE status = 'pending'), 0) AS outstanding_value,
                COALESCE(SUM(total_amount) FILTER (WHERE status = 'pending' AND due_date < CURRENT_DATE), 0) AS overdue_value,
                ROUND(COALESCE(AVG(total_amount) FILTER (WHERE status != 'cancelled'), 0), 2) AS average_value
            FROM invoices
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice stats: {}", e))
        })?;

        timer.observe_duration();

        Ok(stats)
    }

    // -------------------------------------------------------------------------
    // Quote Conversion
    // -------------------------------------------------------------------------

    /// Convert an accepted quote into a pending invoice.
    ///
    /// Runs as one transaction: duplicate check, number allocation, invoice
    /// insert, line item snapshot, and the quote's flip to converted either
    /// all commit or none do. Financial totals are copied from the quote
    /// header verbatim, not recomputed. The due date is the quote's creation
    /// date plus `payment_term_days`.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub async fn convert_quote_to_invoice(
        &self,
        quote_id: Uuid,
        payment_term_days: u32,
    ) -> Result<InvoiceDetail, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["convert_quote_to_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let quote = sqlx::query_as::<_, Quote>(
            r#"
            SELECT quote_id, quote_number, customer_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                valid_until, created_utc, updated_utc
            FROM quotes
            WHERE quote_id = $1
            "#,
        )
        .bind(quote_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quote: {}", e)))?;

        let Some(quote) = quote else {
            tx.rollback().await.ok();
            QUOTE_CONVERSIONS.with_label_values(&["refused"]).inc();
            return Err(AppError::NotFound(anyhow::anyhow!("Quote not found")));
        };

        if QuoteStatus::from_string(&quote.status) != QuoteStatus::Accepted {
            tx.rollback().await.ok();
            QUOTE_CONVERSIONS.with_label_values(&["refused"]).inc();
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Quote {} is {}; only accepted quotes can be converted",
                quote.quote_number,
                quote.status
            )));
        }

        let existing: Option<Uuid> =
            sqlx::query_scalar("SELECT invoice_id FROM invoices WHERE quote_id = $1")
                .bind(quote_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to check for existing invoice: {}",
                        e
                    ))
                })?;

        if existing.is_some() {
            tx.rollback().await.ok();
            QUOTE_CONVERSIONS.with_label_values(&["refused"]).inc();
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Quote {} was already converted to an invoice",
                quote.quote_number
            )));
        }

        let invoice_number = sequence::allocate_number(&mut tx, DocumentKind::Invoice).await?;
        let due_date =
            quote.created_utc.date_naive() + chrono::Duration::days(payment_term_days as i64);
        let invoice_id = Uuid::new_v4();

        let result = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount, due_date
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                due_date, paid_date, payment_method, created_utc, updated_utc
            "#,
        )
        .bind(invoice_id)
        .bind(&invoice_number)
        .bind(quote.customer_id)
        .bind(quote.quote_id)
        .bind(&quote.description)
        .bind(&quote.notes)
        .bind(quote.subtotal)
        .bind(quote.discount_pct)
        .bind(quote.discount_amount)
        .bind(quote.tax_pct)
        .bind(quote.tax_amount)
        .bind(quote.total_amount)
        .bind(due_date)
        .fetch_one(&mut *tx)
        .await;

        let invoice = match result {
            Ok(invoice) => invoice,
            // A concurrent conversion that slipped past the check above
            // trips the unique constraint on invoices.quote_id.
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                QUOTE_CONVERSIONS.with_label_values(&["refused"]).inc();
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Quote {} was already converted to an invoice",
                    quote.quote_number
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to insert converted invoice: {}",
                    e
                )));
            }
        };

        let lines = sqlx::query_as::<_, ConversionLine>(
            r#"
            SELECT s.name AS service_name, qi.description, qi.quantity, qi.unit_price,
                qi.total_price, qi.sort_order
            FROM quote_items qi
            LEFT JOIN services s ON s.service_id = qi.service_id
            WHERE qi.quote_id = $1
            ORDER BY qi.sort_order, qi.created_utc
            "#,
        )
        .bind(quote_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quote items: {}", e)))?;

        // Snapshot the lines. The label prefers the catalog name and falls
        // back to the line's own description; a line with neither is
        // dropped rather than failing the conversion. Header totals stay as
        // copied either way.
        let mut items = Vec::with_capacity(lines.len());
        let mut dropped = 0usize;
        for line in &lines {
            let Some(label) = line.service_name.clone().or_else(|| line.description.clone())
            else {
                dropped += 1;
                continue;
            };

            let item = sqlx::query_as::<_, InvoiceItem>(
                r#"
                INSERT INTO invoice_items (
                    invoice_item_id, invoice_id, service_name, description,
                    quantity, unit_price, total_price, sort_order
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING invoice_item_id, invoice_id, service_name, description, quantity,
                    unit_price, total_price, sort_order, created_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(&label)
            .bind(&line.description)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total_price)
            .bind(line.sort_order)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to copy line item: {}", e))
            })?;

            items.push(item);
        }

        if dropped > 0 {
            warn!(
                quote_number = %quote.quote_number,
                invoice_number = %invoice.invoice_number,
                dropped = dropped,
                "Dropped line items without a service name or description during conversion"
            );
        }

        sqlx::query("UPDATE quotes SET status = 'converted', updated_utc = NOW() WHERE quote_id = $1")
            .bind(quote_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to mark quote converted: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        QUOTE_CONVERSIONS.with_label_values(&["converted"]).inc();
        DOCUMENTS_CREATED.with_label_values(&["invoice"]).inc();
        timer.observe_duration();

        info!(
            quote_number = %quote.quote_number,
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total_amount = %invoice.total_amount,
            "Quote converted to invoice"
        );

        self.assemble_invoice_detail(invoice, items).await
    }

    // -------------------------------------------------------------------------
    // Certificate Operations
    // -------------------------------------------------------------------------

    /// Create a warranty certificate.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id))]
    pub async fn create_certificate(
        &self,
        input: &CreateCertificate,
    ) -> Result<Certificate, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_certificate"])
            .start_timer();

        if input.service_type.trim().is_empty() || input.service_type.len() > 100 {
            return Err(AppError::Validation(anyhow::anyhow!(
                "Service type is required and may be at most 100 characters"
            )));
        }
        if let Some(months) = input.warranty_period_months {
            if months <= 0 {
                return Err(AppError::Validation(anyhow::anyhow!(
                    "Warranty period must be a positive number of months"
                )));
            }
        }

        let warranty_end_date = input
            .warranty_period_months
            .and_then(|months| Certificate::warranty_end(input.service_date, months));

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let certificate_number =
            sequence::allocate_number(&mut tx, DocumentKind::Certificate).await?;
        let certificate_id = Uuid::new_v4();

        let result = sqlx::query_as::<_, Certificate>(
            r#"
            INSERT INTO certificates (
                certificate_id, certificate_number, customer_id, service_type, service_description,
                vehicle_info, service_date, products_used, warranty_period_months,
                warranty_end_date, special_notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING certificate_id, certificate_number, customer_id, service_type,
                service_description, vehicle_info, service_date, products_used,
                warranty_period_months, warranty_end_date, special_notes, created_utc, updated_utc
            "#,
        )
        .bind(certificate_id)
        .bind(&certificate_number)
        .bind(input.customer_id)
        .bind(&input.service_type)
        .bind(&input.service_description)
        .bind(&input.vehicle_info)
        .bind(input.service_date)
        .bind(&input.products_used)
        .bind(input.warranty_period_months)
        .bind(warranty_end_date)
        .bind(&input.special_notes)
        .fetch_one(&mut *tx)
        .await;

        let certificate = match result {
            Ok(certificate) => certificate,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Certificate number {} is already in use",
                    certificate_number
                )));
            }
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                tx.rollback().await.ok();
                return Err(AppError::Validation(anyhow::anyhow!("Unknown customer")));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to create certificate: {}",
                    e
                )));
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        DOCUMENTS_CREATED.with_label_values(&["certificate"]).inc();
        timer.observe_duration();

        info!(
            certificate_id = %certificate.certificate_id,
            certificate_number = %certificate.certificate_number,
            "Certificate created"
        );

        Ok(certificate)
    }

    /// Get a certificate with its customer identity.
    #[instrument(skip(self), fields(certificate_id = %certificate_id))]
    pub async fn get_certificate(
        &self,
        certificate_id: Uuid,
    ) -> Result<Option<CertificateDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_certificate"])
            .start_timer();

        let certificate = sqlx::query_as::<_, Certificate>(
            r#"
            SELECT certificate_id, certificate_number, customer_id, service_type,
                service_description, vehicle_info, service_date, products_used,
                warranty_period_months, warranty_end_date, special_notes, created_utc, updated_utc
            FROM certificates
            WHERE certificate_id = $1
            "#,
        )
        .bind(certificate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get certificate: {}", e))
        })?;

        timer.observe_duration();

        let Some(certificate) = certificate else {
            return Ok(None);
        };

        let customer = self
            .get_customer(certificate.customer_id)
            .await?
            .ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!("Customer row missing for certificate"))
            })?;

        Ok(Some(CertificateDetail {
            customer_name: customer.full_name(),
            certificate,
        }))
    }

    /// List certificates.
    #[instrument(skip(self, filter))]
    pub async fn list_certificates(
        &self,
        filter: &ListCertificatesFilter,
    ) -> Result<Vec<Certificate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_certificates"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let certificates = if let Some(cursor) = filter.page_token {
            sqlx::query_as::<_, Certificate>(
                r#"
                SELECT certificate_id, certificate_number, customer_id, service_type,
                    service_description, vehicle_info, service_date, products_used,
                    warranty_period_months, warranty_end_date, special_notes, created_utc, updated_utc
                FROM certificates
                WHERE ($1::uuid IS NULL OR customer_id = $1)
                  AND certificate_id > $2
                ORDER BY certificate_id
                LIMIT $3
                "#,
            )
            .bind(filter.customer_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, Certificate>(
                r#"
                SELECT certificate_id, certificate_number, customer_id, service_type,
                    service_description, vehicle_info, service_date, products_used,
                    warranty_period_months, warranty_end_date, special_notes, created_utc, updated_utc
                FROM certificates
                WHERE ($1::uuid IS NULL OR customer_id = $1)
                ORDER BY certificate_id
                LIMIT $2
                "#,
            )
            .bind(filter.customer_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list certificates: {}", e))
        })?;

        timer.observe_duration();

        Ok(certificates)
    }

    /// Update a certificate. The warranty end date is recomputed from the
    /// effective service date and warranty period.
    #[instrument(skip(self, input), fields(certificate_id = %certificate_id))]
    pub async fn update_certificate(
        &self,
        certificate_id: Uuid,
        input: &UpdateCertificate,
    ) -> Result<Option<Certificate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_certificate"])
            .start_timer();

        if let Some(service_type) = &input.service_type {
            if service_type.trim().is_empty() || service_type.len() > 100 {
                return Err(AppError::Validation(anyhow::anyhow!(
                    "Service type is required and may be at most 100 characters"
                )));
            }
        }
        if let Some(months) = input.warranty_period_months {
            if months <= 0 {
                return Err(AppError::Validation(anyhow::anyhow!(
                    "Warranty period must be a positive number of months"
                )));
            }
        }

        let existing = sqlx::query_as::<_, Certificate>(
            r#"
            SELECT certificate_id, certificate_number, customer_id, service_type,
                service_description, vehicle_info, service_date, products_used,
                warranty_period_months, warranty_end_date, special_notes, created_utc, updated_utc
            FROM certificates
            WHERE certificate_id = $1
            "#,
        )
        .bind(certificate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get certificate: {}", e))
        })?;

        let Some(existing) = existing else {
            timer.observe_duration();
            return Ok(None);
        };

        let service_date = input.service_date.unwrap_or(existing.service_date);
        let warranty_period_months = input
            .warranty_period_months
            .or(existing.warranty_period_months);
        let warranty_end_date = warranty_period_months
            .and_then(|months| Certificate::warranty_end(service_date, months));

        let certificate = sqlx::query_as::<_, Certificate>(
            r#"
            UPDATE certificates
            SET service_type = COALESCE($2, service_type),
                service_description = COALESCE($3, service_description),
                vehicle_info = COALESCE($4, vehicle_info),
                service_date = $5,
                products_used = COALESCE($6, products_used),
                warranty_period_months = $7,
                warranty_end_date = $8,
                special_notes = COALESCE($9, special_notes),
                updated_utc = NOW()
            WHERE certificate_id = $1
            RETURNING certificate_id, certificate_number, customer_id, service_type,
                service_description, vehicle_info, service_date, products_used,
                warranty_period_months, warranty_end_date, special_notes, created_utc, updated_utc
            "#,
        )
        .bind(certificate_id)
        .bind(&input.service_type)
        .bind(&input.service_description)
        .bind(&input.vehicle_info)
        .bind(service_date)
        .bind(&input.products_used)
        .bind(warranty_period_months)
        .bind(warranty_end_date)
        .bind(&input.special_notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update certificate: {}", e))
        })?;

        timer.observe_duration();

        info!(certificate_id = %certificate.certificate_id, "Certificate updated");

        Ok(Some(certificate))
    }

    /// Delete a certificate.
    #[instrument(skip(self), fields(certificate_id = %certificate_id))]
    pub async fn delete_certificate(&self, certificate_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_certificate"])
            .start_timer();

        let done = sqlx::query("DELETE FROM certificates WHERE certificate_id = $1")
            .bind(certificate_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete certificate: {}", e))
            })?;

        timer.observe_duration();

        let deleted = done.rows_affected() > 0;
        if deleted {
            info!(certificate_id = %certificate_id, "Certificate deleted");
        }

        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    async fn get_quote_row(&self, quote_id: Uuid) -> Result<Option<Quote>, AppError> {
        sqlx::query_as::<_, Quote>(
            r#"
            SELECT quote_id, quote_number, customer_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                valid_until, created_utc, updated_utc
            FROM quotes
            WHERE quote_id = $1
            "#,
        )
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get quote: {}", e)))
    }

    async fn get_invoice_row(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, invoice_number, customer_id, quote_id, status, description, notes,
                subtotal, discount_pct, discount_amount, tax_pct, tax_amount, total_amount,
                due_date, paid_date, payment_method, created_utc, updated_utc
            FROM invoices
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))
    }

    async fn assemble_quote_detail(
        &self,
        quote: Quote,
        items: Vec<QuoteItem>,
    ) -> Result<QuoteDetail, AppError> {
        let customer = self.get_customer(quote.customer_id).await?.ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!("Customer row missing for quote"))
        })?;

        Ok(QuoteDetail {
            customer_name: customer.full_name(),
            customer_email: customer.email,
            quote,
            items,
        })
    }

    async fn assemble_invoice_detail(
        &self,
        invoice: Invoice,
        items: Vec<InvoiceItem>,
    ) -> Result<InvoiceDetail, AppError> {
        let customer = self
            .get_customer(invoice.customer_id)
            .await?
            .ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!("Customer row missing for invoice"))
            })?;

        let quote_number = match invoice.quote_id {
            Some(quote_id) => {
                sqlx::query_scalar("SELECT quote_number FROM quotes WHERE quote_id = $1")
                    .bind(quote_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to get source quote number: {}",
                            e
                        ))
                    })?
            }
            None => None,
        };

        let is_overdue = invoice.is_overdue(Utc::now().date_naive());

        Ok(InvoiceDetail {
            customer_name: customer.full_name(),
            customer_email: customer.email,
            quote_number,
            items,
            is_overdue,
            invoice,
        })
    }
}

/// Joined quote line used by the converter.
#[derive(Debug, FromRow)]
struct ConversionLine {
    service_name: Option<String>,
    description: Option<String>,
    quantity: Decimal,
    unit_price: Decimal,
    total_price: Decimal,
    sort_order: i32,
}

/// Standalone invoices carry their label on every line.
fn validate_invoice_item_names(items: &[LineItemDraft]) -> Result<(), AppError> {
    for (index, item) in items.iter().enumerate() {
        let valid = item
            .service_name
            .as_deref()
            .map(str::trim)
            .map_or(false, |name| !name.is_empty() && name.len() <= 200);
        if !valid {
            return Err(AppError::Validation(anyhow::anyhow!(
                "Line item {}: a service name of 1 to 200 characters is required",
                index + 1
            )));
        }
    }
    Ok(())
}

async fn insert_quote_items(
    tx: &mut Transaction<'_, Postgres>,
    quote_id: Uuid,
    drafts: &[LineItemDraft],
) -> Result<Vec<QuoteItem>, AppError> {
    let mut items = Vec::with_capacity(drafts.len());

    for (index, draft) in drafts.iter().enumerate() {
        let result = sqlx::query_as::<_, QuoteItem>(
            r#"
            INSERT INTO quote_items (
                quote_item_id, quote_id, service_id, description,
                quantity, unit_price, total_price, sort_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING quote_item_id, quote_id, service_id, description, quantity, unit_price,
                total_price, sort_order, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(quote_id)
        .bind(draft.service_id)
        .bind(&draft.description)
        .bind(draft.quantity)
        .bind(draft.unit_price)
        .bind(pricing::line_total(draft.quantity, draft.unit_price))
        .bind(index as i32)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(item) => items.push(item),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_foreign_key_violation() => {
                return Err(AppError::Validation(anyhow::anyhow!(
                    "Line item {}: unknown catalog service",
                    index + 1
                )));
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to insert quote item: {}",
                    e
                )));
            }
        }
    }

    Ok(items)
}

async fn insert_invoice_items(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    drafts: &[LineItemDraft],
) -> Result<Vec<InvoiceItem>, AppError> {
    let mut items = Vec::with_capacity(drafts.len());

    for (index, draft) in drafts.iter().enumerate() {
        // Callers validate the names up front.
        let service_name = draft.service_name.as_deref().unwrap_or_default().trim();

        let item = sqlx::query_as::<_, InvoiceItem>(
            r#"
            INSERT INTO invoice_items (
                invoice_item_id, invoice_id, service_name, description,
                quantity, unit_price, total_price, sort_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING invoice_item_id, invoice_id, service_name, description, quantity, unit_price,
                total_price, sort_order, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(service_name)
        .bind(&draft.description)
        .bind(draft.quantity)
        .bind(draft.unit_price)
        .bind(pricing::line_total(draft.quantity, draft.unit_price))
        .bind(index as i32)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice item: {}", e))
        })?;

        items.push(item);
    }

    Ok(items)
}
