//! Domain models for backoffice-service.

mod certificate;
mod customer;
mod invoice;
mod line_item;
mod quote;
mod service;

pub use certificate::{
    Certificate, CertificateDetail, CreateCertificate, ListCertificatesFilter, UpdateCertificate,
};
pub use customer::{CreateCustomer, Customer, ListCustomersFilter, UpdateCustomer};
pub use invoice::{
    CreateInvoice, Invoice, InvoiceDetail, InvoiceItem, InvoiceStats, InvoiceStatus,
    ListInvoicesFilter, UpdateInvoice,
};
pub use line_item::LineItemDraft;
pub use quote::{
    CreateQuote, ListQuotesFilter, Quote, QuoteDetail, QuoteItem, QuoteStats, QuoteStatus,
    UpdateQuote,
};
pub use service::{CreateService, ListServicesFilter, Service};
