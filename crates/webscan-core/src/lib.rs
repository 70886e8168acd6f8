//! Webscan Core Engine
//!
//! This crate provides the scan lifecycle state machine, admission control,
//! quota accounting and billing event processing behind the webscan API.
//! Storage and outbound calls are traits so the engine runs against Postgres
//! in production and in-memory fakes in tests.

pub mod billing;
pub mod dispatch;
pub mod domain;
pub mod entitlement;
pub mod scan;
pub mod services;
pub mod store;

use thiserror::Error;

pub use billing::{BillingProvider, EventEnvelope, ProviderSubscription};
pub use dispatch::{DispatchRequest, ScanDispatcher};
pub use entitlement::{Admission, Entitlement, Role, SubscriptionStatus, DAILY_FREE_LIMIT};
pub use scan::{CallbackPayload, CallbackStatus, NewFinding, ScanStatus, Severity};
pub use services::billing::BillingService;
pub use services::scans::{IngestOutcome, ScanService, ScanStats, UsageSummary};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid domain format")]
    InvalidDomain,

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("scan backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("storage error: {0}")]
    Storage(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
