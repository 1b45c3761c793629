//! # memoledger-sync
//!
//! Keeps a local view of a remote memo ledger consistent while the user
//! pays into it.
//!
//! Two channels feed the [`LedgerCache`]: a point-in-time full fetch and a
//! live append-event subscription. Both go through the same idempotent
//! append, so a record delivered by both shows up once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use memoledger_core::{Address, LedgerConfig, MemoryLedger, SchemaVersion};
//! use memoledger_sync::{LedgerClient, PurchaseForm, StaticProvider};
//! use std::sync::Arc;
//!
//! # async fn run() -> memoledger_core::Result<()> {
//! let customer = Address::from_low_u64(2);
//! let ledger = Arc::new(MemoryLedger::deploy(Address::from_low_u64(1), SchemaVersion::V2));
//! let provider = Arc::new(StaticProvider::new(vec![customer]));
//!
//! let client = LedgerClient::new(LedgerConfig::default(), ledger, Some(provider))?;
//! client.connect().await?;
//!
//! let mut form = PurchaseForm::new("0.001").with_name("Ada").with_message("hi");
//! client.purchase(&mut form).await?;
//! println!("{} purchases", client.purchase_count());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod metrics;
pub mod session;
pub mod submitter;
pub mod subscriber;

pub use cache::{AppendOutcome, AppendSource, LedgerCache, DEFAULT_DEDUP_WINDOW};
pub use client::LedgerClient;
pub use metrics::gather_metrics;
pub use session::{ProviderError, SessionManager, SessionState, SigningProvider, StaticProvider};
pub use submitter::{PurchaseForm, TransactionSubmitter};
pub use subscriber::{EventSubscriber, SubscriberState, Subscription};

use memoledger_core::{GatewayError, LedgerError};

/// Map a failed read or registration to the client's error taxonomy
pub(crate) fn fetch_error(err: GatewayError) -> LedgerError {
    match err {
        GatewayError::Rejected => LedgerError::UserRejected,
        GatewayError::Transport(msg) => LedgerError::Transport(msg),
        other => LedgerError::Transport(other.to_string()),
    }
}
