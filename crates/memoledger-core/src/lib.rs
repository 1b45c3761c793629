//! # memoledger-core
//!
//! Building blocks for a client that pays a remote memo ledger and mirrors
//! its purchase history:
//!
//! - **Amounts**: exact decimal parsing into integer minor units
//! - **Schemas**: versioned positional layouts for memo tuples and events
//! - **Gateway**: the async call contract of the remote ledger
//! - **Memory ledger**: an in-process implementation of that contract
//!
//! ## Example
//!
//! ```rust
//! use memoledger_core::{compute_total, format_amount};
//!
//! let total = compute_total("0.001", Some("0.002"), 18).unwrap();
//! assert_eq!(total.minor_units(), 3_000_000_000_000_000);
//! assert_eq!(format_amount(total, 18), "0.003");
//! ```

pub mod amount;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod schema;
pub mod types;

pub use amount::{compute_total, format_amount, parse_amount, MAX_DECIMALS};
pub use config::{LedgerConfig, Product};
pub use error::{DecodeError, LedgerError, Result};
pub use gateway::{EventSink, GatewayError, LedgerGateway, ListenerId, PendingTx, PurchaseCall};
pub use memory::MemoryLedger;
pub use schema::{MemoField, SchemaDescriptor, SchemaVersion};
pub use types::{
    Address, Amount, MemoIdentity, MemoRecord, PendingTransaction, RawTuple, Timestamp, Token,
    TxHash, TxReceipt,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
