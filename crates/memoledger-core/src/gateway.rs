//! Contract-call façade of the remote ledger
//!
//! The engine consumes the ledger only through [`LedgerGateway`]. Event
//! delivery uses a channel registered with [`LedgerGateway::subscribe`] and
//! removed by the returned [`ListenerId`], never by callback identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::types::{Address, Amount, RawTuple, TxHash, TxReceipt};

/// Failures reported by the remote side or the transport to it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("signature request rejected")]
    Rejected,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("transaction dropped before confirmation")]
    Dropped,
}

/// Arguments of the purchase entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCall {
    /// Signing account
    pub from: Address,
    pub display_name: String,
    pub message: String,
    /// Logical total passed as a call argument
    pub total: Amount,
    pub product_label: Option<String>,
    /// Value attached to the call; must equal `total`
    pub value: Amount,
}

/// Registration handle for an append-event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    pub fn new() -> Self {
        ListenerId(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half handed to the gateway for event delivery
pub type EventSink = mpsc::UnboundedSender<RawTuple>;

/// A broadcast transaction awaiting inclusion
#[derive(Debug)]
pub struct PendingTx {
    tx_hash: TxHash,
    confirmation: oneshot::Receiver<Result<TxReceipt, GatewayError>>,
}

impl PendingTx {
    pub fn new(
        tx_hash: TxHash,
        confirmation: oneshot::Receiver<Result<TxReceipt, GatewayError>>,
    ) -> Self {
        Self {
            tx_hash,
            confirmation,
        }
    }

    /// A handle whose outcome is already known
    pub fn resolved(tx_hash: TxHash, outcome: Result<TxReceipt, GatewayError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self::new(tx_hash, rx)
    }

    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    /// Suspend until the ledger confirms or fails the transaction
    pub async fn wait(self) -> Result<TxReceipt, GatewayError> {
        match self.confirmation.await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::Dropped),
        }
    }
}

/// Remote ledger call contract
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Broadcast a purchase; `call.value` is attached to the transaction
    async fn submit_purchase(&self, call: PurchaseCall) -> Result<PendingTx, GatewayError>;

    /// Full memo log in ledger order, as positional tuples
    async fn fetch_memos(&self) -> Result<Vec<RawTuple>, GatewayError>;

    /// Aggregate purchase counter
    async fn fetch_purchase_count(&self) -> Result<u64, GatewayError>;

    /// Move collected funds to the owner; reverts for anyone else
    async fn withdraw(&self, from: Address) -> Result<PendingTx, GatewayError>;

    /// Register a sink for append events
    async fn subscribe(&self, sink: EventSink) -> Result<ListenerId, GatewayError>;

    /// Remove a registration; returns whether it was present
    async fn unsubscribe(&self, id: ListenerId) -> Result<bool, GatewayError>;
}
