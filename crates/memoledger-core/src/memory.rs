//! In-process ledger implementing the purchase contract
//!
//! Mirrors the deployed contract's rules: the deployer owns the contract,
//! a purchase must attach exactly its total, every purchase stores a memo,
//! bumps the counter and emits an append event after confirmation, and only
//! the owner may withdraw. Used by the CLI walkthrough and by tests, which
//! also get hooks to delay mining, inject failures and drop the transport.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::gateway::{EventSink, GatewayError, LedgerGateway, ListenerId, PendingTx, PurchaseCall};
use crate::schema::{SchemaDescriptor, SchemaVersion};
use crate::types::{Address, Amount, MemoRecord, RawTuple, Timestamp, TxHash, TxReceipt};

enum Operation {
    Purchase(PurchaseCall),
    Withdraw(Address),
}

struct QueuedTx {
    tx_hash: TxHash,
    operation: Operation,
    reply: oneshot::Sender<Result<TxReceipt, GatewayError>>,
}

struct LedgerState {
    memos: Vec<RawTuple>,
    total_purchases: u64,
    contract_balance: Amount,
    balances: HashMap<Address, Amount>,
    block_number: u64,
    nonce: u64,
    clock: Option<u64>,
    auto_mine: bool,
    transport_down: bool,
    next_failure: Option<GatewayError>,
}

/// In-memory purchase ledger
pub struct MemoryLedger {
    owner: Address,
    schema: SchemaDescriptor,
    state: Mutex<LedgerState>,
    queue: Mutex<VecDeque<QueuedTx>>,
    listeners: DashMap<ListenerId, EventSink>,
}

impl MemoryLedger {
    /// Deploy a ledger owned by `owner` that lays tuples out per `version`
    pub fn deploy(owner: Address, version: SchemaVersion) -> Self {
        info!("Deployed in-memory ledger (schema {}) owned by {}", version, owner);
        Self {
            owner,
            schema: SchemaDescriptor::for_version(version),
            state: Mutex::new(LedgerState {
                memos: Vec::new(),
                total_purchases: 0,
                contract_balance: Amount::ZERO,
                balances: HashMap::new(),
                block_number: 0,
                nonce: 0,
                clock: None,
                auto_mine: true,
                transport_down: false,
                next_failure: None,
            }),
            queue: Mutex::new(VecDeque::new()),
            listeners: DashMap::new(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    /// Credit an account with spendable funds
    pub fn fund(&self, account: Address, amount: Amount) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(account).or_default();
        *balance = balance.checked_add(amount).unwrap_or(Amount(u128::MAX));
    }

    pub fn balance_of(&self, account: Address) -> Amount {
        self.state
            .lock()
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    /// Funds held by the contract
    pub fn contract_balance(&self) -> Amount {
        self.state.lock().contract_balance
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    /// Pin the ledger clock to a unix time in seconds
    pub fn set_time(&self, unix_secs: u64) {
        self.state.lock().clock = Some(unix_secs);
    }

    /// When disabled, transactions stay pending until [`MemoryLedger::mine`]
    pub fn set_auto_mine(&self, enabled: bool) {
        self.state.lock().auto_mine = enabled;
    }

    /// Make the next submitted transaction revert with `reason`
    pub fn fail_next_submit(&self, reason: impl Into<String>) {
        self.state.lock().next_failure = Some(GatewayError::Reverted(reason.into()));
    }

    /// Make the next submission look like the user cancelled signing
    pub fn reject_next_submit(&self) {
        self.state.lock().next_failure = Some(GatewayError::Rejected);
    }

    /// Store a raw tuple directly in the memo log
    pub fn push_raw_memo(&self, tuple: RawTuple) {
        self.state.lock().memos.push(tuple);
    }

    /// Deliver a raw tuple to every listener without touching state
    pub fn emit_raw(&self, tuple: RawTuple) {
        self.emit(&tuple);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Simulate losing the connection: calls fail and event streams end
    pub fn close_streams(&self) {
        self.state.lock().transport_down = true;
        self.listeners.clear();
        warn!("In-memory ledger transport closed");
    }

    pub fn restore_transport(&self) {
        self.state.lock().transport_down = false;
    }

    /// Confirm every queued transaction in submission order
    pub fn mine(&self) -> usize {
        let queued: Vec<QueuedTx> = self.queue.lock().drain(..).collect();
        let count = queued.len();
        for tx in queued {
            let outcome = self.execute(tx.tx_hash, tx.operation);
            let _ = tx.reply.send(outcome);
        }
        count
    }

    fn check_transport(&self) -> Result<(), GatewayError> {
        if self.state.lock().transport_down {
            return Err(GatewayError::Transport("connection closed".to_string()));
        }
        Ok(())
    }

    fn now(state: &LedgerState) -> Timestamp {
        state
            .clock
            .and_then(Timestamp::from_unix_secs)
            .unwrap_or_else(Timestamp::now)
    }

    fn next_hash(&self, from: Address, amount: Amount) -> TxHash {
        let nonce = {
            let mut state = self.state.lock();
            state.nonce += 1;
            state.nonce
        };
        let mut hasher = Sha256::new();
        hasher.update(nonce.to_be_bytes());
        hasher.update(from.as_bytes());
        hasher.update(amount.minor_units().to_be_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        TxHash(bytes)
    }

    fn broadcast(&self, tx_hash: TxHash, operation: Operation) -> PendingTx {
        if self.state.lock().auto_mine {
            let outcome = self.execute(tx_hash, operation);
            return PendingTx::resolved(tx_hash, outcome);
        }

        let (reply, confirmation) = oneshot::channel();
        self.queue.lock().push_back(QueuedTx {
            tx_hash,
            operation,
            reply,
        });
        PendingTx::new(tx_hash, confirmation)
    }

    fn execute(&self, tx_hash: TxHash, operation: Operation) -> Result<TxReceipt, GatewayError> {
        match operation {
            Operation::Purchase(call) => {
                let (receipt, tuple) = self.apply_purchase(tx_hash, call)?;
                self.emit(&tuple);
                Ok(receipt)
            }
            Operation::Withdraw(from) => self.apply_withdraw(tx_hash, from),
        }
    }

    fn apply_purchase(
        &self,
        tx_hash: TxHash,
        call: PurchaseCall,
    ) -> Result<(TxReceipt, RawTuple), GatewayError> {
        if call.value != call.total {
            return Err(GatewayError::Reverted(
                "attached value does not match total".to_string(),
            ));
        }
        if call.value.is_zero() {
            return Err(GatewayError::Reverted("can't buy for free".to_string()));
        }

        let mut state = self.state.lock();
        let balance = state.balances.get(&call.from).copied().unwrap_or_default();
        let remaining = balance
            .checked_sub(call.value)
            .ok_or_else(|| GatewayError::Reverted("insufficient funds".to_string()))?;
        let contract_balance = state
            .contract_balance
            .checked_add(call.value)
            .ok_or_else(|| GatewayError::Reverted("balance overflow".to_string()))?;

        let record = MemoRecord {
            payer: call.from,
            timestamp: Self::now(&state),
            display_name: call.display_name,
            message: call.message,
            total_paid: call.total,
            product_label: call.product_label,
        };
        let tuple = self.schema.encode_memo(&record);

        state.balances.insert(call.from, remaining);
        state.contract_balance = contract_balance;
        state.memos.push(tuple.clone());
        state.total_purchases += 1;
        state.block_number += 1;

        debug!(
            "Mined purchase {} from {} in block {}",
            tx_hash, call.from, state.block_number
        );

        Ok((
            TxReceipt {
                tx_hash,
                block_number: state.block_number,
                total: call.total,
            },
            tuple,
        ))
    }

    fn apply_withdraw(&self, tx_hash: TxHash, from: Address) -> Result<TxReceipt, GatewayError> {
        if from != self.owner {
            return Err(GatewayError::Reverted("caller is not the owner".to_string()));
        }

        let mut state = self.state.lock();
        let amount = state.contract_balance;
        state.contract_balance = Amount::ZERO;
        let owner_balance = state.balances.entry(self.owner).or_default();
        *owner_balance = owner_balance.checked_add(amount).unwrap_or(Amount(u128::MAX));
        state.block_number += 1;

        info!("Owner withdrew {} minor units", amount);

        Ok(TxReceipt {
            tx_hash,
            block_number: state.block_number,
            total: amount,
        })
    }

    fn emit(&self, tuple: &RawTuple) {
        let closed: Vec<ListenerId> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().send(tuple.clone()).is_err())
            .map(|entry| *entry.key())
            .collect();

        // Removing while iterating would deadlock the shard
        for id in closed {
            self.listeners.remove(&id);
            debug!("Pruned listener {} that is no longer receiving", id);
        }
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn submit_purchase(&self, call: PurchaseCall) -> Result<PendingTx, GatewayError> {
        self.check_transport()?;

        let tx_hash = self.next_hash(call.from, call.total);
        let failure = self.state.lock().next_failure.take();
        match failure {
            Some(GatewayError::Reverted(reason)) => {
                return Ok(PendingTx::resolved(tx_hash, Err(GatewayError::Reverted(reason))));
            }
            Some(other) => return Err(other),
            None => {}
        }

        Ok(self.broadcast(tx_hash, Operation::Purchase(call)))
    }

    async fn fetch_memos(&self) -> Result<Vec<RawTuple>, GatewayError> {
        self.check_transport()?;
        Ok(self.state.lock().memos.clone())
    }

    async fn fetch_purchase_count(&self) -> Result<u64, GatewayError> {
        self.check_transport()?;
        Ok(self.state.lock().total_purchases)
    }

    async fn withdraw(&self, from: Address) -> Result<PendingTx, GatewayError> {
        self.check_transport()?;
        let tx_hash = self.next_hash(from, Amount::ZERO);
        Ok(self.broadcast(tx_hash, Operation::Withdraw(from)))
    }

    async fn subscribe(&self, sink: EventSink) -> Result<ListenerId, GatewayError> {
        self.check_transport()?;
        let id = ListenerId::new();
        self.listeners.insert(id, sink);
        debug!("Registered listener {}", id);
        Ok(id)
    }

    async fn unsubscribe(&self, id: ListenerId) -> Result<bool, GatewayError> {
        Ok(self.listeners.remove(&id).is_some())
    }
}
