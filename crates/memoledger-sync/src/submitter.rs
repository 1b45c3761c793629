//! Priced purchase submission and confirmation

use memoledger_core::{
    compute_total, GatewayError, LedgerConfig, LedgerError, LedgerGateway, PendingTransaction,
    PendingTx, Product, PurchaseCall, Result, TxReceipt,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::LedgerCache;
use crate::metrics::{CONFIRMATION_SECONDS, SUBMISSIONS_TOTAL};
use crate::session::SessionManager;

/// User-entered purchase fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseForm {
    /// Decimal base price
    pub price: String,
    /// Decimal tip; blank means none
    pub tip: String,
    pub display_name: String,
    pub message: String,
    pub product_label: Option<String>,
}

impl PurchaseForm {
    pub fn new(price: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            ..Default::default()
        }
    }

    /// Form priced and labelled from a catalog entry
    pub fn for_product(product: &Product) -> Self {
        Self {
            price: product.price.clone(),
            product_label: Some(product.label.clone()),
            ..Default::default()
        }
    }

    pub fn with_tip(mut self, tip: impl Into<String>) -> Self {
        self.tip = tip.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Submits purchases for the active account and awaits their confirmation
pub struct TransactionSubmitter {
    gateway: Arc<dyn LedgerGateway>,
    session: Arc<SessionManager>,
    cache: Arc<LedgerCache>,
    decimals: u32,
    default_display_name: String,
    default_message: String,
    confirmation_timeout: Option<Duration>,
    pending: Mutex<Option<PendingTransaction>>,
    refresh_fault: Mutex<Option<LedgerError>>,
}

impl TransactionSubmitter {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        session: Arc<SessionManager>,
        cache: Arc<LedgerCache>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            gateway,
            session,
            cache,
            decimals: config.decimals,
            default_display_name: config.default_display_name.clone(),
            default_message: config.default_message.clone(),
            confirmation_timeout: config.confirmation_timeout(),
            pending: Mutex::new(None),
            refresh_fault: Mutex::new(None),
        }
    }

    /// Submit the form as one purchase and wait for it to confirm.
    ///
    /// On success the name and message fields are cleared and the purchase
    /// counter is refreshed. A failed refresh does not undo the confirmed
    /// purchase; it is kept for [`TransactionSubmitter::take_refresh_fault`].
    /// On failure the form is left as it was.
    pub async fn submit(&self, form: &mut PurchaseForm) -> Result<TxReceipt> {
        let from = self.session.require_account()?;
        let total = compute_total(&form.price, Some(form.tip.as_str()), self.decimals)?;

        let call = PurchaseCall {
            from,
            display_name: placeholder(&form.display_name, &self.default_display_name),
            message: placeholder(&form.message, &self.default_message),
            total,
            product_label: form.product_label.clone(),
            value: total,
        };

        self.claim(PendingTransaction {
            total,
            tx_hash: None,
            awaiting_confirmation: false,
        })?;

        debug!("Submitting purchase of {} from {}", total, from);
        let outcome = self.broadcast_and_wait(self.gateway.submit_purchase(call)).await;
        *self.pending.lock() = None;

        let receipt = match outcome {
            Ok(receipt) => receipt,
            Err(e) => {
                SUBMISSIONS_TOTAL.with_label_values(&["failed"]).inc();
                warn!("Purchase failed: {}", e);
                return Err(e);
            }
        };

        SUBMISSIONS_TOTAL.with_label_values(&["confirmed"]).inc();
        info!("Mined {} in block {}", receipt.tx_hash, receipt.block_number);

        form.display_name.clear();
        form.message.clear();

        if let Err(e) = self.cache.refresh_counter(self.gateway.as_ref()).await {
            warn!("Counter refresh after purchase failed: {}", e);
            *self.refresh_fault.lock() = Some(e);
        }

        Ok(receipt)
    }

    /// Error from the last post-confirmation counter refresh, if it failed
    pub fn take_refresh_fault(&self) -> Option<LedgerError> {
        self.refresh_fault.lock().take()
    }

    /// Move collected funds to the ledger owner
    pub async fn withdraw(&self) -> Result<TxReceipt> {
        let from = self.session.require_account()?;

        self.claim(PendingTransaction {
            total: Default::default(),
            tx_hash: None,
            awaiting_confirmation: false,
        })?;

        debug!("Requesting withdrawal as {}", from);
        let outcome = self.broadcast_and_wait(self.gateway.withdraw(from)).await;
        *self.pending.lock() = None;

        let receipt = outcome?;
        info!("Withdrew {} in block {}", receipt.total, receipt.block_number);
        Ok(receipt)
    }

    /// Transaction currently between broadcast and confirmation
    pub fn pending(&self) -> Option<PendingTransaction> {
        self.pending.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.pending.lock().is_some()
    }

    fn claim(&self, slot: PendingTransaction) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            SUBMISSIONS_TOTAL.with_label_values(&["busy"]).inc();
            return Err(LedgerError::submit(
                "another transaction is awaiting confirmation",
            ));
        }
        *pending = Some(slot);
        Ok(())
    }

    async fn broadcast_and_wait<F>(&self, broadcast: F) -> Result<TxReceipt>
    where
        F: std::future::Future<Output = std::result::Result<PendingTx, GatewayError>>,
    {
        let pending_tx = broadcast.await.map_err(broadcast_error)?;
        let tx_hash = pending_tx.tx_hash();

        if let Some(slot) = self.pending.lock().as_mut() {
            slot.tx_hash = Some(tx_hash);
            slot.awaiting_confirmation = true;
        }
        info!("Broadcast {}, waiting for confirmation", tx_hash);

        let started = Instant::now();
        let outcome = match self.confirmation_timeout {
            Some(limit) => match tokio::time::timeout(limit, pending_tx.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Stopped waiting for {} after {:?}", tx_hash, limit);
                    return Err(LedgerError::submit(format!(
                        "no confirmation for {} within {}s",
                        tx_hash,
                        limit.as_secs()
                    )));
                }
            },
            None => pending_tx.wait().await,
        };
        CONFIRMATION_SECONDS.observe(started.elapsed().as_secs_f64());

        outcome.map_err(submit_error)
    }
}

fn placeholder(value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// A broadcast that never reached the ledger keeps its transport cause
fn broadcast_error(err: GatewayError) -> LedgerError {
    match err {
        GatewayError::Transport(msg) => LedgerError::Transport(msg),
        other => submit_error(other),
    }
}

fn submit_error(err: GatewayError) -> LedgerError {
    LedgerError::submit(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticProvider;
    use memoledger_core::{parse_amount, Address, Amount, MemoryLedger, SchemaVersion};

    const OWNER: u64 = 1;
    const CUSTOMER: u64 = 2;

    fn eth(text: &str) -> Amount {
        parse_amount(text, 18).unwrap()
    }

    async fn setup(config: LedgerConfig) -> (Arc<MemoryLedger>, Arc<LedgerCache>, TransactionSubmitter) {
        let ledger = Arc::new(MemoryLedger::deploy(
            Address::from_low_u64(OWNER),
            SchemaVersion::V2,
        ));
        ledger.fund(Address::from_low_u64(CUSTOMER), eth("1"));

        let session = Arc::new(SessionManager::new(Some(Arc::new(StaticProvider::new(vec![
            Address::from_low_u64(CUSTOMER),
        ])))));
        session.connect().await.unwrap();

        let cache = Arc::new(LedgerCache::new());
        let submitter = TransactionSubmitter::new(ledger.clone(), session, cache.clone(), &config);
        (ledger, cache, submitter)
    }

    #[tokio::test]
    async fn test_submit_clears_fields_and_refreshes_counter() {
        let (ledger, cache, submitter) = setup(LedgerConfig::default()).await;
        let mut form = PurchaseForm::new("0.001")
            .with_tip("0.002")
            .with_name("Ada")
            .with_message("hi");

        let receipt = submitter.submit(&mut form).await.unwrap();
        assert_eq!(receipt.total, eth("0.003"));

        assert!(form.display_name.is_empty());
        assert!(form.message.is_empty());
        assert_eq!(form.price, "0.001");
        assert_eq!(cache.counter(), 1);
        assert_eq!(ledger.contract_balance(), eth("0.003"));
        assert!(submitter.pending().is_none());
    }

    #[tokio::test]
    async fn test_blank_fields_use_placeholders() {
        let (ledger, _, submitter) = setup(LedgerConfig::default()).await;
        let mut form = PurchaseForm::new("0.001").with_name("   ");

        submitter.submit(&mut form).await.unwrap();

        let memos = ledger.fetch_memos().await.unwrap();
        let record = ledger.schema().decode_memo(&memos[0]).unwrap();
        assert_eq!(record.display_name, "Anonymous");
        assert_eq!(record.message, "None.");
    }

    #[tokio::test]
    async fn test_revert_leaves_form_untouched() {
        let (ledger, cache, submitter) = setup(LedgerConfig::default()).await;
        ledger.fail_next_submit("out of gas");
        let mut form = PurchaseForm::new("0.001").with_name("Ada").with_message("hi");

        let err = submitter.submit(&mut form).await.unwrap_err();
        assert!(matches!(err, LedgerError::Submit { .. }));
        assert_eq!(form.display_name, "Ada");
        assert_eq!(form.message, "hi");
        assert_eq!(cache.counter(), 0);
        assert_eq!(ledger.fetch_purchase_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_signature_is_submit_error() {
        let (ledger, _, submitter) = setup(LedgerConfig::default()).await;
        ledger.reject_next_submit();
        let mut form = PurchaseForm::new("0.001").with_name("Ada");
        match submitter.submit(&mut form).await {
            Err(LedgerError::Submit { reason }) => assert!(reason.contains("rejected")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(form.display_name, "Ada");
    }

    #[tokio::test]
    async fn test_invalid_amount_never_reaches_gateway() {
        let (ledger, _, submitter) = setup(LedgerConfig::default()).await;
        let mut form = PurchaseForm::new("0.001").with_tip("lots");
        assert!(matches!(
            submitter.submit(&mut form).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(ledger.block_number(), 0);
    }

    #[tokio::test]
    async fn test_one_purchase_in_flight() {
        let (ledger, _, submitter) = setup(LedgerConfig::default()).await;
        ledger.set_auto_mine(false);
        let submitter = Arc::new(submitter);

        let first = {
            let submitter = submitter.clone();
            tokio::spawn(async move {
                let mut form = PurchaseForm::new("0.001");
                submitter.submit(&mut form).await
            })
        };
        while ledger.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let pending = submitter.pending().unwrap();
        assert!(pending.awaiting_confirmation);
        assert_eq!(pending.total, eth("0.001"));

        let mut second = PurchaseForm::new("0.001");
        assert!(matches!(
            submitter.submit(&mut second).await,
            Err(LedgerError::Submit { .. })
        ));
        assert_eq!(ledger.pending_count(), 1);

        ledger.mine();
        first.await.unwrap().unwrap();
        assert!(!submitter.is_busy());
    }

    #[tokio::test]
    async fn test_confirmation_timeout_stops_waiting() {
        let config = LedgerConfig::default().with_confirmation_timeout(Duration::from_secs(1));
        let (ledger, _, submitter) = setup(config).await;
        ledger.set_auto_mine(false);

        tokio::time::pause();
        let mut form = PurchaseForm::new("0.001").with_name("Ada");
        let err = submitter.submit(&mut form).await.unwrap_err();
        assert!(matches!(err, LedgerError::Submit { .. }));
        assert_eq!(form.display_name, "Ada");
        assert!(!submitter.is_busy());

        // The broadcast transaction is still live on the ledger
        assert_eq!(ledger.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_is_owner_only() {
        let (_, _, submitter) = setup(LedgerConfig::default()).await;
        assert!(matches!(
            submitter.withdraw().await,
            Err(LedgerError::Submit { .. })
        ));
    }

    #[test]
    fn test_form_for_product() {
        let form = PurchaseForm::for_product(&Product::new("Large Coffee", "0.003"));
        assert_eq!(form.price, "0.003");
        assert_eq!(form.product_label.as_deref(), Some("Large Coffee"));
        assert!(form.tip.is_empty());
    }
}
