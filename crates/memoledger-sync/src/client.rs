//! Client facade tying session, cache, subscriber and submitter together

use memoledger_core::{
    Address, DecodeError, LedgerConfig, LedgerError, LedgerGateway, MemoRecord, Result,
    SchemaDescriptor, TxReceipt,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::LedgerCache;
use crate::fetch_error;
use crate::metrics::DECODE_ERRORS_TOTAL;
use crate::session::{SessionManager, SigningProvider};
use crate::subscriber::{EventSubscriber, SubscriberState, Subscription};
use crate::submitter::{PurchaseForm, TransactionSubmitter};

/// Ledger client
///
/// Losing the transport degrades the client to unauthenticated mode: the
/// subscription is dropped, the session forgets its account and the cache
/// keeps what it had.
pub struct LedgerClient {
    config: LedgerConfig,
    schema: SchemaDescriptor,
    gateway: Arc<dyn LedgerGateway>,
    session: Arc<SessionManager>,
    cache: Arc<LedgerCache>,
    subscriber: EventSubscriber,
    submitter: TransactionSubmitter,
    subscription: Mutex<Option<Subscription>>,
    rejected: RwLock<Vec<(usize, DecodeError)>>,
}

impl LedgerClient {
    pub fn new(
        config: LedgerConfig,
        gateway: Arc<dyn LedgerGateway>,
        provider: Option<Arc<dyn SigningProvider>>,
    ) -> Result<Self> {
        config.validate()?;

        let schema = config.schema();
        let session = Arc::new(SessionManager::new(provider));
        let cache = Arc::new(LedgerCache::with_dedup_window(config.dedup_window));
        let subscriber = EventSubscriber::new(gateway.clone(), cache.clone(), schema.clone());
        let submitter =
            TransactionSubmitter::new(gateway.clone(), session.clone(), cache.clone(), &config);

        info!(
            "Ledger client for {} at {} (schema {})",
            config.contract_address,
            config.endpoint,
            schema.version()
        );

        Ok(Self {
            config,
            schema,
            gateway,
            session,
            cache,
            subscriber,
            submitter,
            subscription: Mutex::new(None),
            rejected: RwLock::new(Vec::new()),
        })
    }

    /// Connect the wallet and bring the local view up.
    ///
    /// Seeds the cache from one full fetch the first time, then starts the
    /// live event subscription. A seeding connect reconciles one more full
    /// fetch after attaching so records confirmed in between are not missed.
    /// The purchase counter is refreshed last.
    pub async fn connect(&self) -> Result<Address> {
        let connected = self.session.connect().await;
        let account = self.guarded(connected).await?;

        let established = self.establish().await;
        self.guarded(established).await?;
        Ok(account)
    }

    async fn establish(&self) -> Result<()> {
        let mut slot = self.subscription.lock().await;
        if let Some(subscription) = slot.as_ref() {
            if subscription.is_active() {
                debug!("Event subscription already live");
                return Ok(());
            }
        }
        if let Some(stale) = slot.take() {
            stale.detach().await;
        }

        self.cache.begin_session();
        let seeding = !self.cache.is_seeded();
        if seeding {
            let records = self.fetch_records("seed").await?;
            self.cache.seed(records)?;
        }

        *slot = Some(self.subscriber.attach(&self.session).await?);
        drop(slot);

        if seeding {
            let records = self.fetch_records("catch_up").await?;
            let added = self.cache.reconcile(records);
            if added > 0 {
                debug!("Caught up {} memos confirmed while attaching", added);
            }
        }

        self.cache.refresh_counter(self.gateway.as_ref()).await?;
        Ok(())
    }

    /// Stop listening and forget the account; the cache is kept
    pub async fn disconnect(&self) {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.detach().await;
        }
        self.session.disconnect();
    }

    /// Full fetch merged into the cache, plus a counter refresh.
    ///
    /// Returns how many records were added.
    pub async fn refresh(&self) -> Result<usize> {
        self.check_stream().await;
        self.session.require_account()?;
        let outcome = self.merge_full_fetch().await;
        self.guarded(outcome).await
    }

    async fn merge_full_fetch(&self) -> Result<usize> {
        let records = self.fetch_records("refresh").await?;
        let added = if self.cache.is_seeded() {
            self.cache.reconcile(records)
        } else {
            let count = records.len();
            self.cache.seed(records)?;
            count
        };
        self.cache.refresh_counter(self.gateway.as_ref()).await?;
        Ok(added)
    }

    async fn fetch_records(&self, source: &str) -> Result<Vec<MemoRecord>> {
        let tuples = self.gateway.fetch_memos().await.map_err(fetch_error)?;
        let (records, rejected) = self.schema.decode_all(&tuples);

        for (index, err) in &rejected {
            warn!("Skipping memo #{} from {}: {}", index, source, err);
            DECODE_ERRORS_TOTAL.with_label_values(&[source]).inc();
        }
        debug!(
            "Fetched {} memos ({} rejected) for {}",
            tuples.len(),
            rejected.len(),
            source
        );

        *self.rejected.write() = rejected;
        Ok(records)
    }

    /// Pay for a purchase with the active account
    ///
    /// A transport failure while refreshing the counter after confirmation
    /// still returns the receipt, but degrades the client.
    pub async fn purchase(&self, form: &mut PurchaseForm) -> Result<TxReceipt> {
        self.check_stream().await;
        let outcome = self.submitter.submit(form).await;
        if let Some(LedgerError::Transport(reason)) = self.submitter.take_refresh_fault() {
            self.degrade(&reason).await;
        }
        self.guarded(outcome).await
    }

    /// Withdraw collected funds; only succeeds for the ledger owner
    pub async fn withdraw(&self) -> Result<TxReceipt> {
        self.check_stream().await;
        let outcome = self.submitter.withdraw().await;
        self.guarded(outcome).await
    }

    /// Degrade if the gateway closed the event stream.
    ///
    /// Returns whether the client is still connected.
    pub async fn check_stream(&self) -> bool {
        let closed = {
            let slot = self.subscription.lock().await;
            matches!(slot.as_ref(), Some(s) if !s.is_active())
        };
        if closed {
            self.degrade("event stream closed").await;
        }
        self.session.is_connected()
    }

    async fn guarded<T>(&self, outcome: Result<T>) -> Result<T> {
        if let Err(LedgerError::Transport(reason)) = &outcome {
            self.degrade(reason).await;
        }
        outcome
    }

    async fn degrade(&self, reason: &str) {
        warn!("Ledger transport lost ({}); continuing unauthenticated", reason);
        self.disconnect().await;
    }

    /// Cached memo log in append order
    pub fn snapshot(&self) -> Vec<MemoRecord> {
        self.cache.snapshot()
    }

    /// Last observed purchase counter
    pub fn purchase_count(&self) -> u64 {
        self.cache.counter()
    }

    /// Tuples rejected by the schema on the most recent full fetch
    pub fn rejected_records(&self) -> Vec<(usize, DecodeError)> {
        self.rejected.read().clone()
    }

    pub fn active_account(&self) -> Option<Address> {
        self.session.active_account()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn subscriber_state(&self) -> SubscriberState {
        self.subscriber.state()
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn cache(&self) -> &LedgerCache {
        &self.cache
    }

    pub fn submitter(&self) -> &TransactionSubmitter {
        &self.submitter
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticProvider;
    use async_trait::async_trait;
    use memoledger_core::{
        parse_amount, Amount, EventSink, GatewayError, ListenerId, MemoryLedger, PendingTx,
        PurchaseCall, RawTuple, SchemaVersion,
    };

    fn eth(text: &str) -> Amount {
        parse_amount(text, 18).unwrap()
    }

    /// In-memory ledger that lands one outside purchase right after the
    /// first memo fetch, before the client gets to subscribe
    struct RacingLedger {
        inner: Arc<MemoryLedger>,
        after_first_fetch: parking_lot::Mutex<Option<PurchaseCall>>,
    }

    #[async_trait]
    impl LedgerGateway for RacingLedger {
        async fn submit_purchase(&self, call: PurchaseCall) -> std::result::Result<PendingTx, GatewayError> {
            self.inner.submit_purchase(call).await
        }

        async fn fetch_memos(&self) -> std::result::Result<Vec<RawTuple>, GatewayError> {
            let memos = self.inner.fetch_memos().await?;
            let racing = self.after_first_fetch.lock().take();
            if let Some(call) = racing {
                self.inner.submit_purchase(call).await?.wait().await?;
            }
            Ok(memos)
        }

        async fn fetch_purchase_count(&self) -> std::result::Result<u64, GatewayError> {
            self.inner.fetch_purchase_count().await
        }

        async fn withdraw(&self, from: Address) -> std::result::Result<PendingTx, GatewayError> {
            self.inner.withdraw(from).await
        }

        async fn subscribe(&self, sink: EventSink) -> std::result::Result<ListenerId, GatewayError> {
            self.inner.subscribe(sink).await
        }

        async fn unsubscribe(&self, id: ListenerId) -> std::result::Result<bool, GatewayError> {
            self.inner.unsubscribe(id).await
        }
    }

    fn client(ledger: Arc<MemoryLedger>, accounts: Vec<Address>) -> LedgerClient {
        LedgerClient::new(
            LedgerConfig::default(),
            ledger,
            Some(Arc::new(StaticProvider::new(accounts))),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let ledger = Arc::new(MemoryLedger::deploy(Address::from_low_u64(1), SchemaVersion::V2));
        let mut config = LedgerConfig::default();
        config.decimals = 60;
        assert!(matches!(
            LedgerClient::new(config, ledger, None),
            Err(LedgerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthenticated_client_is_inert() {
        let ledger = Arc::new(MemoryLedger::deploy(Address::from_low_u64(1), SchemaVersion::V2));
        let client = client(ledger.clone(), vec![Address::from_low_u64(2)]);

        assert!(matches!(client.refresh().await, Err(LedgerError::NotConnected)));
        let mut form = PurchaseForm::new("0.001");
        assert!(matches!(
            client.purchase(&mut form).await,
            Err(LedgerError::NotConnected)
        ));
        assert_eq!(ledger.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let ledger = Arc::new(MemoryLedger::deploy(Address::from_low_u64(1), SchemaVersion::V2));
        let client = client(ledger.clone(), vec![Address::from_low_u64(2)]);

        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert_eq!(ledger.listener_count(), 1);
        assert_eq!(client.subscriber_state(), SubscriberState::Attached);

        client.disconnect().await;
        assert_eq!(ledger.listener_count(), 0);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_transport_loss_degrades() {
        let ledger = Arc::new(MemoryLedger::deploy(Address::from_low_u64(1), SchemaVersion::V2));
        let customer = Address::from_low_u64(2);
        ledger.fund(customer, eth("1"));
        let client = client(ledger.clone(), vec![customer]);

        client.connect().await.unwrap();
        let mut form = PurchaseForm::new("0.001").with_name("Ada");
        client.purchase(&mut form).await.unwrap();
        while client.cache().len() < 1 {
            tokio::task::yield_now().await;
        }
        let before = client.snapshot();

        ledger.close_streams();
        assert!(matches!(
            client.refresh().await,
            Err(LedgerError::NotConnected) | Err(LedgerError::Transport(_))
        ));
        assert!(!client.is_connected());
        assert_eq!(client.snapshot(), before);

        ledger.restore_transport();
        client.connect().await.unwrap();
        assert_eq!(client.subscriber_state(), SubscriberState::Attached);
        assert_eq!(client.snapshot(), before);
    }

    #[tokio::test]
    async fn test_purchase_between_seed_and_subscribe_is_caught_up() {
        let inner = Arc::new(MemoryLedger::deploy(Address::from_low_u64(1), SchemaVersion::V2));
        let outsider = Address::from_low_u64(3);
        inner.fund(outsider, eth("1"));
        let gateway = Arc::new(RacingLedger {
            inner: inner.clone(),
            after_first_fetch: parking_lot::Mutex::new(Some(PurchaseCall {
                from: outsider,
                display_name: "Grace".to_string(),
                message: "just in time".to_string(),
                total: eth("0.001"),
                product_label: None,
                value: eth("0.001"),
            })),
        });
        let client = LedgerClient::new(
            LedgerConfig::default(),
            gateway,
            Some(Arc::new(StaticProvider::new(vec![Address::from_low_u64(2)]))),
        )
        .unwrap();

        client.connect().await.unwrap();

        let snapshot = client.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message, "just in time");
        assert_eq!(client.purchase_count(), 1);
        assert_eq!(inner.listener_count(), 1);

        client.disconnect().await;
    }
}
