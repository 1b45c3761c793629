//! Ordered, deduplicated local view of the ledger's memo log
//!
//! Records reach the cache from a one-time seed, from the live event
//! stream and from manual refreshes. Every mutation goes through one mutex,
//! so the duplicate check and the insert are a single step.

use memoledger_core::{LedgerError, LedgerGateway, MemoIdentity, MemoRecord, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::metrics::{DUPLICATES_DROPPED_TOTAL, MEMOS_APPENDED_TOTAL};
use crate::fetch_error;

/// Default number of trailing records checked for duplicates
pub const DEFAULT_DEDUP_WINDOW: usize = 64;

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

/// Where an appended record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendSource {
    Event,
    Refresh,
}

impl AppendSource {
    fn label(&self) -> &'static str {
        match self {
            AppendSource::Event => "event",
            AppendSource::Refresh => "refresh",
        }
    }
}

struct CacheInner {
    records: Vec<MemoRecord>,
    seeded: bool,
    appended_this_session: bool,
    counter: u64,
    counter_ticket: u64,
}

/// Local memo log and purchase counter
pub struct LedgerCache {
    inner: Mutex<CacheInner>,
    next_ticket: AtomicU64,
    dedup_window: usize,
}

impl LedgerCache {
    pub fn new() -> Self {
        Self::with_dedup_window(DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_dedup_window(dedup_window: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                records: Vec::new(),
                seeded: false,
                appended_this_session: false,
                counter: 0,
                counter_ticket: 0,
            }),
            next_ticket: AtomicU64::new(0),
            dedup_window: dedup_window.max(1),
        }
    }

    /// Replace the whole sequence with a full fetch.
    ///
    /// Only valid before any append in the current session.
    pub fn seed(&self, records: Vec<MemoRecord>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.appended_this_session {
            return Err(LedgerError::InvalidState(
                "cannot seed after records were appended in this session".to_string(),
            ));
        }
        info!("Seeding cache with {} memos", records.len());
        inner.records = records;
        inner.seeded = true;
        Ok(())
    }

    /// Add a record at the tail unless an identical one sits in the tail window
    pub fn append(&self, record: MemoRecord, source: AppendSource) -> AppendOutcome {
        let mut inner = self.inner.lock();
        self.append_locked(&mut inner, record, source)
    }

    fn append_locked(
        &self,
        inner: &mut CacheInner,
        record: MemoRecord,
        source: AppendSource,
    ) -> AppendOutcome {
        inner.appended_this_session = true;

        let identity = record.identity();
        let duplicate = inner
            .records
            .iter()
            .rev()
            .take(self.dedup_window)
            .any(|r| r.identity() == identity);

        if duplicate {
            debug!("Dropping duplicate memo from {} ({})", record.payer, source.label());
            DUPLICATES_DROPPED_TOTAL.inc();
            return AppendOutcome::Duplicate;
        }

        debug!("Appending memo from {} ({})", record.payer, source.label());
        MEMOS_APPENDED_TOTAL.with_label_values(&[source.label()]).inc();
        inner.records.push(record);
        AppendOutcome::Appended
    }

    /// Merge a full fetch into an already-seeded log.
    ///
    /// Fetched records already held (matched by identity, with multiplicity)
    /// are skipped; the rest go through the append path in fetch order.
    /// Returns how many records were added.
    pub fn reconcile(&self, fetched: Vec<MemoRecord>) -> usize {
        let mut inner = self.inner.lock();

        let mut held: HashMap<MemoIdentity, usize> = HashMap::new();
        for record in &inner.records {
            *held.entry(record.identity()).or_insert(0) += 1;
        }

        let mut added = 0;
        for record in fetched {
            if let Some(count) = held.get_mut(&record.identity()) {
                if *count > 0 {
                    *count -= 1;
                    continue;
                }
            }
            if self.append_locked(&mut inner, record, AppendSource::Refresh) == AppendOutcome::Appended
            {
                added += 1;
            }
        }

        if added > 0 {
            info!("Refresh added {} memos", added);
        }
        added
    }

    /// Poll the ledger's purchase counter.
    ///
    /// Refreshes apply in the order they were issued: a response to an
    /// earlier refresh never overwrites a later one, and the counter never
    /// goes backwards.
    pub async fn refresh_counter(&self, gateway: &dyn LedgerGateway) -> Result<u64> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = gateway.fetch_purchase_count().await.map_err(fetch_error)?;

        let mut inner = self.inner.lock();
        if ticket > inner.counter_ticket {
            inner.counter_ticket = ticket;
            inner.counter = inner.counter.max(fetched);
        } else {
            debug!("Discarding stale counter refresh #{} ({})", ticket, fetched);
        }
        Ok(inner.counter)
    }

    /// Start a new session: seeding becomes legal again, records are kept
    pub fn begin_session(&self) {
        self.inner.lock().appended_this_session = false;
    }

    /// Records in append order
    pub fn snapshot(&self) -> Vec<MemoRecord> {
        self.inner.lock().records.clone()
    }

    pub fn counter(&self) -> u64 {
        self.inner.lock().counter
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_seeded(&self) -> bool {
        self.inner.lock().seeded
    }

    pub fn dedup_window(&self) -> usize {
        self.dedup_window
    }
}

impl Default for LedgerCache {
    fn default() -> Self {
        Self::new()
    }
}
