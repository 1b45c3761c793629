//! Live append-event delivery into the cache

use memoledger_core::{
    LedgerError, LedgerGateway, ListenerId, RawTuple, Result, SchemaDescriptor,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{AppendSource, LedgerCache};
use crate::fetch_error;
use crate::metrics::DECODE_ERRORS_TOTAL;
use crate::session::SessionManager;

/// Lifecycle of the event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Detached,
    Attaching,
    Attached,
}

/// Current state plus the listener that owns it
struct Slot {
    state: SubscriberState,
    owner: Option<ListenerId>,
}

impl Slot {
    /// Return to `Detached` if `listener_id` still owns the slot
    fn release(&mut self, listener_id: ListenerId) -> bool {
        if self.owner != Some(listener_id) {
            return false;
        }
        self.owner = None;
        self.state = SubscriberState::Detached;
        true
    }
}

/// Registers with the gateway and feeds decoded events to the cache
pub struct EventSubscriber {
    gateway: Arc<dyn LedgerGateway>,
    cache: Arc<LedgerCache>,
    schema: SchemaDescriptor,
    slot: Arc<RwLock<Slot>>,
}

impl EventSubscriber {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        cache: Arc<LedgerCache>,
        schema: SchemaDescriptor,
    ) -> Self {
        Self {
            gateway,
            cache,
            schema,
            slot: Arc::new(RwLock::new(Slot {
                state: SubscriberState::Detached,
                owner: None,
            })),
        }
    }

    /// Start listening for append events.
    ///
    /// Requires a connected session. Only one subscription may be live at a
    /// time; a subscription whose stream was closed by the gateway counts as
    /// detached.
    pub async fn attach(&self, session: &SessionManager) -> Result<Subscription> {
        session.require_account()?;

        {
            let mut slot = self.slot.write();
            if slot.state != SubscriberState::Detached {
                return Err(LedgerError::InvalidState(format!(
                    "event subscriber is {:?}",
                    slot.state
                )));
            }
            slot.state = SubscriberState::Attaching;
        }

        let (sink, events) = mpsc::unbounded_channel();
        let listener_id = match self.gateway.subscribe(sink).await {
            Ok(id) => id,
            Err(e) => {
                self.slot.write().state = SubscriberState::Detached;
                warn!("Failed to subscribe to append events: {}", e);
                return Err(fetch_error(e));
            }
        };

        let (stop, stopped) = oneshot::channel();
        {
            let mut slot = self.slot.write();
            slot.state = SubscriberState::Attached;
            slot.owner = Some(listener_id);
        }
        let task = tokio::spawn(run_listener(
            listener_id,
            events,
            stopped,
            self.cache.clone(),
            self.schema.clone(),
            self.slot.clone(),
        ));

        info!("Listening for append events as {}", listener_id);

        Ok(Subscription {
            listener_id,
            gateway: self.gateway.clone(),
            stop: Some(stop),
            task: Some(task),
            slot: self.slot.clone(),
            detached: false,
        })
    }

    pub fn state(&self) -> SubscriberState {
        self.slot.read().state
    }

    pub fn is_attached(&self) -> bool {
        self.state() == SubscriberState::Attached
    }
}

/// Handle to a live registration.
///
/// [`Subscription::detach`] unregisters and waits for the listener task.
/// Dropping the handle without detaching stops the task and unregisters in
/// the background.
pub struct Subscription {
    listener_id: ListenerId,
    gateway: Arc<dyn LedgerGateway>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    slot: Arc<RwLock<Slot>>,
    detached: bool,
}

impl Subscription {
    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    /// Whether the listener task is still receiving
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Unregister exactly this listener and stop its task.
    ///
    /// The subscriber returns to `Detached` only if this listener still owns
    /// it; a stale handle leaves a newer subscription alone. Returns whether
    /// the gateway still held the registration.
    pub async fn detach(mut self) -> bool {
        self.detached = true;
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let removed = match self.gateway.unsubscribe(self.listener_id).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Failed to unregister listener {}: {}", self.listener_id, e);
                false
            }
        };

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Listener task for {} ended abnormally: {}", self.listener_id, e);
            }
        }
        self.slot.write().release(self.listener_id);

        debug!("Detached listener {} (registered: {})", self.listener_id, removed);
        removed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        // Dropping the stop sender ends the listener task
        self.stop.take();
        self.slot.write().release(self.listener_id);

        let gateway = self.gateway.clone();
        let listener_id = self.listener_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = gateway.unsubscribe(listener_id).await {
                        warn!("Failed to unregister dropped listener {}: {}", listener_id, e);
                    }
                });
                debug!("Dropped listener {} without detach", listener_id);
            }
            Err(_) => warn!(
                "Listener {} dropped outside a runtime; registration left with the gateway",
                listener_id
            ),
        }
    }
}

async fn run_listener(
    listener_id: ListenerId,
    mut events: mpsc::UnboundedReceiver<RawTuple>,
    mut stopped: oneshot::Receiver<()>,
    cache: Arc<LedgerCache>,
    schema: SchemaDescriptor,
    slot: Arc<RwLock<Slot>>,
) {
    loop {
        tokio::select! {
            _ = &mut stopped => {
                debug!("Listener {} stopped", listener_id);
                break;
            }
            event = events.recv() => match event {
                Some(tuple) => handle_event(&cache, &schema, &tuple),
                None => {
                    warn!("Append event stream for {} closed", listener_id);
                    slot.write().release(listener_id);
                    break;
                }
            }
        }
    }
}

fn handle_event(cache: &LedgerCache, schema: &SchemaDescriptor, tuple: &RawTuple) {
    match schema.decode_memo(tuple) {
        Ok(record) => {
            cache.append(record, AppendSource::Event);
        }
        Err(e) => {
            warn!("Dropping undecodable append event: {}", e);
            DECODE_ERRORS_TOTAL.with_label_values(&["event"]).inc();
        }
    }
}
