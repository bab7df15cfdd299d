use crate::core::cancel::CancelToken;
use crate::core::events::{Event, EventType};
use crate::core::journal::EventJournal;
use crate::BoxedError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// Handler invoked by the dispatch loop for every matching event
pub type EventHandler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap a synchronous closure as a bus handler
pub fn sync_handler<F>(f: F) -> EventHandler
where
    F: Fn(Arc<Event>) + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |event| {
        let f = f.clone();
        async move { f(event) }.boxed()
    })
}

/// Queue growth policy applied at publish time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// The queue grows without limit; a slow consumer never blocks producers
    Unbounded,
    /// Events arriving while `bound` entries are queued are dropped and
    /// counted rather than enqueued
    DropNewest { bound: usize },
}

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Queue bound and overflow behavior
    pub backpressure: BackpressurePolicy,
    /// Upper bound on how long the dispatch loop waits for the next event
    /// before re-checking the stop token
    pub idle_poll_interval: Duration,
    /// Durable append-only log path; None disables persistence
    pub journal_path: Option<PathBuf>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backpressure: BackpressurePolicy::Unbounded,
            idle_poll_interval: Duration::from_millis(100),
            journal_path: None,
        }
    }
}

#[derive(Clone)]
struct RegisteredHandler {
    id: String,
    handler: EventHandler,
}

type HandlerList = SmallVec<[RegisteredHandler; 4]>;

/// Typed publish/subscribe dispatcher
///
/// Producers publish from any context; a single dedicated task delivers
/// events FIFO to the handlers registered for each event type, so handler
/// code never runs concurrently with other handler code.
pub struct EventBus {
    config: EventBusConfig,
    handlers: Arc<RwLock<HashMap<EventType, HandlerList>>>,
    tx: mpsc::UnboundedSender<Arc<Event>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<Event>>>>,
    journal: Option<Arc<EventJournal>>,
    queue_depth: Arc<AtomicUsize>,
    dropped_events: Arc<AtomicU64>,
    cancel: CancelToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a new event bus; opens the journal when one is configured
    pub fn new(config: EventBusConfig) -> Result<Self, BoxedError> {
        let journal = match &config.journal_path {
            Some(path) => Some(Arc::new(EventJournal::open(path)?)),
            None => None,
        };
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            tx,
            rx: Mutex::new(Some(rx)),
            journal,
            queue_depth: Arc::new(AtomicUsize::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
            cancel: CancelToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Register a handler for an event type
    ///
    /// Handlers run in registration order. Re-registering an id already
    /// present for the type is a no-op.
    pub async fn register(
        &self,
        event_type: EventType,
        handler_id: impl Into<String>,
        handler: EventHandler,
    ) {
        let id = handler_id.into();
        let mut handlers = self.handlers.write().await;
        let list = handlers.entry(event_type).or_default();
        if list.iter().any(|h| h.id == id) {
            debug!("handler '{}' already registered for {} events", id, event_type);
            return;
        }
        list.push(RegisteredHandler { id, handler });
    }

    /// Remove a handler; an absent id is not an error
    pub async fn unregister(&self, event_type: EventType, handler_id: &str) {
        let mut handlers = self.handlers.write().await;
        if let Some(list) = handlers.get_mut(&event_type) {
            list.retain(|h| h.id != handler_id);
        }
    }

    /// Enqueue an event for dispatch
    ///
    /// Synchronous so gateway callbacks and timers can publish from their
    /// own contexts. When a journal is configured the event is appended
    /// first, best-effort. Returns false when the backpressure policy drops
    /// the event or the bus has been stopped.
    pub fn publish(&self, event: Event) -> bool {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&event) {
                warn!("failed to journal {} event: {}", event.event_type(), e);
            }
        }
        self.offer(Arc::new(event))
    }

    fn offer(&self, event: Arc<Event>) -> bool {
        if let BackpressurePolicy::DropNewest { bound } = self.config.backpressure {
            if self.queue_depth.load(Ordering::Relaxed) >= bound {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "event queue full ({} events), dropping {} event from '{}'",
                    bound,
                    event.event_type(),
                    event.source
                );
                return false;
            }
        }

        self.queue_depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.queue_depth.fetch_sub(1, Ordering::Relaxed);
            warn!("event bus is stopped, discarding event");
            return false;
        }
        true
    }

    /// Spawn the dispatch loop on a dedicated task
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("event bus dispatch loop already running");
            return;
        }
        let Some(mut rx) = self.rx.lock().await.take() else {
            warn!("event bus was already stopped and cannot be restarted");
            return;
        };

        let handlers = self.handlers.clone();
        let queue_depth = self.queue_depth.clone();
        let cancel = self.cancel.clone();
        let idle_poll_interval = self.config.idle_poll_interval;

        *task = Some(tokio::spawn(async move {
            info!("event dispatch loop started");
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match timeout(idle_poll_interval, rx.recv()).await {
                    Ok(Some(event)) => {
                        queue_depth.fetch_sub(1, Ordering::Relaxed);
                        Self::dispatch(&handlers, event).await;
                    }
                    Ok(None) => break,
                    // Idle; loop around to observe the stop token
                    Err(_) => continue,
                }
            }
            info!("event dispatch loop stopped");
        }));
    }

    /// Signal the dispatch loop to exit and wait for it to finish the
    /// event currently being delivered
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("event dispatch task failed: {}", e);
            }
        }
    }

    async fn dispatch(handlers: &RwLock<HashMap<EventType, HandlerList>>, event: Arc<Event>) {
        let event_type = event.event_type();
        let snapshot: HandlerList = {
            let guard = handlers.read().await;
            match guard.get(&event_type) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for registered in snapshot {
            // The closure call itself runs inside the guarded future, so a
            // panic anywhere in the handler is contained here.
            let guarded = AssertUnwindSafe(async { (registered.handler)(event.clone()).await })
                .catch_unwind();
            if guarded.await.is_err() {
                error!(
                    "handler '{}' panicked on {} event",
                    registered.id, event_type
                );
            }
        }
    }

    /// Republish every record of a durable log in original order
    ///
    /// Replayed events bypass the active journal so replaying does not
    /// duplicate the log being read. Consumers own idempotence under replay.
    pub async fn replay(&self, path: &Path) -> Result<usize, BoxedError> {
        let events = EventJournal::read_all(path)?;
        info!("replaying {} events from {}", events.len(), path.display());

        let mut republished = 0;
        for event in events {
            if self.offer(Arc::new(event)) {
                republished += 1;
            }
        }
        Ok(republished)
    }

    /// Events currently queued and not yet dispatched
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Events dropped by the backpressure policy since creation
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Number of handlers currently registered for a type
    pub async fn handler_count(&self, event_type: EventType) -> usize {
        let handlers = self.handlers.read().await;
        handlers.get(&event_type).map_or(0, |list| list.len())
    }

    /// Path of the configured journal, if any
    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_ref().map(|j| j.path())
    }
}
