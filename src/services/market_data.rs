use crate::core::bus::EventBus;
use crate::core::events::{Event, EventPayload, TickData};
use crate::gateway::Gateway;
use crate::services::{Service, SERVICE_MARKET_DATA};
use crate::types::Symbol;
use crate::BoxedError;
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, error, warn};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Callback invoked for every tick, in addition to the bus event
pub type TickCallback = Arc<dyn Fn(&TickData) + Send + Sync>;

/// Market data cache service
///
/// Manages reference-counted symbol subscriptions against the gateway and
/// keeps the single most recent tick per symbol. There is no retained
/// history: a new tick overwrites the cached value.
#[derive(Clone)]
pub struct MarketDataService {
    gateway: Arc<dyn Gateway>,
    bus: Arc<EventBus>,
    /// Subscriber ids per symbol; the external subscription exists exactly
    /// while this set is non-empty
    subscribers: Arc<Mutex<HashMap<Symbol, HashSet<String>>>>,
    latest: Arc<DashMap<Symbol, TickData>>,
    tick_callbacks: Arc<RwLock<Vec<(String, TickCallback)>>>,
    running: Arc<AtomicBool>,
    wired: Arc<AtomicBool>,
}

impl MarketDataService {
    /// Create a new market data service
    pub fn new(gateway: Arc<dyn Gateway>, bus: Arc<EventBus>) -> Self {
        Self {
            gateway,
            bus,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            latest: Arc::new(DashMap::new()),
            tick_callbacks: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            wired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add a subscriber to a symbol
    ///
    /// Only the transition from no subscribers to one subscriber touches the
    /// gateway. A refused gateway subscription rolls the membership change
    /// back and fails the call.
    pub async fn subscribe(
        &self,
        symbol: impl Into<Symbol>,
        subscriber_id: impl Into<String>,
    ) -> Result<(), BoxedError> {
        let symbol = symbol.into();
        let subscriber_id = subscriber_id.into();

        let mut subscribers = self.subscribers.lock().await;
        let entry = subscribers.entry(symbol.clone()).or_default();
        let first = entry.is_empty();
        if !entry.insert(subscriber_id.clone()) {
            return Ok(());
        }

        if first && !self.gateway.subscribe(symbol.as_str()).await {
            entry.remove(&subscriber_id);
            subscribers.remove(&symbol);
            return Err(format!("gateway refused subscription for {}", symbol).into());
        }

        debug!("subscriber '{}' added for {}", subscriber_id, symbol);
        Ok(())
    }

    /// Remove a subscriber from a symbol
    ///
    /// When the set becomes empty the gateway subscription is released and
    /// the cached tick evicted. Unknown symbols or subscribers are not an
    /// error.
    pub async fn unsubscribe(&self, symbol: &str, subscriber_id: &str) -> Result<(), BoxedError> {
        let mut subscribers = self.subscribers.lock().await;
        let Some(entry) = subscribers.get_mut(symbol) else {
            return Ok(());
        };
        if !entry.remove(subscriber_id) {
            return Ok(());
        }

        if entry.is_empty() {
            subscribers.remove(symbol);
            self.latest.remove(symbol);
            if !self.gateway.unsubscribe(symbol).await {
                warn!("gateway refused unsubscription for {}", symbol);
            }
            debug!("released gateway subscription for {}", symbol);
        }
        Ok(())
    }

    /// Handle a tick pushed by the gateway
    ///
    /// Overwrites the cached value, invokes every registered callback (each
    /// isolated from the others), then publishes a tick event.
    pub fn on_tick(&self, tick: TickData) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        self.latest.insert(tick.symbol.clone(), tick.clone());

        let callbacks = self.tick_callbacks.read().unwrap().clone();
        for (id, callback) in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&tick))).is_err() {
                error!("tick callback '{}' panicked on {}", id, tick.symbol);
            }
        }

        self.bus
            .publish(Event::new(EventPayload::Tick(tick), SERVICE_MARKET_DATA));
    }

    /// Most recent tick for a symbol, if one is cached
    pub fn get_latest(&self, symbol: &str) -> Option<TickData> {
        self.latest.get(symbol).map(|entry| entry.value().clone())
    }

    /// Register a per-tick callback; re-registering an id replaces it
    pub fn register_tick_callback(&self, id: impl Into<String>, callback: TickCallback) {
        let id = id.into();
        let mut callbacks = self.tick_callbacks.write().unwrap();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.push((id, callback));
    }

    /// Remove a per-tick callback; absent ids are not an error
    pub fn unregister_tick_callback(&self, id: &str) {
        self.tick_callbacks
            .write()
            .unwrap()
            .retain(|(existing, _)| existing != id);
    }

    /// Number of subscribers currently attached to a symbol
    pub async fn subscriber_count(&self, symbol: &str) -> usize {
        let subscribers = self.subscribers.lock().await;
        subscribers.get(symbol).map_or(0, |set| set.len())
    }

    /// Symbols with at least one subscriber
    pub async fn active_symbols(&self) -> Vec<Symbol> {
        let subscribers = self.subscribers.lock().await;
        subscribers.keys().cloned().collect()
    }
}

#[async_trait]
impl Service for MarketDataService {
    fn name(&self) -> &str {
        SERVICE_MARKET_DATA
    }

    async fn start(&self) -> Result<(), BoxedError> {
        self.running.store(true, Ordering::SeqCst);

        // Gateway handlers survive restarts; wire them once
        if !self.wired.swap(true, Ordering::SeqCst) {
            let service = self.clone();
            self.gateway
                .register_tick_handler(Arc::new(move |tick| service.on_tick(tick)));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxedError> {
        self.running.store(false, Ordering::SeqCst);

        let symbols: Vec<Symbol> = {
            let mut subscribers = self.subscribers.lock().await;
            let symbols = subscribers.keys().cloned().collect();
            subscribers.clear();
            symbols
        };
        for symbol in &symbols {
            if !self.gateway.unsubscribe(symbol.as_str()).await {
                warn!("gateway refused unsubscription for {} during stop", symbol);
            }
        }
        self.latest.clear();
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
