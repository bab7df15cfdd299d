use crate::core::bus::EventBus;
use crate::core::cancel::CancelToken;
use crate::core::events::{
    AccountSnapshot, Direction, Event, EventPayload, Order, Position, PositionKey, Trade,
};
use crate::gateway::Gateway;
use crate::services::{Service, SERVICE_ACCOUNT};
use crate::types::{Symbol, Volume};
use crate::BoxedError;
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

/// Account & position service configuration
#[derive(Debug, Clone)]
pub struct AccountServiceConfig {
    /// Cadence of the background poll loop
    pub poll_interval: Duration,
    /// Re-query the account when the last successful query is older than this
    pub account_refresh_interval: Duration,
    /// Re-query positions when the last successful query is older than this
    pub position_refresh_interval: Duration,
    /// Trigger both queries immediately after every trade push
    pub resync_on_trade: bool,
}

impl Default for AccountServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            account_refresh_interval: Duration::from_secs(10),
            position_refresh_interval: Duration::from_secs(15),
            resync_on_trade: true,
        }
    }
}

/// Immutable point-in-time copy of the service's state
#[derive(Debug, Clone)]
pub struct AccountStateSnapshot {
    pub account: Option<AccountSnapshot>,
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
}

/// Account & position service
///
/// Hybrid synchronization: gateway pushes land immediately, and a background
/// poll loop re-queries each aspect independently when its last successful
/// query grows stale. Positions are keyed by `(symbol, direction)` and
/// replaced wholesale on update.
#[derive(Clone)]
pub struct AccountService {
    config: AccountServiceConfig,
    gateway: Arc<dyn Gateway>,
    bus: Arc<EventBus>,
    account: Arc<RwLock<Option<AccountSnapshot>>>,
    positions: Arc<DashMap<PositionKey, Position>>,
    orders: Arc<DashMap<String, Order>>,
    trades: Arc<Mutex<Vec<Trade>>>,
    last_account_query: Arc<Mutex<Option<Instant>>>,
    last_position_query: Arc<Mutex<Option<Instant>>>,
    cancel: Arc<Mutex<CancelToken>>,
    poll_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    running: Arc<AtomicBool>,
    wired: Arc<AtomicBool>,
}

impl AccountService {
    /// Create a new account & position service
    pub fn new(
        config: AccountServiceConfig,
        gateway: Arc<dyn Gateway>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            gateway,
            bus,
            account: Arc::new(RwLock::new(None)),
            positions: Arc::new(DashMap::new()),
            orders: Arc::new(DashMap::new()),
            trades: Arc::new(Mutex::new(Vec::new())),
            last_account_query: Arc::new(Mutex::new(None)),
            last_position_query: Arc::new(Mutex::new(None)),
            cancel: Arc::new(Mutex::new(CancelToken::new())),
            poll_task: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            wired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle an account snapshot pushed by the gateway
    pub fn on_account(&self, snapshot: AccountSnapshot) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        *self.account.write().unwrap() = Some(snapshot.clone());
        self.bus
            .publish(Event::new(EventPayload::Account(snapshot), SERVICE_ACCOUNT));
    }

    /// Handle a position pushed by the gateway; replaces the entry for the
    /// same `(symbol, direction)` key wholesale
    pub fn on_position(&self, position: Position) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.positions.insert(position.key(), position.clone());
        self.bus.publish(Event::new(
            EventPayload::Position(position),
            SERVICE_ACCOUNT,
        ));
    }

    /// Handle a trade pushed by the gateway
    ///
    /// Records the fill and, when configured, immediately triggers both an
    /// account and a position query so fills are reflected ahead of the
    /// next poll boundary. Trade events on the bus are owned by the
    /// execution service; this cache does not republish them.
    pub fn on_trade(&self, trade: Trade) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.trades.lock().unwrap().push(trade);

        if self.config.resync_on_trade {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let service = self.clone();
                    handle.spawn(async move {
                        service.refresh_account().await;
                        service.refresh_positions().await;
                    });
                }
                Err(_) => {
                    warn!("trade resync skipped: gateway callback context has no async runtime")
                }
            }
        }
    }

    /// Handle an order update pushed by the gateway (cache only; the
    /// execution service owns order events for orders it manages)
    pub fn on_order(&self, order: Order) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.orders.insert(order.id.clone(), order);
    }

    /// Issue an account query, stamping the success time
    pub async fn refresh_account(&self) -> bool {
        if self.gateway.query_account().await {
            *self.last_account_query.lock().unwrap() = Some(Instant::now());
            true
        } else {
            warn!("account query failed; retrying on the next poll cycle");
            false
        }
    }

    /// Issue a position query, stamping the success time
    pub async fn refresh_positions(&self) -> bool {
        if self.gateway.query_position().await {
            *self.last_position_query.lock().unwrap() = Some(Instant::now());
            true
        } else {
            warn!("position query failed; retrying on the next poll cycle");
            false
        }
    }

    fn account_refresh_due(&self) -> bool {
        self.last_account_query
            .lock()
            .unwrap()
            .map_or(true, |at| at.elapsed() >= self.config.account_refresh_interval)
    }

    fn position_refresh_due(&self) -> bool {
        self.last_position_query
            .lock()
            .unwrap()
            .map_or(true, |at| at.elapsed() >= self.config.position_refresh_interval)
    }

    /// Current account snapshot, if one has been received
    pub fn account(&self) -> Option<AccountSnapshot> {
        self.account.read().unwrap().clone()
    }

    /// Position for a `(symbol, direction)` key
    pub fn position(&self, symbol: &Symbol, direction: Direction) -> Option<Position> {
        self.positions
            .get(&(symbol.clone(), direction))
            .map(|entry| entry.value().clone())
    }

    /// Open volume for a `(symbol, direction)` key; zero when flat
    pub fn position_volume(&self, symbol: &Symbol, direction: Direction) -> Volume {
        self.position(symbol, direction)
            .map_or_else(Volume::zero, |p| p.volume)
    }

    /// Aggregate open volume across every position
    pub fn total_position_volume(&self) -> Volume {
        self.positions
            .iter()
            .fold(Volume::zero(), |acc, entry| acc + entry.value().volume)
    }

    /// Immutable point-in-time copy of account, positions, orders, trades
    pub fn snapshot(&self) -> AccountStateSnapshot {
        AccountStateSnapshot {
            account: self.account.read().unwrap().clone(),
            positions: self
                .positions
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
            orders: self
                .orders
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
            trades: self.trades.lock().unwrap().clone(),
        }
    }
}

#[async_trait]
impl Service for AccountService {
    fn name(&self) -> &str {
        SERVICE_ACCOUNT
    }

    async fn start(&self) -> Result<(), BoxedError> {
        self.running.store(true, Ordering::SeqCst);

        // Gateway handlers survive restarts; wire them once
        if !self.wired.swap(true, Ordering::SeqCst) {
            let service = self.clone();
            self.gateway
                .register_account_handler(Arc::new(move |snapshot| service.on_account(snapshot)));
            let service = self.clone();
            self.gateway
                .register_position_handler(Arc::new(move |position| service.on_position(position)));
            let service = self.clone();
            self.gateway
                .register_trade_handler(Arc::new(move |trade| service.on_trade(trade)));
            let service = self.clone();
            self.gateway
                .register_order_handler(Arc::new(move |order| service.on_order(order)));
        }

        let cancel = CancelToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();

        let service = self.clone();
        let handle = tokio::spawn(async move {
            debug!("account poll loop started");
            loop {
                sleep(service.config.poll_interval).await;
                if cancel.is_cancelled() {
                    break;
                }
                // Account and position staleness are tracked independently
                if service.account_refresh_due() {
                    service.refresh_account().await;
                }
                if cancel.is_cancelled() {
                    break;
                }
                if service.position_refresh_due() {
                    service.refresh_positions().await;
                }
            }
            debug!("account poll loop stopped");
        });
        *self.poll_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxedError> {
        self.cancel.lock().unwrap().cancel();
        let handle = self.poll_task.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("account poll task failed: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);

        // Caches are cleared in bulk when the owning service stops
        *self.account.write().unwrap() = None;
        self.positions.clear();
        self.orders.clear();
        self.trades.lock().unwrap().clear();
        *self.last_account_query.lock().unwrap() = None;
        *self.last_position_query.lock().unwrap() = None;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        let task_alive = self
            .poll_task
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished());
        self.running.load(Ordering::SeqCst) && task_alive
    }
}
