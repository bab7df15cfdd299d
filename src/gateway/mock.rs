use crate::core::events::{AccountSnapshot, Order, OrderRequest, Position, TickData, Trade};
use crate::gateway::{
    AccountHandler, Gateway, OrderHandler, PositionHandler, TickHandler, TradeHandler,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// Mock implementation of the Gateway trait for testing
///
/// Behavior is scripted through the `set_*` methods; pushes are driven
/// through the `push_*` methods, which invoke the registered handlers the
/// way a real gateway's session threads would. Queries answer by replaying
/// the configured snapshots through the push handlers.
#[derive(Default)]
pub struct MockGateway {
    connected: AtomicBool,
    data_channel_live: AtomicBool,
    command_channel_live: AtomicBool,
    /// Number of connect() calls that should fail before one succeeds
    connect_failures: AtomicU32,
    fail_queries: AtomicBool,
    reject_orders: AtomicBool,
    fail_cancels: AtomicBool,
    failing_subscriptions: RwLock<HashSet<String>>,

    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<String>>,
    sent_orders: Mutex<Vec<OrderRequest>>,
    cancel_calls: Mutex<Vec<String>>,
    account_queries: AtomicU32,
    position_queries: AtomicU32,
    next_order_ref: AtomicU64,

    account: RwLock<Option<AccountSnapshot>>,
    positions: RwLock<Vec<Position>>,

    tick_handlers: RwLock<Vec<TickHandler>>,
    order_handlers: RwLock<Vec<OrderHandler>>,
    trade_handlers: RwLock<Vec<TradeHandler>>,
    account_handlers: RwLock<Vec<AccountHandler>>,
    position_handlers: RwLock<Vec<PositionHandler>>,
}

impl MockGateway {
    /// Create a mock gateway with both channels live once connected
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.data_channel_live.store(true, Ordering::SeqCst);
        gateway.command_channel_live.store(true, Ordering::SeqCst);
        gateway
    }

    /// Script channel liveness observed after connect
    pub fn set_channel_liveness(&self, data: bool, command: bool) {
        self.data_channel_live.store(data, Ordering::SeqCst);
        self.command_channel_live.store(command, Ordering::SeqCst);
    }

    /// Fail the next `count` connect attempts
    pub fn set_connect_failures(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Make subscribe() fail for a symbol
    pub fn fail_subscription(&self, symbol: &str) {
        self.failing_subscriptions
            .write()
            .unwrap()
            .insert(symbol.to_string());
    }

    /// Make send_order() return None
    pub fn set_reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    /// Make cancel_order() return false
    pub fn set_fail_cancels(&self, fail: bool) {
        self.fail_cancels.store(fail, Ordering::SeqCst);
    }

    /// Make account/position queries return false
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Snapshot replayed through the account handler on query_account()
    pub fn set_account(&self, snapshot: AccountSnapshot) {
        *self.account.write().unwrap() = Some(snapshot);
    }

    /// Positions replayed through the position handler on query_position()
    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.write().unwrap() = positions;
    }

    /// Push a tick to every registered tick handler
    pub fn push_tick(&self, tick: TickData) {
        for handler in self.tick_handlers.read().unwrap().iter() {
            handler(tick.clone());
        }
    }

    /// Push an order update to every registered order handler
    pub fn push_order(&self, order: Order) {
        for handler in self.order_handlers.read().unwrap().iter() {
            handler(order.clone());
        }
    }

    /// Push a trade to every registered trade handler
    pub fn push_trade(&self, trade: Trade) {
        for handler in self.trade_handlers.read().unwrap().iter() {
            handler(trade.clone());
        }
    }

    /// Push an account snapshot to every registered account handler
    pub fn push_account(&self, snapshot: AccountSnapshot) {
        for handler in self.account_handlers.read().unwrap().iter() {
            handler(snapshot.clone());
        }
    }

    /// Push a position to every registered position handler
    pub fn push_position(&self, position: Position) {
        for handler in self.position_handlers.read().unwrap().iter() {
            handler(position.clone());
        }
    }

    /// Symbols subscribe() was called with, in call order
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().unwrap().clone()
    }

    /// Symbols unsubscribe() was called with, in call order
    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.unsubscribe_calls.lock().unwrap().clone()
    }

    /// Requests accepted by send_order(), in call order
    pub fn sent_orders(&self) -> Vec<OrderRequest> {
        self.sent_orders.lock().unwrap().clone()
    }

    /// Order refs cancel_order() was called with, in call order
    pub fn cancel_calls(&self) -> Vec<String> {
        self.cancel_calls.lock().unwrap().clone()
    }

    /// Number of query_account() calls
    pub fn account_queries(&self) -> u32 {
        self.account_queries.load(Ordering::SeqCst)
    }

    /// Number of query_position() calls
    pub fn position_queries(&self) -> u32 {
        self.position_queries.load(Ordering::SeqCst)
    }

    /// Whether connect() has succeeded and disconnect() has not been called
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn connect(&self) -> bool {
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return false;
        }
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_data_channel_live(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.data_channel_live.load(Ordering::SeqCst)
    }

    async fn is_command_channel_live(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.command_channel_live.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, symbol: &str) -> bool {
        if self.failing_subscriptions.read().unwrap().contains(symbol) {
            return false;
        }
        self.subscribe_calls.lock().unwrap().push(symbol.to_string());
        true
    }

    async fn unsubscribe(&self, symbol: &str) -> bool {
        self.unsubscribe_calls
            .lock()
            .unwrap()
            .push(symbol.to_string());
        true
    }

    async fn send_order(&self, request: &OrderRequest) -> Option<String> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return None;
        }
        self.sent_orders.lock().unwrap().push(request.clone());
        let seq = self.next_order_ref.fetch_add(1, Ordering::SeqCst) + 1;
        Some(format!("mock-{}", seq))
    }

    async fn cancel_order(&self, order_ref: &str) -> bool {
        self.cancel_calls.lock().unwrap().push(order_ref.to_string());
        !self.fail_cancels.load(Ordering::SeqCst)
    }

    async fn query_account(&self) -> bool {
        self.account_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return false;
        }
        let snapshot = self.account.read().unwrap().clone();
        if let Some(snapshot) = snapshot {
            self.push_account(snapshot);
        }
        true
    }

    async fn query_position(&self) -> bool {
        self.position_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return false;
        }
        let positions = self.positions.read().unwrap().clone();
        for position in positions {
            self.push_position(position);
        }
        true
    }

    fn register_tick_handler(&self, handler: TickHandler) {
        self.tick_handlers.write().unwrap().push(handler);
    }

    fn register_order_handler(&self, handler: OrderHandler) {
        self.order_handlers.write().unwrap().push(handler);
    }

    fn register_trade_handler(&self, handler: TradeHandler) {
        self.trade_handlers.write().unwrap().push(handler);
    }

    fn register_account_handler(&self, handler: AccountHandler) {
        self.account_handlers.write().unwrap().push(handler);
    }

    fn register_position_handler(&self, handler: PositionHandler) {
        self.position_handlers.write().unwrap().push(handler);
    }
}
