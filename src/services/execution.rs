use crate::core::bus::EventBus;
use crate::core::events::{
    Event, EventPayload, EventType, Order, OrderRequest, Signal, SignalKind, Trade,
};
use crate::gateway::Gateway;
use crate::services::{MarketDataService, RiskService, Service, SERVICE_EXECUTION};
use crate::BoxedError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

const SIGNAL_HANDLER_ID: &str = "execution.signals";

/// Callback invoked for every order update, in addition to the bus event
pub type OrderCallback = Arc<dyn Fn(&Order) + Send + Sync>;
/// Callback invoked for every trade, in addition to the bus event
pub type TradeCallback = Arc<dyn Fn(&Trade) + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    orders_sent: AtomicU64,
    orders_rejected: AtomicU64,
    cancels_requested: AtomicU64,
    trades_received: AtomicU64,
}

/// Execution counters snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStats {
    pub orders_sent: u64,
    pub orders_rejected: u64,
    pub cancels_requested: u64,
    pub trades_received: u64,
    pub active_orders: usize,
}

/// Order execution service
///
/// Converts strategy signals into gateway orders behind the risk gate,
/// tracks the order/trade lifecycle pushed back by the gateway, and indexes
/// active orders by strategy tag for bulk cancellation.
#[derive(Clone)]
pub struct ExecutionService {
    gateway: Arc<dyn Gateway>,
    bus: Arc<EventBus>,
    risk: Arc<RiskService>,
    /// Optional tick cache used to price market orders for margin checks
    market_data: Option<Arc<MarketDataService>>,
    /// Local order records by locally minted id
    orders: Arc<DashMap<String, Order>>,
    /// Gateway order_ref -> local id
    ref_to_id: Arc<DashMap<String, String>>,
    /// Local id -> gateway order_ref
    id_to_ref: Arc<DashMap<String, String>>,
    /// Strategy tag -> local ids ever minted under that tag
    strategy_index: Arc<DashMap<String, Vec<String>>>,
    trades: Arc<Mutex<Vec<Trade>>>,
    order_callbacks: Arc<RwLock<Vec<(String, OrderCallback)>>>,
    trade_callbacks: Arc<RwLock<Vec<(String, TradeCallback)>>>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    wired: Arc<AtomicBool>,
}

/// Strategy tag from a `{strategy}_{action}` reference string
fn parse_strategy_tag(reference: &str) -> &str {
    reference
        .rsplit_once('_')
        .map_or(reference, |(strategy, _)| strategy)
}

impl ExecutionService {
    /// Create a new execution service
    pub fn new(
        gateway: Arc<dyn Gateway>,
        bus: Arc<EventBus>,
        risk: Arc<RiskService>,
        market_data: Option<Arc<MarketDataService>>,
    ) -> Self {
        Self {
            gateway,
            bus,
            risk,
            market_data,
            orders: Arc::new(DashMap::new()),
            ref_to_id: Arc::new(DashMap::new()),
            id_to_ref: Arc::new(DashMap::new()),
            strategy_index: Arc::new(DashMap::new()),
            trades: Arc::new(Mutex::new(Vec::new())),
            order_callbacks: Arc::new(RwLock::new(Vec::new())),
            trade_callbacks: Arc::new(RwLock::new(Vec::new())),
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(false)),
            wired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the risk gate and forward the request to the gateway
    ///
    /// A risk rejection returns None; an advisory with a usable suggested
    /// volume substitutes that volume and proceeds. On gateway acceptance a
    /// local order record is minted under a fresh id and indexed by the
    /// strategy tag parsed from the request reference.
    pub async fn send_order(&self, request: OrderRequest) -> Option<String> {
        if !self.running.load(Ordering::SeqCst) {
            warn!("send_order while execution service is not running");
            return None;
        }

        let mark_price = self
            .market_data
            .as_ref()
            .and_then(|md| md.get_latest(request.symbol.as_str()))
            .map(|tick| tick.last_price);

        let check = self.risk.check_order(&request, mark_price);
        let mut request = request;
        if !check.approved {
            match check.suggested_volume.filter(|v| !v.is_zero()) {
                Some(suggested) => {
                    info!(
                        "substituting risk-suggested volume {} for {} (requested {})",
                        suggested, request.symbol, request.volume
                    );
                    request.volume = suggested;
                }
                None => {
                    self.counters.orders_rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "order for {} rejected at level {:?}: {}",
                        request.symbol,
                        check.level,
                        check.reason.as_deref().unwrap_or("unspecified")
                    );
                    return None;
                }
            }
        }

        let Some(order_ref) = self.gateway.send_order(&request).await else {
            self.counters.orders_rejected.fetch_add(1, Ordering::Relaxed);
            error!("gateway refused order for {}", request.symbol);
            return None;
        };

        let order_id = Uuid::new_v4().to_string();
        let tag = parse_strategy_tag(&request.reference).to_string();
        let order = Order::from_request(order_id.clone(), &request, tag.clone());

        self.orders.insert(order_id.clone(), order);
        self.ref_to_id.insert(order_ref.clone(), order_id.clone());
        self.id_to_ref.insert(order_id.clone(), order_ref);
        self.strategy_index
            .entry(tag)
            .or_default()
            .push(order_id.clone());
        self.counters.orders_sent.fetch_add(1, Ordering::Relaxed);

        debug!("order {} submitted for {}", order_id, request.symbol);
        Some(order_id)
    }

    /// Forward a cancel request for a tracked, still-active order
    ///
    /// The local record is only marked cancelled when the gateway later
    /// pushes the matching order update; cancellation is asynchronous.
    pub async fn cancel_order(&self, order_id: &str) -> bool {
        let status = match self.orders.get(order_id) {
            Some(entry) => entry.status,
            None => {
                warn!("cancel requested for unknown order {}", order_id);
                return false;
            }
        };
        if status.is_terminal() {
            warn!("cancel requested for order {} already {:?}", order_id, status);
            return false;
        }
        let Some(order_ref) = self.id_to_ref.get(order_id).map(|r| r.value().clone()) else {
            warn!("no gateway reference for order {}", order_id);
            return false;
        };

        self.counters.cancels_requested.fetch_add(1, Ordering::Relaxed);
        self.gateway.cancel_order(&order_ref).await
    }

    /// Consume a strategy signal
    ///
    /// A trade signal becomes an order request, limit when priced and market
    /// otherwise, referenced `{strategy}_{action}`. A risk signal with the
    /// `cancel_all` action bulk-cancels the symbol's active orders.
    pub async fn process_signal(&self, signal: Signal) -> Option<String> {
        match signal.kind {
            SignalKind::Trade => {
                let reference = format!("{}_{}", signal.strategy_name, signal.action);
                let request = match signal.price {
                    Some(price) => OrderRequest::limit(
                        signal.symbol.clone(),
                        signal.direction,
                        signal.volume,
                        price,
                        reference,
                    ),
                    None => OrderRequest::market(
                        signal.symbol.clone(),
                        signal.direction,
                        signal.volume,
                        reference,
                    ),
                };
                self.send_order(request).await
            }
            SignalKind::Risk => {
                if signal.action == "cancel_all" {
                    let attempted = self.cancel_symbol_orders(signal.symbol.as_str()).await;
                    info!(
                        "risk signal from {} cancelled {} active orders for {}",
                        signal.strategy_name, attempted, signal.symbol
                    );
                } else {
                    warn!("unsupported risk signal action '{}'", signal.action);
                }
                None
            }
        }
    }

    /// Cancel every active order for a symbol, returning attempts
    pub async fn cancel_symbol_orders(&self, symbol: &str) -> usize {
        let ids: Vec<String> = self
            .orders
            .iter()
            .filter(|entry| entry.value().is_active() && entry.value().symbol.as_str() == symbol)
            .map(|entry| entry.key().clone())
            .collect();

        let mut attempted = 0;
        for id in ids {
            self.cancel_order(&id).await;
            attempted += 1;
        }
        attempted
    }

    /// Cancel every active order indexed under a strategy, optionally
    /// filtered by symbol, returning attempts
    pub async fn cancel_strategy_orders(&self, strategy: &str, symbol: Option<&str>) -> usize {
        let ids: Vec<String> = self
            .strategy_index
            .get(strategy)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut attempted = 0;
        for id in ids {
            let eligible = self.orders.get(&id).map_or(false, |order| {
                order.is_active() && symbol.map_or(true, |s| order.symbol.as_str() == s)
            });
            if eligible {
                self.cancel_order(&id).await;
                attempted += 1;
            }
        }
        attempted
    }

    /// Handle an order update pushed by the gateway
    ///
    /// The push is keyed by the gateway's order_ref; updates for unknown
    /// refs (e.g. orders from another session) are ignored.
    pub fn on_order(&self, update: Order) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let Some(order_id) = self.ref_to_id.get(&update.id).map(|id| id.value().clone()) else {
            debug!("order update for unknown ref {}", update.id);
            return;
        };

        let updated = {
            let Some(mut entry) = self.orders.get_mut(&order_id) else {
                return;
            };
            entry.apply_traded(update.traded);
            entry.apply_status(update.status);
            entry.clone()
        };

        let callbacks = self.order_callbacks.read().unwrap().clone();
        for (id, callback) in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&updated))).is_err() {
                error!("order callback '{}' panicked on order {}", id, updated.id);
            }
        }
        self.bus
            .publish(Event::new(EventPayload::Order(updated), SERVICE_EXECUTION));
    }

    /// Handle a trade pushed by the gateway
    ///
    /// Raises the matching order's traded volume and republishes the trade
    /// under the local order id.
    pub fn on_trade(&self, trade: Trade) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let Some(order_id) = self.ref_to_id.get(&trade.order_id).map(|id| id.value().clone())
        else {
            debug!("trade for unknown order ref {}", trade.order_id);
            return;
        };

        let normalized = Trade {
            order_id,
            ..trade
        };
        if let Some(mut entry) = self.orders.get_mut(&normalized.order_id) {
            let total = entry.traded + normalized.volume;
            entry.apply_traded(total);
        }
        self.trades.lock().unwrap().push(normalized.clone());
        self.counters.trades_received.fetch_add(1, Ordering::Relaxed);

        let callbacks = self.trade_callbacks.read().unwrap().clone();
        for (id, callback) in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&normalized))).is_err() {
                error!("trade callback '{}' panicked on trade {}", id, normalized.id);
            }
        }
        self.bus
            .publish(Event::new(EventPayload::Trade(normalized), SERVICE_EXECUTION));
    }

    /// Register an order update callback; re-registering an id replaces it
    pub fn register_order_callback(&self, id: impl Into<String>, callback: OrderCallback) {
        let id = id.into();
        let mut callbacks = self.order_callbacks.write().unwrap();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.push((id, callback));
    }

    /// Register a trade callback; re-registering an id replaces it
    pub fn register_trade_callback(&self, id: impl Into<String>, callback: TradeCallback) {
        let id = id.into();
        let mut callbacks = self.trade_callbacks.write().unwrap();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.push((id, callback));
    }

    /// Local order record by id
    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    /// Orders still working at the venue
    pub fn active_orders(&self) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Trades received this session
    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().unwrap().clone()
    }

    /// Execution counters snapshot
    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            orders_sent: self.counters.orders_sent.load(Ordering::Relaxed),
            orders_rejected: self.counters.orders_rejected.load(Ordering::Relaxed),
            cancels_requested: self.counters.cancels_requested.load(Ordering::Relaxed),
            trades_received: self.counters.trades_received.load(Ordering::Relaxed),
            active_orders: self.active_orders().len(),
        }
    }
}

#[async_trait]
impl Service for ExecutionService {
    fn name(&self) -> &str {
        SERVICE_EXECUTION
    }

    async fn start(&self) -> Result<(), BoxedError> {
        self.running.store(true, Ordering::SeqCst);

        // Gateway handlers survive restarts; wire them once
        if !self.wired.swap(true, Ordering::SeqCst) {
            let service = self.clone();
            self.gateway
                .register_order_handler(Arc::new(move |order| service.on_order(order)));
            let service = self.clone();
            self.gateway
                .register_trade_handler(Arc::new(move |trade| service.on_trade(trade)));
        }

        let service = self.clone();
        self.bus
            .register(
                EventType::Signal,
                SIGNAL_HANDLER_ID,
                Arc::new(move |event| {
                    let service = service.clone();
                    async move {
                        if let EventPayload::Signal(signal) = &event.payload {
                            service.process_signal(signal.clone()).await;
                        }
                    }
                    .boxed()
                }),
            )
            .await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxedError> {
        self.bus
            .unregister(EventType::Signal, SIGNAL_HANDLER_ID)
            .await;
        self.running.store(false, Ordering::SeqCst);

        // Caches are cleared in bulk when the owning service stops
        self.orders.clear();
        self.ref_to_id.clear();
        self.id_to_ref.clear();
        self.strategy_index.clear();
        self.trades.lock().unwrap().clear();
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bus::EventBusConfig;
    use crate::core::events::{AccountSnapshot, Direction, OrderStatus};
    use crate::gateway::MockGateway;
    use crate::services::{AccountService, AccountServiceConfig, RiskConfig};
    use crate::types::{Price, Volume};
    use chrono::Utc;
    use rust_decimal::Decimal;

    struct Fixture {
        gateway: Arc<MockGateway>,
        risk: Arc<RiskService>,
        execution: ExecutionService,
    }

    async fn setup() -> Fixture {
        let gateway = Arc::new(MockGateway::new());
        let bus = Arc::new(EventBus::new(EventBusConfig::default()).unwrap());
        let account = Arc::new(AccountService::new(
            AccountServiceConfig::default(),
            gateway.clone(),
            bus.clone(),
        ));
        account.start().await.unwrap();
        account.on_account(AccountSnapshot {
            balance: Decimal::from(1_000_000),
            available: Decimal::from(1_000_000),
            frozen: Decimal::ZERO,
            timestamp: Utc::now(),
        });
        let risk = Arc::new(RiskService::new(
            RiskConfig::default(),
            bus.clone(),
            account.clone(),
        ));
        risk.start().await.unwrap();
        let execution = ExecutionService::new(gateway.clone(), bus, risk.clone(), None);
        execution.start().await.unwrap();
        Fixture {
            gateway,
            risk,
            execution,
        }
    }

    fn request(volume: &str) -> OrderRequest {
        OrderRequest::limit(
            "BTCUSDT",
            Direction::Long,
            Volume::from_str(volume).unwrap(),
            Price::from_str("100").unwrap(),
            "momentum_buy",
        )
    }

    /// Order update shaped the way the gateway pushes it: keyed by ref
    fn order_update(order_ref: &str, status: OrderStatus, traded: &str) -> Order {
        Order {
            id: order_ref.to_string(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            kind: crate::core::events::OrderKind::Limit,
            volume: Volume::from_str("5").unwrap(),
            traded: Volume::from_str(traded).unwrap(),
            price: Price::from_str("100").unwrap(),
            status,
            strategy_tag: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_send_order_mints_local_record() {
        let fixture = setup().await;

        let order_id = fixture.execution.send_order(request("5")).await.unwrap();
        let order = fixture.execution.order(&order_id).unwrap();

        assert_eq!(order.status, OrderStatus::Submitting);
        assert_eq!(order.strategy_tag, "momentum");
        assert_eq!(fixture.gateway.sent_orders().len(), 1);
        assert_eq!(fixture.execution.stats().orders_sent, 1);
        assert_eq!(fixture.execution.active_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_send_order_rejected_by_risk_gate() {
        let fixture = setup().await;
        fixture.risk.halt_trading("test halt");

        assert!(fixture.execution.send_order(request("5")).await.is_none());
        assert!(fixture.gateway.sent_orders().is_empty());
        assert_eq!(fixture.execution.stats().orders_rejected, 1);
    }

    #[tokio::test]
    async fn test_send_order_substitutes_suggested_volume() {
        let fixture = setup().await;

        // Default cap is 100; the advisory substitutes it
        let order_id = fixture.execution.send_order(request("150")).await.unwrap();
        let sent = fixture.gateway.sent_orders();
        assert_eq!(sent[0].volume, Volume::from_str("100").unwrap());
        assert_eq!(
            fixture.execution.order(&order_id).unwrap().volume,
            Volume::from_str("100").unwrap()
        );
    }

    #[tokio::test]
    async fn test_send_order_gateway_refusal() {
        let fixture = setup().await;
        fixture.gateway.set_reject_orders(true);

        assert!(fixture.execution.send_order(request("5")).await.is_none());
        assert_eq!(fixture.execution.stats().orders_rejected, 1);
        assert!(fixture.execution.active_orders().is_empty());
    }

    #[tokio::test]
    async fn test_send_order_requires_running() {
        let fixture = setup().await;
        fixture.execution.stop().await.unwrap();

        assert!(fixture.execution.send_order(request("5")).await.is_none());
        assert!(fixture.gateway.sent_orders().is_empty());
    }

    #[tokio::test]
    async fn test_order_update_advances_status() {
        let fixture = setup().await;
        let order_id = fixture.execution.send_order(request("5")).await.unwrap();

        fixture
            .gateway
            .push_order(order_update("mock-1", OrderStatus::NotTraded, "0"));
        assert_eq!(
            fixture.execution.order(&order_id).unwrap().status,
            OrderStatus::NotTraded
        );

        fixture
            .gateway
            .push_order(order_update("mock-1", OrderStatus::AllTraded, "5"));
        let order = fixture.execution.order(&order_id).unwrap();
        assert_eq!(order.status, OrderStatus::AllTraded);
        assert_eq!(order.traded, Volume::from_str("5").unwrap());

        // Unknown refs are ignored
        fixture
            .gateway
            .push_order(order_update("mock-99", OrderStatus::Cancelled, "0"));
        assert_eq!(
            fixture.execution.order(&order_id).unwrap().status,
            OrderStatus::AllTraded
        );
    }

    #[tokio::test]
    async fn test_trade_push_increments_traded_volume() {
        let fixture = setup().await;
        let order_id = fixture.execution.send_order(request("5")).await.unwrap();

        fixture.gateway.push_trade(Trade {
            id: "t1".to_string(),
            order_id: "mock-1".to_string(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            volume: Volume::from_str("2").unwrap(),
            price: Price::from_str("100").unwrap(),
            timestamp: Utc::now(),
        });

        let order = fixture.execution.order(&order_id).unwrap();
        assert_eq!(order.traded, Volume::from_str("2").unwrap());

        let trades = fixture.execution.trades();
        assert_eq!(trades.len(), 1);
        // Republished under the local order id
        assert_eq!(trades[0].order_id, order_id);
        assert_eq!(fixture.execution.stats().trades_received, 1);
    }

    #[tokio::test]
    async fn test_registered_callbacks_invoked_and_isolated() {
        let fixture = setup().await;
        fixture.execution.send_order(request("5")).await.unwrap();

        fixture
            .execution
            .register_order_callback("boom", Arc::new(|_| panic!("bad callback")));
        let seen = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = seen.clone();
        fixture.execution.register_order_callback(
            "after",
            Arc::new(move |order| {
                assert_eq!(order.status, OrderStatus::NotTraded);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        fixture
            .gateway
            .push_order(order_update("mock-1", OrderStatus::NotTraded, "0"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_terminal_order_skips_gateway() {
        let fixture = setup().await;
        let order_id = fixture.execution.send_order(request("5")).await.unwrap();
        fixture
            .gateway
            .push_order(order_update("mock-1", OrderStatus::AllTraded, "5"));

        assert!(!fixture.execution.cancel_order(&order_id).await);
        assert!(!fixture.execution.cancel_order("missing").await);
        assert!(fixture.gateway.cancel_calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_is_asynchronous() {
        let fixture = setup().await;
        let order_id = fixture.execution.send_order(request("5")).await.unwrap();

        assert!(fixture.execution.cancel_order(&order_id).await);
        assert_eq!(fixture.gateway.cancel_calls(), vec!["mock-1"]);
        // Still active until the gateway pushes the cancelled status
        assert!(fixture.execution.order(&order_id).unwrap().is_active());

        fixture
            .gateway
            .push_order(order_update("mock-1", OrderStatus::Cancelled, "0"));
        assert_eq!(
            fixture.execution.order(&order_id).unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_trade_signal_becomes_order() {
        let fixture = setup().await;

        let signal = Signal {
            strategy_name: "momentum".to_string(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            action: "open".to_string(),
            volume: Volume::from_str("3").unwrap(),
            price: Some(Price::from_str("100").unwrap()),
            kind: SignalKind::Trade,
            confidence: 0.9,
        };
        let order_id = fixture.execution.process_signal(signal).await.unwrap();

        let order = fixture.execution.order(&order_id).unwrap();
        assert_eq!(order.kind, crate::core::events::OrderKind::Limit);
        assert_eq!(order.strategy_tag, "momentum");
        assert_eq!(fixture.gateway.sent_orders()[0].reference, "momentum_open");

        // Without a price the signal becomes a market order
        let market_signal = Signal {
            price: None,
            action: "close".to_string(),
            ..fixture_signal()
        };
        let order_id = fixture.execution.process_signal(market_signal).await.unwrap();
        assert_eq!(
            fixture.execution.order(&order_id).unwrap().kind,
            crate::core::events::OrderKind::Market
        );
    }

    fn fixture_signal() -> Signal {
        Signal {
            strategy_name: "momentum".to_string(),
            symbol: "BTCUSDT".into(),
            direction: Direction::Long,
            action: "open".to_string(),
            volume: Volume::from_str("3").unwrap(),
            price: Some(Price::from_str("100").unwrap()),
            kind: SignalKind::Trade,
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_risk_signal_cancels_symbol_orders() {
        let fixture = setup().await;
        fixture.execution.send_order(request("5")).await.unwrap();
        fixture.execution.send_order(request("3")).await.unwrap();

        let signal = Signal {
            kind: SignalKind::Risk,
            action: "cancel_all".to_string(),
            ..fixture_signal()
        };
        assert!(fixture.execution.process_signal(signal).await.is_none());
        assert_eq!(fixture.gateway.cancel_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_strategy_orders() {
        let fixture = setup().await;
        let first = fixture.execution.send_order(request("5")).await.unwrap();
        fixture.execution.send_order(request("3")).await.unwrap();
        fixture
            .execution
            .send_order(OrderRequest::limit(
                "ETHUSDT",
                Direction::Long,
                Volume::from_str("1").unwrap(),
                Price::from_str("100").unwrap(),
                "breakout_buy",
            ))
            .await
            .unwrap();

        // Terminal orders are not attempted
        fixture
            .gateway
            .push_order(order_update("mock-1", OrderStatus::AllTraded, "5"));
        assert!(!fixture.execution.order(&first).unwrap().is_active());

        assert_eq!(
            fixture
                .execution
                .cancel_strategy_orders("momentum", None)
                .await,
            1
        );
        assert_eq!(
            fixture
                .execution
                .cancel_strategy_orders("breakout", Some("BTCUSDT"))
                .await,
            0
        );
        assert_eq!(
            fixture
                .execution
                .cancel_strategy_orders("breakout", Some("ETHUSDT"))
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_stop_clears_orders() {
        let fixture = setup().await;
        fixture.execution.send_order(request("5")).await.unwrap();

        fixture.execution.stop().await.unwrap();
        assert!(fixture.execution.active_orders().is_empty());
        assert!(fixture.execution.trades().is_empty());
        assert!(!fixture.execution.is_healthy());
    }
}
