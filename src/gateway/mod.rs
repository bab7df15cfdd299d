pub mod mock;

pub use mock::MockGateway;

use crate::core::events::{AccountSnapshot, Order, OrderRequest, Position, TickData, Trade};
use async_trait::async_trait;
use std::sync::Arc;

/// Tick push handler, invoked from the gateway's own execution context
pub type TickHandler = Arc<dyn Fn(TickData) + Send + Sync>;
/// Order update push handler
pub type OrderHandler = Arc<dyn Fn(Order) + Send + Sync>;
/// Trade (fill) push handler
pub type TradeHandler = Arc<dyn Fn(Trade) + Send + Sync>;
/// Account snapshot push handler
pub type AccountHandler = Arc<dyn Fn(AccountSnapshot) + Send + Sync>;
/// Position push handler
pub type PositionHandler = Arc<dyn Fn(Position) + Send + Sync>;

/// Venue connectivity contract consumed by the services
///
/// This is a fixed, versioned capability interface: everything a gateway can
/// do is a method here, and nothing is discovered by probing at runtime. The
/// gateway owns its execution contexts; push handlers registered through
/// this trait are invoked from those contexts, not from the event bus.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Establish the venue session; false when the attempt failed
    async fn connect(&self) -> bool;

    /// Tear down the venue session
    async fn disconnect(&self);

    /// Whether the market-data channel is currently live
    async fn is_data_channel_live(&self) -> bool;

    /// Whether the order/command channel is currently live
    async fn is_command_channel_live(&self) -> bool;

    /// Subscribe to a symbol's market data
    async fn subscribe(&self, symbol: &str) -> bool;

    /// Unsubscribe from a symbol's market data
    async fn unsubscribe(&self, symbol: &str) -> bool;

    /// Submit an order; Some(order_ref) on acceptance by the venue session
    async fn send_order(&self, request: &OrderRequest) -> Option<String>;

    /// Request cancellation of a previously submitted order
    async fn cancel_order(&self, order_ref: &str) -> bool;

    /// Ask the venue for a fresh account snapshot, delivered via the
    /// account push handler; false when the query could not be issued
    async fn query_account(&self) -> bool;

    /// Ask the venue for fresh position state, delivered via the position
    /// push handler; false when the query could not be issued
    async fn query_position(&self) -> bool;

    /// Register a market data push handler
    fn register_tick_handler(&self, handler: TickHandler);

    /// Register an order update push handler
    fn register_order_handler(&self, handler: OrderHandler);

    /// Register a trade push handler
    fn register_trade_handler(&self, handler: TradeHandler);

    /// Register an account snapshot push handler
    fn register_account_handler(&self, handler: AccountHandler);

    /// Register a position push handler
    fn register_position_handler(&self, handler: PositionHandler);
}
