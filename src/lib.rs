pub mod context;
pub mod core;
pub mod gateway;
pub mod monitoring;
pub mod services;
pub mod supervisor;
pub mod types;

/// Boxed error type shared across the crate
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

pub use crate::context::{CoreConfig, TradingContext};
pub use crate::core::{
    AccountSnapshot, BackpressurePolicy, CancelToken, Direction, Event, EventBus, EventBusConfig,
    EventJournal, EventPayload, EventType, Order, OrderKind, OrderRequest, OrderStatus, Position,
    RiskAlert, RiskLevel, RiskMetrics, Signal, SignalKind, TickData, Trade,
};
pub use crate::gateway::{Gateway, MockGateway};
pub use crate::monitoring::{ApiResponse, SystemStatusReport};
pub use crate::services::{
    AccountService, AccountServiceConfig, AccountStateSnapshot, ExecutionService, ExecutionStats,
    MarketDataService, PreTradeCheck, RiskConfig, RiskService, Service,
};
pub use crate::supervisor::{
    derive_mode, ConnectivityOutcome, OperatingMode, ServiceStatus, ServiceSupervisor,
    SupervisorConfig,
};
pub use crate::types::{Price, Symbol, Volume};
