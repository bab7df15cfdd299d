pub mod bus;
pub mod cancel;
pub mod events;
pub mod journal;

pub use bus::{sync_handler, BackpressurePolicy, EventBus, EventBusConfig, EventHandler};
pub use cancel::CancelToken;
pub use events::{
    AccountSnapshot, Direction, Event, EventPayload, EventType, Order, OrderKind, OrderRequest,
    OrderStatus, Position, PositionKey, RiskAlert, RiskLevel, RiskMetrics, Signal, SignalKind,
    TickData, Trade,
};
pub use journal::EventJournal;
