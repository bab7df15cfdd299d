use crate::types::{Price, Symbol, Volume};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

/// Order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

/// Order status
///
/// Advances monotonically: once an order leaves `Submitting` it never
/// returns, and terminal statuses absorb all further updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitting,
    NotTraded,
    PartiallyTraded,
    AllTraded,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Check if the status is terminal (no further updates expected)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::AllTraded | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Check if an order in this status is still working at the venue
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Discrete risk severity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Latest market data for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickData {
    pub symbol: Symbol,
    pub last_price: Price,
    pub bid_price: Price,
    pub ask_price: Price,
    pub volume: Volume,
    pub timestamp: DateTime<Utc>,
}

/// Request for a new order, produced by strategies or operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub direction: Direction,
    pub kind: OrderKind,
    pub volume: Volume,
    pub price: Option<Price>,
    /// Free-form reference string; the `{strategy}_{action}` shape is used
    /// to index the resulting order under its strategy tag
    pub reference: String,
}

impl OrderRequest {
    /// Create a new limit order request
    pub fn limit(
        symbol: impl Into<Symbol>,
        direction: Direction,
        volume: Volume,
        price: Price,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            kind: OrderKind::Limit,
            volume,
            price: Some(price),
            reference: reference.into(),
        }
    }

    /// Create a new market order request
    pub fn market(
        symbol: impl Into<Symbol>,
        direction: Direction,
        volume: Volume,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            kind: OrderKind::Market,
            volume,
            price: None,
            reference: reference.into(),
        }
    }
}

/// Order tracked by the execution service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub kind: OrderKind,
    pub volume: Volume,
    pub traded: Volume,
    pub price: Price,
    pub status: OrderStatus,
    pub strategy_tag: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Mint a fresh order record in `Submitting` state from a request
    pub fn from_request(id: impl Into<String>, request: &OrderRequest, strategy_tag: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            symbol: request.symbol.clone(),
            direction: request.direction,
            kind: request.kind,
            volume: request.volume,
            traded: Volume::zero(),
            price: request.price.unwrap_or_else(Price::zero),
            status: OrderStatus::Submitting,
            strategy_tag: strategy_tag.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the order is still working at the venue
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Volume not yet traded
    pub fn remaining(&self) -> Volume {
        self.volume.saturating_sub(self.traded)
    }

    /// Apply a status pushed by the gateway, honoring monotonic advancement
    ///
    /// Returns true when the status actually changed.
    pub fn apply_status(&mut self, status: OrderStatus) -> bool {
        if self.status.is_terminal() || status == self.status {
            return false;
        }
        if status == OrderStatus::Submitting {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }

    /// Raise the traded volume, clamped into `0 ≤ traded ≤ volume`
    pub fn apply_traded(&mut self, traded: Volume) {
        if traded > self.traded {
            self.traded = traded.min(self.volume);
            self.updated_at = Utc::now();
        }
    }
}

/// Fill reported by the gateway; immutable and append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub order_id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub volume: Volume,
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

/// Key identifying a position: one entry per symbol per direction
pub type PositionKey = (Symbol, Direction);

/// Open position; a new update for the same key replaces it wholesale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub direction: Direction,
    pub volume: Volume,
    pub avg_price: Price,
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// Key this position is stored under
    pub fn key(&self) -> PositionKey {
        (self.symbol.clone(), self.direction)
    }
}

/// Current account funds, replaced on every query or push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub available: Decimal,
    pub frozen: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Rolling risk figures; `risk_level` is recomputed after every trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub max_drawdown: Decimal,
    pub position_ratio: f64,
    pub risk_level: RiskLevel,
}

impl Default for RiskMetrics {
    fn default() -> Self {
        Self {
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            position_ratio: 0.0,
            risk_level: RiskLevel::Low,
        }
    }
}

/// Signal intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Trade,
    Risk,
}

/// Strategy-produced instruction consumed by the execution service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_name: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub action: String,
    pub volume: Volume,
    pub price: Option<Price>,
    pub kind: SignalKind,
    pub confidence: f64,
}

/// Risk notification published when the aggregate level changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub level: RiskLevel,
    pub message: String,
}

/// Event type tag used for handler registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Tick,
    Order,
    Trade,
    Account,
    Position,
    Signal,
    Risk,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::Tick => "tick",
            EventType::Order => "order",
            EventType::Trade => "trade",
            EventType::Account => "account",
            EventType::Position => "position",
            EventType::Signal => "signal",
            EventType::Risk => "risk",
        };
        write!(f, "{}", name)
    }
}

/// Typed event payload; the serialized form carries an adjacent
/// `type`/`payload` pair, which is also the durable log record shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventPayload {
    Tick(TickData),
    Order(Order),
    Trade(Trade),
    Account(AccountSnapshot),
    Position(Position),
    Signal(Signal),
    Risk(RiskAlert),
}

impl EventPayload {
    /// Tag used to look up registered handlers
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::Tick(_) => EventType::Tick,
            EventPayload::Order(_) => EventType::Order,
            EventPayload::Trade(_) => EventType::Trade,
            EventPayload::Account(_) => EventType::Account,
            EventPayload::Position(_) => EventType::Position,
            EventPayload::Signal(_) => EventType::Signal,
            EventPayload::Risk(_) => EventType::Risk,
        }
    }
}

/// Typed, timestamped message flowing through the bus; immutable once
/// published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(payload: EventPayload, source: impl Into<String>) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
        }
    }

    /// Attach a correlation id (builder pattern)
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Tag used to look up registered handlers
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}
