use crate::core::bus::{sync_handler, EventBus};
use crate::core::events::{
    Event, EventPayload, EventType, OrderRequest, RiskAlert, RiskLevel, RiskMetrics, Trade,
};
use crate::services::{AccountService, Service, SERVICE_RISK};
use crate::types::{Price, Symbol, Volume};
use crate::BoxedError;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const TRADE_HANDLER_ID: &str = "risk.trades";

/// Risk control configuration
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Largest volume a single order may carry
    pub max_single_order_volume: Volume,
    /// Position limit applied when no per-symbol override exists
    pub default_position_limit: Volume,
    /// Per-symbol position limit overrides
    pub position_limits: HashMap<Symbol, Volume>,
    /// Margin required per unit of notional value
    pub margin_rate: Decimal,
    /// Fraction of available funds that margin may consume
    pub max_margin_utilization: Decimal,
    /// Daily pnl at or below this floor rejects new orders outright
    pub daily_loss_floor: Decimal,
    /// Aggregate open volume used as the position_ratio denominator
    pub max_total_volume: Volume,
    /// Fraction of the loss floor at which loss severity starts counting
    pub warn_loss_ratio: Decimal,
    /// Drawdown-from-peak ratios mapping to severities 1..=3
    pub drawdown_severity_ratios: [f64; 3],
    /// Position ratios mapping to severities 1..=2
    pub position_severity_ratios: [f64; 2],
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_single_order_volume: Volume::new(Decimal::from(100)),
            default_position_limit: Volume::new(Decimal::from(500)),
            position_limits: HashMap::new(),
            margin_rate: Decimal::new(1, 1),          // 0.1
            max_margin_utilization: Decimal::new(8, 1), // 0.8
            daily_loss_floor: Decimal::from(-50_000),
            max_total_volume: Volume::new(Decimal::from(2_000)),
            warn_loss_ratio: Decimal::new(5, 1), // 0.5
            drawdown_severity_ratios: [0.05, 0.10, 0.20],
            position_severity_ratios: [0.6, 0.9],
        }
    }
}

/// Outcome of a pre-trade check
///
/// A rejection carrying a suggested volume is an advisory: the caller may
/// substitute that volume and proceed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreTradeCheck {
    pub approved: bool,
    pub level: RiskLevel,
    pub reason: Option<String>,
    pub suggested_volume: Option<Volume>,
}

impl PreTradeCheck {
    fn approved(level: RiskLevel) -> Self {
        Self {
            approved: true,
            level,
            reason: None,
            suggested_volume: None,
        }
    }

    fn rejected(level: RiskLevel, reason: String) -> Self {
        Self {
            approved: false,
            level,
            reason: Some(reason),
            suggested_volume: None,
        }
    }

    fn advisory(level: RiskLevel, reason: String, suggested: Volume) -> Self {
        Self {
            approved: false,
            level,
            reason: Some(reason),
            suggested_volume: Some(suggested),
        }
    }
}

#[derive(Debug, Default)]
struct RiskState {
    metrics: RiskMetrics,
    anchor_day: Option<NaiveDate>,
    day_start_balance: Option<Decimal>,
    initial_balance: Option<Decimal>,
    peak_balance: Option<Decimal>,
}

/// Risk control service
///
/// Gates every order through a fixed sequence of pre-trade rules and
/// recomputes the aggregate risk level after every trade event. Entering
/// CRITICAL sets the trading-halted flag; resuming clears the flag but not
/// the underlying score, so the halt re-arms on the next qualifying trade.
#[derive(Clone)]
pub struct RiskService {
    config: RiskConfig,
    bus: Arc<EventBus>,
    account: Arc<AccountService>,
    state: Arc<Mutex<RiskState>>,
    halted: Arc<AtomicBool>,
    halt_reason: Arc<RwLock<Option<String>>>,
    running: Arc<AtomicBool>,
}

impl RiskService {
    /// Create a new risk control service
    pub fn new(config: RiskConfig, bus: Arc<EventBus>, account: Arc<AccountService>) -> Self {
        Self {
            config,
            bus,
            account,
            state: Arc::new(Mutex::new(RiskState::default())),
            halted: Arc::new(AtomicBool::new(false)),
            halt_reason: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pre-trade check, evaluated in fixed order with short-circuit on the
    /// first failing rule
    ///
    /// `mark_price` supplies a price for margin estimation when the request
    /// itself carries none (market orders); with neither available the
    /// margin rule is skipped.
    pub fn check_order(&self, request: &OrderRequest, mark_price: Option<Price>) -> PreTradeCheck {
        // 1. Global halt
        if self.halted.load(Ordering::SeqCst) {
            let reason = self
                .halt_reason
                .read()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "trading halted".to_string());
            return PreTradeCheck::rejected(RiskLevel::Critical, reason);
        }

        // 2. Single-order volume cap
        if request.volume > self.config.max_single_order_volume {
            return PreTradeCheck::advisory(
                RiskLevel::High,
                format!(
                    "volume {} exceeds single-order maximum {}",
                    request.volume, self.config.max_single_order_volume
                ),
                self.config.max_single_order_volume,
            );
        }

        // 3. Per-symbol position limit on the resulting position
        let limit = self
            .config
            .position_limits
            .get(&request.symbol)
            .copied()
            .unwrap_or(self.config.default_position_limit);
        let current = self
            .account
            .position_volume(&request.symbol, request.direction);
        if current + request.volume > limit {
            let headroom = limit.saturating_sub(current);
            return PreTradeCheck::advisory(
                RiskLevel::Medium,
                format!(
                    "position for {} would reach {} against limit {}",
                    request.symbol,
                    current + request.volume,
                    limit
                ),
                headroom,
            );
        }

        // 4. Margin against available funds
        if let Some(price) = request.price.or(mark_price) {
            if let Some(account) = self.account.account() {
                let required = request.volume.value() * price.value() * self.config.margin_rate;
                let budget = account.available * self.config.max_margin_utilization;
                if required > budget {
                    return PreTradeCheck::rejected(
                        RiskLevel::High,
                        format!(
                            "estimated margin {} exceeds available budget {}",
                            required, budget
                        ),
                    );
                }
            }
        }

        // 5. Running daily loss floor
        let daily_pnl = self.state.lock().unwrap().metrics.daily_pnl;
        if daily_pnl < self.config.daily_loss_floor {
            return PreTradeCheck::rejected(
                RiskLevel::Critical,
                format!(
                    "daily pnl {} is below the loss floor {}",
                    daily_pnl, self.config.daily_loss_floor
                ),
            );
        }

        // 6. Accept at the current aggregate level
        let level = self.state.lock().unwrap().metrics.risk_level;
        PreTradeCheck::approved(level)
    }

    /// Recompute metrics and the aggregate level after a trade
    ///
    /// Balance-anchored: daily pnl is measured against the balance seen at
    /// the first trade of the calendar day, total pnl against the first
    /// balance ever seen, drawdown against the peak balance. Daily figures
    /// reset only when a trade arrives on a new day.
    pub fn on_trade(&self, trade: &Trade) {
        let Some(account) = self.account.account() else {
            debug!("trade {} received before any account snapshot", trade.id);
            return;
        };
        let balance = account.balance;
        let trade_day = trade.timestamp.date_naive();

        let (previous, level) = {
            let mut state = self.state.lock().unwrap();

            if state.anchor_day != Some(trade_day) {
                state.anchor_day = Some(trade_day);
                state.day_start_balance = Some(balance);
            }
            let initial = *state.initial_balance.get_or_insert(balance);
            let peak = state.peak_balance.get_or_insert(balance);
            if balance > *peak {
                *peak = balance;
            }
            let peak = *peak;
            let day_start = state.day_start_balance.unwrap_or(balance);

            let daily_pnl = balance - day_start;
            let total_pnl = balance - initial;
            let drawdown = peak - balance;
            if drawdown > state.metrics.max_drawdown {
                state.metrics.max_drawdown = drawdown;
            }

            let drawdown_ratio = if peak > Decimal::ZERO {
                (drawdown / peak).to_f64().unwrap_or(0.0)
            } else {
                0.0
            };
            let position_ratio = if self.config.max_total_volume.is_zero() {
                0.0
            } else {
                (self.account.total_position_volume().value()
                    / self.config.max_total_volume.value())
                .to_f64()
                .unwrap_or(0.0)
            };

            let score = self.loss_severity(daily_pnl)
                + Self::threshold_severity(drawdown_ratio, &self.config.drawdown_severity_ratios)
                + Self::threshold_severity(position_ratio, &self.config.position_severity_ratios);
            let level = match score {
                0 => RiskLevel::Low,
                1..=2 => RiskLevel::Medium,
                3..=4 => RiskLevel::High,
                _ => RiskLevel::Critical,
            };

            let previous = state.metrics.risk_level;
            state.metrics.daily_pnl = daily_pnl;
            state.metrics.total_pnl = total_pnl;
            state.metrics.position_ratio = position_ratio;
            state.metrics.risk_level = level;
            (previous, level)
        };

        if level != previous {
            info!("risk level changed: {:?} -> {:?}", previous, level);
            self.bus.publish(Event::new(
                EventPayload::Risk(RiskAlert {
                    level,
                    message: format!("risk level changed from {:?} to {:?}", previous, level),
                }),
                SERVICE_RISK,
            ));
        }
        if level == RiskLevel::Critical && !self.halted.load(Ordering::SeqCst) {
            self.halt("risk level reached CRITICAL".to_string());
        }
    }

    fn loss_severity(&self, daily_pnl: Decimal) -> u32 {
        let floor = self.config.daily_loss_floor;
        if floor >= Decimal::ZERO {
            return 0;
        }
        if daily_pnl <= floor {
            2
        } else if daily_pnl <= floor * self.config.warn_loss_ratio {
            1
        } else {
            0
        }
    }

    fn threshold_severity(ratio: f64, thresholds: &[f64]) -> u32 {
        thresholds.iter().filter(|&&t| ratio >= t).count() as u32
    }

    fn halt(&self, reason: String) {
        warn!("trading halted: {}", reason);
        *self.halt_reason.write().unwrap() = Some(reason);
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Set the trading-halted flag (operator escape valve)
    pub fn halt_trading(&self, reason: impl Into<String>) {
        self.halt(reason.into());
    }

    /// Clear the halted flag and its reason
    ///
    /// The underlying score is untouched; if the condition persists the
    /// level re-escalates and re-halts on the next qualifying trade.
    pub fn resume_trading(&self) {
        self.halted.store(false, Ordering::SeqCst);
        *self.halt_reason.write().unwrap() = None;
        info!("trading resumed");
    }

    /// Whether the trading-halted flag is set
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Reason the halt was set, if any
    pub fn halt_reason(&self) -> Option<String> {
        self.halt_reason.read().unwrap().clone()
    }

    /// Current risk metrics
    pub fn metrics(&self) -> RiskMetrics {
        self.state.lock().unwrap().metrics.clone()
    }
}

#[async_trait]
impl Service for RiskService {
    fn name(&self) -> &str {
        SERVICE_RISK
    }

    async fn start(&self) -> Result<(), BoxedError> {
        self.running.store(true, Ordering::SeqCst);

        let service = self.clone();
        self.bus
            .register(
                EventType::Trade,
                TRADE_HANDLER_ID,
                sync_handler(move |event| {
                    if let EventPayload::Trade(trade) = &event.payload {
                        service.on_trade(trade);
                    }
                }),
            )
            .await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxedError> {
        self.bus.unregister(EventType::Trade, TRADE_HANDLER_ID).await;
        self.running.store(false, Ordering::SeqCst);

        // Metrics restart fresh; the halted flag is an operator decision and
        // survives a service restart.
        *self.state.lock().unwrap() = RiskState::default();
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
