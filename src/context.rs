use crate::core::bus::{EventBus, EventBusConfig};
use crate::gateway::Gateway;
use crate::monitoring::{ApiResponse, SystemStatusReport};
use crate::services::{
    AccountService, AccountServiceConfig, ExecutionService, MarketDataService, RiskConfig,
    RiskService, SERVICE_ACCOUNT, SERVICE_MARKET_DATA, SERVICE_RISK,
};
use crate::supervisor::{OperatingMode, ServiceSupervisor, SupervisorConfig};
use crate::BoxedError;
use std::sync::Arc;

/// Top-level configuration aggregating every component's config
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub bus: EventBusConfig,
    pub supervisor: SupervisorConfig,
    pub account: AccountServiceConfig,
    pub risk: RiskConfig,
}

/// Explicit composition root
///
/// Wires the bus, the services, and the supervisor once and hands the whole
/// graph to its consumers; there is no global state to look anything up
/// from. API handlers and strategies receive this context (or the pieces
/// they need) at construction time.
pub struct TradingContext {
    pub bus: Arc<EventBus>,
    pub gateway: Arc<dyn Gateway>,
    pub market_data: Arc<MarketDataService>,
    pub account: Arc<AccountService>,
    pub risk: Arc<RiskService>,
    pub execution: Arc<ExecutionService>,
    pub supervisor: Arc<ServiceSupervisor>,
}

impl TradingContext {
    /// Build the full service graph against a gateway
    pub fn new(config: CoreConfig, gateway: Arc<dyn Gateway>) -> Result<Self, BoxedError> {
        let bus = Arc::new(EventBus::new(config.bus)?);

        let market_data = Arc::new(MarketDataService::new(gateway.clone(), bus.clone()));
        let account = Arc::new(AccountService::new(
            config.account,
            gateway.clone(),
            bus.clone(),
        ));
        let risk = Arc::new(RiskService::new(config.risk, bus.clone(), account.clone()));
        let execution = Arc::new(ExecutionService::new(
            gateway.clone(),
            bus.clone(),
            risk.clone(),
            Some(market_data.clone()),
        ));

        let supervisor = Arc::new(ServiceSupervisor::new(config.supervisor, gateway.clone()));
        supervisor.register(market_data.clone(), &[]);
        supervisor.register(account.clone(), &[]);
        supervisor.register(risk.clone(), &[SERVICE_ACCOUNT]);
        supervisor.register(
            execution.clone(),
            &[SERVICE_ACCOUNT, SERVICE_RISK, SERVICE_MARKET_DATA],
        );

        Ok(Self {
            bus,
            gateway,
            market_data,
            account,
            risk,
            execution,
            supervisor,
        })
    }

    /// Start the dispatch loop, then bring the system up in dependency order
    pub async fn start(&self) -> OperatingMode {
        self.bus.start().await;
        self.supervisor.start_all().await
    }

    /// Stop services in reverse order, then drain and stop the bus
    pub async fn stop(&self) {
        self.supervisor.stop_all().await;
        self.bus.stop().await;
    }

    /// Status snapshot wrapped in the presentation envelope
    pub fn status(&self) -> ApiResponse<SystemStatusReport> {
        ApiResponse::ok(SystemStatusReport::collect(&self.supervisor))
    }
}
