pub mod account;
pub mod execution;
pub mod market_data;
pub mod risk;

pub use account::{AccountService, AccountServiceConfig, AccountStateSnapshot};
pub use execution::{ExecutionService, ExecutionStats};
pub use market_data::MarketDataService;
pub use risk::{PreTradeCheck, RiskConfig, RiskService};

use crate::BoxedError;
use async_trait::async_trait;

/// Name the supervisor tracks the market data cache service under
pub const SERVICE_MARKET_DATA: &str = "market_data";
/// Name the supervisor tracks the account & position service under
pub const SERVICE_ACCOUNT: &str = "account";
/// Name the supervisor tracks the risk control service under
pub const SERVICE_RISK: &str = "risk";
/// Name the supervisor tracks the order execution service under
pub const SERVICE_EXECUTION: &str = "execution";

/// Capability interface for a supervised, long-lived component
///
/// Services are concrete variants selected at construction time; the
/// supervisor drives them purely through this trait and owns all lifecycle
/// bookkeeping.
#[async_trait]
pub trait Service: Send + Sync {
    /// Stable name the supervisor tracks this service under
    fn name(&self) -> &str;

    /// Bring the service online: wire callbacks, spawn loops
    async fn start(&self) -> Result<(), BoxedError>;

    /// Take the service offline and clear its caches
    async fn stop(&self) -> Result<(), BoxedError>;

    /// Liveness probe consulted by the supervisor's health refresh
    fn is_healthy(&self) -> bool {
        true
    }
}
