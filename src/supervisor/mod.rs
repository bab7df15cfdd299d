use crate::gateway::Gateway;
use crate::services::{
    Service, SERVICE_ACCOUNT, SERVICE_EXECUTION, SERVICE_MARKET_DATA, SERVICE_RISK,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle status of a supervised service
///
/// STOPPED -> STARTING -> RUNNING -> STOPPING -> STOPPED, with ERROR
/// absorbing failures at any non-terminal state. Only a fresh start attempt
/// clears ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Outcome of the gateway bring-up sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityOutcome {
    /// Both the data and the command channel came up
    Full,
    /// Only the data channel came up
    DataOnly,
    /// Only the command channel came up
    CommandOnly,
    /// Neither channel came up within the attempt budget
    Failed,
}

/// Aggregate label describing which subset of services is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// The complete core set is running; trading is possible
    Full,
    /// Market data and account state are live, trading is not
    Monitor,
    /// Only market data (at most) is live
    DataOnly,
}

/// Core services whose combined state defines the Full operating mode
pub const CORE_SERVICES: [&str; 4] = [
    SERVICE_MARKET_DATA,
    SERVICE_ACCOUNT,
    SERVICE_RISK,
    SERVICE_EXECUTION,
];

/// Operating mode as a pure function of the running service names
pub fn derive_mode<'a>(running: impl IntoIterator<Item = &'a str>) -> OperatingMode {
    let running: HashSet<&str> = running.into_iter().collect();
    if CORE_SERVICES.iter().all(|name| running.contains(name)) {
        OperatingMode::Full
    } else if running.contains(SERVICE_MARKET_DATA) && running.contains(SERVICE_ACCOUNT) {
        OperatingMode::Monitor
    } else {
        OperatingMode::DataOnly
    }
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Gateway connection attempts before reporting Failed
    pub connect_attempts: u32,
    /// Fixed backoff between failed connection attempts
    pub connect_backoff: Duration,
    /// Cadence of the channel liveness polls
    pub liveness_poll_interval: Duration,
    /// Deadline for both channels to come up after a connect
    pub liveness_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            connect_backoff: Duration::from_secs(2),
            liveness_poll_interval: Duration::from_millis(200),
            liveness_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-service bookkeeping, owned and mutated only by the supervisor
#[derive(Debug, Clone)]
struct ServiceDescriptor {
    name: String,
    status: ServiceStatus,
    dependencies: Vec<String>,
    started_at: Option<Instant>,
}

/// Per-service status row exposed to the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatusView {
    pub name: String,
    pub status: ServiceStatus,
    pub uptime_secs: Option<u64>,
    pub dependencies: Vec<String>,
}

/// Service supervisor
///
/// Owns the named services, brings the gateway connection up with bounded
/// retries, starts services in dependency order, stops them in reverse, and
/// derives the aggregate operating mode. The whole start/stop sequence runs
/// under one coarse lifecycle lock and blocks its caller for the duration.
pub struct ServiceSupervisor {
    config: SupervisorConfig,
    gateway: Arc<dyn Gateway>,
    /// Registration order; also the tiebreak for the startup order
    services: RwLock<Vec<Arc<dyn Service>>>,
    descriptors: RwLock<HashMap<String, ServiceDescriptor>>,
    connectivity: RwLock<ConnectivityOutcome>,
    lifecycle: Mutex<()>,
}

impl ServiceSupervisor {
    /// Create a new supervisor
    pub fn new(config: SupervisorConfig, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            config,
            gateway,
            services: RwLock::new(Vec::new()),
            descriptors: RwLock::new(HashMap::new()),
            connectivity: RwLock::new(ConnectivityOutcome::Failed),
            lifecycle: Mutex::new(()),
        }
    }

    /// Register a service and its dependencies; duplicate names are ignored
    pub fn register(&self, service: Arc<dyn Service>, dependencies: &[&str]) {
        let name = service.name().to_string();
        let mut services = self.services.write().unwrap();
        let mut descriptors = self.descriptors.write().unwrap();
        if descriptors.contains_key(&name) {
            warn!("service '{}' already registered", name);
            return;
        }
        descriptors.insert(
            name.clone(),
            ServiceDescriptor {
                name,
                status: ServiceStatus::Stopped,
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                started_at: None,
            },
        );
        services.push(service);
    }

    /// Bring the gateway up, then start every service in dependency order
    ///
    /// A failed bring-up degrades the operating mode instead of aborting:
    /// services are still attempted and may individually fail or run.
    pub async fn start_all(&self) -> OperatingMode {
        let _lifecycle = self.lifecycle.lock().await;

        let outcome = self.bring_up_connection().await;
        *self.connectivity.write().unwrap() = outcome;
        if outcome != ConnectivityOutcome::Full {
            warn!(
                "gateway connectivity is {:?}; continuing in degraded mode",
                outcome
            );
        }

        for name in self.startup_order() {
            self.start_service(&name).await;
        }

        let mode = self.operating_mode();
        info!("startup complete, operating mode {:?}", mode);
        mode
    }

    /// Stop every service in reverse dependency order, then disconnect
    ///
    /// One service's stop failure is logged and does not prevent stopping
    /// the rest.
    pub async fn stop_all(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let mut order = self.startup_order();
        order.reverse();
        for name in order {
            let status = self.status(&name);
            if !matches!(status, Some(ServiceStatus::Running) | Some(ServiceStatus::Starting)) {
                continue;
            }
            self.set_status(&name, ServiceStatus::Stopping);
            let Some(service) = self.service(&name) else {
                continue;
            };
            match service.stop().await {
                Ok(()) => {
                    self.set_status(&name, ServiceStatus::Stopped);
                    info!("service '{}' stopped", name);
                }
                Err(e) => {
                    self.set_status(&name, ServiceStatus::Error);
                    error!("service '{}' failed to stop: {}", name, e);
                }
            }
        }

        self.gateway.disconnect().await;
        info!("shutdown complete");
    }

    /// Bounded-retry gateway bring-up
    ///
    /// Each attempt connects and then polls both channel liveness probes
    /// until the timeout. A Failed round sleeps the fixed backoff and
    /// retries; partial outcomes are returned as-is.
    async fn bring_up_connection(&self) -> ConnectivityOutcome {
        for attempt in 1..=self.config.connect_attempts.max(1) {
            debug!(
                "gateway connection attempt {}/{}",
                attempt, self.config.connect_attempts
            );
            if !self.gateway.connect().await {
                warn!("gateway connect attempt {} failed", attempt);
                sleep(self.config.connect_backoff).await;
                continue;
            }

            match self.await_channels().await {
                ConnectivityOutcome::Failed => {
                    warn!("no gateway channel became live within the timeout");
                    sleep(self.config.connect_backoff).await;
                }
                outcome => {
                    info!("gateway connectivity established: {:?}", outcome);
                    return outcome;
                }
            }
        }
        error!(
            "gateway bring-up failed after {} attempts",
            self.config.connect_attempts
        );
        ConnectivityOutcome::Failed
    }

    async fn await_channels(&self) -> ConnectivityOutcome {
        let deadline = Instant::now() + self.config.liveness_timeout;
        loop {
            let data = self.gateway.is_data_channel_live().await;
            let command = self.gateway.is_command_channel_live().await;
            if data && command {
                return ConnectivityOutcome::Full;
            }
            if Instant::now() >= deadline {
                return match (data, command) {
                    (true, false) => ConnectivityOutcome::DataOnly,
                    (false, true) => ConnectivityOutcome::CommandOnly,
                    _ => ConnectivityOutcome::Failed,
                };
            }
            sleep(self.config.liveness_poll_interval).await;
        }
    }

    async fn start_service(&self, name: &str) {
        let unmet: Vec<String> = {
            let descriptors = self.descriptors.read().unwrap();
            let Some(descriptor) = descriptors.get(name) else {
                return;
            };
            if descriptor.status == ServiceStatus::Running {
                debug!("service '{}' already running", name);
                return;
            }
            descriptor
                .dependencies
                .iter()
                .filter(|dep| {
                    descriptors
                        .get(*dep)
                        .map_or(true, |d| d.status != ServiceStatus::Running)
                })
                .cloned()
                .collect()
        };
        if !unmet.is_empty() {
            warn!(
                "skipping service '{}': dependencies not running: {:?}",
                name, unmet
            );
            return;
        }
        let Some(service) = self.service(name) else {
            return;
        };

        self.set_status(name, ServiceStatus::Starting);
        match service.start().await {
            Ok(()) => {
                self.mark_running(name);
                info!("service '{}' running", name);
            }
            Err(e) => {
                self.set_status(name, ServiceStatus::Error);
                error!("service '{}' failed to start: {}", name, e);
            }
        }
    }

    /// Demote RUNNING services whose liveness probe fails to ERROR
    pub fn refresh_health(&self) {
        let services: Vec<Arc<dyn Service>> = self.services.read().unwrap().clone();
        for service in services {
            let name = service.name().to_string();
            let running = self.status(&name) == Some(ServiceStatus::Running);
            if running && !service.is_healthy() {
                error!("service '{}' reported unhealthy; marking ERROR", name);
                self.set_status(&name, ServiceStatus::Error);
            }
        }
    }

    /// Kahn ordering over the dependency graph, registration order as the
    /// tiebreak; services left over by a cycle or an unregistered
    /// dependency are reported and excluded
    fn startup_order(&self) -> Vec<String> {
        let names: Vec<String> = {
            let services = self.services.read().unwrap();
            services.iter().map(|s| s.name().to_string()).collect()
        };
        let descriptors = self.descriptors.read().unwrap();

        let mut ordered = Vec::new();
        let mut placed: HashSet<String> = HashSet::new();
        loop {
            let mut progressed = false;
            for name in &names {
                if placed.contains(name) {
                    continue;
                }
                let satisfied = descriptors[name]
                    .dependencies
                    .iter()
                    .all(|dep| placed.contains(dep));
                if satisfied {
                    ordered.push(name.clone());
                    placed.insert(name.clone());
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        for name in &names {
            if !placed.contains(name) {
                error!(
                    "service '{}' has unsatisfiable dependencies and will not be started",
                    name
                );
            }
        }
        ordered
    }

    fn service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services
            .read()
            .unwrap()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    fn set_status(&self, name: &str, status: ServiceStatus) {
        let mut descriptors = self.descriptors.write().unwrap();
        if let Some(descriptor) = descriptors.get_mut(name) {
            descriptor.status = status;
            if status == ServiceStatus::Stopped {
                descriptor.started_at = None;
            }
        }
    }

    fn mark_running(&self, name: &str) {
        let mut descriptors = self.descriptors.write().unwrap();
        if let Some(descriptor) = descriptors.get_mut(name) {
            descriptor.status = ServiceStatus::Running;
            descriptor.started_at = Some(Instant::now());
        }
    }

    /// Current status of a service
    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.descriptors
            .read()
            .unwrap()
            .get(name)
            .map(|d| d.status)
    }

    /// Connectivity outcome of the last bring-up
    pub fn connectivity(&self) -> ConnectivityOutcome {
        *self.connectivity.read().unwrap()
    }

    /// Operating mode derived from the currently running services
    pub fn operating_mode(&self) -> OperatingMode {
        let descriptors = self.descriptors.read().unwrap();
        derive_mode(
            descriptors
                .values()
                .filter(|d| d.status == ServiceStatus::Running)
                .map(|d| d.name.as_str()),
        )
    }

    /// Whether the system is usable for trading
    pub fn is_trading_ready(&self) -> bool {
        self.operating_mode() == OperatingMode::Full
    }

    /// Per-service status rows, in registration order
    pub fn status_report(&self) -> Vec<ServiceStatusView> {
        let names: Vec<String> = {
            let services = self.services.read().unwrap();
            services.iter().map(|s| s.name().to_string()).collect()
        };
        let descriptors = self.descriptors.read().unwrap();
        names
            .iter()
            .filter_map(|name| descriptors.get(name))
            .map(|descriptor| ServiceStatusView {
                name: descriptor.name.clone(),
                status: descriptor.status,
                uptime_secs: descriptor.started_at.map(|at| at.elapsed().as_secs()),
                dependencies: descriptor.dependencies.clone(),
            })
            .collect()
    }
}
