use crate::supervisor::{
    ConnectivityOutcome, OperatingMode, ServiceStatusView, ServiceSupervisor,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Response envelope wrapping every status/control answer the core produces
///
/// The shape is fixed; the transport that carries it is out of scope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl<T: Serialize> ApiResponse<T> {
    /// Successful response carrying data
    pub fn ok(data: T) -> Self {
        Self::ok_with_message(data, "ok")
    }

    /// Successful response with an explicit message
    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Failed response; no data
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Aggregate operating snapshot for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatusReport {
    pub mode: OperatingMode,
    pub connectivity: ConnectivityOutcome,
    pub trading_ready: bool,
    pub services: Vec<ServiceStatusView>,
}

impl SystemStatusReport {
    /// Assemble the report from the supervisor's current state
    pub fn collect(supervisor: &ServiceSupervisor) -> Self {
        Self {
            mode: supervisor.operating_mode(),
            connectivity: supervisor.connectivity(),
            trading_ready: supervisor.is_trading_ready(),
            services: supervisor.status_report(),
        }
    }
}
