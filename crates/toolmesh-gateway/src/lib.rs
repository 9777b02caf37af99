pub mod dispatcher;
pub mod gateway;
pub mod health;
pub mod health_monitor;
pub mod http_server;
pub mod policy;
pub mod registry;
pub mod status;
pub mod upstream;

pub use dispatcher::Dispatcher;
pub use gateway::Gateway;
pub use health::{HealthRecord, HealthStatus, HealthThresholds, Transition};
pub use health_monitor::{HealthCheckConfig, HealthMonitor, MonitorHandle};
pub use http_server::HttpServer;
pub use registry::{BackendDescriptor, ServiceRegistry, ToolSpec};
pub use status::{BackendStatus, LivenessReport, StatusAggregator, StatusReport};
