//! Scheduling core: priority model, process supervisor, bus arbiter and
//! telemetry aggregation.

pub mod arbiter;
pub mod audit;
pub mod backoff;
pub mod error;
pub mod priority;
pub mod process;
pub mod report;
pub mod supervisor;

pub use arbiter::{
    BusArbiter, BusStats, DeviceHandle, DeviceStats, TransactionHandle, TransactionId,
    TransactionStatus,
};
pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, NullAuditSink};
pub use backoff::BackoffPolicy;
pub use error::{
    AppResult, BusError, ConfigError, LaunchError, SchedulingError, StartupError,
    SupervisorError,
};
pub use priority::{translate, translate_with, OsSchedule, PriorityLevel, SchedPolicy};
pub use process::{ProcessHandle, ProcessState, ProcessStatus, ResourceUsage};
pub use report::{
    recommend, InFlightTransaction, Recommendation, RecommendationKind, SystemReport,
    TelemetryAggregator,
};
pub use supervisor::ProcessSupervisor;
