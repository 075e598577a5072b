// ==========================================
// 投喂线作业编排 - 领域模型层
// ==========================================
// 职责: 定义领域实体、值对象、状态机与领域事件
// 红线: 不含数据访问逻辑,不含硬件 I/O
// ==========================================

pub mod calibration;
pub mod configuration;
pub mod error;
pub mod events;
pub mod operation;
pub mod reading;
pub mod session;
pub mod types;

// 重导出核心类型
pub use calibration::{ContinuousCalibration, DoserCalibration, PhysicalParams, PulseCalibration};
pub use configuration::{ConfigChange, MachineConfiguration};
pub use error::{DomainError, DomainResult};
pub use events::{Anomaly, AnomalyKind, FeedingEvent, LogEntry};
pub use operation::{FeedingOperation, ReadingEffect};
pub use reading::MachineStatusReading;
pub use session::{DayResolution, FeedingSession, StartedOperation, SyncOutcome};
pub use types::{EventKind, FeedingMode, OperationStatus, SessionStatus};
