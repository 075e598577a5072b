// ==========================================
// 投喂线作业编排 - 引擎层
// ==========================================
// 职责: 下料换算、投喂策略、产线互斥、事件发布、硬件同步
// 红线: Engine 不拼 SQL，持久化通过仓储 trait
// ==========================================

pub mod clock;
pub mod dosing;
pub mod events;
pub mod line_guard;
pub mod strategy;
pub mod sync;

// 重导出核心引擎
pub use clock::{Clock, ManualClock, SystemClock};
pub use dosing::DosingTranslator;
pub use events::{
    BroadcastEventPublisher, FeedingEventPublisher, NoOpEventPublisher, OptionalEventPublisher,
};
pub use line_guard::{CommandWindow, LineGuards};
pub use strategy::{FeedingIntent, FeedingStrategy};
pub use sync::{HardwareSyncCoordinator, LineSyncResult, SyncError};
