// ==========================================
// 投喂线作业编排 - 硬件适配层
// ==========================================
// 职责: 硬件端口接口、写入重试装饰器、PLC 模拟器
// ==========================================

pub mod port;
pub mod retry;
pub mod simulator;

pub use port::{with_deadline, HardwareCommand, HardwareError, HardwarePort};
pub use retry::RetryingHardwarePort;
pub use simulator::{SimRunState, SimulatedPlc};
