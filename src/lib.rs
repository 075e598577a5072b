// ==========================================
// 投喂线作业编排引擎 - 核心库
// ==========================================
// 技术栈: Rust + Tokio + SQLite
// 系统定位: 网箱养殖投喂线的会话/作业编排（设备协议由硬件端口实现）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体、状态机与事件
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 换算、策略、同步
pub mod engine;

// 硬件适配层 - 端口与模拟器
pub mod hardware;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 指令接口
pub mod api;

// 应用层 - 组件组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{EventKind, FeedingMode, OperationStatus, SessionStatus};

// 领域实体
pub use domain::{
    DoserCalibration, FeedingEvent, FeedingOperation, FeedingSession, MachineConfiguration,
    MachineStatusReading,
};

// 引擎
pub use engine::{DosingTranslator, FeedingStrategy, HardwareSyncCoordinator};

// API
pub use api::{ApiError, FeedingApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "投喂线作业编排引擎";
