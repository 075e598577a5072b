// ==========================================
// 投喂线作业编排 - 投喂配置读取 Trait
// ==========================================
// 职责: 定义运行参数读取接口，解耦 ConfigManager 与同步/指令层
// 实现者: ConfigManager（config_kv 表）
// ==========================================

use async_trait::async_trait;
use std::error::Error;
use std::time::Duration;

pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[async_trait]
pub trait FeedingConfigReader: Send + Sync {
    /// 硬件状态轮询周期（默认 1000ms）
    async fn get_poll_interval_ms(&self) -> ConfigResult<u64>;

    /// 单次硬件调用超时（默认 3000ms）
    async fn get_hardware_timeout_ms(&self) -> ConfigResult<u64>;

    /// 硬件写入总尝试次数（默认 3）
    async fn get_hardware_retry_attempts(&self) -> ConfigResult<u32>;

    /// 连续轮询失败多少次后升级为错误告警（默认 5）
    async fn get_poll_failure_alert_threshold(&self) -> ConfigResult<u32>;

    /// 超投容差（公斤，默认 0：超过目标即记异常）
    async fn get_overshoot_tolerance_kg(&self) -> ConfigResult<f64>;
}

// ==========================================
// FeedingSettings - 运行参数快照
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct FeedingSettings {
    pub poll_interval: Duration,
    pub hardware_timeout: Duration,
    pub hardware_retry_attempts: u32,
    pub poll_failure_alert_threshold: u32,
    /// 超投容差（公斤）。累计量超过 目标量 + 容差 时记一次 TargetOvershoot 异常；
    /// 默认 0，即任何超出目标的下料都记为异常。仅在称重存在已知抖动时调大。
    pub overshoot_tolerance_kg: f64,
}

impl Default for FeedingSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1_000),
            hardware_timeout: Duration::from_millis(3_000),
            hardware_retry_attempts: 3,
            poll_failure_alert_threshold: 5,
            overshoot_tolerance_kg: 0.0,
        }
    }
}

impl FeedingSettings {
    /// 从配置源读取完整快照
    pub async fn load(reader: &dyn FeedingConfigReader) -> ConfigResult<Self> {
        Ok(Self {
            poll_interval: Duration::from_millis(reader.get_poll_interval_ms().await?),
            hardware_timeout: Duration::from_millis(reader.get_hardware_timeout_ms().await?),
            hardware_retry_attempts: reader.get_hardware_retry_attempts().await?,
            poll_failure_alert_threshold: reader.get_poll_failure_alert_threshold().await?,
            overshoot_tolerance_kg: reader.get_overshoot_tolerance_kg().await?,
        })
    }
}
