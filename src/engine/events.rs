// ==========================================
// 投喂线作业编排 - 引擎层事件发布
// ==========================================
// 职责: 定义投喂事件发布 trait，实现依赖倒置
// 说明: 事件先随会话落库，再通知下游（看板推送、告警等）
//       发布失败只记日志，不回滚已保存的会话
// ==========================================

use crate::domain::events::FeedingEvent;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::broadcast;

// ==========================================
// 事件发布 Trait
// ==========================================

/// 投喂事件发布者 Trait
///
/// # 实现说明
/// - `BroadcastEventPublisher`: 进程内广播，供看板订阅
/// - `NoOpEventPublisher`: 单元测试
pub trait FeedingEventPublisher: Send + Sync {
    fn publish(&self, event: &FeedingEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl FeedingEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: &FeedingEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - line_id={}, kind={}",
            event.line_id,
            event.kind.as_str()
        );
        Ok(())
    }
}

/// 进程内广播发布者
///
/// 无订阅者时事件直接丢弃
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<FeedingEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedingEvent> {
        self.sender.subscribe()
    }
}

impl FeedingEventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: &FeedingEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender.send(event.clone())?;
        Ok(())
    }
}

/// 可选的事件发布者包装
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn FeedingEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn FeedingEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 依次发布一批事件，失败只告警
    pub fn publish_all(&self, events: &[FeedingEvent]) {
        let Some(publisher) = &self.inner else {
            return;
        };
        for event in events {
            if let Err(e) = publisher.publish(event) {
                tracing::warn!(
                    line_id = %event.line_id,
                    kind = event.kind.as_str(),
                    error = %e,
                    "事件发布失败"
                );
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}
