// ==========================================
// 投喂线作业编排 - 产线级互斥
// ==========================================
// 每条产线两把锁 + 一个指令代数:
// - command: 操作员指令全程持有（含硬件 I/O），同一产线指令严格串行
// - state: 会话“读取-变更-保存”期间短暂持有，指令与同步协调器共用
// - generation: 指令窗口开始/结束各加一（奇数 = 指令进行中）
//   同步协调器读数前后比对代数，跨越指令窗口的读数一律丢弃
// 不同产线互不阻塞
// ==========================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct LineLocks {
    command: Arc<AsyncMutex<()>>,
    state: Arc<AsyncMutex<()>>,
    generation: AtomicU64,
}

#[derive(Debug, Default)]
pub struct LineGuards {
    locks: Mutex<HashMap<String, Arc<LineLocks>>>,
}

/// 指令窗口：存活期间产线代数为奇数
#[derive(Debug)]
pub struct CommandWindow {
    locks: Arc<LineLocks>,
}

impl Drop for CommandWindow {
    fn drop(&mut self) {
        self.locks.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl LineGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks_for(&self, line_id: &str) -> Arc<LineLocks> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(line_id.to_string())
            .or_insert_with(|| Arc::new(LineLocks::default()))
            .clone()
    }

    /// 获取产线指令锁
    pub async fn command(&self, line_id: &str) -> OwnedMutexGuard<()> {
        self.locks_for(line_id).command.clone().lock_owned().await
    }

    /// 获取产线会话状态锁
    pub async fn state(&self, line_id: &str) -> OwnedMutexGuard<()> {
        self.locks_for(line_id).state.clone().lock_owned().await
    }

    /// 开启指令窗口（硬件写入前调用）
    pub fn begin_command(&self, line_id: &str) -> CommandWindow {
        let locks = self.locks_for(line_id);
        locks.generation.fetch_add(1, Ordering::SeqCst);
        CommandWindow { locks }
    }

    /// 当前指令代数
    pub fn generation(&self, line_id: &str) -> u64 {
        self.locks_for(line_id).generation.load(Ordering::SeqCst)
    }

    /// 产线是否有指令正在进行
    pub fn command_in_flight(&self, line_id: &str) -> bool {
        self.generation(line_id) % 2 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lines_are_independent() {
        let guards = LineGuards::new();
        let _a = guards.command("L1").await;

        let b = tokio::time::timeout(Duration::from_millis(50), guards.command("L2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_same_line_serialized() {
        let guards = LineGuards::new();
        let held = guards.state("L1").await;

        let blocked = tokio::time::timeout(Duration::from_millis(20), guards.state("L1")).await;
        assert!(blocked.is_err());

        drop(held);
        let acquired = tokio::time::timeout(Duration::from_millis(50), guards.state("L1")).await;
        assert!(acquired.is_ok());
    }

    #[test]
    fn test_command_window_generation() {
        let guards = LineGuards::new();
        let before = guards.generation("L1");
        assert!(!guards.command_in_flight("L1"));

        let window = guards.begin_command("L1");
        assert!(guards.command_in_flight("L1"));
        assert!(!guards.command_in_flight("L2"));

        drop(window);
        assert!(!guards.command_in_flight("L1"));
        assert_eq!(guards.generation("L1"), before + 2);
    }
}
