// ==========================================
// 投喂线作业编排 - 应用状态
// ==========================================
// 职责: 组装仓储、硬件端口、指令 API 与同步协调器
// 说明: 所有仓储共享同一个 SQLite 连接
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::FeedingApi;
use crate::config::{ConfigManager, FeedingSettings};
use crate::db::open_sqlite_connection;
use crate::engine::{
    BroadcastEventPublisher, Clock, HardwareSyncCoordinator, LineGuards, OptionalEventPublisher,
    SystemClock,
};
use crate::hardware::{HardwarePort, RetryingHardwarePort, SimulatedPlc};
use crate::repository::{EquipmentRepository, SqliteDispatchRepository, SqliteSessionRepository};

/// 事件广播通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 硬件写入重试的基础退避时间
const HARDWARE_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// 应用状态
///
/// 持有指令 API、同步协调器与共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 投喂指令API
    pub feeding_api: Arc<FeedingApi>,

    /// 硬件同步协调器
    pub sync_coordinator: Arc<HardwareSyncCoordinator>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 网箱槽位与下料器标定
    pub equipment_repo: Arc<EquipmentRepository>,

    /// 事件广播（看板订阅）
    pub event_publisher: Arc<BroadcastEventPublisher>,

    /// 设备端口（模拟 PLC + 写入重试）
    pub hardware: Arc<RetryingHardwarePort<SimulatedPlc>>,

    /// 启动时加载的运行参数
    pub settings: FeedingSettings,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub async fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let session_repo = Arc::new(
            SqliteSessionRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建SqliteSessionRepository: {}", e))?,
        );
        let dispatch_repo = Arc::new(
            SqliteDispatchRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建SqliteDispatchRepository: {}", e))?,
        );
        let equipment_repo = Arc::new(
            EquipmentRepository::from_connection(conn.clone())
                .map_err(|e| format!("无法创建EquipmentRepository: {}", e))?,
        );
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );

        let settings = FeedingSettings::load(config_manager.as_ref())
            .await
            .map_err(|e| format!("无法加载投喂配置: {}", e))?;
        tracing::info!(
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            hardware_timeout_ms = settings.hardware_timeout.as_millis() as u64,
            retry_attempts = settings.hardware_retry_attempts,
            "投喂配置已加载"
        );

        // ==========================================
        // 硬件与共享设施
        // ==========================================
        let hardware = Arc::new(RetryingHardwarePort::new(
            SimulatedPlc::new(),
            settings.hardware_retry_attempts,
            HARDWARE_RETRY_BACKOFF,
        ));
        let port: Arc<dyn HardwarePort> = hardware.clone();

        let guards = Arc::new(LineGuards::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let event_publisher = Arc::new(BroadcastEventPublisher::new(EVENT_CHANNEL_CAPACITY));
        let publisher = Arc::new(OptionalEventPublisher::with_publisher(
            event_publisher.clone(),
        ));

        // ==========================================
        // 初始化API与协调器
        // ==========================================
        let feeding_api = Arc::new(FeedingApi::new(
            session_repo.clone(),
            dispatch_repo,
            equipment_repo.clone(),
            port.clone(),
            guards.clone(),
            clock.clone(),
            publisher.clone(),
            settings.clone(),
        ));

        let sync_coordinator = Arc::new(HardwareSyncCoordinator::new(
            session_repo,
            port,
            guards,
            clock,
            publisher,
            settings.clone(),
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            feeding_api,
            sync_coordinator,
            config_manager,
            equipment_repo,
            event_publisher,
            hardware,
            settings,
        })
    }

    /// 模拟 PLC（驱动出料计数推进）
    pub fn simulator(&self) -> &SimulatedPlc {
        self.hardware.inner()
    }
}

/// 获取默认数据库路径
///
/// 优先使用环境变量 `AQUA_FEEDING_DB_PATH`，否则使用用户数据目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("AQUA_FEEDING_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./aqua_feeding.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染生产数据
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("aqua-feeding-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("aqua-feeding");
        }

        std::fs::create_dir_all(&path).ok();
        path = path.join("aqua_feeding.db");
    }

    path.to_string_lossy().to_string()
}
