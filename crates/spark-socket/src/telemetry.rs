//! tracing 订阅者安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：引擎在派发、部分写续传、阻塞模式切换、TLS 升级等决策点输出结构化事件，
//!   宿主只需调用一次 [`install_subscriber`] 即可看到这些事件；
//! - **逻辑（How）**：组装 `fmt + EnvFilter`，过滤规则读取 `RUST_LOG`，缺省为 `info`；
//! - **契约（What）**：重复调用返回 [`TelemetryError::AlreadyInstalled`]；
//!   外部已设置全局 Subscriber 时返回 [`TelemetryError::SubscriberAlreadySet`]。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("spark-socket 的 tracing 订阅者已安装，禁止重复调用")]
    AlreadyInstalled,
    #[error("全局 tracing Subscriber 已存在，无法覆盖")]
    SubscriberAlreadySet,
    #[error("设置 tracing 全局 Subscriber 失败: {0}")]
    SetGlobalSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

pub fn install_subscriber() -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }
    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;
    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
