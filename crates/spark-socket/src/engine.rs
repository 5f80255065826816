//! 套接字引擎：配置与工作线程池的持有者。
//!
//! # 教案式说明
//! - **意图 (Why)**：排队的异步操作需要一个真正并行的线程池来执行可能阻塞的后端调用。
//!   Tokio 的 `spawn_blocking` 池恰好提供“按需扩容、空闲回收、上限可配”的语义；
//! - **契约 (What)**：
//!   - [`SocketEngine::new`] 创建独占的运行时，引擎最后一个句柄释放时以
//!     `shutdown_background` 关闭，不会阻塞释放它的线程；
//!   - [`SocketEngine::with_handle`] 借用调用方的运行时，生命周期由调用方负责；
//!   - [`SocketEngine::global`] 返回进程级缺省引擎，首次调用时惰性创建；
//! - **风险 (Trade-offs)**：阻塞池中的任务无法被强制取消，关闭套接字依赖后端唤醒阻塞调用。

use std::fmt;
use std::sync::{Arc, OnceLock};

use spark_socket_core::{AddressFamily, ProtocolKind, SocketError, SocketKind};
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::info;

use crate::config::{ConfigError, EngineConfig};
use crate::socket::Socket;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start socket worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// 执行排队操作的线程池。
pub(crate) struct WorkerPool {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl WorkerPool {
    fn owned(config: &EngineConfig) -> Result<Self, EngineError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .max_blocking_threads(config.max_blocking_threads)
            .thread_name(config.thread_name.clone())
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    fn borrowed(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
        }
    }

    pub(crate) fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        drop(self.handle.spawn_blocking(task));
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    pool: WorkerPool,
}

#[derive(Clone)]
pub struct SocketEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for SocketEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketEngine")
            .field("config", &self.inner.config)
            .field("owns_runtime", &self.inner.pool.runtime.is_some())
            .finish()
    }
}

static GLOBAL: OnceLock<SocketEngine> = OnceLock::new();

impl SocketEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let pool = WorkerPool::owned(&config)?;
        info!(
            target: "spark_socket::queue",
            backend = ?config.backend,
            max_blocking_threads = config.max_blocking_threads,
            "socket engine started"
        );
        Ok(Self::assemble(config, pool))
    }

    /// 使用调用方提供的运行时执行排队操作。
    pub fn with_handle(handle: Handle, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self::assemble(config, WorkerPool::borrowed(handle)))
    }

    /// 进程级缺省引擎。
    ///
    /// 并发的首次调用可能各自构建一个引擎，只有一个被保留，其余随即释放。
    pub fn global() -> Result<Self, EngineError> {
        if let Some(engine) = GLOBAL.get() {
            return Ok(engine.clone());
        }
        let engine = Self::new(EngineConfig::default())?;
        Ok(GLOBAL.get_or_init(|| engine).clone())
    }

    fn assemble(config: EngineConfig, pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(EngineInner { config, pool }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// 以配置中的后端创建套接字。
    pub fn socket(
        &self,
        family: AddressFamily,
        kind: SocketKind,
        protocol: ProtocolKind,
    ) -> Result<Socket, SocketError> {
        Socket::new(self, family, kind, protocol)
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }
}
