#![doc = r#"
# spark-socket

## 设计动机（Why）
- **定位**：用户态异步套接字引擎。对外暴露 BSD 风格的 bind/listen/accept/connect/send/receive、
  选项读写与 select/poll，对内按套接字串行化重叠操作；
- **可插拔后端**：同一份 [`Socket`] 契约既可以由直接系统调用的 [`NativeTransport`] 满足，
  也可以由基于通道/选择器模型的 [`BridgedTransport`] 满足，调用方观察不到差异；
- **原地加密**：已连接的明文套接字可以通过 [`Socket::upgrade_to_secure`] 切换为 TLS。

## 核心契约（What）
- [`Socket`]：同步调用直达后端；`*_async` 调用进入每套接字两条 FIFO（接收类、发送类），
  返回可阻塞等待、可 `await`、可注册回调的 [`OperationHandle`]；
- [`Multiplexer`] / [`SelectSet`]：select/poll 语义，超时单位为微秒；
- [`SocketEngine`]：配置与工作线程池的持有者，[`EngineConfig`] 可从 TOML 加载；
- 所有错误均为可移植的 [`SocketError`]，后端特有异常不会越过传输边界。

## 实现策略（How）
- 队列锁内只做簿记，后端调用与完成回调在锁外执行；
- 发送类短写在队列内部续写，调用方看到的发送要么完整、要么是明确错误；
- 非阻塞后端上的 WouldBlock 由工作线程在多路复用器上停靠后重试；
- 关闭套接字先唤醒阻塞中的后端调用，再以 `Disposed` 完成全部排队操作。

## 风险与考量（Trade-offs）
- 仅支持 Unix 平台；
- 阻塞线程池中的任务无法被强制取消，关闭的及时性依赖后端唤醒。
"#]

mod bridge;
pub mod config;
pub mod engine;
pub mod mux;
pub mod queue;
pub mod socket;
pub mod telemetry;
pub mod transport;

pub use bridge::ChannelError;
pub use config::{Backend, ConfigError, EngineConfig, TcpDefaults};
pub use engine::{EngineError, SocketEngine};
pub use mux::{Multiplexer, SelectSet, Selectable};
pub use queue::{Completed, OperationClass, OperationHandle, OperationKind, OperationSummary};
pub use socket::Socket;
pub use transport::{BridgedTransport, NativeTransport};

pub use spark_socket_core::{
    AddressFamily, BackendKind, ErrorClass, OptionLevel, OptionName, OptionValue, ProtocolKind,
    SelectMode, Shutdown, SocketError, SocketErrorKind, SocketFlags, SocketKind, SocketOption,
    Transport,
};
pub use spark_socket_tls::{SecureTransport, TlsUpgrader, UpgradeState};
