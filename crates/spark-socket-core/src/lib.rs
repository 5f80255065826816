#![doc = r#"
# spark-socket-core

## 设计动机（Why）
- **统一契约**：原生内核套接字与通道桥接两套后端必须对上层呈现完全一致的语义，
  因此把错误分类、选项表与传输能力集抽离成独立 crate，由两者共同依赖；
- **可移植错误**：上层只面对 [`SocketErrorKind`] 这一份稳定分类，平台 errno 与通道层异常都在边界处翻译完毕；
- **能力探测**：IPv4/IPv6 可用性在进程内只探测一次，并以只读缓存形式共享。

## 核心契约（What）
- [`Transport`]：单个端点的后端能力集，覆盖 bind/listen/accept/connect/send/receive/shutdown、选项读写与阻塞模式切换；
- [`SocketError`] / [`SocketErrorKind`]：携带稳定错误码 `spark.socket.<op>_failed` 的错误对象；
- [`SocketOption`]：`(level, name)` 可移植选项表，不在表内的组合统一返回 `ProtocolOptionNotSupported`；
- [`protocol_support`]：进程级协议可用性缓存。

## 实现策略（How）
- errno 翻译集中在 [`translate`] 模块，后端只需调用 [`translate::from_io`]；
- 传输 trait 以 `&self` 暴露全部操作，内部可变性由后端自行用锁或原子量管理，
  从而允许“发送类”与“接收类”操作在不同线程上并发推进。

## 风险与考量（Trade-offs）
- 仅支持 Unix 平台，依赖 `libc` 提供的 errno 常量；
- 选项表刻意保持精简，超出范围的平台专有选项需要通过新增表项扩展。
"#]

pub mod error;
pub mod option;
pub mod protocol_support;
pub mod translate;
pub mod transport;
pub mod types;

pub use error::{ErrorClass, OperationCode, SocketError, SocketErrorKind};
pub use option::{OptionLevel, OptionName, OptionValue, SocketOption, ValueType};
pub use transport::Transport;
pub use types::{
    AddressFamily, BackendKind, ProtocolKind, SelectMode, Shutdown, SocketFlags, SocketKind,
};

/// 统一的结果别名，错误类型默认为 [`SocketError`]。
pub type Result<T, E = SocketError> = core::result::Result<T, E>;
