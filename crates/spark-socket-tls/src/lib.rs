#![doc = r#"
# spark-socket-tls

## 设计动机（Why）
- **原地升级**：已建立的明文连接可以在不重建 TCP 连接的前提下切换为 TLS，
  `Socket` 只需把持有的传输替换为升级后的 [`SecureTransport`]；
- **失败可回退**：握手失败不会破坏原传输，调用方仍可继续以明文收发；
- **热更新**：客户端配置存放在 `ArcSwap` 中，替换后只影响后续升级。

## 核心契约（What）
- [`TlsUpgrader::upgrade`]：对一个已连接、阻塞模式的流式传输执行客户端握手，
  成功返回新的安全传输，握手失败返回 `Ok(None)`；对已升级的传输返回同一个实例；
- [`SecureTransport`]：实现 [`Transport`](spark_socket_core::Transport)，读写路径对明文透明；
- [`UpgradeState`]：`Plain → Upgrading → Secured | Failed` 的状态报告。

## 实现策略（How）
- 握手通过 [`rustls::ClientConnection::complete_io`] 驱动，底层 IO 由传输适配层提供；
- 读写分别持有独立的门闩，连接状态锁只在加解密瞬间持有，底层阻塞调用期间不持锁；
- 非阻塞模式下写出的密文可能暂存在待发缓冲，下一次发送、接收或关闭时继续刷出。

## 风险与考量（Trade-offs）
- 仅实现客户端角色；
- 带外数据与 `PEEK` 标志在加密通道上无意义，统一返回 `OperationNotSupported`。
"#]

mod error;
mod io;
mod secure;
mod upgrader;

pub use secure::SecureTransport;
pub use upgrader::{TlsUpgrader, UpgradeState};
