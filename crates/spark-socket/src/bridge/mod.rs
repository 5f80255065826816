//! 通道/选择器模型的桥接后端。
//!
//! 目录结构：
//! - `transport`：[`BridgedTransport`] 本体与通道生命周期；
//! - `listening`：backlog 模拟；
//! - `waiter`：阻塞模式模拟；
//! - `error`：[`ChannelError`] 及其翻译。

mod error;
mod listening;
mod transport;
mod waiter;

pub use error::ChannelError;
pub use transport::BridgedTransport;
