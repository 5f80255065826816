//! 后端传输能力集。
//!
//! # 教案式说明
//! - **意图 (Why)**：`Socket` 只依赖这一份能力集，原生后端与通道桥接后端、以及 TLS 包装层都实现它，
//!   因而同一个 `Socket` 可以在运行期把明文传输替换为加密传输；
//! - **契约 (What)**：
//!   - 所有方法以 `&self` 调用，允许发送类与接收类操作在不同线程并发；
//!   - 错误一律为 [`SocketError`]，后端特有异常必须在返回前翻译；
//!   - 阻塞模式下的调用会挂起当前线程直至后端完成，[`Transport::close`] 必须能唤醒被阻塞的调用；
//!   - 后五个就绪相关钩子服务于多路复用器，默认实现对应“无需额外处理”的原生后端语义；
//! - **风险 (Trade-offs)**：trait 对象化带来一次动态分派，相比系统调用本身的开销可忽略。

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::error::SocketError;
use crate::option::{OptionValue, SocketOption};
use crate::types::{AddressFamily, BackendKind, ProtocolKind, Shutdown, SocketFlags, SocketKind};

pub trait Transport: Send + Sync + fmt::Debug + 'static {
    fn backend(&self) -> BackendKind;

    fn family(&self) -> AddressFamily;

    fn kind(&self) -> SocketKind;

    fn protocol(&self) -> ProtocolKind;

    fn bind(&self, addr: SocketAddr) -> Result<(), SocketError>;

    fn listen(&self, backlog: u32) -> Result<(), SocketError>;

    /// 接受一个新连接，返回对应的新传输与对端地址。
    fn accept(&self) -> Result<(Arc<dyn Transport>, SocketAddr), SocketError>;

    /// 发起连接。非阻塞模式下返回 `InProgress` 表示连接仍在进行。
    fn connect(&self, addr: SocketAddr) -> Result<(), SocketError>;

    /// 在多路复用器报告可写后完成非阻塞连接；仍未完成时返回 `InProgress`。
    fn finish_connect(&self) -> Result<(), SocketError>;

    /// 返回实际写出的字节数，可能少于 `buf.len()`。
    fn send(&self, buf: &[u8], flags: SocketFlags) -> Result<usize, SocketError>;

    /// 返回 `Ok(0)` 表示对端已有序关闭。
    fn receive(&self, buf: &mut [u8], flags: SocketFlags) -> Result<usize, SocketError>;

    fn send_to(&self, buf: &[u8], flags: SocketFlags, addr: SocketAddr)
    -> Result<usize, SocketError>;

    fn receive_from(
        &self,
        buf: &mut [u8],
        flags: SocketFlags,
    ) -> Result<(usize, SocketAddr), SocketError>;

    fn shutdown(&self, how: Shutdown) -> Result<(), SocketError>;

    fn get_option(&self, option: SocketOption) -> Result<OptionValue, SocketError>;

    fn set_option(&self, option: SocketOption, value: OptionValue) -> Result<(), SocketError>;

    fn set_blocking(&self, blocking: bool) -> Result<(), SocketError>;

    fn is_blocking(&self) -> bool;

    fn local_addr(&self) -> Result<SocketAddr, SocketError>;

    fn peer_addr(&self) -> Result<SocketAddr, SocketError>;

    /// 无需阻塞即可读取的字节数。
    fn available(&self) -> Result<usize, SocketError>;

    /// 释放底层句柄并唤醒所有阻塞中的调用。重复调用为空操作。
    fn close(&self);

    /// 多路复用器用于注册就绪兴趣的描述符；关闭后返回 `None`。
    fn selector_source(&self) -> Option<RawFd> {
        None
    }

    /// 注册进选择器前是否必须切换为非阻塞模式。
    fn requires_nonblocking_registration(&self) -> bool {
        false
    }

    fn attach_selector(&self) -> Result<(), SocketError> {
        Ok(())
    }

    fn detach_selector(&self) {}

    /// 已经缓存在用户态、无需等待内核即可读取的数据。
    fn has_buffered_input(&self) -> bool {
        false
    }

    fn is_secure(&self) -> bool {
        false
    }
}
