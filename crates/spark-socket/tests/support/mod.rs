//! 集成测试共用的脚本化传输。
//!
//! `ScriptedTransport` 让队列行为可以被确定性地驱动：
//! - 每次 `send` 最多接受 `chunk` 字节，并记录每次调用实际看到的切片；
//! - `receive` 在有脚本数据前一直阻塞，`close` 会唤醒它并返回 `Disposed`；
//! - 可以预置一次性的发送错误，用于观察连接致命类错误的状态效果。

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use spark_socket::{
    AddressFamily, BackendKind, OptionValue, ProtocolKind, Shutdown, SocketError,
    SocketErrorKind, SocketFlags, SocketKind, SocketOption, Transport,
};
use spark_socket_core::error::op;

#[derive(Debug, Default)]
struct Inbox {
    chunks: VecDeque<Vec<u8>>,
    receivers_waiting: usize,
}

#[derive(Debug)]
pub struct ScriptedTransport {
    chunk: usize,
    sends: Mutex<Vec<Vec<u8>>>,
    send_error: Mutex<Option<SocketErrorKind>>,
    inbox: Mutex<Inbox>,
    arrived: Condvar,
    closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(chunk: usize) -> Arc<Self> {
        Arc::new(Self {
            chunk: chunk.max(1),
            sends: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
            inbox: Mutex::new(Inbox::default()),
            arrived: Condvar::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// 每次 `send` 调用看到的字节（已截断到 `chunk`）。
    pub fn sends(&self) -> Vec<Vec<u8>> {
        self.sends.lock().clone()
    }

    pub fn push_inbound(&self, data: &[u8]) {
        self.inbox.lock().chunks.push_back(data.to_vec());
        self.arrived.notify_all();
    }

    pub fn fail_next_send(&self, kind: SocketErrorKind) {
        *self.send_error.lock() = Some(kind);
    }

    /// 当前阻塞在 `receive` 中的调用数。
    pub fn receivers_waiting(&self) -> usize {
        self.inbox.lock().receivers_waiting
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9))
    }
}

impl Transport for ScriptedTransport {
    fn backend(&self) -> BackendKind {
        BackendKind::Native
    }

    fn family(&self) -> AddressFamily {
        AddressFamily::InterNetwork
    }

    fn kind(&self) -> SocketKind {
        SocketKind::Stream
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Tcp
    }

    fn bind(&self, _addr: SocketAddr) -> Result<(), SocketError> {
        Ok(())
    }

    fn listen(&self, _backlog: u32) -> Result<(), SocketError> {
        Ok(())
    }

    fn accept(&self) -> Result<(Arc<dyn Transport>, SocketAddr), SocketError> {
        Err(SocketError::new(
            SocketErrorKind::OperationNotSupported,
            op::ACCEPT,
        ))
    }

    fn connect(&self, _addr: SocketAddr) -> Result<(), SocketError> {
        Ok(())
    }

    fn finish_connect(&self) -> Result<(), SocketError> {
        Ok(())
    }

    fn send(&self, buf: &[u8], _flags: SocketFlags) -> Result<usize, SocketError> {
        if self.is_closed() {
            return Err(SocketError::disposed(op::SEND));
        }
        if let Some(kind) = self.send_error.lock().take() {
            return Err(SocketError::new(kind, op::SEND));
        }
        let accepted = buf.len().min(self.chunk);
        self.sends.lock().push(buf[..accepted].to_vec());
        Ok(accepted)
    }

    fn receive(&self, buf: &mut [u8], _flags: SocketFlags) -> Result<usize, SocketError> {
        let mut inbox = self.inbox.lock();
        inbox.receivers_waiting += 1;
        let outcome = loop {
            if self.is_closed() {
                break Err(SocketError::disposed(op::RECEIVE));
            }
            if let Some(mut chunk) = inbox.chunks.pop_front() {
                let read = chunk.len().min(buf.len());
                buf[..read].copy_from_slice(&chunk[..read]);
                if read < chunk.len() {
                    inbox.chunks.push_front(chunk.split_off(read));
                }
                break Ok(read);
            }
            self.arrived.wait(&mut inbox);
        };
        inbox.receivers_waiting -= 1;
        outcome
    }

    fn send_to(
        &self,
        buf: &[u8],
        flags: SocketFlags,
        _addr: SocketAddr,
    ) -> Result<usize, SocketError> {
        self.send(buf, flags)
    }

    fn receive_from(
        &self,
        buf: &mut [u8],
        flags: SocketFlags,
    ) -> Result<(usize, SocketAddr), SocketError> {
        self.receive(buf, flags).map(|read| (read, Self::peer()))
    }

    fn shutdown(&self, _how: Shutdown) -> Result<(), SocketError> {
        Ok(())
    }

    fn get_option(&self, _option: SocketOption) -> Result<OptionValue, SocketError> {
        Err(SocketError::new(
            SocketErrorKind::ProtocolOptionNotSupported,
            op::GET_OPTION,
        ))
    }

    fn set_option(&self, _option: SocketOption, _value: OptionValue) -> Result<(), SocketError> {
        Ok(())
    }

    fn set_blocking(&self, _blocking: bool) -> Result<(), SocketError> {
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 7)))
    }

    fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(Self::peer())
    }

    fn available(&self) -> Result<usize, SocketError> {
        Ok(self.inbox.lock().chunks.iter().map(Vec::len).sum())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.inbox.lock();
        self.arrived.notify_all();
    }
}
