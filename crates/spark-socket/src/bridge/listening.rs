use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};

use mio::net::{TcpListener, TcpStream};
use parking_lot::Mutex;

/// 监听通道：在 `mio` 监听器之上模拟 backlog。
///
/// 通道模型的监听器在打开时就固定了内核 backlog，无法按 `Listen(backlog)` 调整；
/// 这里以用户态队列收割已完成握手的连接，队列长度不超过调用方给出的 backlog。
#[derive(Debug)]
pub(crate) struct ListeningChannel {
    listener: TcpListener,
    backlog: AtomicUsize,
    harvested: Mutex<VecDeque<(TcpStream, SocketAddr)>>,
}

impl ListeningChannel {
    pub(crate) fn new(listener: TcpListener, backlog: usize) -> Self {
        Self {
            listener,
            backlog: AtomicUsize::new(backlog.max(1)),
            harvested: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn set_backlog(&self, backlog: usize) {
        self.backlog.store(backlog.max(1), Ordering::Release);
    }

    pub(crate) fn listener(&self) -> &TcpListener {
        &self.listener
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 取出一个已完成握手的连接；暂无连接时返回 `Ok(None)`。
    pub(crate) fn try_accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let mut harvested = self.harvested.lock();
        self.harvest(&mut harvested)?;
        Ok(harvested.pop_front())
    }

    pub(crate) fn has_pending(&self) -> bool {
        let mut harvested = self.harvested.lock();
        // 收割失败不影响已在队列中的连接；错误会在下一次 accept 时再次出现。
        let _ = self.harvest(&mut harvested);
        !harvested.is_empty()
    }

    fn harvest(&self, harvested: &mut VecDeque<(TcpStream, SocketAddr)>) -> io::Result<()> {
        let backlog = self.backlog.load(Ordering::Acquire);
        while harvested.len() < backlog {
            match self.listener.accept() {
                Ok(connection) => harvested.push_back(connection),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    if harvested.is_empty() {
                        return Err(err);
                    }
                    break;
                }
            }
        }
        Ok(())
    }
}

impl AsRawFd for ListeningChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}
