use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use mio::Interest;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use spark_socket_core::error::{OperationCode, op};
use spark_socket_core::option::normalize_timeout;
use spark_socket_core::{
    AddressFamily, BackendKind, OptionValue, ProtocolKind, Shutdown, SocketError, SocketErrorKind,
    SocketFlags, SocketKind, SocketOption, Transport,
};

use super::error::ChannelError;
use super::listening::ListeningChannel;
use super::waiter::Waiter;
use crate::transport::sockopt;

/// 通道模型下内核监听队列的长度；用户可见的 backlog 由 [`ListeningChannel`] 模拟。
const KERNEL_BACKLOG: i32 = 1024;
/// `Available` 的探测上限。
const PEEK_LIMIT: usize = 64 * 1024;

/// 通道在生命周期中的形态。
///
/// 通道模型没有“已创建但未打开”的句柄：监听器与数据报通道在打开时一步完成绑定，
/// 流式通道在连接时才出现。`Unopened` 记录打开之前积累的绑定地址。
#[derive(Clone, Debug)]
enum ChannelSlot {
    Unopened { bound: Option<SocketAddr> },
    Stream(Arc<TcpStream>),
    Listener(Arc<ListeningChannel>),
    Datagram(Arc<UdpSocket>),
    Closed,
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Read,
    Write,
}

/// 基于 `mio` 通道/选择器模型的后端。
///
/// # 教案式说明
/// - **意图 (Why)**：证明同一份 `Socket` 契约可以由一个“不支持阻塞模式、只有通道与选择器”的传输满足；
/// - **阻塞模拟 (How)**：底层通道始终非阻塞；阻塞模式下遇到 `WouldBlock` 时，
///   在按方向区分的私有 `Poll` 上等待就绪，每 50ms 检查一次关闭标志；
/// - **选择器约束**：注册进多路复用器期间不允许切回阻塞模式，违例报告 `InvalidArgument`；
/// - **绑定怪癖**：流式通道在 `Listen`/`Connect` 之前没有句柄，`Bind` 借助一次性的 socket2 套接字
///   解析出实际端口并记录下来，之后打开通道时复用该地址；
/// - **选项缓冲**：通道打开前写入的选项暂存，打开时按写入顺序应用；读取时优先返回暂存值，
///   否则从同类型的一次性套接字读取缺省值。
#[derive(Debug)]
pub struct BridgedTransport {
    family: AddressFamily,
    kind: SocketKind,
    protocol: ProtocolKind,
    slot: RwLock<ChannelSlot>,
    blocking: AtomicBool,
    connect_pending: AtomicBool,
    /// 流式连接打开通道前的绑定地址；连接失败后回到 `Unopened` 时沿用。
    stream_bound: Mutex<Option<SocketAddr>>,
    attached: AtomicUsize,
    closed: AtomicBool,
    read_timeout: Mutex<Option<Duration>>,
    write_timeout: Mutex<Option<Duration>>,
    pending_options: Mutex<Vec<(SocketOption, OptionValue)>>,
    reader: Mutex<Option<Waiter>>,
    writer: Mutex<Option<Waiter>>,
}

impl BridgedTransport {
    pub fn create(
        family: AddressFamily,
        kind: SocketKind,
        protocol: ProtocolKind,
    ) -> Result<Self, SocketError> {
        if kind == SocketKind::Raw {
            return Err(SocketError::with_message(
                SocketErrorKind::ProtocolNotSupported,
                op::CREATE,
                "socket create: the channel backend has no raw channels",
            ));
        }
        Ok(Self::with_slot(
            family,
            kind,
            protocol,
            ChannelSlot::Unopened { bound: None },
        ))
    }

    fn with_slot(
        family: AddressFamily,
        kind: SocketKind,
        protocol: ProtocolKind,
        slot: ChannelSlot,
    ) -> Self {
        Self {
            family,
            kind,
            protocol,
            slot: RwLock::new(slot),
            blocking: AtomicBool::new(true),
            connect_pending: AtomicBool::new(false),
            stream_bound: Mutex::new(None),
            attached: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
            pending_options: Mutex::new(Vec::new()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    fn channel(&self) -> ChannelSlot {
        self.slot.read().clone()
    }

    fn domain(&self) -> Domain {
        match self.family {
            AddressFamily::InterNetwork => Domain::IPV4,
            AddressFamily::InterNetworkV6 => Domain::IPV6,
        }
    }

    fn socket_type(&self) -> Type {
        match self.kind {
            SocketKind::Datagram => Type::DGRAM,
            _ => Type::STREAM,
        }
    }

    fn unspecified(&self) -> SocketAddr {
        match self.family {
            AddressFamily::InterNetwork => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            AddressFamily::InterNetworkV6 => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        }
    }

    fn ensure_open(&self, op: OperationCode) -> Result<(), SocketError> {
        if self.closed.load(Ordering::Acquire) {
            Err(SocketError::disposed(op))
        } else {
            Ok(())
        }
    }

    /// 关闭之后浮现的任何失败都报告为 `Disposed`。
    fn fail(&self, op: OperationCode, error: ChannelError) -> SocketError {
        if self.closed.load(Ordering::Acquire) {
            return SocketError::disposed(op);
        }
        error.into_socket_error(op)
    }

    fn io_fail(&self, op: OperationCode, error: io::Error) -> SocketError {
        self.fail(op, ChannelError::Io(error))
    }

    fn timeout(&self, direction: Direction) -> Option<Duration> {
        match direction {
            Direction::Read => *self.read_timeout.lock(),
            Direction::Write => *self.write_timeout.lock(),
        }
    }

    fn deadline(&self, direction: Direction) -> Option<Instant> {
        self.timeout(direction)
            .map(|timeout| Instant::now() + timeout)
    }

    fn wait(
        &self,
        direction: Direction,
        fd: RawFd,
        deadline: Option<Instant>,
    ) -> Result<(), ChannelError> {
        let (slot, interest) = match direction {
            Direction::Read => (&self.reader, Interest::READABLE),
            Direction::Write => (&self.writer, Interest::WRITABLE),
        };
        let mut waiter = slot.lock();
        if waiter.is_none() {
            *waiter = Some(Waiter::new()?);
        }
        match waiter.as_mut() {
            Some(waiter) => waiter.wait(fd, interest, deadline, &self.closed),
            None => Err(ChannelError::Closed),
        }
    }

    /// 执行一次非阻塞通道调用；阻塞模式下遇到 `WouldBlock` 时等待就绪后重试。
    fn run<T>(
        &self,
        direction: Direction,
        fd: RawFd,
        mut attempt: impl FnMut() -> io::Result<T>,
    ) -> Result<T, ChannelError> {
        let deadline = self.deadline(direction);
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(ChannelError::Closed);
            }
            match attempt() {
                Ok(value) => return Ok(value),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && self.is_blocking() => {
                    self.wait(direction, fd, deadline)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn apply_pending(&self, socket: &Socket, op: OperationCode) -> Result<(), SocketError> {
        // 保留暂存选项：流式连接失败后回到 `Unopened`，重试时需要再次应用。
        let pending = self.pending_options.lock().clone();
        for (option, value) in pending {
            sockopt::write(socket, self.family, option, value)
                .map_err(|err| err.for_operation(op))?;
        }
        Ok(())
    }

    /// 创建一个非阻塞的 socket2 套接字并应用暂存选项，作为通道的底座。
    fn open_socket(&self, ty: Type, protocol: Protocol, op: OperationCode) -> Result<Socket, SocketError> {
        let socket = Socket::new(self.domain(), ty, Some(protocol))
            .map_err(|err| self.io_fail(op, err))?;
        socket
            .set_nonblocking(true)
            .map_err(|err| self.io_fail(op, err))?;
        if ty == Type::STREAM {
            socket
                .set_reuse_address(true)
                .map_err(|err| self.io_fail(op, err))?;
        }
        self.apply_pending(&socket, op)?;
        Ok(socket)
    }

    fn open_datagram(&self, local: SocketAddr, op: OperationCode) -> Result<UdpSocket, SocketError> {
        let socket = self.open_socket(Type::DGRAM, Protocol::UDP, op)?;
        socket
            .bind(&local.into())
            .map_err(|err| self.io_fail(op, err))?;
        Ok(UdpSocket::from_std(socket.into()))
    }

    fn open_listener(&self, local: SocketAddr, op: OperationCode) -> Result<TcpListener, SocketError> {
        let socket = self.open_socket(Type::STREAM, Protocol::TCP, op)?;
        socket
            .bind(&local.into())
            .map_err(|err| self.io_fail(op, err))?;
        socket
            .listen(KERNEL_BACKLOG)
            .map_err(|err| self.io_fail(op, err))?;
        Ok(TcpListener::from_std(socket.into()))
    }

    fn open_stream(
        &self,
        local: Option<SocketAddr>,
        remote: SocketAddr,
        op: OperationCode,
    ) -> Result<TcpStream, SocketError> {
        let socket = self.open_socket(Type::STREAM, Protocol::TCP, op)?;
        if let Some(local) = local {
            socket
                .bind(&local.into())
                .map_err(|err| self.io_fail(op, err))?;
        }
        match socket.connect(&remote.into()) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(err) => return Err(self.io_fail(op, err)),
        }
        Ok(TcpStream::from_std(socket.into()))
    }

    /// 用一次性套接字解析绑定地址（端口 0 会被替换为内核分配的端口）。
    fn reserve_address(&self, addr: SocketAddr) -> io::Result<SocketAddr> {
        let probe = Socket::new(self.domain(), Type::STREAM, Some(Protocol::TCP))?;
        probe.bind(&addr.into())?;
        probe
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not an IP endpoint"))
    }

    /// 连接失败的流式通道作废，套接字回到可重新连接的 `Unopened` 状态。
    fn abandon_stream(&self, stream: &Arc<TcpStream>) {
        let mut slot = self.slot.write();
        if matches!(&*slot, ChannelSlot::Stream(current) if Arc::ptr_eq(current, stream)) {
            *slot = ChannelSlot::Unopened {
                bound: *self.stream_bound.lock(),
            };
        }
        self.connect_pending.store(false, Ordering::Release);
    }

    fn finish_stream_connect(&self, stream: &TcpStream) -> Result<(), ChannelError> {
        if let Some(err) = stream.take_error()? {
            self.connect_pending.store(false, Ordering::Release);
            return Err(err.into());
        }
        match stream.peer_addr() {
            Ok(_) => {
                self.connect_pending.store(false, Ordering::Release);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                Err(ChannelError::ConnectionPending)
            }
            Err(err) => {
                self.connect_pending.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    fn with_sock_ref<T>(
        &self,
        op: OperationCode,
        action: impl FnOnce(&Socket) -> Result<T, SocketError>,
    ) -> Option<Result<T, SocketError>> {
        match self.channel() {
            ChannelSlot::Stream(stream) => Some(action(&SockRef::from(&*stream))),
            ChannelSlot::Listener(listener) => Some(action(&SockRef::from(listener.listener()))),
            ChannelSlot::Datagram(socket) => Some(action(&SockRef::from(&*socket))),
            ChannelSlot::Closed => Some(Err(SocketError::disposed(op))),
            ChannelSlot::Unopened { .. } => None,
        }
    }

    fn reject_flags(&self, flags: SocketFlags, allowed: SocketFlags, op: OperationCode) -> Result<(), SocketError> {
        if flags.bits() & !allowed.bits() == 0 {
            Ok(())
        } else {
            Err(self.fail(op, ChannelError::Unsupported("these message flags")))
        }
    }
}

fn would_block() -> io::Error {
    io::Error::from(io::ErrorKind::WouldBlock)
}

fn peek_len(result: io::Result<usize>) -> io::Result<usize> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
        other => other,
    }
}

impl Transport for BridgedTransport {
    fn backend(&self) -> BackendKind {
        BackendKind::Bridged
    }

    fn family(&self) -> AddressFamily {
        self.family
    }

    fn kind(&self) -> SocketKind {
        self.kind
    }

    fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    fn bind(&self, addr: SocketAddr) -> Result<(), SocketError> {
        let op = op::BIND;
        self.ensure_open(op)?;
        let mut slot = self.slot.write();
        match &*slot {
            ChannelSlot::Unopened { bound: None } => {}
            ChannelSlot::Closed => return Err(self.fail(op, ChannelError::Closed)),
            _ => return Err(self.fail(op, ChannelError::AlreadyBound)),
        }
        if self.kind == SocketKind::Datagram {
            let socket = self.open_datagram(addr, op)?;
            *slot = ChannelSlot::Datagram(Arc::new(socket));
            return Ok(());
        }
        let resolved = self
            .reserve_address(addr)
            .map_err(|err| self.io_fail(op, err))?;
        tracing::debug!(
            target: "spark_socket::bridge",
            requested = %addr,
            %resolved,
            "bind address reserved with a throwaway socket"
        );
        *slot = ChannelSlot::Unopened {
            bound: Some(resolved),
        };
        Ok(())
    }

    fn listen(&self, backlog: u32) -> Result<(), SocketError> {
        let op = op::LISTEN;
        self.ensure_open(op)?;
        if self.kind != SocketKind::Stream {
            return Err(self.fail(op, ChannelError::Unsupported("listening on datagram channels")));
        }
        let backlog = usize::try_from(backlog).unwrap_or(usize::MAX);
        let mut slot = self.slot.write();
        let bound = match &*slot {
            ChannelSlot::Listener(listener) => {
                listener.set_backlog(backlog);
                return Ok(());
            }
            ChannelSlot::Unopened { bound } => *bound,
            ChannelSlot::Closed => return Err(self.fail(op, ChannelError::Closed)),
            ChannelSlot::Stream(_) | ChannelSlot::Datagram(_) => {
                return Err(self.fail(op, ChannelError::InvalidState("connected")));
            }
        };
        let local = bound.unwrap_or_else(|| self.unspecified());
        let listener = self.open_listener(local, op)?;
        *slot = ChannelSlot::Listener(Arc::new(ListeningChannel::new(listener, backlog)));
        Ok(())
    }

    fn accept(&self) -> Result<(Arc<dyn Transport>, SocketAddr), SocketError> {
        let op = op::ACCEPT;
        self.ensure_open(op)?;
        let ChannelSlot::Listener(listener) = self.channel() else {
            return Err(self.fail(op, ChannelError::NotListening));
        };
        let (stream, remote) = self
            .run(Direction::Read, listener.as_raw_fd(), || {
                listener
                    .try_accept()
                    .and_then(|accepted| accepted.ok_or_else(would_block))
            })
            .map_err(|err| self.fail(op, err))?;
        let accepted = Self::with_slot(
            self.family,
            self.kind,
            self.protocol,
            ChannelSlot::Stream(Arc::new(stream)),
        );
        Ok((Arc::new(accepted), remote))
    }

    fn connect(&self, addr: SocketAddr) -> Result<(), SocketError> {
        let op = op::CONNECT;
        self.ensure_open(op)?;
        let stream = {
            let mut slot = self.slot.write();
            match &*slot {
                ChannelSlot::Unopened { bound } if self.kind == SocketKind::Datagram => {
                    let local = bound.unwrap_or_else(|| self.unspecified());
                    let socket = self.open_datagram(local, op)?;
                    socket.connect(addr).map_err(|err| self.io_fail(op, err))?;
                    *slot = ChannelSlot::Datagram(Arc::new(socket));
                    return Ok(());
                }
                ChannelSlot::Unopened { bound } => {
                    let stream = Arc::new(self.open_stream(*bound, addr, op)?);
                    *self.stream_bound.lock() = *bound;
                    self.connect_pending.store(true, Ordering::Release);
                    *slot = ChannelSlot::Stream(Arc::clone(&stream));
                    stream
                }
                ChannelSlot::Datagram(socket) => {
                    return socket.connect(addr).map_err(|err| self.io_fail(op, err));
                }
                ChannelSlot::Stream(_) if self.connect_pending.load(Ordering::Acquire) => {
                    return Err(self.fail(op, ChannelError::ConnectionPending));
                }
                ChannelSlot::Stream(_) => {
                    return Err(self.fail(op, ChannelError::AlreadyConnected));
                }
                ChannelSlot::Listener(_) => {
                    return Err(self.fail(op, ChannelError::InvalidState("listening")));
                }
                ChannelSlot::Closed => return Err(self.fail(op, ChannelError::Closed)),
            }
        };

        if !self.is_blocking() {
            return Err(self.fail(op, ChannelError::ConnectionPending));
        }
        let deadline = self.deadline(Direction::Write);
        loop {
            match self.finish_stream_connect(&stream) {
                Ok(()) => return Ok(()),
                Err(ChannelError::ConnectionPending) => self
                    .wait(Direction::Write, stream.as_raw_fd(), deadline)
                    .map_err(|err| self.fail(op, err))?,
                Err(err) => {
                    self.abandon_stream(&stream);
                    return Err(self.fail(op, err));
                }
            }
        }
    }

    fn finish_connect(&self) -> Result<(), SocketError> {
        let op = op::CONNECT;
        match self.channel() {
            ChannelSlot::Stream(stream) if self.connect_pending.load(Ordering::Acquire) => {
                match self.finish_stream_connect(&stream) {
                    Ok(()) => Ok(()),
                    Err(ChannelError::ConnectionPending) => {
                        Err(self.fail(op, ChannelError::ConnectionPending))
                    }
                    Err(err) => {
                        self.abandon_stream(&stream);
                        Err(self.fail(op, err))
                    }
                }
            }
            ChannelSlot::Stream(_) | ChannelSlot::Datagram(_) => Ok(()),
            ChannelSlot::Closed => Err(SocketError::disposed(op)),
            ChannelSlot::Unopened { .. } | ChannelSlot::Listener(_) => {
                Err(self.fail(op, ChannelError::NotYetConnected))
            }
        }
    }

    fn send(&self, buf: &[u8], flags: SocketFlags) -> Result<usize, SocketError> {
        let op = op::SEND;
        self.ensure_open(op)?;
        self.reject_flags(flags, SocketFlags::NONE, op)?;
        let outcome = match self.channel() {
            ChannelSlot::Stream(stream) => {
                self.run(Direction::Write, stream.as_raw_fd(), || (&*stream).write(buf))
            }
            ChannelSlot::Datagram(socket) => {
                self.run(Direction::Write, socket.as_raw_fd(), || socket.send(buf))
            }
            ChannelSlot::Closed => Err(ChannelError::Closed),
            ChannelSlot::Unopened { .. } | ChannelSlot::Listener(_) => {
                Err(ChannelError::NotYetConnected)
            }
        };
        outcome.map_err(|err| self.fail(op, err))
    }

    fn receive(&self, buf: &mut [u8], flags: SocketFlags) -> Result<usize, SocketError> {
        let op = op::RECEIVE;
        self.ensure_open(op)?;
        self.reject_flags(flags, SocketFlags::PEEK, op)?;
        let peek = flags.contains(SocketFlags::PEEK);
        let outcome = match self.channel() {
            ChannelSlot::Stream(stream) => self.run(Direction::Read, stream.as_raw_fd(), || {
                if peek {
                    stream.peek(buf)
                } else {
                    (&*stream).read(buf)
                }
            }),
            ChannelSlot::Datagram(socket) => self.run(Direction::Read, socket.as_raw_fd(), || {
                if peek {
                    socket.peek(buf)
                } else {
                    socket.recv(buf)
                }
            }),
            ChannelSlot::Closed => Err(ChannelError::Closed),
            ChannelSlot::Unopened { .. } if self.kind == SocketKind::Datagram => {
                Err(ChannelError::NotYetBound)
            }
            ChannelSlot::Unopened { .. } | ChannelSlot::Listener(_) => {
                Err(ChannelError::NotYetConnected)
            }
        };
        outcome.map_err(|err| self.fail(op, err))
    }

    fn send_to(
        &self,
        buf: &[u8],
        flags: SocketFlags,
        addr: SocketAddr,
    ) -> Result<usize, SocketError> {
        let op = op::SEND_TO;
        self.ensure_open(op)?;
        self.reject_flags(flags, SocketFlags::NONE, op)?;
        let channel = {
            let mut slot = self.slot.write();
            if matches!(&*slot, ChannelSlot::Unopened { .. }) && self.kind == SocketKind::Datagram {
                // 未绑定的数据报通道在首次发送时自动绑定到任意端口。
                let socket = Arc::new(self.open_datagram(self.unspecified(), op)?);
                *slot = ChannelSlot::Datagram(Arc::clone(&socket));
            }
            slot.clone()
        };
        let outcome = match channel {
            ChannelSlot::Datagram(socket) => {
                self.run(Direction::Write, socket.as_raw_fd(), || socket.send_to(buf, addr))
            }
            ChannelSlot::Stream(stream) => {
                self.run(Direction::Write, stream.as_raw_fd(), || (&*stream).write(buf))
            }
            ChannelSlot::Closed => Err(ChannelError::Closed),
            ChannelSlot::Unopened { .. } | ChannelSlot::Listener(_) => {
                Err(ChannelError::NotYetConnected)
            }
        };
        outcome.map_err(|err| self.fail(op, err))
    }

    fn receive_from(
        &self,
        buf: &mut [u8],
        flags: SocketFlags,
    ) -> Result<(usize, SocketAddr), SocketError> {
        let op = op::RECEIVE_FROM;
        self.ensure_open(op)?;
        self.reject_flags(flags, SocketFlags::PEEK, op)?;
        let peek = flags.contains(SocketFlags::PEEK);
        let outcome = match self.channel() {
            ChannelSlot::Datagram(socket) => self.run(Direction::Read, socket.as_raw_fd(), || {
                if peek {
                    socket.peek_from(buf)
                } else {
                    socket.recv_from(buf)
                }
            }),
            ChannelSlot::Stream(stream) => self
                .run(Direction::Read, stream.as_raw_fd(), || {
                    if peek {
                        stream.peek(buf)
                    } else {
                        (&*stream).read(buf)
                    }
                })
                .and_then(|read| Ok((read, stream.peer_addr()?))),
            ChannelSlot::Closed => Err(ChannelError::Closed),
            ChannelSlot::Unopened { .. } if self.kind == SocketKind::Datagram => {
                Err(ChannelError::NotYetBound)
            }
            ChannelSlot::Unopened { .. } | ChannelSlot::Listener(_) => {
                Err(ChannelError::NotYetConnected)
            }
        };
        outcome.map_err(|err| self.fail(op, err))
    }

    fn shutdown(&self, how: Shutdown) -> Result<(), SocketError> {
        let op = op::SHUTDOWN;
        self.ensure_open(op)?;
        match self.with_sock_ref(op, |socket| {
            socket
                .shutdown(how.into())
                .map_err(|err| self.io_fail(op, err))
        }) {
            Some(outcome) => outcome,
            None => Err(self.fail(op, ChannelError::NotYetConnected)),
        }
    }

    fn get_option(&self, option: SocketOption) -> Result<OptionValue, SocketError> {
        let op = op::GET_OPTION;
        self.ensure_open(op)?;
        match option {
            SocketOption::ReceiveTimeout => return Ok(OptionValue::Timeout(*self.read_timeout.lock())),
            SocketOption::SendTimeout => return Ok(OptionValue::Timeout(*self.write_timeout.lock())),
            SocketOption::Type => return Ok(OptionValue::Int(self.kind.code())),
            SocketOption::AcceptConnection => {
                return Ok(OptionValue::Bool(matches!(
                    self.channel(),
                    ChannelSlot::Listener(_)
                )));
            }
            _ => {}
        }
        let family = self.family;
        if let Some(outcome) = self.with_sock_ref(op, |socket| sockopt::read(socket, family, option)) {
            return outcome;
        }
        let buffered = self
            .pending_options
            .lock()
            .iter()
            .rev()
            .find(|(pending, _)| *pending == option)
            .map(|(_, value)| *value);
        if let Some(value) = buffered {
            return Ok(value);
        }
        let probe = Socket::new(self.domain(), self.socket_type(), None)
            .map_err(|err| self.io_fail(op, err))?;
        sockopt::read(&probe, self.family, option)
    }

    fn set_option(&self, option: SocketOption, value: OptionValue) -> Result<(), SocketError> {
        let op = op::SET_OPTION;
        self.ensure_open(op)?;
        match (option, value) {
            (SocketOption::ReceiveTimeout, OptionValue::Timeout(timeout)) => {
                *self.read_timeout.lock() = normalize_timeout(timeout);
                return Ok(());
            }
            (SocketOption::SendTimeout, OptionValue::Timeout(timeout)) => {
                *self.write_timeout.lock() = normalize_timeout(timeout);
                return Ok(());
            }
            _ => {}
        }
        // 持有写锁，避免与打开通道时的暂存选项应用交错。
        let slot = self.slot.write();
        match &*slot {
            ChannelSlot::Unopened { .. } => {
                let mut pending = self.pending_options.lock();
                pending.retain(|(existing, _)| *existing != option);
                pending.push((option, value));
                Ok(())
            }
            ChannelSlot::Stream(stream) => {
                sockopt::write(&SockRef::from(&**stream), self.family, option, value)
            }
            ChannelSlot::Listener(listener) => {
                sockopt::write(&SockRef::from(listener.listener()), self.family, option, value)
            }
            ChannelSlot::Datagram(socket) => {
                sockopt::write(&SockRef::from(&**socket), self.family, option, value)
            }
            ChannelSlot::Closed => Err(SocketError::disposed(op)),
        }
    }

    fn set_blocking(&self, blocking: bool) -> Result<(), SocketError> {
        let op = op::SET_BLOCKING;
        self.ensure_open(op)?;
        if blocking && self.attached.load(Ordering::Acquire) > 0 {
            return Err(self.fail(op, ChannelError::IllegalBlockingMode));
        }
        self.blocking.store(blocking, Ordering::Release);
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::Acquire)
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        let op = op::ADDRESS;
        self.ensure_open(op)?;
        let outcome = match self.channel() {
            ChannelSlot::Unopened { bound } => Ok(bound.unwrap_or_else(|| self.unspecified())),
            ChannelSlot::Stream(stream) => stream.local_addr(),
            ChannelSlot::Listener(listener) => listener.local_addr(),
            ChannelSlot::Datagram(socket) => socket.local_addr(),
            ChannelSlot::Closed => return Err(SocketError::disposed(op)),
        };
        outcome.map_err(|err| self.io_fail(op, err))
    }

    fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        let op = op::ADDRESS;
        self.ensure_open(op)?;
        let outcome = match self.channel() {
            ChannelSlot::Stream(stream) => stream.peer_addr(),
            ChannelSlot::Datagram(socket) => socket.peer_addr(),
            ChannelSlot::Closed => return Err(SocketError::disposed(op)),
            ChannelSlot::Unopened { .. } | ChannelSlot::Listener(_) => {
                return Err(self.fail(op, ChannelError::NotYetConnected));
            }
        };
        outcome.map_err(|err| self.io_fail(op, err))
    }

    fn available(&self) -> Result<usize, SocketError> {
        let op = op::AVAILABLE;
        self.ensure_open(op)?;
        let mut scratch = vec![0u8; PEEK_LIMIT];
        let outcome = match self.channel() {
            ChannelSlot::Stream(stream) => peek_len(stream.peek(&mut scratch)),
            ChannelSlot::Datagram(socket) => peek_len(socket.peek(&mut scratch)),
            ChannelSlot::Closed => return Err(SocketError::disposed(op)),
            ChannelSlot::Unopened { .. } | ChannelSlot::Listener(_) => Ok(0),
        };
        outcome.map_err(|err| self.io_fail(op, err))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let previous = std::mem::replace(&mut *self.slot.write(), ChannelSlot::Closed);
        let _ = match &previous {
            ChannelSlot::Stream(stream) => stream.shutdown(std::net::Shutdown::Both),
            ChannelSlot::Listener(listener) => {
                SockRef::from(listener.listener()).shutdown(std::net::Shutdown::Both)
            }
            ChannelSlot::Datagram(socket) => {
                SockRef::from(&**socket).shutdown(std::net::Shutdown::Both)
            }
            ChannelSlot::Unopened { .. } | ChannelSlot::Closed => Ok(()),
        };
        tracing::debug!(target: "spark_socket::bridge", kind = ?self.kind, "channel closed");
    }

    fn selector_source(&self) -> Option<RawFd> {
        match &*self.slot.read() {
            ChannelSlot::Stream(stream) => Some(stream.as_raw_fd()),
            ChannelSlot::Listener(listener) => Some(listener.as_raw_fd()),
            ChannelSlot::Datagram(socket) => Some(socket.as_raw_fd()),
            ChannelSlot::Unopened { .. } | ChannelSlot::Closed => None,
        }
    }

    fn requires_nonblocking_registration(&self) -> bool {
        true
    }

    fn attach_selector(&self) -> Result<(), SocketError> {
        let op = op::SELECT;
        self.ensure_open(op)?;
        if self.is_blocking() {
            return Err(self.fail(op, ChannelError::IllegalBlockingMode));
        }
        self.attached.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn detach_selector(&self) {
        let _ = self
            .attached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }

    fn has_buffered_input(&self) -> bool {
        match self.channel() {
            ChannelSlot::Listener(listener) => listener.has_pending(),
            _ => false,
        }
    }
}
