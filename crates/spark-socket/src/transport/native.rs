use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use spark_socket_core::error::{OperationCode, op};
use spark_socket_core::{
    AddressFamily, BackendKind, OptionValue, ProtocolKind, Shutdown, SocketError, SocketErrorKind,
    SocketFlags, SocketKind, SocketOption, Transport, translate,
};

use super::sockopt;

/// 直接调用内核套接字的后端。
///
/// # 教案式说明
/// - **契约 (What)**：每个方法对应一次系统调用，errno 经 [`translate`] 翻译后返回；
/// - **关闭 (How)**：[`Transport::close`] 执行 `shutdown(Both)` 唤醒阻塞中的 `recv`/`accept`，
///   描述符本身在传输被释放时关闭，避免描述符号被复用后误操作其他连接；
/// - **超时**：阻塞模式下因 `SO_RCVTIMEO`/`SO_SNDTIMEO` 返回的 `EAGAIN` 翻译为 `TimedOut`。
#[derive(Debug)]
pub struct NativeTransport {
    socket: Socket,
    family: AddressFamily,
    kind: SocketKind,
    protocol: ProtocolKind,
    blocking: AtomicBool,
    listening: AtomicBool,
    closed: AtomicBool,
}

impl NativeTransport {
    pub fn create(
        family: AddressFamily,
        kind: SocketKind,
        protocol: ProtocolKind,
    ) -> Result<Self, SocketError> {
        let domain = match family {
            AddressFamily::InterNetwork => Domain::IPV4,
            AddressFamily::InterNetworkV6 => Domain::IPV6,
        };
        let ty = match kind {
            SocketKind::Stream => Type::STREAM,
            SocketKind::Datagram => Type::DGRAM,
            SocketKind::Raw => Type::RAW,
        };
        let proto = match protocol {
            ProtocolKind::Unspecified => None,
            ProtocolKind::Tcp => Some(Protocol::TCP),
            ProtocolKind::Udp => Some(Protocol::UDP),
            ProtocolKind::Icmp => Some(Protocol::ICMPV4),
            ProtocolKind::IcmpV6 => Some(Protocol::ICMPV6),
        };
        let socket =
            Socket::new(domain, ty, proto).map_err(|err| translate::from_io(op::CREATE, err))?;
        Ok(Self::from_socket(socket, family, kind, protocol))
    }

    fn from_socket(
        socket: Socket,
        family: AddressFamily,
        kind: SocketKind,
        protocol: ProtocolKind,
    ) -> Self {
        Self {
            socket,
            family,
            kind,
            protocol,
            blocking: AtomicBool::new(true),
            listening: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self, op: OperationCode) -> Result<(), SocketError> {
        if self.closed.load(Ordering::Acquire) {
            Err(SocketError::disposed(op))
        } else {
            Ok(())
        }
    }

    /// 关闭期间被唤醒的调用统一报告 `Disposed`；阻塞模式下的 `EAGAIN` 意味着超时。
    fn map_io(&self, op: OperationCode, err: std::io::Error) -> SocketError {
        if self.closed.load(Ordering::Acquire) {
            return SocketError::disposed(op);
        }
        let error = translate::from_io(op, err);
        if error.kind() == SocketErrorKind::WouldBlock && self.is_blocking() {
            return SocketError::new(SocketErrorKind::TimedOut, op);
        }
        error
    }

    fn to_socket_addr(addr: SockAddr, op: OperationCode) -> Result<SocketAddr, SocketError> {
        addr.as_socket().ok_or_else(|| {
            SocketError::with_message(
                SocketErrorKind::AddressFamilyNotSupported,
                op,
                format!("{}: peer address is not an IP endpoint", op.message),
            )
        })
    }
}

fn native_flags(flags: SocketFlags) -> libc::c_int {
    let mut native = 0;
    if flags.contains(SocketFlags::OUT_OF_BAND) {
        native |= libc::MSG_OOB;
    }
    if flags.contains(SocketFlags::PEEK) {
        native |= libc::MSG_PEEK;
    }
    if flags.contains(SocketFlags::DONT_ROUTE) {
        native |= libc::MSG_DONTROUTE;
    }
    native
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_flags(flags: SocketFlags) -> libc::c_int {
    native_flags(flags) | libc::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_flags(flags: SocketFlags) -> libc::c_int {
    native_flags(flags)
}

fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // SAFETY: `u8` 与 `MaybeUninit<u8>` 布局相同；内核只会写入已初始化的字节，
    // 且切片在返回期间一直由调用方独占借用。
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

impl Transport for NativeTransport {
    fn backend(&self) -> BackendKind {
        BackendKind::Native
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
        self.ensure_open(op::BIND)?;
        self.socket
            .bind(&SockAddr::from(addr))
            .map_err(|err| self.map_io(op::BIND, err))
    }

    fn listen(&self, backlog: u32) -> Result<(), SocketError> {
        self.ensure_open(op::LISTEN)?;
        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        self.socket
            .listen(backlog)
            .map_err(|err| self.map_io(op::LISTEN, err))?;
        self.listening.store(true, Ordering::Release);
        Ok(())
    }

    fn accept(&self) -> Result<(Arc<dyn Transport>, SocketAddr), SocketError> {
        self.ensure_open(op::ACCEPT)?;
        let (socket, addr) = self
            .socket
            .accept()
            .map_err(|err| self.map_io(op::ACCEPT, err))?;
        let remote = Self::to_socket_addr(addr, op::ACCEPT)?;
        // 被接受的连接总是以阻塞模式开始。
        socket
            .set_nonblocking(false)
            .map_err(|err| translate::from_io(op::ACCEPT, err))?;
        let accepted = Self::from_socket(socket, self.family, self.kind, self.protocol);
        Ok((Arc::new(accepted), remote))
    }

    fn connect(&self, addr: SocketAddr) -> Result<(), SocketError> {
        self.ensure_open(op::CONNECT)?;
        self.socket
            .connect(&SockAddr::from(addr))
            .map_err(|err| self.map_io(op::CONNECT, err))
    }

    fn finish_connect(&self) -> Result<(), SocketError> {
        self.ensure_open(op::CONNECT)?;
        if let Some(err) = self
            .socket
            .take_error()
            .map_err(|err| self.map_io(op::CONNECT, err))?
        {
            return Err(self.map_io(op::CONNECT, err));
        }
        match self.socket.peer_addr() {
            Ok(_) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::ENOTCONN) => {
                Err(SocketError::new(SocketErrorKind::InProgress, op::CONNECT))
            }
            Err(err) => Err(self.map_io(op::CONNECT, err)),
        }
    }

    fn send(&self, buf: &[u8], flags: SocketFlags) -> Result<usize, SocketError> {
        self.ensure_open(op::SEND)?;
        self.socket
            .send_with_flags(buf, send_flags(flags))
            .map_err(|err| self.map_io(op::SEND, err))
    }

    fn receive(&self, buf: &mut [u8], flags: SocketFlags) -> Result<usize, SocketError> {
        self.ensure_open(op::RECEIVE)?;
        self.socket
            .recv_with_flags(as_uninit(buf), native_flags(flags))
            .map_err(|err| self.map_io(op::RECEIVE, err))
    }

    fn send_to(
        &self,
        buf: &[u8],
        flags: SocketFlags,
        addr: SocketAddr,
    ) -> Result<usize, SocketError> {
        self.ensure_open(op::SEND_TO)?;
        self.socket
            .send_to_with_flags(buf, &SockAddr::from(addr), send_flags(flags))
            .map_err(|err| self.map_io(op::SEND_TO, err))
    }

    fn receive_from(
        &self,
        buf: &mut [u8],
        flags: SocketFlags,
    ) -> Result<(usize, SocketAddr), SocketError> {
        self.ensure_open(op::RECEIVE_FROM)?;
        let (read, addr) = self
            .socket
            .recv_from_with_flags(as_uninit(buf), native_flags(flags))
            .map_err(|err| self.map_io(op::RECEIVE_FROM, err))?;
        // 已连接的流式套接字不回填来源地址，此时以对端地址作答。
        let addr = match addr.as_socket() {
            Some(addr) => addr,
            None if self.kind.is_connection_oriented() => self
                .socket
                .peer_addr()
                .map_err(|err| self.map_io(op::RECEIVE_FROM, err))
                .and_then(|peer| Self::to_socket_addr(peer, op::RECEIVE_FROM))?,
            None => Self::to_socket_addr(addr, op::RECEIVE_FROM)?,
        };
        Ok((read, addr))
    }

    fn shutdown(&self, how: Shutdown) -> Result<(), SocketError> {
        self.ensure_open(op::SHUTDOWN)?;
        self.socket
            .shutdown(how.into())
            .map_err(|err| self.map_io(op::SHUTDOWN, err))
    }

    fn get_option(&self, option: SocketOption) -> Result<OptionValue, SocketError> {
        self.ensure_open(op::GET_OPTION)?;
        match option {
            SocketOption::Type => Ok(OptionValue::Int(self.kind.code())),
            SocketOption::AcceptConnection => {
                Ok(OptionValue::Bool(self.listening.load(Ordering::Acquire)))
            }
            other => sockopt::read(&self.socket, self.family, other),
        }
    }

    fn set_option(&self, option: SocketOption, value: OptionValue) -> Result<(), SocketError> {
        self.ensure_open(op::SET_OPTION)?;
        sockopt::write(&self.socket, self.family, option, value)
    }

    fn set_blocking(&self, blocking: bool) -> Result<(), SocketError> {
        self.ensure_open(op::SET_BLOCKING)?;
        self.socket
            .set_nonblocking(!blocking)
            .map_err(|err| translate::from_io(op::SET_BLOCKING, err))?;
        self.blocking.store(blocking, Ordering::Release);
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::Acquire)
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.ensure_open(op::ADDRESS)?;
        let addr = self
            .socket
            .local_addr()
            .map_err(|err| self.map_io(op::ADDRESS, err))?;
        Self::to_socket_addr(addr, op::ADDRESS)
    }

    fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        self.ensure_open(op::ADDRESS)?;
        let addr = self
            .socket
            .peer_addr()
            .map_err(|err| self.map_io(op::ADDRESS, err))?;
        Self::to_socket_addr(addr, op::ADDRESS)
    }

    fn available(&self) -> Result<usize, SocketError> {
        self.ensure_open(op::AVAILABLE)?;
        let mut pending: libc::c_int = 0;
        // SAFETY: FIONREAD 只向 `pending` 写入一个 `c_int`；描述符在 `self.socket` 存活期间有效。
        let rc = unsafe { libc::ioctl(self.socket.as_raw_fd(), libc::FIONREAD, &mut pending as *mut libc::c_int) };
        if rc < 0 {
            return Err(self.map_io(op::AVAILABLE, std::io::Error::last_os_error()));
        }
        Ok(usize::try_from(pending).unwrap_or(0))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // 未连接的套接字上 shutdown 会返回 ENOTCONN，但内核仍会唤醒阻塞中的调用。
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
    }

    fn selector_source(&self) -> Option<RawFd> {
        (!self.closed.load(Ordering::Acquire)).then(|| self.socket.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tcp() -> NativeTransport {
        NativeTransport::create(
            AddressFamily::InterNetwork,
            SocketKind::Stream,
            ProtocolKind::Tcp,
        )
        .expect("创建 TCP 套接字")
    }

    #[test]
    fn receive_on_unconnected_stream_is_not_connected() {
        let transport = tcp();
        let mut buf = [0u8; 4];
        let err = transport
            .receive(&mut buf, SocketFlags::NONE)
            .expect_err("未连接");
        assert_eq!(err.kind(), SocketErrorKind::NotConnected);
    }

    #[test]
    fn non_blocking_connect_reports_in_progress_then_finishes() {
        let listener = tcp();
        listener
            .bind("127.0.0.1:0".parse().expect("地址"))
            .expect("bind");
        listener.listen(4).expect("listen");
        let target = listener.local_addr().expect("local addr");

        let client = tcp();
        client.set_blocking(false).expect("非阻塞");
        match client.connect(target) {
            Ok(()) => {}
            Err(err) => assert_eq!(err.kind(), SocketErrorKind::InProgress),
        }
        let mut finished = false;
        for _ in 0..200 {
            match client.finish_connect() {
                Ok(()) => {
                    finished = true;
                    break;
                }
                Err(err) if err.kind() == SocketErrorKind::InProgress => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(err) => panic!("连接失败: {err}"),
            }
        }
        assert!(finished, "回环连接应在 1 秒内完成");
    }

    #[test]
    fn blocked_accept_is_released_by_close() {
        let listener = Arc::new(tcp());
        listener
            .bind("127.0.0.1:0".parse().expect("地址"))
            .expect("bind");
        listener.listen(1).expect("listen");
        let waiter = {
            let listener = Arc::clone(&listener);
            std::thread::spawn(move || listener.accept().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(50));
        listener.close();
        let err = waiter
            .join()
            .expect("线程正常退出")
            .expect_err("关闭后 accept 不应成功");
        assert_eq!(err.kind(), SocketErrorKind::Disposed);
    }

    #[test]
    fn receive_timeout_maps_to_timed_out() {
        let socket = NativeTransport::create(
            AddressFamily::InterNetwork,
            SocketKind::Datagram,
            ProtocolKind::Udp,
        )
        .expect("创建 UDP 套接字");
        socket
            .bind("127.0.0.1:0".parse().expect("地址"))
            .expect("bind");
        socket
            .set_option(
                SocketOption::ReceiveTimeout,
                OptionValue::Timeout(Some(Duration::from_millis(20))),
            )
            .expect("设置超时");
        let mut buf = [0u8; 8];
        let err = socket
            .receive_from(&mut buf, SocketFlags::NONE)
            .expect_err("无数据应超时");
        assert_eq!(err.kind(), SocketErrorKind::TimedOut);
    }
}
