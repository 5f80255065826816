use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use spark_socket_core::error::{OperationCode, op};
use spark_socket_core::{
    AddressFamily, BackendKind, ErrorClass, OptionLevel, OptionName, OptionValue, ProtocolKind,
    SelectMode, Shutdown, SocketError, SocketErrorKind, SocketFlags, SocketKind, SocketOption,
    Transport, protocol_support,
};
use spark_socket_tls::{TlsUpgrader, UpgradeState};
use tracing::{debug, trace};

use crate::engine::{SocketEngine, WorkerPool};
use crate::mux::{Multiplexer, SelectSet, Selectable};
use crate::queue::{
    self, Completed, OperationExecutor, OperationHandle, OperationKind, OperationQueue, Payload,
    PendingOperation, Step,
};
use crate::transport;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// 连接相关的缓存状态，`local`/`remote` 即 Bind/Connect/Accept 后记录的端点种子。
#[derive(Default)]
struct SocketState {
    bound: bool,
    connected: bool,
    listening: bool,
    disconnected: bool,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    /// 多路复用器判定失败的非阻塞连接，由下一次连接执行取走。
    connect_error: Option<SocketError>,
}

struct SocketInner {
    id: u64,
    family: AddressFamily,
    kind: SocketKind,
    protocol: ProtocolKind,
    engine: SocketEngine,
    transport: RwLock<Arc<dyn Transport>>,
    state: Mutex<SocketState>,
    closed: AtomicBool,
    connect_pending: AtomicBool,
    upgrade: Mutex<UpgradeState>,
    queue: OperationQueue,
}

/// 面向调用方的套接字。
///
/// # 教案式说明
/// - **意图 (Why)**：把操作队列、后端传输、多路复用器与 TLS 升级组合成一个 BSD 风格的实体；
/// - **契约 (What)**：
///   - 同步方法先校验参数，再直接调用后端；`*_async` 方法进入按类别串行的操作队列，
///     返回的 [`OperationHandle`] 以同样的错误形态交付结果；
///   - 关闭之后任何操作都不会到达后端，一律返回 `Disposed`；
///   - 连接致命类错误（Refused/Reset/Aborted 等）会把套接字标记为未连接；
///   - `Clone` 得到的是同一个套接字的另一个句柄；
/// - **风险 (Trade-offs)**：排队中的操作持有套接字内部状态，最后一个句柄被释放不代表描述符立即关闭，
///   需要确定性释放时调用 [`Socket::close`]。
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl Socket {
    /// 以引擎配置的后端创建套接字。
    pub fn new(
        engine: &SocketEngine,
        family: AddressFamily,
        kind: SocketKind,
        protocol: ProtocolKind,
    ) -> Result<Self, SocketError> {
        if !protocol.is_compatible_with(kind) {
            return Err(SocketError::new(
                SocketErrorKind::ProtocolNotSupported,
                op::CREATE,
            ));
        }
        if !protocol_support::is_supported(family) {
            return Err(SocketError::new(
                SocketErrorKind::AddressFamilyNotSupported,
                op::CREATE,
            ));
        }
        let transport =
            transport::create(engine.config().backend.into(), family, kind, protocol)?;
        let socket = Self::from_transport(engine, transport);
        socket.inner.apply_tcp_defaults()?;
        Ok(socket)
    }

    /// 以任意 [`Transport`] 实现构造套接字，用于自定义后端。
    pub fn from_transport(engine: &SocketEngine, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
                family: transport.family(),
                kind: transport.kind(),
                protocol: transport.protocol(),
                engine: engine.clone(),
                transport: RwLock::new(transport),
                state: Mutex::new(SocketState::default()),
                closed: AtomicBool::new(false),
                connect_pending: AtomicBool::new(false),
                upgrade: Mutex::new(UpgradeState::Plain),
                queue: OperationQueue::default(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn family(&self) -> AddressFamily {
        self.inner.family
    }

    pub fn kind(&self) -> SocketKind {
        self.inner.kind
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.inner.protocol
    }

    pub fn backend(&self) -> BackendKind {
        self.inner.current().backend()
    }

    /// 当前生效的传输；TLS 升级成功后为安全传输。
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.current()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.state.lock().bound
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    pub fn is_listening(&self) -> bool {
        self.inner.state.lock().listening
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn is_blocking(&self) -> bool {
        self.inner.current().is_blocking()
    }

    pub fn is_secure(&self) -> bool {
        self.inner.current().is_secure()
    }

    pub fn upgrade_state(&self) -> UpgradeState {
        *self.inner.upgrade.lock()
    }

    pub fn set_blocking(&self, blocking: bool) -> Result<(), SocketError> {
        self.inner.open(op::SET_BLOCKING)?.set_blocking(blocking)
    }

    pub fn bind(&self, addr: SocketAddr) -> Result<(), SocketError> {
        let transport = self.inner.open(op::BIND)?;
        self.inner.check_family(&addr, op::BIND)?;
        if self.inner.state.lock().bound {
            return Err(SocketError::invalid_argument(
                op::BIND,
                "socket is already bound",
            ));
        }
        transport.bind(addr)?;
        let local = transport.local_addr().ok().unwrap_or(addr);
        let mut state = self.inner.state.lock();
        state.bound = true;
        state.local = Some(local);
        Ok(())
    }

    /// `backlog` 为 0 时使用引擎配置的缺省值。
    pub fn listen(&self, backlog: u32) -> Result<(), SocketError> {
        let transport = self.inner.open(op::LISTEN)?;
        let backlog = if backlog == 0 {
            self.inner.engine.config().default_backlog
        } else {
            backlog
        };
        transport.listen(backlog)?;
        let local = transport.local_addr().ok();
        let mut state = self.inner.state.lock();
        state.listening = true;
        state.bound = true;
        state.local = local.or(state.local);
        Ok(())
    }

    pub fn accept(&self) -> Result<Socket, SocketError> {
        let transport = self.inner.open(op::ACCEPT)?;
        self.inner.check_listening()?;
        let (accepted, remote) = self.inner.observe(transport.accept())?;
        Socket::accepted(&self.inner.engine, accepted, remote)
    }

    /// 非阻塞模式下返回 `InProgress`，连接完成由 [`Socket::poll`] 或 [`Socket::select`] 观察。
    pub fn connect(&self, addr: SocketAddr) -> Result<(), SocketError> {
        let transport = self.inner.open(op::CONNECT)?;
        self.inner.check_connect(&addr)?;
        match transport.connect(addr) {
            Ok(()) => {
                self.inner.mark_connected(&*transport, addr);
                Ok(())
            }
            Err(err) if err.is_pending() => {
                self.inner.mark_connect_pending(addr);
                Err(err)
            }
            Err(err) => self.inner.observe(Err(err)),
        }
    }

    /// 双向关闭连接并清空端点缓存；之后流式套接字不能再次连接。
    pub fn disconnect(&self) -> Result<(), SocketError> {
        let transport = self.inner.open(op::DISCONNECT)?;
        self.inner.disconnect_on(&*transport)
    }

    pub fn send(&self, buf: &[u8], flags: SocketFlags) -> Result<usize, SocketError> {
        let transport = self.inner.open(op::SEND)?;
        self.inner.observe(transport.send(buf, flags))
    }

    pub fn send_to(
        &self,
        buf: &[u8],
        flags: SocketFlags,
        addr: SocketAddr,
    ) -> Result<usize, SocketError> {
        let transport = self.inner.open(op::SEND_TO)?;
        self.inner.check_family(&addr, op::SEND_TO)?;
        self.inner.observe(transport.send_to(buf, flags, addr))
    }

    pub fn receive(&self, buf: &mut [u8], flags: SocketFlags) -> Result<usize, SocketError> {
        let transport = self.inner.open(op::RECEIVE)?;
        self.inner.observe(transport.receive(buf, flags))
    }

    pub fn receive_from(
        &self,
        buf: &mut [u8],
        flags: SocketFlags,
    ) -> Result<(usize, SocketAddr), SocketError> {
        let transport = self.inner.open(op::RECEIVE_FROM)?;
        self.inner.observe(transport.receive_from(buf, flags))
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<(), SocketError> {
        let transport = self.inner.open(op::SHUTDOWN)?;
        self.inner.observe(transport.shutdown(how))
    }

    pub fn available(&self) -> Result<usize, SocketError> {
        self.inner.open(op::AVAILABLE)?.available()
    }

    pub fn local_endpoint(&self) -> Result<SocketAddr, SocketError> {
        let transport = self.inner.open(op::ADDRESS)?;
        if let Some(local) = self.inner.state.lock().local {
            return Ok(local);
        }
        let local = transport.local_addr()?;
        self.inner.state.lock().local = Some(local);
        Ok(local)
    }

    pub fn remote_endpoint(&self) -> Result<SocketAddr, SocketError> {
        let transport = self.inner.open(op::ADDRESS)?;
        {
            let state = self.inner.state.lock();
            if state.connected {
                if let Some(remote) = state.remote {
                    return Ok(remote);
                }
            }
        }
        transport.peer_addr()
    }

    pub fn get_option(
        &self,
        level: OptionLevel,
        name: OptionName,
    ) -> Result<OptionValue, SocketError> {
        let transport = self.inner.open(op::GET_OPTION)?;
        let option = SocketOption::resolve(level, name, op::GET_OPTION)?;
        transport.get_option(option)
    }

    pub fn set_option(
        &self,
        level: OptionLevel,
        name: OptionName,
        value: OptionValue,
    ) -> Result<(), SocketError> {
        let transport = self.inner.open(op::SET_OPTION)?;
        let option = SocketOption::resolve(level, name, op::SET_OPTION)?;
        option.check_value(&value)?;
        transport.set_option(option, value)
    }

    /// 单个套接字、单一模式的就绪等待；超时单位为微秒，负数表示一直等待。
    pub fn poll(&self, timeout_us: i64, mode: SelectMode) -> Result<bool, SocketError> {
        self.inner.open(op::POLL)?;
        Multiplexer::poll(self, mode, timeout_us)
    }

    /// select 语义：返回三张列表中已就绪的套接字，未就绪者被移除。
    pub fn select<'a>(
        set: SelectSet<'a, Socket>,
        timeout_us: i64,
    ) -> Result<SelectSet<'a, Socket>, SocketError> {
        Multiplexer::select(set, timeout_us)
    }

    /// 在已连接的阻塞套接字上原地完成 TLS 客户端握手。
    ///
    /// 返回 `Ok(false)` 表示握手失败，套接字仍以明文可用；已升级的套接字再次调用返回 `Ok(true)`
    /// 且传输实例保持不变。存在排队中的异步操作时拒绝升级；握手期间提交的异步操作
    /// 先排队，握手结束后在届时的传输上执行。
    pub fn upgrade_to_secure(
        &self,
        upgrader: &TlsUpgrader,
        remote_hint: Option<&str>,
    ) -> Result<bool, SocketError> {
        let transport = self.inner.open(op::UPGRADE)?;
        let previous = {
            let mut state = self.inner.upgrade.lock();
            let previous = *state;
            state.begin()?;
            if !self.inner.queue.try_gate() {
                *state = previous;
                return Err(SocketError::invalid_argument(
                    op::UPGRADE,
                    "queued operations are still outstanding",
                ));
            }
            previous
        };

        let outcome = upgrader.upgrade(&transport, remote_hint);
        let result = self.finish_upgrade(&transport, previous, outcome);
        queue::release(&self.inner);
        result
    }

    fn finish_upgrade(
        &self,
        transport: &Arc<dyn Transport>,
        previous: UpgradeState,
        outcome: Result<Option<Arc<dyn Transport>>, SocketError>,
    ) -> Result<bool, SocketError> {
        let mut state = self.inner.upgrade.lock();
        match outcome {
            Ok(Some(secure)) => {
                if !Arc::ptr_eq(&secure, transport) {
                    *self.inner.transport.write() = secure;
                }
                state.finish(true);
                Ok(true)
            }
            Ok(None) => {
                state.finish(false);
                Ok(false)
            }
            Err(err) => {
                *state = previous;
                Err(err)
            }
        }
    }

    /// 幂等关闭：唤醒阻塞中的后端调用，并以 `Disposed` 完成所有排队操作。
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn accept_async(&self) -> OperationHandle {
        self.submit(OperationKind::Accept, SocketFlags::NONE, None, Payload::Empty)
    }

    pub fn connect_async(&self, addr: SocketAddr) -> OperationHandle {
        self.submit(OperationKind::Connect, SocketFlags::NONE, Some(addr), Payload::Empty)
    }

    pub fn disconnect_async(&self) -> OperationHandle {
        self.submit(OperationKind::Disconnect, SocketFlags::NONE, None, Payload::Empty)
    }

    /// 完成时 `transferred` 一定等于 `data.len()`，短写在队列内部续写。
    pub fn send_async(&self, data: Bytes, flags: SocketFlags) -> OperationHandle {
        self.send_segments_async(vec![data], flags)
    }

    pub fn send_segments_async(&self, segments: Vec<Bytes>, flags: SocketFlags) -> OperationHandle {
        self.submit(OperationKind::Send, flags, None, Payload::send(segments))
    }

    pub fn send_to_async(
        &self,
        data: Bytes,
        flags: SocketFlags,
        addr: SocketAddr,
    ) -> OperationHandle {
        self.submit(OperationKind::SendTo, flags, Some(addr), Payload::send([data]))
    }

    /// 读入 `buffer` 的剩余容量，完成时交还截断后的缓冲区。
    pub fn receive_async(&self, buffer: BytesMut, flags: SocketFlags) -> OperationHandle {
        self.submit(OperationKind::Receive, flags, None, Payload::receive(buffer))
    }

    pub fn receive_from_async(&self, buffer: BytesMut, flags: SocketFlags) -> OperationHandle {
        self.submit(OperationKind::ReceiveFrom, flags, None, Payload::receive(buffer))
    }

    fn submit(
        &self,
        kind: OperationKind,
        flags: SocketFlags,
        remote: Option<SocketAddr>,
        payload: Payload,
    ) -> OperationHandle {
        queue::submit(&self.inner, PendingOperation::new(kind, flags, remote, payload))
    }

    fn accepted(
        engine: &SocketEngine,
        transport: Arc<dyn Transport>,
        remote: SocketAddr,
    ) -> Result<Socket, SocketError> {
        let socket = Self::from_transport(engine, transport);
        {
            let mut state = socket.inner.state.lock();
            state.bound = true;
            state.connected = true;
            state.remote = Some(remote);
        }
        socket.inner.apply_tcp_defaults()?;
        Ok(socket)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.inner.id)
            .field("family", &self.inner.family)
            .field("kind", &self.inner.kind)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl Selectable for Socket {
    fn id(&self) -> u64 {
        self.inner.id
    }

    fn transport(&self) -> Arc<dyn Transport> {
        self.inner.current()
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_closed()
    }

    fn connect_pending(&self) -> bool {
        self.inner.connect_pending()
    }

    fn connect_finished(&self, result: &Result<(), SocketError>) {
        self.inner.connect_finished(result);
    }
}

impl SocketInner {
    fn current(&self) -> Arc<dyn Transport> {
        self.transport.read().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn connect_pending(&self) -> bool {
        self.connect_pending.load(Ordering::Acquire)
    }

    /// 未关闭时返回当前传输。
    fn open(&self, op: OperationCode) -> Result<Arc<dyn Transport>, SocketError> {
        if self.is_closed() {
            return Err(SocketError::disposed(op));
        }
        Ok(self.current())
    }

    fn check_family(&self, addr: &SocketAddr, op: OperationCode) -> Result<(), SocketError> {
        if self.family.matches(addr) {
            Ok(())
        } else {
            Err(SocketError::new(
                SocketErrorKind::AddressFamilyNotSupported,
                op,
            ))
        }
    }

    fn check_listening(&self) -> Result<(), SocketError> {
        if self.state.lock().listening {
            Ok(())
        } else {
            Err(SocketError::invalid_argument(
                op::ACCEPT,
                "socket is not listening",
            ))
        }
    }

    fn check_connect(&self, addr: &SocketAddr) -> Result<(), SocketError> {
        self.check_family(addr, op::CONNECT)?;
        if self.connect_pending() {
            return Err(SocketError::new(SocketErrorKind::InProgress, op::CONNECT));
        }
        let mut state = self.state.lock();
        state.connect_error = None;
        if !self.kind.is_connection_oriented() {
            return Ok(());
        }
        if state.listening {
            return Err(SocketError::invalid_argument(
                op::CONNECT,
                "listening socket cannot connect",
            ));
        }
        if state.connected {
            return Err(SocketError::new(SocketErrorKind::IsConnected, op::CONNECT));
        }
        if state.disconnected {
            return Err(SocketError::invalid_argument(
                op::CONNECT,
                "disconnected stream socket cannot be reused",
            ));
        }
        Ok(())
    }

    /// 连接致命类错误会把套接字标记为未连接。
    fn observe<T>(&self, result: Result<T, SocketError>) -> Result<T, SocketError> {
        if let Err(err) = &result {
            self.note_failure(err);
        }
        result
    }

    fn note_failure(&self, err: &SocketError) {
        if err.class() == ErrorClass::ConnectionFatal {
            let mut state = self.state.lock();
            if state.connected {
                debug!(
                    target: "spark_socket::queue",
                    socket = self.id,
                    error = %err,
                    "connection-fatal error; socket is no longer connected"
                );
            }
            state.connected = false;
        }
    }

    fn mark_connected(&self, transport: &dyn Transport, remote: SocketAddr) {
        self.connect_pending.store(false, Ordering::Release);
        let local = transport.local_addr().ok();
        let mut state = self.state.lock();
        state.connected = true;
        state.bound = true;
        state.remote = Some(remote);
        state.local = local.or(state.local);
    }

    fn mark_connect_pending(&self, remote: SocketAddr) {
        trace!(
            target: "spark_socket::queue",
            socket = self.id,
            %remote,
            "non-blocking connect in progress"
        );
        self.state.lock().remote = Some(remote);
        self.connect_pending.store(true, Ordering::Release);
    }

    fn connect_finished(&self, result: &Result<(), SocketError>) {
        match result {
            Ok(()) => {
                let remote = self.state.lock().remote;
                match remote {
                    Some(remote) => self.mark_connected(&*self.current(), remote),
                    None => self.connect_pending.store(false, Ordering::Release),
                }
            }
            Err(err) => {
                self.connect_pending.store(false, Ordering::Release);
                let mut state = self.state.lock();
                state.connected = false;
                state.connect_error = Some(err.clone());
            }
        }
    }

    fn disconnect_on(&self, transport: &dyn Transport) -> Result<(), SocketError> {
        if !self.state.lock().connected {
            return Err(SocketError::new(
                SocketErrorKind::NotConnected,
                op::DISCONNECT,
            ));
        }
        let result = transport.shutdown(Shutdown::Both);
        let mut state = self.state.lock();
        state.connected = false;
        state.disconnected = true;
        state.local = None;
        state.remote = None;
        match result {
            Err(err) if err.kind() != SocketErrorKind::NotConnected => {
                Err(err.for_operation(op::DISCONNECT))
            }
            _ => Ok(()),
        }
    }

    fn apply_tcp_defaults(&self) -> Result<(), SocketError> {
        if self.kind != SocketKind::Stream {
            return Ok(());
        }
        let defaults = &self.engine.config().tcp;
        let transport = self.current();
        if let Some(nodelay) = defaults.nodelay {
            transport.set_option(SocketOption::NoDelay, OptionValue::Bool(nodelay))?;
        }
        if let Some(linger) = defaults.linger() {
            transport.set_option(SocketOption::Linger, OptionValue::Linger(Some(linger)))?;
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(target: "spark_socket::queue", socket = self.id, "closing socket");
        self.current().close();
        queue::drain_disposed(&self.queue);
    }

    fn park_interval_us(&self) -> i64 {
        i64::try_from(self.engine.config().park_interval().as_micros()).unwrap_or(i64::MAX)
    }

    fn execute_accept(&self, transport: &dyn Transport) -> Step {
        if let Err(err) = self.check_listening() {
            return Step::Done(Err(err));
        }
        match transport.accept() {
            Ok((accepted, remote)) => Step::Done(
                Socket::accepted(&self.engine, accepted, remote).map(|socket| {
                    let mut done = Completed::new(OperationKind::Accept);
                    done.remote = Some(remote);
                    done.accepted = Some(socket);
                    done
                }),
            ),
            Err(err) if err.kind() == SocketErrorKind::WouldBlock => Step::Park(SelectMode::Read),
            Err(err) => Step::Done(Err(err)),
        }
    }

    fn execute_connect(&self, op: &PendingOperation, transport: &dyn Transport) -> Step {
        let Some(addr) = op.remote() else {
            return Step::Done(Err(SocketError::invalid_argument(
                op::CONNECT,
                "connect operation carries no endpoint",
            )));
        };
        let connected = || {
            let mut done = Completed::new(OperationKind::Connect);
            done.remote = Some(addr);
            Step::Done(Ok(done))
        };

        if op.mark_started() {
            if let Err(err) = self.check_connect(&addr) {
                return Step::Done(Err(err));
            }
            return match transport.connect(addr) {
                Ok(()) => {
                    self.mark_connected(transport, addr);
                    connected()
                }
                Err(err) if err.is_pending() => {
                    self.mark_connect_pending(addr);
                    Step::Park(SelectMode::Write)
                }
                Err(err) => Step::Done(Err(err)),
            };
        }

        // 停靠期间多路复用器可能已经完成或判定了这次连接。
        {
            let mut state = self.state.lock();
            if let Some(err) = state.connect_error.take() {
                return Step::Done(Err(err.for_operation(op::CONNECT)));
            }
            if state.connected {
                return connected();
            }
        }
        match transport.finish_connect() {
            Ok(()) => {
                self.mark_connected(transport, addr);
                connected()
            }
            Err(err) if err.is_pending() => Step::Park(SelectMode::Write),
            Err(err) => {
                self.connect_pending.store(false, Ordering::Release);
                Step::Done(Err(err.for_operation(op::CONNECT)))
            }
        }
    }
}

impl Selectable for SocketInner {
    fn id(&self) -> u64 {
        self.id
    }

    fn transport(&self) -> Arc<dyn Transport> {
        self.current()
    }

    fn is_disposed(&self) -> bool {
        self.is_closed()
    }

    fn connect_pending(&self) -> bool {
        SocketInner::connect_pending(self)
    }

    fn connect_finished(&self, result: &Result<(), SocketError>) {
        SocketInner::connect_finished(self, result);
    }
}

impl OperationExecutor for SocketInner {
    fn execute(&self, op: &PendingOperation) -> Step {
        let transport = self.current();
        let step = match op.kind() {
            OperationKind::Send => op.send_step(&*transport),
            OperationKind::SendTo => match op.remote() {
                Some(addr) if op.mark_started() && !self.family.matches(&addr) => Step::Done(Err(
                    SocketError::new(SocketErrorKind::AddressFamilyNotSupported, op::SEND_TO),
                )),
                _ => op.send_step(&*transport),
            },
            OperationKind::Receive | OperationKind::ReceiveFrom => op.receive_step(&*transport),
            OperationKind::Accept => self.execute_accept(&*transport),
            OperationKind::Connect => self.execute_connect(op, &*transport),
            OperationKind::Disconnect => Step::Done(
                self.disconnect_on(&*transport)
                    .map(|()| Completed::new(OperationKind::Disconnect)),
            ),
        };
        if let Step::Done(Err(err)) = &step {
            self.note_failure(err);
        }
        step
    }

    fn park(&self, mode: SelectMode) {
        let interval = self.park_interval_us();
        if let Err(err) = Multiplexer::poll(self, mode, interval) {
            trace!(
                target: "spark_socket::queue",
                socket = self.id,
                error = %err,
                "parking through the multiplexer failed; sleeping instead"
            );
            std::thread::sleep(Duration::from_micros(interval.unsigned_abs()));
        }
    }

    fn is_closed(&self) -> bool {
        SocketInner::is_closed(self)
    }

    fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    fn pool(&self) -> &WorkerPool {
        self.engine.pool()
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.transport.get_mut().close();
        }
        queue::drain_disposed(&self.queue);
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> SocketEngine {
        SocketEngine::new(EngineConfig::default()).expect("缺省配置合法")
    }

    fn connected_client(engine: &SocketEngine) -> (Socket, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("监听");
        let socket = Socket::new(
            engine,
            AddressFamily::InterNetwork,
            SocketKind::Stream,
            ProtocolKind::Tcp,
        )
        .expect("创建套接字");
        socket
            .connect(listener.local_addr().expect("监听地址"))
            .expect("连接");
        (socket, listener)
    }

    #[traced_test]
    #[test]
    fn close_drains_queued_operations_and_logs_it() {
        let engine = engine();
        let (socket, listener) = connected_client(&engine);
        let _peer = listener.accept().expect("accept");

        let first = socket.receive_async(BytesMut::with_capacity(8), SocketFlags::NONE);
        let second = socket.receive_async(BytesMut::with_capacity(8), SocketFlags::NONE);
        socket.close();

        for handle in [first, second] {
            assert!(handle.wait_timeout(Duration::from_secs(5)));
            let err = handle.wait().expect_err("关闭后以 Disposed 完成");
            assert_eq!(err.kind(), SocketErrorKind::Disposed);
        }
        assert!(logs_contain("completed queued operations with Disposed"));
    }

    #[test]
    fn lifecycle_preconditions_are_checked_before_the_backend() {
        let engine = engine();
        let (socket, listener) = connected_client(&engine);
        let _peer = listener.accept().expect("accept");

        let err = socket
            .bind("127.0.0.1:0".parse().expect("地址"))
            .expect_err("连接后已隐式绑定");
        assert_eq!(err.kind(), SocketErrorKind::InvalidArgument);

        socket.disconnect().expect("断开");
        assert!(!socket.is_connected());
        let err = socket
            .connect(listener.local_addr().expect("监听地址"))
            .expect_err("断开的流式套接字不能复用");
        assert_eq!(err.kind(), SocketErrorKind::InvalidArgument);
        let err = socket.disconnect().expect_err("已断开");
        assert_eq!(err.kind(), SocketErrorKind::NotConnected);
    }

    #[test]
    fn family_mismatch_is_reported_before_connecting() {
        let engine = engine();
        let socket = Socket::new(
            &engine,
            AddressFamily::InterNetwork,
            SocketKind::Stream,
            ProtocolKind::Tcp,
        )
        .expect("创建套接字");
        let err = socket
            .connect("[::1]:9".parse().expect("地址"))
            .expect_err("IPv4 套接字不能连接 IPv6 地址");
        assert_eq!(err.kind(), SocketErrorKind::AddressFamilyNotSupported);
        assert!(!socket.is_connected());
    }

    #[test]
    fn accepting_requires_a_listening_socket() {
        let engine = engine();
        let socket = Socket::new(
            &engine,
            AddressFamily::InterNetwork,
            SocketKind::Stream,
            ProtocolKind::Tcp,
        )
        .expect("创建套接字");
        let err = socket.accept().expect_err("未监听");
        assert_eq!(err.kind(), SocketErrorKind::InvalidArgument);
        let err = socket.accept_async().wait().expect_err("排队版本同样拒绝");
        assert_eq!(err.kind(), SocketErrorKind::InvalidArgument);
    }
}
