//! select/poll 风格的就绪多路复用。
//!
//! # 教案式说明
//! - **意图 (Why)**：为任意后端提供统一的 `Select`/`Poll` 语义。原生后端的描述符可以直接注册，
//!   桥接后端的通道必须先切到非阻塞模式才允许注册，两者的差异由 [`Transport`] 的就绪钩子吸收；
//! - **契约 (What)**：
//!   - 输入为三张列表（读、写、错误兴趣）与微秒超时，输出为按提交顺序过滤后的三张列表；
//!   - 列表中出现已关闭的套接字时整体返回 `Disposed`，三张列表全空时返回 `InvalidArgument`；
//!   - 每次调用使用私有的 `mio::Poll`，注册集合在返回前一定被释放，
//!     临时切换为非阻塞的套接字在任何路径上都会恢复阻塞模式；
//! - **实现 (How)**：
//!   1. 把三张列表压平成一条序列，段与段之间插入分隔哨兵 `None`；
//!   2. 按套接字身份去重后计算兴趣：读段注册可读，写段注册可写，存在未完成的非阻塞连接时注册可写；
//!   3. 超时换算为毫秒刻度，负数表示一直等待，但没有任何注册时立即返回；
//!   4. 单次等待后逐个分类事件，连接完成事件在这里调用 `finish_connect`；
//! - **风险 (Trade-offs)**：每次调用新建 epoll 实例，换来注册集合不跨调用共享的简单性。

use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use spark_socket_core::error::op;
use spark_socket_core::{SelectMode, SocketError, Transport, translate};
use tracing::{debug, trace, warn};

/// 可以参与多路复用的对象。
///
/// `Socket` 是唯一的生产实现，测试可以提供自己的实现。
pub trait Selectable {
    /// 套接字的稳定标识；同一套接字的多个句柄返回相同的值。
    fn id(&self) -> u64;

    fn transport(&self) -> Arc<dyn Transport>;

    fn is_disposed(&self) -> bool;

    /// 是否存在尚未完成的非阻塞连接。
    fn connect_pending(&self) -> bool;

    /// 多路复用器完成（或判定失败）非阻塞连接后回调。
    fn connect_finished(&self, result: &Result<(), SocketError>);
}

/// 三张兴趣列表。输入与输出共用同一类型。
#[derive(Debug)]
pub struct SelectSet<'a, S> {
    pub read: Vec<&'a S>,
    pub write: Vec<&'a S>,
    pub error: Vec<&'a S>,
}

impl<'a, S> SelectSet<'a, S> {
    pub fn new(read: Vec<&'a S>, write: Vec<&'a S>, error: Vec<&'a S>) -> Self {
        Self { read, write, error }
    }

    pub fn single(socket: &'a S, mode: SelectMode) -> Self {
        let mut set = Self::new(Vec::new(), Vec::new(), Vec::new());
        set.list_mut(mode).push(socket);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.error.is_empty()
    }

    pub fn len(&self) -> usize {
        self.read.len() + self.write.len() + self.error.len()
    }

    pub fn list(&self, mode: SelectMode) -> &[&'a S] {
        match mode {
            SelectMode::Read => &self.read,
            SelectMode::Write => &self.write,
            SelectMode::Error => &self.error,
        }
    }

    fn list_mut(&mut self, mode: SelectMode) -> &mut Vec<&'a S> {
        match mode {
            SelectMode::Read => &mut self.read,
            SelectMode::Write => &mut self.write,
            SelectMode::Error => &mut self.error,
        }
    }
}

impl<S> Clone for SelectSet<'_, S> {
    fn clone(&self) -> Self {
        Self {
            read: self.read.clone(),
            write: self.write.clone(),
            error: self.error.clone(),
        }
    }
}

const SEGMENTS: [SelectMode; 3] = [SelectMode::Read, SelectMode::Write, SelectMode::Error];

/// 压平三张列表，段间以 `None` 分隔。
pub fn flatten<'a, S>(set: &SelectSet<'a, S>) -> Vec<Option<&'a S>> {
    let mut flat = Vec::with_capacity(set.len() + 2);
    for (index, mode) in SEGMENTS.into_iter().enumerate() {
        if index > 0 {
            flat.push(None);
        }
        flat.extend(set.list(mode).iter().copied().map(Some));
    }
    flat
}

/// [`flatten`] 的逆过程：按分隔哨兵把序列切回三段，多余的哨兵被忽略。
pub fn segment<'a, S>(flat: &[Option<&'a S>]) -> SelectSet<'a, S> {
    let mut set = SelectSet::new(Vec::new(), Vec::new(), Vec::new());
    let mut current = 0;
    for entry in flat {
        match entry {
            Some(socket) => set.list_mut(SEGMENTS[current]).push(*socket),
            None => current = (current + 1).min(SEGMENTS.len() - 1),
        }
    }
    set
}

/// 把微秒超时换算为等待时长；`None` 表示无限等待。
///
/// - 负数：有注册时一直等待，没有注册时立即返回；
/// - 零：立即返回；
/// - 正数：以毫秒为刻度向下取整，但至少 1 毫秒。
pub fn native_timeout(timeout_us: i64, registered: usize) -> Option<Duration> {
    if timeout_us < 0 {
        return if registered == 0 {
            Some(Duration::ZERO)
        } else {
            None
        };
    }
    if timeout_us == 0 {
        return Some(Duration::ZERO);
    }
    let millis = (timeout_us.unsigned_abs() / 1_000).max(1);
    Some(Duration::from_millis(millis))
}

/// 单次注册。析构时注销、解除选择器绑定并恢复阻塞模式。
struct Registration {
    registry: Registry,
    fd: RawFd,
    transport: Arc<dyn Transport>,
    restore_blocking: bool,
}

impl Registration {
    fn register(
        registry: &Registry,
        transport: Arc<dyn Transport>,
        fd: RawFd,
        token: Token,
        interest: Interest,
    ) -> Result<Self, SocketError> {
        let registry = registry
            .try_clone()
            .map_err(|err| translate::from_io(op::SELECT, err))?;

        let restore_blocking =
            transport.requires_nonblocking_registration() && transport.is_blocking();
        if restore_blocking {
            debug!(
                target: "spark_socket::mux",
                fd,
                "switching socket to non-blocking mode for registration"
            );
            transport
                .set_blocking(false)
                .map_err(|err| err.for_operation(op::SELECT))?;
        }
        // 从这里开始失败路径也要经过 Drop 恢复现场。
        let registration = Self {
            registry,
            fd,
            transport,
            restore_blocking,
        };
        registration
            .transport
            .attach_selector()
            .map_err(|err| err.for_operation(op::SELECT))?;
        registration
            .registry
            .register(&mut SourceFd(&registration.fd), token, interest)
            .map_err(|err| translate::from_io(op::SELECT, err))?;
        Ok(registration)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let _ = self.registry.deregister(&mut SourceFd(&self.fd));
        self.transport.detach_selector();
        if self.restore_blocking {
            if let Err(err) = self.transport.set_blocking(true) {
                warn!(
                    target: "spark_socket::mux",
                    fd = self.fd,
                    error = %err,
                    "failed to restore blocking mode after select"
                );
            }
        }
    }
}

/// 去重后的单个参与者及其所在的段。
struct Participant<'a, S> {
    id: u64,
    socket: &'a S,
    segments: [bool; 3],
    transport: Arc<dyn Transport>,
    connect_pending: bool,
}

impl<S> Participant<'_, S> {
    fn in_segment(&self, mode: SelectMode) -> bool {
        self.segments[mode as usize]
    }

    fn interest(&self) -> Option<Interest> {
        let mut interest: Option<Interest> = None;
        let mut add = |extra: Interest| {
            interest = Some(match interest {
                Some(current) => current.add(extra),
                None => extra,
            });
        };
        if self.in_segment(SelectMode::Read) {
            add(Interest::READABLE);
        }
        if self.in_segment(SelectMode::Write) || self.connect_pending {
            add(Interest::WRITABLE);
        }
        interest
    }
}

/// select/poll 入口。
pub struct Multiplexer;

impl Multiplexer {
    /// 等待三张列表中的任意套接字就绪，返回按提交顺序过滤后的列表。
    pub fn select<'a, S: Selectable>(
        set: SelectSet<'a, S>,
        timeout_us: i64,
    ) -> Result<SelectSet<'a, S>, SocketError> {
        if set.is_empty() {
            return Err(SocketError::invalid_argument(
                op::SELECT,
                "at least one select list must be non-empty",
            ));
        }
        let flat = flatten(&set);
        let participants = Self::participants(&flat)?;

        let mut poll = Poll::new().map_err(|err| translate::from_io(op::SELECT, err))?;
        let mut registrations = Vec::with_capacity(participants.len());
        let mut buffered = false;
        for (index, participant) in participants.iter().enumerate() {
            if participant.in_segment(SelectMode::Read) && participant.transport.has_buffered_input()
            {
                buffered = true;
            }
            let Some(interest) = participant.interest() else {
                continue;
            };
            // 尚未打开句柄的传输（例如未连接的通道）不会就绪。
            let Some(fd) = participant.transport.selector_source() else {
                continue;
            };
            registrations.push(Registration::register(
                poll.registry(),
                participant.transport.clone(),
                fd,
                Token(index),
                interest,
            )?);
        }

        let timeout = if buffered {
            Some(Duration::ZERO)
        } else {
            native_timeout(timeout_us, registrations.len())
        };
        let mut events = Events::with_capacity(participants.len().max(1));
        Self::wait(&mut poll, &mut events, timeout)?;

        let mut ready = vec![[false; 3]; participants.len()];
        for (index, participant) in participants.iter().enumerate() {
            if participant.in_segment(SelectMode::Read) && participant.transport.has_buffered_input()
            {
                ready[index][SelectMode::Read as usize] = true;
            }
        }
        for event in events.iter() {
            let index = event.token().0;
            let Some(participant) = participants.get(index) else {
                continue;
            };
            Self::classify(participant, event, &mut ready[index]);
        }
        drop(registrations);

        let result = Self::filter(&flat, &participants, &ready);
        trace!(
            target: "spark_socket::mux",
            read = result.read.len(),
            write = result.write.len(),
            error = result.error.len(),
            "select woke up"
        );
        Ok(result)
    }

    /// 单个套接字、单一模式的 [`Multiplexer::select`]。
    pub fn poll<S: Selectable>(
        socket: &S,
        mode: SelectMode,
        timeout_us: i64,
    ) -> Result<bool, SocketError> {
        Self::select(SelectSet::single(socket, mode), timeout_us)
            .map(|ready| !ready.list(mode).is_empty())
            .map_err(|err| err.for_operation(op::POLL))
    }

    fn participants<'a, S: Selectable>(
        flat: &[Option<&'a S>],
    ) -> Result<Vec<Participant<'a, S>>, SocketError> {
        let mut participants: Vec<Participant<'a, S>> = Vec::new();
        let mut segment = 0;
        for entry in flat {
            let Some(socket) = entry else {
                segment += 1;
                continue;
            };
            if socket.is_disposed() {
                return Err(SocketError::disposed(op::SELECT));
            }
            let id = socket.id();
            match participants.iter_mut().find(|known| known.id == id) {
                Some(known) => known.segments[segment] = true,
                None => {
                    let mut segments = [false; 3];
                    segments[segment] = true;
                    participants.push(Participant {
                        id,
                        socket: *socket,
                        segments,
                        transport: socket.transport(),
                        connect_pending: socket.connect_pending(),
                    });
                }
            }
        }
        Ok(participants)
    }

    fn wait(
        poll: &mut Poll,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> Result<(), SocketError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            match poll.poll(events, remaining) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(translate::from_io(op::SELECT, err)),
            }
        }
    }

    fn classify<S: Selectable>(
        participant: &Participant<'_, S>,
        event: &mio::event::Event,
        ready: &mut [bool; 3],
    ) {
        if participant.connect_pending {
            if event.is_writable() || event.is_error() || event.is_write_closed() {
                let result = participant.transport.finish_connect();
                match &result {
                    Err(err) if err.is_pending() => return,
                    Ok(()) => ready[SelectMode::Write as usize] = true,
                    Err(err) => {
                        debug!(
                            target: "spark_socket::mux",
                            error = %err,
                            "non-blocking connect failed"
                        );
                        ready[SelectMode::Error as usize] = true;
                    }
                }
                participant.socket.connect_finished(&result);
            }
            if event.is_readable() {
                ready[SelectMode::Read as usize] = true;
            }
            return;
        }
        if event.is_readable() || event.is_read_closed() {
            ready[SelectMode::Read as usize] = true;
        }
        if event.is_writable() {
            ready[SelectMode::Write as usize] = true;
        }
        if event.is_error() {
            ready[SelectMode::Error as usize] = true;
        }
    }

    fn filter<'a, S: Selectable>(
        flat: &[Option<&'a S>],
        participants: &[Participant<'a, S>],
        ready: &[[bool; 3]],
    ) -> SelectSet<'a, S> {
        let mut filtered = Vec::with_capacity(flat.len());
        let mut segment = 0;
        for entry in flat {
            match entry {
                None => {
                    segment += 1;
                    filtered.push(None);
                }
                Some(socket) => {
                    let hit = participants
                        .iter()
                        .position(|known| known.id == socket.id())
                        .is_some_and(|index| ready[index][segment]);
                    if hit {
                        filtered.push(Some(*socket));
                    }
                }
            }
        }
        self::segment(&filtered)
    }
}
