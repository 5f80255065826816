//! 按套接字串行化的异步操作队列。
//!
//! # 教案式说明
//! - **意图 (Why)**：同一套接字上的重叠操作必须按类别串行执行，否则并发的 `send` 会交错写出、
//!   并发的 `receive` 会乱序拿到数据。队列把“谁可以进入后端”这一决策集中到一处；
//! - **契约 (What)**：
//!   - 每个套接字两条 FIFO：接收类（Receive/ReceiveFrom/Accept）与发送类（Send/SendTo/Connect/Disconnect）；
//!   - 只有队首可以被派发，新入队的操作在成为队首时才被派发；
//!   - 每个操作恰好完成一次，重复完成是空操作；
//!   - 发送类操作的短写不会完成操作，而是推进偏移后继续执行同一个操作；
//!   - 套接字关闭后完成的操作一律报告 `Disposed`，尚在排队的操作也会被逐个完成；
//! - **实现 (How)**：
//!   1. 锁内只做链表簿记：入队、出队、整体摘取；
//!   2. 后端调用、完成通知与回调全部在锁外执行，回调中再次入队不会死锁；
//!   3. 后端返回 WouldBlock 时，工作线程在多路复用器上停靠一个周期后重试，期间持续检查关闭标志；
//! - **风险 (Trade-offs)**：停靠周期决定了非阻塞套接字上关闭的最坏响应延迟。

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use spark_socket_core::error::{OperationCode, op};
use spark_socket_core::{SelectMode, SocketError, SocketErrorKind, SocketFlags, Transport};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::engine::WorkerPool;
use crate::socket::Socket;

/// 可排队的操作种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Accept,
    Connect,
    Disconnect,
    Receive,
    ReceiveFrom,
    Send,
    SendTo,
}

/// 操作所属的队列。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationClass {
    Receive,
    Send,
}

impl OperationKind {
    pub fn class(self) -> OperationClass {
        match self {
            OperationKind::Accept | OperationKind::Receive | OperationKind::ReceiveFrom => {
                OperationClass::Receive
            }
            OperationKind::Connect
            | OperationKind::Disconnect
            | OperationKind::Send
            | OperationKind::SendTo => OperationClass::Send,
        }
    }

    pub fn code(self) -> OperationCode {
        match self {
            OperationKind::Accept => op::ACCEPT,
            OperationKind::Connect => op::CONNECT,
            OperationKind::Disconnect => op::DISCONNECT,
            OperationKind::Receive => op::RECEIVE,
            OperationKind::ReceiveFrom => op::RECEIVE_FROM,
            OperationKind::Send => op::SEND,
            OperationKind::SendTo => op::SEND_TO,
        }
    }
}

/// 成功完成的操作结果。
#[derive(Debug)]
pub struct Completed {
    pub kind: OperationKind,
    /// 发送类为完整写出的字节数，接收类为本次读到的字节数。
    pub transferred: usize,
    /// 接收类操作交还的缓冲区，长度已截断到有效数据末尾。
    pub buffer: Option<BytesMut>,
    /// ReceiveFrom 的来源地址，Accept 的对端地址，Connect 的目标地址。
    pub remote: Option<SocketAddr>,
    pub accepted: Option<Socket>,
}

impl Completed {
    pub(crate) fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            transferred: 0,
            buffer: None,
            remote: None,
            accepted: None,
        }
    }
}

/// 交给完成回调的摘要。
#[derive(Clone, Debug)]
pub struct OperationSummary {
    pub id: u64,
    pub kind: OperationKind,
    pub transferred: usize,
    pub error: Option<SocketError>,
}

type Callback = Box<dyn FnOnce(&OperationSummary) + Send>;

#[derive(Default)]
struct CompletionState {
    outcome: Option<Result<Completed, SocketError>>,
    summary: Option<OperationSummary>,
    callbacks: Vec<Callback>,
}

struct Completion {
    id: u64,
    kind: OperationKind,
    state: Mutex<CompletionState>,
    ready: Condvar,
    notify: Notify,
}

impl Completion {
    fn new(id: u64, kind: OperationKind) -> Self {
        Self {
            id,
            kind,
            state: Mutex::new(CompletionState::default()),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// 返回 `false` 表示操作此前已经完成。
    fn complete(&self, result: Result<Completed, SocketError>) -> bool {
        let (summary, callbacks) = {
            let mut state = self.state.lock();
            if state.summary.is_some() {
                return false;
            }
            let summary = OperationSummary {
                id: self.id,
                kind: self.kind,
                transferred: result.as_ref().map_or(0, |done| done.transferred),
                error: result.as_ref().err().cloned(),
            };
            state.outcome = Some(result);
            state.summary = Some(summary.clone());
            (summary, mem::take(&mut state.callbacks))
        };
        self.ready.notify_all();
        self.notify.notify_waiters();
        for callback in callbacks {
            callback(&summary);
        }
        true
    }

    fn is_completed(&self) -> bool {
        self.state.lock().summary.is_some()
    }

    fn take(&self, state: &mut CompletionState) -> Result<Completed, SocketError> {
        state.outcome.take().unwrap_or_else(|| {
            Err(SocketError::invalid_argument(
                self.kind.code(),
                "operation result was already taken",
            ))
        })
    }

    fn try_take(&self) -> Option<Result<Completed, SocketError>> {
        let mut state = self.state.lock();
        state.summary.is_some().then(|| self.take(&mut state))
    }
}

/// 排队操作的完成句柄。
///
/// 结果只能取走一次：[`OperationHandle::wait`] 与 [`OperationHandle::completion`] 都会消费句柄。
pub struct OperationHandle {
    completion: Arc<Completion>,
}

impl OperationHandle {
    pub fn id(&self) -> u64 {
        self.completion.id
    }

    pub fn kind(&self) -> OperationKind {
        self.completion.kind
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_completed()
    }

    /// 阻塞当前线程直至操作完成。
    pub fn wait(self) -> Result<Completed, SocketError> {
        let mut state = self.completion.state.lock();
        while state.summary.is_none() {
            self.completion.ready.wait(&mut state);
        }
        self.completion.take(&mut state)
    }

    /// 最多等待 `timeout`，返回操作是否已经完成。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.completion.state.lock();
        while state.summary.is_none() {
            if self
                .completion
                .ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.summary.is_some();
            }
        }
        true
    }

    /// 异步等待操作完成。
    pub async fn completion(self) -> Result<Completed, SocketError> {
        loop {
            let mut notified = pin!(self.completion.notify.notified());
            notified.as_mut().enable();
            if let Some(outcome) = self.completion.try_take() {
                return outcome;
            }
            notified.await;
        }
    }

    /// 注册完成回调；操作已完成时在当前线程立即执行。
    pub fn on_complete(&self, callback: impl FnOnce(&OperationSummary) + Send + 'static) {
        let mut state = self.completion.state.lock();
        match state.summary.clone() {
            Some(summary) => {
                drop(state);
                callback(&summary);
            }
            None => state.callbacks.push(Box::new(callback)),
        }
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// 操作携带的数据。
pub(crate) enum Payload {
    Empty,
    /// 待写出的分段，已写出的部分从队首逐段消耗。
    Send(VecDeque<Bytes>),
    /// 读入 `buffer[start..]`。
    Receive { buffer: BytesMut, start: usize },
}

impl Payload {
    /// 丢弃内部的空分段；全部为空时保留一个空分段，仍向后端发出一次零长度发送。
    pub(crate) fn send(segments: impl IntoIterator<Item = Bytes>) -> Self {
        let mut kept: VecDeque<Bytes> = segments
            .into_iter()
            .filter(|segment| !segment.is_empty())
            .collect();
        if kept.is_empty() {
            kept.push_back(Bytes::new());
        }
        Payload::Send(kept)
    }

    /// 读入缓冲区的剩余容量。
    pub(crate) fn receive(mut buffer: BytesMut) -> Self {
        let start = buffer.len();
        buffer.resize(buffer.capacity(), 0);
        Payload::Receive { buffer, start }
    }
}

/// 在分段序列上前进 `written` 字节，返回是否全部写完。
pub(crate) fn advance_segments(segments: &mut VecDeque<Bytes>, mut written: usize) -> bool {
    while written > 0 {
        let Some(front) = segments.front_mut() else {
            break;
        };
        let step = written.min(front.len());
        front.advance(step);
        written -= step;
        if front.is_empty() {
            segments.pop_front();
        }
    }
    segments.is_empty()
}

struct OperationIo {
    payload: Payload,
    transferred: usize,
}

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct PendingOperation {
    id: u64,
    kind: OperationKind,
    flags: SocketFlags,
    remote: Option<SocketAddr>,
    started: AtomicBool,
    io: Mutex<OperationIo>,
    completion: Arc<Completion>,
}

/// 执行器对一次执行尝试的答复。
pub(crate) enum Step {
    Done(Result<Completed, SocketError>),
    /// 短写：已推进偏移，立即再次执行同一操作。
    Continue,
    /// 后端暂不可用：在多路复用器上停靠后重试。
    Park(SelectMode),
}

impl PendingOperation {
    pub(crate) fn new(
        kind: OperationKind,
        flags: SocketFlags,
        remote: Option<SocketAddr>,
        payload: Payload,
    ) -> Arc<Self> {
        let id = NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id,
            kind,
            flags,
            remote,
            started: AtomicBool::new(false),
            io: Mutex::new(OperationIo {
                payload,
                transferred: 0,
            }),
            completion: Arc::new(Completion::new(id, kind)),
        })
    }

    pub(crate) fn kind(&self) -> OperationKind {
        self.kind
    }

    pub(crate) fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn handle(&self) -> OperationHandle {
        OperationHandle {
            completion: self.completion.clone(),
        }
    }

    /// 首次执行返回 `true`。
    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn complete(&self, result: Result<Completed, SocketError>) -> bool {
        self.completion.complete(result)
    }

    fn fail(&self, error: SocketError) -> Step {
        Step::Done(Err(error.for_operation(self.kind.code())))
    }

    /// Send / SendTo 的一次执行尝试。
    pub(crate) fn send_step(&self, transport: &dyn Transport) -> Step {
        let mut io = self.io.lock();
        let OperationIo {
            payload,
            transferred,
        } = &mut *io;
        let Payload::Send(segments) = payload else {
            return self.fail(SocketError::invalid_argument(
                self.kind.code(),
                "send operation carries no payload",
            ));
        };
        let Some(front) = segments.front() else {
            let mut done = Completed::new(self.kind);
            done.transferred = *transferred;
            return Step::Done(Ok(done));
        };

        let result = match (self.kind, self.remote) {
            (OperationKind::SendTo, Some(addr)) => transport.send_to(front, self.flags, addr),
            _ => transport.send(front, self.flags),
        };
        if front.is_empty() {
            // 零长度发送（例如空数据报）：后端的结果原样作为完成结果。
            return match result {
                Ok(_) => {
                    segments.clear();
                    let mut done = Completed::new(self.kind);
                    done.remote = self.remote;
                    Step::Done(Ok(done))
                }
                Err(err) if err.kind() == SocketErrorKind::WouldBlock => {
                    Step::Park(SelectMode::Write)
                }
                Err(err) => self.fail(err),
            };
        }
        match result {
            Ok(0) => self.fail(SocketError::with_message(
                SocketErrorKind::NoBufferSpace,
                self.kind.code(),
                "transport accepted no bytes",
            )),
            Ok(written) => {
                *transferred += written;
                if advance_segments(segments, written) {
                    let mut done = Completed::new(self.kind);
                    done.transferred = *transferred;
                    done.remote = self.remote;
                    Step::Done(Ok(done))
                } else {
                    trace!(
                        target: "spark_socket::queue",
                        id = self.id,
                        written,
                        total = *transferred,
                        "partial write; continuing the same operation"
                    );
                    Step::Continue
                }
            }
            Err(err) if err.kind() == SocketErrorKind::WouldBlock => {
                Step::Park(SelectMode::Write)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Receive / ReceiveFrom 的一次执行尝试。
    pub(crate) fn receive_step(&self, transport: &dyn Transport) -> Step {
        let mut io = self.io.lock();
        let OperationIo {
            payload,
            transferred,
        } = &mut *io;
        let Payload::Receive { buffer, start } = payload else {
            return self.fail(SocketError::invalid_argument(
                self.kind.code(),
                "receive operation carries no buffer",
            ));
        };
        let start = *start;
        let target = &mut buffer[start..];

        let result = match self.kind {
            OperationKind::ReceiveFrom => transport
                .receive_from(target, self.flags)
                .map(|(read, from)| (read, Some(from))),
            _ => transport.receive(target, self.flags).map(|read| (read, None)),
        };
        match result {
            Ok((read, from)) => {
                *transferred = read;
                let mut filled = mem::take(buffer);
                filled.truncate(start + read);
                let mut done = Completed::new(self.kind);
                done.transferred = read;
                done.buffer = Some(filled);
                done.remote = from;
                Step::Done(Ok(done))
            }
            Err(err) if err.kind() == SocketErrorKind::WouldBlock => Step::Park(SelectMode::Read),
            Err(err) => self.fail(err),
        }
    }
}

#[derive(Default)]
struct QueueState {
    receive: VecDeque<Arc<PendingOperation>>,
    send: VecDeque<Arc<PendingOperation>>,
    /// 闸门关闭期间入队的操作只排队不派发，直到 [`release`]。
    gated: bool,
}

impl QueueState {
    fn lane(&mut self, class: OperationClass) -> &mut VecDeque<Arc<PendingOperation>> {
        match class {
            OperationClass::Receive => &mut self.receive,
            OperationClass::Send => &mut self.send,
        }
    }
}

/// 每个套接字一份的两条 FIFO。
#[derive(Default)]
pub(crate) struct OperationQueue {
    state: Mutex<QueueState>,
}

impl OperationQueue {
    /// 入队并返回是否应立即派发：成为队首且队列未被关闭闸门。
    fn push(&self, op: Arc<PendingOperation>) -> bool {
        let mut state = self.state.lock();
        let gated = state.gated;
        let lane = state.lane(op.kind.class());
        lane.push_back(op);
        lane.len() == 1 && !gated
    }

    /// 移除已完成的队首并返回新的队首；`id` 不是队首时不做任何修改。
    fn advance(&self, class: OperationClass, id: u64) -> Option<Arc<PendingOperation>> {
        let mut state = self.state.lock();
        let lane = state.lane(class);
        if lane.front().is_some_and(|head| head.id == id) {
            lane.pop_front();
            lane.front().cloned()
        } else {
            None
        }
    }

    /// 摘取两条队列中的全部操作。
    fn drain(&self) -> Vec<Arc<PendingOperation>> {
        let mut state = self.state.lock();
        let mut drained: Vec<_> = state.receive.drain(..).collect();
        drained.extend(state.send.drain(..));
        drained
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.receive.is_empty() && state.send.is_empty()
    }

    /// 队列空闲时关闭闸门并返回 `true`；之后入队的操作保持排队，直到 [`release`]。
    ///
    /// 空闲检查与关闸在同一把锁内完成，调用方在持闸期间可以独占地使用传输。
    pub(crate) fn try_gate(&self) -> bool {
        let mut state = self.state.lock();
        if state.gated || !state.receive.is_empty() || !state.send.is_empty() {
            return false;
        }
        state.gated = true;
        true
    }

    /// 打开闸门并返回持闸期间积累的队首。
    fn open_gate(&self) -> Vec<Arc<PendingOperation>> {
        let mut state = self.state.lock();
        state.gated = false;
        state
            .receive
            .front()
            .into_iter()
            .chain(state.send.front())
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self, class: OperationClass) -> usize {
        self.state.lock().lane(class).len()
    }
}

/// 队列的宿主：执行单次尝试、在多路复用器上停靠，并提供线程池。
pub(crate) trait OperationExecutor: Send + Sync + 'static {
    fn execute(&self, op: &PendingOperation) -> Step;

    fn park(&self, mode: SelectMode);

    fn is_closed(&self) -> bool;

    fn queue(&self) -> &OperationQueue;

    fn pool(&self) -> &WorkerPool;
}

/// 入队；成为队首时立即派发。
pub(crate) fn submit<E: OperationExecutor>(
    executor: &Arc<E>,
    op: Arc<PendingOperation>,
) -> OperationHandle {
    let handle = op.handle();
    if executor.is_closed() {
        op.complete(Err(SocketError::disposed(op.kind.code())));
        return handle;
    }
    if executor.queue().push(op.clone()) {
        dispatch(executor.clone(), op);
    } else {
        trace!(
            target: "spark_socket::queue",
            id = op.id,
            kind = ?op.kind,
            "operation queued behind an in-flight head"
        );
    }
    handle
}

fn dispatch<E: OperationExecutor>(executor: Arc<E>, op: Arc<PendingOperation>) {
    let worker = Arc::clone(&executor);
    executor.pool().spawn(move || run(worker, op));
}

fn run<E: OperationExecutor>(executor: Arc<E>, op: Arc<PendingOperation>) {
    trace!(
        target: "spark_socket::queue",
        id = op.id,
        kind = ?op.kind,
        "dispatching operation"
    );
    let result = loop {
        if executor.is_closed() {
            break Err(SocketError::disposed(op.kind.code()));
        }
        match executor.execute(&op) {
            Step::Done(result) => break result,
            Step::Continue => continue,
            Step::Park(mode) => {
                trace!(
                    target: "spark_socket::queue",
                    id = op.id,
                    ?mode,
                    "operation would block; parking"
                );
                executor.park(mode);
            }
        }
    };
    finish(&executor, &op, result);
}

fn finish<E: OperationExecutor>(
    executor: &Arc<E>,
    op: &Arc<PendingOperation>,
    result: Result<Completed, SocketError>,
) {
    let result = if executor.is_closed() {
        Err(SocketError::disposed(op.kind.code()))
    } else {
        result
    };
    if let Err(err) = &result {
        debug!(
            target: "spark_socket::queue",
            id = op.id,
            kind = ?op.kind,
            error = %err,
            "operation completed with error"
        );
    }
    op.complete(result);

    let Some(next) = executor.queue().advance(op.kind.class(), op.id) else {
        return;
    };
    if executor.is_closed() {
        drain_disposed(executor.queue());
    } else {
        dispatch(executor.clone(), next);
    }
}

/// 打开 [`OperationQueue::try_gate`] 关闭的闸门，派发持闸期间入队的队首。
pub(crate) fn release<E: OperationExecutor>(executor: &Arc<E>) {
    let heads = executor.queue().open_gate();
    if heads.is_empty() {
        return;
    }
    if executor.is_closed() {
        drain_disposed(executor.queue());
        return;
    }
    trace!(
        target: "spark_socket::queue",
        held = heads.len(),
        "gate opened; dispatching held operations"
    );
    for head in heads {
        dispatch(executor.clone(), head);
    }
}

/// 以 `Disposed` 完成队列中剩余的全部操作，返回本次完成的数量。
pub(crate) fn drain_disposed(queue: &OperationQueue) -> usize {
    let pending = queue.drain();
    let completed = pending
        .iter()
        .filter(|op| op.complete(Err(SocketError::disposed(op.kind.code()))))
        .count();
    if completed > 0 {
        debug!(
            target: "spark_socket::queue",
            completed,
            "completed queued operations with Disposed"
        );
    }
    completed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: OperationKind) -> Arc<PendingOperation> {
        PendingOperation::new(kind, SocketFlags::NONE, None, Payload::Empty)
    }

    #[test]
    fn operation_classes_match_queue_lanes() {
        assert_eq!(OperationKind::Accept.class(), OperationClass::Receive);
        assert_eq!(OperationKind::ReceiveFrom.class(), OperationClass::Receive);
        assert_eq!(OperationKind::Connect.class(), OperationClass::Send);
        assert_eq!(OperationKind::Disconnect.class(), OperationClass::Send);
    }

    #[test]
    fn only_the_matching_head_advances_the_lane() {
        let queue = OperationQueue::default();
        let first = op(OperationKind::Send);
        let second = op(OperationKind::Send);
        let receive = op(OperationKind::Receive);
        assert!(queue.push(first.clone()));
        assert!(!queue.push(second.clone()));
        assert!(queue.push(receive.clone()));

        assert!(queue.advance(OperationClass::Send, second.id).is_none());
        assert_eq!(queue.len(OperationClass::Send), 2);
        let next = queue
            .advance(OperationClass::Send, first.id)
            .expect("第二个操作成为队首");
        assert_eq!(next.id, second.id);
        assert_eq!(queue.len(OperationClass::Receive), 1);
    }

    #[test]
    fn a_gated_queue_holds_new_heads_until_the_gate_opens() {
        let queue = OperationQueue::default();
        assert!(queue.try_gate());
        assert!(!queue.try_gate(), "闸门已关闭");

        let send = op(OperationKind::Send);
        let receive = op(OperationKind::Receive);
        assert!(!queue.push(send.clone()), "持闸期间不派发");
        assert!(!queue.push(receive.clone()));
        assert!(!queue.push(op(OperationKind::Send)));

        let heads: Vec<u64> = queue.open_gate().iter().map(|head| head.id).collect();
        assert_eq!(heads, vec![receive.id, send.id]);
        assert!(!queue.try_gate(), "队列非空时不能关闸");
    }

    #[test]
    fn completion_is_idempotent_and_reports_the_first_result() {
        let pending = op(OperationKind::Disconnect);
        let handle = pending.handle();
        assert!(pending.complete(Ok(Completed::new(OperationKind::Disconnect))));
        assert!(!pending.complete(Err(SocketError::disposed(op::DISCONNECT))));
        assert!(handle.is_completed());
        let done = handle.wait().expect("第一次完成的结果被保留");
        assert_eq!(done.kind, OperationKind::Disconnect);
    }

    #[test]
    fn callbacks_run_once_even_when_registered_late() {
        let pending = op(OperationKind::Receive);
        let handle = pending.handle();
        let (tx, rx) = std::sync::mpsc::channel();
        let early = tx.clone();
        handle.on_complete(move |summary| {
            let _ = early.send(("early", summary.error.as_ref().map(|err| err.kind())));
        });
        assert!(!handle.wait_timeout(Duration::from_millis(10)));

        drain_queue_with(pending.clone());
        handle.on_complete(move |summary| {
            let _ = tx.send(("late", summary.error.as_ref().map(|err| err.kind())));
        });
        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                ("early", Some(SocketErrorKind::Disposed)),
                ("late", Some(SocketErrorKind::Disposed)),
            ]
        );
        assert!(handle.wait_timeout(Duration::ZERO));
    }

    fn drain_queue_with(pending: Arc<PendingOperation>) {
        let queue = OperationQueue::default();
        queue.push(pending);
        assert_eq!(drain_disposed(&queue), 1);
        assert!(queue.is_idle());
    }

    #[test]
    fn segments_advance_across_boundaries() {
        let mut segments: VecDeque<Bytes> = [
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"de"),
            Bytes::from_static(b"fgh"),
        ]
        .into_iter()
        .collect();
        assert!(!advance_segments(&mut segments, 4));
        assert_eq!(segments.front().map(|s| &s[..]), Some(&b"e"[..]));
        assert!(!advance_segments(&mut segments, 2));
        assert_eq!(segments.front().map(|s| &s[..]), Some(&b"gh"[..]));
        assert!(advance_segments(&mut segments, 2));
    }

    #[test]
    fn empty_segments_are_dropped_up_front() {
        let Payload::Send(segments) = Payload::send([Bytes::new(), Bytes::from_static(b"x")])
        else {
            panic!("应构造发送载荷");
        };
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn an_all_empty_send_keeps_one_empty_segment() {
        let Payload::Send(segments) = Payload::send([Bytes::new(), Bytes::new()]) else {
            panic!("应构造发送载荷");
        };
        assert_eq!(segments.len(), 1);
        assert!(segments.front().is_some_and(Bytes::is_empty));
    }

    #[tokio::test]
    async fn awaiting_a_completed_handle_returns_immediately() {
        let pending = op(OperationKind::Accept);
        let handle = pending.handle();
        let waiter = tokio::spawn(handle.completion());
        tokio::task::yield_now().await;
        pending.complete(Err(SocketError::disposed(op::ACCEPT)));
        let outcome = waiter.await.expect("等待任务不应崩溃");
        assert_eq!(
            outcome.expect_err("以 Disposed 完成").kind(),
            SocketErrorKind::Disposed
        );
    }
}
