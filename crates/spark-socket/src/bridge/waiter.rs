use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use super::error::ChannelError;

/// 单次等待的最长切片；每个切片结束后重新检查关闭标志。
const SLICE: Duration = Duration::from_millis(50);

/// 阻塞模式模拟器：通道本身始终是非阻塞的，阻塞调用在私有 `Poll` 上等待就绪。
#[derive(Debug)]
pub(crate) struct Waiter {
    poll: Poll,
    events: Events,
}

impl Waiter {
    pub(crate) fn new() -> Result<Self, ChannelError> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(4),
        })
    }

    /// 等待 `fd` 就绪。超过 `deadline` 返回 [`ChannelError::TimedOut`]，
    /// 通道关闭返回 [`ChannelError::Closed`]。
    pub(crate) fn wait(
        &mut self,
        fd: RawFd,
        interest: Interest,
        deadline: Option<Instant>,
        closed: &AtomicBool,
    ) -> Result<(), ChannelError> {
        let mut source = SourceFd(&fd);
        self.poll
            .registry()
            .register(&mut source, Token(0), interest)?;
        let outcome = self.wait_registered(deadline, closed);
        let _ = self.poll.registry().deregister(&mut source);
        outcome
    }

    fn wait_registered(
        &mut self,
        deadline: Option<Instant>,
        closed: &AtomicBool,
    ) -> Result<(), ChannelError> {
        loop {
            if closed.load(Ordering::Acquire) {
                return Err(ChannelError::Closed);
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ChannelError::TimedOut);
                    }
                    (deadline - now).min(SLICE)
                }
                None => SLICE,
            };
            match self.poll.poll(&mut self.events, Some(slice)) {
                Ok(()) if !self.events.is_empty() => return Ok(()),
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}
