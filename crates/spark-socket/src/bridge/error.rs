//! 通道层异常及其到可移植错误的翻译。

use std::io;

use spark_socket_core::error::OperationCode;
use spark_socket_core::{SocketError, SocketErrorKind, translate};
use thiserror::Error;

/// 通道模型在状态机层面报告的失败。
///
/// 与内核 errno 不同，这些失败来自通道自身的生命周期检查，
/// 必须在离开桥接后端之前翻译为 [`SocketError`]。
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("channel is not bound")]
    NotYetBound,
    #[error("channel is not connected")]
    NotYetConnected,
    #[error("channel is already connected")]
    AlreadyConnected,
    #[error("a connection is already pending on this channel")]
    ConnectionPending,
    #[error("channel is already bound")]
    AlreadyBound,
    #[error("channel is not listening")]
    NotListening,
    #[error("channel is {0}")]
    InvalidState(&'static str),
    #[error("channel is registered with a selector and must stay non-blocking")]
    IllegalBlockingMode,
    #[error("blocking operation timed out")]
    TimedOut,
    #[error("channel does not support {0}")]
    Unsupported(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ChannelError {
    pub(crate) fn into_socket_error(self, op: OperationCode) -> SocketError {
        let kind = match &self {
            ChannelError::Io(_) => None,
            ChannelError::Closed => Some(SocketErrorKind::Disposed),
            ChannelError::NotYetBound => Some(SocketErrorKind::InvalidArgument),
            ChannelError::NotYetConnected => Some(SocketErrorKind::NotConnected),
            ChannelError::AlreadyConnected => Some(SocketErrorKind::IsConnected),
            ChannelError::ConnectionPending => Some(SocketErrorKind::InProgress),
            ChannelError::AlreadyBound
            | ChannelError::NotListening
            | ChannelError::InvalidState(_)
            | ChannelError::IllegalBlockingMode => Some(SocketErrorKind::InvalidArgument),
            ChannelError::TimedOut => Some(SocketErrorKind::TimedOut),
            ChannelError::Unsupported(_) => Some(SocketErrorKind::OperationNotSupported),
        };
        match (kind, self) {
            (Some(kind), error) => {
                SocketError::with_message(kind, op, format!("{}: {}", op.message, error))
            }
            (None, ChannelError::Io(err)) => translate::from_io(op, err),
            (None, error) => SocketError::with_message(
                SocketErrorKind::Other,
                op,
                format!("{}: {}", op.message, error),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_socket_core::error::op;

    #[test]
    fn lifecycle_failures_map_to_portable_kinds() {
        let cases = [
            (ChannelError::Closed, SocketErrorKind::Disposed),
            (ChannelError::NotYetConnected, SocketErrorKind::NotConnected),
            (ChannelError::AlreadyConnected, SocketErrorKind::IsConnected),
            (ChannelError::ConnectionPending, SocketErrorKind::InProgress),
            (ChannelError::IllegalBlockingMode, SocketErrorKind::InvalidArgument),
            (ChannelError::Unsupported("raw sockets"), SocketErrorKind::OperationNotSupported),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_socket_error(op::SEND).kind(), expected);
        }
    }

    #[test]
    fn io_failures_use_errno_translation() {
        let error = ChannelError::from(io::Error::from_raw_os_error(libc::ECONNREFUSED));
        let mapped = error.into_socket_error(op::CONNECT);
        assert_eq!(mapped.kind(), SocketErrorKind::ConnectionRefused);
        assert_eq!(mapped.os_error(), Some(libc::ECONNREFUSED));
    }
}
