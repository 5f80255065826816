//! TLS 层错误映射。
//!
//! 传输适配层会把 [`SocketError`] 包装进 `io::Error` 交给 rustls；这里负责把它原样取回，
//! 避免 `Disposed`、`TimedOut` 等分类在穿越 rustls 之后被抹平。

use std::io;

use rustls::{AlertDescription, Error as RustlsError};
use spark_socket_core::error::OperationCode;
use spark_socket_core::{SocketError, SocketErrorKind, translate};
use thiserror::Error;

/// 握手失败的原因，仅用于日志与诊断。
#[derive(Debug, Error)]
pub(crate) enum HandshakeFailure {
    #[error("peer rejected the handshake: {0}")]
    Tls(RustlsError),
    #[error("peer closed the connection during the handshake")]
    PeerClosed,
    #[error("transport failed during the handshake: {0}")]
    Transport(SocketError),
}

impl HandshakeFailure {
    pub(crate) fn from_io(op: OperationCode, error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            return HandshakeFailure::PeerClosed;
        }
        if let Some(tls) = rustls_error(&error) {
            return HandshakeFailure::Tls(tls.clone());
        }
        HandshakeFailure::Transport(map_io(op, error))
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            HandshakeFailure::Tls(RustlsError::InvalidCertificate(_)) => "certificate",
            HandshakeFailure::Tls(RustlsError::AlertReceived(_)) => "alert",
            HandshakeFailure::Tls(_) => "protocol",
            HandshakeFailure::PeerClosed => "peer_closed",
            HandshakeFailure::Transport(_) => "transport",
        }
    }
}

/// 把读写路径上的 `io::Error` 转为可移植错误。
pub(crate) fn map_io(op: OperationCode, error: io::Error) -> SocketError {
    if let Some(tls) = rustls_error(&error) {
        return map_rustls(op, tls);
    }
    let wraps_socket_error = error
        .get_ref()
        .is_some_and(|inner| inner.is::<SocketError>());
    if wraps_socket_error {
        if let Some(inner) = error.into_inner() {
            if let Ok(socket_error) = inner.downcast::<SocketError>() {
                return (*socket_error).for_operation(op);
            }
        }
        return SocketError::new(SocketErrorKind::Other, op);
    }
    translate::from_io(op, error)
}

/// 对端的 `close_notify` 是有序关闭：接收路径把它折叠为 EOF（`Ok(0)`），不经过这里。
pub(crate) fn is_close_notify(error: &RustlsError) -> bool {
    matches!(
        error,
        RustlsError::AlertReceived(AlertDescription::CloseNotify)
    )
}

/// 记录层错误意味着连接已不可信，统一视为连接中止；
/// 接收以外的路径遇到 `close_notify` 报告 `Shutdown`，与接收路径的有序 EOF 保持一致。
pub(crate) fn map_rustls(op: OperationCode, error: &RustlsError) -> SocketError {
    let kind = if is_close_notify(error) {
        SocketErrorKind::Shutdown
    } else {
        SocketErrorKind::ConnectionAborted
    };
    SocketError::with_message(kind, op, format!("{}: {}", op.message, error))
}

pub(crate) fn carries_close_notify(error: &io::Error) -> bool {
    rustls_error(error).is_some_and(is_close_notify)
}

fn rustls_error(error: &io::Error) -> Option<&RustlsError> {
    error
        .get_ref()
        .and_then(|source| source.downcast_ref::<RustlsError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_socket_core::error::op;

    #[test]
    fn wrapped_socket_errors_survive_the_round_trip() {
        let original = SocketError::new(SocketErrorKind::Disposed, op::RECEIVE);
        let wrapped = io::Error::new(io::ErrorKind::Other, original);
        let mapped = map_io(op::UPGRADE, wrapped);
        assert_eq!(mapped.kind(), SocketErrorKind::Disposed);
        assert_eq!(mapped.code(), "spark.socket.upgrade_failed");
    }

    #[test]
    fn rustls_errors_abort_the_connection() {
        let wrapped = io::Error::new(io::ErrorKind::InvalidData, RustlsError::DecryptError);
        let mapped = map_io(op::RECEIVE, wrapped);
        assert_eq!(mapped.kind(), SocketErrorKind::ConnectionAborted);
    }

    #[test]
    fn close_notify_is_an_orderly_shutdown_not_a_reset() {
        let alert = RustlsError::AlertReceived(AlertDescription::CloseNotify);
        assert!(is_close_notify(&alert));
        let wrapped = io::Error::new(io::ErrorKind::InvalidData, alert);
        let mapped = map_io(op::SEND, wrapped);
        assert_eq!(mapped.kind(), SocketErrorKind::Shutdown);
        assert!(!is_close_notify(&RustlsError::AlertReceived(
            AlertDescription::HandshakeFailure
        )));
    }

    #[test]
    fn eof_during_handshake_is_peer_closed() {
        let failure = HandshakeFailure::from_io(
            op::UPGRADE,
            io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        );
        assert_eq!(failure.label(), "peer_closed");
    }
}
