//! errno / `io::Error` → [`SocketErrorKind`] 翻译。
//!
//! 优先使用原始 errno 精确映射；当错误并非来自系统调用（例如自行构造的 `io::Error`）时，
//! 回退到 `io::ErrorKind` 的粗粒度映射。

use std::io;

use crate::error::{OperationCode, SocketError, SocketErrorKind};

/// 将 IO 错误翻译为可移植错误，并附带操作码。
pub fn from_io(op: OperationCode, error: io::Error) -> SocketError {
    let errno = error.raw_os_error();
    let kind = errno
        .and_then(kind_from_errno)
        .unwrap_or_else(|| kind_from_io_kind(error.kind()));
    SocketError::with_message(kind, op, format!("{}: {}", op.message, error)).with_os_error(errno)
}

/// 直接从 errno 构造错误，用于 `take_error`、`SO_ERROR` 等场景。
pub fn from_errno(op: OperationCode, errno: i32) -> SocketError {
    from_io(op, io::Error::from_raw_os_error(errno))
}

/// 翻译单个 errno；未知值返回 `None`。
pub fn kind_from_errno(errno: i32) -> Option<SocketErrorKind> {
    use SocketErrorKind::*;
    let kind = match errno {
        e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => WouldBlock,
        libc::EINPROGRESS | libc::EALREADY => InProgress,
        libc::ENOTCONN => NotConnected,
        libc::EISCONN => IsConnected,
        libc::ECONNREFUSED => ConnectionRefused,
        libc::ECONNRESET => ConnectionReset,
        libc::ECONNABORTED => ConnectionAborted,
        libc::EADDRINUSE => AddressInUse,
        libc::EADDRNOTAVAIL => AddressNotAvailable,
        libc::EINVAL | libc::EDESTADDRREQ | libc::ENOTSOCK => InvalidArgument,
        libc::ENOPROTOOPT => ProtocolOptionNotSupported,
        libc::EOPNOTSUPP => OperationNotSupported,
        libc::EPROTONOSUPPORT | libc::EPROTOTYPE | libc::ESOCKTNOSUPPORT => ProtocolNotSupported,
        libc::EAFNOSUPPORT | libc::EPFNOSUPPORT => AddressFamilyNotSupported,
        libc::EBADF => Disposed,
        libc::EINTR => Interrupted,
        libc::ETIMEDOUT => TimedOut,
        libc::ENETUNREACH | libc::ENETDOWN => NetworkUnreachable,
        libc::EHOSTUNREACH | libc::EHOSTDOWN => HostUnreachable,
        libc::ENOBUFS | libc::ENOMEM => NoBufferSpace,
        libc::EPIPE | libc::ESHUTDOWN => Shutdown,
        libc::EACCES | libc::EPERM => AccessDenied,
        libc::EMSGSIZE => MessageSize,
        _ => return None,
    };
    Some(kind)
}

fn kind_from_io_kind(kind: io::ErrorKind) -> SocketErrorKind {
    use io::ErrorKind;
    match kind {
        ErrorKind::WouldBlock => SocketErrorKind::WouldBlock,
        ErrorKind::NotConnected => SocketErrorKind::NotConnected,
        ErrorKind::ConnectionRefused => SocketErrorKind::ConnectionRefused,
        ErrorKind::ConnectionReset => SocketErrorKind::ConnectionReset,
        ErrorKind::ConnectionAborted => SocketErrorKind::ConnectionAborted,
        ErrorKind::AddrInUse => SocketErrorKind::AddressInUse,
        ErrorKind::AddrNotAvailable => SocketErrorKind::AddressNotAvailable,
        ErrorKind::InvalidInput | ErrorKind::InvalidData => SocketErrorKind::InvalidArgument,
        ErrorKind::Unsupported => SocketErrorKind::OperationNotSupported,
        ErrorKind::Interrupted => SocketErrorKind::Interrupted,
        ErrorKind::TimedOut => SocketErrorKind::TimedOut,
        ErrorKind::BrokenPipe => SocketErrorKind::Shutdown,
        ErrorKind::PermissionDenied => SocketErrorKind::AccessDenied,
        ErrorKind::OutOfMemory => SocketErrorKind::NoBufferSpace,
        ErrorKind::UnexpectedEof => SocketErrorKind::ConnectionReset,
        _ => SocketErrorKind::Other,
    }
}
