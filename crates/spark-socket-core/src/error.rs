//! 可移植套接字错误模型。
//!
//! # 教案式说明
//! - **意图 (Why)**：两套后端（原生内核调用与通道桥接）各自产生的异常形态完全不同，
//!   上层只允许看到 [`SocketErrorKind`] 这一份稳定分类，任何后端特有的错误类型都不得越过传输边界；
//! - **契约 (What)**：[`SocketError`] 同时携带分类、稳定错误码、人类可读文案与可选的原始 errno；
//!   错误码遵循 `spark.socket.<op>_failed` 约定，由 [`OperationCode`] 常量统一声明；
//! - **实现 (How)**：构造时即根据 [`OperationCode`] 拼接默认文案，调用方可通过 [`SocketError::with_message`]
//!   覆盖；[`SocketErrorKind::class`] 将分类折叠为调度器关心的五类语义。

use std::borrow::Cow;
use std::fmt;
use std::io;

use thiserror::Error;

/// 描述一次套接字操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationCode {
    pub code: &'static str,
    pub message: &'static str,
}

macro_rules! operation_codes {
    ($($name:ident => $op:literal),+ $(,)?) => {
        $(
            pub const $name: OperationCode = OperationCode {
                code: concat!("spark.socket.", $op, "_failed"),
                message: concat!("socket ", $op),
            };
        )+
    };
}

/// 所有公开操作的错误码表。
pub mod op {
    use super::OperationCode;

    operation_codes! {
        CREATE => "create",
        BIND => "bind",
        LISTEN => "listen",
        ACCEPT => "accept",
        CONNECT => "connect",
        DISCONNECT => "disconnect",
        SEND => "send",
        SEND_TO => "send_to",
        RECEIVE => "receive",
        RECEIVE_FROM => "receive_from",
        SHUTDOWN => "shutdown",
        GET_OPTION => "get_option",
        SET_OPTION => "set_option",
        SET_BLOCKING => "set_blocking",
        ADDRESS => "address",
        AVAILABLE => "available",
        SELECT => "select",
        POLL => "poll",
        UPGRADE => "upgrade",
        CLOSE => "close",
    }
}

/// 可移植错误分类。
///
/// `Success` 不作为变体出现：成功一律由 `Ok(..)` 表达。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SocketErrorKind {
    WouldBlock,
    InProgress,
    NotConnected,
    IsConnected,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    AddressInUse,
    AddressNotAvailable,
    InvalidArgument,
    ProtocolOptionNotSupported,
    OperationNotSupported,
    ProtocolNotSupported,
    AddressFamilyNotSupported,
    Disposed,
    Interrupted,
    TimedOut,
    NetworkUnreachable,
    HostUnreachable,
    NoBufferSpace,
    Shutdown,
    AccessDenied,
    MessageSize,
    Other,
}

/// 调度器视角下的错误语义分组。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// 只决定是否重新派发或继续等待连接，永不作为队列操作的终态。
    Transient,
    /// 连接已不可用，上层需要把 `connected` 置为 `false`。
    ConnectionFatal,
    /// 调用方参数或用法错误。
    Caller,
    /// 套接字已关闭。
    Lifecycle,
    Other,
}

impl SocketErrorKind {
    pub fn class(self) -> ErrorClass {
        use SocketErrorKind::*;
        match self {
            WouldBlock | InProgress | Interrupted => ErrorClass::Transient,
            ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | TimedOut
            | NetworkUnreachable | HostUnreachable | Shutdown => ErrorClass::ConnectionFatal,
            InvalidArgument
            | ProtocolOptionNotSupported
            | OperationNotSupported
            | ProtocolNotSupported
            | AddressFamilyNotSupported
            | IsConnected
            | AddressInUse
            | AddressNotAvailable
            | AccessDenied
            | MessageSize => ErrorClass::Caller,
            Disposed => ErrorClass::Lifecycle,
            NoBufferSpace | Other => ErrorClass::Other,
        }
    }

    /// 稳定的蛇形命名，用于日志字段。
    pub fn as_str(self) -> &'static str {
        use SocketErrorKind::*;
        match self {
            WouldBlock => "would_block",
            InProgress => "in_progress",
            NotConnected => "not_connected",
            IsConnected => "is_connected",
            ConnectionRefused => "connection_refused",
            ConnectionReset => "connection_reset",
            ConnectionAborted => "connection_aborted",
            AddressInUse => "address_in_use",
            AddressNotAvailable => "address_not_available",
            InvalidArgument => "invalid_argument",
            ProtocolOptionNotSupported => "protocol_option_not_supported",
            OperationNotSupported => "operation_not_supported",
            ProtocolNotSupported => "protocol_not_supported",
            AddressFamilyNotSupported => "address_family_not_supported",
            Disposed => "disposed",
            Interrupted => "interrupted",
            TimedOut => "timed_out",
            NetworkUnreachable => "network_unreachable",
            HostUnreachable => "host_unreachable",
            NoBufferSpace => "no_buffer_space",
            Shutdown => "shutdown",
            AccessDenied => "access_denied",
            MessageSize => "message_size",
            Other => "other",
        }
    }

    /// 回写为 `std::io::ErrorKind`，供 `Read`/`Write` 适配层使用。
    pub fn to_io_kind(self) -> io::ErrorKind {
        use SocketErrorKind::*;
        match self {
            WouldBlock | InProgress => io::ErrorKind::WouldBlock,
            NotConnected => io::ErrorKind::NotConnected,
            ConnectionRefused => io::ErrorKind::ConnectionRefused,
            ConnectionReset => io::ErrorKind::ConnectionReset,
            ConnectionAborted => io::ErrorKind::ConnectionAborted,
            AddressInUse => io::ErrorKind::AddrInUse,
            AddressNotAvailable => io::ErrorKind::AddrNotAvailable,
            InvalidArgument => io::ErrorKind::InvalidInput,
            ProtocolOptionNotSupported
            | OperationNotSupported
            | ProtocolNotSupported
            | AddressFamilyNotSupported => io::ErrorKind::Unsupported,
            Interrupted => io::ErrorKind::Interrupted,
            TimedOut => io::ErrorKind::TimedOut,
            Shutdown => io::ErrorKind::BrokenPipe,
            AccessDenied => io::ErrorKind::PermissionDenied,
            NoBufferSpace => io::ErrorKind::OutOfMemory,
            IsConnected | Disposed | NetworkUnreachable | HostUnreachable | MessageSize | Other => {
                io::ErrorKind::Other
            }
        }
    }
}

impl fmt::Display for SocketErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 跨越传输边界的唯一错误类型。
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct SocketError {
    kind: SocketErrorKind,
    code: &'static str,
    message: Cow<'static, str>,
    os_error: Option<i32>,
}

impl SocketError {
    /// 以操作默认文案构造错误，例如 `socket bind: address_in_use`。
    pub fn new(kind: SocketErrorKind, op: OperationCode) -> Self {
        Self {
            kind,
            code: op.code,
            message: Cow::Owned(format!("{}: {}", op.message, kind)),
            os_error: None,
        }
    }

    pub fn with_message(
        kind: SocketErrorKind,
        op: OperationCode,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            code: op.code,
            message: message.into(),
            os_error: None,
        }
    }

    /// 套接字已关闭时的统一错误。
    pub fn disposed(op: OperationCode) -> Self {
        Self::new(SocketErrorKind::Disposed, op)
    }

    pub fn invalid_argument(op: OperationCode, reason: &str) -> Self {
        Self::with_message(
            SocketErrorKind::InvalidArgument,
            op,
            format!("{}: {}", op.message, reason),
        )
    }

    pub(crate) fn with_os_error(mut self, errno: Option<i32>) -> Self {
        self.os_error = errno;
        self
    }

    pub fn kind(&self) -> SocketErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 原始 errno；通道层错误或引擎自身构造的错误为 `None`。
    pub fn os_error(&self) -> Option<i32> {
        self.os_error
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    /// WouldBlock / InProgress：仅影响重派发与非阻塞连接逻辑。
    pub fn is_pending(&self) -> bool {
        matches!(
            self.kind,
            SocketErrorKind::WouldBlock | SocketErrorKind::InProgress
        )
    }

    /// 以新的操作码重新标注错误，保留分类与 errno。
    pub fn for_operation(self, op: OperationCode) -> Self {
        Self {
            code: op.code,
            ..self
        }
    }
}

impl From<SocketError> for io::Error {
    fn from(error: SocketError) -> Self {
        match error.os_error {
            Some(errno) => io::Error::from_raw_os_error(errno),
            None => io::Error::new(error.kind.to_io_kind(), error),
        }
    }
}
