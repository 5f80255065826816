//! 可移植套接字选项表。
//!
//! # 教案式说明
//! - **意图 (Why)**：`(level, name)` 的合法组合在各平台之间差异极大，
//!   引擎只承诺一张固定的可移植表，表外组合统一报告 `ProtocolOptionNotSupported`，
//!   后端因而无需各自实现参数校验；
//! - **契约 (What)**：[`SocketOption::resolve`] 把 `(level, name)` 解析为后端可直接处理的 [`SocketOption`]；
//!   [`SocketOption::check_value`] 校验值类型与只读属性；
//! - **实现 (How)**：表以静态数组维护，解析为线性查找，表项数量很小。

use std::time::Duration;

use crate::error::{OperationCode, SocketError, SocketErrorKind, op};

/// 选项层级。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionLevel {
    Socket,
    Ip,
    IpV6,
    Tcp,
    Udp,
}

/// 选项名称。
///
/// 名称集合比 [`SocketOption`] 更宽：部分名称在任何层级都不受支持，
/// 它们的存在只是为了让调用方得到一致的 `ProtocolOptionNotSupported`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionName {
    ReuseAddress,
    ExclusiveAddressUse,
    KeepAlive,
    Linger,
    DontLinger,
    Broadcast,
    SendBuffer,
    ReceiveBuffer,
    SendTimeout,
    ReceiveTimeout,
    OutOfBandInline,
    Error,
    Type,
    AcceptConnection,
    DontRoute,
    Debug,
    NoDelay,
    TimeToLive,
    IpV6Only,
    MulticastLoopback,
}

/// 经过表校验后的选项，后端只需处理这些变体。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketOption {
    ReuseAddress,
    KeepAlive,
    Linger,
    Broadcast,
    SendBuffer,
    ReceiveBuffer,
    SendTimeout,
    ReceiveTimeout,
    OutOfBandInline,
    Error,
    Type,
    AcceptConnection,
    NoDelay,
    TimeToLive,
    IpV6Only,
    MulticastLoopback,
}

/// 选项值类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Int,
    /// `None` 表示无限期。
    Timeout,
    /// `None` 表示关闭 linger。
    Linger,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i32),
    Timeout(Option<Duration>),
    Linger(Option<Duration>),
}

impl OptionValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            OptionValue::Bool(_) => ValueType::Bool,
            OptionValue::Int(_) => ValueType::Int,
            OptionValue::Timeout(_) => ValueType::Timeout,
            OptionValue::Linger(_) => ValueType::Linger,
        }
    }
}

const TABLE: &[(OptionLevel, OptionName, SocketOption)] = &[
    (OptionLevel::Socket, OptionName::ReuseAddress, SocketOption::ReuseAddress),
    (OptionLevel::Socket, OptionName::KeepAlive, SocketOption::KeepAlive),
    (OptionLevel::Socket, OptionName::Linger, SocketOption::Linger),
    (OptionLevel::Socket, OptionName::Broadcast, SocketOption::Broadcast),
    (OptionLevel::Socket, OptionName::SendBuffer, SocketOption::SendBuffer),
    (OptionLevel::Socket, OptionName::ReceiveBuffer, SocketOption::ReceiveBuffer),
    (OptionLevel::Socket, OptionName::SendTimeout, SocketOption::SendTimeout),
    (OptionLevel::Socket, OptionName::ReceiveTimeout, SocketOption::ReceiveTimeout),
    (OptionLevel::Socket, OptionName::OutOfBandInline, SocketOption::OutOfBandInline),
    (OptionLevel::Socket, OptionName::Error, SocketOption::Error),
    (OptionLevel::Socket, OptionName::Type, SocketOption::Type),
    (OptionLevel::Socket, OptionName::AcceptConnection, SocketOption::AcceptConnection),
    (OptionLevel::Tcp, OptionName::NoDelay, SocketOption::NoDelay),
    (OptionLevel::Ip, OptionName::TimeToLive, SocketOption::TimeToLive),
    (OptionLevel::Ip, OptionName::MulticastLoopback, SocketOption::MulticastLoopback),
    (OptionLevel::IpV6, OptionName::IpV6Only, SocketOption::IpV6Only),
    (OptionLevel::IpV6, OptionName::TimeToLive, SocketOption::TimeToLive),
    (OptionLevel::IpV6, OptionName::MulticastLoopback, SocketOption::MulticastLoopback),
];

impl SocketOption {
    /// 查表；表外组合返回 `ProtocolOptionNotSupported`。
    pub fn resolve(
        level: OptionLevel,
        name: OptionName,
        op: OperationCode,
    ) -> Result<Self, SocketError> {
        TABLE
            .iter()
            .find(|(l, n, _)| *l == level && *n == name)
            .map(|(_, _, option)| *option)
            .ok_or_else(|| {
                SocketError::with_message(
                    SocketErrorKind::ProtocolOptionNotSupported,
                    op,
                    format!("{}: option {:?} is not supported at level {:?}", op.message, name, level),
                )
            })
    }

    pub fn value_type(self) -> ValueType {
        use SocketOption::*;
        match self {
            ReuseAddress | KeepAlive | Broadcast | OutOfBandInline | AcceptConnection | NoDelay
            | IpV6Only | MulticastLoopback => ValueType::Bool,
            SendBuffer | ReceiveBuffer | Error | Type | TimeToLive => ValueType::Int,
            SendTimeout | ReceiveTimeout => ValueType::Timeout,
            Linger => ValueType::Linger,
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            SocketOption::Error | SocketOption::Type | SocketOption::AcceptConnection
        )
    }

    /// 写入前的类型与只读校验。
    pub fn check_value(self, value: &OptionValue) -> Result<(), SocketError> {
        if self.is_read_only() {
            return Err(SocketError::invalid_argument(
                op::SET_OPTION,
                "option is read-only",
            ));
        }
        if value.value_type() != self.value_type() {
            return Err(SocketError::invalid_argument(
                op::SET_OPTION,
                "option value has the wrong type",
            ));
        }
        if let OptionValue::Int(v) = value {
            if *v < 0 {
                return Err(SocketError::invalid_argument(
                    op::SET_OPTION,
                    "option value must not be negative",
                ));
            }
        }
        Ok(())
    }
}

/// 把零时长超时归一为“无限期”。
pub fn normalize_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_delay_only_exists_at_tcp_level() {
        assert_eq!(
            SocketOption::resolve(OptionLevel::Tcp, OptionName::NoDelay, op::GET_OPTION)
                .expect("表内选项"),
            SocketOption::NoDelay
        );
        let err = SocketOption::resolve(OptionLevel::Socket, OptionName::NoDelay, op::GET_OPTION)
            .expect_err("层级错误");
        assert_eq!(err.kind(), SocketErrorKind::ProtocolOptionNotSupported);
        assert_eq!(err.code(), "spark.socket.get_option_failed");
    }

    #[test]
    fn names_outside_the_table_are_rejected_everywhere() {
        for level in [
            OptionLevel::Socket,
            OptionLevel::Ip,
            OptionLevel::IpV6,
            OptionLevel::Tcp,
            OptionLevel::Udp,
        ] {
            for name in [OptionName::DontRoute, OptionName::Debug, OptionName::DontLinger] {
                assert!(SocketOption::resolve(level, name, op::SET_OPTION).is_err());
            }
        }
    }

    #[test]
    fn read_only_and_type_mismatch_are_caller_errors() {
        let err = SocketOption::Error
            .check_value(&OptionValue::Int(0))
            .expect_err("只读");
        assert_eq!(err.kind(), SocketErrorKind::InvalidArgument);
        let err = SocketOption::NoDelay
            .check_value(&OptionValue::Int(1))
            .expect_err("类型不匹配");
        assert_eq!(err.kind(), SocketErrorKind::InvalidArgument);
        SocketOption::Linger
            .check_value(&OptionValue::Linger(Some(Duration::from_secs(1))))
            .expect("合法值");
    }

    #[test]
    fn zero_timeout_means_infinite() {
        assert_eq!(normalize_timeout(Some(Duration::ZERO)), None);
        assert_eq!(
            normalize_timeout(Some(Duration::from_millis(5))),
            Some(Duration::from_millis(5))
        );
    }
}
