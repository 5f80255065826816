//! 套接字基础值类型。

use std::fmt;
use std::net::SocketAddr;
use std::ops::{BitOr, BitOrAssign};

/// 地址族。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    InterNetwork,
    InterNetworkV6,
}

impl AddressFamily {
    /// 根据端点推断地址族。
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::InterNetwork,
            SocketAddr::V6(_) => AddressFamily::InterNetworkV6,
        }
    }

    pub fn matches(self, addr: &SocketAddr) -> bool {
        Self::of(addr) == self
    }
}

/// 套接字类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Stream,
    Datagram,
    Raw,
}

impl SocketKind {
    /// `SocketOptionName::Type` 读取时返回的可移植编号。
    pub fn code(self) -> i32 {
        match self {
            SocketKind::Stream => 1,
            SocketKind::Datagram => 2,
            SocketKind::Raw => 3,
        }
    }

    pub fn is_connection_oriented(self) -> bool {
        matches!(self, SocketKind::Stream)
    }
}

/// 传输协议。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// 由地址族与套接字类型推导默认协议。
    Unspecified,
    Tcp,
    Udp,
    Icmp,
    IcmpV6,
}

impl ProtocolKind {
    /// 协议与套接字类型是否可以组合。
    pub fn is_compatible_with(self, kind: SocketKind) -> bool {
        match (kind, self) {
            (SocketKind::Stream, ProtocolKind::Tcp | ProtocolKind::Unspecified) => true,
            (SocketKind::Datagram, ProtocolKind::Udp | ProtocolKind::Unspecified) => true,
            (SocketKind::Raw, ProtocolKind::Icmp | ProtocolKind::IcmpV6) => true,
            _ => false,
        }
    }
}

/// 发送/接收标志位。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SocketFlags(u8);

impl SocketFlags {
    pub const NONE: SocketFlags = SocketFlags(0);
    pub const OUT_OF_BAND: SocketFlags = SocketFlags(0b0001);
    pub const PEEK: SocketFlags = SocketFlags(0b0010);
    pub const DONT_ROUTE: SocketFlags = SocketFlags(0b0100);

    const ALL: u8 = 0b0111;

    pub fn contains(self, other: SocketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// 从原始位构造；包含未知位时返回 `None`。
    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits & !Self::ALL == 0).then_some(SocketFlags(bits))
    }
}

impl BitOr for SocketFlags {
    type Output = SocketFlags;

    fn bitor(self, rhs: SocketFlags) -> SocketFlags {
        SocketFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SocketFlags {
    fn bitor_assign(&mut self, rhs: SocketFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SocketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.contains(SocketFlags::OUT_OF_BAND) {
            set.entry(&"OUT_OF_BAND");
        }
        if self.contains(SocketFlags::PEEK) {
            set.entry(&"PEEK");
        }
        if self.contains(SocketFlags::DONT_ROUTE) {
            set.entry(&"DONT_ROUTE");
        }
        set.finish()
    }
}

/// 半关闭方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shutdown {
    Receive,
    Send,
    Both,
}

impl From<Shutdown> for std::net::Shutdown {
    fn from(how: Shutdown) -> Self {
        match how {
            Shutdown::Receive => std::net::Shutdown::Read,
            Shutdown::Send => std::net::Shutdown::Write,
            Shutdown::Both => std::net::Shutdown::Both,
        }
    }
}

/// `Poll` / `Select` 关心的就绪方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectMode {
    Read,
    Write,
    Error,
}

/// 后端类型，用于日志与诊断。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Native,
    Bridged,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Bridged => "bridged",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_reject_unknown_bits() {
        assert_eq!(SocketFlags::from_bits(0b1000), None);
        let flags = SocketFlags::from_bits(0b0011).expect("合法标志位");
        assert!(flags.contains(SocketFlags::PEEK));
        assert!(flags.contains(SocketFlags::OUT_OF_BAND));
        assert!(!flags.contains(SocketFlags::DONT_ROUTE));
    }

    #[test]
    fn protocol_compatibility_table() {
        assert!(ProtocolKind::Tcp.is_compatible_with(SocketKind::Stream));
        assert!(ProtocolKind::Unspecified.is_compatible_with(SocketKind::Datagram));
        assert!(!ProtocolKind::Udp.is_compatible_with(SocketKind::Stream));
        assert!(!ProtocolKind::Unspecified.is_compatible_with(SocketKind::Raw));
    }
}
