//! 基于 `socket2` 的选项读写，原生后端与桥接后端共用。
//!
//! `Type` 与 `AcceptConnection` 由各后端依据自身状态回答，不经过这里。
//! `TimeToLive` 与 `MulticastLoopback` 按地址族分别落到 IPv4 与 IPv6 层。

use std::io;

use socket2::Socket;
use spark_socket_core::error::op;
use spark_socket_core::option::normalize_timeout;
use spark_socket_core::{
    AddressFamily, OptionValue, SocketError, SocketErrorKind, SocketOption, translate,
};

pub(crate) fn read(
    socket: &Socket,
    family: AddressFamily,
    option: SocketOption,
) -> Result<OptionValue, SocketError> {
    let map = |err: io::Error| translate::from_io(op::GET_OPTION, err);
    let value = match option {
        SocketOption::ReuseAddress => OptionValue::Bool(socket.reuse_address().map_err(map)?),
        SocketOption::KeepAlive => OptionValue::Bool(socket.keepalive().map_err(map)?),
        SocketOption::Linger => OptionValue::Linger(socket.linger().map_err(map)?),
        SocketOption::Broadcast => OptionValue::Bool(socket.broadcast().map_err(map)?),
        SocketOption::SendBuffer => {
            OptionValue::Int(clamp_size(socket.send_buffer_size().map_err(map)?))
        }
        SocketOption::ReceiveBuffer => {
            OptionValue::Int(clamp_size(socket.recv_buffer_size().map_err(map)?))
        }
        SocketOption::SendTimeout => OptionValue::Timeout(socket.write_timeout().map_err(map)?),
        SocketOption::ReceiveTimeout => OptionValue::Timeout(socket.read_timeout().map_err(map)?),
        SocketOption::OutOfBandInline => {
            OptionValue::Bool(socket.out_of_band_inline().map_err(map)?)
        }
        SocketOption::Error => {
            let pending = socket.take_error().map_err(map)?;
            OptionValue::Int(pending.and_then(|err| err.raw_os_error()).unwrap_or(0))
        }
        SocketOption::NoDelay => OptionValue::Bool(socket.tcp_nodelay().map_err(map)?),
        SocketOption::TimeToLive => {
            let hops = match family {
                AddressFamily::InterNetwork => socket.ttl_v4(),
                AddressFamily::InterNetworkV6 => socket.unicast_hops_v6(),
            };
            OptionValue::Int(i32::try_from(hops.map_err(map)?).unwrap_or(i32::MAX))
        }
        SocketOption::IpV6Only => OptionValue::Bool(socket.only_v6().map_err(map)?),
        SocketOption::MulticastLoopback => OptionValue::Bool(
            match family {
                AddressFamily::InterNetwork => socket.multicast_loop_v4(),
                AddressFamily::InterNetworkV6 => socket.multicast_loop_v6(),
            }
            .map_err(map)?,
        ),
        SocketOption::Type | SocketOption::AcceptConnection => {
            return Err(SocketError::new(
                SocketErrorKind::ProtocolOptionNotSupported,
                op::GET_OPTION,
            ));
        }
    };
    Ok(value)
}

/// 写入前调用方已经完成 [`SocketOption::check_value`] 校验。
pub(crate) fn write(
    socket: &Socket,
    family: AddressFamily,
    option: SocketOption,
    value: OptionValue,
) -> Result<(), SocketError> {
    let map = |err: io::Error| translate::from_io(op::SET_OPTION, err);
    match (option, value) {
        (SocketOption::ReuseAddress, OptionValue::Bool(on)) => {
            socket.set_reuse_address(on).map_err(map)
        }
        (SocketOption::KeepAlive, OptionValue::Bool(on)) => socket.set_keepalive(on).map_err(map),
        (SocketOption::Linger, OptionValue::Linger(linger)) => {
            socket.set_linger(linger).map_err(map)
        }
        (SocketOption::Broadcast, OptionValue::Bool(on)) => socket.set_broadcast(on).map_err(map),
        (SocketOption::SendBuffer, OptionValue::Int(size)) => socket
            .set_send_buffer_size(to_size(size)?)
            .map_err(map),
        (SocketOption::ReceiveBuffer, OptionValue::Int(size)) => socket
            .set_recv_buffer_size(to_size(size)?)
            .map_err(map),
        (SocketOption::SendTimeout, OptionValue::Timeout(timeout)) => socket
            .set_write_timeout(normalize_timeout(timeout))
            .map_err(map),
        (SocketOption::ReceiveTimeout, OptionValue::Timeout(timeout)) => socket
            .set_read_timeout(normalize_timeout(timeout))
            .map_err(map),
        (SocketOption::OutOfBandInline, OptionValue::Bool(on)) => {
            socket.set_out_of_band_inline(on).map_err(map)
        }
        (SocketOption::NoDelay, OptionValue::Bool(on)) => socket.set_tcp_nodelay(on).map_err(map),
        (SocketOption::TimeToLive, OptionValue::Int(ttl)) => {
            let ttl = u32::try_from(ttl).map_err(|_| {
                SocketError::invalid_argument(op::SET_OPTION, "time-to-live must not be negative")
            })?;
            match family {
                AddressFamily::InterNetwork => socket.set_ttl_v4(ttl),
                AddressFamily::InterNetworkV6 => socket.set_unicast_hops_v6(ttl),
            }
            .map_err(map)
        }
        (SocketOption::IpV6Only, OptionValue::Bool(on)) => socket.set_only_v6(on).map_err(map),
        (SocketOption::MulticastLoopback, OptionValue::Bool(on)) => match family {
            AddressFamily::InterNetwork => socket.set_multicast_loop_v4(on),
            AddressFamily::InterNetworkV6 => socket.set_multicast_loop_v6(on),
        }
        .map_err(map),
        _ => Err(SocketError::invalid_argument(
            op::SET_OPTION,
            "option value has the wrong type",
        )),
    }
}

fn clamp_size(size: usize) -> i32 {
    i32::try_from(size).unwrap_or(i32::MAX)
}

fn to_size(size: i32) -> Result<usize, SocketError> {
    usize::try_from(size)
        .map_err(|_| SocketError::invalid_argument(op::SET_OPTION, "buffer size must not be negative"))
}
