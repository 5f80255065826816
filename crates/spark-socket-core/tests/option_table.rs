//! 选项表的属性测试：任何 `(level, name)` 组合要么解析成功并保持名称一致，
//! 要么以 `ProtocolOptionNotSupported` 拒绝，不存在第三种结果。

use proptest::prelude::*;
use spark_socket_core::error::op;
use spark_socket_core::{OptionLevel, OptionName, OptionValue, SocketErrorKind, SocketOption};
use std::time::Duration;

const LEVELS: [OptionLevel; 5] = [
    OptionLevel::Socket,
    OptionLevel::Ip,
    OptionLevel::IpV6,
    OptionLevel::Tcp,
    OptionLevel::Udp,
];

const NAMES: [OptionName; 20] = [
    OptionName::ReuseAddress,
    OptionName::ExclusiveAddressUse,
    OptionName::KeepAlive,
    OptionName::Linger,
    OptionName::DontLinger,
    OptionName::Broadcast,
    OptionName::SendBuffer,
    OptionName::ReceiveBuffer,
    OptionName::SendTimeout,
    OptionName::ReceiveTimeout,
    OptionName::OutOfBandInline,
    OptionName::Error,
    OptionName::Type,
    OptionName::AcceptConnection,
    OptionName::DontRoute,
    OptionName::Debug,
    OptionName::NoDelay,
    OptionName::TimeToLive,
    OptionName::IpV6Only,
    OptionName::MulticastLoopback,
];

fn value_strategy() -> impl Strategy<Value = OptionValue> {
    prop_oneof![
        any::<bool>().prop_map(OptionValue::Bool),
        (0i32..1 << 20).prop_map(OptionValue::Int),
        proptest::option::of(0u64..10_000)
            .prop_map(|ms| OptionValue::Timeout(ms.map(Duration::from_millis))),
        proptest::option::of(0u64..60).prop_map(|s| OptionValue::Linger(s.map(Duration::from_secs))),
    ]
}

proptest! {
    #[test]
    fn resolution_is_total(
        level in proptest::sample::select(LEVELS.to_vec()),
        name in proptest::sample::select(NAMES.to_vec()),
    ) {
        match SocketOption::resolve(level, name, op::GET_OPTION) {
            Ok(option) => prop_assert_eq!(format!("{option:?}"), format!("{name:?}")),
            Err(err) => prop_assert_eq!(err.kind(), SocketErrorKind::ProtocolOptionNotSupported),
        }
    }

    #[test]
    fn writable_options_accept_exactly_their_value_type(
        level in proptest::sample::select(LEVELS.to_vec()),
        name in proptest::sample::select(NAMES.to_vec()),
        value in value_strategy(),
    ) {
        let Ok(option) = SocketOption::resolve(level, name, op::SET_OPTION) else {
            return Ok(());
        };
        let accepted = option.check_value(&value).is_ok();
        let expected = !option.is_read_only() && option.value_type() == value.value_type();
        prop_assert_eq!(accepted, expected);
    }
}
