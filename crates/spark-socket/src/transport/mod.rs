//! 两套后端实现与按配置创建传输的入口。

mod native;
pub(crate) mod sockopt;

use std::sync::Arc;

use spark_socket_core::{AddressFamily, BackendKind, ProtocolKind, SocketError, SocketKind, Transport};

pub use crate::bridge::BridgedTransport;
pub use native::NativeTransport;

/// 为新套接字创建指定后端的传输。
pub fn create(
    backend: BackendKind,
    family: AddressFamily,
    kind: SocketKind,
    protocol: ProtocolKind,
) -> Result<Arc<dyn Transport>, SocketError> {
    Ok(match backend {
        BackendKind::Native => Arc::new(NativeTransport::create(family, kind, protocol)?),
        BackendKind::Bridged => Arc::new(BridgedTransport::create(family, kind, protocol)?),
    })
}
