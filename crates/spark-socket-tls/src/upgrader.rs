use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use rustls_pki_types::ServerName;
use spark_socket_core::error::op;
use spark_socket_core::{SocketError, SocketErrorKind, SocketKind, Transport};

use crate::error::HandshakeFailure;
use crate::io::TransportIo;
use crate::secure::SecureTransport;

/// 套接字的升级状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeState {
    Plain,
    Upgrading,
    Secured,
    /// 最近一次握手失败；套接字仍可继续以明文使用，也允许再次尝试升级。
    Failed,
}

impl UpgradeState {
    /// 尝试进入 `Upgrading`；已有升级在进行时返回 `InProgress`。
    pub fn begin(&mut self) -> Result<(), SocketError> {
        match self {
            UpgradeState::Upgrading => Err(SocketError::with_message(
                SocketErrorKind::InProgress,
                op::UPGRADE,
                "socket upgrade: another upgrade is in progress",
            )),
            UpgradeState::Secured => Ok(()),
            UpgradeState::Plain | UpgradeState::Failed => {
                *self = UpgradeState::Upgrading;
                Ok(())
            }
        }
    }

    /// 根据升级结果收尾状态。
    pub fn finish(&mut self, secured: bool) {
        *self = if secured {
            UpgradeState::Secured
        } else {
            UpgradeState::Failed
        };
    }
}

/// TLS 客户端升级器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在明文连接上原地完成 TLS 客户端握手，使 `Socket` 替换传输后对调用方透明；
/// - 通过 [`ArcSwap`] 支持热更新 [`ClientConfig`]，替换只影响之后发起的升级。
///
/// ## 逻辑（How）
/// 1. 已是安全传输时直接返回同一实例；
/// 2. 校验前置条件：流式、阻塞模式、已连接；
/// 3. 确定服务器名称：显式提示优先，否则使用对端 IP；
/// 4. 以 `complete_io` 驱动握手，失败时记录告警并返回 `Ok(None)`。
///
/// ## 契约（What）
/// - 前置条件不满足时返回结构化错误（`NotConnected` / `OperationNotSupported` / `InvalidArgument`）；
/// - 握手失败不会关闭或修改原传输。
#[derive(Clone, Debug)]
pub struct TlsUpgrader {
    config: Arc<ArcSwap<ClientConfig>>,
}

impl TlsUpgrader {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config: Arc::new(ArcSwap::new(config)),
        }
    }

    /// 以给定根证书集构造使用 `ring` 加密提供者的默认配置。
    pub fn with_root_certificates(roots: RootCertStore) -> Result<Self, SocketError> {
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|err| {
            SocketError::with_message(
                SocketErrorKind::InvalidArgument,
                op::UPGRADE,
                format!("socket upgrade: invalid tls configuration: {err}"),
            )
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(Self::new(Arc::new(config)))
    }

    /// 替换当前客户端配置。
    pub fn replace_config(&self, config: Arc<ClientConfig>) {
        self.config.store(config);
    }

    pub fn config_snapshot(&self) -> Arc<ClientConfig> {
        self.config.load_full()
    }

    /// 对已连接的流式传输执行客户端握手。
    ///
    /// - `Ok(Some(t))`：升级成功，或 `transport` 本身已是安全传输（此时 `t` 与其指向同一对象）；
    /// - `Ok(None)`：握手失败，原传输保持可用；
    /// - `Err(_)`：前置条件不满足。
    pub fn upgrade(
        &self,
        transport: &Arc<dyn Transport>,
        remote_hint: Option<&str>,
    ) -> Result<Option<Arc<dyn Transport>>, SocketError> {
        if transport.is_secure() {
            return Ok(Some(Arc::clone(transport)));
        }
        if transport.kind() != SocketKind::Stream {
            return Err(SocketError::with_message(
                SocketErrorKind::OperationNotSupported,
                op::UPGRADE,
                "socket upgrade: only stream sockets can be secured",
            ));
        }
        if !transport.is_blocking() {
            return Err(SocketError::with_message(
                SocketErrorKind::OperationNotSupported,
                op::UPGRADE,
                "socket upgrade: non-blocking sockets cannot be secured",
            ));
        }
        let peer = transport
            .peer_addr()
            .map_err(|err| err.for_operation(op::UPGRADE))?;

        let server_name = match remote_hint {
            Some(hint) => ServerName::try_from(hint.to_owned()).map_err(|_| {
                SocketError::invalid_argument(op::UPGRADE, "remote hint is not a valid server name")
            })?,
            None => ServerName::IpAddress(peer.ip().into()),
        };
        let display_name = remote_hint.map_or_else(|| peer.ip().to_string(), str::to_owned);

        let mut conn = ClientConnection::new(self.config.load_full(), server_name).map_err(|err| {
            SocketError::with_message(
                SocketErrorKind::InvalidArgument,
                op::UPGRADE,
                format!("socket upgrade: {err}"),
            )
        })?;

        match handshake(transport.as_ref(), &mut conn) {
            Ok(()) => {
                tracing::info!(
                    target: "spark_socket_tls",
                    server_name = %display_name,
                    %peer,
                    version = ?conn.protocol_version(),
                    "tls upgrade completed"
                );
                Ok(Some(Arc::new(SecureTransport::new(
                    Arc::clone(transport),
                    conn,
                    display_name,
                ))))
            }
            Err(failure) => {
                tracing::warn!(
                    target: "spark_socket_tls",
                    server_name = %display_name,
                    %peer,
                    reason = failure.label(),
                    error = %failure,
                    "tls upgrade failed; socket stays in plaintext mode"
                );
                Ok(None)
            }
        }
    }
}

fn handshake(transport: &dyn Transport, conn: &mut ClientConnection) -> Result<(), HandshakeFailure> {
    let mut io = TransportIo::new(transport);
    while conn.is_handshaking() {
        conn.complete_io(&mut io)
            .map_err(|err| HandshakeFailure::from_io(op::UPGRADE, err))?;
    }
    while conn.wants_write() {
        conn.write_tls(&mut io)
            .map_err(|err| HandshakeFailure::from_io(op::UPGRADE, err))?;
    }
    Ok(())
}
