//! TLS 原地升级的集成测试。
//!
//! 测试使用一个包装 `std::net::TcpStream` 的最小传输，使 TLS crate 可以脱离引擎独立验证：
//! 握手成功后的加密回环、重复升级的同一实例语义、对端 `close_notify` 读作有序 EOF、握手失败后的明文可用性，
//! 以及升级前置条件的错误分类。

use std::fmt;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use rcgen::{CertificateParams, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};
use spark_socket_core::error::op;
use spark_socket_core::{
    AddressFamily, BackendKind, OptionValue, ProtocolKind, Shutdown, SocketError,
    SocketErrorKind, SocketFlags, SocketKind, SocketOption, Transport, translate,
};
use spark_socket_tls::TlsUpgrader;

/// 仅覆盖升级所需能力的测试传输。
struct StreamTransport {
    stream: TcpStream,
    blocking: AtomicBool,
    connected: bool,
}

impl StreamTransport {
    fn connected(stream: TcpStream) -> Arc<dyn Transport> {
        Arc::new(Self {
            stream,
            blocking: AtomicBool::new(true),
            connected: true,
        })
    }

    fn unsupported<T>(op: spark_socket_core::OperationCode) -> Result<T, SocketError> {
        Err(SocketError::new(SocketErrorKind::OperationNotSupported, op))
    }
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport").finish_non_exhaustive()
    }
}

impl Transport for StreamTransport {
    fn backend(&self) -> BackendKind {
        BackendKind::Native
    }
    fn family(&self) -> AddressFamily {
        AddressFamily::InterNetwork
    }
    fn kind(&self) -> SocketKind {
        SocketKind::Stream
    }
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Tcp
    }
    fn bind(&self, _addr: SocketAddr) -> Result<(), SocketError> {
        Self::unsupported(op::BIND)
    }
    fn listen(&self, _backlog: u32) -> Result<(), SocketError> {
        Self::unsupported(op::LISTEN)
    }
    fn accept(&self) -> Result<(Arc<dyn Transport>, SocketAddr), SocketError> {
        Self::unsupported(op::ACCEPT)
    }
    fn connect(&self, _addr: SocketAddr) -> Result<(), SocketError> {
        Self::unsupported(op::CONNECT)
    }
    fn finish_connect(&self) -> Result<(), SocketError> {
        Ok(())
    }
    fn send(&self, buf: &[u8], _flags: SocketFlags) -> Result<usize, SocketError> {
        (&self.stream)
            .write(buf)
            .map_err(|err| translate::from_io(op::SEND, err))
    }
    fn receive(&self, buf: &mut [u8], _flags: SocketFlags) -> Result<usize, SocketError> {
        (&self.stream)
            .read(buf)
            .map_err(|err| translate::from_io(op::RECEIVE, err))
    }
    fn send_to(&self, _: &[u8], _: SocketFlags, _: SocketAddr) -> Result<usize, SocketError> {
        Self::unsupported(op::SEND_TO)
    }
    fn receive_from(
        &self,
        _: &mut [u8],
        _: SocketFlags,
    ) -> Result<(usize, SocketAddr), SocketError> {
        Self::unsupported(op::RECEIVE_FROM)
    }
    fn shutdown(&self, how: Shutdown) -> Result<(), SocketError> {
        self.stream
            .shutdown(how.into())
            .map_err(|err| translate::from_io(op::SHUTDOWN, err))
    }
    fn get_option(&self, _: SocketOption) -> Result<OptionValue, SocketError> {
        Self::unsupported(op::GET_OPTION)
    }
    fn set_option(&self, _: SocketOption, _: OptionValue) -> Result<(), SocketError> {
        Self::unsupported(op::SET_OPTION)
    }
    fn set_blocking(&self, blocking: bool) -> Result<(), SocketError> {
        self.blocking.store(blocking, Ordering::SeqCst);
        Ok(())
    }
    fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::SeqCst)
    }
    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.stream
            .local_addr()
            .map_err(|err| translate::from_io(op::ADDRESS, err))
    }
    fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        if !self.connected {
            return Err(SocketError::new(SocketErrorKind::NotConnected, op::ADDRESS));
        }
        self.stream
            .peer_addr()
            .map_err(|err| translate::from_io(op::ADDRESS, err))
    }
    fn available(&self) -> Result<usize, SocketError> {
        Ok(0)
    }
    fn close(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

struct Pki {
    server: Arc<ServerConfig>,
    roots: RootCertStore,
}

fn pki() -> Result<Pki> {
    let key_pair = KeyPair::generate().context("生成证书私钥失败")?;
    let params =
        CertificateParams::new(vec!["localhost".to_string()]).context("构造证书参数失败")?;
    let certificate = params.self_signed(&key_pair).context("签发自签名证书失败")?;
    let cert_der = CertificateDer::from(certificate.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
        .map_err(|err| anyhow!("解析私钥失败: {err}"))?;

    let server = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(vec![cert_der.clone()], key_der)
    .context("构建服务端 TLS 配置失败")?;

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).context("写入根证书失败")?;
    Ok(Pki {
        server: Arc::new(server),
        roots,
    })
}

/// 启动单连接 TLS 回显服务端：读取一条消息并加上 `echo:` 前缀写回。
fn spawn_tls_echo(config: Arc<ServerConfig>) -> Result<(SocketAddr, thread::JoinHandle<Result<()>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let handle = thread::spawn(move || -> Result<()> {
        let (stream, _) = listener.accept()?;
        let conn = ServerConnection::new(config)?;
        let mut tls = StreamOwned::new(conn, stream);
        let mut buf = [0u8; 64];
        let read = tls.read(&mut buf)?;
        let mut reply = b"echo:".to_vec();
        reply.extend_from_slice(&buf[..read]);
        tls.write_all(&reply)?;
        tls.flush()?;
        Ok(())
    });
    Ok((addr, handle))
}

#[test]
fn upgrade_encrypts_round_trip_and_is_idempotent() -> Result<()> {
    let pki = pki()?;
    let (addr, server) = spawn_tls_echo(pki.server.clone())?;
    let plain = StreamTransport::connected(TcpStream::connect(addr)?);
    let upgrader = TlsUpgrader::with_root_certificates(pki.roots)?;

    let secure = upgrader
        .upgrade(&plain, Some("localhost"))?
        .ok_or_else(|| anyhow!("握手应当成功"))?;
    assert!(secure.is_secure());
    let again = upgrader
        .upgrade(&secure, Some("localhost"))?
        .ok_or_else(|| anyhow!("重复升级应返回同一实例"))?;
    assert!(Arc::ptr_eq(&secure, &again));

    assert_eq!(secure.send(b"hello", SocketFlags::NONE)?, 5);
    let mut buf = [0u8; 32];
    let mut received = Vec::new();
    while received.len() < b"echo:hello".len() {
        let read = secure.receive(&mut buf, SocketFlags::NONE)?;
        if read == 0 {
            break;
        }
        received.extend_from_slice(&buf[..read]);
    }
    assert_eq!(received, b"echo:hello");
    server.join().map_err(|_| anyhow!("服务端线程崩溃"))??;
    Ok(())
}

#[test]
fn peer_close_notify_reads_as_orderly_eof() -> Result<()> {
    let pki = pki()?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let config = pki.server.clone();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let server = thread::spawn(move || -> Result<()> {
        let (stream, _) = listener.accept()?;
        let mut tls = StreamOwned::new(ServerConnection::new(config)?, stream);
        while tls.conn.is_handshaking() {
            tls.conn.complete_io(&mut tls.sock)?;
        }
        tls.conn.send_close_notify();
        tls.flush()?;
        // TCP 连接保持打开，客户端只能从 close_notify 得知关闭。
        let _ = done_rx.recv();
        Ok(())
    });

    let plain = StreamTransport::connected(TcpStream::connect(addr)?);
    let upgrader = TlsUpgrader::with_root_certificates(pki.roots)?;
    let secure = upgrader
        .upgrade(&plain, Some("localhost"))?
        .ok_or_else(|| anyhow!("握手应当成功"))?;
    let mut buf = [0u8; 16];
    assert_eq!(secure.receive(&mut buf, SocketFlags::NONE)?, 0);
    assert_eq!(secure.receive(&mut buf, SocketFlags::NONE)?, 0, "EOF 可重复读取");
    done_tx.send(())?;
    server.join().map_err(|_| anyhow!("服务端线程崩溃"))??;
    Ok(())
}

#[test]
fn failed_handshake_leaves_plaintext_usable() -> Result<()> {
    let pki = pki()?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    // 服务端不说 TLS：先回一段明文，再等待客户端的明文 `ping` 并回复 `pong`。
    let server = thread::spawn(move || -> Result<()> {
        let (mut stream, _) = listener.accept()?;
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf)?;
        stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")?;
        let mut seen = Vec::new();
        while !seen.windows(4).any(|w| w == b"ping") {
            let read = stream.read(&mut buf)?;
            if read == 0 {
                return Err(anyhow!("客户端在发送 ping 之前关闭"));
            }
            seen.extend_from_slice(&buf[..read]);
        }
        stream.write_all(b"pong")?;
        Ok(())
    });

    let plain = StreamTransport::connected(TcpStream::connect(addr)?);
    let upgrader = TlsUpgrader::with_root_certificates(pki.roots)?;
    let outcome = upgrader.upgrade(&plain, Some("localhost"))?;
    assert!(outcome.is_none(), "明文对端必然导致握手失败");
    assert!(!plain.is_secure());

    assert_eq!(plain.send(b"ping", SocketFlags::NONE)?, 4);
    let mut reply = Vec::new();
    let mut buf = [0u8; 16];
    while reply.len() < 4 {
        let read = plain.receive(&mut buf, SocketFlags::NONE)?;
        if read == 0 {
            break;
        }
        reply.extend_from_slice(&buf[..read]);
    }
    assert_eq!(reply, b"pong");
    server.join().map_err(|_| anyhow!("服务端线程崩溃"))??;
    Ok(())
}

#[test]
fn preconditions_are_reported_as_portable_errors() -> Result<()> {
    let pki = pki()?;
    let upgrader = TlsUpgrader::with_root_certificates(pki.roots)?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let stream = TcpStream::connect(listener.local_addr()?)?;

    let not_connected: Arc<dyn Transport> = Arc::new(StreamTransport {
        stream: stream.try_clone()?,
        blocking: AtomicBool::new(true),
        connected: false,
    });
    let err = upgrader
        .upgrade(&not_connected, None)
        .expect_err("未连接的传输不能升级");
    assert_eq!(err.kind(), SocketErrorKind::NotConnected);

    let non_blocking = StreamTransport::connected(stream);
    non_blocking.set_blocking(false)?;
    let err = upgrader
        .upgrade(&non_blocking, None)
        .expect_err("非阻塞传输不能升级");
    assert_eq!(err.kind(), SocketErrorKind::OperationNotSupported);
    assert_eq!(err.code(), "spark.socket.upgrade_failed");
    Ok(())
}
