use std::fmt;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::ClientConnection;
use spark_socket_core::error::{OperationCode, op};
use spark_socket_core::{
    AddressFamily, BackendKind, OptionValue, ProtocolKind, Shutdown, SocketError, SocketErrorKind,
    SocketFlags, SocketKind, SocketOption, Transport,
};

use crate::error;

/// 单次加密的明文上限，对应一条 TLS 记录。
const PLAINTEXT_CHUNK: usize = 16 * 1024;
/// 单次从底层传输读取的密文上限。
const CIPHERTEXT_CHUNK: usize = 18 * 1024;

/// 在明文传输之上的 TLS 客户端传输。
///
/// # 教案式说明
/// - **契约 (What)**：对上层保持 [`Transport`] 语义，`send` 返回被接受的明文字节数，
///   `receive` 返回解密后的明文；读到对端 `close_notify` 或连接关闭时返回 `Ok(0)`；
/// - **并发 (How)**：
///   - `reader` 串行化接收，`pending` 串行化发送并保存尚未刷出的密文；
///   - `conn` 只在加解密的瞬间持有，底层 `send`/`receive` 期间不持锁，
///     因此一次阻塞接收不会卡住同一连接上的发送；
///   - 加锁顺序固定为 `pending → conn`，接收路径在拿 `pending` 之前先释放 `conn`。
pub struct SecureTransport {
    inner: Arc<dyn Transport>,
    conn: Mutex<ClientConnection>,
    reader: Mutex<()>,
    pending: Mutex<Vec<u8>>,
    server_name: String,
}

impl SecureTransport {
    pub(crate) fn new(inner: Arc<dyn Transport>, conn: ClientConnection, server_name: String) -> Self {
        Self {
            inner,
            conn: Mutex::new(conn),
            reader: Mutex::new(()),
            pending: Mutex::new(Vec::new()),
            server_name,
        }
    }

    /// 握手时使用的服务器名称。
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// 协商出的协议版本。
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.lock().protocol_version()
    }

    /// 协商出的 ALPN 协议。
    pub fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.conn.lock().alpn_protocol().map(<[u8]>::to_vec)
    }

    /// 被包装的明文传输。
    pub fn inner(&self) -> &Arc<dyn Transport> {
        &self.inner
    }

    fn reject_flags(flags: SocketFlags, op: OperationCode) -> Result<(), SocketError> {
        if flags.is_empty() {
            Ok(())
        } else {
            Err(SocketError::with_message(
                SocketErrorKind::OperationNotSupported,
                op,
                format!("{}: flags {:?} are not supported on a secure transport", op.message, flags),
            ))
        }
    }

    fn drain_tls(
        conn: &mut ClientConnection,
        out: &mut Vec<u8>,
        op: OperationCode,
    ) -> Result<(), SocketError> {
        while conn.wants_write() {
            conn.write_tls(out).map_err(|err| error::map_io(op, err))?;
        }
        Ok(())
    }

    fn flush_pending(&self, pending: &mut Vec<u8>, op: OperationCode) -> Result<(), SocketError> {
        while !pending.is_empty() {
            let written = self
                .inner
                .send(pending, SocketFlags::NONE)
                .map_err(|err| err.for_operation(op))?;
            if written == 0 {
                return Err(SocketError::new(SocketErrorKind::NoBufferSpace, op));
            }
            pending.drain(..written);
        }
        Ok(())
    }

    /// 接收路径产生的告警或密钥更新需要尽快送出；非阻塞模式下刷不完的部分留待下次。
    fn flush_control(&self, records: Vec<u8>) -> Result<(), SocketError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut pending = self.pending.lock();
        pending.extend_from_slice(&records);
        match self.flush_pending(&mut pending, op::RECEIVE) {
            Err(err) if err.is_pending() => Ok(()),
            other => other,
        }
    }

    fn plaintext_available(&self) -> usize {
        match self.conn.lock().process_new_packets() {
            Ok(state) => state.plaintext_bytes_to_read(),
            Err(_) => 0,
        }
    }
}

impl fmt::Debug for SecureTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureTransport")
            .field("inner", &self.inner)
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl Transport for SecureTransport {
    fn backend(&self) -> BackendKind {
        self.inner.backend()
    }

    fn family(&self) -> AddressFamily {
        self.inner.family()
    }

    fn kind(&self) -> SocketKind {
        self.inner.kind()
    }

    fn protocol(&self) -> ProtocolKind {
        self.inner.protocol()
    }

    fn bind(&self, addr: SocketAddr) -> Result<(), SocketError> {
        self.inner.bind(addr)
    }

    fn listen(&self, _backlog: u32) -> Result<(), SocketError> {
        Err(SocketError::new(
            SocketErrorKind::OperationNotSupported,
            op::LISTEN,
        ))
    }

    fn accept(&self) -> Result<(Arc<dyn Transport>, SocketAddr), SocketError> {
        Err(SocketError::new(
            SocketErrorKind::OperationNotSupported,
            op::ACCEPT,
        ))
    }

    fn connect(&self, addr: SocketAddr) -> Result<(), SocketError> {
        self.inner.connect(addr)
    }

    fn finish_connect(&self) -> Result<(), SocketError> {
        self.inner.finish_connect()
    }

    fn send(&self, buf: &[u8], flags: SocketFlags) -> Result<usize, SocketError> {
        Self::reject_flags(flags, op::SEND)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let mut pending = self.pending.lock();
        self.flush_pending(&mut pending, op::SEND)?;

        let mut accepted = 0;
        for chunk in buf.chunks(PLAINTEXT_CHUNK) {
            let taken = {
                let mut conn = self.conn.lock();
                let taken = conn
                    .writer()
                    .write(chunk)
                    .map_err(|err| error::map_io(op::SEND, err))?;
                Self::drain_tls(&mut conn, &mut pending, op::SEND)?;
                taken
            };
            accepted += taken;
            match self.flush_pending(&mut pending, op::SEND) {
                Ok(()) => {}
                // 明文已经加密进待发缓冲，视为已接受。
                Err(err) if err.is_pending() => break,
                Err(err) => return Err(err),
            }
            if taken < chunk.len() {
                break;
            }
        }
        Ok(accepted)
    }

    fn receive(&self, buf: &mut [u8], flags: SocketFlags) -> Result<usize, SocketError> {
        Self::reject_flags(flags, op::RECEIVE)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let _gate = self.reader.lock();
        let mut scratch = vec![0u8; CIPHERTEXT_CHUNK];
        loop {
            {
                let mut conn = self.conn.lock();
                match conn.reader().read(buf) {
                    Ok(read) => return Ok(read),
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    // 对端未发送 close_notify 即断开，按有序关闭处理。
                    Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                        tracing::debug!(
                            target: "spark_socket_tls",
                            server_name = %self.server_name,
                            "peer closed without close_notify"
                        );
                        return Ok(0);
                    }
                    Err(err) if error::carries_close_notify(&err) => return Ok(0),
                    Err(err) => return Err(error::map_io(op::RECEIVE, err)),
                }
            }

            let received = self.inner.receive(&mut scratch, SocketFlags::NONE)?;
            let mut control = Vec::new();
            let eof_without_data = {
                let mut conn = self.conn.lock();
                let mut ciphertext = &scratch[..received];
                if received == 0 {
                    conn.read_tls(&mut ciphertext)
                        .map_err(|err| error::map_io(op::RECEIVE, err))?;
                }
                while !ciphertext.is_empty() {
                    conn.read_tls(&mut ciphertext)
                        .map_err(|err| error::map_io(op::RECEIVE, err))?;
                }
                let processed = conn.process_new_packets();
                Self::drain_tls(&mut conn, &mut control, op::RECEIVE)?;
                let state = match processed {
                    Ok(state) => state,
                    Err(err) => {
                        drop(conn);
                        let _ = self.flush_control(control);
                        if error::is_close_notify(&err) {
                            return Ok(0);
                        }
                        return Err(error::map_rustls(op::RECEIVE, &err));
                    }
                };
                received == 0 && state.plaintext_bytes_to_read() == 0
            };
            self.flush_control(control)?;
            if eof_without_data {
                return Ok(0);
            }
        }
    }

    fn send_to(
        &self,
        _buf: &[u8],
        _flags: SocketFlags,
        _addr: SocketAddr,
    ) -> Result<usize, SocketError> {
        Err(SocketError::new(
            SocketErrorKind::OperationNotSupported,
            op::SEND_TO,
        ))
    }

    fn receive_from(
        &self,
        buf: &mut [u8],
        flags: SocketFlags,
    ) -> Result<(usize, SocketAddr), SocketError> {
        let read = self
            .receive(buf, flags)
            .map_err(|err| err.for_operation(op::RECEIVE_FROM))?;
        Ok((read, self.inner.peer_addr()?))
    }

    fn shutdown(&self, how: Shutdown) -> Result<(), SocketError> {
        if matches!(how, Shutdown::Send | Shutdown::Both) {
            let mut pending = self.pending.lock();
            {
                let mut conn = self.conn.lock();
                conn.send_close_notify();
                Self::drain_tls(&mut conn, &mut pending, op::SHUTDOWN)?;
            }
            self.flush_pending(&mut pending, op::SHUTDOWN)?;
        }
        self.inner.shutdown(how)
    }

    fn get_option(&self, option: SocketOption) -> Result<OptionValue, SocketError> {
        self.inner.get_option(option)
    }

    fn set_option(&self, option: SocketOption, value: OptionValue) -> Result<(), SocketError> {
        self.inner.set_option(option, value)
    }

    fn set_blocking(&self, blocking: bool) -> Result<(), SocketError> {
        self.inner.set_blocking(blocking)
    }

    fn is_blocking(&self) -> bool {
        self.inner.is_blocking()
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner.peer_addr()
    }

    fn available(&self) -> Result<usize, SocketError> {
        Ok(self.plaintext_available())
    }

    fn close(&self) {
        self.inner.close();
    }

    fn selector_source(&self) -> Option<RawFd> {
        self.inner.selector_source()
    }

    fn requires_nonblocking_registration(&self) -> bool {
        self.inner.requires_nonblocking_registration()
    }

    fn attach_selector(&self) -> Result<(), SocketError> {
        self.inner.attach_selector()
    }

    fn detach_selector(&self) {
        self.inner.detach_selector();
    }

    fn has_buffered_input(&self) -> bool {
        self.plaintext_available() > 0 || self.inner.has_buffered_input()
    }

    fn is_secure(&self) -> bool {
        true
    }
}
