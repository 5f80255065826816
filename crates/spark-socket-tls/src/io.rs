use std::io::{self, Read, Write};

use spark_socket_core::{SocketFlags, Transport};

/// 以 `Read`/`Write` 形式驱动任意传输，供 rustls 握手与记录层读写使用。
pub(crate) struct TransportIo<'a> {
    transport: &'a dyn Transport,
}

impl<'a> TransportIo<'a> {
    pub(crate) fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }
}

impl Read for TransportIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport
            .receive(buf, SocketFlags::NONE)
            .map_err(io::Error::from)
    }
}

impl Write for TransportIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport
            .send(buf, SocketFlags::NONE)
            .map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
