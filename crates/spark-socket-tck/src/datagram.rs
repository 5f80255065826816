//! 数据报套接字的脚本会话：无连接收发、排队收发、连接后的默认目标与误用分类。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use spark_socket::{
    AddressFamily, ProtocolKind, Socket, SocketEngine, SocketError, SocketFlags, SocketKind,
};

use crate::transcript::Transcript;

fn udp(engine: &SocketEngine) -> Result<Socket, SocketError> {
    Socket::new(
        engine,
        AddressFamily::InterNetwork,
        SocketKind::Datagram,
        ProtocolKind::Udp,
    )
}

pub fn session(engine: &SocketEngine) -> Result<Transcript> {
    let mut t = Transcript::new();
    let loopback: SocketAddr = "127.0.0.1:0".parse()?;

    let a = t.record("create a", udp(engine)).context("创建数据报套接字 a")?;
    let b = t.record("create b", udp(engine)).context("创建数据报套接字 b")?;
    t.record("bind a", a.bind(loopback)).context("绑定 a")?;
    t.record("bind b", b.bind(loopback)).context("绑定 b")?;
    t.record("rebind a", a.bind(loopback));
    let a_addr = a.local_endpoint()?;
    let b_addr = b.local_endpoint()?;

    t.record("send_to b", a.send_to(b"ping", SocketFlags::NONE, b_addr));
    let mut buf = [0u8; 64];
    if let Some((_, from)) = t.record("receive_from a", b.receive_from(&mut buf, SocketFlags::NONE))
    {
        t.observe("source is a", from == a_addr);
    }

    let sent = b
        .send_to_async(Bytes::from_static(b"pong!"), SocketFlags::NONE, a_addr)
        .wait();
    t.record("queued send_to a", sent);
    let received = a
        .receive_from_async(BytesMut::with_capacity(64), SocketFlags::NONE)
        .wait();
    if let Some(done) = t.record("queued receive_from b", received) {
        t.observe("queued source is b", done.remote == Some(b_addr));
        t.observe(
            "queued payload",
            done.buffer.as_deref() == Some(&b"pong!"[..]),
        );
    }

    let empty = b
        .send_to_async(Bytes::new(), SocketFlags::NONE, a_addr)
        .wait();
    t.record("queued empty send_to a", empty);
    let received = a.receive_from(&mut buf, SocketFlags::NONE);
    if let Some((_, from)) = t.record("receive empty datagram", received) {
        t.observe("empty datagram source is b", from == b_addr);
    }

    let v6: SocketAddr = "[::1]:9".parse()?;
    t.record("send_to other family", a.send_to(b"x", SocketFlags::NONE, v6));
    t.record("accept on datagram", a.accept());

    t.record("connect a to b", a.connect(b_addr));
    t.record("send on connected a", a.send(b"hi", SocketFlags::NONE));
    t.record("receive on b", b.receive(&mut buf, SocketFlags::NONE));
    t.observe("remote cached", a.remote_endpoint()? == b_addr);

    a.close();
    t.record("receive_from after close", a.receive_from(&mut buf, SocketFlags::NONE));
    t.record("bind after close", a.bind(loopback));
    b.close();
    Ok(t)
}
