//! 流式套接字的脚本会话。
//!
//! # 教案式说明
//! - **意图（Why）**：把 Bind→Listen→Accept→Send→Receive→Shutdown→Close 的完整生命周期，
//!   连同每一处典型误用，压缩成一段可以在任意后端上回放的脚本；
//! - **契约（What）**：[`session`] 只依赖 [`SocketEngine`] 选定的后端，返回的 [`Transcript`]
//!   不包含端口号、errno 等随环境变化的信息；后续步骤依赖的前置步骤失败时返回 `Err`；
//! - **权衡（Trade-offs）**：拒绝连接的步骤依赖“刚释放的回环端口无人监听”，
//!   在端口被其他进程瞬间复用的极端情况下可能误报。

use std::net::SocketAddr;

use anyhow::{Context, Result};
use bytes::Bytes;
use spark_socket::{
    AddressFamily, OptionLevel, OptionName, OptionValue, ProtocolKind, Shutdown, Socket,
    SocketEngine, SocketError, SocketFlags, SocketKind,
};

use crate::transcript::Transcript;

fn tcp(engine: &SocketEngine) -> Result<Socket, SocketError> {
    Socket::new(
        engine,
        AddressFamily::InterNetwork,
        SocketKind::Stream,
        ProtocolKind::Tcp,
    )
}

/// 读满 `len` 字节或遇到 EOF，返回实际读到的字节数。
pub(crate) fn receive_exact(socket: &Socket, len: usize) -> Result<usize, SocketError> {
    let mut buf = vec![0u8; len.max(1)];
    let mut received = 0;
    while received < len {
        let read = socket.receive(&mut buf[received..len], SocketFlags::NONE)?;
        if read == 0 {
            break;
        }
        received += read;
    }
    Ok(received)
}

pub fn session(engine: &SocketEngine) -> Result<Transcript> {
    let mut t = Transcript::new();
    let loopback: SocketAddr = "127.0.0.1:0".parse()?;

    let listener = t.record("create listener", tcp(engine)).context("创建监听套接字")?;
    t.record("bind", listener.bind(loopback)).context("绑定回环地址")?;
    t.record("accept before listen", listener.accept());
    t.record("listen", listener.listen(0)).context("开始监听")?;
    let addr = listener.local_endpoint().context("读取监听地址")?;
    t.observe("bound port is known", addr.port() != 0);

    let client = t.record("create client", tcp(engine)).context("创建客户端")?;
    let mut scratch = [0u8; 8];
    t.record("receive before connect", client.receive(&mut scratch, SocketFlags::NONE));
    t.record("connect", client.connect(addr)).context("连接监听端")?;
    t.observe("client connected", client.is_connected());
    let server = t.record("accept", listener.accept()).context("接受连接")?;
    t.observe("server connected", server.is_connected());
    t.observe(
        "endpoints agree",
        server.remote_endpoint()? == client.local_endpoint()?,
    );

    t.record("client send", client.send(b"hello", SocketFlags::NONE));
    t.record("server receive", receive_exact(&server, 5));
    t.record("server send", server.send(b"world!", SocketFlags::NONE));
    t.record("client receive", receive_exact(&client, 6));

    let queued = server
        .send_segments_async(
            vec![Bytes::from_static(b"que"), Bytes::from_static(b"ued")],
            SocketFlags::NONE,
        )
        .wait();
    t.record("server send queued", queued);
    t.record("client receive queued", receive_exact(&client, 6));

    t.record(
        "set nodelay",
        client.set_option(OptionLevel::Tcp, OptionName::NoDelay, OptionValue::Bool(true)),
    );
    t.record("get nodelay", client.get_option(OptionLevel::Tcp, OptionName::NoDelay));
    t.record(
        "get unsupported option",
        client.get_option(OptionLevel::Socket, OptionName::DontRoute),
    );
    t.record(
        "set read-only option",
        client.set_option(OptionLevel::Socket, OptionName::Error, OptionValue::Int(0)),
    );

    t.record("reconnect", client.connect(addr));
    t.record("client shutdown send", client.shutdown(Shutdown::Send));
    t.record("server receive eof", receive_exact(&server, 1));

    let refused_target = {
        let spare = tcp(engine)?;
        spare.bind(loopback)?;
        spare.listen(0)?;
        let target = spare.local_endpoint()?;
        spare.close();
        target
    };
    let refused = tcp(engine)?;
    t.record("connect refused", refused.connect(refused_target));
    t.observe("refused stays unconnected", refused.is_connected());
    t.record("retry after refused", refused.connect(addr));
    t.observe("retry connected", refused.is_connected());
    if let Some(retried) = t.record("accept retried", listener.accept()) {
        retried.close();
    }

    client.close();
    t.record("send after close", client.send(b"late", SocketFlags::NONE));
    t.record(
        "queued send after close",
        client
            .send_async(Bytes::from_static(b"late"), SocketFlags::NONE)
            .wait(),
    );
    client.close();
    t.observe("double close is a no-op", client.is_closed());

    server.close();
    listener.close();
    refused.close();
    Ok(t)
}
