//! 操作队列的行为测试：FIFO、短写续写、关闭时的 Disposed 排空与完成回调。

mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use proptest::prelude::*;
use spark_socket::{
    EngineConfig, OperationKind, Socket, SocketEngine, SocketErrorKind, SocketFlags,
};

use support::ScriptedTransport;

const WAIT: Duration = Duration::from_secs(5);

fn engine() -> SocketEngine {
    SocketEngine::global().expect("缺省引擎可以启动")
}

fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        if Instant::now() >= deadline {
            return Err(anyhow!("条件在 {WAIT:?} 内未满足"));
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn sends_complete_in_submission_order(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..16)
    ) {
        let transport = ScriptedTransport::new(1024);
        let socket = Socket::from_transport(&engine(), transport.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut submitted = Vec::new();
        let mut handles = Vec::new();
        for payload in &payloads {
            let handle = socket.send_async(Bytes::from(payload.clone()), SocketFlags::NONE);
            let order = Arc::clone(&order);
            handle.on_complete(move |summary| order.lock().push(summary.id));
            submitted.push(handle.id());
            handles.push(handle);
        }
        for handle in handles {
            let done = handle.wait().expect("脚本传输不会失败");
            prop_assert_eq!(done.kind, OperationKind::Send);
        }

        prop_assert_eq!(order.lock().clone(), submitted);
        let written: Vec<u8> = transport.sends().concat();
        prop_assert_eq!(written, payloads.concat());
    }

    #[test]
    fn short_writes_are_continued_until_the_payload_is_complete(
        len in 1usize..2048,
        chunk in 1usize..256,
    ) {
        let transport = ScriptedTransport::new(chunk);
        let socket = Socket::from_transport(&engine(), transport.clone());
        let payload: Vec<u8> = (0..len).map(|index| (index % 251) as u8).collect();

        let done = socket
            .send_async(Bytes::from(payload.clone()), SocketFlags::NONE)
            .wait()
            .expect("脚本传输不会失败");
        prop_assert_eq!(done.transferred, len);

        let sends = transport.sends();
        prop_assert_eq!(sends.len(), len.div_ceil(chunk));
        let mut offset = 0;
        for slice in &sends {
            prop_assert_eq!(slice.len(), chunk.min(len - offset));
            prop_assert_eq!(&slice[..], &payload[offset..offset + slice.len()]);
            offset += slice.len();
        }
        prop_assert_eq!(offset, len);
    }
}

#[test]
fn gathered_segments_are_continued_across_boundaries() -> Result<()> {
    let transport = ScriptedTransport::new(2);
    let socket = Socket::from_transport(&engine(), transport.clone());
    let done = socket
        .send_segments_async(
            vec![
                Bytes::from_static(b"abc"),
                Bytes::new(),
                Bytes::from_static(b"defgh"),
            ],
            SocketFlags::NONE,
        )
        .wait()?;
    assert_eq!(done.transferred, 8);
    let sends = transport.sends();
    let seen: Vec<&[u8]> = sends.iter().map(Vec::as_slice).collect();
    assert_eq!(seen, vec![&b"ab"[..], b"c", b"de", b"fg", b"h"]);
    Ok(())
}

#[test]
fn closing_drains_every_queued_receive_with_disposed() -> Result<()> {
    let transport = ScriptedTransport::new(64);
    let socket = Socket::from_transport(&engine(), transport.clone());
    let handles: Vec<_> = (0..3)
        .map(|_| socket.receive_async(BytesMut::with_capacity(16), SocketFlags::NONE))
        .collect();

    // 只有队首进入了后端，其余两个仍在排队。
    wait_until(|| transport.receivers_waiting() == 1)?;
    assert!(handles.iter().all(|handle| !handle.is_completed()));

    socket.close();
    for handle in handles {
        assert!(handle.wait_timeout(WAIT), "关闭后排队操作不能悬挂");
        let err = handle.wait().expect_err("关闭后一律报告 Disposed");
        assert_eq!(err.kind(), SocketErrorKind::Disposed);
    }
    wait_until(|| transport.receivers_waiting() == 0)?;
    assert!(transport.is_closed());
    Ok(())
}

#[test]
fn operations_after_close_never_reach_the_transport() -> Result<()> {
    let transport = ScriptedTransport::new(64);
    let socket = Socket::from_transport(&engine(), transport.clone());
    socket.close();
    socket.close();

    let err = socket
        .send(b"late", SocketFlags::NONE)
        .expect_err("同步调用被拒绝");
    assert_eq!(err.kind(), SocketErrorKind::Disposed);
    let err = socket
        .send_async(Bytes::from_static(b"late"), SocketFlags::NONE)
        .wait()
        .expect_err("排队调用被拒绝");
    assert_eq!(err.kind(), SocketErrorKind::Disposed);
    assert!(transport.sends().is_empty());
    Ok(())
}

#[test]
fn completion_callback_may_enqueue_follow_up_operations() -> Result<()> {
    let transport = ScriptedTransport::new(64);
    let socket = Socket::from_transport(&engine(), transport.clone());
    let (tx, rx) = mpsc::channel();

    let first = socket.send_async(Bytes::from_static(b"first"), SocketFlags::NONE);
    let chained = socket.clone();
    first.on_complete(move |summary| {
        assert!(summary.error.is_none());
        let _ = tx.send(chained.send_async(Bytes::from_static(b"second"), SocketFlags::NONE));
    });
    assert_eq!(first.wait()?.transferred, 5);

    let second = rx.recv_timeout(WAIT).context("回调应当提交后续操作")?;
    assert_eq!(second.wait()?.transferred, 6);
    assert_eq!(transport.sends().concat(), b"firstsecond");
    Ok(())
}

#[test]
fn connection_fatal_errors_clear_the_connected_flag() -> Result<()> {
    let transport = ScriptedTransport::new(64);
    let socket = Socket::from_transport(&engine(), transport.clone());
    socket.connect("127.0.0.1:9".parse::<SocketAddr>()?)?;
    assert!(socket.is_connected());

    transport.fail_next_send(SocketErrorKind::ConnectionReset);
    let err = socket
        .send_async(Bytes::from_static(b"x"), SocketFlags::NONE)
        .wait()
        .expect_err("预置的发送错误");
    assert_eq!(err.kind(), SocketErrorKind::ConnectionReset);
    assert_eq!(err.code(), "spark.socket.send_failed");
    assert!(!socket.is_connected());
    Ok(())
}

#[test]
fn engine_with_custom_pool_limits_still_dispatches() -> Result<()> {
    let config = EngineConfig {
        max_blocking_threads: 2,
        ..EngineConfig::default()
    };
    let engine = SocketEngine::new(config)?;
    let transport = ScriptedTransport::new(3);
    let socket = Socket::from_transport(&engine, transport.clone());
    let done = socket
        .send_async(Bytes::from_static(b"abcdefg"), SocketFlags::NONE)
        .wait()?;
    assert_eq!(done.transferred, 7);
    assert_eq!(transport.sends().len(), 3);
    Ok(())
}

#[tokio::test]
async fn receive_completion_can_be_awaited() -> Result<()> {
    let transport = ScriptedTransport::new(64);
    let socket = Socket::from_transport(&engine(), transport.clone());
    transport.push_inbound(b"hello");

    let mut buffer = BytesMut::with_capacity(32);
    buffer.extend_from_slice(b">>");
    let done = socket
        .receive_async(buffer, SocketFlags::NONE)
        .completion()
        .await?;
    assert_eq!(done.transferred, 5);
    assert_eq!(done.buffer.as_deref(), Some(&b">>hello"[..]));

    transport.push_inbound(b"datagram");
    let done = socket
        .receive_from_async(BytesMut::with_capacity(32), SocketFlags::NONE)
        .completion()
        .await?;
    assert_eq!(done.kind, OperationKind::ReceiveFrom);
    assert_eq!(done.remote, Some("127.0.0.1:9".parse::<SocketAddr>()?));
    Ok(())
}
