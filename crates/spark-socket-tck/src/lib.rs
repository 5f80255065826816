#![doc = r#"
# spark-socket-tck

## 章节定位（Why）
- **目标**：Transport Compatibility Kit。`Socket` 的承诺之一是“后端透明”：同一段调用脚本
  在原生后端与桥接后端上必须得到相同的错误分类与字节数；
- **使用方式**：引擎 crate 以 Dev 依赖引入本 crate，在集成测试中调用
  [`assert_backend_transparency`]，回归时得到逐步差异而不是单个断言失败。

## 结构概览（How）
- [`transcript`]：把每一步调用折叠为 [`Outcome`] 并逐步比对；
- [`stream`]：流式套接字的完整生命周期脚本；
- [`datagram`]：数据报套接字的收发与误用脚本。

## 权衡（Trade-offs）
- 只比较可移植信息：端口号、errno 与错误文案都被有意丢弃；
- 所有脚本只使用回环地址，避免依赖外部网络。
"#]

pub mod datagram;
pub mod stream;
pub mod transcript;

use anyhow::{Context, Result, bail};
use spark_socket::{Backend, EngineConfig, SocketEngine};

pub use transcript::{Observed, Outcome, Transcript};

/// 一段可在任意引擎上回放的脚本会话。
pub type Session = fn(&SocketEngine) -> Result<Transcript>;

/// 以指定后端构造独立引擎。
pub fn engine_for(backend: Backend) -> Result<SocketEngine> {
    SocketEngine::new(EngineConfig::default().with_backend(backend))
        .with_context(|| format!("无法为 {backend:?} 后端启动引擎"))
}

/// 在两套后端上分别回放会话，返回 `(native, bridged)` 两份记录。
pub fn run_on_both(session: Session) -> Result<(Transcript, Transcript)> {
    let native = session(&engine_for(Backend::Native)?).context("原生后端会话失败")?;
    let bridged = session(&engine_for(Backend::Bridged)?).context("桥接后端会话失败")?;
    Ok((native, bridged))
}

/// 后端透明性断言：两份记录必须逐步一致。
///
/// - **契约（What）**：一致时返回原生后端的记录，供调用方继续断言具体结果；
///   不一致时返回列出全部差异步骤的错误。
pub fn assert_backend_transparency(session: Session) -> Result<Transcript> {
    let (native, bridged) = run_on_both(session)?;
    let diff = native.diff(&bridged);
    if !diff.is_empty() {
        bail!(
            "后端行为不一致（native | bridged）：\n{}",
            diff.join("\n")
        );
    }
    Ok(native)
}
