//! 会话记录：把每一步调用折叠成与后端无关的 [`Outcome`]。

use std::fmt;
use std::net::SocketAddr;

use spark_socket::{Completed, OptionValue, Socket, SocketError, SocketErrorKind};

/// 单步调用的可比较结果。
///
/// 只保留后端之间必须一致的部分：成功与否、字节数、选项值与错误分类。
/// 错误文案、errno 与端口号都不参与比较。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Bytes(usize),
    Flag(bool),
    Value(OptionValue),
    Error(SocketErrorKind),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => f.write_str("ok"),
            Outcome::Bytes(count) => write!(f, "{count} bytes"),
            Outcome::Flag(flag) => write!(f, "{flag}"),
            Outcome::Value(value) => write!(f, "{value:?}"),
            Outcome::Error(kind) => write!(f, "error({kind})"),
        }
    }
}

/// 能被折叠为 [`Outcome`] 的成功值。
pub trait Observed {
    fn outcome(&self) -> Outcome;
}

impl Observed for () {
    fn outcome(&self) -> Outcome {
        Outcome::Done
    }
}

impl Observed for usize {
    fn outcome(&self) -> Outcome {
        Outcome::Bytes(*self)
    }
}

impl Observed for bool {
    fn outcome(&self) -> Outcome {
        Outcome::Flag(*self)
    }
}

impl Observed for OptionValue {
    fn outcome(&self) -> Outcome {
        Outcome::Value(*self)
    }
}

impl Observed for Socket {
    fn outcome(&self) -> Outcome {
        Outcome::Done
    }
}

impl Observed for (usize, SocketAddr) {
    fn outcome(&self) -> Outcome {
        Outcome::Bytes(self.0)
    }
}

impl Observed for Completed {
    fn outcome(&self) -> Outcome {
        Outcome::Bytes(self.transferred)
    }
}

/// 按调用顺序记录的会话结果。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<(&'static str, Outcome)>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一步调用；成功时把值交还给会话继续使用。
    pub fn record<T: Observed>(
        &mut self,
        label: &'static str,
        result: Result<T, SocketError>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                self.entries.push((label, value.outcome()));
                Some(value)
            }
            Err(err) => {
                self.entries.push((label, Outcome::Error(err.kind())));
                None
            }
        }
    }

    pub fn observe(&mut self, label: &'static str, value: impl Observed) {
        self.entries.push((label, value.outcome()));
    }

    /// 同名步骤中第一次出现的结果。
    pub fn outcome(&self, label: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == label)
            .map(|(_, outcome)| outcome)
    }

    pub fn entries(&self) -> &[(&'static str, Outcome)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 逐步比对两份记录，返回人类可读的差异行。
    pub fn diff(&self, other: &Transcript) -> Vec<String> {
        let mut lines = Vec::new();
        let steps = self.entries.len().max(other.entries.len());
        for index in 0..steps {
            match (self.entries.get(index), other.entries.get(index)) {
                (Some(left), Some(right)) if left == right => {}
                (Some((label, left)), Some((other_label, right))) => lines.push(format!(
                    "#{index}: {label} => {left} | {other_label} => {right}"
                )),
                (Some((label, left)), None) => {
                    lines.push(format!("#{index}: {label} => {left} | <missing>"))
                }
                (None, Some((label, right))) => {
                    lines.push(format!("#{index}: <missing> | {label} => {right}"))
                }
                (None, None) => {}
            }
        }
        lines
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, outcome) in &self.entries {
            writeln!(f, "{label}: {outcome}")?;
        }
        Ok(())
    }
}
