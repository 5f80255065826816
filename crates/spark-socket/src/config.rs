//! 引擎配置。
//!
//! 所有字段都有缺省值，既可以在代码中构造，也可以从 TOML 加载：
//!
//! ```toml
//! backend = "bridged"
//! max_blocking_threads = 16
//! park_interval_ms = 20
//!
//! [tcp]
//! nodelay = true
//! linger_ms = 0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use spark_socket_core::BackendKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read engine configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse engine configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid engine configuration: {0}")]
    Invalid(String),
}

/// 新套接字使用的后端。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Native,
    Bridged,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Native => BackendKind::Native,
            Backend::Bridged => BackendKind::Bridged,
        }
    }
}

/// 应用于每个新建流式套接字的 TCP 缺省选项。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpDefaults {
    pub nodelay: Option<bool>,
    pub linger_ms: Option<u64>,
}

impl TcpDefaults {
    pub fn linger(&self) -> Option<Duration> {
        self.linger_ms.map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub backend: Backend,
    pub worker_threads: usize,
    pub max_blocking_threads: usize,
    pub thread_name: String,
    pub park_interval_ms: u64,
    pub default_backlog: u32,
    pub tcp: TcpDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Native,
            worker_threads: 1,
            max_blocking_threads: 64,
            thread_name: "spark-socket-worker".to_string(),
            park_interval_ms: 50,
            default_backlog: 128,
            tcp: TcpDefaults::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn park_interval(&self) -> Duration {
        Duration::from_millis(self.park_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be at least 1".into()));
        }
        if self.max_blocking_threads == 0 {
            return Err(ConfigError::Invalid(
                "max_blocking_threads must be at least 1".into(),
            ));
        }
        if self.park_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "park_interval_ms must be at least 1".into(),
            ));
        }
        if self.default_backlog == 0 {
            return Err(ConfigError::Invalid("default_backlog must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").expect("空配置合法");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.park_interval(), Duration::from_millis(50));
    }

    #[test]
    fn partial_document_overrides_selected_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            backend = "bridged"
            default_backlog = 16

            [tcp]
            nodelay = true
            linger_ms = 250
            "#,
        )
        .expect("合法配置");
        assert_eq!(config.backend, Backend::Bridged);
        assert_eq!(config.default_backlog, 16);
        assert_eq!(config.max_blocking_threads, 64);
        assert_eq!(config.tcp.nodelay, Some(true));
        assert_eq!(config.tcp.linger(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn unknown_fields_and_zero_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("unknown = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("park_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
