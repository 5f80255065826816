//! 订阅者安装是进程级一次性操作，因此独占一个测试二进制。

use spark_socket::telemetry::{TelemetryError, install_subscriber};

#[test]
fn subscriber_installs_once() {
    install_subscriber().expect("首次安装成功");
    tracing::info!(target: "spark_socket::queue", "subscriber installed");
    assert!(matches!(
        install_subscriber(),
        Err(TelemetryError::AlreadyInstalled)
    ));
}
