//! 进程级协议可用性缓存。
//!
//! 首次查询时各探测一次：尝试创建对应地址族的数据报套接字并立即关闭。
//! 结果写入 `OnceLock` 后只读共享。

use std::sync::OnceLock;

use crate::types::AddressFamily;

static IPV4: OnceLock<bool> = OnceLock::new();
static IPV6: OnceLock<bool> = OnceLock::new();

pub fn ipv4_supported() -> bool {
    *IPV4.get_or_init(|| probe(libc::AF_INET))
}

pub fn ipv6_supported() -> bool {
    *IPV6.get_or_init(|| probe(libc::AF_INET6))
}

pub fn is_supported(family: AddressFamily) -> bool {
    match family {
        AddressFamily::InterNetwork => ipv4_supported(),
        AddressFamily::InterNetworkV6 => ipv6_supported(),
    }
}

fn probe(domain: libc::c_int) -> bool {
    // SAFETY: `socket` 不接触任何用户内存；成功时返回的描述符只在此处关闭一次。
    let fd = unsafe { libc::socket(domain, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        tracing::debug!(domain, "address family probe failed");
        return false;
    }
    // SAFETY: `fd` 为上方刚创建且未共享的有效描述符。
    unsafe {
        libc::close(fd);
    }
    true
}
