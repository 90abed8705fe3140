use core::fmt;
use std::net::SocketAddr;

/// 通道端点。
///
/// # 契约（What）
/// - `Socket` 为已解析的具体地址；
/// - `Dns` 为待解析的符号地址，连接前交给 [`NameResolver`](crate::NameResolver)；
/// - `Embedded` 是嵌入式测试通道使用的占位地址，不对应任何真实套接字。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Socket(SocketAddr),
    Dns { host: String, port: u16 },
    Embedded,
}

impl Endpoint {
    pub fn dns(host: impl Into<String>, port: u16) -> Self {
        Self::Dns { host: host.into(), port }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Dns { .. })
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Socket(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::Socket(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(addr) => write!(f, "{addr}"),
            Self::Dns { host, port } => write!(f, "{host}:{port}"),
            Self::Embedded => f.write_str("embedded"),
        }
    }
}
