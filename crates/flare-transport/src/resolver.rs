//! 名称解析。
//!
//! # 设计背景（Why）
//! - 通道只接受已解析的端点；符号地址在连接前交给解析器，解析器本身是可替换的协作者，
//!   测试可以注入固定映射，生产可以接入异步 DNS。
//!
//! # 契约（What）
//! - `is_resolved` 不做任何 I/O；
//! - `resolve` 返回完成句柄；已解析的端点原样返回，失败以 [`ChannelError::Resolve`] 报告；
//! - 通道的 `connect` 在调用 `do_connect` 之前使用通道上配置的解析器，解析失败即连接失败。
use std::net::ToSocketAddrs;

use flare_common::concurrency::{Completion, Promise};

use crate::address::Endpoint;
use crate::error::ChannelError;

/// 名称解析器。
pub trait NameResolver: Send + Sync + 'static {
    fn is_resolved(&self, endpoint: &Endpoint) -> bool;

    fn resolve(&self, endpoint: &Endpoint) -> Completion<Endpoint>;
}

/// 基于操作系统解析器的默认实现，解析在调用线程上同步完成。
///
/// 在事件循环上使用时会阻塞该循环直至查询返回；对延迟敏感的部署应注入异步实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultNameResolver;

impl DefaultNameResolver {
    fn lookup(host: &str, port: u16) -> Result<Endpoint, ChannelError> {
        (host, port)
            .to_socket_addrs()
            .map_err(|error| ChannelError::Resolve(format!("{host}:{port}: {error}")))?
            .next()
            .map(Endpoint::Socket)
            .ok_or_else(|| ChannelError::Resolve(format!("{host}:{port}: no addresses returned")))
    }
}

impl NameResolver for DefaultNameResolver {
    fn is_resolved(&self, endpoint: &Endpoint) -> bool {
        endpoint.is_resolved()
    }

    fn resolve(&self, endpoint: &Endpoint) -> Completion<Endpoint> {
        let outcome = match endpoint {
            Endpoint::Dns { host, port } => Self::lookup(host, *port),
            resolved => Ok(resolved.clone()),
        };
        let (promise, completion) = Promise::pair();
        promise.try_resolve(outcome.map_err(ChannelError::into_task_error));
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    #[test]
    fn resolved_endpoints_pass_through() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7);
        let resolver = DefaultNameResolver;
        assert!(resolver.is_resolved(&Endpoint::Socket(addr)));
        assert!(!resolver.is_resolved(&Endpoint::dns("localhost", 7)));
        let resolved = block_on(resolver.resolve(&Endpoint::Socket(addr))).expect("已解析地址应原样返回");
        assert_eq!(resolved, Endpoint::Socket(addr));
    }

    #[test]
    fn numeric_hosts_resolve_without_dns() {
        let resolved = block_on(DefaultNameResolver.resolve(&Endpoint::dns("127.0.0.1", 8080))).expect("数字地址应可解析");
        assert_eq!(
            resolved.socket_addr(),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080))
        );
    }

    #[test]
    fn failures_are_reported_as_resolve_errors() {
        let completion = DefaultNameResolver.resolve(&Endpoint::dns("bad host name with spaces", 1));
        let error = ChannelError::from_task(block_on(completion).expect_err("非法主机名必须失败"));
        assert!(matches!(error, ChannelError::Resolve(_)));
    }
}
