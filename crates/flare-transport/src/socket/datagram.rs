use core::fmt;

use flare_buffer::ByteBuf;
use flare_common::error::Result;
use flare_common::refcount::ReferenceCounted;

use crate::address::Endpoint;
use crate::envelope::{AddressedEnvelope, EnvelopePool};

/// 数据报：负载为 [`ByteBuf`] 的地址信封。
///
/// # 契约（What）
/// - `duplicate` 与原数据报共享信封计数；
/// - `retained_duplicate`、`copy` 与 `replace` 产生计数独立的新数据报，地址保持不变；
///   原数据报来自 [`EnvelopePool`] 时，新数据报也从同一个池中取得。
pub struct DatagramPacket {
    envelope: AddressedEnvelope<ByteBuf>,
}

impl DatagramPacket {
    pub fn new(content: ByteBuf, sender: Option<Endpoint>, recipient: Option<Endpoint>) -> Result<Self> {
        AddressedEnvelope::new(content, sender, recipient).map(|envelope| Self { envelope })
    }

    pub fn to(content: ByteBuf, recipient: Endpoint) -> Result<Self> {
        Self::new(content, None, Some(recipient))
    }

    /// 从信封池取得外壳构造数据报。
    pub fn pooled(
        pool: &EnvelopePool<ByteBuf>,
        content: ByteBuf,
        sender: Option<Endpoint>,
        recipient: Option<Endpoint>,
    ) -> Result<Self> {
        pool.acquire(content, sender, recipient).map(|envelope| Self { envelope })
    }

    pub fn sender(&self) -> Option<Endpoint> {
        self.envelope.sender()
    }

    pub fn recipient(&self) -> Option<Endpoint> {
        self.envelope.recipient()
    }

    pub fn with_content<R>(&self, f: impl FnOnce(&mut ByteBuf) -> R) -> Result<R> {
        self.envelope.with_content(f)
    }

    pub fn envelope(&self) -> &AddressedEnvelope<ByteBuf> {
        &self.envelope
    }

    /// 深拷贝负载。
    pub fn copy(&self) -> Result<Self> {
        let content = self.envelope.with_content(|content| content.copy())??;
        self.replace(content)
    }

    pub fn duplicate(&self) -> Self {
        Self {
            envelope: self.envelope.duplicate(),
        }
    }

    pub fn retained_duplicate(&self) -> Result<Self> {
        let content = self.envelope.with_content(|content| content.retained_duplicate())??;
        self.replace(content)
    }

    /// 以新负载构造地址相同的数据报。
    ///
    /// 发送方与接收方保持原位，不做互换；回复对端时应显式以原发送方为接收方构造新数据报。
    pub fn replace(&self, content: ByteBuf) -> Result<Self> {
        match self.envelope.pool() {
            Some(pool) => Self::pooled(&pool, content, self.sender(), self.recipient()),
            None => Self::new(content, self.sender(), self.recipient()),
        }
    }
}

impl ReferenceCounted for DatagramPacket {
    fn reference_count(&self) -> usize {
        self.envelope.reference_count()
    }

    fn retain_n(&self, increment: usize) -> Result<()> {
        self.envelope.retain_n(increment)
    }

    fn release_n(&self, decrement: usize) -> Result<bool> {
        self.envelope.release_n(decrement)
    }

    fn touch_hint(&self, hint: &dyn fmt::Debug) {
        self.envelope.touch_hint(hint);
    }
}

impl fmt::Debug for DatagramPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DatagramPacket").field(&self.envelope).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn peer() -> Endpoint {
        Endpoint::Socket(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5353))
    }

    fn payload(packet: &DatagramPacket) -> Vec<u8> {
        packet
            .with_content(|content| content.to_vec())
            .expect("数据报未释放")
            .expect("负载可读")
    }

    #[test]
    fn copy_is_independent_of_the_original() {
        let packet = DatagramPacket::new(ByteBuf::from_slice(b"dns"), Some(Endpoint::Embedded), Some(peer())).expect("地址齐全");
        let copy = packet.copy().expect("拷贝应成功");
        assert!(packet.release().expect("release"));
        assert_eq!(payload(&copy), b"dns");
        assert_eq!(copy.sender(), Some(Endpoint::Embedded));
        assert_eq!(copy.recipient(), Some(peer()));
    }

    #[test]
    fn retained_duplicate_keeps_the_payload_alive() {
        let packet = DatagramPacket::to(ByteBuf::from_slice(b"query"), peer()).expect("地址齐全");
        let twin = packet.retained_duplicate().expect("retain 应成功");
        assert!(packet.release().expect("原数据报归零"));
        assert_eq!(payload(&twin), b"query");
        assert!(twin.release().expect("副本归零"));
    }

    #[test]
    fn duplicate_shares_the_envelope_count() {
        let packet = DatagramPacket::to(ByteBuf::from_slice(b"x"), peer()).expect("地址齐全");
        let view = packet.duplicate();
        assert!(view.release().expect("共享计数归零"));
        assert!(packet.envelope().is_released());
        assert_eq!(packet.recipient(), None);
    }

    #[test]
    fn replace_keeps_addresses_in_place() {
        let packet = DatagramPacket::new(ByteBuf::from_slice(b"a"), Some(Endpoint::Embedded), Some(peer())).expect("地址齐全");
        let replaced = packet.replace(ByteBuf::from_slice(b"b")).expect("替换应成功");
        assert_eq!(replaced.sender(), Some(Endpoint::Embedded));
        assert_eq!(replaced.recipient(), Some(peer()));
        assert_eq!(payload(&replaced), b"b");
    }

    #[test]
    fn derived_packets_come_from_the_same_pool() {
        let pool = EnvelopePool::new(4).expect("容量合法");
        let packet = DatagramPacket::pooled(&pool, ByteBuf::from_slice(b"req"), None, Some(peer())).expect("地址齐全");
        let copy = packet.copy().expect("拷贝应成功");
        let twin = packet.retained_duplicate().expect("retain 应成功");
        assert!(copy.envelope().pool().is_some());
        assert!(twin.envelope().pool().is_some());
        assert_eq!(pool.stats().created, 3);

        for handle in [packet, copy, twin] {
            assert!(handle.release().expect("release"));
        }
        assert_eq!(pool.pooled(), 3);
        assert!(DatagramPacket::to(ByteBuf::from_slice(b"x"), peer()).expect("地址齐全").envelope().pool().is_none());
    }
}
