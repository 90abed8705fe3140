//! 套接字相关的消息类型。
mod datagram;

pub use datagram::DatagramPacket;
