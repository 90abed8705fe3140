//! 出站缓冲区。
//!
//! # 设计背景（Why）
//! - `write` 只把消息挂入缓冲区，`flush` 才把它们交给传输；批量冲刷减少系统调用次数；
//! - 每条写入都带有完成句柄，调用方需要知道“这条消息是否真正交给了传输”。
//!
//! # 逻辑（How）
//! - 两段队列：`unflushed` 收集新写入，`add_flush` 把它整体移入 `flushed`；
//! - 传输在 `do_write` 中通过 [`current`](OutboundBuffer::current) 查看队首，
//!   消费后调用 [`remove`](OutboundBuffer::remove) 取得消息所有权并完成对应句柄。
//!
//! # 契约（What）
//! - `remove` 转移消息所有权给传输，由传输负责最终释放；
//! - `remove_with_error` 与 `fail_all` 释放消息并以给定错误失败句柄。
use std::collections::VecDeque;

use flare_common::concurrency::Promise;

use crate::error::ChannelError;
use crate::pipeline::PipelineMessage;

struct Entry {
    message: PipelineMessage,
    promise: Promise<()>,
}

impl Entry {
    fn fail(self, error: &ChannelError) {
        self.message.safe_release();
        self.promise.try_fail(error.clone().into_task_error());
    }
}

/// 通道的出站缓冲区。
#[derive(Default)]
pub struct OutboundBuffer {
    unflushed: VecDeque<Entry>,
    flushed: VecDeque<Entry>,
}

impl OutboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&mut self, message: PipelineMessage, promise: Promise<()>) {
        self.unflushed.push_back(Entry { message, promise });
    }

    /// 把所有未冲刷的条目标记为已冲刷。
    pub fn add_flush(&mut self) {
        self.flushed.append(&mut self.unflushed);
    }

    /// 已冲刷队首的消息。
    pub fn current(&self) -> Option<&PipelineMessage> {
        self.flushed.front().map(|entry| &entry.message)
    }

    /// 取出已冲刷队首的消息并完成其写句柄。
    pub fn remove(&mut self) -> Option<PipelineMessage> {
        let entry = self.flushed.pop_front()?;
        entry.promise.try_complete(());
        Some(entry.message)
    }

    /// 丢弃已冲刷队首的消息，以 `error` 失败其写句柄。
    pub fn remove_with_error(&mut self, error: &ChannelError) -> bool {
        match self.flushed.pop_front() {
            Some(entry) => {
                entry.fail(error);
                true
            }
            None => false,
        }
    }

    /// 失败所有已冲刷条目，返回处理的条目数。
    pub fn fail_flushed(&mut self, error: &ChannelError) -> usize {
        let count = self.flushed.len();
        while self.remove_with_error(error) {}
        count
    }

    /// 失败全部条目（包括尚未冲刷的），通常在关闭时调用。
    pub fn fail_all(&mut self, error: &ChannelError) -> usize {
        let count = self.fail_flushed(error);
        let pending = self.unflushed.len();
        for entry in self.unflushed.drain(..) {
            entry.fail(error);
        }
        count + pending
    }

    pub fn flushed_len(&self) -> usize {
        self.flushed.len()
    }

    pub fn unflushed_len(&self) -> usize {
        self.unflushed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flushed.is_empty() && self.unflushed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_buffer::ByteBuf;
    use flare_common::concurrency::{Completion, CompletionStatus};

    fn write(buffer: &mut OutboundBuffer, data: &[u8]) -> Completion<()> {
        let (promise, completion) = Promise::pair();
        buffer.add_message(ByteBuf::from_slice(data).into(), promise);
        completion
    }

    #[test]
    fn only_flushed_entries_are_visible_to_the_transport() {
        let mut buffer = OutboundBuffer::new();
        let first = write(&mut buffer, b"a");
        assert!(buffer.current().is_none());
        buffer.add_flush();
        let second = write(&mut buffer, b"b");
        assert_eq!(buffer.flushed_len(), 1);
        assert_eq!(buffer.unflushed_len(), 1);

        let message = buffer.remove().expect("已冲刷条目应可取出");
        assert_eq!(message.as_buffer().expect("缓冲消息").to_vec().expect("可读"), b"a");
        assert!(first.is_completed());
        assert!(buffer.remove().is_none());
        assert_eq!(second.status(), CompletionStatus::Pending);
        message.safe_release();
    }

    #[test]
    fn fail_all_releases_and_faults_every_entry() {
        let mut buffer = OutboundBuffer::new();
        let observer = ByteBuf::from_slice(b"x");
        let (promise, flushed) = Promise::pair();
        buffer.add_message(observer.duplicate().into(), promise);
        buffer.add_flush();
        let pending = write(&mut buffer, b"y");
        assert_eq!(buffer.fail_all(&ChannelError::Closed), 2);
        assert!(buffer.is_empty());
        assert!(observer.is_released());
        for completion in [flushed, pending] {
            let error = ChannelError::from_task(completion.error().expect("句柄应失败"));
            assert!(matches!(error, ChannelError::Closed));
        }
    }
}
