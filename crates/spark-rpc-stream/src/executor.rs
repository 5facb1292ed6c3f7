//! 串行执行器接缝。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 传输实现可以在任意线程解析完成句柄，但流的全部状态只能在拥有者的串行上下文中变更；
//! - 因此完成句柄只做两件事：把结果写入操作槽位，再把操作编号投递到本队列。真正的状态推进
//!   由拥有者在 `run_pending`/`process_next` 中按到达顺序逐个执行。
//!
//! ## 契约（What）
//! - [`CompletionNotifier`] 可克隆、`Send`，投递永不阻塞；接收端已释放时静默丢弃；
//! - [`CompletionQueue::try_next`] 非阻塞取出一个已到达的编号；[`CompletionQueue::next`] 异步等待。
//!
//! ## 注意事项（Trade-offs）
//! - 采用无界通道：同一时刻在途的操作至多四个（建立/读/写/结束），积压规模天然有界。

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{FutureExt, StreamExt};

use crate::operation::OperationId;

/// 完成通知的发送端。
#[derive(Clone, Debug)]
pub(crate) struct CompletionNotifier {
    sender: UnboundedSender<OperationId>,
}

impl CompletionNotifier {
    pub(crate) fn notify(&self, id: OperationId) {
        // 接收端随流一同释放，此时通知已无人关心。
        let _ = self.sender.unbounded_send(id);
    }
}

/// 拥有者持有的完成队列。
#[derive(Debug)]
pub(crate) struct CompletionQueue {
    sender: UnboundedSender<OperationId>,
    receiver: UnboundedReceiver<OperationId>,
}

impl CompletionQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded();
        Self { sender, receiver }
    }

    pub(crate) fn notifier(&self) -> CompletionNotifier {
        CompletionNotifier {
            sender: self.sender.clone(),
        }
    }

    /// 非阻塞地取出下一个已到达的完成。
    pub(crate) fn try_next(&mut self) -> Option<OperationId> {
        self.receiver.next().now_or_never().flatten()
    }

    /// 等待下一个完成。队列自身持有发送端，因此只会在有新通知时返回。
    pub(crate) async fn next(&mut self) -> Option<OperationId> {
        self.receiver.next().await
    }
}
