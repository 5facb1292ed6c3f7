//! 在途操作的登记与排空。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 每个发往传输层的操作都需要记住三件事：它是什么、发起时的代际、以及它的结果；
//! - 正常路径上结果经由完成队列回到拥有者；强制排空路径上拥有者需要**就地阻塞等待**同一结果。
//!   两条路径共享一个结果槽位，谁先取走算谁的，另一条路径看到空槽位即视为已处理。
//!
//! ## 契约（What）
//! - [`OperationSet::register`] 在把完成句柄交给传输层**之前**完成登记，因此同步解析的完成同样可见；
//! - 完成句柄先写槽位、后发通知；拥有者收到通知时槽位必然已填充；
//! - [`Operation::wait`] 阻塞直至槽位被填充或超时，超时返回 `None`。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use spark_rpc_transport::{CallFailure, Completion, RawStatus};

use crate::executor::CompletionNotifier;
use crate::observer::Generation;

/// 操作编号，在单条流内单调递增。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct OperationId(u64);

impl OperationId {
    #[cfg(test)]
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }
}

/// 操作种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Start,
    Read,
    Write,
    /// 因操作失败而向服务端取回终止状态。
    ServerFinish,
    /// 调用方主动结束时发起的收尾。
    ClientFinish,
}

impl OperationKind {
    /// 日志字段使用的稳定名称。
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Start => "start",
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::ServerFinish => "server_finish",
            OperationKind::ClientFinish => "client_finish",
        }
    }
}

/// 传输层回报的结果。
#[derive(Debug)]
pub(crate) enum OperationOutput {
    Started(Result<(), CallFailure>),
    Read(Result<Bytes, CallFailure>),
    Written(Result<(), CallFailure>),
    Finished(Result<RawStatus, CallFailure>),
}

#[derive(Default)]
struct CompletionSlot {
    output: Mutex<Option<OperationOutput>>,
    ready: Condvar,
}

impl CompletionSlot {
    fn fill(&self, output: OperationOutput) {
        let mut guard = self.output.lock();
        *guard = Some(output);
        self.ready.notify_all();
    }

    fn take(&self) -> Option<OperationOutput> {
        self.output.lock().take()
    }

    fn wait(&self, timeout: Option<Duration>) -> Option<OperationOutput> {
        let mut guard = self.output.lock();
        match timeout {
            None => {
                while guard.is_none() {
                    self.ready.wait(&mut guard);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while guard.is_none() {
                    if self.ready.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        guard.take()
    }
}

/// 一个在途操作。
pub(crate) struct Operation {
    id: OperationId,
    kind: OperationKind,
    generation: Generation,
    slot: Arc<CompletionSlot>,
}

impl Operation {
    pub(crate) fn id(&self) -> OperationId {
        self.id
    }

    pub(crate) fn kind(&self) -> OperationKind {
        self.kind
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    /// 取走已到达的结果（不阻塞）。
    pub(crate) fn take_output(&self) -> Option<OperationOutput> {
        self.slot.take()
    }

    /// 阻塞等待结果；`timeout` 为 `None` 时无限等待。
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<OperationOutput> {
        self.slot.wait(timeout)
    }
}

impl core::fmt::Debug for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .finish()
    }
}

/// 在途操作集合。
#[derive(Debug, Default)]
pub(crate) struct OperationSet {
    next_id: u64,
    outstanding: BTreeMap<OperationId, Operation>,
}

impl OperationSet {
    /// 登记一个新操作并构造交给传输层的完成句柄。
    pub(crate) fn register<T>(
        &mut self,
        kind: OperationKind,
        generation: Generation,
        notifier: CompletionNotifier,
        wrap: fn(Result<T, CallFailure>) -> OperationOutput,
    ) -> (OperationId, Completion<T>)
    where
        T: Send + 'static,
    {
        let id = OperationId(self.next_id);
        self.next_id += 1;

        let slot = Arc::new(CompletionSlot::default());
        let target = Arc::clone(&slot);
        let completion = Completion::new(move |result| {
            target.fill(wrap(result));
            notifier.notify(id);
        });

        self.outstanding.insert(
            id,
            Operation {
                id,
                kind,
                generation,
                slot,
            },
        );
        (id, completion)
    }

    pub(crate) fn remove(&mut self, id: OperationId) -> Option<Operation> {
        self.outstanding.remove(&id)
    }

    /// 按发起顺序取出全部在途操作。
    pub(crate) fn drain(&mut self) -> Vec<Operation> {
        core::mem::take(&mut self.outstanding)
            .into_values()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub(crate) fn count(&self, kind: OperationKind) -> usize {
        self.outstanding
            .values()
            .filter(|operation| operation.kind == kind)
            .count()
    }
}
