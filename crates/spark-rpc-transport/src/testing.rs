//! 脚本化的内存传输实现，仅在 `test-util` 特性下编译。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 上层流状态机的测试需要精确控制“哪个操作何时完成、以何种结果完成”，真实网络无法复现；
//! - 通过 [`ScriptController`] 由测试显式解析挂起的完成句柄，模拟任意的完成交错。
//!
//! ## 行为（How）
//! - 发起的操作被挂起，直到控制器解析；写入的负载按发起顺序记录；
//! - 记录在途读/写数量的高水位，便于断言“至多一个在途”；
//! - `try_cancel` 仿照 gRPC：所有挂起的 start/read/write 以失败完成，挂起或之后发起的
//!   finish 以 `CANCELLED` 状态完成；
//! - 控制器在释放内部锁之后才解析句柄，回报逻辑不会与脚本状态竞争。

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{CallContext, CallFailure, Completion, MetadataMap, RawStatus, StreamingCall};

/// 规范化错误码中的 `CANCELLED`。
pub const CANCELLED_CODE: i32 = 1;

/// 各类操作被发起的累计次数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IssueCounts {
    pub starts: usize,
    pub reads: usize,
    pub writes: usize,
    pub finishes: usize,
}

#[derive(Default)]
struct ScriptState {
    cancelled: bool,
    auto_complete_writes: bool,
    metadata: MetadataMap,
    start: Option<Completion<()>>,
    reads: VecDeque<Completion<Bytes>>,
    writes: VecDeque<(Bytes, Completion<()>)>,
    finish: Option<Completion<RawStatus>>,
    written: Vec<Bytes>,
    counts: IssueCounts,
    max_reads: usize,
    max_writes: usize,
}

type Shared = Arc<Mutex<ScriptState>>;

/// 构造共享同一脚本状态的上下文、调用句柄与控制器。
pub fn scripted_call() -> (ScriptedContext, ScriptedCall, ScriptController) {
    let shared: Shared = Arc::new(Mutex::new(ScriptState::default()));
    (
        ScriptedContext {
            shared: Arc::clone(&shared),
        },
        ScriptedCall {
            shared: Arc::clone(&shared),
        },
        ScriptController { shared },
    )
}

/// 脚本化的调用上下文。
pub struct ScriptedContext {
    shared: Shared,
}

impl CallContext for ScriptedContext {
    fn try_cancel(&mut self) {
        let (start, reads, writes, finish) = {
            let mut state = self.shared.lock();
            state.cancelled = true;
            (
                state.start.take(),
                std::mem::take(&mut state.reads),
                std::mem::take(&mut state.writes),
                state.finish.take(),
            )
        };
        if let Some(start) = start {
            start.fail(CallFailure::cancelled());
        }
        for read in reads {
            read.fail(CallFailure::cancelled());
        }
        for (_, write) in writes {
            write.fail(CallFailure::cancelled());
        }
        if let Some(finish) = finish {
            finish.succeed(cancelled_status());
        }
    }

    fn server_initial_metadata(&self) -> MetadataMap {
        self.shared.lock().metadata.clone()
    }
}

/// 脚本化的调用句柄。
pub struct ScriptedCall {
    shared: Shared,
}

impl StreamingCall for ScriptedCall {
    fn start(&mut self, completion: Completion<()>) {
        let mut state = self.shared.lock();
        state.counts.starts += 1;
        if state.cancelled {
            drop(state);
            completion.fail(CallFailure::cancelled());
            return;
        }
        state.start = Some(completion);
    }

    fn read(&mut self, completion: Completion<Bytes>) {
        let mut state = self.shared.lock();
        state.counts.reads += 1;
        if state.cancelled {
            drop(state);
            completion.fail(CallFailure::cancelled());
            return;
        }
        state.reads.push_back(completion);
        state.max_reads = state.max_reads.max(state.reads.len());
    }

    fn write(&mut self, message: Bytes, completion: Completion<()>) {
        let mut state = self.shared.lock();
        state.counts.writes += 1;
        state.written.push(message.clone());
        if state.cancelled {
            drop(state);
            completion.fail(CallFailure::cancelled());
            return;
        }
        if state.auto_complete_writes {
            state.max_writes = state.max_writes.max(1);
            drop(state);
            completion.succeed(());
            return;
        }
        state.writes.push_back((message, completion));
        state.max_writes = state.max_writes.max(state.writes.len());
    }

    fn finish(&mut self, completion: Completion<RawStatus>) {
        let mut state = self.shared.lock();
        state.counts.finishes += 1;
        if state.cancelled {
            drop(state);
            completion.succeed(cancelled_status());
            return;
        }
        state.finish = Some(completion);
    }
}

/// 测试侧的脚本控制器，可跨线程克隆。
#[derive(Clone)]
pub struct ScriptController {
    shared: Shared,
}

impl ScriptController {
    /// 设置服务端初始元数据。
    pub fn set_metadata(&self, metadata: MetadataMap) {
        self.shared.lock().metadata = metadata;
    }

    /// 写操作是否在发起时立即成功完成。
    pub fn set_auto_complete_writes(&self, enabled: bool) {
        self.shared.lock().auto_complete_writes = enabled;
    }

    /// 以成功解析挂起的 start；无挂起操作时返回 `false`。
    pub fn complete_start(&self) -> bool {
        let start = self.shared.lock().start.take();
        start.map(|start| start.succeed(())).is_some()
    }

    /// 以失败解析挂起的 start。
    pub fn fail_start(&self) -> bool {
        let start = self.shared.lock().start.take();
        start
            .map(|start| start.fail(CallFailure::new("start failed")))
            .is_some()
    }

    /// 向最早挂起的读操作投递一条消息。
    pub fn deliver_read(&self, message: impl Into<Bytes>) -> bool {
        let read = self.shared.lock().reads.pop_front();
        read.map(|read| read.succeed(message.into())).is_some()
    }

    /// 以失败解析最早挂起的读操作。
    pub fn fail_read(&self) -> bool {
        let read = self.shared.lock().reads.pop_front();
        read.map(|read| read.fail(CallFailure::new("read failed")))
            .is_some()
    }

    /// 以成功解析最早挂起的写操作，返回其负载。
    pub fn complete_write(&self) -> Option<Bytes> {
        let write = self.shared.lock().writes.pop_front();
        write.map(|(message, completion)| {
            completion.succeed(());
            message
        })
    }

    /// 以失败解析最早挂起的写操作。
    pub fn fail_write(&self) -> Option<Bytes> {
        let write = self.shared.lock().writes.pop_front();
        write.map(|(message, completion)| {
            completion.fail(CallFailure::new("write failed"));
            message
        })
    }

    /// 以给定状态解析挂起的 finish。
    pub fn finish_with(&self, status: RawStatus) -> bool {
        let finish = self.shared.lock().finish.take();
        finish.map(|finish| finish.succeed(status)).is_some()
    }

    /// 按发起顺序返回所有写入过的负载。
    pub fn written(&self) -> Vec<Bytes> {
        self.shared.lock().written.clone()
    }

    pub fn counts(&self) -> IssueCounts {
        self.shared.lock().counts
    }

    pub fn outstanding_reads(&self) -> usize {
        self.shared.lock().reads.len()
    }

    pub fn outstanding_writes(&self) -> usize {
        self.shared.lock().writes.len()
    }

    /// 在途读操作数量的历史最大值。
    pub fn max_outstanding_reads(&self) -> usize {
        self.shared.lock().max_reads
    }

    /// 在途写操作数量的历史最大值。
    pub fn max_outstanding_writes(&self) -> usize {
        self.shared.lock().max_writes
    }

    pub fn has_pending_start(&self) -> bool {
        self.shared.lock().start.is_some()
    }

    pub fn has_pending_finish(&self) -> bool {
        self.shared.lock().finish.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }
}

fn cancelled_status() -> RawStatus {
    RawStatus::new(CANCELLED_CODE, "Cancelled")
}
