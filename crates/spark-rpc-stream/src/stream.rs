//! 流驱动：把状态机的决策落到传输层与观察者上。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 传输句柄不做引用计数，任何操作完成时都可能引用它；因此流必须是句柄的唯一所有者，
//!   并在释放句柄之前把所有在途操作驱动到终点；
//! - 观察者可能随时失去兴趣（代际前进），此后到达的完成都必须被静默吸收。
//!
//! ## 架构位置（Where）
//! - 位于传输契约（`spark-rpc-transport`）与上层同步引擎之间；上层只接触 [`RpcStream`]
//!   与 [`StreamObserver`]。
//!
//! ## 执行模型（How）
//! - 所有 `&mut self` 方法都在拥有者的串行执行器上调用；完成句柄在任意线程上只做“写槽位 + 投递编号”，
//!   真正的状态推进发生在 [`RpcStream::run_pending`] / [`RpcStream::process_next`] 中；
//! - [`RpcStream::finish`] 与 [`RpcStream::write_and_finish`] 是仅有的阻塞入口：它们取消上下文，
//!   就地等待每个在途操作的结果并丢弃之。
//!
//! ## 风险提示（Trade-offs）
//! - 排空依赖传输层在取消后及时解析操作；配置的排空超时只是安全阀，超时的操作被放弃并记录错误日志。

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use spark_rpc_transport::{
    CallContext, CallFailure, Completion, MetadataMap, RawStatus, StreamingCall,
};
use tracing::{debug, error, trace, warn};

use crate::config::{StreamConfig, saturating_millis};
use crate::error::StreamError;
use crate::executor::CompletionQueue;
use crate::machine::{
    Effect, Effects, FinishPlan, StateAdvance, StreamMachine, StreamState, WriteAdmission,
};
use crate::observer::{Generation, StreamObserver};
use crate::operation::{Operation, OperationId, OperationKind, OperationOutput, OperationSet};
use crate::stats::StreamStats;
use crate::status::{Status, StatusCode};
use crate::write_buffer::WriteBuffer;

/// [`RpcStream::write`] 对一条消息的处置。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteDisposition {
    /// 已立即发出写操作。
    Issued,
    /// 已排队，等待流建立或前一个写完成。
    Buffered,
    /// 流正在结束，消息被丢弃。
    Dropped,
}

/// 单条双向流式 RPC。
///
/// # 契约（What）
/// - 一次性：从 `NotStarted` 单调前进到 `Finished`，之后不可重启；
/// - 观察者回调只会在代际匹配且非调用方主动结束时发生；
/// - 被丢弃时若尚未结束，自动执行 [`RpcStream::finish`]，保证没有操作比调用句柄活得更久。
pub struct RpcStream {
    // 字段按声明顺序析构：调用句柄必须先于签发它的上下文释放。
    call: Box<dyn StreamingCall>,
    context: Box<dyn CallContext>,
    observer: Arc<dyn StreamObserver>,
    machine: StreamMachine,
    writes: WriteBuffer,
    active_write: Option<OperationId>,
    operations: OperationSet,
    queue: CompletionQueue,
    response_headers: Option<MetadataMap>,
    stats: StreamStats,
    config: StreamConfig,
}

impl RpcStream {
    /// 绑定上下文、调用句柄与观察者，并快照观察者当前代际。
    pub fn new<C, S>(
        context: C,
        call: S,
        observer: Arc<dyn StreamObserver>,
        config: StreamConfig,
    ) -> Self
    where
        C: CallContext,
        S: StreamingCall,
    {
        let generation = observer.generation();
        debug!(stream = %config.label(), %generation, "stream created");
        Self {
            call: Box::new(call),
            context: Box::new(context),
            observer,
            machine: StreamMachine::new(generation),
            writes: WriteBuffer::new(),
            active_write: None,
            operations: OperationSet::default(),
            queue: CompletionQueue::new(),
            response_headers: None,
            stats: StreamStats::default(),
            config,
        }
    }

    /// 发起建立操作，进入 `Starting`。
    pub fn start(&mut self) -> Result<(), StreamError> {
        let effects = self.machine.start()?;
        self.log_transition();
        self.apply(effects);
        Ok(())
    }

    /// 提交一条出站消息。
    ///
    /// - 流建立前只排队；建立后按提交顺序逐条发出，同一时刻至多一个写在途；
    /// - 流进入 `Finishing` 后消息被丢弃并返回 [`WriteDisposition::Dropped`]；
    /// - `Finished` 之后返回 [`StreamError::AlreadyFinished`]。
    pub fn write(&mut self, message: Bytes) -> Result<WriteDisposition, StreamError> {
        match self.machine.admit_write()? {
            WriteAdmission::Drop => {
                debug!(
                    stream = %self.config.label(),
                    state = ?self.machine.state(),
                    bytes = message.len(),
                    "dropping write submitted while finishing"
                );
                Ok(WriteDisposition::Dropped)
            }
            WriteAdmission::Accept => {
                // 队列非空时发出的是更早的消息，本条仍在排队。
                let backlog = self.writes.len();
                match self.writes.enqueue(message) {
                    Some(next) => {
                        self.issue_write(next);
                        if backlog == 0 {
                            Ok(WriteDisposition::Issued)
                        } else {
                            Ok(WriteDisposition::Buffered)
                        }
                    }
                    None => Ok(WriteDisposition::Buffered),
                }
            }
        }
    }

    /// 调用方主动结束流，不产生任何观察者通知。
    ///
    /// 取消上下文后阻塞等待所有在途操作，必要时再发起一次结束握手并等待其完成；
    /// 返回时状态为 `Finished`，且没有任何操作仍引用调用句柄。
    pub fn finish(&mut self) -> Result<(), StreamError> {
        let plan = self.machine.begin_client_finish()?;
        self.log_transition();

        let discarded = self.writes.discard_unstarted();
        if discarded > 0 {
            debug!(stream = %self.config.label(), discarded, "discarding unsent writes");
        }
        if let FinishPlan::Drain { issue_finish } = plan {
            self.context.try_cancel();
            self.fast_finish_operations_blocking(issue_finish);

            let effects = self.machine.complete_client_finish();
            self.log_transition();
            self.apply(effects);
        }
        Ok(())
    }

    /// 发出最后一条消息并结束流，返回该消息是否确认写出。
    ///
    /// - 流已建立：丢弃未发出的排队消息，等待在途写完成，再发出 `message` 并等待其结果；
    /// - 流未建立：等价于 [`RpcStream::finish`]，消息被丢弃并返回 `false`。
    pub fn write_and_finish(&mut self, message: Bytes) -> Result<bool, StreamError> {
        if self.machine.is_finished() {
            return Err(StreamError::AlreadyFinished);
        }

        let mut delivered = false;
        if self.machine.state() == StreamState::Open {
            let discarded = self.writes.discard_unstarted();
            if discarded > 0 {
                debug!(stream = %self.config.label(), discarded, "discarding unsent writes");
            }
            let writable = match self.active_write {
                Some(id) => self.wait_for_write(id),
                None => true,
            };
            if writable && let Some(next) = self.writes.enqueue(message) {
                let id = self.issue_write(next);
                delivered = self.wait_for_write(id);
            }
        } else {
            debug!(
                stream = %self.config.label(),
                state = ?self.machine.state(),
                "stream not open; final write dropped"
            );
        }

        self.finish()?;
        Ok(delivered)
    }

    pub fn is_finished(&self) -> bool {
        self.machine.is_finished()
    }

    pub fn state(&self) -> StreamState {
        self.machine.state()
    }

    /// 构造时快照的观察者代际。
    pub fn generation(&self) -> Generation {
        self.machine.generation()
    }

    /// 流建立时捕获的服务端初始元数据；建立之前为空。
    pub fn response_headers(&self) -> MetadataMap {
        self.response_headers.clone().unwrap_or_default()
    }

    pub fn outstanding_operations(&self) -> usize {
        self.operations.len()
    }

    /// 排队中、尚未发出的消息数。
    pub fn buffered_writes(&self) -> usize {
        self.writes.len()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// 处理所有已到达的完成，不阻塞；返回实际处理的数量。
    pub fn run_pending(&mut self) -> usize {
        let mut dispatched = 0;
        while let Some(id) = self.queue.try_next() {
            if self.dispatch(id) {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// 等待并处理下一个完成；没有在途操作时立即返回 `false`。
    pub async fn process_next(&mut self) -> bool {
        loop {
            if self.operations.is_empty() {
                return false;
            }
            match self.queue.next().await {
                Some(id) => {
                    if self.dispatch(id) {
                        return true;
                    }
                }
                None => return false,
            }
        }
    }

    fn dispatch(&mut self, id: OperationId) -> bool {
        let Some(operation) = self.operations.remove(id) else {
            trace!(stream = %self.config.label(), ?id, "ignoring completion of a drained operation");
            return false;
        };
        let Some(output) = operation.take_output() else {
            error!(
                stream = %self.config.label(),
                operation = operation.kind().as_str(),
                "completion notified without a result"
            );
            return false;
        };
        self.on_completion(&operation, output);
        true
    }

    fn on_completion(&mut self, operation: &Operation, output: OperationOutput) {
        let current = self.observer.generation();
        if operation.generation() != current {
            self.stats.absorbed_completions += 1;
            trace!(
                stream = %self.config.label(),
                operation = operation.kind().as_str(),
                generation = %operation.generation(),
                %current,
                "absorbing stale completion"
            );
        }

        let effects = match output {
            OperationOutput::Started(Ok(())) => self.machine.on_start(current),
            OperationOutput::Read(Ok(message)) => self.machine.on_read(message, current),
            OperationOutput::Written(Ok(())) => {
                self.release_write(operation.id());
                self.stats.writes_completed += 1;
                self.machine.on_write(current)
            }
            OperationOutput::Written(Err(failure)) => {
                self.release_write(operation.id());
                self.operation_failed(operation.kind(), &failure, current)
            }
            OperationOutput::Started(Err(failure)) | OperationOutput::Read(Err(failure)) => {
                self.operation_failed(operation.kind(), &failure, current)
            }
            OperationOutput::Finished(result) => {
                let status = result.unwrap_or_else(|failure| {
                    RawStatus::new(StatusCode::Unknown.as_raw(), failure.to_string())
                });
                match operation.kind() {
                    OperationKind::ClientFinish => self.machine.on_finished_by_client(),
                    _ => self.machine.on_finished_by_server(status, current),
                }
            }
        };
        self.log_transition();
        self.apply(effects);
    }

    fn operation_failed(
        &mut self,
        kind: OperationKind,
        failure: &CallFailure,
        current: Generation,
    ) -> Effects {
        debug!(
            stream = %self.config.label(),
            operation = kind.as_str(),
            %failure,
            "operation failed"
        );
        self.machine.on_operation_failed(kind, current)
    }

    fn apply(&mut self, effects: Effects) {
        for effect in effects {
            match effect {
                Effect::IssueStart => {
                    let (_, completion) = self.register(OperationKind::Start, OperationOutput::Started);
                    self.call.start(completion);
                }
                Effect::IssueRead => self.issue_read(),
                Effect::IssueServerFinish => {
                    let (_, completion) =
                        self.register(OperationKind::ServerFinish, OperationOutput::Finished);
                    self.call.finish(completion);
                }
                Effect::OpenWrites => {
                    if let Some(next) = self.writes.open() {
                        self.issue_write(next);
                    }
                }
                Effect::ResumeWrites => {
                    if let Some(next) = self.writes.next_write() {
                        self.issue_write(next);
                    }
                }
                Effect::DiscardWrites => {
                    let discarded = self.writes.discard_unstarted();
                    if discarded > 0 {
                        debug!(stream = %self.config.label(), discarded, "discarding unsent writes");
                    }
                }
                Effect::NotifyStart => {
                    self.capture_response_headers();
                    self.observer.on_stream_start();
                }
                Effect::NotifyRead(message) => {
                    self.stats.messages_read += 1;
                    self.observer.on_stream_read(&message);
                }
                Effect::NotifyError(raw) => {
                    let status = Status::from(raw);
                    debug!(
                        stream = %self.config.label(),
                        code = status.stable_code(),
                        message = status.message(),
                        "stream closed by server"
                    );
                    self.observer.on_stream_error(&status);
                }
            }
        }
    }

    fn register<T>(
        &mut self,
        kind: OperationKind,
        wrap: fn(Result<T, CallFailure>) -> OperationOutput,
    ) -> (OperationId, Completion<T>)
    where
        T: Send + 'static,
    {
        self.stats.record_issue(kind);
        trace!(
            stream = %self.config.label(),
            operation = kind.as_str(),
            generation = %self.machine.generation(),
            "issuing operation"
        );
        self.operations
            .register(kind, self.machine.generation(), self.queue.notifier(), wrap)
    }

    fn issue_read(&mut self) {
        // 观察者可能在刚刚的回调中推进了代际，因此在此处重新读取。
        if !self.machine.arm_read(self.observer.generation()) {
            trace!(stream = %self.config.label(), state = ?self.machine.state(), "not re-arming read");
            return;
        }
        let (_, completion) = self.register(OperationKind::Read, OperationOutput::Read);
        self.call.read(completion);
    }

    fn issue_write(&mut self, message: Bytes) -> OperationId {
        let (id, completion) = self.register(OperationKind::Write, OperationOutput::Written);
        self.active_write = Some(id);
        self.call.write(message, completion);
        id
    }

    fn release_write(&mut self, id: OperationId) {
        if self.active_write == Some(id) {
            self.active_write = None;
            self.writes.on_write_complete();
        }
    }

    /// 就地等待指定写操作，返回其是否成功。
    fn wait_for_write(&mut self, id: OperationId) -> bool {
        self.release_write(id);
        let Some(operation) = self.operations.remove(id) else {
            return false;
        };
        match self.wait_operation(&operation) {
            Some(OperationOutput::Written(Ok(()))) => {
                self.stats.writes_completed += 1;
                true
            }
            _ => false,
        }
    }

    /// 取消之后的强制排空：等待每个在途操作终结并丢弃其结果。
    fn fast_finish_operations_blocking(&mut self, issue_finish: bool) {
        if !self.operations.is_empty() {
            debug!(
                stream = %self.config.label(),
                outstanding = self.operations.len(),
                reads = self.operations.count(OperationKind::Read),
                writes = self.operations.count(OperationKind::Write),
                "draining outstanding operations"
            );
        }
        let pending = self.operations.drain();
        for operation in &pending {
            self.wait_operation(operation);
        }
        if let Some(id) = self.active_write.take() {
            trace!(stream = %self.config.label(), ?id, "in-flight write drained");
            self.writes.on_write_complete();
        }

        if issue_finish {
            let (id, completion) = self.register(OperationKind::ClientFinish, OperationOutput::Finished);
            self.call.finish(completion);
            if let Some(operation) = self.operations.remove(id) {
                self.wait_operation(&operation);
            }
        }
    }

    fn wait_operation(&self, operation: &Operation) -> Option<OperationOutput> {
        let timeout: Option<Duration> = self.config.drain_timeout();
        let output = operation.wait(timeout);
        if output.is_none() {
            error!(
                stream = %self.config.label(),
                operation = operation.kind().as_str(),
                timeout_ms = timeout.map(saturating_millis),
                "operation not resolved within drain timeout; abandoning it"
            );
        }
        output
    }

    fn capture_response_headers(&mut self) {
        let headers = self.context.server_initial_metadata();
        let logged = self.config.loggable_headers(&headers);
        if !logged.is_empty() {
            debug!(stream = %self.config.label(), headers = ?logged, "response headers");
        }
        self.response_headers = Some(headers);
    }

    fn log_transition(&mut self) {
        match self.machine.take_advance() {
            StateAdvance::Transition { from, to } => debug!(
                stream = %self.config.label(),
                generation = %self.machine.generation(),
                ?from,
                ?to,
                "stream state transition"
            ),
            StateAdvance::Noop { state } => {
                trace!(stream = %self.config.label(), ?state, "state unchanged")
            }
        }
    }
}

impl Drop for RpcStream {
    fn drop(&mut self) {
        if self.machine.is_finished() {
            // 服务端结束后仍可能有操作在途（例如尚未回报的写）。
            if !self.operations.is_empty() {
                self.context.try_cancel();
                self.fast_finish_operations_blocking(false);
            }
            return;
        }
        warn!(
            stream = %self.config.label(),
            state = ?self.machine.state(),
            "stream dropped without finish; forcing teardown"
        );
        if let Err(err) = self.finish() {
            error!(stream = %self.config.label(), code = err.code(), "forced teardown failed");
        }
    }
}

impl core::fmt::Debug for RpcStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RpcStream")
            .field("label", &self.config.label())
            .field("state", &self.machine.state())
            .field("generation", &self.machine.generation())
            .field("outstanding", &self.operations.len())
            .field("buffered_writes", &self.writes.len())
            .finish()
    }
}
