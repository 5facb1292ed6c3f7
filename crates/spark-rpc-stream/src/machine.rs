//! 流的纯状态机。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 回调驱动的控制流难以测试：每个回调都同时修改状态、发起操作、通知观察者；
//! - 这里把“决策”与“执行”拆开：[`StreamMachine`] 只接收事件与观察者当前代际，
//!   返回新的状态与一组 [`Effect`]；由驱动层（`RpcStream`）按顺序执行副作用。
//!
//! ## 契约（What）
//! - 状态只能沿 `NotStarted < Starting < Open < Finishing < Finished` 前进，所有变更都经由
//!   [`StreamMachine::advance`]；
//! - 每个完成事件先比较代际，不匹配即吸收：不改状态、不产生副作用；
//! - 读操作的重新挂起不在 `on_read` 内直接决定，而是产出 [`Effect::IssueRead`]，由驱动层在
//!   观察者回调执行**之后**调用 [`StreamMachine::arm_read`] 重新比较代际。
//!
//! ## 实现（How）
//! - 状态机不持有任何 I/O 句柄，也不记录日志，可脱离传输层独立测试。

use bytes::Bytes;
use spark_rpc_transport::RawStatus;

use crate::error::StreamError;
use crate::observer::Generation;
use crate::operation::OperationKind;

/// 流状态，严格单调前进。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamState {
    NotStarted,
    Starting,
    Open,
    Finishing,
    Finished,
}

/// 自上次查询以来的状态推进结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum StateAdvance<S>
where
    S: Copy + Eq,
{
    /// 状态未变化。
    Noop { state: S },
    /// 状态发生跃迁。
    Transition { from: S, to: S },
}

/// 状态机要求驱动层执行的副作用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Effect {
    IssueStart,
    /// 候选的读挂起，需经 [`StreamMachine::arm_read`] 二次确认。
    IssueRead,
    IssueServerFinish,
    OpenWrites,
    ResumeWrites,
    DiscardWrites,
    NotifyStart,
    NotifyRead(Bytes),
    NotifyError(RawStatus),
}

pub(crate) type Effects = Vec<Effect>;

/// 写入请求的准入结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteAdmission {
    Accept,
    /// 流正在结束，传输层不再接受新操作。
    Drop,
}

/// 调用方主动结束的执行计划。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FinishPlan {
    /// 流从未启动，直接进入 `Finished`，无任何传输流量。
    Immediate,
    /// 需要取消并排空在途操作；`issue_finish` 表示是否还需发起一次结束握手。
    Drain { issue_finish: bool },
}

#[derive(Debug)]
pub(crate) struct StreamMachine {
    state: StreamState,
    reported: StreamState,
    generation: Generation,
    has_pending_read: bool,
    finish_issued: bool,
    client_initiated: bool,
}

impl StreamMachine {
    pub(crate) fn new(generation: Generation) -> Self {
        Self {
            state: StreamState::NotStarted,
            reported: StreamState::NotStarted,
            generation,
            has_pending_read: false,
            finish_issued: false,
            client_initiated: false,
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.state
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state == StreamState::Finished
    }

    #[cfg(test)]
    pub(crate) fn has_pending_read(&self) -> bool {
        self.has_pending_read
    }

    fn matches(&self, current: Generation) -> bool {
        self.generation == current
    }

    /// 唯一的状态写入口；目标不晚于当前状态时保持不变。
    pub(crate) fn advance(&mut self, to: StreamState) {
        if to > self.state {
            self.state = to;
        }
    }

    /// 取出自上次调用以来的状态推进，一次事件内的多步跃迁合并为一条。
    pub(crate) fn take_advance(&mut self) -> StateAdvance<StreamState> {
        let from = core::mem::replace(&mut self.reported, self.state);
        if from == self.state {
            StateAdvance::Noop { state: self.state }
        } else {
            StateAdvance::Transition {
                from,
                to: self.state,
            }
        }
    }

    pub(crate) fn start(&mut self) -> Result<Effects, StreamError> {
        match self.state {
            StreamState::NotStarted => {
                self.advance(StreamState::Starting);
                Ok(vec![Effect::IssueStart])
            }
            StreamState::Finished => Err(StreamError::AlreadyFinished),
            state => Err(StreamError::AlreadyStarted { state }),
        }
    }

    pub(crate) fn on_start(&mut self, current: Generation) -> Effects {
        if !self.matches(current) || self.state != StreamState::Starting {
            return Vec::new();
        }
        self.advance(StreamState::Open);
        vec![Effect::NotifyStart, Effect::OpenWrites, Effect::IssueRead]
    }

    pub(crate) fn on_read(&mut self, message: Bytes, current: Generation) -> Effects {
        self.has_pending_read = false;
        if !self.matches(current) || self.is_finished() {
            return Vec::new();
        }
        vec![Effect::NotifyRead(message), Effect::IssueRead]
    }

    pub(crate) fn on_write(&mut self, current: Generation) -> Effects {
        if !self.matches(current) || self.state >= StreamState::Finishing {
            return Vec::new();
        }
        vec![Effect::ResumeWrites]
    }

    /// 除服务端结束握手以外的任意操作失败。
    pub(crate) fn on_operation_failed(
        &mut self,
        kind: OperationKind,
        current: Generation,
    ) -> Effects {
        if kind == OperationKind::Read {
            self.has_pending_read = false;
        }
        if !self.matches(current) || self.state >= StreamState::Finishing {
            return Vec::new();
        }
        self.advance(StreamState::Finishing);
        let mut effects = vec![Effect::DiscardWrites];
        if !self.finish_issued {
            self.finish_issued = true;
            effects.push(Effect::IssueServerFinish);
        }
        effects
    }

    pub(crate) fn on_finished_by_server(&mut self, status: RawStatus, current: Generation) -> Effects {
        if !self.matches(current) {
            return Vec::new();
        }
        self.advance(StreamState::Finished);
        if self.client_initiated {
            Vec::new()
        } else {
            vec![Effect::NotifyError(status)]
        }
    }

    pub(crate) fn on_finished_by_client(&mut self) -> Effects {
        self.advance(StreamState::Finished);
        Vec::new()
    }

    pub(crate) fn admit_write(&self) -> Result<WriteAdmission, StreamError> {
        match self.state {
            StreamState::Finished => Err(StreamError::AlreadyFinished),
            StreamState::Finishing => Ok(WriteAdmission::Drop),
            _ => Ok(WriteAdmission::Accept),
        }
    }

    /// 确认是否真正挂起下一次读；成功时标记读在途。
    pub(crate) fn arm_read(&mut self, current: Generation) -> bool {
        if self.state != StreamState::Open || !self.matches(current) || self.has_pending_read {
            return false;
        }
        self.has_pending_read = true;
        true
    }

    pub(crate) fn begin_client_finish(&mut self) -> Result<FinishPlan, StreamError> {
        match self.state {
            StreamState::Finished => Err(StreamError::AlreadyFinished),
            StreamState::NotStarted => {
                self.advance(StreamState::Finished);
                Ok(FinishPlan::Immediate)
            }
            _ => {
                self.client_initiated = true;
                self.advance(StreamState::Finishing);
                let issue_finish = !self.finish_issued;
                self.finish_issued = true;
                Ok(FinishPlan::Drain { issue_finish })
            }
        }
    }

    /// 排空完成：所有在途操作均已终结。
    pub(crate) fn complete_client_finish(&mut self) -> Effects {
        self.has_pending_read = false;
        self.on_finished_by_client()
    }
}
