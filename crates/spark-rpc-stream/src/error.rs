use thiserror::Error;

use crate::machine::StreamState;

/// 流公共接口的误用错误。
///
/// # 教案式说明
/// - **意图 (Why)**：流是一次性的，重复 `start`、在 `Finished` 之后继续操作都属于调用方逻辑错误；
///   以 `Result` 暴露而非直接中止进程，便于上层记录并恢复。
/// - **契约 (What)**：错误不会改变流状态；`code()` 给出稳定错误码，便于日志聚合。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// `start` 只允许在 `NotStarted` 状态调用一次。
    #[error("stream cannot be started from state {state:?}")]
    AlreadyStarted { state: StreamState },

    /// 流已结束，不再接受任何操作。
    #[error("stream is already finished")]
    AlreadyFinished,
}

impl StreamError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::AlreadyStarted { .. } => "rpc.stream.already_started",
            StreamError::AlreadyFinished => "rpc.stream.already_finished",
        }
    }
}
