use crate::operation::OperationKind;

/// 单条流的诊断计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// 投递给观察者的消息数。
    pub messages_read: u64,
    /// 成功完成的写操作数。
    pub writes_completed: u64,
    /// 因代际不匹配被吸收的完成数。
    pub absorbed_completions: u64,
    pub starts_issued: u64,
    pub reads_issued: u64,
    pub writes_issued: u64,
    /// 结束握手（含服务端与调用方两类）。
    pub finishes_issued: u64,
}

impl StreamStats {
    pub(crate) fn record_issue(&mut self, kind: OperationKind) {
        match kind {
            OperationKind::Start => self.starts_issued += 1,
            OperationKind::Read => self.reads_issued += 1,
            OperationKind::Write => self.writes_issued += 1,
            OperationKind::ServerFinish | OperationKind::ClientFinish => self.finishes_issued += 1,
        }
    }
}
