use std::collections::BTreeMap;

use bytes::Bytes;

/// 响应头部元数据：头部名称到取值的映射。
///
/// 选用 `BTreeMap` 以获得确定的迭代顺序，便于日志与断言。
pub type MetadataMap = BTreeMap<String, String>;

/// 传输层上报的原始终止状态。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - RPC 栈在调用结束时给出“错误码 + 消息 + 二进制详情”三元组，流层需要将其翻译为观察者
///   使用的状态类型；
/// - 本结构只做承载，不解释错误码语义，避免传输契约与上层错误分类耦合。
///
/// ## 契约（What）
/// - `code`：原始整型错误码，`0` 表示成功，其余取值遵循规范化 RPC 错误码；
/// - `message`：人类可读描述；
/// - `details`：序列化的扩展详情，可能为空。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawStatus {
    pub code: i32,
    pub message: String,
    pub details: Bytes,
}

impl RawStatus {
    /// 成功状态。
    pub fn ok() -> Self {
        Self::default()
    }

    /// 以错误码与消息构造状态。
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Bytes::new(),
        }
    }

    /// 附加二进制详情。
    pub fn with_details(mut self, details: Bytes) -> Self {
        self.details = details;
        self
    }

    /// 是否为成功状态。
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}
