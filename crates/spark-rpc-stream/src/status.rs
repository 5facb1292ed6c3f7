//! 终止状态的翻译与错误分类。
//!
//! # 设计背景（Why）
//! - 传输层只上报原始的 `(code, message, details)` 三元组，观察者需要稳定的、可机读的状态类型；
//! - 流本身不做重试，但持有重试策略的调用方需要据此判断“是否值得重建流”，因此与核心错误层一样
//!   提供结构化的 [`ErrorCategory`]，避免上层解析字符串。

use core::fmt;

use bytes::Bytes;
use spark_rpc_transport::RawStatus;
use thiserror::Error;

/// 规范化的 RPC 状态码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    /// 将原始整型错误码映射为枚举，未知取值归入 [`StatusCode::Unknown`]。
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// 原始整型取值。
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// 稳定的点分错误码，遵循 `<域>.<语义>` 约定。
    pub fn stable_code(self) -> &'static str {
        match self {
            Self::Ok => "rpc.stream.ok",
            Self::Cancelled => "rpc.stream.cancelled",
            Self::Unknown => "rpc.stream.unknown",
            Self::InvalidArgument => "rpc.stream.invalid_argument",
            Self::DeadlineExceeded => "rpc.stream.deadline_exceeded",
            Self::NotFound => "rpc.stream.not_found",
            Self::AlreadyExists => "rpc.stream.already_exists",
            Self::PermissionDenied => "rpc.stream.permission_denied",
            Self::ResourceExhausted => "rpc.stream.resource_exhausted",
            Self::FailedPrecondition => "rpc.stream.failed_precondition",
            Self::Aborted => "rpc.stream.aborted",
            Self::OutOfRange => "rpc.stream.out_of_range",
            Self::Unimplemented => "rpc.stream.unimplemented",
            Self::Internal => "rpc.stream.internal",
            Self::Unavailable => "rpc.stream.unavailable",
            Self::DataLoss => "rpc.stream.data_loss",
            Self::Unauthenticated => "rpc.stream.unauthenticated",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stable_code())
    }
}

/// 错误分类，驱动调用方的自动化处置策略。
///
/// # 契约说明（What）
/// - `Retryable`：瞬时故障或服务端正常关闭，调用方可以构造新流重试；
/// - `Security`：鉴权失败，需要刷新凭证后再重建；
/// - `ResourceExhausted`：配额耗尽，应结合退避；
/// - `Cancelled`/`Timeout`：取消或截止，通常由调用方自身触发；
/// - `NonRetryable`：确定性失败，重试不会改变结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable,
    NonRetryable,
    Security,
    ResourceExhausted,
    Cancelled,
    Timeout,
}

/// 观察者收到的终止状态。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 作为 `on_stream_error` 的唯一载体，把传输层原始状态翻译为稳定错误码与分类；
/// - 保留二进制详情，调用方可按需解码扩展错误信息。
///
/// ## 契约（What）
/// - `code`：规范化状态码；`message`：服务端或传输层给出的描述；`details`：原样透传的详情；
/// - **后置条件**：`Status::from(RawStatus)` 不丢弃任何字段，未知错误码归入 `Unknown`。
///
/// ## 注意事项（Trade-offs）
/// - 服务端以 `OK` 正常结束流时同样通过 `on_stream_error` 告知，分类为 `Retryable`，
///   由调用方决定是否重建流。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct Status {
    code: StatusCode,
    message: String,
    details: Bytes,
}

impl Status {
    /// 以状态码与消息构造状态。
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
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

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &Bytes {
        &self.details
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    /// 稳定错误码，等价于 `self.code().stable_code()`。
    pub fn stable_code(&self) -> &'static str {
        self.code.stable_code()
    }

    /// 依据状态码给出处置分类。
    pub fn category(&self) -> ErrorCategory {
        match self.code {
            StatusCode::Cancelled => ErrorCategory::Cancelled,
            StatusCode::DeadlineExceeded => ErrorCategory::Timeout,
            StatusCode::PermissionDenied | StatusCode::Unauthenticated => ErrorCategory::Security,
            StatusCode::ResourceExhausted => ErrorCategory::ResourceExhausted,
            StatusCode::Ok
            | StatusCode::Unknown
            | StatusCode::Aborted
            | StatusCode::Internal
            | StatusCode::Unavailable => ErrorCategory::Retryable,
            StatusCode::InvalidArgument
            | StatusCode::NotFound
            | StatusCode::AlreadyExists
            | StatusCode::FailedPrecondition
            | StatusCode::OutOfRange
            | StatusCode::Unimplemented
            | StatusCode::DataLoss => ErrorCategory::NonRetryable,
        }
    }
}

impl From<RawStatus> for Status {
    fn from(raw: RawStatus) -> Self {
        Self {
            code: StatusCode::from_raw(raw.code),
            message: raw.message,
            details: raw.details,
        }
    }
}
