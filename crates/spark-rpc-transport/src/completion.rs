use std::borrow::Cow;

use thiserror::Error;

/// 单个传输操作的失败信号。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 对应底层 RPC 栈中“操作未成功”（例如 gRPC 完成队列返回 `ok = false`）的布尔信号；
/// - 失败本身不携带终止状态，最终状态需要通过 `finish` 操作另行取回。
///
/// ## 契约（What）
/// - `reason`：面向排障的描述，不参与任何控制流判断；
/// - [`CallFailure::cancelled`]：上下文被取消后，实现方解析挂起操作时使用；
/// - [`CallFailure::abandoned`]：`Completion` 未被解析即被丢弃时自动使用。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("transport operation failed: {reason}")]
pub struct CallFailure {
    reason: Cow<'static, str>,
}

impl CallFailure {
    /// 以自定义原因构造失败。
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// 上下文已取消。
    pub fn cancelled() -> Self {
        Self::new("call cancelled")
    }

    /// 完成句柄在未解析的情况下被丢弃。
    pub fn abandoned() -> Self {
        Self::new("completion dropped without being resolved")
    }

    /// 获取失败原因。
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

type Deliver<T> = Box<dyn FnOnce(crate::Result<T, CallFailure>) + Send + 'static>;

/// 一次性完成句柄：每个传输操作恰好解析一次。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 传输实现通常在内部线程（如完成队列轮询线程）上得知操作结果，需要一个可跨线程移动、
///   且不持有调用句柄引用的回报通道；
/// - 通过把“回报”封装为装箱闭包，流层可以决定如何把结果送回串行执行器，传输层无需感知。
///
/// ## 契约（What）
/// - [`succeed`](Self::succeed)/[`fail`](Self::fail)/[`complete`](Self::complete) 消耗句柄并触发回报；
/// - **后置条件**：若句柄在解析前被 `Drop`，将以 [`CallFailure::abandoned`] 自动回报，
///   因此上层永远不会等待一个“消失”的操作；
/// - 句柄为 `Send`，可在任意线程解析。
///
/// ## 风险提示（Trade-offs）
/// - 回报闭包在解析线程上同步执行，实现方不应在持有内部锁时解析句柄，以免回报逻辑与锁竞争。
pub struct Completion<T> {
    deliver: Option<Deliver<T>>,
}

impl<T> Completion<T> {
    /// 以回报闭包构造完成句柄。
    pub fn new<F>(deliver: F) -> Self
    where
        F: FnOnce(crate::Result<T, CallFailure>) + Send + 'static,
    {
        Self {
            deliver: Some(Box::new(deliver)),
        }
    }

    /// 以成功结果解析。
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    /// 以失败解析。
    pub fn fail(self, failure: CallFailure) {
        self.complete(Err(failure));
    }

    /// 以给定结果解析。
    pub fn complete(mut self, result: crate::Result<T, CallFailure>) {
        if let Some(deliver) = self.deliver.take() {
            deliver(result);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Err(CallFailure::abandoned()));
        }
    }
}

impl<T> core::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.deliver.is_none())
            .finish()
    }
}
