use bytes::Bytes;

use crate::{Completion, MetadataMap, RawStatus};

/// 双向流式调用的非拥有句柄。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 抽象“发起操作、稍后完成”的异步读写原语，使流生命周期层与具体 RPC 栈解耦；
/// - 每个方法只负责**发起**操作，结果一律经由传入的 [`Completion`] 回报。
///
/// ## 契约（What）
/// - `start`：建立调用，必须先于任何读写被发起；
/// - `read`：请求下一条入站消息；调用方保证同一时刻至多一个读操作在途；
/// - `write`：发送一条出站消息；调用方保证同一时刻至多一个写操作在途；
/// - `finish`：取回调用的终止状态；对每个调用至多发起一次；
/// - **后置条件**：每个 `Completion` 恰好被解析一次（丢弃即视为失败）。
///
/// ## 风险提示（Trade-offs）
/// - 句柄的底层资源归 [`CallContext`] 所有；拥有者必须先释放句柄，再释放上下文；
/// - 实现可以在调用方线程上同步解析 `Completion`，上层需容忍“发起即完成”。
pub trait StreamingCall: Send + 'static {
    /// 发起建立调用的操作。
    fn start(&mut self, completion: Completion<()>);

    /// 发起读取下一条消息的操作。
    fn read(&mut self, completion: Completion<Bytes>);

    /// 发起写入一条消息的操作。
    fn write(&mut self, message: Bytes, completion: Completion<()>);

    /// 发起取回终止状态的操作。
    fn finish(&mut self, completion: Completion<RawStatus>);
}

/// 调用的拥有型上下文，负责取消与响应元数据。
///
/// - `try_cancel`：尽力取消调用；返回后所有在途操作应尽快完成（通常以失败告终），
///   之后发起的 `finish` 也应尽快给出状态；
/// - `server_initial_metadata`：服务端初始元数据，仅在调用建立后有意义。
pub trait CallContext: Send + 'static {
    /// 尽力取消调用。
    fn try_cancel(&mut self);

    /// 读取服务端返回的初始元数据。
    fn server_initial_metadata(&self) -> MetadataMap;
}
