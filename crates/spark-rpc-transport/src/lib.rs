#![deny(unsafe_code)]
#![doc = "spark-rpc-transport: 双向流式 RPC 调用的传输能力契约。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：流生命周期层只关心“发起操作、稍后收到一次完成”这一异步原语，具体 RPC 栈（gRPC、HTTP/2 自研实现、测试脚本）需要一个共同语言。"]
#![doc = "- **What**：定义非拥有的调用句柄 [`StreamingCall`]、拥有型上下文 [`CallContext`]、一次性完成句柄 [`Completion`]、终止状态 [`RawStatus`] 与响应元数据 [`MetadataMap`]。"]
#![doc = "- **How**：每个操作携带一个 `Completion`，实现方可在任意线程上恰好解析一次；未解析即被丢弃的句柄按失败处理，保证“恰好一次”。"]

/// 传输层契约内部使用的统一返回别名。
///
/// 与 `core::result::Result` 完全等价，调用者需在签名中显式声明错误类型。
pub type Result<T, E> = core::result::Result<T, E>;

pub mod call;
pub mod completion;
pub mod status;
#[cfg(feature = "test-util")]
pub mod testing;

pub use call::{CallContext, StreamingCall};
pub use completion::{CallFailure, Completion};
pub use status::{MetadataMap, RawStatus};
