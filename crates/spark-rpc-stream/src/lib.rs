#![deny(unsafe_code)]
#![doc = "spark-rpc-stream: 双向流式 RPC 的生命周期与安全层。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：底层 RPC 栈只提供回调式的 start/read/write/finish 原语，且调用句柄不做引用计数；上层同步引擎需要一个一次性、可观察、有序的消息流。"]
#![doc = "- **What**：[`RpcStream`] 独占调用句柄与上下文，按严格前进的状态机发起操作、消费完成，并通过代际比较实现“观察者已失去兴趣”的软取消。"]
#![doc = "- **How**：纯状态机产出副作用列表，驱动层在串行执行器上逐一执行；调用方主动结束时阻塞排空全部在途操作后才释放句柄。"]
#![doc = ""]
#![doc = "== 使用约束 =="]
#![doc = "- 所有公共方法需在同一串行上下文中调用；完成可以在任意线程上到达，经由内部队列回到拥有者。"]
#![doc = "- 观察者回调不得重入流；失去兴趣时推进代际即可，后续完成会被静默吸收。"]

/// 流内部使用的统一返回别名。
///
/// 与 `core::result::Result` 完全等价，调用者需在签名中显式声明错误类型。
pub type Result<T, E> = core::result::Result<T, E>;

mod config;
mod error;
mod executor;
mod machine;
mod observer;
mod operation;
mod stats;
mod status;
mod stream;
mod write_buffer;

pub use config::StreamConfig;
pub use error::StreamError;
pub use machine::StreamState;
pub use observer::{Generation, GenerationCounter, StreamObserver};
pub use operation::OperationKind;
pub use stats::StreamStats;
pub use status::{ErrorCategory, Status, StatusCode};
pub use stream::{RpcStream, WriteDisposition};
pub use write_buffer::WriteBuffer;

pub use spark_rpc_transport::{CallContext, MetadataMap, RawStatus, StreamingCall};
