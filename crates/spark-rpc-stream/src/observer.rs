use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::Status;

/// 观察者的代际编号。
///
/// 流在构造时快照观察者的代际；完成事件到达时若观察者已进入新的代际，则该完成被静默吸收。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// 下一个代际。
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 流事件的观察者。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 作为流向外投递事件的唯一通道：建立、收到消息、终止错误；
/// - `generation` 提供“是否仍有人关心”的弱兴趣判断，替代对观察者的引用计数。
///
/// ## 契约（What）
/// - 所有回调都在拥有流的串行执行器上同步调用；
/// - 回调不得重入流（流的方法均需 `&mut self`，编译期即排除重入）；
///   若观察者在回调内失去兴趣，应推进自身代际，并在回调返回后由拥有者结束流；
/// - `generation` 必须单调不减；
/// - 代际不匹配或调用方主动 `finish` 之后，流不会再调用任何回调。
pub trait StreamObserver: Send + Sync {
    /// 流已成功建立。
    fn on_stream_start(&self);

    /// 收到一条服务端消息。
    fn on_stream_read(&self, message: &Bytes);

    /// 流被中断；所有错误均不可恢复。
    fn on_stream_error(&self, status: &Status);

    /// 当前代际。
    fn generation(&self) -> Generation;
}

/// 观察者可直接内嵌的代际计数器。
#[derive(Debug, Default)]
pub struct GenerationCounter {
    value: AtomicU64,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Generation {
        Generation(self.value.load(Ordering::Acquire))
    }

    /// 推进代际并返回新值，之前创建的流随即失去该观察者的兴趣。
    pub fn advance(&self) -> Generation {
        Generation(self.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }
}
