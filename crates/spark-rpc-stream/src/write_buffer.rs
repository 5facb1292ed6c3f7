use std::collections::VecDeque;

use bytes::Bytes;

/// 保证“同一时刻至多一个写操作在途”的先进先出写缓冲。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 底层调用不允许并发写；调用方却可能在任意时刻提交消息（包括流尚未建立时），
///   因此需要一个排队层把“提交”与“发出”解耦。
///
/// ## 契约（What）
/// - `enqueue`/`open`/`next_write` 在可以发出写时返回下一条消息，并将缓冲标记为“有在途写”；
///   调用方必须把返回的消息交给传输层，并在写完成后调用 [`WriteBuffer::on_write_complete`]；
/// - 打开之前只排队不发出；
/// - `discard_unstarted` 丢弃所有尚未发出的消息，不影响在途写。
///
/// ## 实现（How）
/// - `VecDeque` 维持提交顺序，`active` 标志位表示在途写；二者共同保证顺序与并发上限。
#[derive(Debug, Default)]
pub struct WriteBuffer {
    queue: VecDeque<Bytes>,
    open: bool,
    active: bool,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条消息；若此刻可以发出写，返回应发出的消息。
    pub fn enqueue(&mut self, message: Bytes) -> Option<Bytes> {
        self.queue.push_back(message);
        self.next_write()
    }

    /// 打开缓冲，此后允许发出写。
    pub fn open(&mut self) -> Option<Bytes> {
        self.open = true;
        self.next_write()
    }

    /// 若已打开且无在途写，取出队首消息并标记为在途。
    pub fn next_write(&mut self) -> Option<Bytes> {
        if !self.open || self.active {
            return None;
        }
        let message = self.queue.pop_front()?;
        self.active = true;
        Some(message)
    }

    /// 在途写已完成（无论成败）。
    pub fn on_write_complete(&mut self) {
        self.active = false;
    }

    /// 丢弃全部未发出的消息，返回丢弃数量。
    pub fn discard_unstarted(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }

    /// 排队中（未发出）的消息数。
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn has_active_write(&self) -> bool {
        self.active
    }
}
