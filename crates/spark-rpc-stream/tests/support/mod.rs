//! 集成测试共享的观察者与流构造工具。

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_rpc_stream::{
    Generation, GenerationCounter, RpcStream, Status, StreamConfig, StreamObserver,
};
use spark_rpc_transport::testing::{ScriptController, scripted_call};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Start,
    Read(Bytes),
    Error(Status),
}

/// 记录所有回调的观察者；可配置为在收到消息时推进代际。
#[derive(Default)]
pub struct RecordingObserver {
    generation: GenerationCounter,
    events: Mutex<Vec<Event>>,
    bump_on_read: AtomicBool,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn reads(&self) -> Vec<Bytes> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Read(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn bump_generation(&self) -> Generation {
        self.generation.advance()
    }

    /// 下一次 `on_stream_read` 内推进代际，模拟观察者在回调中失去兴趣。
    pub fn lose_interest_on_next_read(&self) {
        self.bump_on_read.store(true, Ordering::Release);
    }
}

impl StreamObserver for RecordingObserver {
    fn on_stream_start(&self) {
        self.events.lock().push(Event::Start);
    }

    fn on_stream_read(&self, message: &Bytes) {
        self.events.lock().push(Event::Read(message.clone()));
        if self.bump_on_read.swap(false, Ordering::AcqRel) {
            self.generation.advance();
        }
    }

    fn on_stream_error(&self, status: &Status) {
        self.events.lock().push(Event::Error(status.clone()));
    }

    fn generation(&self) -> Generation {
        self.generation.current()
    }
}

pub struct Harness {
    pub stream: RpcStream,
    pub controller: ScriptController,
    pub observer: Arc<RecordingObserver>,
}

/// 构造尚未启动的流。
pub fn harness() -> Harness {
    let (context, call, controller) = scripted_call();
    let observer = RecordingObserver::new();
    let stream = RpcStream::new(
        context,
        call,
        observer.clone(),
        StreamConfig::new().with_label("test"),
    );
    Harness {
        stream,
        controller,
        observer,
    }
}

/// 构造已建立的流：建立完成已分发，监听读已挂起。
pub fn open_harness() -> Harness {
    let mut harness = harness();
    harness.stream.start().expect("start");
    assert!(harness.controller.complete_start());
    assert_eq!(harness.stream.run_pending(), 1);
    harness
}

pub fn msg(text: &'static str) -> Bytes {
    Bytes::from_static(text.as_bytes())
}
