//! 流生命周期的场景测试：以脚本化传输驱动任意完成交错。

mod support;

use std::sync::Arc;

use spark_rpc_stream::{
    ErrorCategory, RawStatus, RpcStream, StatusCode, StreamConfig, StreamError, StreamObserver,
    StreamState, WriteDisposition,
};
use spark_rpc_transport::MetadataMap;
use spark_rpc_transport::testing::{IssueCounts, scripted_call};
use support::{Event, RecordingObserver, harness, msg, open_harness};

#[test]
fn start_issues_exactly_one_start_operation() {
    let mut h = harness();
    h.stream.start().expect("start");
    assert_eq!(h.stream.state(), StreamState::Starting);
    assert!(h.controller.has_pending_start());
    assert_eq!(h.controller.counts().starts, 1);
    assert_eq!(h.controller.counts().reads, 0);
    assert!(h.observer.events().is_empty());
    h.stream.finish().expect("finish");
}

#[test]
fn second_start_is_rejected() {
    let mut h = open_harness();
    let err = h.stream.start().expect_err("second start");
    assert_eq!(
        err,
        StreamError::AlreadyStarted {
            state: StreamState::Open
        }
    );
    assert_eq!(err.code(), "rpc.stream.already_started");
    h.stream.finish().expect("finish");
}

#[test]
fn open_notifies_start_once_and_issues_one_read() {
    let mut h = open_harness();
    assert_eq!(h.stream.state(), StreamState::Open);
    assert_eq!(h.observer.events(), vec![Event::Start]);
    assert_eq!(h.controller.counts().reads, 1);
    assert_eq!(h.controller.outstanding_reads(), 1);
    h.stream.finish().expect("finish");
}

#[test]
fn reads_are_delivered_in_order_and_rearmed_one_at_a_time() {
    let mut h = open_harness();
    let listening = h.controller.counts().reads;

    assert!(h.controller.deliver_read("A"));
    assert!(
        !h.controller.deliver_read("B"),
        "only one read may be outstanding"
    );
    assert_eq!(h.stream.run_pending(), 1);
    assert!(h.controller.deliver_read("B"));
    assert_eq!(h.stream.run_pending(), 1);

    assert_eq!(h.observer.reads(), vec![msg("A"), msg("B")]);
    assert_eq!(h.controller.counts().reads - listening, 2);
    assert_eq!(h.controller.max_outstanding_reads(), 1);
    assert_eq!(h.stream.stats().messages_read, 2);
    h.stream.finish().expect("finish");
}

#[test]
fn writes_are_fifo_with_one_in_flight() {
    let mut h = open_harness();
    assert_eq!(h.stream.write(msg("X")), Ok(WriteDisposition::Issued));
    assert_eq!(h.stream.write(msg("Y")), Ok(WriteDisposition::Buffered));
    assert_eq!(h.controller.written(), vec![msg("X")]);
    assert_eq!(h.controller.outstanding_writes(), 1);

    assert_eq!(h.controller.complete_write(), Some(msg("X")));
    assert_eq!(h.stream.run_pending(), 1);
    assert_eq!(h.controller.written(), vec![msg("X"), msg("Y")]);

    assert_eq!(h.controller.complete_write(), Some(msg("Y")));
    h.stream.run_pending();
    assert_eq!(h.controller.max_outstanding_writes(), 1);
    assert_eq!(h.stream.stats().writes_completed, 2);
    assert!(
        h.observer
            .events()
            .iter()
            .all(|event| !matches!(event, Event::Error(_)))
    );
    h.stream.finish().expect("finish");
}

#[test]
fn writes_before_open_are_held_until_start_completes() {
    let mut h = harness();
    assert_eq!(h.stream.write(msg("early")), Ok(WriteDisposition::Buffered));
    h.stream.start().expect("start");
    assert_eq!(h.stream.write(msg("later")), Ok(WriteDisposition::Buffered));
    assert!(h.controller.written().is_empty());

    h.controller.complete_start();
    h.stream.run_pending();
    assert_eq!(h.controller.written(), vec![msg("early")]);
    assert_eq!(h.stream.buffered_writes(), 1);

    h.controller.complete_write();
    h.stream.run_pending();
    assert_eq!(h.controller.written(), vec![msg("early"), msg("later")]);
    h.stream.finish().expect("finish");
}

#[test]
fn generation_change_before_read_completes_suppresses_delivery_and_rearm() {
    let mut h = open_harness();
    let reads_before = h.controller.counts().reads;
    h.observer.bump_generation();

    h.controller.deliver_read("late");
    h.stream.run_pending();

    assert!(h.observer.reads().is_empty());
    assert_eq!(h.controller.counts().reads, reads_before);
    assert_eq!(h.stream.stats().absorbed_completions, 1);
    h.stream.finish().expect("finish");
}

#[test]
fn observer_losing_interest_inside_read_callback_stops_listening() {
    let mut h = open_harness();
    let reads_before = h.controller.counts().reads;
    h.observer.lose_interest_on_next_read();

    h.controller.deliver_read("last");
    h.stream.run_pending();

    assert_eq!(h.observer.reads(), vec![msg("last")]);
    assert_eq!(h.controller.counts().reads, reads_before);
    assert_eq!(h.controller.outstanding_reads(), 0);
    h.stream.finish().expect("finish");
}

#[test]
fn stale_write_completion_does_not_resume_the_buffer() {
    let mut h = open_harness();
    h.stream.write(msg("X")).expect("write");
    h.stream.write(msg("Y")).expect("write");
    h.observer.bump_generation();

    h.controller.complete_write();
    h.stream.run_pending();
    assert_eq!(h.controller.written(), vec![msg("X")]);
    h.stream.finish().expect("finish");
    assert_eq!(h.controller.written(), vec![msg("X")]);
}

#[test]
fn write_behind_a_stale_backlog_is_reported_as_buffered() {
    let mut h = open_harness();
    h.stream.write(msg("X")).expect("write");
    h.stream.write(msg("Y")).expect("write");
    h.observer.bump_generation();
    h.controller.complete_write();
    h.stream.run_pending();

    // 空出的在途位置由更早排队的 Y 占用，Z 仍在排队
    assert_eq!(h.stream.write(msg("Z")), Ok(WriteDisposition::Buffered));
    assert_eq!(h.controller.written(), vec![msg("X"), msg("Y")]);
    assert_eq!(h.stream.buffered_writes(), 1);
    h.stream.finish().expect("finish");
}

#[test]
fn stale_operation_failure_is_absorbed() {
    let mut h = open_harness();
    h.observer.bump_generation();

    assert!(h.controller.fail_read());
    assert_eq!(h.stream.run_pending(), 1);

    assert_eq!(h.stream.state(), StreamState::Open);
    assert_eq!(h.controller.counts().finishes, 0);
    assert!(!h.controller.has_pending_finish());
    assert_eq!(h.observer.events(), vec![Event::Start]);
    assert_eq!(h.stream.stats().absorbed_completions, 1);
    h.stream.finish().expect("finish");
    assert_eq!(h.observer.events(), vec![Event::Start]);
}

#[test]
fn write_failure_escalates_to_server_finish_and_reports_error() {
    let mut h = open_harness();
    h.stream.write(msg("X")).expect("write");
    h.stream.write(msg("Y")).expect("write");

    assert_eq!(h.controller.fail_write(), Some(msg("X")));
    h.stream.run_pending();
    assert_eq!(h.stream.state(), StreamState::Finishing);
    assert_eq!(h.stream.buffered_writes(), 0);
    assert!(h.controller.has_pending_finish());
    assert_eq!(h.controller.written(), vec![msg("X")]);

    assert!(h.controller.finish_with(RawStatus::new(8, "quota exceeded")));
    h.stream.run_pending();
    assert!(h.stream.is_finished());
    match h.observer.events().as_slice() {
        [Event::Start, Event::Error(status)] => {
            assert_eq!(status.code(), StatusCode::ResourceExhausted);
            assert_eq!(status.category(), ErrorCategory::ResourceExhausted);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[test]
fn read_failure_escalates_to_server_finish_and_reports_error() {
    let mut h = open_harness();
    h.stream.write(msg("X")).expect("write");
    h.stream.write(msg("Y")).expect("write");

    assert!(h.controller.fail_read());
    h.stream.run_pending();
    assert_eq!(h.stream.state(), StreamState::Finishing);
    assert!(h.controller.has_pending_finish());
    assert_eq!(h.stream.buffered_writes(), 0);

    assert!(h.controller.finish_with(RawStatus::new(14, "connection reset")));
    // 在途写随后完成，不应引发新的写
    h.controller.complete_write();
    h.stream.run_pending();

    assert!(h.stream.is_finished());
    assert_eq!(h.controller.written(), vec![msg("X")]);
    let errors: Vec<_> = h
        .observer
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Error(status) => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), StatusCode::Unavailable);
    assert_eq!(errors[0].message(), "connection reset");
    assert_eq!(errors[0].category(), ErrorCategory::Retryable);
    assert_eq!(h.stream.finish(), Err(StreamError::AlreadyFinished));
}

#[test]
fn start_failure_skips_open_and_reports_status() {
    let mut h = harness();
    h.stream.start().expect("start");
    assert!(h.controller.fail_start());
    h.stream.run_pending();
    assert_eq!(h.stream.state(), StreamState::Finishing);
    assert_eq!(h.controller.counts().reads, 0);

    h.controller.finish_with(RawStatus::new(16, "token expired"));
    h.stream.run_pending();
    assert!(h.stream.is_finished());
    match h.observer.events().as_slice() {
        [Event::Error(status)] => {
            assert_eq!(status.category(), ErrorCategory::Security);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[test]
fn generation_bump_before_server_finish_suppresses_error() {
    let mut h = open_harness();
    h.controller.fail_read();
    h.stream.run_pending();
    assert!(h.controller.has_pending_finish());

    h.observer.bump_generation();
    h.controller.finish_with(RawStatus::new(13, "internal"));
    h.stream.run_pending();

    assert_eq!(h.observer.events(), vec![Event::Start]);
    assert_eq!(h.stream.state(), StreamState::Finishing);
    h.stream.finish().expect("finish");
    assert_eq!(h.observer.events(), vec![Event::Start]);
    assert_eq!(h.controller.counts().finishes, 1);
}

#[test]
fn write_while_finishing_is_dropped() {
    let mut h = open_harness();
    h.controller.fail_read();
    h.stream.run_pending();
    assert_eq!(h.stream.state(), StreamState::Finishing);

    assert_eq!(h.stream.write(msg("Z")), Ok(WriteDisposition::Dropped));
    assert!(h.controller.written().is_empty());
    assert_eq!(h.stream.buffered_writes(), 0);
    h.stream.finish().expect("finish");
    assert_eq!(h.stream.write(msg("Z")), Err(StreamError::AlreadyFinished));
}

#[test]
fn finish_drains_operations_and_never_notifies() {
    let mut h = open_harness();
    h.stream.write(msg("X")).expect("write");
    h.stream.write(msg("Y")).expect("write");
    assert_eq!(h.stream.outstanding_operations(), 2);

    h.stream.finish().expect("finish");

    assert!(h.stream.is_finished());
    assert!(h.controller.is_cancelled());
    assert_eq!(h.stream.outstanding_operations(), 0);
    assert_eq!(h.controller.outstanding_reads(), 0);
    assert_eq!(h.controller.outstanding_writes(), 0);
    assert_eq!(h.controller.written(), vec![msg("X")]);
    assert_eq!(h.controller.counts().finishes, 1);

    // 排空后仍在队列中的完成通知全部被忽略
    h.stream.run_pending();
    assert_eq!(h.observer.events(), vec![Event::Start]);
}

#[test]
fn finish_while_starting_cancels_the_start() {
    let mut h = harness();
    h.stream.start().expect("start");
    h.stream.finish().expect("finish");
    assert!(h.stream.is_finished());
    assert!(!h.controller.has_pending_start());
    assert!(h.observer.events().is_empty());
}

#[test]
fn finish_before_start_issues_nothing() {
    let mut h = harness();
    h.stream.write(msg("buffered")).expect("write");
    h.stream.finish().expect("finish");

    assert!(h.stream.is_finished());
    assert_eq!(h.stream.buffered_writes(), 0);
    assert!(h.observer.events().is_empty());
    assert_eq!(h.controller.counts(), IssueCounts::default());
    assert!(!h.controller.is_cancelled());
    assert_eq!(h.stream.start(), Err(StreamError::AlreadyFinished));
}

#[test]
fn finish_twice_is_an_error() {
    let mut h = open_harness();
    h.stream.finish().expect("finish");
    assert_eq!(h.stream.finish(), Err(StreamError::AlreadyFinished));
}

#[test]
fn write_and_finish_before_start_drops_the_message() {
    let mut h = harness();
    assert_eq!(h.stream.write_and_finish(msg("bye")), Ok(false));
    assert!(h.stream.is_finished());
    assert!(h.controller.written().is_empty());
    assert_eq!(h.controller.counts().writes, 0);
    assert!(h.observer.events().is_empty());
}

#[test]
fn write_and_finish_while_starting_drops_the_message() {
    let mut h = harness();
    h.stream.start().expect("start");
    assert_eq!(h.stream.write_and_finish(msg("bye")), Ok(false));
    assert!(h.stream.is_finished());
    assert_eq!(h.controller.counts().writes, 0);
}

#[test]
fn write_and_finish_discards_backlog_behind_the_in_flight_write() {
    let mut h = open_harness();
    h.controller.set_auto_complete_writes(true);
    // X 已在传输层完成但尚未分发，仍占据在途位置
    assert_eq!(h.stream.write(msg("X")), Ok(WriteDisposition::Issued));
    assert_eq!(h.stream.write(msg("Y")), Ok(WriteDisposition::Buffered));
    assert_eq!(h.stream.write(msg("Z")), Ok(WriteDisposition::Buffered));
    assert_eq!(h.stream.buffered_writes(), 2);

    assert_eq!(h.stream.write_and_finish(msg("bye")), Ok(true));
    assert_eq!(h.controller.written(), vec![msg("X"), msg("bye")]);
    assert_eq!(h.controller.max_outstanding_writes(), 1);
    assert!(h.stream.is_finished());
}

#[test]
fn write_and_finish_while_finishing_drops_the_message() {
    let mut h = open_harness();
    h.controller.fail_read();
    h.stream.run_pending();
    assert_eq!(h.stream.state(), StreamState::Finishing);
    // 非 Open 状态下不再发出最后一条消息
    assert_eq!(h.stream.write_and_finish(msg("bye")), Ok(false));
    assert!(h.controller.written().is_empty());
}

#[test]
fn write_and_finish_reports_delivery_of_final_write() {
    let mut h = open_harness();
    h.controller.set_auto_complete_writes(true);
    h.stream.write(msg("X")).expect("write");
    h.stream.run_pending();

    assert_eq!(h.stream.write_and_finish(msg("bye")), Ok(true));
    assert_eq!(h.controller.written(), vec![msg("X"), msg("bye")]);
    assert!(h.stream.is_finished());
    assert_eq!(h.observer.events(), vec![Event::Start]);
    assert_eq!(
        h.stream.write_and_finish(msg("again")),
        Err(StreamError::AlreadyFinished)
    );
}

#[test]
fn response_headers_are_empty_until_open() {
    let mut h = harness();
    let mut metadata = MetadataMap::new();
    metadata.insert("x-request-id".into(), "req-7".into());
    h.controller.set_metadata(metadata.clone());

    assert!(h.stream.response_headers().is_empty());
    h.stream.start().expect("start");
    assert!(h.stream.response_headers().is_empty());
    h.controller.complete_start();
    h.stream.run_pending();
    assert_eq!(h.stream.response_headers(), metadata);
    h.stream.finish().expect("finish");
    assert_eq!(h.stream.response_headers(), metadata);
}

#[test]
fn server_closing_with_ok_is_still_reported() {
    let mut h = open_harness();
    h.controller.fail_read();
    h.stream.run_pending();
    h.controller.finish_with(RawStatus::ok());
    h.stream.run_pending();
    match h.observer.events().as_slice() {
        [Event::Start, Event::Error(status)] => assert!(status.is_ok()),
        other => panic!("unexpected events: {other:?}"),
    }
}

#[test]
fn stream_accepts_a_type_erased_observer() {
    let (context, call, controller) = scripted_call();
    let recording = RecordingObserver::new();
    let observer: Arc<dyn StreamObserver> = recording.clone();
    let mut stream = RpcStream::new(context, call, observer, StreamConfig::default());

    stream.start().expect("start");
    controller.complete_start();
    stream.run_pending();
    assert_eq!(recording.events(), vec![Event::Start]);
    stream.finish().expect("finish");
}
