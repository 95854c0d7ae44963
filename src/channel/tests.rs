// src/channel/tests.rs

use super::wire::{encode_frame_header, OPCODE_EXIT, OPCODE_FRAME};
use super::*;
use crate::frame::{Frame, FramePayload};
use crate::os::poll::set_nonblocking;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

fn pair() -> (
    FrameChannel<UnixStream, UnixStream>,
    FrameChannel<UnixStream, UnixStream>,
) {
    let (a, b) = UnixStream::pair().unwrap();
    let a2 = a.try_clone().unwrap();
    let b2 = b.try_clone().unwrap();
    (
        FrameChannel::new(a, a2, DEFAULT_MAX_PAYLOAD_BYTES),
        FrameChannel::new(b, b2, DEFAULT_MAX_PAYLOAD_BYTES),
    )
}

fn gradient(title: &str, width: u32, height: u32) -> Frame {
    let pixels: Vec<u8> = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
    Frame::new(title, width, height, pixels).unwrap()
}

#[test_log::test]
fn it_should_deliver_a_frame_unchanged() {
    let (mut producer, mut display) = pair();
    let frame = gradient("round trip", 17, 9);

    producer.sender.send_frame(&frame).unwrap();

    match display.receive().unwrap() {
        Message::Frame(payload) => assert_eq!(payload.decode().unwrap(), frame),
        other => panic!("expected a frame, got {:?}", other),
    }
}

#[test_log::test]
fn it_should_deliver_messages_in_send_order() {
    let (mut producer, mut display) = pair();
    let frames: Vec<Frame> = (0..20)
        .map(|i| gradient(&format!("frame {}", i), 3, 2))
        .collect();

    for frame in &frames {
        producer.sender.send_frame(frame).unwrap();
    }
    producer.sender.send_exit().unwrap();

    for expected in &frames {
        match display.receive().unwrap() {
            Message::Frame(payload) => assert_eq!(&payload.decode().unwrap(), expected),
            other => panic!("expected a frame, got {:?}", other),
        }
    }
    assert_eq!(display.receive().unwrap(), Message::Exit);
}

#[test_log::test]
fn it_should_refuse_frames_after_exit() {
    let (mut producer, mut display) = pair();

    producer.sender.send_exit().unwrap();
    let err = producer
        .sender
        .send_frame(&gradient("late", 1, 1))
        .unwrap_err();
    assert!(err.is_closed(), "unexpected error: {}", err);
    assert!(producer.sender.exit_sent());

    // Nothing but the exit token reached the peer.
    assert_eq!(display.receive().unwrap(), Message::Exit);
    drop(producer);
    assert!(display.receive().unwrap_err().is_closed());
}

#[test_log::test]
fn it_should_report_a_clean_close_on_eof_between_messages() {
    let (producer, mut display) = pair();
    drop(producer);
    assert!(matches!(display.receive(), Err(ChannelError::Closed)));
}

#[test_log::test]
fn it_should_report_broken_when_the_peer_dies_mid_message() {
    let (a, b) = UnixStream::pair().unwrap();
    let mut receiver = FrameReceiver::new(b, DEFAULT_MAX_PAYLOAD_BYTES);

    let mut raw = a;
    raw.write_all(&encode_frame_header(64)).unwrap();
    raw.write_all(&[7u8; 10]).unwrap();
    drop(raw);

    match receiver.receive() {
        Err(ChannelError::Broken(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("expected a broken channel, got {:?}", other),
    }
}

#[test_log::test]
fn it_should_reject_unknown_opcodes() {
    let (mut raw, b) = UnixStream::pair().unwrap();
    let mut receiver = FrameReceiver::new(b, DEFAULT_MAX_PAYLOAD_BYTES);

    raw.write_all(&[0x7f]).unwrap();
    assert!(matches!(
        receiver.receive(),
        Err(ChannelError::UnknownOpcode(0x7f))
    ));
}

#[test_log::test]
fn it_should_reject_a_length_above_the_limit_without_allocating() {
    let (mut raw, b) = UnixStream::pair().unwrap();
    let mut receiver = FrameReceiver::new(b, 1024);

    raw.write_all(&encode_frame_header(u64::MAX)).unwrap();
    match receiver.receive() {
        Err(ChannelError::PayloadTooLarge { len, limit }) => {
            assert_eq!(len, u64::MAX);
            assert_eq!(limit, 1024);
        }
        other => panic!("expected an oversized payload error, got {:?}", other),
    }
}

#[test_log::test]
fn it_should_not_mistake_payload_bytes_for_opcodes() {
    // A payload made entirely of exit and frame opcodes.
    let (mut producer, mut display) = pair();
    let tricky = FramePayload::from_bytes(vec![OPCODE_EXIT, OPCODE_FRAME, OPCODE_EXIT]);

    producer.send(&Message::Frame(tricky.clone())).unwrap();
    producer.send(&Message::Exit).unwrap();

    assert_eq!(display.receive().unwrap(), Message::Frame(tricky));
    assert_eq!(display.receive().unwrap(), Message::Exit);
}

#[test_log::test]
fn it_should_carry_an_empty_frame_payload() {
    let (mut producer, mut display) = pair();
    let empty = FramePayload::from_bytes(Vec::new());

    producer.send(&Message::Frame(empty.clone())).unwrap();
    assert_eq!(display.receive().unwrap(), Message::Frame(empty));
}

#[test_log::test]
fn it_should_work_in_both_directions() {
    let (mut producer, mut display) = pair();

    display.send(&Message::Exit).unwrap();
    assert_eq!(producer.receive().unwrap(), Message::Exit);

    producer.sender.send_frame(&gradient("down", 2, 2)).unwrap();
    assert!(matches!(display.receive().unwrap(), Message::Frame(_)));
}

#[test_log::test]
fn it_should_give_up_on_a_peer_that_stops_reading() {
    let (tx, _rx) = UnixStream::pair().unwrap();
    set_nonblocking(&tx).unwrap();
    let mut sender = FrameSender::new(tx);
    // Far larger than any socket buffer.
    let frame = gradient("stuck", 1024, 1024);

    let started = Instant::now();
    let err = sender
        .send_frame_before(&frame, started + Duration::from_millis(100))
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        ChannelError::WriteTimedOut { written, len } => assert!(written < len),
        other => panic!("expected a write timeout, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(5));
}

#[test_log::test]
fn it_should_finish_a_bounded_send_while_the_peer_drains() {
    let (tx, rx) = UnixStream::pair().unwrap();
    set_nonblocking(&tx).unwrap();
    let mut sender = FrameSender::new(tx);
    let frame = gradient("large", 512, 512);

    let reader = thread::spawn(move || {
        let mut receiver = FrameReceiver::new(rx, DEFAULT_MAX_PAYLOAD_BYTES);
        (receiver.receive().unwrap(), receiver.receive().unwrap())
    });
    let deadline = Instant::now() + Duration::from_secs(10);
    sender.send_frame_before(&frame, deadline).unwrap();
    sender.send_exit_before(deadline).unwrap();
    assert!(sender.exit_sent());

    let (first, second) = reader.join().unwrap();
    assert_eq!(first, Message::Frame(FramePayload::encode(&frame)));
    assert_eq!(second, Message::Exit);
}
