// src/display/tests.rs

use super::messages::ImageId;
use super::waker::ChannelWaker;
use super::*;
use crate::channel::{FrameChannel, FrameReceiver, Message, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::config::Config;
use crate::frame::{Frame, FramePayload};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Outcome = anyhow::Result<(RenderSummary, LoopState)>;

/// A render loop over a headless driver, running on its own thread, and the
/// producer's end of its channel.
struct Session {
    producer: FrameChannel<UnixStream, UnixStream>,
    raw: UnixStream,
    handle: HeadlessHandle,
    render_thread: JoinHandle<Outcome>,
}

impl Session {
    fn start(config: Config) -> Self {
        let (producer_end, display_end) = UnixStream::pair().unwrap();
        let raw = producer_end.try_clone().unwrap();
        let producer = FrameChannel::new(
            producer_end.try_clone().unwrap(),
            producer_end,
            DEFAULT_MAX_PAYLOAD_BYTES,
        );
        let display = FrameChannel::new(
            display_end.try_clone().unwrap(),
            display_end,
            DEFAULT_MAX_PAYLOAD_BYTES,
        );

        let driver = HeadlessDisplayDriver::new(HeadlessOptions::default()).unwrap();
        let handle = driver.handle();
        let render_thread = thread::spawn(move || {
            let mut render_loop = RenderLoop::start(driver, display, &config)?;
            let summary = render_loop.run()?;
            Ok((summary, render_loop.state()))
        });

        Self {
            producer,
            raw,
            handle,
            render_thread,
        }
    }

    fn wait_for_history(&self, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.handle.history().len() < len {
            assert!(Instant::now() < deadline, "display never rendered {} frame(s)", len);
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn join(self) -> Outcome {
        let Session {
            producer,
            raw,
            render_thread,
            ..
        } = self;
        let outcome = render_thread.join().unwrap();
        drop((producer, raw));
        outcome
    }
}

fn fast_shutdown() -> Config {
    let mut config = Config::default();
    config.shutdown.handshake_timeout_ms = 50;
    config.shutdown.listener_join_timeout_ms = 50;
    config
}

fn solid(title: &str, width: u32, height: u32, value: u8) -> Frame {
    Frame::new(title, width, height, vec![value; (width * height * 3) as usize]).unwrap()
}

#[test_log::test]
fn it_should_render_frames_in_send_order() {
    let mut session = Session::start(Config::default());
    let frames: Vec<Frame> = (0..5u8)
        .map(|i| solid(&format!("frame {}", i), 4 + i as u32, 3, i * 40))
        .collect();

    for frame in &frames {
        session.producer.sender.send_frame(frame).unwrap();
    }
    session.producer.sender.send_exit().unwrap();

    let handle = session.handle.clone();
    let (summary, state) = session.join().unwrap();
    assert_eq!(summary.cause, ShutdownCause::ProducerExit);
    assert_eq!(summary.frames_rendered, 5);
    assert_eq!(summary.frames_dropped, 0);
    assert_eq!(state, LoopState::Terminated);

    let history = handle.history();
    assert_eq!(history.len(), frames.len());
    for (record, frame) in history.iter().zip(&frames) {
        assert_eq!(record.title, frame.title());
        assert_eq!((record.width, record.height), (frame.width(), frame.height()));
        assert_eq!(record.digest, pixel_digest(frame.pixels()));
    }
    assert_eq!(handle.title(), "frame 4");
    assert_eq!(handle.canvas_size(), Some((8, 3)));
    assert!(handle.is_destroyed());
}

#[test_log::test]
fn it_should_update_one_image_item_in_place() {
    let mut session = Session::start(Config::default());
    session.producer.sender.send_frame(&solid("a", 2, 2, 1)).unwrap();
    session.producer.sender.send_frame(&solid("b", 2, 2, 2)).unwrap();
    session.producer.sender.send_exit().unwrap();

    let handle = session.handle.clone();
    session.join().unwrap();
    assert_eq!(handle.history().len(), 2);
    assert_eq!(handle.raised_image(), Some(ImageId(1)));
    assert_eq!(handle.image_pixels().unwrap(), vec![2u8; 12].into_boxed_slice());
}

#[test_log::test]
fn it_should_skip_a_malformed_frame_and_keep_rendering() {
    let mut session = Session::start(Config::default());

    // Title length says 200 bytes, only two follow.
    let truncated = FramePayload::from_bytes(vec![0, 0, 0, 200, b'h', b'i']);
    session.producer.send(&Message::Frame(truncated)).unwrap();
    let good = solid("after", 3, 3, 9);
    session.producer.sender.send_frame(&good).unwrap();
    session.producer.sender.send_exit().unwrap();

    let handle = session.handle.clone();
    let (summary, _) = session.join().unwrap();
    assert_eq!(summary.frames_dropped, 1);
    assert_eq!(summary.frames_rendered, 1);
    let history = handle.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].title, "after");
}

#[test_log::test]
fn it_should_complete_the_exit_handshake_when_the_window_closes() {
    let mut session = Session::start(Config::default());
    session.producer.sender.send_frame(&solid("closing", 2, 2, 0)).unwrap();
    session.wait_for_history(1);

    session.handle.request_close().unwrap();
    assert_eq!(session.producer.receive().unwrap(), Message::Exit);
    session.producer.sender.send_exit().unwrap();

    let handle = session.handle.clone();
    let started = Instant::now();
    let (summary, _) = session.join().unwrap();
    assert_eq!(summary.cause, ShutdownCause::WindowClosed);
    assert!(handle.is_destroyed());
    // The listener saw the reply and stopped before the window went away.
    assert_eq!(handle.late_wakes(), 0);
    // The reply ends the wait well before the default handshake timeout.
    assert!(started.elapsed() < Config::default().shutdown.handshake_timeout());
}

#[test_log::test]
fn it_should_terminate_when_the_producer_never_answers_the_close() {
    let session = Session::start(fast_shutdown());
    session.handle.request_close().unwrap();

    let (summary, state) = session.join().unwrap();
    assert_eq!(summary.cause, ShutdownCause::WindowClosed);
    assert_eq!(state, LoopState::Terminated);
}

#[test_log::test]
fn it_should_stop_when_the_producer_disconnects() {
    let session = Session::start(Config::default());
    let Session {
        producer,
        raw,
        handle,
        render_thread,
    } = session;
    drop((producer, raw));

    let (summary, _) = render_thread.join().unwrap().unwrap();
    assert_eq!(summary.cause, ShutdownCause::ChannelClosed);
    assert!(handle.is_destroyed());
    assert_eq!(handle.late_wakes(), 0);
}

#[test_log::test]
fn it_should_stop_the_listener_before_destroying_the_window() {
    let mut session = Session::start(Config::default());
    session.producer.sender.send_frame(&solid("last", 2, 2, 7)).unwrap();
    session.wait_for_history(1);

    // Frames still arriving while the window closes must not wake it later.
    session.handle.request_close().unwrap();
    for i in 0..20u8 {
        if session.producer.sender.send_frame(&solid("late", 2, 2, i)).is_err() {
            break;
        }
    }
    assert_eq!(session.producer.receive().unwrap(), Message::Exit);
    session.producer.sender.send_exit().unwrap();

    let handle = session.handle.clone();
    let (summary, state) = session.join().unwrap();
    assert_eq!(summary.cause, ShutdownCause::WindowClosed);
    assert_eq!(state, LoopState::Terminated);
    assert!(handle.is_destroyed());
    assert_eq!(handle.late_wakes(), 0);
}

#[test_log::test]
fn it_should_report_a_corrupt_channel_upstream() {
    let mut session = Session::start(Config::default());
    session.raw.write_all(&[0x7f]).unwrap();

    // The display tells the producer it is going away.
    assert_eq!(session.producer.receive().unwrap(), Message::Exit);

    let (summary, _) = session.join().unwrap();
    assert!(matches!(summary.cause, ShutdownCause::ChannelFailed(_)));
    assert!(summary.cause.is_abnormal());
}

#[test_log::test]
fn it_should_time_out_joining_a_listener_stuck_mid_message() {
    let mut session = Session::start(fast_shutdown());
    // A FRAME opcode and part of its length prefix, then nothing.
    session.raw.write_all(&[0x01, 0, 0]).unwrap();
    thread::sleep(Duration::from_millis(20));

    session.handle.request_close().unwrap();
    let Session {
        producer,
        raw,
        render_thread,
        ..
    } = session;
    let err = render_thread.join().unwrap().unwrap_err();
    assert_eq!(
        err.downcast_ref::<ShutdownError>(),
        Some(&ShutdownError::ListenerJoinTimeout(Duration::from_millis(50)))
    );
    drop((producer, raw));
}

fn idle_listener() -> (UnixStream, Listener, Arc<PendingQueue>) {
    let (producer_end, display_end) = UnixStream::pair().unwrap();
    let queue = Arc::new(PendingQueue::new());
    let (events_tx, _events_rx) = mpsc::channel();
    let listener = Listener::spawn(
        FrameReceiver::new(display_end, DEFAULT_MAX_PAYLOAD_BYTES),
        Arc::clone(&queue),
        Box::new(ChannelWaker::new(events_tx)),
    )
    .unwrap();
    (producer_end, listener, queue)
}

#[test_log::test]
fn it_should_stop_an_idle_listener_between_messages() {
    let (_producer_end, mut listener, queue) = idle_listener();

    listener.stop();
    listener.join_timeout(Duration::from_secs(1)).unwrap();
    assert!(listener.is_finished());
    assert!(queue.is_empty());
}

#[test_log::test]
fn it_should_begin_shutdown_exactly_once() {
    let (_producer_end, listener, _queue) = idle_listener();
    let mut coordinator = ShutdownCoordinator::new(listener, &Config::default().shutdown);

    assert!(!coordinator.has_begun());
    assert!(coordinator.begin(ShutdownCause::WindowClosed));
    assert!(!coordinator.begin(ShutdownCause::ProducerExit));
    assert!(!coordinator.begin(ShutdownCause::ChannelClosed));
    assert_eq!(coordinator.cause(), Some(&ShutdownCause::WindowClosed));

    coordinator.finish().unwrap();
    coordinator.finish().unwrap();
}

#[test_log::test]
fn it_should_queue_frames_and_the_stop_from_the_listener() {
    let (producer_end, mut listener, queue) = idle_listener();
    let mut producer = FrameChannel::new(
        producer_end.try_clone().unwrap(),
        producer_end,
        DEFAULT_MAX_PAYLOAD_BYTES,
    );
    let first = solid("one", 1, 1, 1);
    let second = solid("two", 1, 1, 2);
    producer.sender.send_frame(&first).unwrap();
    producer.sender.send_frame(&second).unwrap();
    producer.sender.send_exit().unwrap();

    listener.join_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(queue.pop(), Some(Pending::Frame(FramePayload::encode(&first))));
    assert_eq!(queue.pop(), Some(Pending::Frame(FramePayload::encode(&second))));
    assert_eq!(queue.pop(), Some(Pending::Stop(ShutdownCause::ProducerExit)));
    assert_eq!(queue.pop(), None);
}
