mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{Recorder, devices, shade};
use pixstream_engine::StreamError;
use pixstream_engine::device::SoftwareDevice;
use pixstream_engine::format::Extent;
use pixstream_engine::logging::init_test_logging;
use pixstream_engine::stream::{StreamConfig, Transfer, UploadStream};

fn stream(device: SoftwareDevice, handler: Recorder, buffers: usize) -> UploadStream<SoftwareDevice, Recorder> {
    UploadStream::new(device, handler, StreamConfig::default().with_buffer_count(buffers))
}

fn shown(stream: &mut UploadStream<SoftwareDevice, Recorder>) -> Option<pixstream_engine::format::Bgra8> {
    stream.bind().unwrap().map(|texture| texture.pixel(0, 0))
}

// ── sampling ──────────────────────────────────────────────────────────────

#[test]
fn produced_frames_reach_the_texture_on_every_path() {
    init_test_logging();
    for (name, device) in devices() {
        let mut stream = stream(device, Recorder::new(3, 2, 1), 3);
        for i in 0..5 {
            assert_eq!(stream.begin_frame().unwrap(), Transfer::Frame(i), "{name}");
            stream.handler().release_all();
            assert_eq!(shown(&mut stream), Some(shade(i)), "{name}");
        }

        let stats = stream.stats();
        assert_eq!(stats.uploads, 5, "{name}");
        assert_eq!(stats.texture_allocations, 1, "{name}");
        assert_eq!(stats.stale_binds, 0, "{name}");

        stream.destroy().unwrap();
        let counters = stream.device().counters();
        assert_eq!(counters.buffers_alive, 0, "{name}");
        assert_eq!(counters.maps, counters.unmaps, "{name}");
    }
}

#[test]
fn bind_before_any_frame_leaves_texture_alone() {
    init_test_logging();
    let mut stream = stream(SoftwareDevice::new(), Recorder::new(4, 4, 1), 2);
    assert!(stream.bind().unwrap().is_none());
    assert_eq!(stream.device().counters().gpu_commands(), 0);
}

#[test]
fn bind_keeps_previous_texture_while_producer_is_busy() {
    init_test_logging();
    for (name, device) in devices() {
        let mut stream = stream(device, Recorder::new(2, 2, usize::MAX), 3);
        stream.begin_frame().unwrap();
        stream.handler().release_all();
        assert_eq!(shown(&mut stream), Some(shade(0)), "{name}");

        stream.begin_frame().unwrap();
        let started = Instant::now();
        assert_eq!(shown(&mut stream), Some(shade(0)), "{name}");
        assert_eq!(shown(&mut stream), Some(shade(0)), "{name}");
        assert!(started.elapsed() < Duration::from_secs(1), "{name}");
        assert_eq!(stream.stats().stale_binds, 2, "{name}");
        assert_eq!(stream.stats().uploads, 1, "{name}");

        stream.handler().release_all();
        assert_eq!(shown(&mut stream), Some(shade(1)), "{name}");
        assert_eq!(stream.stats().uploads, 2, "{name}");
    }
}

#[test]
fn first_bind_after_allocation_waits_for_producer() {
    init_test_logging();
    let mut stream = stream(SoftwareDevice::new(), Recorder::new(2, 2, usize::MAX), 2);
    stream.begin_frame().unwrap();

    let held = Arc::clone(&stream.handler().held);
    let started = Instant::now();
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        held.lock().clear();
    });

    assert_eq!(shown(&mut stream), Some(shade(0)));
    assert!(started.elapsed() >= Duration::from_millis(50));
    releaser.join().unwrap();
    assert_eq!(stream.stats().stalls, 1);
}

// ── back-pressure ─────────────────────────────────────────────────────────

#[test]
fn begin_frame_blocks_once_producer_holds_every_slot() {
    init_test_logging();
    let mut stream = stream(SoftwareDevice::new(), Recorder::new(4, 4, usize::MAX), 2);
    stream.begin_frame().unwrap();
    stream.begin_frame().unwrap();
    assert_eq!(stream.handler().outstanding(), 2);

    let held = Arc::clone(&stream.handler().held);
    let started = Instant::now();
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        held.lock().pop_front();
    });

    assert_eq!(stream.begin_frame().unwrap(), Transfer::Frame(2));
    assert!(started.elapsed() >= Duration::from_millis(100));
    releaser.join().unwrap();

    // The reclaimed slot was uploaded before it was handed out again.
    let stats = stream.stats();
    assert_eq!(stats.stalls, 1);
    assert_eq!(stats.uploads, 1);
    assert_eq!(stream.texture().unwrap().pixel(0, 0), shade(0));

    stream.handler().release_all();
}

// ── sizes and reconfiguration ─────────────────────────────────────────────

#[test]
fn zero_size_is_a_true_no_op() {
    init_test_logging();
    let mut stream = stream(SoftwareDevice::new(), Recorder::new(0, 5, 1), 2);
    for _ in 0..3 {
        assert!(stream.begin_frame().unwrap().is_skipped());
        assert!(stream.bind().unwrap().is_none());
    }
    assert!(stream.handler().seen.is_empty());
    assert_eq!(stream.device().counters().gpu_commands(), 0);
}

#[test]
fn resize_reallocates_texture_on_next_upload() {
    init_test_logging();
    let mut stream = stream(SoftwareDevice::new(), Recorder::new(4, 4, 1), 2);
    stream.begin_frame().unwrap();
    stream.handler().release_all();
    shown(&mut stream);

    stream.handler_mut().width = 6;
    stream.begin_frame().unwrap();
    assert_eq!(stream.texture().unwrap().extent(), Extent::new(4, 4));

    stream.handler().release_all();
    let texture = stream.bind().unwrap().unwrap();
    assert_eq!(texture.extent(), Extent::new(6, 4));
    assert_eq!(texture.pixel(5, 3), shade(1));
    assert_eq!(stream.stats().texture_allocations, 2);
    assert_eq!(stream.stats().reallocations, 2);
}

#[test]
fn buffer_count_change_reallocates_on_next_frame() {
    init_test_logging();
    let mut stream = stream(SoftwareDevice::new(), Recorder::new(4, 4, 1), 2);
    stream.begin_frame().unwrap();
    assert_eq!(stream.device().counters().buffers_alive, 2);

    stream.set_buffer_count(3);
    stream.handler().release_all();
    stream.begin_frame().unwrap();
    assert_eq!(stream.device().counters().buffers_alive, 3);
    assert_eq!(stream.config().buffer_count, 3);
    stream.handler().release_all();
}

// ── teardown and failures ─────────────────────────────────────────────────

#[test]
fn destroy_is_idempotent_and_closes_the_stream() {
    init_test_logging();
    let mut stream = stream(SoftwareDevice::new(), Recorder::new(4, 4, 1), 3);
    stream.begin_frame().unwrap();
    stream.handler().release_all();
    shown(&mut stream);

    stream.destroy().unwrap();
    stream.destroy().unwrap();
    assert!(matches!(stream.begin_frame(), Err(StreamError::Closed)));
    assert!(matches!(stream.bind(), Err(StreamError::Closed)));
    assert!(stream.texture().is_none());
    assert_eq!(stream.device().counters().buffers_alive, 0);
}

#[test]
fn fence_timeout_terminates_the_stream() {
    init_test_logging();
    let device = SoftwareDevice::new();
    let faults = device.clone();
    let mut stream = stream(device, Recorder::new(4, 4, 1), 1);

    stream.begin_frame().unwrap();
    stream.handler().release_all();
    shown(&mut stream);

    faults.stall_fences(true);
    assert!(matches!(
        stream.begin_frame(),
        Err(StreamError::SynchronizationTimeout { .. })
    ));
    assert!(matches!(stream.begin_frame(), Err(StreamError::Closed)));

    faults.stall_fences(false);
    stream.destroy().unwrap();
    assert_eq!(faults.counters().buffers_alive, 0);
}
