#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use pixstream_engine::device::{DeviceCapabilities, MapAccess, SoftwareDevice, TransferDevice};
use pixstream_engine::format::Bgra8;
use pixstream_engine::stream::{FrameLease, StreamHandler};

/// What a handler observed for one frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Seen {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Top-left pixel after the handler touched the frame.
    pub first: Bgra8,
}

/// Handler that records every frame and keeps the newest `keep` leases.
///
/// Older leases are released as new frames arrive. Upload frames are filled
/// with [`shade`] of their index before being stored.
pub struct Recorder {
    pub width: u32,
    pub height: u32,
    pub keep: usize,
    pub held: Arc<Mutex<VecDeque<FrameLease>>>,
    pub seen: Vec<Seen>,
}

impl Recorder {
    pub fn new(width: u32, height: u32, keep: usize) -> Self {
        Self {
            width,
            height,
            keep,
            held: Arc::new(Mutex::new(VecDeque::new())),
            seen: Vec::new(),
        }
    }

    /// Releases every outstanding lease.
    pub fn release_all(&self) {
        self.held.lock().clear();
    }

    pub fn outstanding(&self) -> usize {
        self.held.lock().len()
    }

    pub fn colours(&self) -> Vec<Bgra8> {
        self.seen.iter().map(|seen| seen.first).collect()
    }
}

impl StreamHandler for Recorder {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn process(&mut self, mut frame: FrameLease) {
        let layout = frame.layout();
        if frame.access() == MapAccess::Write {
            let value = shade(frame.index());
            layout.fill(&mut frame.bytes_mut(), value);
        }
        let first = layout.row(&frame.bytes(), 0)[0];

        self.seen.push(Seen {
            index: frame.index(),
            width: frame.width(),
            height: frame.height(),
            first,
        });

        let mut held = self.held.lock();
        held.push_back(frame);
        while held.len() > self.keep {
            held.pop_front();
        }
    }
}

/// Colour written into upload frame `index`.
pub fn shade(index: u64) -> Bgra8 {
    Bgra8::new(index as u8, 100, 200, 255)
}

pub fn colour(n: u8) -> Bgra8 {
    Bgra8::new(n, 255 - n, n / 2, 255)
}

/// The three transfer paths: pinned memory with fences, mapping with GPU
/// buffer copies, mapping without them.
pub fn devices() -> Vec<(&'static str, SoftwareDevice)> {
    let all = SoftwareDevice::new().capabilities();
    vec![
        ("pinned", SoftwareDevice::new()),
        (
            "mapped",
            SoftwareDevice::with_capabilities(DeviceCapabilities {
                pinned_memory: false,
                ..all
            }),
        ),
        (
            "mapped without buffer copies",
            SoftwareDevice::with_capabilities(DeviceCapabilities {
                pinned_memory: false,
                buffer_copy: false,
                ..all
            }),
        ),
    ]
}
