//! Headless pixel streaming demo.
//!
//! Renders a cycling colour, reads every frame back to a consumer thread and
//! feeds frames from a producer thread into an upload texture, logging the
//! throughput once per second.
//!
//! ```bash
//! RUST_LOG=pixstream_engine=debug cargo run -p pixstream-demo -- --buffers 3 --samples 4
//! cargo run -p pixstream-demo -- --backend software --frames 1000
//! ```

mod scene;

use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pixstream_engine::device::{Gpu, GpuInit, SoftwareDevice, WgpuDevice};
use pixstream_engine::format::Bgra8;
use pixstream_engine::logging::{LoggingConfig, init_logging};
use pixstream_engine::stream::{FrameLease, ReadbackStream, StreamConfig, StreamHandler, UploadStream};
use pixstream_engine::time::RateMeter;

use scene::Scene;

#[derive(Parser, Debug)]
#[command(name = "pixstream-demo")]
#[command(about = "Streams rendered frames to the host and host frames to a texture")]
struct Args {
    /// Device backend
    #[arg(long, value_enum, default_value_t = Backend::Wgpu)]
    backend: Backend,

    /// Frames to render before exiting
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Transfer buffers per stream
    #[arg(long, default_value_t = 3)]
    buffers: usize,

    /// MSAA samples for the read-back render target
    #[arg(long, default_value_t = 1)]
    samples: u32,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,
}

#[derive(ValueEnum, Debug, Copy, Clone)]
enum Backend {
    Wgpu,
    Software,
}

/// Passes every lease to a worker thread.
struct Forward {
    width: u32,
    height: u32,
    tx: mpsc::Sender<FrameLease>,
}

impl StreamHandler for Forward {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn process(&mut self, frame: FrameLease) {
        // A closed channel drops the lease, which releases it.
        let _ = self.tx.send(frame);
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    let args = Args::parse();
    log::info!("{args:?}");

    match args.backend {
        Backend::Wgpu => {
            let gpu = Gpu::new_blocking(GpuInit::default()).context("failed to initialize the GPU")?;
            run(WgpuDevice::new(&gpu), &args)
        }
        Backend::Software => run(SoftwareDevice::new(), &args),
    }
}

fn run<D: Scene + Clone>(device: D, args: &Args) -> Result<()> {
    let config = StreamConfig::default()
        .with_buffer_count(args.buffers)
        .with_sample_count(args.samples);

    let (readback_tx, readback_rx) = mpsc::channel();
    let (upload_tx, upload_rx) = mpsc::channel();
    let consumer = thread::spawn(move || consume(readback_rx));
    let producer = thread::spawn(move || produce(upload_rx));

    let mut readback = ReadbackStream::new(
        device.clone(),
        Forward {
            width: args.width,
            height: args.height,
            tx: readback_tx,
        },
        config.clone(),
    )
    .context("failed to create the read-back stream")?;
    let mut upload = UploadStream::new(
        device.clone(),
        Forward {
            width: args.width,
            height: args.height,
            tx: upload_tx,
        },
        config,
    );

    let mut meter = RateMeter::new();
    for n in 0..args.frames {
        readback.bind().context("bind render target")?;
        if let Some(target) = readback.render_target() {
            device.clear(target, scene::color_at(n))?;
        }

        upload.begin_frame().context("begin upload frame")?;
        upload.bind().context("bind upload texture")?;
        readback.swap().context("read back frame")?;

        if let Some(sample) = meter.tick() {
            log::info!("{:.1} fps ({} frames)", sample.per_second(), sample.total);
        }
    }

    readback.destroy().context("drain read-back stream")?;
    upload.destroy().context("drain upload stream")?;
    log::info!("read-back: {:?}", readback.stats());
    log::info!("upload: {:?}", upload.stats());

    // Dropping the streams closes the channels and ends both workers.
    drop(readback);
    drop(upload);
    let consumed = consumer.join().map_err(|_| anyhow::anyhow!("consumer thread panicked"))?;
    let produced = producer.join().map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    log::info!("consumer saw {consumed} frames, producer wrote {produced}");
    Ok(())
}

/// Inspects each read-back frame and releases it.
fn consume(rx: mpsc::Receiver<FrameLease>) -> u64 {
    let mut count = 0;
    for frame in rx {
        let layout = frame.layout();
        let centre = {
            let bytes = frame.bytes();
            layout.row(&bytes, layout.height() / 2)[layout.width() as usize / 2]
        };
        log::trace!("frame {}: centre {centre:?}", frame.index());
        frame.release();
        count += 1;
    }
    count
}

/// Writes a moving gradient into each upload frame and releases it.
fn produce(rx: mpsc::Receiver<FrameLease>) -> u64 {
    let mut count = 0;
    for mut frame in rx {
        let layout = frame.layout();
        let shift = frame.index() as u32;
        {
            let mut bytes = frame.bytes_mut();
            for y in 0..layout.height() {
                for (x, pixel) in layout.row_mut(&mut bytes, y).iter_mut().enumerate() {
                    let v = (x as u32 + y + shift) as u8;
                    *pixel = Bgra8::new(v, v.wrapping_mul(2), 255 - v, 255);
                }
            }
        }
        frame.release();
        count += 1;
    }
    count
}
