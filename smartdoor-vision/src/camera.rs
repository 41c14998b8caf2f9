use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::frame::{Frame, FrameLedger, Rotation};

/// Which physical camera a binding should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LensFacing {
    #[default]
    Front,
    Back,
}

impl LensFacing {
    pub fn toggled(self) -> Self {
        match self {
            LensFacing::Front => LensFacing::Back,
            LensFacing::Back => LensFacing::Front,
        }
    }
}

impl std::fmt::Display for LensFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensFacing::Front => f.write_str("front"),
            LensFacing::Back => f.write_str("back"),
        }
    }
}

/// Source of camera streams, one per binding.
///
/// `open` may block (device negotiation); callers run it off the UI thread.
pub trait CameraProvider: Send + Sync + 'static {
    type Stream: FrameStream;

    fn open(&self, facing: LensFacing) -> Result<Self::Stream>;
}

/// A live capture stream. Dropping it stops the device.
pub trait FrameStream: Send + 'static {
    /// Block until the next frame is captured.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Ledger tracking frames this stream has handed out.
    fn ledger(&self) -> &FrameLedger;
}

/// Device paths and orientation for the two lens positions.
#[derive(Debug, Clone)]
pub struct V4lProvider {
    pub front: String,
    pub back: String,
    pub front_rotation: Rotation,
    pub back_rotation: Rotation,
    pub buffers: u32,
}

impl V4lProvider {
    pub fn device_for(&self, facing: LensFacing) -> &str {
        match facing {
            LensFacing::Front => &self.front,
            LensFacing::Back => &self.back,
        }
    }

    fn rotation_for(&self, facing: LensFacing) -> Rotation {
        match facing {
            LensFacing::Front => self.front_rotation,
            LensFacing::Back => self.back_rotation,
        }
    }
}

impl CameraProvider for V4lProvider {
    type Stream = V4lStream;

    fn open(&self, facing: LensFacing) -> Result<V4lStream> {
        let path = self.device_for(facing);
        log::info!("opening {} camera at {}", facing, path);
        V4lStream::open(path, self.buffers, self.rotation_for(facing))
            .with_context(|| format!("opening {} camera {}", facing, path))
    }
}

pub struct V4lStream {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
    rotation: Rotation,
    sequence: u64,
    ledger: FrameLedger,
}

impl V4lStream {
    pub fn open(device: &str, buffers: u32, rotation: Rotation) -> Result<Self> {
        let dev = Device::with_path(device).context("open camera")?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fall back to YUYV, else keep whatever the driver chose
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let stream =
            Stream::with_buffers(&dev, Type::VideoCapture, buffers.max(1)).context("stream")?;
        log::debug!(
            "camera {} negotiated {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
            rotation,
            sequence: 0,
            ledger: FrameLedger::new(),
        })
    }
}

impl FrameStream for V4lStream {
    fn next_frame(&mut self) -> Result<Frame> {
        let (width, height, fourcc) = (self.width, self.height, self.fourcc);
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::trace!(
            "captured seq={} len={} ({}x{} {:?})",
            meta.sequence,
            data.len(),
            width,
            height,
            fourcc
        );
        let image = decode(fourcc, width, height, data);
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(Frame::new(sequence, image, self.rotation, self.ledger.issue()))
    }

    fn ledger(&self) -> &FrameLedger {
        &self.ledger
    }
}

fn decode(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Option<RgbImage> {
    let mut buf = match fourcc {
        f if f == FourCC::new(b"RGB3") => Some(data.to_vec()),
        f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(width, height, data),
        f if f == FourCC::new(b"GREY") => grey_to_rgb(width, height, data),
        other => {
            log::warn!("unsupported pixel format {:?}, dropping image", other);
            None
        }
    }?;
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        log::warn!("short frame: got {}, expected {}", buf.len(), expected);
        return None;
    }
    buf.truncate(expected);
    RgbImage::from_raw(width, height, buf)
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Option<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return None;
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Some(out)
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Option<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        return None;
    }
    Some(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}
