//! Camera frames and the hand-off between capture and analysis.
//!
//! A [`Frame`] owns a [`ReleaseToken`] registered with the [`FrameLedger`] of
//! the stream that produced it. Dropping the frame releases the token, so a
//! frame is released exactly once no matter which path consumes it.

use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Clockwise rotation that turns the sensor image upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Parse a rotation given in degrees. Only right angles are accepted.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn apply(self, img: &RgbImage) -> RgbImage {
        match self {
            Rotation::Deg0 => img.clone(),
            Rotation::Deg90 => image::imageops::rotate90(img),
            Rotation::Deg180 => image::imageops::rotate180(img),
            Rotation::Deg270 => image::imageops::rotate270(img),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerCounts {
    issued: AtomicU64,
    released: AtomicU64,
}

/// Counts frames handed out by a stream and frames given back.
#[derive(Debug, Clone, Default)]
pub struct FrameLedger {
    counts: Arc<LedgerCounts>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> ReleaseToken {
        self.counts.issued.fetch_add(1, Ordering::AcqRel);
        ReleaseToken {
            counts: self.counts.clone(),
        }
    }

    pub fn issued(&self) -> u64 {
        self.counts.issued.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.counts.released.load(Ordering::Acquire)
    }

    /// Frames issued but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.issued().saturating_sub(self.released())
    }
}

/// Proof that a frame is still held. Released on drop.
#[derive(Debug)]
pub struct ReleaseToken {
    counts: Arc<LedgerCounts>,
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        self.counts.released.fetch_add(1, Ordering::AcqRel);
    }
}

/// One captured image plus its rotation hint.
///
/// `image` is `None` when the driver delivered a buffer that could not be
/// turned into pixels; such frames are released without analysis.
#[derive(Debug)]
pub struct Frame {
    pub sequence: u64,
    pub rotation: Rotation,
    image: Option<Arc<RgbImage>>,
    _token: ReleaseToken,
}

impl Frame {
    pub fn new(
        sequence: u64,
        image: Option<RgbImage>,
        rotation: Rotation,
        token: ReleaseToken,
    ) -> Self {
        Self {
            sequence,
            rotation,
            image: image.map(Arc::new),
            _token: token,
        }
    }

    pub fn image(&self) -> Option<&Arc<RgbImage>> {
        self.image.as_ref()
    }

    /// Preview view of this frame that does not hold the release token.
    pub fn preview(&self) -> Option<PreviewImage> {
        self.image.as_ref().map(|image| PreviewImage {
            sequence: self.sequence,
            rotation: self.rotation,
            image: image.clone(),
        })
    }

    /// Give the frame back to its stream.
    pub fn release(self) {
        log::trace!("frame {} released", self.sequence);
    }
}

/// A frame's pixels kept around for rendering only.
#[derive(Debug, Clone)]
pub struct PreviewImage {
    pub sequence: u64,
    pub rotation: Rotation,
    pub image: Arc<RgbImage>,
}

/// Single-entry mailbox that keeps only the newest value.
///
/// `put` replaces whatever was waiting; the displaced value is returned to
/// the caller so it can be dropped (and for frames, released) there.
#[derive(Debug)]
pub struct LatestSlot<T> {
    inner: Mutex<SlotInner<T>>,
}

#[derive(Debug)]
struct SlotInner<T> {
    value: Option<T>,
    dropped: u64,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                value: None,
                dropped: 0,
            }),
        }
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner<T>> {
        // A panic while holding the lock leaves only a stale Option behind.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put(&self, value: T) -> Option<T> {
        let mut inner = self.lock();
        let old = inner.value.replace(value);
        if old.is_some() {
            inner.dropped += 1;
        }
        old
    }

    pub fn take(&self) -> Option<T> {
        self.lock().value.take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().value.is_none()
    }

    /// Number of values overwritten before anyone took them.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn peek(&self) -> Option<T> {
        self.lock().value.clone()
    }
}
