//! Uniform face-detection call over an external engine.

use anyhow::Result;
use image::RgbImage;
use thiserror::Error;

use crate::frame::Frame;
use crate::tracking::IouTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerformanceMode {
    #[default]
    Fast,
    Accurate,
}

/// Options fixed when a detector is constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    pub performance_mode: PerformanceMode,
    pub tracking: bool,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            performance_mode: PerformanceMode::Fast,
            tracking: true,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// One detected face in upright frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: Option<[f32; 10]>,
    pub tracking_id: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceSet {
    pub faces: Vec<Face>,
}

impl FaceSet {
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector already disposed")]
    Disposed,
    #[error("face detection failed: {0:#}")]
    Engine(#[from] anyhow::Error),
}

/// An opaque face detector.
pub trait FaceEngine: Send + 'static {
    fn process(&mut self, image: &RgbImage) -> Result<Vec<Face>>;

    /// Free engine resources. Called at most once by [`DetectorAdapter`].
    fn close(&mut self) {}
}

/// Builds one engine per camera binding.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: FaceEngine;

    fn create(&self, options: &DetectorOptions) -> Result<Self::Engine>;
}

/// Wraps an engine for one binding lifecycle.
///
/// Every frame passed to [`DetectorAdapter::analyze`] is released before the
/// call returns, whatever the outcome.
pub struct DetectorAdapter<E: FaceEngine> {
    engine: Option<E>,
    tracker: Option<IouTracker>,
    options: DetectorOptions,
}

impl<E: FaceEngine> DetectorAdapter<E> {
    pub fn new(engine: E, options: DetectorOptions) -> Self {
        Self {
            engine: Some(engine),
            tracker: options.tracking.then(IouTracker::default),
            options,
        }
    }

    pub fn build<F>(factory: &F, options: DetectorOptions) -> Result<Self>
    where
        F: EngineFactory<Engine = E>,
    {
        Ok(Self::new(factory.create(&options)?, options))
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    pub fn is_disposed(&self) -> bool {
        self.engine.is_none()
    }

    /// Run detection on `frame` and release it.
    ///
    /// Returns `None` when the frame carried no image.
    pub fn analyze(&mut self, frame: Frame) -> Option<Result<FaceSet, DetectError>> {
        let Some(image) = frame.image().cloned() else {
            log::debug!("frame {} has no image, skipping", frame.sequence);
            frame.release();
            return None;
        };
        let rotation = frame.rotation;
        let sequence = frame.sequence;
        frame.release();

        let Some(engine) = self.engine.as_mut() else {
            return Some(Err(DetectError::Disposed));
        };
        let upright = rotation.apply(&image);
        let result = engine.process(&upright).map_err(DetectError::from);
        Some(result.map(|mut faces| {
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.assign(&mut faces);
            }
            log::debug!("frame {}: {} face(s)", sequence, faces.len());
            FaceSet { faces }
        }))
    }

    /// Close the engine. Further calls are no-ops.
    pub fn dispose(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.close();
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.reset();
            }
            log::debug!("detector disposed");
        }
    }
}

impl<E: FaceEngine> Drop for DetectorAdapter<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}
