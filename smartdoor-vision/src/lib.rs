pub mod camera;
pub mod detector;
pub mod frame;
pub mod model;
pub mod tracking;
pub mod yunet;

// Re-export commonly used types
pub use camera::{CameraProvider, FrameStream, LensFacing, V4lProvider};
pub use detector::{
    DetectError, DetectorAdapter, DetectorOptions, EngineFactory, Face, FaceEngine, FaceSet,
    PerformanceMode,
};
pub use frame::{Frame, FrameLedger, LatestSlot, PreviewImage, Rotation};
pub use yunet::{YuNetEngine, YuNetFactory};
