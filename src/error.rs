use smartdoor_vision::LensFacing;
use thiserror::Error;

/// Failures the door surfaces, by how far they reach.
#[derive(Debug, Error)]
pub enum DoorError {
    /// Terminal for the session.
    #[error("camera permission denied")]
    PermissionDenied,
    /// Leaves the binder unbound until the selection or surface changes.
    #[error("binding {facing} camera failed: {source:#}")]
    BindingFailure {
        facing: LensFacing,
        source: anyhow::Error,
    },
    /// A single frame's outcome; the pipeline keeps going.
    #[error("detection failed on frame: {0}")]
    DetectionFailure(#[from] smartdoor_vision::DetectError),
}
