pub mod binder;
pub mod config;
pub mod error;
pub mod executor;
pub mod permission;
pub mod status;
pub mod watch;
pub mod window;

pub use binder::{BinderPhase, ViewBinder, Waker};
pub use error::DoorError;
pub use executor::{AnalysisExecutor, ExecutorHandle};
pub use permission::{CapabilityGate, Grant};
pub use status::{presence_policy, Status, StatusCell};

// Re-export vision types for convenience
pub use smartdoor_vision::{LensFacing, V4lProvider, YuNetFactory};
