use dartsense_vision::{CaptureError, SourceError};

/// Startup failures of a detection session. Nothing after startup is fatal.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("camera {camera} produced no initial frame: {source}")]
    Prime {
        camera: usize,
        #[source]
        source: CaptureError,
    },
    #[error("failed to build camera worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to spawn detection loop: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("at least one camera is required")]
    ZeroCameras,
    #[error("{actual} frame sources for {expected} calibrated cameras")]
    CameraCountMismatch { expected: usize, actual: usize },
}
