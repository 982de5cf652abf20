use std::path::PathBuf;

/// Failure to read one frame. Contained within the camera's cycle.
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("failed to decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("end of frame stream")]
    EndOfStream,
    #[error("frame is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Failure to acquire a camera at startup.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("camera {camera}: cannot read {path}: {source}")]
    Io {
        camera: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("camera {camera}: no frames in {path}")]
    Empty { camera: usize, path: PathBuf },
}
