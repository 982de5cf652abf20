//! Frame sources: the seam between the detector and camera hardware.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;
use log::debug;

use crate::error::{CaptureError, SourceError};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "pgm", "tif"];

/// A per-camera stream of single-channel frames.
///
/// Each detector owns its source exclusively; `capture` blocks only on that
/// camera's own read.
pub trait FrameSource: Send {
    fn camera_id(&self) -> usize;

    fn capture(&mut self) -> Result<GrayImage, CaptureError>;
}

/// Replays a directory of image files in file-name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    camera_id: usize,
    frames: VecDeque<PathBuf>,
}

impl ImageSequenceSource {
    /// List the image files under `dir`; an unreadable or empty directory is
    /// a startup failure.
    pub fn open(camera_id: usize, dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| SourceError::Io {
            camera: camera_id,
            path: dir.to_path_buf(),
            source,
        })?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        if frames.is_empty() {
            return Err(SourceError::Empty {
                camera: camera_id,
                path: dir.to_path_buf(),
            });
        }
        frames.sort();
        debug!(
            "camera {camera_id}: {} frames in {}",
            frames.len(),
            dir.display()
        );

        Ok(Self {
            camera_id,
            frames: frames.into(),
        })
    }

    /// Frames not yet captured.
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn camera_id(&self) -> usize {
        self.camera_id
    }

    fn capture(&mut self) -> Result<GrayImage, CaptureError> {
        let path = self.frames.pop_front().ok_or(CaptureError::EndOfStream)?;
        let img = image::open(&path).map_err(|source| CaptureError::Decode { path, source })?;
        Ok(img.to_luma8())
    }
}

/// In-memory source that plays a fixed list of frames.
///
/// Once the list is consumed the last frame repeats, unless the source was
/// built with [`ScriptedSource::finite`], in which case it reports
/// [`CaptureError::EndOfStream`].
#[derive(Clone, Debug)]
pub struct ScriptedSource {
    camera_id: usize,
    frames: VecDeque<GrayImage>,
    last: Option<GrayImage>,
    repeat_last: bool,
}

impl ScriptedSource {
    pub fn new(camera_id: usize, frames: impl IntoIterator<Item = GrayImage>) -> Self {
        Self {
            camera_id,
            frames: frames.into_iter().collect(),
            last: None,
            repeat_last: true,
        }
    }

    pub fn finite(camera_id: usize, frames: impl IntoIterator<Item = GrayImage>) -> Self {
        Self {
            repeat_last: false,
            ..Self::new(camera_id, frames)
        }
    }

    /// Queue more frames behind the current script.
    pub fn push(&mut self, frame: GrayImage) {
        self.frames.push_back(frame);
    }
}

impl FrameSource for ScriptedSource {
    fn camera_id(&self) -> usize {
        self.camera_id
    }

    fn capture(&mut self) -> Result<GrayImage, CaptureError> {
        if let Some(frame) = self.frames.pop_front() {
            if self.repeat_last {
                self.last = Some(frame.clone());
            }
            return Ok(frame);
        }
        match (&self.last, self.repeat_last) {
            (Some(frame), true) => Ok(frame.clone()),
            (None, true) => Err(CaptureError::Unavailable(format!(
                "camera {} has no scripted frames",
                self.camera_id
            ))),
            (_, false) => Err(CaptureError::EndOfStream),
        }
    }
}
