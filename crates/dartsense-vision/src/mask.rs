//! Foreground masks from frame differencing.
//!
//! `frame - reference` is taken per pixel as an absolute difference,
//! optionally blurred, binarised at the camera threshold and cleaned with a
//! 3x3 opening followed by a 3x3 dilation.

use dartsense_core::Roi;
use image::{GenericImageView, GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{dilate, open};

use crate::error::CaptureError;

/// Foreground pixel value in binary masks.
pub const FOREGROUND: u8 = 255;

/// How a diff image is turned into a binary mask.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaskSettings {
    /// Differences strictly above this become foreground.
    pub threshold: u8,
    /// Gaussian sigma applied before binarising; non-positive disables.
    pub blur_sigma: f32,
}

fn ensure_same_size(frame: &GrayImage, reference: &GrayImage) -> Result<(), CaptureError> {
    if frame.dimensions() != reference.dimensions() {
        return Err(CaptureError::DimensionMismatch {
            expected: reference.dimensions(),
            actual: frame.dimensions(),
        });
    }
    Ok(())
}

/// Per-pixel `|frame - reference|`.
pub fn abs_diff(frame: &GrayImage, reference: &GrayImage) -> Result<GrayImage, CaptureError> {
    ensure_same_size(frame, reference)?;
    Ok(GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        Luma([frame.get_pixel(x, y)[0].abs_diff(reference.get_pixel(x, y)[0])])
    }))
}

/// Binarise: values above `threshold` become [`FOREGROUND`], the rest 0.
pub fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] > threshold { FOREGROUND } else { 0 };
    }
    out
}

/// Remove single-pixel speckle and close small gaps.
pub fn clean(mask: &GrayImage) -> GrayImage {
    let opened = open(mask, Norm::LInf, 1);
    dilate(&opened, Norm::LInf, 1)
}

/// Full foreground mask of `frame` against `reference`.
pub fn foreground_mask(
    frame: &GrayImage,
    reference: &GrayImage,
    settings: MaskSettings,
) -> Result<GrayImage, CaptureError> {
    let mut diff = abs_diff(frame, reference)?;
    if settings.blur_sigma > 0.0 {
        diff = gaussian_blur_f32(&diff, settings.blur_sigma);
    }
    Ok(clean(&binarize(&diff, settings.threshold)))
}

/// Non-zero pixels of `mask` inside `roi` (clamped to the mask).
pub fn count_foreground(mask: &GrayImage, roi: &Roi) -> usize {
    let r = roi.clamp_to(mask.width(), mask.height());
    if r.is_empty() {
        return 0;
    }
    mask.view(r.x, r.y, r.width, r.height)
        .pixels()
        .filter(|(_, _, p)| p[0] != 0)
        .count()
}

/// Copy of the `roi` region of `mask`.
pub fn crop_roi(mask: &GrayImage, roi: &Roi) -> GrayImage {
    let r = roi.clamp_to(mask.width(), mask.height());
    mask.view(r.x, r.y, r.width, r.height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_block(w: u32, h: u32, x0: u32, y0: u32, size: u32, v: u8) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let inside = (x0..x0 + size).contains(&x) && (y0..y0 + size).contains(&y);
            Luma([if inside { v } else { 0 }])
        })
    }

    #[test]
    fn speckle_is_removed_and_blobs_grow() {
        let bg = GrayImage::new(40, 40);
        let mut frame = with_block(40, 40, 10, 10, 4, 200);
        frame.put_pixel(30, 30, Luma([200]));

        let settings = MaskSettings {
            threshold: 110,
            blur_sigma: 0.0,
        };
        let mask = foreground_mask(&frame, &bg, settings).unwrap();
        assert_eq!(mask.get_pixel(30, 30)[0], 0);
        // 4x4 block dilated by one pixel on every side
        assert_eq!(count_foreground(&mask, &Roi::new(0, 0, 40, 40)), 36);
    }

    #[test]
    fn count_is_limited_to_roi() {
        let mask = with_block(20, 20, 0, 0, 10, FOREGROUND);
        assert_eq!(count_foreground(&mask, &Roi::new(5, 5, 10, 10)), 25);
        assert_eq!(count_foreground(&mask, &Roi::new(15, 15, 50, 50)), 0);
        assert_eq!(
            crop_roi(&mask, &Roi::new(5, 5, 10, 10)).dimensions(),
            (10, 10)
        );
    }

    #[test]
    fn size_mismatch_is_reported() {
        let a = GrayImage::new(10, 10);
        let b = GrayImage::new(12, 10);
        assert!(matches!(
            abs_diff(&a, &b),
            Err(CaptureError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn difference_is_symmetric() {
        let a = GrayImage::from_pixel(3, 3, Luma([40]));
        let b = GrayImage::from_pixel(3, 3, Luma([200]));
        assert_eq!(abs_diff(&a, &b).unwrap(), abs_diff(&b, &a).unwrap());
        let diff = abs_diff(&a, &b).unwrap();
        assert_eq!(binarize(&diff, 159).get_pixel(1, 1)[0], FOREGROUND);
        assert_eq!(binarize(&diff, 160).get_pixel(1, 1)[0], 0);
    }
}
