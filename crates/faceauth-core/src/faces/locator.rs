use std::sync::Mutex;

use dlib_face_recognition::{FaceDetector, FaceDetectorTrait, ImageMatrix};
use image::imageops;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Face rectangle in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBounds {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersects the rectangle with a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceBounds> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let clamped_width = self.width.min(width - self.x);
        let clamped_height = self.height.min(height - self.y);
        if clamped_width == 0 || clamped_height == 0 {
            return None;
        }
        Some(FaceBounds::new(self.x, self.y, clamped_width, clamped_height))
    }
}

/// A cropped face and where it came from. Lives for one pipeline call.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub bounds: FaceBounds,
    pub image: RgbImage,
}

impl FaceRegion {
    pub fn crop(frame: &RgbImage, bounds: FaceBounds) -> AppResult<Self> {
        let bounds = bounds
            .clamp_to(frame.width(), frame.height())
            .ok_or(AppError::NoFaceDetected)?;
        let image =
            imageops::crop_imm(frame, bounds.x, bounds.y, bounds.width, bounds.height).to_image();
        Ok(Self { bounds, image })
    }
}

/// Finds candidate faces in a frame, in the detector's own scan order.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, frame: &RgbImage) -> AppResult<Vec<FaceBounds>>;

    fn name(&self) -> &'static str;
}

/// Runs the locator and crops the first candidate; later candidates are ignored.
pub fn locate_primary_face(locator: &dyn FaceLocator, frame: &RgbImage) -> AppResult<FaceRegion> {
    let candidates = locator.locate(frame)?;
    debug!(
        locator = locator.name(),
        candidates = candidates.len(),
        "face localisation finished"
    );
    let first = candidates.first().copied().ok_or(AppError::NoFaceDetected)?;
    FaceRegion::crop(frame, first)
}

/// dlib's HOG frontal face detector. Sensitivity settings do not apply to it.
pub struct DlibFaceLocator {
    detector: Mutex<FaceDetector>,
}

impl DlibFaceLocator {
    pub fn new() -> Self {
        Self {
            detector: Mutex::new(FaceDetector::new()),
        }
    }
}

impl Default for DlibFaceLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceLocator for DlibFaceLocator {
    fn locate(&self, frame: &RgbImage) -> AppResult<Vec<FaceBounds>> {
        let matrix = ImageMatrix::from_image(frame);
        let detector = self
            .detector
            .lock()
            .map_err(|_| AppError::Detection {
                message: "face detector lock poisoned".into(),
            })?;
        let locations = detector.face_locations(&matrix);

        let mut bounds = Vec::with_capacity(locations.len());
        for rect in locations.iter() {
            let left = rect.left.max(0);
            let top = rect.top.max(0);
            let right = rect.right.max(left);
            let bottom = rect.bottom.max(top);
            let width = (right - left + 1) as u32;
            let height = (bottom - top + 1) as u32;
            if let Some(clamped) = FaceBounds::new(left as u32, top as u32, width, height)
                .clamp_to(frame.width(), frame.height())
            {
                bounds.push(clamped);
            }
        }
        Ok(bounds)
    }

    fn name(&self) -> &'static str {
        "dlib-hog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    struct FixedLocator(Vec<FaceBounds>);

    impl FaceLocator for FixedLocator {
        fn locate(&self, _frame: &RgbImage) -> AppResult<Vec<FaceBounds>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0]))
    }

    #[test]
    fn first_candidate_wins() {
        let frame = gradient(200, 200);
        let locator = FixedLocator(vec![
            FaceBounds::new(50, 50, 80, 80),
            FaceBounds::new(0, 0, 150, 150),
        ]);

        let region = locate_primary_face(&locator, &frame).unwrap();
        assert_eq!(region.bounds, FaceBounds::new(50, 50, 80, 80));
        assert_eq!(region.image.dimensions(), (80, 80));
        assert_eq!(region.image.get_pixel(0, 0), &Rgb([50, 50, 0]));
    }

    #[test]
    fn no_candidates_is_no_face() {
        let frame = gradient(10, 10);
        let err = locate_primary_face(&FixedLocator(vec![]), &frame).unwrap_err();
        assert!(matches!(err, AppError::NoFaceDetected));
    }

    #[test]
    fn crop_is_clamped_to_the_frame() {
        let frame = gradient(100, 60);
        let region = FaceRegion::crop(&frame, FaceBounds::new(80, 40, 50, 50)).unwrap();
        assert_eq!(region.bounds, FaceBounds::new(80, 40, 20, 20));

        let err = FaceRegion::crop(&frame, FaceBounds::new(100, 0, 5, 5)).unwrap_err();
        assert!(matches!(err, AppError::NoFaceDetected));
    }
}
