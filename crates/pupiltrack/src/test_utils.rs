//! Shared synthetic-image helpers for unit tests.

use image::{GrayImage, Luma};

/// Render a filled disk on a flat background.
///
/// Pixel `(x, y)` gets `fg` when `(x - cx)² + (y - cy)² < radius²`, matching
/// the disk rule of [`crate::mask::RegionMask`].
pub(crate) fn draw_disk_image(
    w: u32,
    h: u32,
    center: [f64; 2],
    radius: f64,
    fg: u8,
    bg: u8,
) -> GrayImage {
    let mut img = GrayImage::from_pixel(w, h, Luma([bg]));
    paint_disk(&mut img, center, radius, fg);
    img
}

pub(crate) fn paint_disk(img: &mut GrayImage, center: [f64; 2], radius: f64, value: u8) {
    let r_sq = radius * radius;
    for (x, y, p) in img.enumerate_pixels_mut() {
        let dx = x as f64 - center[0];
        let dy = y as f64 - center[1];
        if dx * dx + dy * dy < r_sq {
            *p = Luma([value]);
        }
    }
}

/// Layout of a synthetic eye: sclera background, iris, pupil, glint.
#[derive(Debug, Clone)]
pub(crate) struct EyeScene {
    pub background: u8,
    pub iris_center: [f64; 2],
    pub iris_radius: f64,
    pub iris_value: u8,
    pub pupil_center: [f64; 2],
    pub pupil_radius: f64,
    pub pupil_value: u8,
    pub cr_center: [f64; 2],
    pub cr_radius: f64,
    pub cr_value: u8,
}

impl Default for EyeScene {
    fn default() -> Self {
        Self {
            background: 200,
            iris_center: [80.0, 60.0],
            iris_radius: 45.0,
            iris_value: 140,
            pupil_center: [80.0, 60.0],
            pupil_radius: 18.0,
            pupil_value: 20,
            cr_center: [85.0, 56.0],
            cr_radius: 4.0,
            cr_value: 250,
        }
    }
}

/// Paint `scene` back to front onto a `w` x `h` frame.
pub(crate) fn draw_eye_frame(w: u32, h: u32, scene: &EyeScene) -> GrayImage {
    let mut img = GrayImage::from_pixel(w, h, Luma([scene.background]));
    paint_disk(&mut img, scene.iris_center, scene.iris_radius, scene.iris_value);
    paint_disk(&mut img, scene.pupil_center, scene.pupil_radius, scene.pupil_value);
    paint_disk(&mut img, scene.cr_center, scene.cr_radius, scene.cr_value);
    img
}

/// Gaussian-blur a `GrayImage` via `imageproc`.
pub(crate) fn blur_gray(img: &GrayImage, sigma: f32) -> GrayImage {
    imageproc::filter::gaussian_blur_f32(img, sigma)
}
