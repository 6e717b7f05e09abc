use crate::processing::deskew::deskew;
use crate::processing::ocr::{FaceDetector, NoFaceDetector};
use crate::processing::perspective::correct_perspective;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::median_filter;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tuning for one normalization variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Inputs wider than this are downscaled first (when `limit_input_width`)
    /// and detection always runs at this width.
    pub processing_width: u32,
    pub limit_input_width: bool,
    /// Longest side of the copy probed for faces.
    pub orientation_probe_size: u32,
    pub min_quad_area: f32,
    pub max_quad_coverage: f32,
    pub trapezoid_ratio: f32,
    pub min_card_aspect: f32,
    pub max_card_aspect: f32,
    pub deskew_roi_margin: f32,
    pub deskew_max_angle: f32,
    pub deskew_min_angle: f32,
    pub threshold_window: u32,
    pub threshold_bias: u8,
    pub dilation_radius: u32,
    pub output_width: u32,
    /// Only shrink to `output_width`, never enlarge.
    pub downscale_only: bool,
    pub padding: u32,
    pub enhance: bool,
    pub clahe_grid: u32,
    pub clahe_clip_limit: f32,
}

impl NormalizerConfig {
    pub fn standard() -> Self {
        NormalizerConfig {
            processing_width: 1280,
            limit_input_width: true,
            orientation_probe_size: 600,
            min_quad_area: 0.05,
            max_quad_coverage: 0.95,
            trapezoid_ratio: 0.85,
            min_card_aspect: 1.2,
            max_card_aspect: 2.0,
            deskew_roi_margin: 0.2,
            deskew_max_angle: 15.0,
            deskew_min_angle: 0.5,
            threshold_window: 31,
            threshold_bias: 15,
            dilation_radius: 10,
            output_width: 1000,
            downscale_only: false,
            padding: 20,
            enhance: false,
            clahe_grid: 8,
            clahe_clip_limit: 2.0,
        }
    }

    /// Higher-resolution variant with local contrast enhancement, for
    /// captures the standard variant reads poorly.
    pub fn enhanced() -> Self {
        NormalizerConfig {
            limit_input_width: false,
            deskew_roi_margin: 0.15,
            deskew_max_angle: 20.0,
            output_width: 1600,
            downscale_only: true,
            enhance: true,
            ..Self::standard()
        }
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Prepares a photographed card for recognition: orientation, perspective,
/// deskew, optional enhancement, canonical size and a white border. Every
/// step is skipped when it finds nothing to correct.
#[derive(Clone)]
pub struct GeometricNormalizer {
    config: NormalizerConfig,
    face_detector: Arc<dyn FaceDetector>,
}

impl GeometricNormalizer {
    pub fn new(config: NormalizerConfig, face_detector: Arc<dyn FaceDetector>) -> Self {
        GeometricNormalizer {
            config,
            face_detector,
        }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn normalize(&self, image: &DynamicImage) -> DynamicImage {
        let mut current = image.clone();

        // Step 1: Bound the working size
        if self.config.limit_input_width && current.width() > self.config.processing_width {
            current = current.resize(self.config.processing_width, u32::MAX, FilterType::CatmullRom);
            debug!("Downscaled input to {}x{}", current.width(), current.height());
        }

        // Step 2: Orientation
        current = self.orient(&current);

        // Step 3: Perspective
        match correct_perspective(&current, &self.config) {
            Some(warped) => {
                info!("Perspective corrected to {}x{}", warped.width(), warped.height());
                current = warped;
            }
            None => debug!("Perspective correction skipped"),
        }

        // Step 4: Deskew
        match deskew(&current, &self.config) {
            Some(level) => current = level,
            None => debug!("Deskew skipped"),
        }

        // Step 5: Detail enhancement
        if self.config.enhance {
            current = DynamicImage::ImageLuma8(enhance_details(&current.to_luma8(), &self.config));
            debug!("Applied local contrast enhancement");
        }

        // Step 6: Canonical width and border
        let resize = if self.config.downscale_only {
            current.width() > self.config.output_width
        } else {
            current.width() != self.config.output_width
        };
        if resize && current.width() > 0 {
            current = current.resize(self.config.output_width, u32::MAX, FilterType::CatmullRom);
        }
        DynamicImage::ImageRgb8(add_padding(&current.to_rgb8(), self.config.padding))
    }

    /// Rotate by the quarter turn under which the face detector sees the
    /// most faces. Without any face, portrait captures are turned to
    /// landscape.
    pub fn orient(&self, image: &DynamicImage) -> DynamicImage {
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            return image.clone();
        }

        let longest = w.max(h);
        let probe = if longest > self.config.orientation_probe_size {
            let scale = self.config.orientation_probe_size as f32 / longest as f32;
            image.resize_exact(
                ((w as f32 * scale).round() as u32).max(1),
                ((h as f32 * scale).round() as u32).max(1),
                FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let mut best_angle = 0;
        let mut max_faces = 0;
        for angle in [0, 90, 180, 270] {
            let faces = self.face_detector.detect(&rotate_quarter(&probe, angle).to_luma8()).len();
            if faces > max_faces {
                max_faces = faces;
                best_angle = angle;
            }
        }

        if max_faces == 0 {
            if h > w {
                info!("No face found, turning portrait capture to landscape");
                return rotate_quarter(image, 90);
            }
            return image.clone();
        }
        if best_angle != 0 {
            info!("Rotating by {} degrees ({} faces)", best_angle, max_faces);
        }
        rotate_quarter(image, best_angle)
    }
}

impl Default for GeometricNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::standard(), Arc::new(NoFaceDetector))
    }
}

/// Clockwise quarter-turn rotation.
fn rotate_quarter(image: &DynamicImage, angle: u32) -> DynamicImage {
    match angle {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => image.clone(),
    }
}

pub fn add_padding(image: &RgbImage, pad: u32) -> RgbImage {
    let mut out = RgbImage::from_pixel(image.width() + 2 * pad, image.height() + 2 * pad, Rgb([255, 255, 255]));
    image::imageops::replace(&mut out, image, pad as i64, pad as i64);
    out
}

fn enhance_details(gray: &GrayImage, config: &NormalizerConfig) -> GrayImage {
    let contrasted = local_contrast(gray, config.clahe_grid, config.clahe_clip_limit);
    median_filter(&contrasted, 1, 1)
}

/// Contrast-limited adaptive histogram equalization over a `grid` x `grid`
/// tiling, blending neighbouring tile mappings bilinearly.
pub fn local_contrast(gray: &GrayImage, grid: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let grid = grid.max(1);
    if w < grid || h < grid {
        return gray.clone();
    }
    let tile_w = (w + grid - 1) / grid;
    let tile_h = (h + grid - 1) / grid;

    let mut luts = vec![[0u8; 256]; (grid * grid) as usize];
    for ty in 0..grid {
        for tx in 0..grid {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            if x0 >= x1 || y0 >= y1 {
                continue;
            }

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let pixels = (x1 - x0) * (y1 - y0);
            let limit = ((clip_limit * pixels as f32 / 256.0) as u32).max(1);
            let mut excess = 0;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            let residual = (excess % 256) as usize;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }
            if residual > 0 {
                let step = (256 / residual).max(1);
                for value in (0..256).step_by(step).take(residual) {
                    hist[value] += 1;
                }
            }

            let mut cdf = 0u32;
            let lut = &mut luts[(ty * grid + tx) as usize];
            for (value, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[value] = ((cdf as f32 * 255.0 / pixels as f32).round()).min(255.0) as u8;
            }
        }
    }

    let mut out = GrayImage::new(w, h);
    for (x, y, pixel) in gray.enumerate_pixels() {
        // position relative to tile centres
        let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let tx0 = gx.floor().clamp(0.0, (grid - 1) as f32) as u32;
        let ty0 = gy.floor().clamp(0.0, (grid - 1) as f32) as u32;
        let tx1 = (tx0 + 1).min(grid - 1);
        let ty1 = (ty0 + 1).min(grid - 1);
        let fx = (gx - tx0 as f32).clamp(0.0, 1.0);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        let v = pixel[0] as usize;
        let at = |tx: u32, ty: u32| luts[(ty * grid + tx) as usize][v] as f32;
        let top = at(tx0, ty0) * (1.0 - fx) + at(tx1, ty0) * fx;
        let bottom = at(tx0, ty1) * (1.0 - fx) + at(tx1, ty1) * fx;
        let value = top * (1.0 - fy) + bottom * fy;
        out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::rect::Rect;

    /// Reports a face when the top-left quadrant is dark, which in these
    /// tests only happens with the card upright.
    struct TopLeftMarkerDetector;

    impl FaceDetector for TopLeftMarkerDetector {
        fn detect(&self, image: &GrayImage) -> Vec<Rect> {
            let (w, h) = image.dimensions();
            let (qw, qh) = (w / 2, h / 2);
            if qw == 0 || qh == 0 {
                return Vec::new();
            }
            let mut sum = 0u64;
            for y in 0..qh {
                for x in 0..qw {
                    sum += image.get_pixel(x, y)[0] as u64;
                }
            }
            if sum / ((qw * qh) as u64) < 100 {
                vec![Rect::at(0, 0).of_size(qw, qh)]
            } else {
                Vec::new()
            }
        }
    }

    fn upright_card() -> DynamicImage {
        let mut card = RgbImage::from_pixel(320, 200, Rgb([240, 240, 240]));
        for y in 0..100 {
            for x in 0..160 {
                card.put_pixel(x, y, Rgb([10, 10, 10]));
            }
        }
        DynamicImage::ImageRgb8(card)
    }

    #[test]
    fn test_upside_down_card_is_restored() {
        let normalizer = GeometricNormalizer::new(NormalizerConfig::standard(), Arc::new(TopLeftMarkerDetector));
        let upside_down = upright_card().rotate180();

        let restored = normalizer.orient(&upside_down).to_rgb8();
        assert_eq!(restored.dimensions(), (320, 200));
        assert_eq!(restored.get_pixel(5, 5)[0], 10);
        assert_eq!(restored.get_pixel(315, 195)[0], 240);
    }

    #[test]
    fn test_portrait_fallback_without_faces() {
        let normalizer = GeometricNormalizer::default();
        let portrait = DynamicImage::ImageRgb8(RgbImage::new(100, 200));
        let turned = normalizer.orient(&portrait);
        assert_eq!((turned.width(), turned.height()), (200, 100));

        let landscape = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        assert_eq!(normalizer.orient(&landscape).width(), 200);
    }

    #[test]
    fn test_output_is_canonical_width_with_border() {
        let plain = DynamicImage::ImageRgb8(RgbImage::from_pixel(800, 500, Rgb([255, 255, 255])));

        let standard = GeometricNormalizer::default().normalize(&plain);
        assert_eq!(standard.width(), 1000 + 40);
        assert_eq!(standard.height(), 625 + 40);

        let enhanced = GeometricNormalizer::new(NormalizerConfig::enhanced(), Arc::new(NoFaceDetector));
        let out = enhanced.normalize(&plain);
        assert_eq!(out.width(), 800 + 40);
    }

    #[test]
    fn test_padding_is_white() {
        let padded = add_padding(&RgbImage::from_pixel(10, 10, Rgb([0, 0, 0])), 5);
        assert_eq!(padded.dimensions(), (20, 20));
        assert_eq!(padded.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(padded.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_local_contrast_stretches_flat_regions() {
        let mut gray = GrayImage::from_pixel(64, 64, Luma([100]));
        for x in 0..64 {
            gray.put_pixel(x, 32, Luma([120]));
        }
        let out = local_contrast(&gray, 4, 2.0);
        assert_eq!(out.dimensions(), (64, 64));
        assert!(out.get_pixel(10, 32)[0] > out.get_pixel(10, 10)[0]);
    }

    #[test]
    fn test_enhanced_preset_overrides() {
        let enhanced = NormalizerConfig::enhanced();
        assert_eq!(enhanced.output_width, 1600);
        assert!(enhanced.enhance);
        assert_eq!(enhanced.threshold_window, 31);
        let partial: NormalizerConfig = serde_json::from_str(r#"{"padding": 0}"#).unwrap();
        assert_eq!(partial.padding, 0);
        assert_eq!(partial.output_width, 1000);
    }
}
