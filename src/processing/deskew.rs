// Small-angle skew correction from the dominant direction of text lines.

use crate::processing::image_processor::NormalizerConfig;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb};
use imageproc::filter::box_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use log::debug;

const DETECTION_WIDTH: u32 = 1000;
// Degrees either side of the Hough estimate searched by the profile.
const REFINE_WINDOW: f32 = 2.0;

/// Dark text on a light card becomes white on black. A pixel is foreground
/// when it is darker than its local mean by more than `bias`.
pub fn binarize_inverted(gray: &GrayImage, window: u32, bias: u8) -> GrayImage {
    let radius = (window / 2).max(1);
    let mean = box_filter(gray, radius, radius);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, pixel) in gray.enumerate_pixels() {
        let local = mean.get_pixel(x, y)[0] as i32;
        if (pixel[0] as i32) < local - bias as i32 {
            out.put_pixel(x, y, Luma([255]));
        }
    }
    out
}

/// Horizontal-only dilation so the letters of a line fuse into one stroke.
pub fn dilate_horizontal(binary: &GrayImage, radius: u32) -> GrayImage {
    let (w, h) = binary.dimensions();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            if binary.get_pixel(x, y)[0] == 0 {
                continue;
            }
            let from = x.saturating_sub(radius);
            let to = (x + radius).min(w.saturating_sub(1));
            for dx in from..=to {
                out.put_pixel(dx, y, Luma([255]));
            }
        }
    }
    out
}

// Foreground pixels along a near-horizontal line; stands in for its length.
fn line_support(binary: &GrayImage, line: &PolarLine) -> f32 {
    let theta = (line.angle_in_degrees as f32).to_radians();
    let (sin, cos) = theta.sin_cos();
    if sin.abs() < 1e-3 {
        return 0.0;
    }
    let (w, h) = binary.dimensions();
    let mut count = 0;
    for x in 0..w {
        let y = ((line.r - x as f32 * cos) / sin).round();
        if y >= 0.0 && (y as u32) < h && binary.get_pixel(x, y as u32)[0] > 0 {
            count += 1;
        }
    }
    count as f32
}

/// Spread of foreground rows when sheared back by `tan`: sum of squared
/// counts per projected row. Largest when text lines collapse onto rows.
fn profile_score(points: &[(u32, u32)], tan: f64, offset: i64, len: usize) -> u64 {
    let mut bins = vec![0u64; len];
    for &(x, y) in points {
        let projected = (y as f64 - x as f64 * tan).round() as i64 + offset;
        if (0..len as i64).contains(&projected) {
            bins[projected as usize] += 1;
        }
    }
    bins.iter().map(|c| c * c).sum()
}

/// Search tenths of a degree within `window` of `coarse` for the angle whose
/// projection profile is sharpest. Equal scores keep the angle closest to
/// level.
pub fn refine_skew(binary: &GrayImage, coarse: f32, window: f32, max_angle: f32) -> f32 {
    let points: Vec<(u32, u32)> = binary
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| (x, y))
        .collect();
    if points.is_empty() {
        return coarse;
    }

    let (w, h) = binary.dimensions();
    let limit = (max_angle * 10.0).round() as i32;
    let from = (((coarse - window) * 10.0).round() as i32).max(-limit);
    let to = (((coarse + window) * 10.0).round() as i32).min(limit);
    let offset = (w as f64 * (max_angle as f64 + window as f64).to_radians().tan()).ceil() as i64 + 1;
    let len = h as usize + 2 * offset as usize;

    let mut best: Option<(u64, i32)> = None;
    for tenth in from..=to {
        let tan = (tenth as f64 / 10.0).to_radians().tan();
        let score = profile_score(&points, tan, offset, len);
        let better = match best {
            None => true,
            Some((best_score, best_tenth)) => {
                score > best_score || (score == best_score && tenth.abs() < best_tenth.abs())
            }
        };
        if better {
            best = Some((score, tenth));
        }
    }
    best.map_or(coarse, |(_, tenth)| tenth as f32 / 10.0)
}

/// Skew of the text lines in the central region, in degrees. Positive means
/// lines descend to the right. The Hough transform gives a length-weighted
/// estimate in whole degrees, which the projection profile then refines.
pub fn estimate_skew(gray: &GrayImage, config: &NormalizerConfig) -> Option<f32> {
    let (w, h) = gray.dimensions();
    let margin_x = (w as f32 * config.deskew_roi_margin) as u32;
    let margin_y = (h as f32 * config.deskew_roi_margin) as u32;
    if w <= 2 * margin_x + 1 || h <= 2 * margin_y + 1 {
        return None;
    }
    let roi = imageops::crop_imm(gray, margin_x, margin_y, w - 2 * margin_x, h - 2 * margin_y).to_image();

    let binary = binarize_inverted(&roi, config.threshold_window, config.threshold_bias);
    let fused = dilate_horizontal(&binary, config.dilation_radius);
    let lines = detect_lines(
        &fused,
        LineDetectionOptions {
            vote_threshold: (roi.width() / 4).max(1),
            suppression_radius: 8,
        },
    );

    let mut weighted = 0.0;
    let mut total = 0.0;
    for line in &lines {
        // a horizontal line has its normal at 90 degrees
        let angle = line.angle_in_degrees as f32 - 90.0;
        if angle.abs() >= config.deskew_max_angle {
            continue;
        }
        let support = line_support(&fused, line);
        weighted += angle * support;
        total += support;
    }

    if total <= 0.0 {
        debug!("No near-horizontal lines among {} candidates", lines.len());
        return None;
    }
    let coarse = weighted / total;
    let refined = refine_skew(&binary, coarse, REFINE_WINDOW, config.deskew_max_angle);
    debug!("Skew {:.2} degrees (Hough estimate {:.2})", refined, coarse);
    Some(refined)
}

/// Rotate the image level. `None` when no skew was measured or it is below
/// the minimum angle.
pub fn deskew(image: &DynamicImage, config: &NormalizerConfig) -> Option<DynamicImage> {
    let detect = if image.width() > DETECTION_WIDTH {
        image.resize(DETECTION_WIDTH, u32::MAX, FilterType::Triangle)
    } else {
        image.clone()
    };

    let angle = estimate_skew(&detect.to_luma8(), config)?;
    if angle.abs() < config.deskew_min_angle {
        debug!("Skew {:.2} degrees is below the threshold", angle);
        return None;
    }

    debug!("Rotating by {:.2} degrees", -angle);
    let rotated = rotate_about_center(
        &image.to_rgb8(),
        -angle.to_radians(),
        Interpolation::Bicubic,
        Rgb([255, 255, 255]),
    );
    Some(DynamicImage::ImageRgb8(rotated))
}
