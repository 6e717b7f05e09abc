// Card outline detection and perspective unwarp.

use crate::processing::image_processor::NormalizerConfig;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::dilate;
use imageproc::point::Point;
use log::debug;

pub type Corner = (f32, f32);

fn extreme(points: &[Corner; 4], key: impl Fn(&Corner) -> f32, largest: bool) -> Corner {
    let mut best = points[0];
    for p in &points[1..] {
        let better = if largest { key(p) > key(&best) } else { key(p) < key(&best) };
        if better {
            best = *p;
        }
    }
    best
}

/// Order four corners as top-left, top-right, bottom-right, bottom-left.
/// The smallest and largest coordinate sums give top-left and bottom-right;
/// the smallest and largest `y - x` give top-right and bottom-left.
pub fn order_points(points: &[Corner; 4]) -> [Corner; 4] {
    let sum = |p: &Corner| p.0 + p.1;
    let diff = |p: &Corner| p.1 - p.0;
    [
        extreme(points, sum, false),
        extreme(points, diff, false),
        extreme(points, sum, true),
        extreme(points, diff, true),
    ]
}

fn distance(a: Corner, b: Corner) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Warp only a real trapezoid (opposite edges differ noticeably) whose
/// mean aspect ratio looks like a card.
pub fn should_warp(quad: &[Corner; 4], config: &NormalizerConfig) -> bool {
    let [tl, tr, br, bl] = order_points(quad);
    let top = distance(tl, tr);
    let bottom = distance(bl, br);
    let left = distance(tl, bl);
    let right = distance(tr, br);
    if top.max(bottom) <= 0.0 || left.max(right) <= 0.0 {
        return false;
    }

    let width_ratio = top.min(bottom) / top.max(bottom);
    let height_ratio = left.min(right) / left.max(right);
    if width_ratio >= config.trapezoid_ratio && height_ratio >= config.trapezoid_ratio {
        debug!("Quad is already rectangular ({:.2}, {:.2})", width_ratio, height_ratio);
        return false;
    }

    let aspect = ((top + bottom) / 2.0) / ((left + right) / 2.0);
    let card_like = aspect > config.min_card_aspect && aspect < config.max_card_aspect;
    if !card_like {
        debug!("Quad aspect {:.2} is not card-like", aspect);
    }
    card_like
}

fn polygon_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        twice += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    (twice as f64 / 2.0).abs()
}

/// Largest four-cornered outline in `gray`, in `gray`'s coordinates. Only
/// the largest quadrilateral is considered; if it fails the guards nothing
/// is returned.
pub fn find_card_quad(gray: &GrayImage, config: &NormalizerConfig) -> Option<[Corner; 4]> {
    let (w, h) = gray.dimensions();
    let frame = w as f64 * h as f64;
    if frame == 0.0 {
        return None;
    }

    let blurred = gaussian_blur_f32(gray, 1.0);
    let edges = canny(&blurred, 30.0, 100.0);
    let dilated = dilate(&edges, Norm::LInf, 4);

    let mut outlines: Vec<(f64, Vec<Point<i32>>)> = find_contours::<i32>(&dilated)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| (polygon_area(&c.points), c.points))
        .filter(|(area, _)| *area >= frame * config.min_quad_area as f64)
        .collect();
    outlines.sort_by(|a, b| b.0.total_cmp(&a.0));

    for (area, points) in outlines {
        let perimeter = arc_length(&points, true);
        let approx = approximate_polygon_dp(&points, 0.02 * perimeter, true);
        if approx.len() != 4 {
            continue;
        }

        let (min_x, max_x) = points.iter().fold((i32::MAX, i32::MIN), |(lo, hi), p| (lo.min(p.x), hi.max(p.x)));
        let (min_y, max_y) = points.iter().fold((i32::MAX, i32::MIN), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));
        let coverage = config.max_quad_coverage as f64;
        if (max_x - min_x) as f64 > coverage * w as f64 && (max_y - min_y) as f64 > coverage * h as f64 {
            debug!("Outline covers the whole frame, nothing to unwarp");
            continue;
        }

        let quad = [
            (approx[0].x as f32, approx[0].y as f32),
            (approx[1].x as f32, approx[1].y as f32),
            (approx[2].x as f32, approx[2].y as f32),
            (approx[3].x as f32, approx[3].y as f32),
        ];
        debug!("Candidate card outline {:?} (area {:.0})", quad, area);
        return if should_warp(&quad, config) { Some(quad) } else { None };
    }
    None
}

/// Map `quad` onto an upright rectangle sized to its longest edges.
pub fn unwarp(image: &RgbImage, quad: &[Corner; 4]) -> Option<RgbImage> {
    let [tl, tr, br, bl] = order_points(quad);
    let width = distance(bl, br).max(distance(tl, tr)).round();
    let height = distance(tr, br).max(distance(tl, bl)).round();
    if width < 2.0 || height < 2.0 {
        return None;
    }

    let target = [
        (0.0, 0.0),
        (width - 1.0, 0.0),
        (width - 1.0, height - 1.0),
        (0.0, height - 1.0),
    ];
    let projection = Projection::from_control_points([tl, tr, br, bl], target)?;
    let mut out = RgbImage::new(width as u32, height as u32);
    warp_into(image, &projection, Interpolation::Bilinear, Rgb([255, 255, 255]), &mut out);
    Some(out)
}

/// Detect the card on a downscaled copy and unwarp the full-resolution
/// image. `None` when no usable outline was found.
pub fn correct_perspective(image: &DynamicImage, config: &NormalizerConfig) -> Option<DynamicImage> {
    let (w, h) = (image.width(), image.height());
    if w == 0 || h == 0 {
        return None;
    }

    let detect = if w > config.processing_width {
        image.resize(config.processing_width, u32::MAX, FilterType::Triangle)
    } else {
        image.clone()
    };
    let scale = w as f32 / detect.width() as f32;

    let quad = find_card_quad(&detect.to_luma8(), config)?;
    let full_quad = quad.map(|(x, y)| (x * scale, y * scale));
    unwarp(&image.to_rgb8(), &full_quad).map(DynamicImage::ImageRgb8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_polygon_mut;

    #[test]
    fn test_order_points() {
        let shuffled = [(300.0, 210.0), (10.0, 20.0), (20.0, 200.0), (310.0, 15.0)];
        assert_eq!(
            order_points(&shuffled),
            [(10.0, 20.0), (310.0, 15.0), (300.0, 210.0), (20.0, 200.0)]
        );
    }

    #[test]
    fn test_should_warp_guards() {
        let config = NormalizerConfig::standard();
        let rectangle = [(0.0, 0.0), (316.0, 0.0), (316.0, 200.0), (0.0, 200.0)];
        assert!(!should_warp(&rectangle, &config));

        let trapezoid = [(40.0, 0.0), (276.0, 0.0), (316.0, 200.0), (0.0, 200.0)];
        assert!(should_warp(&trapezoid, &config));

        let tall = [(20.0, 0.0), (80.0, 0.0), (100.0, 300.0), (0.0, 300.0)];
        assert!(!should_warp(&tall, &config));
    }

    #[test]
    fn test_unwarp_output_size() {
        let image = RgbImage::from_pixel(400, 300, Rgb([200, 200, 200]));
        let quad = [(60.0, 40.0), (340.0, 40.0), (380.0, 260.0), (20.0, 260.0)];
        let out = unwarp(&image, &quad).unwrap();
        assert_eq!(out.dimensions(), (360, 224));
    }

    #[test]
    fn test_detects_tilted_card() {
        let mut gray = GrayImage::from_pixel(640, 480, Luma([0]));
        let corners = [
            Point::new(150, 120),
            Point::new(490, 120),
            Point::new(580, 380),
            Point::new(60, 380),
        ];
        draw_polygon_mut(&mut gray, &corners, Luma([255]));

        let quad = find_card_quad(&gray, &NormalizerConfig::standard()).unwrap();
        let found = order_points(&quad);
        let expected = [(150.0, 120.0), (490.0, 120.0), (580.0, 380.0), (60.0, 380.0)];
        for (f, e) in found.iter().zip(expected.iter()) {
            assert!(distance(*f, *e) < 15.0, "corner {:?} too far from {:?}", f, e);
        }
    }

    #[test]
    fn test_blank_image_is_left_alone() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([255, 255, 255])));
        assert!(correct_perspective(&image, &NormalizerConfig::standard()).is_none());
    }
}
