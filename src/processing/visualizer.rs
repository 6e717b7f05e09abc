// Debug overlay of recognized fragment boxes.

use crate::processing::fragments::FragmentIndex;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

const CONFIDENT: Rgb<u8> = Rgb([0, 200, 0]);
const DOUBTFUL: Rgb<u8> = Rgb([220, 0, 0]);
const CONFIDENCE_CUTOFF: f32 = 0.8;

/// Outline every fragment quad, green when the recognizer was confident,
/// red otherwise. Lines are drawn twice for a 2px stroke.
pub fn draw_fragments(image: &RgbImage, index: &FragmentIndex) -> RgbImage {
    let mut output = image.clone();
    for fragment in index.fragments() {
        let color = if fragment.confidence >= CONFIDENCE_CUTOFF { CONFIDENT } else { DOUBTFUL };
        for i in 0..4 {
            let a = fragment.polygon[i];
            let b = fragment.polygon[(i + 1) % 4];
            for t in 0..2 {
                let offset = t as f32;
                draw_line_segment_mut(&mut output, (a.x + offset, a.y + offset), (b.x + offset, b.y + offset), color);
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ocr::RecognitionOutput;

    #[test]
    fn test_boxes_colored_by_confidence() {
        let mut output = RecognitionOutput::default();
        output.push_box(10.0, 10.0, 40.0, 20.0, "NIK", 0.95);
        output.push_box(10.0, 60.0, 40.0, 20.0, "BUDI", 0.4);
        let index = FragmentIndex::from_recognition(&output);

        let canvas = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let drawn = draw_fragments(&canvas, &index);
        assert_eq!(drawn.get_pixel(30, 10), &CONFIDENT);
        assert_eq!(drawn.get_pixel(30, 60), &DOUBTFUL);
        assert_eq!(drawn.get_pixel(30, 40), &Rgb([255, 255, 255]));
    }
}
