use crate::utils::DocumentError;
use image::{DynamicImage, GrayImage};
use imageproc::rect::Rect;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Raw output of one recognition pass: three parallel arrays, one entry per
/// detected text region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOutput {
    pub dt_polys: Vec<Vec<[f32; 2]>>,
    pub rec_texts: Vec<String>,
    #[serde(default)]
    pub rec_scores: Vec<f32>,
}

impl RecognitionOutput {
    /// Load pre-recognized output saved as JSON.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DocumentError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| DocumentError::BadRequest(format!("invalid recognition JSON: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        self.rec_texts.iter().all(|t| t.trim().is_empty())
    }

    /// Append an axis-aligned box.
    pub fn push_box(&mut self, left: f32, top: f32, width: f32, height: f32, text: &str, score: f32) {
        self.dt_polys.push(vec![
            [left, top],
            [left + width, top],
            [left + width, top + height],
            [left, top + height],
        ]);
        self.rec_texts.push(text.to_string());
        self.rec_scores.push(score);
    }
}

/// External text-recognition engine. `Ok(None)` means no text was found,
/// which is a normal outcome rather than a failure.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<Option<RecognitionOutput>, DocumentError>;
}

/// External face detector, used only to guess card orientation.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Vec<Rect>;
}

/// Detector that never finds a face. Orientation then falls back to
/// turning portrait captures to landscape.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect(&self, _image: &GrayImage) -> Vec<Rect> {
        Vec::new()
    }
}

/// Recognizer that never finds text, for callers that only feed
/// pre-recognized output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecognizer;

impl TextRecognizer for NoRecognizer {
    fn recognize(&self, _image: &DynamicImage) -> Result<Option<RecognitionOutput>, DocumentError> {
        Ok(None)
    }
}

/// Group word rows of Tesseract TSV output into line fragments.
pub fn parse_tsv(tsv: &str) -> RecognitionOutput {
    struct LineBox {
        words: Vec<String>,
        left: i64,
        top: i64,
        right: i64,
        bottom: i64,
        confidences: Vec<f32>,
    }

    let mut lines: BTreeMap<(i64, i64, i64, i64), LineBox> = BTreeMap::new();
    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let nums: Option<Vec<i64>> = cols[1..10].iter().map(|c| c.parse().ok()).collect();
        let Some(nums) = nums else {
            debug!("Skipping malformed TSV row {:?}", row);
            continue;
        };
        let (left, top, width, height) = (nums[5], nums[6], nums[7], nums[8]);

        let entry = lines.entry((nums[0], nums[1], nums[2], nums[3])).or_insert(LineBox {
            words: Vec::new(),
            left,
            top,
            right: left + width,
            bottom: top + height,
            confidences: Vec::new(),
        });
        entry.words.push(text.to_string());
        entry.left = entry.left.min(left);
        entry.top = entry.top.min(top);
        entry.right = entry.right.max(left + width);
        entry.bottom = entry.bottom.max(top + height);
        entry.confidences.push(conf / 100.0);
    }

    let mut output = RecognitionOutput::default();
    for line in lines.values() {
        let score = line.confidences.iter().sum::<f32>() / line.confidences.len() as f32;
        output.push_box(
            line.left as f32,
            line.top as f32,
            (line.right - line.left) as f32,
            (line.bottom - line.top) as f32,
            &line.words.join(" "),
            score,
        );
    }
    output
}

#[cfg(feature = "tesseract")]
pub use self::tesseract_backend::TesseractRecognizer;

#[cfg(feature = "tesseract")]
mod tesseract_backend {
    use super::*;
    use tempfile::Builder;
    use tesseract::Tesseract;

    /// Line-level recognizer on top of libtesseract.
    pub struct TesseractRecognizer {
        language: String,
    }

    impl TesseractRecognizer {
        pub fn new(language: &str) -> Self {
            TesseractRecognizer {
                language: language.to_string(),
            }
        }
    }

    impl TextRecognizer for TesseractRecognizer {
        fn recognize(&self, image: &DynamicImage) -> Result<Option<RecognitionOutput>, DocumentError> {
            let temp_file = Builder::new().suffix(".png").tempfile()?;
            image
                .save(temp_file.path())
                .map_err(|e| DocumentError::Recognition(format!("Failed to write temp image: {}", e)))?;
            let image_path = temp_file
                .path()
                .to_str()
                .ok_or_else(|| DocumentError::Recognition("Failed to convert path to string".to_string()))?;

            let tsv = Tesseract::new(None, Some(&self.language))
                .map_err(|e| DocumentError::Recognition(format!("Tesseract init error: {}", e)))?
                .set_image(image_path)
                .map_err(|e| DocumentError::Recognition(format!("Tesseract set image error: {}", e)))?
                .get_tsv_text(0)
                .map_err(|e| DocumentError::Recognition(format!("Tesseract error: {}", e)))?;

            let output = parse_tsv(&tsv);
            debug!("Tesseract returned {} lines", output.rec_texts.len());
            if output.is_empty() {
                Ok(None)
            } else {
                Ok(Some(output))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t500\t-1\t
4\t1\t1\t1\t1\t0\t40\t30\t300\t24\t-1\t
5\t1\t1\t1\t1\t1\t40\t30\t80\t24\t96.5\tNama
5\t1\t1\t1\t1\t2\t130\t32\t10\t20\t90.0\t:
5\t1\t1\t1\t1\t3\t150\t31\t190\t22\t91.5\tBUDI
5\t1\t1\t1\t2\t1\t40\t70\t60\t24\t88.0\tNIK
5\t1\t1\t1\t2\t2\t110\t70\t60\t24\t-1\t
";

    #[test]
    fn test_parse_tsv_groups_words_into_lines() {
        let output = parse_tsv(TSV);
        assert_eq!(output.rec_texts, vec!["Nama : BUDI".to_string(), "NIK".to_string()]);
        assert_eq!(output.dt_polys[0], vec![[40.0, 30.0], [340.0, 30.0], [340.0, 54.0], [40.0, 54.0]]);
        assert!((output.rec_scores[0] - 0.9266).abs() < 0.001);
        assert!((output.rec_scores[1] - 0.88).abs() < 0.001);
    }

    #[test]
    fn test_recognition_json_loading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"dt_polys": [[[0,0],[10,0],[10,5],[0,5]]], "rec_texts": ["NIK"], "rec_scores": [0.9]}"#,
        )
        .unwrap();
        let output = RecognitionOutput::from_json_file(file.path()).unwrap();
        assert_eq!(output.rec_texts, vec!["NIK".to_string()]);
        assert!(!output.is_empty());

        let missing = RecognitionOutput::from_json_file("/definitely/not/here.json");
        assert!(matches!(missing, Err(DocumentError::FileNotFound(_))));
    }

    #[test]
    fn test_no_face_detector() {
        assert!(NoFaceDetector.detect(&GrayImage::new(4, 4)).is_empty());
    }

    #[test]
    fn test_no_recognizer() {
        let image = DynamicImage::ImageLuma8(GrayImage::new(4, 4));
        assert!(matches!(NoRecognizer.recognize(&image), Ok(None)));
    }
}
