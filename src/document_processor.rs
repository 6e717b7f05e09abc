use crate::config::AppConfig;
use crate::models::*;
use crate::processing::*;
use crate::utils::DocumentError;
use image::imageops::FilterType;
use image::DynamicImage;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;

/// Which normalization variants to run per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ProcessingMode {
    /// Standard variant, retried with the enhanced one when the result is
    /// an error or scores below the completeness minimum.
    #[default]
    Standard,
    Enhanced,
    /// Both variants concurrently, merged.
    Both,
}

/// A successful extraction with its audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub record: StructuredRecord,
    /// Provenance of every resolved field, ordered by canonical field.
    pub fields: Vec<ExtractedField>,
    /// Fragments the fields were resolved from.
    pub fragments: Vec<TextFragment>,
    pub completeness: u32,
    /// Normalization variant that produced the fragments.
    pub variant: SourceVariant,
    /// Fragments of other variants that filled gaps in this result.
    pub merged_fragments: Vec<(SourceVariant, Vec<TextFragment>)>,
}

impl ExtractionResult {
    pub fn document_type(&self) -> DocumentType {
        self.record.document_type()
    }
}

impl Candidate for ExtractionResult {
    fn completeness(&self, scoring: &ScoringRules) -> u32 {
        self.record.completeness(scoring)
    }

    /// Gap-fills the record and copies the provenance of every field that
    /// changed it, marked with the variant it came from.
    fn fill_gaps_from(&mut self, other: &Self) -> bool {
        let before = self.record.clone();
        if !self.record.fill_gaps_from(&other.record) {
            return false;
        }

        let mut filled = false;
        for field in &other.fields {
            if self.fields.iter().any(|f| f.field == field.field) {
                continue;
            }
            if before.values_for(field.field) == self.record.values_for(field.field) {
                continue;
            }
            self.fields.push(ExtractedField {
                method: ResolutionMethod::MergedFrom(other.variant),
                ..field.clone()
            });
            filled = true;
        }
        if filled {
            self.fields.sort_by_key(|f| f.field);
            self.merged_fragments.push((other.variant, other.fragments.clone()));
        }
        true
    }
}

/// Public response for a pipeline outcome.
pub fn respond(result: &Result<ExtractionResult, DocumentError>) -> ApiResponse {
    match result {
        Ok(extraction) => ApiResponse::success(&extraction.record),
        Err(e) => ApiResponse::from_error(e),
    }
}

/// Runs the whole pipeline: normalize, recognize, classify, extract,
/// shape the output. Holds configuration only, so one instance can serve
/// concurrent callers.
pub struct DocumentProcessor {
    config: AppConfig,
    recognizer: Arc<dyn TextRecognizer>,
    standard: GeometricNormalizer,
    enhanced: GeometricNormalizer,
    classifier: DocumentClassifier,
    extractors: ExtractorSet,
}

impl DocumentProcessor {
    pub fn new(config: AppConfig, recognizer: Arc<dyn TextRecognizer>, face_detector: Arc<dyn FaceDetector>) -> Self {
        DocumentProcessor {
            standard: GeometricNormalizer::new(config.normalizer.clone(), face_detector.clone()),
            enhanced: GeometricNormalizer::new(config.enhanced_normalizer.clone(), face_detector),
            classifier: DocumentClassifier::new(config.classifier.clone()),
            extractors: ExtractorSet::new(config.ktp.clone(), config.sim.clone()),
            recognizer,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn process_path(&self, path: &Path, mode: ProcessingMode) -> Result<ExtractionResult, DocumentError> {
        if !path.exists() {
            return Err(DocumentError::FileNotFound(path.to_path_buf()));
        }
        let image = image::open(path).map_err(|e| {
            debug!("Decoding {} failed: {}", path.display(), e);
            DocumentError::ImageDecode(path.display().to_string())
        })?;
        self.process_image(&image, mode)
    }

    pub fn process_image(&self, image: &DynamicImage, mode: ProcessingMode) -> Result<ExtractionResult, DocumentError> {
        let candidates = match mode {
            ProcessingMode::Enhanced => return self.run_variant(image, SourceVariant::Enhanced),
            ProcessingMode::Both => {
                let (standard, enhanced) = rayon::join(
                    || self.run_variant(image, SourceVariant::Standard),
                    || self.run_variant(image, SourceVariant::Enhanced),
                );
                vec![standard, enhanced]
            }
            ProcessingMode::Standard => {
                let standard = self.run_variant(image, SourceVariant::Standard);
                let sufficient = matches!(
                    &standard,
                    Ok(result) if result.completeness >= self.config.scoring.min_completeness
                );
                if sufficient {
                    return standard;
                }
                info!("Standard variant insufficient, retrying with enhanced normalization");
                let enhanced = self.run_variant(image, SourceVariant::Enhanced);
                vec![standard, enhanced]
            }
        };

        let mut best = select_best(candidates, &self.config.scoring).unwrap_or(Err(DocumentError::NoTextDetected))?;
        best.completeness = best.record.completeness(&self.config.scoring);
        Ok(best)
    }

    /// Extract from pre-recognized output, skipping normalization and
    /// recognition.
    pub fn process_recognition(&self, output: &RecognitionOutput) -> Result<ExtractionResult, DocumentError> {
        let index = FragmentIndex::from_recognition(output);
        if index.is_empty() {
            return Err(DocumentError::NoTextDetected);
        }
        match self.classifier.classify(&index) {
            DocumentType::Unknown => Err(DocumentError::UnsupportedDocument),
            document_type => self.extract(&index, document_type, SourceVariant::Recognition),
        }
    }

    fn run_variant(&self, image: &DynamicImage, variant: SourceVariant) -> Result<ExtractionResult, DocumentError> {
        // Step 1: Normalize the photograph
        let normalizer = match variant {
            SourceVariant::Enhanced => &self.enhanced,
            _ => &self.standard,
        };
        let normalized = normalizer.normalize(image);

        // Step 2: Recognize text
        let index = self.recognize(&normalized)?.ok_or(DocumentError::NoTextDetected)?;

        // Step 3: Classify, retrying on the raw capture
        let mut document_type = self.classifier.classify(&index);
        let mut index = index;
        if document_type == DocumentType::Unknown {
            info!("Document type unknown after normalization, retrying on the raw image");
            if let Some((raw_index, raw_type)) = self.classify_raw(image)? {
                index = raw_index;
                document_type = raw_type;
            }
        }
        if document_type == DocumentType::Unknown {
            return Err(DocumentError::UnsupportedDocument);
        }
        info!("Document classified as {}", document_type);

        // Step 4: Extract fields
        self.extract(&index, document_type, variant)
    }

    fn recognize(&self, image: &DynamicImage) -> Result<Option<FragmentIndex>, DocumentError> {
        let Some(output) = self.recognizer.recognize(image)? else {
            return Ok(None);
        };
        let index = FragmentIndex::from_recognition(&output);
        debug!("Recognized {} fragments", index.len());
        Ok(if index.is_empty() { None } else { Some(index) })
    }

    fn classify_raw(&self, image: &DynamicImage) -> Result<Option<(FragmentIndex, DocumentType)>, DocumentError> {
        let raw = if image.width() > self.config.raw_fallback_width {
            image.resize(self.config.raw_fallback_width, u32::MAX, FilterType::CatmullRom)
        } else {
            image.clone()
        };
        let Some(index) = self.recognize(&raw)? else {
            return Ok(None);
        };
        match self.classifier.classify(&index) {
            DocumentType::Unknown => {
                warn!("Raw image is not a recognized document either");
                Ok(None)
            }
            document_type => Ok(Some((index, document_type))),
        }
    }

    fn extract(
        &self,
        index: &FragmentIndex,
        document_type: DocumentType,
        variant: SourceVariant,
    ) -> Result<ExtractionResult, DocumentError> {
        let extractor = self
            .extractors
            .select(document_type, index, &self.classifier)
            .ok_or(DocumentError::UnsupportedDocument)?;
        debug!("Extracting with {}", extractor.name());

        let partial = extractor.extract(index);
        let record = OutputNormalizer::to_record(&partial).ok_or(DocumentError::UnsupportedDocument)?;
        let completeness = record.completeness(&self.config.scoring);
        info!("{} extraction resolved {} fields, completeness {}", document_type, partial.fields.len(), completeness);

        Ok(ExtractionResult {
            record,
            fields: partial.fields,
            fragments: index.fragments().to_vec(),
            completeness,
            variant,
            merged_fragments: Vec::new(),
        })
    }
}
