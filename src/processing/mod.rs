pub mod address;
pub mod classifier;
pub mod deskew;
pub mod extractors;
pub mod fragments;
pub mod image_processor;
pub mod ktp;
pub mod merge;
pub mod ocr;
pub mod output;
pub mod perspective;
pub mod sim;
pub mod visualizer;

pub use address::AddressParser;
pub use classifier::{DocumentClassifier, SimLayout};
pub use extractors::{ExtractionContext, ExtractorSet, FieldExtractor, PartialRecord};
pub use fragments::FragmentIndex;
pub use image_processor::{GeometricNormalizer, NormalizerConfig};
pub use ktp::KtpExtractor;
pub use merge::{select_best, Candidate};
pub use ocr::{FaceDetector, NoFaceDetector, NoRecognizer, RecognitionOutput, TextRecognizer};
pub use output::OutputNormalizer;
pub use sim::{SimLegacyExtractor, SimSmartExtractor};
