pub mod config;
pub mod document_processor;
pub mod models;
pub mod processing;
pub mod utils;

pub use config::AppConfig;
pub use document_processor::{respond, DocumentProcessor, ExtractionResult, ProcessingMode};
pub use utils::DocumentError;
