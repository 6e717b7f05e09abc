use crate::models::{ClassifierRules, KtpRules, ScoringRules, SimRules};
use crate::processing::image_processor::NormalizerConfig;
use crate::utils::DocumentError;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every tunable of the pipeline. Missing keys in a config file keep their
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub normalizer: NormalizerConfig,
    pub enhanced_normalizer: NormalizerConfig,
    pub ktp: KtpRules,
    pub sim: SimRules,
    pub classifier: ClassifierRules,
    pub scoring: ScoringRules,
    /// Width of the raw image used for the second classification attempt.
    pub raw_fallback_width: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            normalizer: NormalizerConfig::standard(),
            enhanced_normalizer: NormalizerConfig::enhanced(),
            ktp: KtpRules::default(),
            sim: SimRules::default(),
            classifier: ClassifierRules::default(),
            scoring: ScoringRules::default(),
            raw_fallback_width: 1280,
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DocumentError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| DocumentError::BadRequest(format!("invalid config {}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}
