use crate::models::{ClassifierRules, DocumentType};
use crate::processing::fragments::FragmentIndex;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    // A section number directly followed by text, as printed on the
    // numbered SIM layout ("1. BUDI", "4.JL MAWAR").
    static ref NUMBERED_MARKER: Regex = Regex::new(r"(?:^|\s)[1-6]\.\s*\p{L}").unwrap();
    static ref LONE_MARKER: Regex = Regex::new(r"^\s*[1-6]\.\s*$").unwrap();
}

/// SIM card revision, decided from the presence of numbered sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimLayout {
    Legacy,
    FreeForm,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentClassifier {
    rules: ClassifierRules,
}

impl DocumentClassifier {
    pub fn new(rules: ClassifierRules) -> Self {
        DocumentClassifier { rules }
    }

    /// Decide the document type from keyword presence in the full text.
    pub fn classify(&self, index: &FragmentIndex) -> DocumentType {
        let text = index.full_text().to_uppercase();

        if self.rules.sim_markers.iter().any(|m| text.contains(&m.to_uppercase())) {
            debug!("Classified as SIM");
            return DocumentType::Sim;
        }

        let has_required = !self.rules.ktp_required.is_empty()
            && self.rules.ktp_required.iter().all(|m| text.contains(&m.to_uppercase()));
        let has_any = self.rules.ktp_any_of.iter().any(|m| text.contains(&m.to_uppercase()));
        if has_required && has_any {
            debug!("Classified as KTP");
            return DocumentType::Ktp;
        }

        debug!("No document keywords found in {} fragments", index.len());
        DocumentType::Unknown
    }

    pub fn sim_layout(&self, index: &FragmentIndex) -> SimLayout {
        let numbered = NUMBERED_MARKER.is_match(&index.full_text())
            || index.fragments().iter().any(|f| LONE_MARKER.is_match(&f.text));
        if numbered {
            SimLayout::Legacy
        } else {
            SimLayout::FreeForm
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::fragments::test_support::index_of;

    #[test]
    fn test_classify_sim() {
        let index = index_of(&[("SURAT IZIN MENGEMUDI", 0.0, 0.0), ("BUDI", 0.0, 40.0)]);
        let classifier = DocumentClassifier::default();
        assert_eq!(classifier.classify(&index), DocumentType::Sim);
    }

    #[test]
    fn test_classify_ktp_needs_provinsi_and_nik() {
        let classifier = DocumentClassifier::default();
        let ktp = index_of(&[("provinsi jawa barat", 0.0, 0.0), ("NIK", 0.0, 40.0)]);
        assert_eq!(classifier.classify(&ktp), DocumentType::Ktp);

        let kartu = index_of(&[("PROVINSI BALI", 0.0, 0.0), ("KARTU TANDA PENDUDUK", 0.0, 40.0)]);
        assert_eq!(classifier.classify(&kartu), DocumentType::Ktp);

        let provinsi_only = index_of(&[("PROVINSI BALI", 0.0, 0.0)]);
        assert_eq!(classifier.classify(&provinsi_only), DocumentType::Unknown);
    }

    #[test]
    fn test_classify_unknown() {
        let index = index_of(&[("RECEIPT", 0.0, 0.0), ("TOTAL 50000", 0.0, 40.0)]);
        assert_eq!(DocumentClassifier::default().classify(&index), DocumentType::Unknown);
    }

    #[test]
    fn test_sim_layout_detection() {
        let classifier = DocumentClassifier::default();
        let legacy = index_of(&[("1. BUDI SANTOSO", 0.0, 0.0)]);
        assert_eq!(classifier.sim_layout(&legacy), SimLayout::Legacy);

        let split = index_of(&[("2.", 0.0, 0.0), ("JAKARTA", 40.0, 0.0)]);
        assert_eq!(classifier.sim_layout(&split), SimLayout::Legacy);

        let free = index_of(&[("Nama", 0.0, 0.0), ("BUDI", 100.0, 0.0), ("1234-5678-123456", 0.0, 40.0)]);
        assert_eq!(classifier.sim_layout(&free), SimLayout::FreeForm);
    }
}
