// Strategy interface shared by the KTP and SIM extractors, and the per-call
// bookkeeping that enforces single ownership of fragments.

use crate::models::{
    Address, CanonicalField, DocumentType, ExtractedField, KtpRules, ResolutionMethod, SimRules,
};
use crate::processing::classifier::{DocumentClassifier, SimLayout};
use crate::processing::fragments::FragmentIndex;
use crate::processing::ktp::KtpExtractor;
use crate::processing::sim::{SimLegacyExtractor, SimSmartExtractor};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Fields resolved by one extractor run, with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRecord {
    pub document_type: DocumentType,
    /// Ordered by canonical field.
    pub fields: Vec<ExtractedField>,
    /// Structured address, when the layout prints it as free text.
    pub address: Option<Address>,
}

impl PartialRecord {
    pub fn get(&self, field: CanonicalField) -> Option<&ExtractedField> {
        self.fields.iter().find(|f| f.field == field)
    }

    pub fn value(&self, field: CanonicalField) -> Option<&str> {
        self.get(field).map(|f| f.value.as_str())
    }
}

/// Scratch state for a single extraction call. Extractors create one per
/// call and never keep it.
#[derive(Debug, Default)]
pub struct ExtractionContext {
    claimed: BTreeSet<usize>,
    fields: BTreeMap<CanonicalField, ExtractedField>,
}

impl ExtractionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self, id: usize) -> bool {
        self.claimed.contains(&id)
    }

    pub fn claim(&mut self, id: usize) {
        self.claimed.insert(id);
    }

    pub fn has(&self, field: CanonicalField) -> bool {
        self.fields.contains_key(&field)
    }

    /// Field whose value was read from fragment `id`.
    pub fn owner_of(&self, id: usize) -> Option<CanonicalField> {
        self.fields
            .values()
            .find(|f| f.fragment_ids.contains(&id))
            .map(|f| f.field)
    }

    pub fn get(&self, field: CanonicalField) -> Option<&ExtractedField> {
        self.fields.get(&field)
    }

    pub fn value(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(|f| f.value.as_str())
    }

    /// Store a resolved field and claim its fragments. The first value for
    /// a field wins, and a fragment already owned by another field is never
    /// reassigned. Returns whether the value was stored.
    pub fn record(
        &mut self,
        field: CanonicalField,
        value: &str,
        fragment_ids: Vec<usize>,
        method: ResolutionMethod,
    ) -> bool {
        let value = value.trim();
        if value.is_empty() || self.has(field) {
            return false;
        }
        if fragment_ids.iter().any(|id| self.claimed.contains(id)) {
            debug!("{}: fragments {:?} already claimed", field, fragment_ids);
            return false;
        }

        debug!("{} = {:?} via {} from {:?}", field, value, method, fragment_ids);
        self.claimed.extend(fragment_ids.iter().copied());
        self.fields.insert(
            field,
            ExtractedField {
                field,
                value: value.to_string(),
                fragment_ids,
                method,
            },
        );
        true
    }

    /// Join another fragment onto an existing field, e.g. a second address
    /// line.
    pub fn append(&mut self, field: CanonicalField, text: &str, fragment_id: usize) -> bool {
        let text = text.trim();
        if text.is_empty() || self.claimed.contains(&fragment_id) {
            return false;
        }
        match self.fields.get_mut(&field) {
            Some(existing) => {
                existing.value = format!("{} {}", existing.value, text);
                existing.fragment_ids.push(fragment_id);
                self.claimed.insert(fragment_id);
                true
            }
            None => false,
        }
    }

    /// Rewrite a stored value in place. A rewrite to nothing drops the
    /// field but leaves its fragments claimed.
    pub fn rewrite<F>(&mut self, field: CanonicalField, rewrite: F)
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let Some(existing) = self.fields.get_mut(&field) else {
            return;
        };
        match rewrite(&existing.value).map(|v| v.trim().to_string()) {
            Some(value) if !value.is_empty() => existing.value = value,
            _ => {
                debug!("{} dropped during normalization", field);
                self.fields.remove(&field);
            }
        }
    }

    pub fn into_partial(self, document_type: DocumentType, address: Option<Address>) -> PartialRecord {
        PartialRecord {
            document_type,
            fields: self.fields.into_values().collect(),
            address,
        }
    }
}

/// One way of reading a card layout.
pub trait FieldExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn document_type(&self) -> DocumentType;
    fn extract(&self, index: &FragmentIndex) -> PartialRecord;
}

/// Every known layout strategy, built once from configuration.
pub struct ExtractorSet {
    ktp: KtpExtractor,
    sim_legacy: SimLegacyExtractor,
    sim_smart: SimSmartExtractor,
}

impl ExtractorSet {
    pub fn new(ktp: KtpRules, sim: SimRules) -> Self {
        ExtractorSet {
            ktp: KtpExtractor::new(ktp),
            sim_legacy: SimLegacyExtractor::new(sim.clone()),
            sim_smart: SimSmartExtractor::new(sim),
        }
    }

    /// Strategy for a classified document, or `None` for an unknown one.
    pub fn select(
        &self,
        document_type: DocumentType,
        index: &FragmentIndex,
        classifier: &DocumentClassifier,
    ) -> Option<&dyn FieldExtractor> {
        match document_type {
            DocumentType::Ktp => Some(&self.ktp),
            DocumentType::Sim => match classifier.sim_layout(index) {
                SimLayout::Legacy => Some(&self.sim_legacy),
                SimLayout::FreeForm => Some(&self.sim_smart),
            },
            DocumentType::Unknown => None,
        }
    }
}

impl Default for ExtractorSet {
    fn default() -> Self {
        Self::new(KtpRules::default(), SimRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::fragments::test_support::index_of;

    #[test]
    fn test_record_claims_fragments_once() {
        let mut ctx = ExtractionContext::new();
        assert!(ctx.record(CanonicalField::Nama, "BUDI", vec![3], ResolutionMethod::SameRow));
        assert!(ctx.is_claimed(3));
        assert!(!ctx.record(CanonicalField::Agama, "ISLAM", vec![3], ResolutionMethod::SameRow));
        assert!(!ctx.record(CanonicalField::Nama, "OTHER", vec![4], ResolutionMethod::SameRow));
        assert!(!ctx.record(CanonicalField::Agama, "  ", vec![5], ResolutionMethod::SameRow));
        assert_eq!(ctx.value(CanonicalField::Nama), Some("BUDI"));
    }

    #[test]
    fn test_append_joins_lines() {
        let mut ctx = ExtractionContext::new();
        ctx.record(CanonicalField::Alamat, "JL MAWAR", vec![1], ResolutionMethod::SameRow);
        assert!(ctx.append(CanonicalField::Alamat, "NO 5", 2));
        assert!(!ctx.append(CanonicalField::Alamat, "NO 5", 2));
        let alamat = ctx.get(CanonicalField::Alamat).unwrap();
        assert_eq!(alamat.value, "JL MAWAR NO 5");
        assert_eq!(alamat.fragment_ids, vec![1, 2]);
        assert_eq!(ctx.owner_of(2), Some(CanonicalField::Alamat));
        assert_eq!(ctx.owner_of(3), None);
    }

    #[test]
    fn test_rewrite_to_nothing_drops_field() {
        let mut ctx = ExtractionContext::new();
        ctx.record(CanonicalField::Agama, "??", vec![1], ResolutionMethod::SameRow);
        ctx.rewrite(CanonicalField::Agama, |_| None);
        assert!(!ctx.has(CanonicalField::Agama));
        assert!(ctx.is_claimed(1));
        assert_eq!(ctx.owner_of(1), None);

        let partial = ctx.into_partial(DocumentType::Ktp, None);
        assert!(partial.fields.is_empty());
    }

    #[test]
    fn test_select_by_type_and_layout() {
        let set = ExtractorSet::default();
        let classifier = DocumentClassifier::default();
        let legacy = index_of(&[("1. BUDI", 0.0, 0.0)]);
        let free = index_of(&[("Nama BUDI", 0.0, 0.0)]);

        assert_eq!(set.select(DocumentType::Ktp, &free, &classifier).unwrap().name(), "ktp");
        assert_eq!(set.select(DocumentType::Sim, &legacy, &classifier).unwrap().name(), "sim-legacy");
        assert_eq!(set.select(DocumentType::Sim, &free, &classifier).unwrap().name(), "sim-smart");
        assert!(set.select(DocumentType::Unknown, &free, &classifier).is_none());
    }
}
