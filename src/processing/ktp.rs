use crate::models::{CanonicalField, DocumentType, KtpRules, ResolutionMethod, TextFragment};
use crate::processing::address::find_rt_rw;
use crate::processing::extractors::{ExtractionContext, FieldExtractor, PartialRecord};
use crate::processing::fragments::FragmentIndex;
use crate::utils::fuzzy;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    static ref TRAILING_DATE: Regex = Regex::new(r"\s+\d{2}-\d{2}-\d{4}$").unwrap();
    static ref SIXTEEN_DIGITS: Regex = Regex::new(r"^\d{16}$").unwrap();
}

/// A fragment recognised as a printed field label.
#[derive(Debug, Clone, Copy)]
struct KeyCandidate<'a> {
    fragment: &'a TextFragment,
    field: CanonicalField,
    score: u32,
    full_score: u32,
}

/// Label/value resolution for the national ID card layout.
pub struct KtpExtractor {
    rules: KtpRules,
    labels: Vec<String>,
}

impl KtpExtractor {
    pub fn new(rules: KtpRules) -> Self {
        let labels = rules
            .canonical_fields
            .iter()
            .map(|f| f.label().to_string())
            .collect();
        KtpExtractor { rules, labels }
    }

    fn best_label(&self, text: &str) -> Option<(CanonicalField, u32)> {
        let (label, score) = fuzzy::extract_one(text, &self.labels, fuzzy::partial_ratio)?;
        let pos = self.labels.iter().position(|l| l == label)?;
        Some((self.rules.canonical_fields[pos], score))
    }

    fn long_enough(&self, fragment: &TextFragment) -> bool {
        fragment.text.trim().chars().count() >= self.rules.min_key_chars
    }

    // Pass 1: drop everything well below the last recognisable label, such
    // as text from whatever the card was photographed on.
    fn filter_outliers(&self, index: &FragmentIndex) -> FragmentIndex {
        let label_ys: Vec<f32> = index
            .fragments()
            .iter()
            .filter(|f| self.long_enough(f))
            .filter(|f| {
                self.best_label(&f.text)
                    .map_or(false, |(_, score)| score > self.rules.outlier_match_score)
            })
            .map(|f| f.y_center())
            .collect();

        if label_ys.len() < 2 {
            return index.clone();
        }

        let min_y = label_ys.iter().copied().fold(f32::INFINITY, f32::min);
        let max_y = label_ys.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let cutoff = max_y + self.rules.outlier_span_factor * (max_y - min_y);

        let kept = index.subset(|f| f.y_center() <= cutoff);
        if kept.len() < index.len() {
            debug!("Dropped {} fragments below y={:.1}", index.len() - kept.len(), cutoff);
        }
        kept
    }

    fn alias_field(&self, text: &str) -> Option<CanonicalField> {
        let normalized = normalize_label_text(text);
        self.rules
            .label_aliases
            .iter()
            .find(|alias| {
                normalized.starts_with(alias.prefix.as_str())
                    && normalized[alias.prefix.len()..]
                        .chars()
                        .next()
                        .map_or(true, |c| !c.is_alphanumeric())
            })
            .map(|alias| alias.field)
    }

    // Pass 2: split fragments into labels and values. Only the best label
    // per field survives; weaker duplicates go back to the value pool.
    fn classify<'a>(&self, index: &'a FragmentIndex) -> (Vec<KeyCandidate<'a>>, Vec<&'a TextFragment>) {
        let mut values = Vec::new();
        let mut by_field: BTreeMap<CanonicalField, Vec<KeyCandidate<'a>>> = BTreeMap::new();

        for fragment in index.fragments() {
            if !self.long_enough(fragment) {
                values.push(fragment);
                continue;
            }

            let candidate = match self.best_label(&fragment.text) {
                Some((field, score)) if score > self.rules.key_match_score => Some(KeyCandidate {
                    fragment,
                    field,
                    score,
                    full_score: fuzzy::ratio(
                        &fuzzy::full_process(&fragment.text),
                        &fuzzy::full_process(field.label()),
                    ),
                }),
                _ => self.alias_field(&fragment.text).map(|field| KeyCandidate {
                    fragment,
                    field,
                    score: self.rules.key_match_score,
                    full_score: 0,
                }),
            };

            match candidate {
                Some(candidate) => by_field.entry(candidate.field).or_default().push(candidate),
                None => values.push(fragment),
            }
        }

        let mut keys = Vec::new();
        for (field, mut candidates) in by_field {
            candidates.sort_by(|a, b| {
                b.score
                    .cmp(&a.score)
                    .then(b.full_score.cmp(&a.full_score))
                    .then(a.fragment.y_center().total_cmp(&b.fragment.y_center()))
                    .then(a.fragment.id.cmp(&b.fragment.id))
            });
            let mut rest = candidates.into_iter();
            if let Some(best) = rest.next() {
                keys.push(best);
            }
            for demoted in rest {
                debug!("{:?} demoted to value, {} already has a label", demoted.fragment.text, field);
                values.push(demoted.fragment);
            }
        }

        keys.sort_by(|a, b| {
            a.fragment
                .y_center()
                .total_cmp(&b.fragment.y_center())
                .then(a.fragment.x_start().total_cmp(&b.fragment.x_start()))
                .then(a.fragment.id.cmp(&b.fragment.id))
        });
        values.sort_by_key(|f| f.id);
        (keys, values)
    }

    // Header lines print label and value together: "PROVINSI JAWA BARAT",
    // sometimes with the space lost to OCR.
    fn header_residual(&self, key: &KeyCandidate) -> Option<String> {
        let text = key.fragment.text.trim();
        let first_upper = text
            .split_whitespace()
            .next()?
            .trim_end_matches(|c: char| !c.is_alphanumeric())
            .to_uppercase();

        // City headers keep their KOTA prefix
        if first_upper == "KOTA" {
            return text.split_whitespace().nth(1).map(|_| text.to_string());
        }

        let rest = if first_upper == "KAB" {
            text.split_once(char::is_whitespace).map_or("", |(_, rest)| rest)
        } else {
            self.strip_label_prefix(text, key.field.label())?
        };
        let residual = rest.trim_start_matches(|c: char| !c.is_alphanumeric()).trim();
        if residual.is_empty() {
            None
        } else {
            Some(residual.to_string())
        }
    }

    /// Text after the prefix that best matches `label`, compared without
    /// case. Prefixes one character shorter or longer than the label are
    /// tried too; ties keep the shorter prefix.
    fn strip_label_prefix<'t>(&self, text: &'t str, label: &str) -> Option<&'t str> {
        let label = label.to_uppercase();
        let label_len = label.chars().count();
        let ends: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(text.len()))
            .collect();

        let mut best: Option<(u32, usize)> = None;
        for len in label_len.saturating_sub(1).max(1)..=label_len + 1 {
            let Some(&end) = ends.get(len - 1) else {
                break;
            };
            let score = fuzzy::ratio(text[..end].trim_end().to_uppercase().as_str(), &label);
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, end));
            }
        }
        match best {
            Some((score, end)) if score >= self.rules.key_match_score => Some(&text[end..]),
            _ => None,
        }
    }

    fn same_row_value<'a>(
        &self,
        index: &'a FragmentIndex,
        key: &KeyCandidate,
        keys: &[KeyCandidate],
        values: &[&'a TextFragment],
        ctx: &ExtractionContext,
    ) -> Option<&'a TextFragment> {
        let anchor = key.fragment;
        let tolerance = self.rules.same_row_tolerance;

        index
            .right_of(anchor, tolerance)
            .into_iter()
            .filter(|v| is_value(values, v) && !ctx.is_claimed(v.id) && !is_punctuation_only(&v.text))
            // a value past another label on the same row belongs to that label
            .filter(|v| {
                !keys.iter().any(|other| {
                    other.fragment.id != anchor.id
                        && (other.fragment.y_center() - anchor.y_center()).abs() < tolerance
                        && other.fragment.x_start() > anchor.x_end()
                        && other.fragment.x_start() < v.x_start()
                })
            })
            .map(|v| {
                let cost = (v.x_start() - anchor.x_end())
                    + self.rules.vertical_weight * (v.y_center() - anchor.y_center()).abs();
                (cost, v)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)))
            .map(|(_, v)| v)
    }

    // The address often wraps onto a second line above the RT/RW row.
    fn alamat_continuation<'a>(
        &self,
        first_line: &TextFragment,
        keys: &[KeyCandidate],
        values: &[&'a TextFragment],
        ctx: &ExtractionContext,
    ) -> Option<&'a TextFragment> {
        let rt_rw_y = keys
            .iter()
            .find(|k| k.field == CanonicalField::RtRw)
            .map(|k| k.fragment.y_center());
        let line_y = first_line.y_center();
        let min_gap = (first_line.bottom() - first_line.top()) / 2.0;

        values
            .iter()
            .copied()
            .filter(|v| !ctx.is_claimed(v.id) && !is_punctuation_only(&v.text))
            .filter(|v| {
                let dy = v.y_center() - line_y;
                if dy <= min_gap {
                    return false;
                }
                match rt_rw_y {
                    Some(rt_y) => v.y_center() < rt_y - self.rules.rt_rw_row_tolerance,
                    None => dy <= self.rules.alamat_continuation_window,
                }
            })
            .min_by(|a, b| {
                a.y_center()
                    .total_cmp(&b.y_center())
                    .then(a.x_start().total_cmp(&b.x_start()))
                    .then(a.id.cmp(&b.id))
            })
    }

    fn nik_below<'a>(
        &self,
        index: &'a FragmentIndex,
        key: &TextFragment,
        values: &[&'a TextFragment],
        ctx: &ExtractionContext,
    ) -> Option<&'a TextFragment> {
        index
            .below(key, self.rules.nik_below_window)
            .into_iter()
            .filter(|v| is_value(values, v) && !ctx.is_claimed(v.id))
            .filter(|v| v.text.trim_start().starts_with(|c: char| c.is_ascii_digit()))
            .min_by(|a, b| {
                a.y_center()
                    .total_cmp(&b.y_center())
                    .then(a.id.cmp(&b.id))
            })
    }

    // Pass 3
    fn resolve_keys<'a>(
        &self,
        index: &'a FragmentIndex,
        keys: &[KeyCandidate<'a>],
        values: &[&'a TextFragment],
        ctx: &mut ExtractionContext,
    ) {
        for key in keys {
            let field = key.field;
            if ctx.has(field) {
                continue;
            }
            let id = key.fragment.id;

            let mut source_line = None;
            if matches!(field, CanonicalField::Provinsi | CanonicalField::Kabupaten) {
                if let Some(value) = self.header_residual(key) {
                    if ctx.record(field, &value, vec![id], ResolutionMethod::HeaderResidual) {
                        continue;
                    }
                }
            }

            if let Some((_, value)) = key.fragment.text.split_once(':') {
                if !is_punctuation_only(value)
                    && ctx.record(field, value, vec![id], ResolutionMethod::InlineColon)
                {
                    source_line = Some(key.fragment);
                }
            }

            if source_line.is_none() {
                if let Some(value) = self.same_row_value(index, key, keys, values, ctx) {
                    if ctx.record(field, &value.text, vec![value.id], ResolutionMethod::SameRow) {
                        source_line = Some(value);
                    }
                }
            }

            match (field, source_line) {
                (CanonicalField::Alamat, Some(line)) => {
                    if let Some(next) = self.alamat_continuation(line, keys, values, ctx) {
                        ctx.append(field, &next.text, next.id);
                    }
                }
                (CanonicalField::Nik, None) => {
                    if let Some(value) = self.nik_below(index, key.fragment, values, ctx) {
                        ctx.record(field, &value.text, vec![value.id], ResolutionMethod::BelowKey);
                    }
                }
                _ => {}
            }
        }
    }

    // Labels that resolved nothing but read as a value of their own field,
    // like a lone "KAWIN" taken for the Status Perkawinan label.
    fn unresolved_values<'a>(&self, keys: &[KeyCandidate<'a>], ctx: &ExtractionContext) -> Vec<&'a TextFragment> {
        keys.iter()
            .filter(|key| !ctx.has(key.field) && !ctx.is_claimed(key.fragment.id))
            .filter(|key| {
                self.rules
                    .value_vocabularies
                    .iter()
                    .filter(|vocabulary| vocabulary.field == key.field)
                    .flat_map(|vocabulary| vocabulary.values.iter())
                    .any(|term| fuzzy::token_set_ratio(&key.fragment.text, term) > self.rules.vocabulary_score)
            })
            .map(|key| key.fragment)
            .collect()
    }

    // Pass 4: fields whose label was never found.
    fn recover_vocabulary(&self, values: &[&TextFragment], ctx: &mut ExtractionContext) {
        for vocabulary in &self.rules.value_vocabularies {
            if ctx.has(vocabulary.field) {
                continue;
            }

            let mut best: Option<(u32, u32, &TextFragment, &str)> = None;
            for fragment in values.iter().copied() {
                if ctx.is_claimed(fragment.id) || !self.long_enough(fragment) {
                    continue;
                }
                let text = if vocabulary.field == CanonicalField::JenisKelamin {
                    apply_replacements(&fragment.text, &self.rules.gender_corrections)
                } else {
                    fragment.text.clone()
                };
                let processed = fuzzy::full_process(&text);

                for term in &vocabulary.values {
                    let score = fuzzy::token_set_ratio(&text, term);
                    if score <= self.rules.vocabulary_score {
                        continue;
                    }
                    let full = fuzzy::ratio(&processed, &fuzzy::full_process(term));
                    let better = match best {
                        Some((s, f, _, _)) => (score, full) > (s, f),
                        None => true,
                    };
                    if better {
                        best = Some((score, full, fragment, term.as_str()));
                    }
                }
            }

            if let Some((_, _, fragment, term)) = best {
                ctx.record(vocabulary.field, term, vec![fragment.id], ResolutionMethod::VocabularyMatch);
            }
        }
    }

    fn recover_nama(&self, keys: &[KeyCandidate], values: &[&TextFragment], ctx: &mut ExtractionContext) {
        if ctx.has(CanonicalField::Nama) {
            return;
        }
        let key_of = |field| keys.iter().find(|k| k.field == field).map(|k| k.fragment);
        let band = self.rules.nama_band;
        let (low, high) = match (key_of(CanonicalField::Nik), key_of(CanonicalField::TempatTglLahir)) {
            (Some(nik), Some(ttl)) => (nik.bottom(), ttl.top()),
            (Some(nik), None) => (nik.bottom(), nik.bottom() + band),
            (None, Some(ttl)) => (ttl.top() - band, ttl.top()),
            (None, None) => return,
        };

        let candidate = values
            .iter()
            .copied()
            .filter(|v| !ctx.is_claimed(v.id) && !is_punctuation_only(&v.text))
            .filter(|v| !v.text.trim_start().starts_with(|c: char| c.is_ascii_digit()))
            .filter(|v| v.y_center() > low && v.y_center() < high)
            .min_by(|a, b| a.x_start().total_cmp(&b.x_start()).then(a.id.cmp(&b.id)));

        if let Some(fragment) = candidate {
            ctx.record(CanonicalField::Nama, &fragment.text, vec![fragment.id], ResolutionMethod::PositionalName);
        }
    }

    fn recover_nik(&self, index: &FragmentIndex, ctx: &mut ExtractionContext) {
        if ctx.has(CanonicalField::Nik) {
            return;
        }
        for fragment in index.fragments() {
            if ctx.is_claimed(fragment.id) {
                continue;
            }
            let compact: String = fragment.text.chars().filter(|c| !c.is_whitespace()).collect();
            if SIXTEEN_DIGITS.is_match(&compact) {
                ctx.record(CanonicalField::Nik, &compact, vec![fragment.id], ResolutionMethod::NikPattern);
                return;
            }
        }
    }

    // Pass 5
    fn normalize(&self, ctx: &mut ExtractionContext) {
        for field in self.rules.canonical_fields.iter().copied() {
            ctx.rewrite(field, |value| {
                let mut value = value.replace(':', "");
                value = value
                    .trim_start_matches(|c: char| !c.is_alphanumeric())
                    .trim()
                    .to_string();
                if !field.is_date_field() {
                    value = TRAILING_DATE.replace(&value, "").trim().to_string();
                }

                let value = match field {
                    CanonicalField::JenisKelamin => {
                        canonical_gender(&apply_replacements(&value, &self.rules.gender_corrections))
                    }
                    CanonicalField::StatusPerkawinan => canonical_marital_status(&value),
                    CanonicalField::Alamat => strip_trailing_rt_rw(&value),
                    CanonicalField::RtRw => find_rt_rw(&value).map(|m| m.value).unwrap_or(value),
                    CanonicalField::Pekerjaan => {
                        apply_replacements(&value, &self.rules.occupation_corrections)
                    }
                    _ => value,
                };
                Some(value)
            });
        }
    }
}

impl FieldExtractor for KtpExtractor {
    fn name(&self) -> &'static str {
        "ktp"
    }

    fn document_type(&self) -> DocumentType {
        DocumentType::Ktp
    }

    fn extract(&self, index: &FragmentIndex) -> PartialRecord {
        let mut ctx = ExtractionContext::new();
        let working = self.filter_outliers(index);
        let (keys, mut values) = self.classify(&working);
        debug!("KTP: {} labels, {} values", keys.len(), values.len());

        self.resolve_keys(&working, &keys, &values, &mut ctx);
        let returned = self.unresolved_values(&keys, &ctx);
        if !returned.is_empty() {
            debug!("{} unresolved labels returned to the value pool", returned.len());
            values.extend(returned);
            values.sort_by_key(|f| f.id);
        }
        self.recover_vocabulary(&values, &mut ctx);
        self.recover_nama(&keys, &values, &mut ctx);
        self.recover_nik(&working, &mut ctx);
        self.normalize(&mut ctx);

        ctx.into_partial(DocumentType::Ktp, None)
    }
}

/// Uppercase, keep letters, digits and '/', collapse spaces.
fn normalize_label_text(text: &str) -> String {
    let kept: String = text
        .to_uppercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '/' || c.is_whitespace())
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" /", "/")
        .replace("/ ", "/")
}

fn is_value(values: &[&TextFragment], fragment: &TextFragment) -> bool {
    values.iter().any(|v| v.id == fragment.id)
}

fn is_punctuation_only(text: &str) -> bool {
    !text.chars().any(|c| c.is_alphanumeric())
}

fn apply_replacements(text: &str, replacements: &[crate::models::Replacement]) -> String {
    let mut upper = text.to_uppercase();
    for replacement in replacements {
        if upper.contains(replacement.from.as_str()) {
            upper = upper.replace(replacement.from.as_str(), &replacement.to);
        }
    }
    if upper == text.to_uppercase() {
        text.to_string()
    } else {
        upper
    }
}

pub(crate) fn canonical_gender(value: &str) -> String {
    let upper = value.to_uppercase();
    // FEMALE contains MALE
    if ["PEREMPUAN", "WANITA", "FEMALE"].iter().any(|s| upper.contains(s)) {
        return "PEREMPUAN".to_string();
    }
    if ["LAKI", "PRIA", "MALE", "MAE"].iter().any(|s| upper.contains(s)) {
        return "LAKI-LAKI".to_string();
    }
    match upper.get(..2) {
        Some("LA") => "LAKI-LAKI".to_string(),
        Some("PE") => "PEREMPUAN".to_string(),
        _ => value.to_string(),
    }
}

fn canonical_marital_status(value: &str) -> String {
    let upper = value.to_uppercase();
    if upper.contains("BELUM") {
        return "BELUM KAWIN".to_string();
    }
    if upper.contains("CERAI") {
        if upper.contains("HIDUP") {
            return "CERAI HIDUP".to_string();
        }
        if upper.contains("MATI") {
            return "CERAI MATI".to_string();
        }
        return value.to_string();
    }
    if upper.contains("KAWIN") || upper.contains("MARRIED") {
        return "KAWIN".to_string();
    }
    match upper.get(..2) {
        Some("BE") => "BELUM KAWIN".to_string(),
        Some("KA") => "KAWIN".to_string(),
        _ => value.to_string(),
    }
}

fn strip_trailing_rt_rw(value: &str) -> String {
    match find_rt_rw(value) {
        Some(found) if found.start > 0 && found.end == value.len() => {
            value[..found.start].trim_end().to_string()
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::fragments::test_support::{frag, index_of};

    fn extract(items: &[(&str, f32, f32)]) -> PartialRecord {
        KtpExtractor::new(KtpRules::default()).extract(&index_of(items))
    }

    fn sample_card() -> Vec<(&'static str, f32, f32)> {
        vec![
            ("PROVINSI JAWA BARAT", 300.0, 20.0),
            ("KOTA DEPOK", 340.0, 50.0),
            ("NIK", 20.0, 100.0),
            ("3276012505900002", 200.0, 102.0),
            ("Nama", 20.0, 140.0),
            (":", 150.0, 140.0),
            ("BUDI SANTOSO", 200.0, 141.0),
            ("Tempat/Tgl Lahir", 20.0, 170.0),
            ("DEPOK, 25-05-1990", 250.0, 171.0),
            ("Jenis Kelamin", 20.0, 200.0),
            ("LAKI-LAKI", 200.0, 200.0),
            ("Gol. Darah", 400.0, 200.0),
            ("O", 540.0, 200.0),
            ("Alamat", 20.0, 230.0),
            ("JL MAWAR NO 5", 200.0, 230.0),
            ("BLOK C", 200.0, 255.0),
            ("RT/RW", 40.0, 285.0),
            ("003/005", 200.0, 285.0),
            ("Kel/Desa", 40.0, 315.0),
            ("SUKAMAJU", 200.0, 315.0),
            ("Kecamatan", 40.0, 345.0),
            ("CILODONG", 200.0, 345.0),
            ("Agama", 20.0, 375.0),
            ("ISLAM", 200.0, 375.0),
            ("Status Perkawinan", 20.0, 405.0),
            ("KAWIN", 250.0, 405.0),
            ("Pekerjaan", 20.0, 435.0),
            ("PELAJARMAHASISWA", 200.0, 435.0),
            ("Kewarganegaraan", 20.0, 465.0),
            ("WNI", 230.0, 465.0),
            ("Berlaku Hingga", 20.0, 495.0),
            ("SEUMUR HIDUP", 220.0, 495.0),
        ]
    }

    #[test]
    fn test_end_to_end_header_nik_and_inline_name() {
        let record = extract(&[
            ("PROVINSI DKI JAKARTA", 200.0, 20.0),
            ("NIK", 20.0, 100.0),
            ("3171020101990001", 150.0, 100.0),
            ("Nama : BUDI SANTOSO", 20.0, 150.0),
        ]);
        assert_eq!(record.value(CanonicalField::Nik), Some("3171020101990001"));
        assert_eq!(record.value(CanonicalField::Nama), Some("BUDI SANTOSO"));
        assert_eq!(record.value(CanonicalField::Provinsi), Some("DKI JAKARTA"));
        assert_eq!(record.get(CanonicalField::Nik).unwrap().method, ResolutionMethod::SameRow);
        assert_eq!(record.get(CanonicalField::Nama).unwrap().method, ResolutionMethod::InlineColon);
    }

    #[test]
    fn test_full_card() {
        let record = extract(&sample_card());
        assert_eq!(record.value(CanonicalField::Provinsi), Some("JAWA BARAT"));
        assert_eq!(record.value(CanonicalField::Kabupaten), Some("KOTA DEPOK"));
        assert_eq!(record.value(CanonicalField::Nik), Some("3276012505900002"));
        assert_eq!(record.value(CanonicalField::Nama), Some("BUDI SANTOSO"));
        assert_eq!(record.value(CanonicalField::TempatTglLahir), Some("DEPOK, 25-05-1990"));
        assert_eq!(record.value(CanonicalField::JenisKelamin), Some("LAKI-LAKI"));
        assert_eq!(record.value(CanonicalField::GolDarah), Some("O"));
        assert_eq!(record.value(CanonicalField::Alamat), Some("JL MAWAR NO 5 BLOK C"));
        assert_eq!(record.value(CanonicalField::RtRw), Some("003/005"));
        assert_eq!(record.value(CanonicalField::KelDesa), Some("SUKAMAJU"));
        assert_eq!(record.value(CanonicalField::Kecamatan), Some("CILODONG"));
        assert_eq!(record.value(CanonicalField::Agama), Some("ISLAM"));
        assert_eq!(record.value(CanonicalField::StatusPerkawinan), Some("KAWIN"));
        assert_eq!(record.value(CanonicalField::Pekerjaan), Some("PELAJAR/MAHASISWA"));
        assert_eq!(record.value(CanonicalField::Kewarganegaraan), Some("WNI"));
        assert_eq!(record.value(CanonicalField::BerlakuHingga), Some("SEUMUR HIDUP"));

        let alamat = record.get(CanonicalField::Alamat).unwrap();
        assert_eq!(alamat.fragment_ids, vec![14, 15]);
    }

    #[test]
    fn test_no_fragment_feeds_two_fields() {
        let record = extract(&sample_card());
        let mut seen = std::collections::BTreeSet::new();
        for field in &record.fields {
            for id in &field.fragment_ids {
                assert!(seen.insert(*id), "fragment {} used twice", id);
            }
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let first = extract(&sample_card());
        for _ in 0..5 {
            assert_eq!(extract(&sample_card()), first);
        }
    }

    #[test]
    fn test_footer_below_card_is_ignored() {
        let mut items = sample_card();
        items.push(("TOKO SERBA ADA", 20.0, 900.0));
        let index = index_of(&items);
        let extractor = KtpExtractor::new(KtpRules::default());

        let kept = extractor.filter_outliers(&index);
        assert_eq!(kept.len(), index.len() - 1);
        assert!(kept.get(items.len() - 1).is_none());
    }

    #[test]
    fn test_truncated_label_alias() {
        let record = extract(&[
            ("PROVINSI BALI", 200.0, 20.0),
            ("NIK", 20.0, 100.0),
            ("5171010101900001", 200.0, 100.0),
            ("RTRW", 40.0, 150.0),
            ("002/010", 200.0, 150.0),
            ("Nama", 20.0, 200.0),
        ]);
        assert_eq!(record.value(CanonicalField::RtRw), Some("002/010"));
    }

    #[test]
    fn test_nik_below_label() {
        let record = extract(&[
            ("PROVINSI BALI", 200.0, 20.0),
            ("NIK", 20.0, 100.0),
            ("5171010101900001", 20.0, 135.0),
            ("Nama", 20.0, 200.0),
        ]);
        let nik = record.get(CanonicalField::Nik).unwrap();
        assert_eq!(nik.value, "5171010101900001");
        assert_eq!(nik.method, ResolutionMethod::BelowKey);
    }

    #[test]
    fn test_recovery_pass() {
        // No Nama, Agama, Jenis Kelamin or Status labels were recognised
        let record = extract(&[
            ("PROVINSI BALI", 200.0, 20.0),
            ("NIK", 20.0, 100.0),
            ("5171010101900001", 200.0, 100.0),
            ("MADE WIRAWAN", 200.0, 135.0),
            ("Tempat/Tgl Lahir", 20.0, 170.0),
            ("DENPASAR, 01-01-1990", 250.0, 170.0),
            ("LAKHLAKI", 200.0, 200.0),
            ("HINDU", 200.0, 375.0),
            ("BELUM KAWIN", 200.0, 405.0),
            ("Kewarganegaraan", 20.0, 465.0),
            ("WNI", 230.0, 465.0),
        ]);
        let nama = record.get(CanonicalField::Nama).unwrap();
        assert_eq!(nama.value, "MADE WIRAWAN");
        assert_eq!(nama.method, ResolutionMethod::PositionalName);
        assert_eq!(record.value(CanonicalField::Agama), Some("HINDU"));
        assert_eq!(record.value(CanonicalField::JenisKelamin), Some("LAKI-LAKI"));
        assert_eq!(record.value(CanonicalField::StatusPerkawinan), Some("BELUM KAWIN"));
    }

    #[test]
    fn test_nik_pattern_recovery() {
        let record = extract(&[
            ("PROVINSI BALI", 200.0, 20.0),
            ("Nama", 20.0, 140.0),
            ("MADE", 200.0, 140.0),
            ("5171 0101 0190 0001", 600.0, 180.0),
        ]);
        let nik = record.get(CanonicalField::Nik).unwrap();
        assert_eq!(nik.value, "5171010101900001");
        assert_eq!(nik.method, ResolutionMethod::NikPattern);
    }

    #[test]
    fn test_longer_digit_runs_are_not_a_nik() {
        let record = extract(&[
            ("PROVINSI BALI", 200.0, 20.0),
            ("Nama", 20.0, 140.0),
            ("MADE", 200.0, 140.0),
            ("31710201019900011", 600.0, 180.0),
        ]);
        assert!(record.get(CanonicalField::Nik).is_none());
    }

    #[test]
    fn test_glued_header_label() {
        let record = extract(&[
            ("PROVINSIJAWA BARAT", 200.0, 20.0),
            ("KABUPATENBOGOR", 240.0, 50.0),
            ("NIK", 20.0, 100.0),
            ("3201012505900002", 200.0, 100.0),
        ]);
        assert_eq!(record.value(CanonicalField::Provinsi), Some("JAWA BARAT"));
        assert_eq!(record.value(CanonicalField::Kabupaten), Some("BOGOR"));
        assert_eq!(record.get(CanonicalField::Provinsi).unwrap().method, ResolutionMethod::HeaderResidual);
    }

    #[test]
    fn test_strip_label_prefix() {
        let extractor = KtpExtractor::new(KtpRules::default());
        assert_eq!(extractor.strip_label_prefix("Provinsi Jawa Timur", "PROVINSI"), Some(" Jawa Timur"));
        assert_eq!(extractor.strip_label_prefix("PR0VINSI ACEH", "PROVINSI"), Some(" ACEH"));
        assert_eq!(extractor.strip_label_prefix("PROVNSI RIAU", "PROVINSI"), Some(" RIAU"));
        assert_eq!(extractor.strip_label_prefix("JAWA BARAT", "PROVINSI"), None);
        assert_eq!(extractor.strip_label_prefix("PR", "PROVINSI"), None);
    }

    #[test]
    fn test_lone_status_value_returns_to_value_pool() {
        let record = extract(&[
            ("PROVINSI BALI", 200.0, 20.0),
            ("NIK", 20.0, 100.0),
            ("5171010101900001", 200.0, 100.0),
            ("Agama", 20.0, 375.0),
            ("ISLAM", 200.0, 375.0),
            ("KAWIN", 200.0, 405.0),
            ("Pekerjaan", 20.0, 435.0),
            ("PNS", 200.0, 435.0),
        ]);
        assert_eq!(record.value(CanonicalField::Agama), Some("ISLAM"));
        assert_eq!(record.value(CanonicalField::Pekerjaan), Some("PNS"));
        let status = record.get(CanonicalField::StatusPerkawinan).unwrap();
        assert_eq!(status.value, "KAWIN");
        assert_eq!(status.method, ResolutionMethod::VocabularyMatch);
    }

    #[test]
    fn test_value_does_not_jump_past_another_label() {
        let record = extract(&[
            ("PROVINSI BALI", 200.0, 20.0),
            ("NIK", 20.0, 60.0),
            ("Jenis Kelamin", 20.0, 200.0),
            ("Gol. Darah", 400.0, 200.0),
            ("O", 540.0, 200.0),
        ]);
        assert_eq!(record.value(CanonicalField::GolDarah), Some("O"));
        assert!(record.value(CanonicalField::JenisKelamin).is_none());
    }

    #[test]
    fn test_normalization_helpers() {
        assert_eq!(canonical_gender("FEMALE"), "PEREMPUAN");
        assert_eq!(canonical_gender("LAKI LAKI"), "LAKI-LAKI");
        assert_eq!(canonical_gender("Pe"), "PEREMPUAN");
        assert_eq!(canonical_marital_status("BELUM KAWlN"), "BELUM KAWIN");
        assert_eq!(canonical_marital_status("CERAI MATI"), "CERAI MATI");
        assert_eq!(canonical_marital_status("MARRIED"), "KAWIN");
        assert_eq!(strip_trailing_rt_rw("JL MAWAR RT 003 RW 005"), "JL MAWAR");
        assert_eq!(strip_trailing_rt_rw("JL MAWAR"), "JL MAWAR");
        assert_eq!(normalize_label_text("Kel / Desa :"), "KEL/DESA");
    }

    #[test]
    fn test_single_fragment_key_geometry() {
        let extractor = KtpExtractor::new(KtpRules::default());
        let index = FragmentIndex::new(vec![
            frag(0, "PROVINSI ACEH", 100.0, 10.0, 300.0, 30.0),
            frag(1, "Kecamatan", 10.0, 100.0, 120.0, 30.0),
            frag(2, "BAITURRAHMAN", 200.0, 105.0, 200.0, 30.0),
        ]);
        let record = extractor.extract(&index);
        assert_eq!(record.value(CanonicalField::Kecamatan), Some("BAITURRAHMAN"));
        assert_eq!(record.value(CanonicalField::Provinsi), Some("ACEH"));
    }
}
