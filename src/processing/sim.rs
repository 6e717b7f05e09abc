// Driving license extraction. Older cards number their sections 1-6;
// newer ones print bilingual captions in no fixed order.

use crate::models::{Address, AnchorKind, CanonicalField, DocumentType, ResolutionMethod, SimRules};
use crate::processing::address::AddressParser;
use crate::processing::extractors::{ExtractionContext, FieldExtractor, PartialRecord};
use crate::processing::fragments::FragmentIndex;
use crate::processing::ktp::canonical_gender;
use crate::utils::fuzzy;
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

lazy_static! {
    static ref SECTION_MARKER: Regex = Regex::new(r"(?:^|\s)([1-6])\.\s*").unwrap();
    static ref LONE_MARKER: Regex = Regex::new(r"^\s*[1-6]\.\s*$").unwrap();
    static ref LEGACY_NUMBER: Regex = Regex::new(r"\d{4}-\d{4}-\d{6}").unwrap();
    static ref LEGACY_DATE: Regex = Regex::new(r"\b(\d{2})-(\d{2})-(20\d{2})\b").unwrap();
    static ref BLOOD_AND_GENDER: Regex =
        Regex::new(r"([ABO]+)\s*-*\s*(PRIA|WANITA|LAKI|PEREMPUAN)").unwrap();
    static ref LOOSE_DATE: Regex = Regex::new(r"(\d{2})[\s.-]*(\d{2})[\s.-]*((?:19|20)\d{2})").unwrap();
    static ref CARD_NUMBER: Regex = Regex::new(r"^\d{12,16}$").unwrap();
    static ref NAME_PREFIX: Regex = Regex::new(r"^[\d.:\s]+").unwrap();
}

const BLOOD_TYPES: [&str; 4] = ["A", "B", "AB", "O"];

/// One clustered text line.
#[derive(Debug, Clone)]
struct Line {
    text: String,
    ids: Vec<usize>,
}

fn collect_lines(index: &FragmentIndex, threshold: f32) -> Vec<Line> {
    index
        .rows(threshold)
        .iter()
        .map(|row| Line {
            text: row.text(),
            ids: row.ids(),
        })
        .filter(|line| !line.text.is_empty())
        .collect()
}

fn has_letters(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic())
}

/// Provenance for a value read out of a line. A line another field
/// already owns keeps its fragments and the value is derived from that
/// field.
fn line_source(ids: &[usize], ctx: &ExtractionContext, method: ResolutionMethod) -> (Vec<usize>, ResolutionMethod) {
    if !ids.iter().any(|id| ctx.is_claimed(*id)) {
        return (ids.to_vec(), method);
    }
    match ids.iter().find_map(|id| ctx.owner_of(*id)) {
        Some(owner) => (Vec::new(), ResolutionMethod::DerivedFrom(owner)),
        None => (Vec::new(), method),
    }
}

fn birth_dates(ctx: &ExtractionContext) -> Vec<NaiveDate> {
    ctx.value(CanonicalField::TempatTglLahir)
        .map(|ttl| {
            LOOSE_DATE
                .captures_iter(ttl)
                .filter_map(|c| calendar_date(&c[1], &c[2], &c[3]))
                .collect()
        })
        .unwrap_or_default()
}

/// Record the latest candidate date that is not a birth date as the
/// expiry. Equal dates keep the later line.
fn record_expiry(ctx: &mut ExtractionContext, candidates: &[(NaiveDate, &Line)]) {
    let birth = birth_dates(ctx);
    let latest = candidates
        .iter()
        .filter(|(date, _)| !birth.contains(date))
        .max_by_key(|(date, _)| *date);
    if let Some((date, line)) = latest {
        let (ids, method) = line_source(&line.ids, ctx, ResolutionMethod::PatternScan);
        ctx.record(CanonicalField::BerlakuHingga, &date.format("%d-%m-%Y").to_string(), ids, method);
    }
}

/// Parse `dd`, `mm`, `yyyy` into a real calendar date.
fn calendar_date(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Which caption a line carries, and whether it was recognised from a value
/// word rather than the caption itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorMatch {
    pub kind: AnchorKind,
    pub via_hint: bool,
}

/// Best anchor for `text` by letter similarity. A variant contained in the
/// text scores at least the contained boost.
pub fn identify_field(text: &str, rules: &SimRules) -> Option<AnchorMatch> {
    let clean = fuzzy::letters_only(text);
    if clean.chars().count() < rules.min_anchor_chars {
        return None;
    }

    let mut best: Option<(f64, AnchorMatch)> = None;
    for set in &rules.anchors {
        let variants = set
            .labels
            .iter()
            .map(|v| (v, false))
            .chain(set.hints.iter().map(|v| (v, true)));
        for (variant, via_hint) in variants {
            let clean_variant = fuzzy::letters_only(variant);
            if clean_variant.is_empty() {
                continue;
            }
            let mut score = fuzzy::sequence_ratio(&clean, &clean_variant);
            if clean.contains(&clean_variant) {
                score = score.max(rules.contained_boost);
            }
            if best.map_or(true, |(b, _)| score > b) {
                best = Some((score, AnchorMatch { kind: set.kind, via_hint }));
            }
        }
    }

    best.filter(|(score, _)| *score >= rules.anchor_threshold)
        .map(|(_, m)| m)
}

// Shared by both layouts.
fn cleanup(ctx: &mut ExtractionContext) {
    ctx.rewrite(CanonicalField::Nama, |value| {
        let stripped = NAME_PREFIX.replace(value.trim(), "");
        let kept: String = stripped
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_uppercase() || c.is_whitespace() || *c == '.' || *c == '\'')
            .collect();
        Some(kept.split_whitespace().collect::<Vec<_>>().join(" "))
    });
    ctx.rewrite(CanonicalField::JenisKelamin, |value| Some(canonical_gender(value)));
    ctx.rewrite(CanonicalField::GolDarah, |value| Some(value.trim().to_uppercase()));
}

/// Numbered layout: sections 1 (name) through 6 (province).
pub struct SimLegacyExtractor {
    rules: SimRules,
}

impl SimLegacyExtractor {
    pub fn new(rules: SimRules) -> Self {
        SimLegacyExtractor { rules }
    }

    // A marker detected as its own line belongs to the line after it.
    fn merge_lone_markers(lines: Vec<Line>) -> Vec<Line> {
        let mut merged: Vec<Line> = Vec::with_capacity(lines.len());
        let mut pending: Option<Line> = None;
        for line in lines {
            if LONE_MARKER.is_match(&line.text) {
                if let Some(previous) = pending.take() {
                    merged.push(previous);
                }
                pending = Some(line);
                continue;
            }
            match pending.take() {
                Some(marker) => {
                    let mut ids = marker.ids;
                    ids.extend(line.ids);
                    merged.push(Line {
                        text: format!("{} {}", marker.text.trim(), line.text),
                        ids,
                    });
                }
                None => merged.push(line),
            }
        }
        if let Some(marker) = pending {
            merged.push(marker);
        }
        merged
    }
}

impl FieldExtractor for SimLegacyExtractor {
    fn name(&self) -> &'static str {
        "sim-legacy"
    }

    fn document_type(&self) -> DocumentType {
        DocumentType::Sim
    }

    fn extract(&self, index: &FragmentIndex) -> PartialRecord {
        let mut ctx = ExtractionContext::new();
        let lines = Self::merge_lone_markers(collect_lines(index, self.rules.row_threshold));

        let mut section = 0;
        let mut address_lines: Vec<&Line> = Vec::new();
        let mut expiry_candidates: Vec<(NaiveDate, &Line)> = Vec::new();

        for line in &lines {
            if let Some(found) = LEGACY_NUMBER.find(&line.text) {
                ctx.record(
                    CanonicalField::NomorSim,
                    found.as_str(),
                    line.ids.clone(),
                    ResolutionMethod::PatternScan,
                );
            }
            for caps in LEGACY_DATE.captures_iter(&line.text) {
                if let Some(date) = calendar_date(&caps[1], &caps[2], &caps[3]) {
                    expiry_candidates.push((date, line));
                }
            }

            let (content, numbered) = match SECTION_MARKER.captures(&line.text) {
                Some(caps) => {
                    section = caps[1].parse().unwrap_or(section);
                    (SECTION_MARKER.replace(&line.text, " ").trim().to_string(), true)
                }
                None => (line.text.trim().to_string(), false),
            };

            if !numbered {
                // number and date lines are not section content
                let rest = LEGACY_DATE.replace_all(&LEGACY_NUMBER.replace_all(&content, ""), "").to_string();
                if !has_letters(&rest) {
                    continue;
                }
                if section == 4 && self.rules.is_job(&content) && !self.rules.is_garbage(&content) {
                    debug!("Occupation {:?} ends the address section", content);
                    section = 5;
                }
            }
            if content.is_empty() {
                continue;
            }

            let ids = line.ids.clone();
            let method = ResolutionMethod::NumberedSection;
            match section {
                1 if content.chars().count() > 2 => {
                    ctx.record(CanonicalField::Nama, &content, ids, method);
                }
                2 => {
                    ctx.record(CanonicalField::TempatTglLahir, &content, ids, method);
                }
                3 => match BLOOD_AND_GENDER.captures(&content.to_uppercase()) {
                    Some(caps) => {
                        if ctx.record(CanonicalField::JenisKelamin, &caps[2], ids, method) {
                            ctx.record(
                                CanonicalField::GolDarah,
                                &caps[1],
                                Vec::new(),
                                ResolutionMethod::DerivedFrom(CanonicalField::JenisKelamin),
                            );
                        }
                    }
                    None => {
                        ctx.record(CanonicalField::JenisKelamin, &content, ids, method);
                    }
                },
                4 => {
                    if !self.rules.is_garbage(&content) {
                        address_lines.push(line);
                    }
                }
                5 => {
                    ctx.record(CanonicalField::Pekerjaan, &content, ids, method);
                }
                6 => {
                    ctx.record(CanonicalField::Provinsi, &content, ids, method);
                }
                _ => {}
            }
        }

        record_expiry(&mut ctx, &expiry_candidates);

        let address = record_address(&mut ctx, &address_lines, &self.rules);
        cleanup(&mut ctx);
        ctx.into_partial(DocumentType::Sim, address)
    }
}

// Store the address block as one composite field and parse it.
fn record_address(
    ctx: &mut ExtractionContext,
    lines: &[&Line],
    rules: &SimRules,
) -> Option<Address> {
    let lines: Vec<&Line> = lines
        .iter()
        .copied()
        .filter(|l| !l.ids.iter().any(|id| ctx.is_claimed(*id)))
        .collect();
    if lines.is_empty() {
        return None;
    }

    let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
    let ids: Vec<usize> = lines.iter().flat_map(|l| l.ids.iter().copied()).collect();
    ctx.record(CanonicalField::Alamat, &texts.join(", "), ids, ResolutionMethod::AddressBlock);
    Some(AddressParser::parse(&texts, rules))
}

/// Caption-driven layout: rows are tagged by fuzzy anchor matching and
/// values are searched forward from their caption.
pub struct SimSmartExtractor {
    rules: SimRules,
    label_patterns: Vec<(AnchorKind, Regex)>,
}

struct TaggedLine {
    line: Line,
    anchor: Option<AnchorMatch>,
}

impl TaggedLine {
    fn is(&self, kind: AnchorKind) -> bool {
        self.anchor.map_or(false, |a| a.kind == kind)
    }
}

impl SimSmartExtractor {
    pub fn new(rules: SimRules) -> Self {
        let label_patterns = rules
            .anchors
            .iter()
            .filter(|set| !set.labels.is_empty())
            .filter_map(|set| {
                let alternatives: Vec<String> = set.labels.iter().map(|l| regex::escape(l)).collect();
                let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
                match Regex::new(&pattern) {
                    Ok(regex) => Some((set.kind, regex)),
                    Err(e) => {
                        warn!("Skipping label pattern for {:?}: {}", set.kind, e);
                        None
                    }
                }
            })
            .collect();
        SimSmartExtractor {
            rules,
            label_patterns,
        }
    }

    fn first_anchor(lines: &[TaggedLine], kind: AnchorKind) -> Option<usize> {
        lines.iter().position(|l| l.is(kind))
    }

    /// Text left on a caption line once the caption words are removed.
    fn label_residual(&self, line: &TaggedLine) -> Option<String> {
        let anchor = line.anchor?;
        if anchor.via_hint {
            return Some(line.line.text.clone());
        }
        let (_, pattern) = self.label_patterns.iter().find(|(kind, _)| *kind == anchor.kind)?;
        if !pattern.is_match(&line.line.text) {
            return None;
        }
        let residual = pattern.replace_all(&line.line.text, " ");
        let residual = residual.trim_start_matches(|c: char| !c.is_alphanumeric());
        let residual = residual.split_whitespace().collect::<Vec<_>>().join(" ");
        if residual.chars().any(|c| c.is_alphanumeric()) {
            Some(residual)
        } else {
            None
        }
    }

    fn acceptable_value(&self, text: &str) -> bool {
        !self.rules.is_garbage(text)
            && (text.chars().count() >= 3 || text.chars().any(|c| c.is_ascii_digit()))
    }

    /// Value on the caption line itself, else the first usable line within
    /// `lookahead` lines after it. Hitting a `stops` caption ends the search.
    fn find_value(
        &self,
        lines: &[TaggedLine],
        anchor: usize,
        lookahead: usize,
        stops: &[AnchorKind],
        ctx: &ExtractionContext,
    ) -> Option<(String, Vec<usize>, ResolutionMethod)> {
        let anchor_line = &lines[anchor];
        if let Some(residual) = self.label_residual(anchor_line) {
            if self.acceptable_value(&residual) && !anchor_line.line.ids.iter().any(|id| ctx.is_claimed(*id)) {
                return Some((residual, anchor_line.line.ids.clone(), ResolutionMethod::AnchorInline));
            }
        }

        let end = (anchor + 1 + lookahead).min(lines.len());
        for candidate in &lines[anchor + 1..end] {
            if stops.iter().any(|kind| candidate.is(*kind)) {
                return None;
            }
            if candidate.line.ids.iter().any(|id| ctx.is_claimed(*id)) {
                continue;
            }
            if !self.acceptable_value(&candidate.line.text) {
                continue;
            }
            return Some((
                candidate.line.text.clone(),
                candidate.line.ids.clone(),
                ResolutionMethod::AnchorForward,
            ));
        }
        None
    }

    fn resolve_forward(
        &self,
        lines: &[TaggedLine],
        kind: AnchorKind,
        field: CanonicalField,
        lookahead: usize,
        stops: &[AnchorKind],
        ctx: &mut ExtractionContext,
    ) -> Option<usize> {
        let anchor = Self::first_anchor(lines, kind)?;
        if let Some((value, ids, method)) = self.find_value(lines, anchor, lookahead, stops, ctx) {
            ctx.record(field, &value, ids, method);
        }
        Some(anchor)
    }

    fn scan_card_number(&self, lines: &[TaggedLine], ctx: &mut ExtractionContext) {
        for tagged in lines {
            let compact: String = tagged
                .line
                .text
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect();
            if CARD_NUMBER.is_match(&compact) {
                ctx.record(
                    CanonicalField::NomorSim,
                    &compact,
                    tagged.line.ids.clone(),
                    ResolutionMethod::PatternScan,
                );
                return;
            }
        }
    }

    // Blood type and sex sit on or just after their captions, often on one
    // line ("O - PRIA").
    fn resolve_gender_and_blood(&self, lines: &[TaggedLine], ctx: &mut ExtractionContext) {
        let blood_idx = Self::first_anchor(lines, AnchorKind::GolDarah);
        let sex_idx = Self::first_anchor(lines, AnchorKind::JenisKelamin);
        let last_anchor = match (blood_idx, sex_idx) {
            (None, None) => return,
            (a, b) => a.max(b).unwrap_or(0),
        };

        let mut candidates: Vec<(usize, String)> = Vec::new();
        for idx in [blood_idx, sex_idx].into_iter().flatten() {
            if let Some(residual) = self.label_residual(&lines[idx]) {
                candidates.push((idx, residual));
            }
        }
        let end = (last_anchor + 1 + self.rules.gender_lookahead).min(lines.len());
        for (idx, tagged) in lines.iter().enumerate().take(end).skip(last_anchor + 1) {
            let other_anchor = tagged
                .anchor
                .map_or(false, |a| !matches!(a.kind, AnchorKind::GolDarah | AnchorKind::JenisKelamin));
            if other_anchor {
                break;
            }
            candidates.push((idx, tagged.line.text.clone()));
        }

        let mut gender_line = None;
        for (idx, text) in &candidates {
            if self.rules.is_garbage(text) {
                continue;
            }
            let upper = text.to_uppercase();
            if ["PRIA", "LAKI", "WANITA", "PEREMPUAN"].iter().any(|g| upper.contains(g)) {
                let (ids, method) = line_source(&lines[*idx].line.ids, ctx, ResolutionMethod::AnchorForward);
                if ctx.record(CanonicalField::JenisKelamin, text, ids, method) {
                    gender_line = Some(*idx);
                }
                break;
            }
        }

        for (idx, text) in &candidates {
            let upper = text.to_uppercase().replace('-', " ");
            let Some(blood) = upper.split_whitespace().find(|t| BLOOD_TYPES.contains(t)) else {
                continue;
            };
            if gender_line == Some(*idx) {
                ctx.record(
                    CanonicalField::GolDarah,
                    blood,
                    Vec::new(),
                    ResolutionMethod::DerivedFrom(CanonicalField::JenisKelamin),
                );
            } else {
                let (ids, method) = line_source(&lines[*idx].line.ids, ctx, ResolutionMethod::AnchorForward);
                ctx.record(CanonicalField::GolDarah, blood, ids, method);
            }
            break;
        }
    }

    fn resolve_address(
        &self,
        lines: &[TaggedLine],
        pekerjaan_idx: Option<usize>,
        ctx: &mut ExtractionContext,
    ) -> Option<Address> {
        let alamat_idx = Self::first_anchor(lines, AnchorKind::Alamat)?;
        let anchor = &lines[alamat_idx];

        let mut block: Vec<Line> = Vec::new();
        let mut start = alamat_idx + 1;
        if anchor.anchor.map_or(false, |a| a.via_hint) {
            start = alamat_idx;
        } else if let Some(residual) = self.label_residual(anchor) {
            block.push(Line {
                text: residual,
                ids: anchor.line.ids.clone(),
            });
        }

        let stop = match pekerjaan_idx {
            Some(p) if p > alamat_idx => p,
            _ => (start..lines.len())
                .find(|&k| self.rules.is_job(&lines[k].line.text))
                .unwrap_or(lines.len()),
        };

        for tagged in lines.iter().take(stop).skip(start) {
            if tagged.is(AnchorKind::Pekerjaan) || tagged.is(AnchorKind::Penerbit) {
                break;
            }
            let upper = tagged.line.text.to_uppercase();
            if self.rules.issuer_markers.iter().any(|m| upper.contains(m.as_str())) {
                continue;
            }
            if self.rules.is_garbage(&tagged.line.text) {
                continue;
            }
            block.push(tagged.line.clone());
        }

        let refs: Vec<&Line> = block.iter().collect();
        record_address(ctx, &refs, &self.rules)
    }

    // Dates on lines that are not the card number, from the expiry year on.
    fn scan_expiry(&self, lines: &[TaggedLine], ctx: &mut ExtractionContext) {
        let mut candidates: Vec<(NaiveDate, &Line)> = Vec::new();
        for tagged in lines {
            let compact: String = tagged.line.text.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
            if CARD_NUMBER.is_match(&compact) {
                continue;
            }
            for caps in LOOSE_DATE.captures_iter(&tagged.line.text) {
                let Some(date) = calendar_date(&caps[1], &caps[2], &caps[3]) else {
                    continue;
                };
                if date.year() >= self.rules.min_expiry_year {
                    candidates.push((date, &tagged.line));
                }
            }
        }
        record_expiry(ctx, &candidates);
    }
}

impl FieldExtractor for SimSmartExtractor {
    fn name(&self) -> &'static str {
        "sim-smart"
    }

    fn document_type(&self) -> DocumentType {
        DocumentType::Sim
    }

    fn extract(&self, index: &FragmentIndex) -> PartialRecord {
        let mut ctx = ExtractionContext::new();
        let lines: Vec<TaggedLine> = collect_lines(index, self.rules.row_threshold)
            .into_iter()
            .map(|line| {
                let anchor = identify_field(&line.text, &self.rules);
                TaggedLine { line, anchor }
            })
            .collect();
        debug!(
            "SIM rows: {:?}",
            lines.iter().map(|l| (l.line.text.as_str(), l.anchor.map(|a| a.kind))).collect::<Vec<_>>()
        );

        self.scan_card_number(&lines, &mut ctx);
        self.resolve_forward(
            &lines,
            AnchorKind::Nama,
            CanonicalField::Nama,
            self.rules.nama_lookahead,
            &[AnchorKind::Ttl, AnchorKind::Alamat],
            &mut ctx,
        );
        self.resolve_forward(
            &lines,
            AnchorKind::Ttl,
            CanonicalField::TempatTglLahir,
            self.rules.ttl_lookahead,
            &[AnchorKind::GolDarah, AnchorKind::JenisKelamin, AnchorKind::Alamat],
            &mut ctx,
        );
        self.resolve_gender_and_blood(&lines, &mut ctx);
        let pekerjaan_idx = self.resolve_forward(
            &lines,
            AnchorKind::Pekerjaan,
            CanonicalField::Pekerjaan,
            self.rules.pekerjaan_lookahead,
            &[AnchorKind::Penerbit],
            &mut ctx,
        );
        let address = self.resolve_address(&lines, pekerjaan_idx, &mut ctx);
        self.scan_expiry(&lines, &mut ctx);

        cleanup(&mut ctx);
        ctx.into_partial(DocumentType::Sim, address)
    }
}
