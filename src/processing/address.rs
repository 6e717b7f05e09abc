// Splits free-text address lines into the structured address record.

use crate::models::{Address, SimRules};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    static ref ADDRESS_LABEL: Regex = Regex::new(r"(?i)^(ALAMAT|ADDRESS)[\s:.]*").unwrap();
    static ref SECTION_MARKER: Regex = Regex::new(r"^4\.\s*").unwrap();

    // Tried in order; the first match wins.
    static ref RT_RW_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\bR\.?T\s*/\s*R\.?W\b[\s.:]*(\d{1,4})\s*[/\-|]\s*(\d{1,4})").unwrap(),
        Regex::new(r"(?i)\bR\.?T\.?[\s.:]*(\d{1,4})[\s,.:/\-|]*R\.?W\.?[\s.:]*(\d{1,4})").unwrap(),
        Regex::new(r"(?i)\bR\.?T\.?[\s.:]*(\d{1,4})(?:\s*[/\-|]\s*(\d{1,4}))?").unwrap(),
        Regex::new(r"\b(\d{1,3})\s*/\s*(\d{1,3})\b").unwrap(),
    ];

    static ref COMPONENT_MARKER: Regex =
        Regex::new(r"(?i)\b(KABUPATEN|KAB|KOTA|KECAMATAN|KEC|KELURAHAN|KEL|DESA|DS)\b\.?").unwrap();
}

/// An RT/RW value and the byte span it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct RtRwMatch {
    pub value: String,
    pub start: usize,
    pub end: usize,
}

/// Find the first RT/RW group in `text`, e.g. "RT 003 RW 005" or "012/007".
/// Digits are kept as printed.
pub fn find_rt_rw(text: &str) -> Option<RtRwMatch> {
    for pattern in RT_RW_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let whole = caps.get(0)?;
            // "12/05/1990" is a date, not an RT/RW pair
            if text[whole.end()..].starts_with('/') {
                continue;
            }
            let rt = caps.get(1)?.as_str();
            let value = match caps.get(2) {
                Some(rw) => format!("{}/{}", rt, rw.as_str()),
                None => rt.to_string(),
            };
            return Some(RtRwMatch {
                value,
                start: whole.start(),
                end: whole.end(),
            });
        }
    }
    None
}

pub struct AddressParser;

impl AddressParser {
    /// Parse address lines into components. Lines naming an occupation or
    /// made of layout boilerplate are ignored.
    pub fn parse<S: AsRef<str>>(lines: &[S], rules: &SimRules) -> Address {
        let mut address = Address::default();
        let clean = Self::clean_lines(lines, rules);
        if clean.is_empty() {
            return address;
        }

        let mut joined = clean.join(", ");
        let mut boundary = None;
        if let Some(found) = find_rt_rw(&joined) {
            address.rt_rw = Some(found.value);
            boundary = Some(found.start);
            joined.replace_range(found.start..found.end, ",");
        }

        let mut street: Vec<String> = Vec::new();
        let mut residual: Vec<String> = Vec::new();
        let mut street_closed = false;
        let mut offset = 0;

        for clause in joined.split(',') {
            let clause_start = offset;
            offset += clause.len() + 1;

            let markers: Vec<(String, usize, usize)> = COMPONENT_MARKER
                .captures_iter(clause)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    Some((caps.get(1)?.as_str().to_uppercase(), whole.start(), whole.end()))
                })
                .collect();

            let lead_end = markers.first().map(|m| m.1).unwrap_or(clause.len());
            let lead = tidy(&clause[..lead_end]);
            if !lead.is_empty() {
                let before_boundary = boundary.map_or(true, |b| clause_start < b) && !street_closed;
                let continues_street = boundary.is_some()
                    || street.is_empty()
                    || rules.starts_with_street_prefix(&lead);
                if before_boundary && continues_street {
                    street.push(lead);
                } else {
                    residual.push(lead);
                    street_closed = true;
                }
            }

            for (i, (kind, _, end)) in markers.iter().enumerate() {
                let value_end = markers.get(i + 1).map(|m| m.1).unwrap_or(clause.len());
                let value = tidy(&clause[*end..value_end]);
                if value.is_empty() {
                    continue;
                }
                Self::assign_component(&mut address, kind, value);
            }
            if !markers.is_empty() {
                street_closed = true;
            }
        }

        if !street.is_empty() {
            address.name = Some(street.join(" "));
        }
        Self::assign_fallbacks(&mut address, residual, rules);
        address
    }

    fn clean_lines<S: AsRef<str>>(lines: &[S], rules: &SimRules) -> Vec<String> {
        lines
            .iter()
            .filter_map(|line| {
                let line = ADDRESS_LABEL.replace(line.as_ref().trim(), "");
                let line = SECTION_MARKER.replace(line.trim(), "").trim().to_string();
                if line.is_empty() || rules.is_job(&line) || rules.is_garbage(&line) {
                    debug!("Skipping address line {:?}", line);
                    return None;
                }
                Some(line)
            })
            .collect()
    }

    fn assign_component(address: &mut Address, kind: &str, value: String) {
        let slot = match kind {
            "KABUPATEN" | "KAB" => &mut address.kabupaten,
            "KOTA" => {
                if address.kabupaten.is_none() {
                    address.kabupaten = Some(format!("KOTA {}", value));
                }
                return;
            }
            "KECAMATAN" | "KEC" => &mut address.kecamatan,
            _ => &mut address.kel_desa,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    // Unlabelled clauses after the street fill whatever the markers left
    // open: kabupaten from the end (preferring a known city), then
    // kecamatan from the end, then kel/desa from the front.
    fn assign_fallbacks(address: &mut Address, mut residual: Vec<String>, rules: &SimRules) {
        if address.kabupaten.is_none() && !residual.is_empty() {
            let pos = residual
                .iter()
                .rposition(|c| rules.mentions_city(c))
                .unwrap_or(residual.len() - 1);
            address.kabupaten = Some(residual.remove(pos));
        }
        if address.kecamatan.is_none() {
            if let Some(last) = residual.pop() {
                address.kecamatan = Some(last);
            }
        }
        if address.kel_desa.is_none() && !residual.is_empty() {
            address.kel_desa = Some(residual.remove(0));
        }
        if !residual.is_empty() {
            debug!("Unassigned address parts: {:?}", residual);
        }
    }
}

fn tidy(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c.is_whitespace() || ",.:;-/|".contains(c))
        .to_string()
}
