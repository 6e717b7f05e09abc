// Keyword tables and tuned thresholds for both card layouts. New card
// revisions should only need changes here.

use crate::models::CanonicalField;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A label as OCR tends to truncate it, e.g. "GAMA" for "Agama".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelAlias {
    pub prefix: String,
    pub field: CanonicalField,
}

/// Known printed values for an enumerated field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueVocabulary {
    pub field: CanonicalField,
    pub values: Vec<String>,
}

/// Literal text replacement for a known OCR misread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

impl Replacement {
    fn new(from: &str, to: &str) -> Self {
        Replacement {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KtpRules {
    pub canonical_fields: Vec<CanonicalField>,
    pub label_aliases: Vec<LabelAlias>,
    pub value_vocabularies: Vec<ValueVocabulary>,
    pub gender_corrections: Vec<Replacement>,
    pub occupation_corrections: Vec<Replacement>,
    /// Partial-ratio score a fragment needs to count as a label when
    /// bounding the card vertically.
    pub outlier_match_score: u32,
    /// Partial-ratio score a fragment needs to become a key-candidate.
    pub key_match_score: u32,
    pub vocabulary_score: u32,
    pub outlier_span_factor: f32,
    pub same_row_tolerance: f32,
    pub vertical_weight: f32,
    pub alamat_continuation_window: f32,
    pub rt_rw_row_tolerance: f32,
    pub nik_below_window: f32,
    pub nama_band: f32,
    pub min_key_chars: usize,
}

impl Default for KtpRules {
    fn default() -> Self {
        use CanonicalField::*;

        let alias = |prefix: &str, field: CanonicalField| LabelAlias {
            prefix: prefix.to_string(),
            field,
        };

        KtpRules {
            canonical_fields: vec![
                Provinsi,
                Kabupaten,
                Nik,
                Nama,
                TempatTglLahir,
                JenisKelamin,
                GolDarah,
                Alamat,
                RtRw,
                KelDesa,
                Kecamatan,
                Agama,
                StatusPerkawinan,
                Pekerjaan,
                Kewarganegaraan,
                BerlakuHingga,
            ],
            label_aliases: vec![
                alias("KOTA", Kabupaten),
                alias("KAB", Kabupaten),
                alias("GAMA", Agama),
                alias("KERJAAN", Pekerjaan),
                alias("EKERJAAN", Pekerjaan),
                alias("PEKERJA", Pekerjaan),
                alias("ERKAWINAN", StatusPerkawinan),
                alias("STATUS", StatusPerkawinan),
                alias("WARGANEGARAAN", Kewarganegaraan),
                alias("KEWARGA", Kewarganegaraan),
                alias("L/DESA", KelDesa),
                alias("KELURAHAN", KelDesa),
                alias("CAMATAN", Kecamatan),
                alias("MPAT/TGL", TempatTglLahir),
                alias("TGL LAHIR", TempatTglLahir),
                alias("NIS KELAMIN", JenisKelamin),
                alias("KELAMIN", JenisKelamin),
                alias("LAMAT", Alamat),
                alias("RTRW", RtRw),
                alias("ERLAKU", BerlakuHingga),
                alias("DARAH", GolDarah),
            ],
            value_vocabularies: vec![
                ValueVocabulary {
                    field: Agama,
                    values: strings(&[
                        "ISLAM", "KRISTEN", "KATOLIK", "HINDU", "BUDDHA", "BUDHA", "KONGHUCU",
                    ]),
                },
                ValueVocabulary {
                    field: JenisKelamin,
                    values: strings(&["LAKI-LAKI", "PEREMPUAN"]),
                },
                ValueVocabulary {
                    field: StatusPerkawinan,
                    values: strings(&["BELUM KAWIN", "KAWIN", "CERAI HIDUP", "CERAI MATI"]),
                },
                ValueVocabulary {
                    field: Kewarganegaraan,
                    values: strings(&["WNI", "WNA"]),
                },
            ],
            gender_corrections: vec![
                Replacement::new("LAKHLAKI", "LAKI-LAKI"),
                Replacement::new("LAKILAKI", "LAKI-LAKI"),
                Replacement::new("LAKI LAKI", "LAKI-LAKI"),
                Replacement::new("PEREMPUA", "PEREMPUAN"),
            ],
            occupation_corrections: vec![
                Replacement::new("PELAJARMAHASISWA", "PELAJAR/MAHASISWA"),
                Replacement::new("PELAJAR MAHASISWA", "PELAJAR/MAHASISWA"),
                Replacement::new("KARYAWANSWASTA", "KARYAWAN SWASTA"),
                Replacement::new("MENGURUSRUMAHTANGGA", "MENGURUS RUMAH TANGGA"),
                Replacement::new("BELUMTIDAK BEKERJA", "BELUM/TIDAK BEKERJA"),
                Replacement::new("BELUM TIDAK BEKERJA", "BELUM/TIDAK BEKERJA"),
                Replacement::new("PEGAWAINEGERISIPIL", "PEGAWAI NEGERI SIPIL"),
            ],
            outlier_match_score: 85,
            key_match_score: 80,
            vocabulary_score: 85,
            outlier_span_factor: 0.45,
            same_row_tolerance: 25.0,
            vertical_weight: 15.0,
            alamat_continuation_window: 45.0,
            rt_rw_row_tolerance: 15.0,
            nik_below_window: 50.0,
            nama_band: 70.0,
            min_key_chars: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorKind {
    Nama,
    Ttl,
    GolDarah,
    JenisKelamin,
    Alamat,
    Pekerjaan,
    Penerbit,
}

/// Words that identify a row of the free-form SIM layout. `labels` are
/// printed captions and get stripped from the row; `hints` are value words
/// that only imply the row's meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorSet {
    pub kind: AnchorKind,
    pub labels: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimRules {
    pub anchors: Vec<AnchorSet>,
    pub job_keywords: Vec<String>,
    pub garbage_fragments: Vec<String>,
    pub strong_garbage_markers: Vec<String>,
    pub issuer_markers: Vec<String>,
    pub known_cities: Vec<String>,
    pub street_prefixes: Vec<String>,
    pub row_threshold: f32,
    pub anchor_threshold: f64,
    pub contained_boost: f64,
    pub min_anchor_chars: usize,
    pub nama_lookahead: usize,
    pub ttl_lookahead: usize,
    pub gender_lookahead: usize,
    pub pekerjaan_lookahead: usize,
    pub min_expiry_year: i32,
}

impl Default for SimRules {
    fn default() -> Self {
        let anchor = |kind: AnchorKind, labels: &[&str], hints: &[&str]| AnchorSet {
            kind,
            labels: strings(labels),
            hints: strings(hints),
        };

        SimRules {
            anchors: vec![
                anchor(AnchorKind::Nama, &["Nama", "Name", "NamaName"], &[]),
                anchor(
                    AnchorKind::Ttl,
                    &["Tempat", "Tgl", "Lahir", "Birth", "Place", "Date"],
                    &[],
                ),
                anchor(AnchorKind::GolDarah, &["Gol", "Darah", "Blood", "Type", "Daah"], &[]),
                anchor(
                    AnchorKind::JenisKelamin,
                    &["Jenis", "Kelamin", "Sex", "Ketamin", "Gender"],
                    &[],
                ),
                anchor(AnchorKind::Alamat, &["Alamat", "Address", "Alamrrat"], &["Jalan", "Jl."]),
                anchor(
                    AnchorKind::Pekerjaan,
                    &["Pekerjaan", "Occupation", "eerjaan", "Kerja"],
                    &[
                        "Wiraswasta", "Karyawan", "Pelajar", "Mahasiswa", "PNS", "Buruh",
                        "Mengurus",
                    ],
                ),
                anchor(
                    AnchorKind::Penerbit,
                    &["Diterbitkan", "Issued", "Oleh", "Dierbtkan"],
                    &["SATPAS", "POLRES", "POLDA"],
                ),
            ],
            job_keywords: strings(&[
                "WIRASWASTA", "PELAJAR", "MAHASISWA", "KARYAWAN", "BURUH", "PEGAWAI", "PNS",
                "POLRI", "TNI", "MENGURUS", "DOKTER", "BIDAN", "SWASTA", "GURU", "DOSEN",
                "PEDAGANG", "NELAYAN", "PETANI",
            ]),
            garbage_fragments: strings(&[
                "SURAT", "IZIN", "MENGEMUDI", "DRIVING", "LICENSE", "INDONESIA", "KEPOLISIAN",
                "PASSENGER", "PERSONAL", "GOODS", "MOBIL", "PENUMPANG", "PRIBADI",
                "ANGONNA", "MOTOR", "VEHICLE", "PLACE", "DATE", "BIRTH", "BLOOD", "TYPE", "SAY",
                "DIERBTKAN", "ISSUED", "ANGKUTAN", "BARANG", "UMUM", "REPUBLIK", "SIM", "OF",
                "AND", "DAN",
            ]),
            strong_garbage_markers: strings(&[
                "MOBIL", "PASSENGER", "PRIBADI", "GOODS", "DRIVING", "LICENSE", "SURAT IZIN",
            ]),
            issuer_markers: strings(&["SATPAS", "POLRES", "POLDA"]),
            known_cities: strings(&[
                "JAKARTA", "BOGOR", "DEPOK", "TANGERANG", "BEKASI", "BANDUNG", "SEMARANG",
                "SURABAYA", "MEDAN", "MAKASSAR", "BALIKPAPAN", "DENPASAR", "SLEMAN", "BANTUL",
                "KULON PROGO", "SERANG", "CILEGON", "CIMAHI", "SUKABUMI", "BATAM", "KUPANG",
                "PONOROGO", "MALANG", "SOLO", "SURAKARTA", "YOGYAKARTA", "PALEMBANG",
                "PEKANBARU", "PADANG", "LAMPUNG", "JAMBI", "BENGKULU", "ACEH", "MATARAM",
                "JAYAPURA", "MANADO", "AMBON", "KENDARI", "PALU",
            ]),
            street_prefixes: strings(&[
                "JL", "JALAN", "GG", "GANG", "KP", "KMP", "KOMP", "DUSUN", "DSN", "BLK", "BLOK",
                "NO",
            ]),
            row_threshold: 20.0,
            anchor_threshold: 0.55,
            contained_boost: 0.85,
            min_anchor_chars: 3,
            nama_lookahead: 2,
            ttl_lookahead: 5,
            gender_lookahead: 4,
            pekerjaan_lookahead: 3,
            min_expiry_year: 2019,
        }
    }
}

impl SimRules {
    /// Layout boilerplate: too short, carrying a vehicle-category marker, or
    /// made only of denylisted words. Purely numeric text is never garbage.
    pub fn is_garbage(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < 2 {
            return true;
        }
        let upper = trimmed.to_uppercase();
        if self.strong_garbage_markers.iter().any(|m| upper.contains(m.as_str())) {
            return true;
        }

        let tokens: Vec<String> = words(&upper)
            .into_iter()
            .filter(|w| w.chars().count() >= 2 && w.chars().any(|c| c.is_alphabetic()))
            .collect();
        !tokens.is_empty() && tokens.iter().all(|t| self.garbage_fragments.contains(t))
    }

    /// Whether the text names an occupation. Short keywords must match a
    /// whole word.
    pub fn is_job(&self, text: &str) -> bool {
        let upper = text.to_uppercase();
        let tokens = words(&upper);
        self.job_keywords.iter().any(|k| {
            if k.chars().count() >= 5 {
                upper.contains(k.as_str())
            } else {
                tokens.iter().any(|t| t == k)
            }
        })
    }

    pub fn mentions_city(&self, text: &str) -> bool {
        let padded = format!(" {} ", words(&text.to_uppercase()).join(" "));
        self.known_cities.iter().any(|c| padded.contains(&format!(" {} ", c)))
    }

    pub fn starts_with_street_prefix(&self, text: &str) -> bool {
        words(&text.to_uppercase())
            .first()
            .map(|w| self.street_prefixes.contains(w))
            .unwrap_or(false)
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    pub sim_markers: Vec<String>,
    pub ktp_required: Vec<String>,
    pub ktp_any_of: Vec<String>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        ClassifierRules {
            sim_markers: strings(&["SURAT IZIN MENGEMUDI", "DRIVING LICENSE"]),
            ktp_required: strings(&["PROVINSI"]),
            ktp_any_of: strings(&["NIK", "KARTU TANDA"]),
        }
    }
}

/// Weights of the completeness score, keyed by public field name
/// (`alamat.*` for address parts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    pub weights: BTreeMap<String, u32>,
    /// Below this score the standard variant is considered insufficient.
    pub min_completeness: u32,
}

impl Default for ScoringRules {
    fn default() -> Self {
        let weights = [
            ("nomor", 3),
            ("nama", 3),
            ("tempat_lahir", 1),
            ("tgl_lahir", 2),
            ("jenis_kelamin", 1),
            ("agama", 1),
            ("status_perkawinan", 1),
            ("pekerjaan", 1),
            ("kewarganegaraan", 1),
            ("alamat.name", 2),
            ("alamat.rt_rw", 1),
            ("alamat.kel_desa", 1),
            ("alamat.kecamatan", 1),
            ("alamat.kabupaten", 1),
            ("alamat.provinsi", 1),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();

        ScoringRules {
            weights,
            min_completeness: 8,
        }
    }
}

impl ScoringRules {
    pub fn weight(&self, field: &str) -> u32 {
        self.weights.get(field).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ktp_rules_cover_all_canonical_fields() {
        let rules = KtpRules::default();
        assert_eq!(rules.canonical_fields.len(), 16);
        assert!(rules.canonical_fields.contains(&CanonicalField::Nik));
        assert!(!rules.canonical_fields.contains(&CanonicalField::NomorSim));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let rules: SimRules = serde_json::from_str(r#"{"row_threshold": 30.0}"#).unwrap();
        assert_eq!(rules.row_threshold, 30.0);
        assert_eq!(rules.nama_lookahead, 2);
        assert!(!rules.job_keywords.is_empty());
    }

    #[test]
    fn test_garbage_lines() {
        let rules = SimRules::default();
        assert!(rules.is_garbage("SURAT IZIN MENGEMUDI"));
        assert!(rules.is_garbage("INDONESIA"));
        assert!(rules.is_garbage("SIM A"));
        assert!(rules.is_garbage("."));
        assert!(!rules.is_garbage("JL MAWAR NO 5"));
        assert!(!rules.is_garbage("1234-5678-123456"));
        assert!(!rules.is_garbage("POLRI"));
    }

    #[test]
    fn test_job_and_city_lookup() {
        let rules = SimRules::default();
        assert!(rules.is_job("PELAJAR/MAHASISWA"));
        assert!(rules.is_job("tni"));
        assert!(!rules.is_job("JL KUNTNIX"));
        assert!(rules.mentions_city("KOTA DEPOK"));
        assert!(!rules.mentions_city("PALUMBON"));
        assert!(rules.starts_with_street_prefix("Jl. Mawar"));
        assert!(!rules.starts_with_street_prefix("SUKAMAJU"));
    }

    #[test]
    fn test_scoring_weight_lookup() {
        let scoring = ScoringRules::default();
        assert_eq!(scoring.weight("nomor"), 3);
        assert_eq!(scoring.weight("unknown_field"), 0);
    }
}
