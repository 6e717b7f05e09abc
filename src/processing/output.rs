use crate::models::{
    Address, CanonicalField, DocumentType, KtpRecord, SimRecord, StructuredRecord,
};
use crate::processing::extractors::PartialRecord;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    static ref BIRTH_DATE: Regex =
        Regex::new(r"^(.*?)[,\s]*(\d{1,2})[-/. ](\d{1,2})[-/. ](\d{4})\s*$").unwrap();
}

/// Maps extracted canonical fields onto the typed per-document records.
pub struct OutputNormalizer;

impl OutputNormalizer {
    /// Build the typed record for a partial extraction. Unknown documents
    /// have no record.
    pub fn to_record(partial: &PartialRecord) -> Option<StructuredRecord> {
        match partial.document_type {
            DocumentType::Ktp => Some(StructuredRecord::Ktp(Self::ktp_record(partial))),
            DocumentType::Sim => Some(StructuredRecord::Sim(Self::sim_record(partial))),
            DocumentType::Unknown => None,
        }
    }

    /// Split a combined "place, date" birth string. A trailing date wins;
    /// otherwise the text is split at its first comma.
    pub fn split_birth(text: &str) -> (Option<String>, Option<String>) {
        let text = text.trim();
        if let Some(caps) = BIRTH_DATE.captures(text) {
            let place = caps[1].trim().trim_end_matches(',').trim();
            let date = format!("{}-{}-{}", &caps[2], &caps[3], &caps[4]);
            return (non_empty(place), Some(date));
        }

        match text.split_once(',') {
            Some((place, date)) => (non_empty(place.trim()), non_empty(date.trim())),
            None => (non_empty(text), None),
        }
    }

    fn ktp_record(partial: &PartialRecord) -> KtpRecord {
        let get = |field| value_of(partial, field);
        let (tempat_lahir, tgl_lahir) = split_field(partial);

        let mut alamat = Address {
            name: get(CanonicalField::Alamat),
            rt_rw: get(CanonicalField::RtRw),
            kel_desa: get(CanonicalField::KelDesa),
            kecamatan: get(CanonicalField::Kecamatan),
            kabupaten: get(CanonicalField::Kabupaten),
            provinsi: get(CanonicalField::Provinsi),
        };
        if let Some(parsed) = &partial.address {
            alamat.fill_gaps_from(parsed);
        }

        KtpRecord {
            nik: get(CanonicalField::Nik),
            nama: get(CanonicalField::Nama),
            tempat_lahir,
            tgl_lahir,
            jenis_kelamin: get(CanonicalField::JenisKelamin),
            gol_darah: get(CanonicalField::GolDarah),
            agama: get(CanonicalField::Agama),
            status_perkawinan: get(CanonicalField::StatusPerkawinan),
            pekerjaan: get(CanonicalField::Pekerjaan),
            kewarganegaraan: get(CanonicalField::Kewarganegaraan),
            berlaku_hingga: get(CanonicalField::BerlakuHingga),
            alamat,
        }
    }

    fn sim_record(partial: &PartialRecord) -> SimRecord {
        let get = |field| value_of(partial, field);
        let (tempat_lahir, tgl_lahir) = split_field(partial);

        let mut alamat = partial.address.clone().unwrap_or_default();
        if alamat.provinsi.is_none() {
            alamat.provinsi = get(CanonicalField::Provinsi);
        }

        SimRecord {
            nomor_sim: get(CanonicalField::NomorSim),
            nama: get(CanonicalField::Nama),
            tempat_lahir,
            tgl_lahir,
            jenis_kelamin: get(CanonicalField::JenisKelamin),
            gol_darah: get(CanonicalField::GolDarah),
            pekerjaan: get(CanonicalField::Pekerjaan),
            berlaku_sampai: get(CanonicalField::BerlakuHingga),
            alamat,
        }
    }
}

fn value_of(partial: &PartialRecord, field: CanonicalField) -> Option<String> {
    partial.value(field).and_then(non_empty)
}

fn split_field(partial: &PartialRecord) -> (Option<String>, Option<String>) {
    match partial.value(CanonicalField::TempatTglLahir) {
        Some(ttl) => {
            let split = OutputNormalizer::split_birth(ttl);
            debug!("Birth {:?} split into {:?}", ttl, split);
            split
        }
        None => (None, None),
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractedField, ResolutionMethod};

    fn partial(document_type: DocumentType, values: &[(CanonicalField, &str)]) -> PartialRecord {
        PartialRecord {
            document_type,
            fields: values
                .iter()
                .enumerate()
                .map(|(i, (field, value))| ExtractedField {
                    field: *field,
                    value: value.to_string(),
                    fragment_ids: vec![i],
                    method: ResolutionMethod::SameRow,
                })
                .collect(),
            address: None,
        }
    }

    #[test]
    fn test_split_birth() {
        assert_eq!(
            OutputNormalizer::split_birth("JAKARTA, 17-08-1990"),
            (Some("JAKARTA".to_string()), Some("17-08-1990".to_string()))
        );
        assert_eq!(
            OutputNormalizer::split_birth("KULON PROGO 1/2/1985"),
            (Some("KULON PROGO".to_string()), Some("1-2-1985".to_string()))
        );
        assert_eq!(
            OutputNormalizer::split_birth("BANDUNG, TGL TIDAK TERBACA"),
            (Some("BANDUNG".to_string()), Some("TGL TIDAK TERBACA".to_string()))
        );
        assert_eq!(OutputNormalizer::split_birth("BANDUNG"), (Some("BANDUNG".to_string()), None));
        assert_eq!(OutputNormalizer::split_birth("17-08-1990"), (None, Some("17-08-1990".to_string())));
    }

    #[test]
    fn test_ktp_fields_map_to_public_schema() {
        let partial = partial(
            DocumentType::Ktp,
            &[
                (CanonicalField::Nik, "3171020101990001"),
                (CanonicalField::Nama, "BUDI SANTOSO"),
                (CanonicalField::TempatTglLahir, "JAKARTA, 01-01-1990"),
                (CanonicalField::Alamat, "JL MAWAR NO 5"),
                (CanonicalField::RtRw, "003/005"),
                (CanonicalField::Kabupaten, "JAKARTA SELATAN"),
                (CanonicalField::Provinsi, "DKI JAKARTA"),
                (CanonicalField::BerlakuHingga, "SEUMUR HIDUP"),
            ],
        );
        let record = OutputNormalizer::to_record(&partial).unwrap();
        let StructuredRecord::Ktp(ktp) = &record else {
            panic!("expected a KTP record");
        };
        assert_eq!(ktp.berlaku_hingga.as_deref(), Some("SEUMUR HIDUP"));

        let data = record.to_document_data();
        assert_eq!(data.nomor.as_deref(), Some("3171020101990001"));
        assert_eq!(data.tempat_lahir.as_deref(), Some("JAKARTA"));
        assert_eq!(data.tgl_lahir.as_deref(), Some("01-01-1990"));
        assert_eq!(data.alamat.name.as_deref(), Some("JL MAWAR NO 5"));
        assert_eq!(data.alamat.rt_rw.as_deref(), Some("003/005"));
        assert_eq!(data.alamat.kabupaten.as_deref(), Some("JAKARTA SELATAN"));
        assert_eq!(data.alamat.provinsi.as_deref(), Some("DKI JAKARTA"));
        assert!(data.agama.is_none());
    }

    #[test]
    fn test_sim_address_takes_province_field() {
        let mut partial = partial(
            DocumentType::Sim,
            &[
                (CanonicalField::NomorSim, "1234-5678-123456"),
                (CanonicalField::Provinsi, "JAWA BARAT"),
                (CanonicalField::BerlakuHingga, "17-08-2027"),
            ],
        );
        partial.address = Some(Address {
            name: Some("JL MAWAR".into()),
            kabupaten: Some("KOTA DEPOK".into()),
            ..Default::default()
        });

        let Some(StructuredRecord::Sim(sim)) = OutputNormalizer::to_record(&partial) else {
            panic!("expected a SIM record");
        };
        assert_eq!(sim.nomor_sim.as_deref(), Some("1234-5678-123456"));
        assert_eq!(sim.berlaku_sampai.as_deref(), Some("17-08-2027"));
        assert_eq!(sim.alamat.name.as_deref(), Some("JL MAWAR"));
        assert_eq!(sim.alamat.provinsi.as_deref(), Some("JAWA BARAT"));
    }

    #[test]
    fn test_unknown_has_no_record() {
        assert!(OutputNormalizer::to_record(&partial(DocumentType::Unknown, &[])).is_none());
    }
}
