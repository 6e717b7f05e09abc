// Picks between extraction runs over differently normalized images.

use crate::models::{data::fill, ScoringRules, StructuredRecord};
use log::{debug, info};

/// A result that can be scored and gap-filled from a rival result.
pub trait Candidate {
    fn completeness(&self, scoring: &ScoringRules) -> u32;

    /// Fill empty fields from `other`. Returns false when the two are not
    /// comparable (different document types).
    fn fill_gaps_from(&mut self, other: &Self) -> bool;
}

impl Candidate for StructuredRecord {
    /// Weighted count of the public fields that carry a value.
    fn completeness(&self, scoring: &ScoringRules) -> u32 {
        let data = self.to_document_data();
        let alamat = &data.alamat;
        let fields: [(&str, &Option<String>); 15] = [
            ("nomor", &data.nomor),
            ("nama", &data.nama),
            ("tempat_lahir", &data.tempat_lahir),
            ("tgl_lahir", &data.tgl_lahir),
            ("jenis_kelamin", &data.jenis_kelamin),
            ("agama", &data.agama),
            ("status_perkawinan", &data.status_perkawinan),
            ("pekerjaan", &data.pekerjaan),
            ("kewarganegaraan", &data.kewarganegaraan),
            ("alamat.name", &alamat.name),
            ("alamat.rt_rw", &alamat.rt_rw),
            ("alamat.kel_desa", &alamat.kel_desa),
            ("alamat.kecamatan", &alamat.kecamatan),
            ("alamat.kabupaten", &alamat.kabupaten),
            ("alamat.provinsi", &alamat.provinsi),
        ];

        fields
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(false, |v| !v.trim().is_empty()))
            .map(|(name, _)| scoring.weight(name))
            .sum()
    }

    fn fill_gaps_from(&mut self, other: &Self) -> bool {
        match (self, other) {
            (StructuredRecord::Ktp(a), StructuredRecord::Ktp(b)) => {
                fill(&mut a.nik, &b.nik);
                fill(&mut a.nama, &b.nama);
                fill(&mut a.tempat_lahir, &b.tempat_lahir);
                fill(&mut a.tgl_lahir, &b.tgl_lahir);
                fill(&mut a.jenis_kelamin, &b.jenis_kelamin);
                fill(&mut a.gol_darah, &b.gol_darah);
                fill(&mut a.agama, &b.agama);
                fill(&mut a.status_perkawinan, &b.status_perkawinan);
                fill(&mut a.pekerjaan, &b.pekerjaan);
                fill(&mut a.kewarganegaraan, &b.kewarganegaraan);
                fill(&mut a.berlaku_hingga, &b.berlaku_hingga);
                a.alamat.fill_gaps_from(&b.alamat);
                true
            }
            (StructuredRecord::Sim(a), StructuredRecord::Sim(b)) => {
                fill(&mut a.nomor_sim, &b.nomor_sim);
                fill(&mut a.nama, &b.nama);
                fill(&mut a.tempat_lahir, &b.tempat_lahir);
                fill(&mut a.tgl_lahir, &b.tgl_lahir);
                fill(&mut a.jenis_kelamin, &b.jenis_kelamin);
                fill(&mut a.gol_darah, &b.gol_darah);
                fill(&mut a.pekerjaan, &b.pekerjaan);
                fill(&mut a.berlaku_sampai, &b.berlaku_sampai);
                a.alamat.fill_gaps_from(&b.alamat);
                true
            }
            _ => false,
        }
    }
}

/// Keep the most complete successful candidate (earliest on ties) and fill
/// its gaps from the others in order. Errors lose to any success; when
/// every candidate failed the first error is returned.
pub fn select_best<T, E>(candidates: Vec<Result<T, E>>, scoring: &ScoringRules) -> Option<Result<T, E>>
where
    T: Candidate,
{
    let mut first_error = None;
    let mut successes: Vec<T> = Vec::new();
    for candidate in candidates {
        match candidate {
            Ok(result) => successes.push(result),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if successes.is_empty() {
        return first_error.map(Err);
    }

    let scores: Vec<u32> = successes.iter().map(|c| c.completeness(scoring)).collect();
    let mut best = 0;
    for (i, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = i;
        }
    }
    info!("Completeness scores {:?}, keeping candidate {}", scores, best);

    let mut winner = successes.remove(best);
    for other in &successes {
        if !winner.fill_gaps_from(other) {
            debug!("Skipping gap fill from a different document type");
        }
    }
    Some(Ok(winner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KtpRecord, SimRecord};
    use crate::utils::DocumentError;

    fn sim(nomor: Option<&str>, nama: Option<&str>, pekerjaan: Option<&str>) -> StructuredRecord {
        StructuredRecord::Sim(SimRecord {
            nomor_sim: nomor.map(String::from),
            nama: nama.map(String::from),
            pekerjaan: pekerjaan.map(String::from),
            ..Default::default()
        })
    }

    #[test]
    fn test_completeness_weights() {
        let scoring = ScoringRules::default();
        assert_eq!(sim(None, None, None).completeness(&scoring), 0);
        assert_eq!(sim(Some("1"), Some("BUDI"), None).completeness(&scoring), 6);
        assert_eq!(sim(Some("1"), Some(" "), Some("PNS")).completeness(&scoring), 4);
    }

    #[test]
    fn test_higher_score_wins_and_gaps_are_filled() {
        let scoring = ScoringRules::default();
        let weak: Result<_, DocumentError> = Ok(sim(None, Some("BUDI"), Some("PNS")));
        let strong = Ok(sim(Some("1234"), Some("BUDI SANTOSO"), None));

        let merged = select_best(vec![weak, strong], &scoring).unwrap().unwrap();
        assert_eq!(merged, sim(Some("1234"), Some("BUDI SANTOSO"), Some("PNS")));
    }

    #[test]
    fn test_tie_keeps_first() {
        let scoring = ScoringRules::default();
        let first: Result<_, DocumentError> = Ok(sim(None, Some("FIRST"), None));
        let second = Ok(sim(None, Some("SECOND"), None));
        let merged = select_best(vec![first, second], &scoring).unwrap().unwrap();
        assert_eq!(merged, sim(None, Some("FIRST"), None));
    }

    #[test]
    fn test_errors_lose_to_success() {
        let scoring = ScoringRules::default();
        let merged = select_best(
            vec![Err(DocumentError::NoTextDetected), Ok(sim(None, None, None))],
            &scoring,
        );
        assert!(matches!(merged, Some(Ok(_))));

        let failed: Option<Result<StructuredRecord, _>> = select_best(
            vec![Err(DocumentError::NoTextDetected), Err(DocumentError::UnsupportedDocument)],
            &scoring,
        );
        assert!(matches!(failed, Some(Err(DocumentError::NoTextDetected))));
        assert!(select_best::<StructuredRecord, DocumentError>(Vec::new(), &scoring).is_none());
    }

    #[test]
    fn test_different_types_are_not_merged() {
        let scoring = ScoringRules::default();
        let ktp = StructuredRecord::Ktp(KtpRecord {
            nik: Some("3171020101990001".into()),
            nama: Some("BUDI".into()),
            ..Default::default()
        });
        let merged = select_best::<_, DocumentError>(
            vec![Ok(ktp.clone()), Ok(sim(None, None, Some("PNS")))],
            &scoring,
        )
        .unwrap()
        .unwrap();
        assert_eq!(merged, ktp);
    }
}
