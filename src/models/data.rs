use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }
}

/// One recognized text region. The polygon is ordered top-left, top-right,
/// bottom-right, bottom-left. Fragments are never mutated once indexed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFragment {
    pub id: usize,
    pub polygon: [Point; 4],
    pub text: String,
    pub confidence: f32,
}

impl TextFragment {
    pub fn top(&self) -> f32 {
        self.polygon.iter().map(|p| p.y).fold(f32::INFINITY, f32::min)
    }

    pub fn bottom(&self) -> f32 {
        self.polygon.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max)
    }

    /// Average of the top and bottom edges.
    pub fn y_center(&self) -> f32 {
        let [tl, tr, br, bl] = self.polygon;
        let top_edge = (tl.y + tr.y) / 2.0;
        let bottom_edge = (bl.y + br.y) / 2.0;
        (top_edge + bottom_edge) / 2.0
    }

    pub fn x_start(&self) -> f32 {
        self.polygon[0].x.min(self.polygon[3].x)
    }

    pub fn x_end(&self) -> f32 {
        self.polygon[1].x.max(self.polygon[2].x)
    }

    /// Shoelace area of the quadrilateral.
    pub fn area(&self) -> f32 {
        let mut twice = 0.0;
        for i in 0..4 {
            let a = self.polygon[i];
            let b = self.polygon[(i + 1) % 4];
            twice += a.x * b.y - b.x * a.y;
        }
        (twice / 2.0).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "KTP")]
    Ktp,
    #[serde(rename = "SIM")]
    Sim,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DocumentType::Ktp => write!(f, "KTP"),
            DocumentType::Sim => write!(f, "SIM"),
            DocumentType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Closed vocabulary of field labels across both card layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CanonicalField {
    Provinsi,
    Kabupaten,
    Nik,
    NomorSim,
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
}

impl CanonicalField {
    /// Printed label as it appears on the card.
    pub fn label(&self) -> &'static str {
        match self {
            CanonicalField::Provinsi => "PROVINSI",
            CanonicalField::Kabupaten => "KABUPATEN",
            CanonicalField::Nik => "NIK",
            CanonicalField::NomorSim => "Nomor SIM",
            CanonicalField::Nama => "Nama",
            CanonicalField::TempatTglLahir => "Tempat/Tgl Lahir",
            CanonicalField::JenisKelamin => "Jenis Kelamin",
            CanonicalField::GolDarah => "Gol. Darah",
            CanonicalField::Alamat => "Alamat",
            CanonicalField::RtRw => "RT/RW",
            CanonicalField::KelDesa => "Kel/Desa",
            CanonicalField::Kecamatan => "Kecamatan",
            CanonicalField::Agama => "Agama",
            CanonicalField::StatusPerkawinan => "Status Perkawinan",
            CanonicalField::Pekerjaan => "Pekerjaan",
            CanonicalField::Kewarganegaraan => "Kewarganegaraan",
            CanonicalField::BerlakuHingga => "Berlaku Hingga",
        }
    }

    /// Fields whose values are themselves dates.
    pub fn is_date_field(&self) -> bool {
        matches!(self, CanonicalField::TempatTglLahir | CanonicalField::BerlakuHingga)
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where the fragments of an extraction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceVariant {
    Standard,
    Enhanced,
    /// Recognizer output supplied directly, without an image.
    Recognition,
}

impl fmt::Display for SourceVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceVariant::Standard => write!(f, "standard"),
            SourceVariant::Enhanced => write!(f, "enhanced"),
            SourceVariant::Recognition => write!(f, "recognition"),
        }
    }
}

/// How a field value was found. Only used for provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionMethod {
    HeaderResidual,
    InlineColon,
    SameRow,
    AlamatContinuation,
    BelowKey,
    VocabularyMatch,
    PositionalName,
    NikPattern,
    NumberedSection,
    AnchorInline,
    AnchorForward,
    PatternScan,
    AddressBlock,
    DerivedFrom(CanonicalField),
    /// Filled in from the run over another image variant.
    MergedFrom(SourceVariant),
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolutionMethod::DerivedFrom(field) => write!(f, "derived from {}", field),
            ResolutionMethod::MergedFrom(variant) => write!(f, "merged from {}", variant),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedField {
    pub field: CanonicalField,
    pub value: String,
    /// Fragments whose text makes up `value`, in reading order.
    pub fragment_ids: Vec<usize>,
    pub method: ResolutionMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub rt_rw: Option<String>,
    pub kel_desa: Option<String>,
    pub kecamatan: Option<String>,
    pub kabupaten: Option<String>,
    pub provinsi: Option<String>,
}

impl Address {
    pub fn fill_gaps_from(&mut self, other: &Address) {
        fill(&mut self.name, &other.name);
        fill(&mut self.rt_rw, &other.rt_rw);
        fill(&mut self.kel_desa, &other.kel_desa);
        fill(&mut self.kecamatan, &other.kecamatan);
        fill(&mut self.kabupaten, &other.kabupaten);
        fill(&mut self.provinsi, &other.provinsi);
    }
}

pub(crate) fn fill(target: &mut Option<String>, source: &Option<String>) {
    if target.is_none() {
        if let Some(value) = source {
            *target = Some(value.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KtpRecord {
    pub nik: Option<String>,
    pub nama: Option<String>,
    pub tempat_lahir: Option<String>,
    pub tgl_lahir: Option<String>,
    pub jenis_kelamin: Option<String>,
    pub gol_darah: Option<String>,
    pub agama: Option<String>,
    pub status_perkawinan: Option<String>,
    pub pekerjaan: Option<String>,
    pub kewarganegaraan: Option<String>,
    pub berlaku_hingga: Option<String>,
    pub alamat: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimRecord {
    pub nomor_sim: Option<String>,
    pub nama: Option<String>,
    pub tempat_lahir: Option<String>,
    pub tgl_lahir: Option<String>,
    pub jenis_kelamin: Option<String>,
    pub gol_darah: Option<String>,
    pub pekerjaan: Option<String>,
    pub berlaku_sampai: Option<String>,
    pub alamat: Address,
}

/// Strongly typed result, one shape per document layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "document_type")]
pub enum StructuredRecord {
    #[serde(rename = "KTP")]
    Ktp(KtpRecord),
    #[serde(rename = "SIM")]
    Sim(SimRecord),
}

impl StructuredRecord {
    pub fn document_type(&self) -> DocumentType {
        match self {
            StructuredRecord::Ktp(_) => DocumentType::Ktp,
            StructuredRecord::Sim(_) => DocumentType::Sim,
        }
    }

    /// Record slots fed by `field`, in a fixed order. Empty when the field
    /// has no slot in this layout.
    pub fn values_for(&self, field: CanonicalField) -> Vec<Option<String>> {
        use CanonicalField as F;
        match self {
            StructuredRecord::Ktp(ktp) => match field {
                F::Nik => vec![ktp.nik.clone()],
                F::Nama => vec![ktp.nama.clone()],
                F::TempatTglLahir => vec![ktp.tempat_lahir.clone(), ktp.tgl_lahir.clone()],
                F::JenisKelamin => vec![ktp.jenis_kelamin.clone()],
                F::GolDarah => vec![ktp.gol_darah.clone()],
                F::Agama => vec![ktp.agama.clone()],
                F::StatusPerkawinan => vec![ktp.status_perkawinan.clone()],
                F::Pekerjaan => vec![ktp.pekerjaan.clone()],
                F::Kewarganegaraan => vec![ktp.kewarganegaraan.clone()],
                F::BerlakuHingga => vec![ktp.berlaku_hingga.clone()],
                F::Alamat => vec![ktp.alamat.name.clone()],
                F::RtRw => vec![ktp.alamat.rt_rw.clone()],
                F::KelDesa => vec![ktp.alamat.kel_desa.clone()],
                F::Kecamatan => vec![ktp.alamat.kecamatan.clone()],
                F::Kabupaten => vec![ktp.alamat.kabupaten.clone()],
                F::Provinsi => vec![ktp.alamat.provinsi.clone()],
                F::NomorSim => Vec::new(),
            },
            StructuredRecord::Sim(sim) => match field {
                F::NomorSim => vec![sim.nomor_sim.clone()],
                F::Nama => vec![sim.nama.clone()],
                F::TempatTglLahir => vec![sim.tempat_lahir.clone(), sim.tgl_lahir.clone()],
                F::JenisKelamin => vec![sim.jenis_kelamin.clone()],
                F::GolDarah => vec![sim.gol_darah.clone()],
                F::Pekerjaan => vec![sim.pekerjaan.clone()],
                F::BerlakuHingga => vec![sim.berlaku_sampai.clone()],
                F::Alamat => vec![
                    sim.alamat.name.clone(),
                    sim.alamat.rt_rw.clone(),
                    sim.alamat.kel_desa.clone(),
                    sim.alamat.kecamatan.clone(),
                    sim.alamat.kabupaten.clone(),
                ],
                F::Provinsi => vec![sim.alamat.provinsi.clone()],
                _ => Vec::new(),
            },
        }
    }

    /// Flatten into the fixed public schema.
    pub fn to_document_data(&self) -> DocumentData {
        match self {
            StructuredRecord::Ktp(ktp) => DocumentData {
                document_type: DocumentType::Ktp,
                nomor: ktp.nik.clone(),
                nama: ktp.nama.clone(),
                tempat_lahir: ktp.tempat_lahir.clone(),
                tgl_lahir: ktp.tgl_lahir.clone(),
                jenis_kelamin: ktp.jenis_kelamin.clone(),
                agama: ktp.agama.clone(),
                status_perkawinan: ktp.status_perkawinan.clone(),
                pekerjaan: ktp.pekerjaan.clone(),
                kewarganegaraan: ktp.kewarganegaraan.clone(),
                alamat: ktp.alamat.clone(),
            },
            StructuredRecord::Sim(sim) => DocumentData {
                document_type: DocumentType::Sim,
                nomor: sim.nomor_sim.clone(),
                nama: sim.nama.clone(),
                tempat_lahir: sim.tempat_lahir.clone(),
                tgl_lahir: sim.tgl_lahir.clone(),
                jenis_kelamin: sim.jenis_kelamin.clone(),
                agama: None,
                status_perkawinan: None,
                pekerjaan: sim.pekerjaan.clone(),
                kewarganegaraan: None,
                alamat: sim.alamat.clone(),
            },
        }
    }
}

/// `data` block of the public response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentData {
    pub document_type: DocumentType,
    pub nomor: Option<String>,
    pub nama: Option<String>,
    pub tempat_lahir: Option<String>,
    pub tgl_lahir: Option<String>,
    pub jenis_kelamin: Option<String>,
    pub agama: Option<String>,
    pub status_perkawinan: Option<String>,
    pub pekerjaan: Option<String>,
    pub kewarganegaraan: Option<String>,
    pub alamat: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DocumentData>,
}

impl ApiResponse {
    pub fn success(record: &StructuredRecord) -> Self {
        ApiResponse {
            status: 200,
            error: false,
            message: format!("{} OCR Processed Successfully", record.document_type()),
            data: Some(record.to_document_data()),
        }
    }

    pub fn from_error(err: &crate::utils::DocumentError) -> Self {
        ApiResponse {
            status: err.status_code(),
            error: true,
            message: err.public_message(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f32, y: f32, w: f32, h: f32) -> TextFragment {
        TextFragment {
            id: 0,
            polygon: [
                Point::new(x, y),
                Point::new(x + w, y),
                Point::new(x + w, y + h),
                Point::new(x, y + h),
            ],
            text: "X".to_string(),
            confidence: 1.0,
        }
    }

    #[test]
    fn test_fragment_geometry() {
        let frag = square(10.0, 20.0, 100.0, 30.0);
        assert_eq!(frag.y_center(), 35.0);
        assert_eq!(frag.x_start(), 10.0);
        assert_eq!(frag.x_end(), 110.0);
        assert_eq!(frag.top(), 20.0);
        assert_eq!(frag.bottom(), 50.0);
        assert_eq!(frag.area(), 3000.0);
    }

    #[test]
    fn test_sim_record_maps_to_public_schema() {
        let record = StructuredRecord::Sim(SimRecord {
            nomor_sim: Some("1234-5678-123456".into()),
            nama: Some("BUDI".into()),
            ..Default::default()
        });
        let data = record.to_document_data();
        assert_eq!(data.document_type, DocumentType::Sim);
        assert_eq!(data.nomor.as_deref(), Some("1234-5678-123456"));
        assert!(data.agama.is_none());
    }

    #[test]
    fn test_response_serialization_shape() {
        let response = ApiResponse::success(&StructuredRecord::Ktp(KtpRecord::default()));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], 200);
        assert_eq!(json["message"], "KTP OCR Processed Successfully");
        assert_eq!(json["data"]["document_type"], "KTP");
        assert!(json["data"]["alamat"]["rt_rw"].is_null());

        let failed = ApiResponse::from_error(&crate::utils::DocumentError::UnsupportedDocument);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], 400);
        assert_eq!(json["error"], true);
        assert!(json.get("data").is_none());
    }
}
