// Debugging aid: shows what the recognizer saw and where every field came from.

use clap::Parser;
use image::{DynamicImage, Rgb, RgbImage};
use kartu::processing::visualizer::draw_fragments;
use kartu::processing::{FragmentIndex, NoFaceDetector, NoRecognizer, RecognitionOutput};
use kartu::{respond, AppConfig, DocumentError, DocumentProcessor};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "trace_fragments", about = "Dump fragments, field provenance and the public response")]
struct Args {
    /// Recognition JSON, or a card photograph when built with tesseract
    input: PathBuf,

    /// Treat INPUT as recognition JSON
    #[arg(long)]
    fragments: bool,

    /// Background for the overlay when INPUT is recognition JSON
    #[arg(long)]
    image: Option<PathBuf>,

    /// Write fragment boxes over the image to this file
    #[arg(long)]
    overlay: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "ind")]
    lang: String,
}

/// Normalized image (if any) and the recognizer output over it.
fn load(args: &Args, config: &AppConfig) -> Result<(Option<DynamicImage>, RecognitionOutput), DocumentError> {
    if args.fragments {
        let output = RecognitionOutput::from_json_file(&args.input)?;
        let background = match &args.image {
            Some(path) => Some(image::open(path).map_err(|_| DocumentError::ImageDecode(path.display().to_string()))?),
            None => None,
        };
        return Ok((background, output));
    }
    recognize_image(args, config)
}

#[cfg(feature = "tesseract")]
fn recognize_image(args: &Args, config: &AppConfig) -> Result<(Option<DynamicImage>, RecognitionOutput), DocumentError> {
    use kartu::processing::ocr::TesseractRecognizer;
    use kartu::processing::{GeometricNormalizer, TextRecognizer};

    if !args.input.exists() {
        return Err(DocumentError::FileNotFound(args.input.clone()));
    }
    let raw = image::open(&args.input).map_err(|_| DocumentError::ImageDecode(args.input.display().to_string()))?;
    let normalized = GeometricNormalizer::new(config.normalizer.clone(), Arc::new(NoFaceDetector)).normalize(&raw);
    let output = TesseractRecognizer::new(&args.lang)
        .recognize(&normalized)?
        .ok_or(DocumentError::NoTextDetected)?;
    Ok((Some(normalized), output))
}

#[cfg(not(feature = "tesseract"))]
fn recognize_image(_args: &Args, _config: &AppConfig) -> Result<(Option<DynamicImage>, RecognitionOutput), DocumentError> {
    Err(DocumentError::BadRequest(
        "image input needs the tesseract feature, use --fragments".to_string(),
    ))
}

fn print_fragments(index: &FragmentIndex) {
    println!("FRAGMENTS:");
    println!("  {:>4}  {:>5}  {:>7}  text", "id", "conf", "y");
    for fragment in index.fragments() {
        println!(
            "  {:>4}  {:>5.2}  {:>7.1}  {}",
            fragment.id,
            fragment.confidence,
            fragment.y_center(),
            fragment.text
        );
    }
}

fn main() -> Result<(), DocumentError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    let (background, output) = load(&args, &config)?;
    let index = FragmentIndex::from_recognition(&output);
    print_fragments(&index);

    let processor = DocumentProcessor::new(config, Arc::new(NoRecognizer), Arc::new(NoFaceDetector));
    let result = processor.process_recognition(&output);

    if let Ok(extraction) = &result {
        println!("\nFIELDS ({}):", extraction.document_type());
        for field in &extraction.fields {
            println!(
                "  {:<20} {:<32} ids {:?} via {}",
                field.field.label(),
                field.value,
                field.fragment_ids,
                field.method
            );
        }
        println!("  completeness {}", extraction.completeness);
    }

    println!("\nRESPONSE:");
    println!("{}", serde_json::to_string_pretty(&respond(&result))?);

    if let Some(path) = &args.overlay {
        let canvas = match background {
            Some(image) => image.to_rgb8(),
            None => {
                let width = index.fragments().iter().map(|f| f.x_end()).fold(0.0, f32::max) as u32 + 20;
                let height = index.fragments().iter().map(|f| f.bottom()).fold(0.0, f32::max) as u32 + 20;
                RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
            }
        };
        draw_fragments(&canvas, &index)
            .save(path)
            .map_err(|e| DocumentError::BadRequest(format!("cannot write overlay {}: {}", path.display(), e)))?;
        println!("\nOverlay written to {}", path.display());
    }

    Ok(())
}
