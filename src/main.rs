// Command line front end: one card in, the public JSON response out.

use clap::Parser;
use kartu::processing::{NoFaceDetector, NoRecognizer, RecognitionOutput, TextRecognizer};
use kartu::{respond, AppConfig, DocumentError, DocumentProcessor, ExtractionResult, ProcessingMode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "kartu", about = "Read KTP and SIM cards into structured fields")]
struct Args {
    /// Card photograph, or recognition JSON with --fragments
    input: PathBuf,

    /// Treat INPUT as saved recognizer output and skip image processing
    #[arg(long)]
    fragments: bool,

    #[arg(long, value_enum, default_value_t = ProcessingMode::Standard)]
    mode: ProcessingMode,

    /// JSON file overriding thresholds and keyword tables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the per-field provenance to stderr
    #[arg(long)]
    trace: bool,

    /// Recognizer language
    #[arg(long, default_value = "ind")]
    lang: String,
}

#[cfg(feature = "tesseract")]
fn recognizer(lang: &str) -> Result<Arc<dyn TextRecognizer>, DocumentError> {
    Ok(Arc::new(kartu::processing::ocr::TesseractRecognizer::new(lang)))
}

#[cfg(not(feature = "tesseract"))]
fn recognizer(_lang: &str) -> Result<Arc<dyn TextRecognizer>, DocumentError> {
    Err(DocumentError::BadRequest(
        "image input needs the tesseract feature, use --fragments for recognition JSON".to_string(),
    ))
}

fn run(args: &Args) -> Result<ExtractionResult, DocumentError> {
    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    if args.fragments {
        let output = RecognitionOutput::from_json_file(&args.input)?;
        let processor = DocumentProcessor::new(config, Arc::new(NoRecognizer), Arc::new(NoFaceDetector));
        return processor.process_recognition(&output);
    }

    let processor = DocumentProcessor::new(config, recognizer(&args.lang)?, Arc::new(NoFaceDetector));
    processor.process_path(&args.input, args.mode)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = run(&args);
    if args.trace {
        if let Ok(extraction) = &result {
            for field in &extraction.fields {
                eprintln!(
                    "{:<20} {:<30} {:?} ({})",
                    field.field.label(),
                    field.value,
                    field.fragment_ids,
                    field.method
                );
            }
        }
    }

    let response = respond(&result);
    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize response: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if response.status == 200 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
