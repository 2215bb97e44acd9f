use chrono::Utc;
use clap::Parser;
use leukemia_screening::{
    AnalysisRequest, LogFormat, PatientDetails, PipelineRecord, PipelineStage, ScreeningConfig,
    ScreeningPipeline, format_percent, generate_patient_id, init_tracing,
};
use std::path::PathBuf;
use tracing::info;

/// Screen one blood cell image and optionally write the HTML report
#[derive(Debug, Parser)]
#[command(name = "screen-image", version)]
struct Args {
    /// Microscopy image (PNG, JPEG, ...)
    image: PathBuf,

    #[arg(long)]
    patient_id: Option<String>,

    /// Patient name; enables the patient information block
    #[arg(long)]
    name: Option<String>,

    /// Date of birth, YYYY-MM-DD
    #[arg(long)]
    dob: Option<String>,

    #[arg(long)]
    gender: Option<String>,

    /// Free-text clinical context handed to the advisory stage
    #[arg(long)]
    context: Option<String>,

    /// Where to write the HTML report
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl Args {
    fn into_request(self, image: Vec<u8>) -> AnalysisRequest {
        let mut request = AnalysisRequest::new(image);
        request.patient_context = self.context;
        request.patient_id = self.patient_id;
        if let Some(name) = self.name {
            request.patient = Some(PatientDetails {
                name,
                date_of_birth: self.dob,
                gender: self.gender,
            });
            if request.patient_id.is_none() {
                request.patient_id = Some(generate_patient_id(Utc::now()));
            }
        }
        request
    }
}

fn print_trace(record: &PipelineRecord) {
    let reached = |stage| record.transitions.contains(&stage);
    let advisor = if reached(PipelineStage::AdviceGenerated) {
        "complete"
    } else if reached(PipelineStage::AdviceSkipped) {
        "skipped"
    } else {
        "not run"
    };
    let rows = [
        (
            "Classifier",
            if reached(PipelineStage::Classified) { "complete" } else { "failed" },
        ),
        ("Clinical advisor", advisor),
        (
            "Report",
            if reached(PipelineStage::Reported) { "complete" } else { "not run" },
        ),
    ];

    println!("{:<18} {}", "Stage", "Status");
    println!("{:<18} {}", "-----", "------");
    for (stage, status) in rows {
        println!("{:<18} {}", stage, status);
    }
    println!();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ScreeningConfig::load()?;
    if std::env::var_os("LOG_FORMAT").is_none() {
        config.logging.format = LogFormat::Pretty;
    }
    init_tracing(&config.logging);

    let image = std::fs::read(&args.image)?;
    let output = args.output.clone();

    let pipeline = ScreeningPipeline::from_config(&config);
    let record = pipeline.run(args.into_request(image)).await;

    print_trace(&record);

    if let Some(failure) = &record.failure {
        eprintln!("Screening failed ({:?}): {}", failure.tag, failure.message);
        std::process::exit(1);
    }

    if let Some(classification) = &record.classification {
        println!(
            "Classification: {} ({})",
            classification.label,
            format_percent(classification.confidence)
        );
    }
    if let Some(advisory) = &record.advisory {
        println!(
            "Severity: {}{}",
            advisory.severity,
            if advisory.urgent_action_required { ", urgent action required" } else { "" }
        );
        for (i, step) in advisory.prioritized_steps.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }

    if let (Some(path), Some(document)) = (output, &record.report_document) {
        std::fs::write(&path, &document.body)?;
        info!(path = %path.display(), "Report written");
        println!("Report written to {}", path.display());
    }

    Ok(())
}
