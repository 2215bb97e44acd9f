use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use leukemia_screening::{
    AdvisorySource, AnalysisRequest, FailureTag, Label, PatientDetails, PipelineStage,
    ScreeningError, ScreeningPipeline, Severity,
    advisory::{Advisor, AdvisoryAdapter},
    backends::{RawContent, TextGenerator, VisionBackend},
    classifier::{Classifier, ClassifierAdapter},
    config::{AdvisoryConfig, ClassifierConfig},
    error::BackendError,
    input::PreparedImage,
    models::ClassificationResult,
    report::ReportCompiler,
};
use std::io::Cursor;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

fn cell_image() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([180, 60, 140])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Classifier that returns a fixed result
struct FixedClassifier {
    label: Label,
    confidence: f64,
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, _image: &PreparedImage) -> Result<ClassificationResult, ScreeningError> {
        Ok(ClassificationResult {
            label: self.label,
            confidence: self.confidence,
            raw_model_output: self.label.to_string().to_lowercase(),
        })
    }
}

struct FailingClassifier;

#[async_trait]
impl Classifier for FailingClassifier {
    async fn classify(&self, _image: &PreparedImage) -> Result<ClassificationResult, ScreeningError> {
        Err(ScreeningError::BackendUnavailable("model endpoint refused connection".into()))
    }
}

/// Vision backend replying with canned text
struct CannedVision(&'static str);

#[async_trait]
impl VisionBackend for CannedVision {
    async fn load(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn generate(
        &self,
        _image: &PreparedImage,
        _prompt: &str,
    ) -> Result<RawContent, BackendError> {
        Ok(RawContent::Text(self.0.to_string()))
    }
}

/// Vision backend that never answers within the configured timeout
struct StalledVision;

#[async_trait]
impl VisionBackend for StalledVision {
    async fn load(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn generate(
        &self,
        _image: &PreparedImage,
        _prompt: &str,
    ) -> Result<RawContent, BackendError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(RawContent::Text("leukemia".into()))
    }
}

/// Generation backend that counts calls and always fails
#[derive(Default)]
struct DownGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for DownGenerator {
    async fn generate(&self, _system: &str, _user: &str) -> Result<RawContent, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Unavailable("503 Service Unavailable".into()))
    }
}

/// Advisor wrapper counting invocations
struct CountingAdvisor {
    inner: AdvisoryAdapter,
    calls: AtomicUsize,
}

impl CountingAdvisor {
    fn new(generator: Option<Arc<dyn TextGenerator>>) -> Arc<Self> {
        Arc::new(Self {
            inner: AdvisoryAdapter::new(generator, AdvisoryConfig::default()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Advisor for CountingAdvisor {
    async fn advise(
        &self,
        label: Label,
        confidence: f64,
        patient_context: Option<&str>,
    ) -> leukemia_screening::AdvisoryResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.advise(label, confidence, patient_context).await
    }
}

fn pipeline(classifier: Arc<dyn Classifier>, advisor: Arc<dyn Advisor>) -> ScreeningPipeline {
    ScreeningPipeline::new(classifier, advisor, ReportCompiler::default())
}

#[tokio::test]
async fn leukemia_positive_run_is_critical_and_reported() {
    let generator = Arc::new(DownGenerator::default());
    let advisor = CountingAdvisor::new(Some(generator.clone() as Arc<dyn TextGenerator>));
    let pipeline = pipeline(
        Arc::new(FixedClassifier { label: Label::Leukemia, confidence: 0.90 }),
        advisor.clone(),
    );

    let record = pipeline.run(AnalysisRequest::new(cell_image())).await;

    assert_eq!(record.stage, PipelineStage::Done);
    assert!(record.failure.is_none());
    assert_eq!(
        record.transitions,
        vec![
            PipelineStage::Start,
            PipelineStage::Classified,
            PipelineStage::AdviceGenerated,
            PipelineStage::Reported,
            PipelineStage::Done,
        ]
    );

    let advisory = record.advisory.as_ref().unwrap();
    assert_eq!(advisory.severity, Severity::Critical);
    assert!(advisory.urgent_action_required);
    assert!(advisory.prioritized_steps.len() >= 3);
    assert_eq!(advisory.source, AdvisorySource::Fallback);
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    let document = record.report_document.as_ref().unwrap();
    assert!(document.body.contains("Leukemia"));
    assert!(document.body.contains("90.0%"));
}

#[tokio::test]
async fn normal_run_never_calls_the_advisor() {
    let advisor = CountingAdvisor::new(None);
    let pipeline = pipeline(
        Arc::new(FixedClassifier { label: Label::Normal, confidence: 0.70 }),
        advisor.clone(),
    );

    let record = pipeline.run(AnalysisRequest::new(cell_image())).await;

    assert!(record.is_complete());
    assert!(!record.advisory_stage_ran());
    assert!(record.transitions.contains(&PipelineStage::AdviceSkipped));
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 0);

    let advisory = record.advisory.as_ref().unwrap();
    assert_eq!(advisory.severity, Severity::Low);
    assert!(!advisory.urgent_action_required);
    assert_eq!(advisory.source, AdvisorySource::Synthesized);
    assert!(record.report_document.unwrap().body.contains("No abnormality detected"));
}

#[tokio::test]
async fn unrecognized_model_output_is_uncertain_and_still_reported() {
    let classifier = ClassifierAdapter::new(
        Arc::new(CannedVision("I am unable to determine the cell type.")),
        &ClassifierConfig::default(),
    );
    let advisor = CountingAdvisor::new(None);
    let pipeline = pipeline(Arc::new(classifier), advisor.clone());

    let record = pipeline.run(AnalysisRequest::new(cell_image())).await;

    assert!(record.is_complete());
    let classification = record.classification.as_ref().unwrap();
    assert_eq!(classification.label, Label::Uncertain);
    assert_eq!(classification.confidence, 0.50);
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 0);
    assert!(!record.advisory.as_ref().unwrap().urgent_action_required);
    assert!(record.report_document.unwrap().body.contains("UNCERTAIN"));
}

#[tokio::test]
async fn classifier_outage_fails_the_run_without_a_report() {
    let advisor = CountingAdvisor::new(None);
    let pipeline = pipeline(Arc::new(FailingClassifier), advisor.clone());

    let record = pipeline.run(AnalysisRequest::new(cell_image())).await;

    assert_eq!(record.stage, PipelineStage::Failed);
    let failure = record.failure.as_ref().unwrap();
    assert_eq!(failure.tag, FailureTag::BackendUnavailable);
    assert!(failure.message.contains("refused"));
    assert!(record.classification.is_none());
    assert!(record.report_document.is_none());
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn classifier_timeout_fails_the_run_without_a_report() {
    let config = ClassifierConfig {
        timeout_secs: 1,
        ..Default::default()
    };
    let classifier = ClassifierAdapter::new(Arc::new(StalledVision), &config);
    let advisor = CountingAdvisor::new(None);
    let pipeline = pipeline(Arc::new(classifier), advisor.clone());

    let record = pipeline.run(AnalysisRequest::new(cell_image())).await;

    assert_eq!(record.stage, PipelineStage::Failed);
    let failure = record.failure.as_ref().unwrap();
    assert_eq!(failure.tag, FailureTag::BackendUnavailable);
    assert!(failure.message.contains("timed out"));
    assert!(record.report_document.is_none());
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_image_is_rejected_before_classification() {
    let pipeline = pipeline(Arc::new(FailingClassifier), CountingAdvisor::new(None));

    let record = pipeline.run(AnalysisRequest::new(Vec::new())).await;

    assert_eq!(record.transitions, vec![PipelineStage::Start, PipelineStage::Failed]);
    let failure = record.failure.unwrap();
    assert_eq!(failure.tag, FailureTag::InvalidInput);
    assert!(failure.message.contains("no image provided"));
}

#[tokio::test]
async fn short_patient_name_is_invalid_input() {
    let pipeline = pipeline(
        Arc::new(FixedClassifier { label: Label::Normal, confidence: 0.70 }),
        CountingAdvisor::new(None),
    );
    let request = AnalysisRequest::new(cell_image()).with_patient(PatientDetails {
        name: "J".into(),
        ..Default::default()
    });

    let record = pipeline.run(request).await;
    assert_eq!(record.failure.unwrap().tag, FailureTag::InvalidInput);
}

#[tokio::test]
async fn repeated_runs_agree_on_classification_and_fallback_advisory() {
    let pipeline = pipeline(
        Arc::new(FixedClassifier { label: Label::Leukemia, confidence: 0.83 }),
        CountingAdvisor::new(Some(Arc::new(DownGenerator::default()) as Arc<dyn TextGenerator>)),
    );
    let request = AnalysisRequest::new(cell_image())
        .with_patient_id("LS-TEST")
        .with_patient_context("persistent fatigue");

    let first = pipeline.run(request.clone()).await;
    let second = pipeline.run(request).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.classification, second.classification);
    assert_eq!(first.advisory, second.advisory);
    assert_eq!(first.advisory.unwrap().severity, Severity::High);
}

#[tokio::test]
async fn patient_details_reach_the_advisory_and_report() {
    struct ContextProbe {
        seen: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl TextGenerator for ContextProbe {
        async fn generate(&self, _system: &str, user: &str) -> Result<RawContent, BackendError> {
            *self.seen.lock().unwrap() = Some(user.to_string());
            Ok(RawContent::Text(
                "## Recommended Actions\n1. CBC\n2. Smear\n3. Biopsy\n4. Referral\n## Urgency\nHigh"
                    .into(),
            ))
        }
    }

    let probe = Arc::new(ContextProbe { seen: Default::default() });
    let advisor: Arc<dyn Advisor> = Arc::new(AdvisoryAdapter::new(
        Some(probe.clone() as Arc<dyn TextGenerator>),
        AdvisoryConfig::default(),
    ));
    let pipeline = pipeline(
        Arc::new(FixedClassifier { label: Label::Leukemia, confidence: 0.83 }),
        advisor,
    );
    let request = AnalysisRequest::new(cell_image())
        .with_patient_id("LS-20250101120000")
        .with_patient_context("bruising")
        .with_patient(PatientDetails {
            name: "Sam Rivera".into(),
            date_of_birth: Some("2016-05-01".into()),
            gender: None,
        });

    let record = pipeline.run(request).await;

    let prompt = probe.seen.lock().unwrap().clone().unwrap();
    assert!(prompt.contains("Name: Sam Rivera, DOB: 2016-05-01, Gender: Not specified"));
    assert!(prompt.contains("bruising"));

    let advisory = record.advisory.as_ref().unwrap();
    assert_eq!(advisory.source, AdvisorySource::Generated);
    assert_eq!(advisory.prioritized_steps, vec!["CBC", "Smear", "Biopsy", "Referral"]);

    let body = &record.report_document.as_ref().unwrap().body;
    assert!(body.contains("Sam Rivera"));
    assert!(body.contains("LS-20250101120000"));
}
