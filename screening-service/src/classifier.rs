use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::{
    backends::VisionBackend,
    config::{Calibration, ClassifierConfig},
    error::{BackendError, ScreeningError},
    input::PreparedImage,
    models::{ClassificationResult, Label},
};

/// Instruction sent with every image; matches the prompt the model was tuned on
pub const CLASSIFICATION_PROMPT: &str = "Analyze this blood cell microscopy image and classify it.\n\
Is the cell NORMAL or LEUKEMIA (blast)?\n\
Answer with exactly one of: Normal, Leukemia.\n";

/// Stage-one collaborator of the pipeline
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &PreparedImage) -> Result<ClassificationResult, ScreeningError>;
}

/// Classifier over a generative vision backend.
///
/// The backend is loaded at most once; a failed load leaves the guard empty so
/// the next call tries again.
pub struct ClassifierAdapter {
    backend: Arc<dyn VisionBackend>,
    loaded: OnceCell<()>,
    calibration: Calibration,
    timeout: Duration,
}

impl ClassifierAdapter {
    pub fn new(backend: Arc<dyn VisionBackend>, config: &ClassifierConfig) -> Self {
        Self {
            backend,
            loaded: OnceCell::new(),
            calibration: config.calibration,
            timeout: config.timeout(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    async fn ensure_loaded(&self) -> Result<(), ScreeningError> {
        self.loaded
            .get_or_try_init(|| async {
                info!("Initializing vision backend");
                match tokio::time::timeout(self.timeout, self.backend.load()).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(self.timeout)),
                }
            })
            .await
            .map(|_| ())
            .map_err(|e| {
                error!(error = %e, "Vision backend failed to load");
                ScreeningError::BackendUnavailable(e.to_string())
            })
    }
}

#[async_trait]
impl Classifier for ClassifierAdapter {
    async fn classify(&self, image: &PreparedImage) -> Result<ClassificationResult, ScreeningError> {
        self.ensure_loaded().await?;

        let generated =
            match tokio::time::timeout(self.timeout, self.backend.generate(image, CLASSIFICATION_PROMPT))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.timeout)),
            };

        match generated {
            Ok(content) => Ok(interpret(&content.into_text(), &self.calibration)),
            Err(BackendError::Malformed(detail)) => {
                warn!(detail = %detail, "Unparseable classifier response, reporting as uncertain");
                Ok(ClassificationResult {
                    label: Label::Uncertain,
                    confidence: self.calibration.uncertain,
                    raw_model_output: String::new(),
                })
            }
            Err(e) => {
                error!(error = %e, "Classification call failed");
                Err(ScreeningError::BackendUnavailable(e.to_string()))
            }
        }
    }
}

/// Turn generated text into a classification using only its last non-empty line
pub fn interpret(generated: &str, calibration: &Calibration) -> ClassificationResult {
    let decision = last_meaningful_line(generated).to_lowercase();
    let label = parse_label(&decision);
    ClassificationResult {
        label,
        confidence: calibration.confidence_for(label),
        raw_model_output: decision,
    }
}

pub fn last_meaningful_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("")
}

/// "leukemia" wins whenever present; "normal" alone means normal.
pub fn parse_label(line: &str) -> Label {
    let line = line.to_lowercase();
    if line.contains("leukemia") {
        Label::Leukemia
    } else if line.contains("normal") {
        Label::Normal
    } else {
        Label::Uncertain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::RawContent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_image() -> PreparedImage {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        crate::input::prepare_image(&bytes).unwrap()
    }

    struct ScriptedBackend {
        load_result: Result<(), BackendError>,
        reply: Result<RawContent, BackendError>,
        loads: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn replying(reply: Result<RawContent, BackendError>) -> Arc<Self> {
            Arc::new(Self {
                load_result: Ok(()),
                reply,
                loads: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedBackend {
        async fn load(&self) -> Result<(), BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.load_result.clone()
        }

        async fn generate(
            &self,
            _image: &PreparedImage,
            prompt: &str,
        ) -> Result<RawContent, BackendError> {
            assert_eq!(prompt, CLASSIFICATION_PROMPT);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn adapter(backend: Arc<ScriptedBackend>) -> ClassifierAdapter {
        ClassifierAdapter::new(backend, &ClassifierConfig::default())
    }

    #[test]
    fn label_parsing_is_case_insensitive() {
        assert_eq!(parse_label("  NORMAL "), Label::Normal);
        assert_eq!(parse_label("Leukemia (blast)"), Label::Leukemia);
        assert_eq!(parse_label("normal or leukemia"), Label::Leukemia);
        assert_eq!(parse_label("cannot tell"), Label::Uncertain);
    }

    #[test]
    fn only_last_line_counts() {
        let calibration = Calibration::default();
        let result = interpret("Is the cell NORMAL or LEUKEMIA?\nmodel\n  Normal  \n\n", &calibration);
        assert_eq!(result.label, Label::Normal);
        assert_eq!(result.confidence, 0.70);
        assert_eq!(result.raw_model_output, "normal");
    }

    #[test]
    fn calibrated_confidences_per_label() {
        let calibration = Calibration::default();
        assert_eq!(interpret("leukemia", &calibration).confidence, 0.83);
        let uncertain = interpret("", &calibration);
        assert_eq!(uncertain.label, Label::Uncertain);
        assert_eq!(uncertain.confidence, 0.50);
    }

    #[tokio::test]
    async fn backend_loads_once_across_calls() {
        let backend = ScriptedBackend::replying(Ok(RawContent::Text("Leukemia".into())));
        let classifier = adapter(backend.clone());
        let image = test_image();

        assert!(!classifier.is_loaded());
        classifier.classify(&image).await.unwrap();
        classifier.classify(&image).await.unwrap();

        assert!(classifier.is_loaded());
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_load_is_fatal_and_retried_next_time() {
        let backend = Arc::new(ScriptedBackend {
            load_result: Err(BackendError::Unavailable("connection refused".into())),
            reply: Ok(RawContent::Text("normal".into())),
            loads: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let classifier = adapter(backend.clone());
        let image = test_image();

        for _ in 0..2 {
            let err = classifier.classify(&image).await.unwrap_err();
            assert!(matches!(err, ScreeningError::BackendUnavailable(_)));
        }
        assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_response_becomes_uncertain() {
        let backend = ScriptedBackend::replying(Err(BackendError::Malformed("no content".into())));
        let result = adapter(backend).classify(&test_image()).await.unwrap();

        assert_eq!(result.label, Label::Uncertain);
        assert_eq!(result.confidence, 0.50);
    }

    /// Backend that stalls in `load` or `generate` longer than the adapter waits
    struct StalledBackend {
        stall_load: bool,
    }

    #[async_trait]
    impl VisionBackend for StalledBackend {
        async fn load(&self) -> Result<(), BackendError> {
            if self.stall_load {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(())
        }

        async fn generate(
            &self,
            _image: &PreparedImage,
            _prompt: &str,
        ) -> Result<RawContent, BackendError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(RawContent::Text("normal".into()))
        }
    }

    fn one_second() -> ClassifierConfig {
        ClassifierConfig {
            timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn load_timeout_is_fatal() {
        let classifier =
            ClassifierAdapter::new(Arc::new(StalledBackend { stall_load: true }), &one_second());
        let err = classifier.classify(&test_image()).await.unwrap_err();

        match err {
            ScreeningError::BackendUnavailable(message) => assert!(message.contains("timed out")),
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
        assert!(!classifier.is_loaded());
    }

    #[tokio::test]
    async fn generate_timeout_is_fatal() {
        let classifier =
            ClassifierAdapter::new(Arc::new(StalledBackend { stall_load: false }), &one_second());
        let err = classifier.classify(&test_image()).await.unwrap_err();

        match err {
            ScreeningError::BackendUnavailable(message) => assert!(message.contains("timed out")),
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
        assert!(classifier.is_loaded());
    }

    #[tokio::test]
    async fn unreachable_inference_is_fatal() {
        let backend = ScriptedBackend::replying(Err(BackendError::Unavailable("503".into())));
        let err = adapter(backend).classify(&test_image()).await.unwrap_err();
        assert!(matches!(err, ScreeningError::BackendUnavailable(_)));
    }
}
