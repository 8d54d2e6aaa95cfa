use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    EmptyPayload,
    #[error("unrecognised image format")]
    UnknownFormat,
    #[error("error decoding image: {0}")]
    Corrupt(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("input shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch { expected: Vec<i64>, actual: Vec<usize> },
    #[error("model produced {actual} scores but {expected} labels are configured")]
    OutputWidth { expected: usize, actual: usize },
    #[error("model produced no scores")]
    EmptyOutput,
    #[error("model produced a non-finite score at index {0}")]
    NonFiniteScore(usize),
    #[error("session pool poisoned: {0}")]
    PoisonedSession(String),
    #[error("inference failed: {0}")]
    Runtime(String),
}

impl From<ort::Error> for InferenceError {
    fn from(err: ort::Error) -> Self {
        InferenceError::Runtime(err.to_string())
    }
}

/// Startup-time failures. None of these are tolerated at runtime.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("model file not found: {0:?}")]
    ModelNotFound(PathBuf),
    #[error("failed to load model {path:?}: {source}")]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },
    #[error("model {0} has an unsupported signature: {1}")]
    UnsupportedModel(String, String),
    #[error("failed to read label table {path:?}: {source}")]
    LabelsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("label table {0} is empty")]
    EmptyLabels(String),
    #[error("label table {table} lists {label:?} twice")]
    DuplicateLabel { table: String, label: String },
    #[error("label table {table} has {labels} labels but the model outputs {outputs} scores")]
    LabelCountMismatch {
        table: String,
        labels: usize,
        outputs: usize,
    },
    #[error("preprocessing for {model} produces {tensor:?} but the model expects {expected:?}")]
    InputShapeMismatch {
        model: String,
        tensor: [usize; 4],
        expected: Vec<i64>,
    },
    #[error("invalid preprocessing constants: {0}")]
    InvalidPreprocessing(String),
    #[error("invalid detection thresholds: {0}")]
    InvalidDetectionParams(String),
    #[error("failed to load FAQ file {path:?}: {message}")]
    FaqUnreadable { path: PathBuf, message: String },
}

/// Lifecycle of a single request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    Decoded,
    Preprocessed,
    Inferred,
    Completed,
}

impl RequestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStage::Received => "received",
            RequestStage::Decoded => "decoded",
            RequestStage::Preprocessed => "preprocessed",
            RequestStage::Inferred => "inferred",
            RequestStage::Completed => "completed",
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No image provided")]
    MissingImage,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Last stage the request reached before failing.
    pub fn stage(&self) -> RequestStage {
        match self {
            PipelineError::MissingImage => RequestStage::Received,
            PipelineError::Decode(_) => RequestStage::Received,
            PipelineError::Inference(InferenceError::ShapeMismatch { .. }) => {
                RequestStage::Preprocessed
            }
            PipelineError::Inference(InferenceError::Runtime(_)) => {
                RequestStage::Preprocessed
            }
            PipelineError::Inference(InferenceError::PoisonedSession(_)) => {
                RequestStage::Preprocessed
            }
            PipelineError::Inference(_) => RequestStage::Inferred,
            PipelineError::Worker(_) => RequestStage::Received,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::MissingImage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_of_failures() {
        assert_eq!(
            PipelineError::MissingImage.stage(),
            RequestStage::Received
        );
        assert_eq!(
            PipelineError::from(DecodeError::EmptyPayload).stage(),
            RequestStage::Received
        );
        let mismatch = InferenceError::ShapeMismatch {
            expected: vec![1, 3, 240, 240],
            actual: vec![1, 3, 640, 640],
        };
        assert_eq!(
            PipelineError::from(mismatch).stage(),
            RequestStage::Preprocessed
        );
        assert_eq!(
            PipelineError::from(InferenceError::EmptyOutput).stage(),
            RequestStage::Inferred
        );
    }

    #[test]
    fn test_only_missing_image_is_a_client_error() {
        assert!(PipelineError::MissingImage.is_client_error());
        assert!(!PipelineError::from(DecodeError::EmptyPayload).is_client_error());
        assert!(!PipelineError::Worker("panic".into()).is_client_error());
    }
}
