//! Request orchestration: decode, preprocess, infer, postprocess.
//!
//! Each request moves through [`RequestStage`]s in order and stops at the
//! first failure. The model behind a pipeline is loaded once and shared by
//! every request through an `Arc`.

use crate::{
    config::{ClassificationConfig, DetectionConfig, ModelConfig},
    decoder::{decode_image, DecodedImage},
    engine::{InferenceEngine, OrtInferenceEngine},
    error::{ConfigurationError, PipelineError, RequestStage},
    labels::LabelTable,
    postprocess::{self, ClassificationResult, Detection, DetectionParams, ScoreActivation},
    preprocess::Preprocessor,
};
use ndarray::ArrayD;
use std::sync::Arc;

#[derive(Clone)]
struct ModelPipeline {
    engine: Arc<dyn InferenceEngine>,
    preprocessor: Preprocessor,
    labels: Arc<LabelTable>,
}

impl ModelPipeline {
    fn new(
        engine: Arc<dyn InferenceEngine>,
        preprocessor: Preprocessor,
        labels: LabelTable,
    ) -> Result<Self, ConfigurationError> {
        let signature = engine.signature();
        let tensor = preprocessor.tensor_shape();
        if !signature.accepts(&tensor) {
            return Err(ConfigurationError::InputShapeMismatch {
                model: signature.name.clone(),
                tensor,
                expected: signature.input_shape.clone(),
            });
        }

        Ok(Self {
            engine,
            preprocessor,
            labels: Arc::new(labels),
        })
    }

    fn infer(&self, image_data: &[u8]) -> Result<(DecodedImage, ArrayD<f32>), PipelineError> {
        let image = decode_image(image_data)?;
        tracing::debug!(
            stage = RequestStage::Decoded.as_str(),
            width = image.width(),
            height = image.height()
        );

        let input = self.preprocessor.preprocess(&image);
        tracing::debug!(stage = RequestStage::Preprocessed.as_str(), shape = ?input.shape());

        let output = self.engine.run(&input)?;
        tracing::debug!(stage = RequestStage::Inferred.as_str(), shape = ?output.shape());

        Ok((image, output))
    }
}

/// Reads the label table, builds the preprocessor and opens the model. The
/// parts are checked against each other by the service constructors.
fn load_model(
    model_config: &ModelConfig,
) -> Result<(Arc<dyn InferenceEngine>, Preprocessor, LabelTable), ConfigurationError> {
    let labels = LabelTable::from_file(&model_config.version, &model_config.get_labels_path())?;
    let preprocessor = Preprocessor::new(
        model_config.input_width,
        model_config.input_height,
        model_config.preprocessing,
    )?;
    let engine = OrtInferenceEngine::new(model_config)?;

    tracing::info!(
        model = %model_config.name,
        labels = labels.len(),
        preprocessing = preprocessor.policy().as_str(),
        "Model loaded"
    );

    Ok((Arc::new(engine), preprocessor, labels))
}

/// Moves the CPU-bound part of a request onto the blocking pool. A panic in
/// there fails this request only.
async fn run_blocking<T, F>(task: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
}

#[derive(Clone)]
pub struct ClassificationService {
    pipeline: ModelPipeline,
    activation: ScoreActivation,
}

impl ClassificationService {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        preprocessor: Preprocessor,
        labels: LabelTable,
        activation: ScoreActivation,
    ) -> Result<Self, ConfigurationError> {
        if let Some(width) = engine.signature().output_width() {
            labels.check_output_width(width)?;
        }
        let pipeline = ModelPipeline::new(engine, preprocessor, labels)?;
        Ok(Self {
            pipeline,
            activation,
        })
    }

    pub fn from_config(config: &ClassificationConfig) -> Result<Self, ConfigurationError> {
        let (engine, preprocessor, labels) = load_model(&config.model)?;
        Self::new(engine, preprocessor, labels, config.score_activation)
    }

    pub fn labels(&self) -> &LabelTable {
        &self.pipeline.labels
    }

    pub fn classify(&self, image_data: &[u8]) -> Result<ClassificationResult, PipelineError> {
        let (_, output) = self.pipeline.infer(image_data)?;
        let result = postprocess::classify(&output, &self.pipeline.labels, self.activation)?;

        tracing::debug!(
            stage = RequestStage::Completed.as_str(),
            category = %result.category,
            confidence = result.confidence
        );
        Ok(result)
    }

    pub async fn classify_async<B>(&self, image_data: B) -> Result<ClassificationResult, PipelineError>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let service = self.clone();
        run_blocking(move || service.classify(image_data.as_ref())).await
    }
}

#[derive(Clone)]
pub struct DetectionService {
    pipeline: ModelPipeline,
    params: DetectionParams,
}

impl DetectionService {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        preprocessor: Preprocessor,
        labels: LabelTable,
        min_probability: f32,
        iou_threshold: f32,
    ) -> Result<Self, ConfigurationError> {
        // YOLOv8 emits [batch, 4 box coordinates + one score per class, anchors].
        let rows = engine.signature().output_shape.get(1).copied().unwrap_or(-1);
        if rows > 0 {
            labels.check_output_width((rows as usize).saturating_sub(4))?;
        }

        let [_, _, input_height, input_width] = preprocessor.tensor_shape();
        let params = DetectionParams {
            min_probability,
            iou_threshold,
            input_width: input_width as u32,
            input_height: input_height as u32,
        };
        params.validate()?;
        let pipeline = ModelPipeline::new(engine, preprocessor, labels)?;
        Ok(Self { pipeline, params })
    }

    pub fn from_config(config: &DetectionConfig) -> Result<Self, ConfigurationError> {
        let (engine, preprocessor, labels) = load_model(&config.model)?;
        Self::new(
            engine,
            preprocessor,
            labels,
            config.min_probability,
            config.iou_threshold,
        )
    }

    pub fn detect(&self, image_data: &[u8]) -> Result<Vec<Detection>, PipelineError> {
        let (image, output) = self.pipeline.infer(image_data)?;
        let detections = postprocess::decode_detections(
            &output,
            &self.pipeline.labels,
            &self.params,
            image.width(),
            image.height(),
        )?;

        tracing::debug!(
            stage = RequestStage::Completed.as_str(),
            detections = detections.len()
        );
        Ok(detections)
    }

    pub async fn detect_async<B>(&self, image_data: B) -> Result<Vec<Detection>, PipelineError>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let service = self.clone();
        run_blocking(move || service.detect(image_data.as_ref())).await
    }
}
