use crate::{
    config::ModelConfig,
    error::{ConfigurationError, InferenceError},
};
use ndarray::{Array, ArrayD, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::{TensorRef, ValueType},
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

/// Declared input and output of a loaded model. Dynamic dimensions are `-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSignature {
    pub name: String,
    pub input_name: String,
    pub input_shape: Vec<i64>,
    pub output_name: String,
    pub output_shape: Vec<i64>,
}

impl ModelSignature {
    pub fn accepts(&self, shape: &[usize]) -> bool {
        self.input_shape.len() == shape.len()
            && self
                .input_shape
                .iter()
                .zip(shape)
                .all(|(&declared, &actual)| declared < 0 || declared as usize == actual)
    }

    pub fn check_input(&self, shape: &[usize]) -> Result<(), InferenceError> {
        if self.accepts(shape) {
            Ok(())
        } else {
            Err(InferenceError::ShapeMismatch {
                expected: self.input_shape.clone(),
                actual: shape.to_vec(),
            })
        }
    }

    /// Scores per sample, if every non-batch output dimension is static.
    pub fn output_width(&self) -> Option<usize> {
        let per_sample = self.output_shape.get(1..)?;
        if per_sample.is_empty() || per_sample.iter().any(|&d| d <= 0) {
            return None;
        }
        Some(per_sample.iter().map(|&d| d as usize).product())
    }
}

/// A loaded, read-only model graph. Implementations must be callable from
/// many requests at once.
pub trait InferenceEngine: Send + Sync {
    fn signature(&self) -> &ModelSignature;

    fn run(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, InferenceError>;
}

/// ONNX Runtime backed engine. Sessions need exclusive access while running,
/// so the engine keeps a small pool and hands requests out round-robin.
pub struct OrtInferenceEngine {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    signature: ModelSignature,
}

impl OrtInferenceEngine {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ConfigurationError> {
        model_config.validate()?;
        let model_path = model_config.get_model_path();
        let num_instances = model_config.num_instances.max(1);

        let sessions = (0..num_instances)
            .map(|_| {
                Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|source| ConfigurationError::ModelLoad {
                path: model_path.clone(),
                source,
            })?;

        // Every session comes from the same file, so the first one speaks for all.
        let signature = read_signature(&model_config.name, &sessions[0])?;
        let sessions = sessions.into_iter().map(Mutex::new).collect();

        tracing::info!(
            model = %model_config.name,
            version = %model_config.version,
            input = ?signature.input_shape,
            output = ?signature.output_shape,
            "Created {} ONNX sessions",
            num_instances
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            signature,
        })
    }
}

fn unsupported(model: &str, reason: String) -> ConfigurationError {
    ConfigurationError::UnsupportedModel(model.to_string(), reason)
}

fn tensor_shape(model: &str, name: &str, value_type: &ValueType) -> Result<Vec<i64>, ConfigurationError> {
    match value_type {
        ValueType::Tensor { shape, .. } => Ok(shape.iter().copied().collect()),
        _ => Err(unsupported(model, format!("{name} is not a tensor"))),
    }
}

fn read_signature(model: &str, session: &Session) -> Result<ModelSignature, ConfigurationError> {
    let input = session
        .inputs
        .first()
        .ok_or_else(|| unsupported(model, "model declares no inputs".into()))?;
    let output = session
        .outputs
        .first()
        .ok_or_else(|| unsupported(model, "model declares no outputs".into()))?;

    Ok(ModelSignature {
        name: model.to_string(),
        input_name: input.name.clone(),
        input_shape: tensor_shape(model, &input.name, &input.input_type)?,
        output_name: output.name.clone(),
        output_shape: tensor_shape(model, &output.name, &output.output_type)?,
    })
}

impl InferenceEngine for OrtInferenceEngine {
    fn signature(&self) -> &ModelSignature {
        &self.signature
    }

    fn run(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, InferenceError> {
        self.signature.check_input(input.shape())?;

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::PoisonedSession(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (shape, data) =
            outputs[self.signature.output_name.as_str()].try_extract_tensor::<f32>()?;

        let array = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| InferenceError::Runtime(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::PreprocessPolicy;
    use std::path::PathBuf;

    fn signature(input_shape: Vec<i64>, output_shape: Vec<i64>) -> ModelSignature {
        ModelSignature {
            name: "test".into(),
            input_name: "input".into(),
            input_shape,
            output_name: "output".into(),
            output_shape,
        }
    }

    #[test]
    fn test_signature_accepts_exact_shape() {
        let sig = signature(vec![1, 3, 240, 240], vec![1, 9]);
        assert!(sig.accepts(&[1, 3, 240, 240]));
        assert!(!sig.accepts(&[1, 3, 640, 640]));
        assert!(!sig.accepts(&[3, 240, 240]));
    }

    #[test]
    fn test_signature_accepts_dynamic_dimensions() {
        let sig = signature(vec![-1, 3, -1, -1], vec![-1, 9]);
        assert!(sig.accepts(&[1, 3, 240, 240]));
        assert!(sig.accepts(&[4, 3, 17, 33]));
        assert!(!sig.accepts(&[1, 1, 240, 240]));
    }

    #[test]
    fn test_check_input_reports_mismatch() {
        let sig = signature(vec![1, 3, 240, 240], vec![1, 9]);
        match sig.check_input(&[1, 3, 640, 640]) {
            Err(InferenceError::ShapeMismatch { expected, actual }) => {
                assert_eq!(expected, vec![1, 3, 240, 240]);
                assert_eq!(actual, vec![1, 3, 640, 640]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_output_width() {
        assert_eq!(signature(vec![], vec![1, 9]).output_width(), Some(9));
        assert_eq!(signature(vec![], vec![-1, 9]).output_width(), Some(9));
        assert_eq!(signature(vec![], vec![1, 84, 8400]).output_width(), Some(84 * 8400));
        assert_eq!(signature(vec![], vec![1, -1]).output_width(), None);
        assert_eq!(signature(vec![], vec![9]).output_width(), None);
    }

    #[test]
    fn test_missing_model_is_a_configuration_error() {
        let config = ModelConfig {
            name: "missing".into(),
            version: "v0".into(),
            model_dir: PathBuf::from("/nonexistent"),
            onnx_file: "model.onnx".into(),
            labels_file: "model.labels".into(),
            input_width: 240,
            input_height: 240,
            preprocessing: PreprocessPolicy::UnitScale,
            num_instances: 1,
        };

        assert!(matches!(
            OrtInferenceEngine::new(&config),
            Err(ConfigurationError::ModelNotFound(_))
        ));
    }
}
