//! Model output to human-facing results.

use crate::{
    error::{ConfigurationError, InferenceError},
    labels::LabelTable,
};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// How raw classifier scores become the reported confidence.
///
/// `Identity` reports the raw maximum, which is only a probability when the
/// exported graph already ends in a softmax. `Softmax` normalizes first, for
/// graphs that emit logits.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreActivation {
    Identity,
    Softmax,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub confidence: f32,
}

/// Index and value of the largest score. Ties go to the lowest index.
pub fn argmax(scores: &[f32]) -> Result<(usize, f32), InferenceError> {
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(InferenceError::NonFiniteScore(index));
    }

    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        .ok_or(InferenceError::EmptyOutput)
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

pub fn classify(
    output: &ArrayD<f32>,
    labels: &LabelTable,
    activation: ScoreActivation,
) -> Result<ClassificationResult, InferenceError> {
    let raw: Vec<f32> = output.iter().copied().collect();
    if raw.len() != labels.len() {
        return Err(InferenceError::OutputWidth {
            expected: labels.len(),
            actual: raw.len(),
        });
    }

    let scores = match activation {
        ScoreActivation::Identity => raw,
        ScoreActivation::Softmax => softmax(&raw),
    };
    let (index, confidence) = argmax(&scores)?;

    let category = labels
        .get(index)
        .ok_or(InferenceError::OutputWidth {
            expected: labels.len(),
            actual: scores.len(),
        })?
        .to_string();

    Ok(ClassificationResult {
        category,
        confidence,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

fn intersection(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.0);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.0);
    width * height
}

fn union(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionParams {
    pub min_probability: f32,
    pub iou_threshold: f32,
    pub input_width: u32,
    pub input_height: u32,
}

impl DetectionParams {
    /// Every box overlaps itself with an IoU of at most 1, so a threshold
    /// above that would never suppress anything.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.min_probability.is_finite() && (0.0..=1.0).contains(&self.min_probability)) {
            return Err(ConfigurationError::InvalidDetectionParams(format!(
                "min_probability must lie in [0, 1], got {}",
                self.min_probability
            )));
        }
        if !(self.iou_threshold.is_finite() && self.iou_threshold > 0.0 && self.iou_threshold <= 1.0)
        {
            return Err(ConfigurationError::InvalidDetectionParams(format!(
                "iou_threshold must lie in (0, 1], got {}",
                self.iou_threshold
            )));
        }
        Ok(())
    }
}

/// Decodes a YOLOv8 output of shape `[1, 4 + classes, anchors]` into boxes in
/// original image coordinates, then applies greedy class-agnostic NMS.
pub fn decode_detections(
    outputs: &ArrayD<f32>,
    labels: &LabelTable,
    params: &DetectionParams,
    img_width: u32,
    img_height: u32,
) -> Result<Vec<Detection>, InferenceError> {
    let shape = outputs.shape();
    let expected_rows = 4 + labels.len();
    if shape.len() != 3 || shape[0] != 1 || shape[1] != expected_rows {
        return Err(InferenceError::OutputWidth {
            expected: expected_rows,
            actual: shape.get(1).copied().unwrap_or(0),
        });
    }

    let x_scale = img_width as f32 / params.input_width as f32;
    let y_scale = img_height as f32 / params.input_height as f32;

    let mut boxes = Vec::new();
    let output = outputs.index_axis(Axis(0), 0);

    for anchor in output.axis_iter(Axis(1)) {
        let row: Vec<f32> = anchor.iter().copied().collect();
        let (class_id, prob) = argmax(&row[4..])?;

        if prob < params.min_probability {
            continue;
        }

        let xc = row[0] * x_scale;
        let yc = row[1] * y_scale;
        let w = row[2] * x_scale;
        let h = row[3] * y_scale;

        boxes.push(BoundingBox {
            class_id,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        // The kept box leaves the queue even when its own IoU is not 1
        // (degenerate boxes with a negative side).
        let best = boxes.remove(0);
        result.push(best);
        boxes.retain(|bbox| intersection(&best, bbox) / union(&best, bbox) < params.iou_threshold);
    }

    Ok(result
        .into_iter()
        .map(|bbox| Detection {
            class_id: bbox.class_id,
            label: labels.get(bbox.class_id).unwrap_or_default().to_string(),
            confidence: bbox.confidence,
            x1: bbox.x1,
            y1: bbox.y1,
            x2: bbox.x2,
            y2: bbox.y2,
        })
        .collect())
}
