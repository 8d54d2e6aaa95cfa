//! Image to tensor conversion.
//!
//! Every model declares its own [`PreprocessPolicy`]. Feeding a standardized
//! tensor to a model trained on plain `[0, 1]` inputs (or the reverse) still
//! yields plausible scores, so the policy is never defaulted.

use crate::{decoder::DecodedImage, error::ConfigurationError};
use image::imageops::{self, FilterType};
use ndarray::{Array, Ix4};
use serde::Deserialize;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resampling kernel shared by every pipeline. Catmull-Rom is the bicubic
/// filter the reference models were evaluated with.
const RESAMPLE_FILTER: FilterType = FilterType::CatmullRom;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Standardization {
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
}

fn default_mean() -> [f32; 3] {
    IMAGENET_MEAN
}

fn default_std() -> [f32; 3] {
    IMAGENET_STD
}

impl Standardization {
    pub fn imagenet() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (channel, (&m, &s)) in self.mean.iter().zip(&self.std).enumerate() {
            if !m.is_finite() {
                return Err(ConfigurationError::InvalidPreprocessing(format!(
                    "mean of channel {channel} is not finite: {m}"
                )));
            }
            if !s.is_finite() || s <= 0.0 {
                return Err(ConfigurationError::InvalidPreprocessing(format!(
                    "std of channel {channel} must be positive, got {s}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreprocessPolicy {
    /// Pixels divided by 255, nothing else. Used by the YOLOv8 detector.
    UnitScale,
    /// Pixels divided by 255, then `(x - mean) / std` per channel.
    Standardize(Standardization),
}

impl PreprocessPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreprocessPolicy::UnitScale => "unit_scale",
            PreprocessPolicy::Standardize(_) => "standardize",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    width: u32,
    height: u32,
    policy: PreprocessPolicy,
}

impl Preprocessor {
    pub fn new(width: u32, height: u32, policy: PreprocessPolicy) -> Result<Self, ConfigurationError> {
        if width == 0 || height == 0 {
            return Err(ConfigurationError::InvalidPreprocessing(format!(
                "target size must be non-zero, got {width}x{height}"
            )));
        }
        if let PreprocessPolicy::Standardize(standardization) = &policy {
            standardization.validate()?;
        }
        Ok(Self {
            width,
            height,
            policy,
        })
    }

    pub fn policy(&self) -> &PreprocessPolicy {
        &self.policy
    }

    /// `[batch, channels, height, width]` of every tensor this preprocessor emits.
    pub fn tensor_shape(&self) -> [usize; 4] {
        [1, 3, self.height as usize, self.width as usize]
    }

    pub fn preprocess(&self, image: &DecodedImage) -> Array<f32, Ix4> {
        let resized = imageops::resize(image.pixels(), self.width, self.height, RESAMPLE_FILTER);

        let (scale, offset) = self.channel_affine();
        let mut input = Array::zeros(self.tensor_shape());
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for (channel, &value) in pixel.0.iter().enumerate() {
                let unit = value as f32 / 255.;
                input[[0, channel, y, x]] = (unit - offset[channel]) / scale[channel];
            }
        }

        input
    }

    fn channel_affine(&self) -> ([f32; 3], [f32; 3]) {
        match &self.policy {
            PreprocessPolicy::UnitScale => ([1.0; 3], [0.0; 3]),
            PreprocessPolicy::Standardize(s) => (s.std, s.mean),
        }
    }
}
