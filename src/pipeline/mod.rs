pub mod codec;
pub mod geometry;
pub mod inference;
pub mod mask;
pub mod orchestrator;

use std::fmt;

use thiserror::Error;

use crate::model::ModelError;
use crate::pipeline::codec::CodecError;
use crate::pipeline::geometry::GeometryError;

pub const DEFAULT_NEGATIVE_PROMPT: &str = "blurry, low quality, watermark, text";
pub const DEFAULT_FILL_PROMPT: &str = "clean background, seamless fill";
pub const DEFAULT_INFERENCE_STEPS: u32 = 30;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.5;
pub const DEFAULT_STRENGTH: f32 = 0.8;

/// Per-request progress. A failure in any stage ends the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineStage {
    Received,
    Decoded,
    Adapted,
    Normalized,
    Inferred,
    Restored,
    Encoded,
    Done,
}

impl PipelineStage {
    pub const ORDER: [Self; 8] = [
        Self::Received,
        Self::Decoded,
        Self::Adapted,
        Self::Normalized,
        Self::Inferred,
        Self::Restored,
        Self::Encoded,
        Self::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Decoded => "decoded",
            Self::Adapted => "adapted",
            Self::Normalized => "normalized",
            Self::Inferred => "inferred",
            Self::Restored => "restored",
            Self::Encoded => "encoded",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Seed {
    Seeded(u64),
    /// Fresh randomness; results are not reproducible.
    #[default]
    Unseeded,
}

impl From<Option<u64>> for Seed {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Unseeded, Self::Seeded)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InpaintParameters {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub strength: f32,
    pub seed: Seed,
}

impl Default for InpaintParameters {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::from(DEFAULT_NEGATIVE_PROMPT),
            num_inference_steps: DEFAULT_INFERENCE_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            strength: DEFAULT_STRENGTH,
            seed: Seed::Unseeded,
        }
    }
}

impl InpaintParameters {
    pub fn validate(&self) -> Result<(), InpaintError> {
        if self.num_inference_steps == 0 {
            return Err(InpaintError::InvalidParameters(String::from(
                "Field 'num_inference_steps' must be a positive integer",
            )));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale <= 0.0 {
            return Err(InpaintError::InvalidParameters(String::from(
                "Field 'guidance_scale' must be a positive number",
            )));
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(InpaintError::InvalidParameters(String::from(
                "Field 'strength' must be between 0.0 and 1.0",
            )));
        }
        Ok(())
    }
}

/// Which client payload a decode failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRole {
    Image,
    Mask,
}

impl PayloadRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Mask => "mask",
        }
    }
}

impl fmt::Display for PayloadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InpaintError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("could not decode {role}: {source}")]
    Decode {
        role: PayloadRole,
        #[source]
        source: CodecError,
    },
    #[error("unsupported image geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("model not available: {0}")]
    ModelUnavailable(#[source] ModelError),
    #[error("inference failed: {0}")]
    Inference(#[source] ModelError),
    #[error("could not encode result: {0}")]
    Encode(#[source] CodecError),
}

impl InpaintError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::Decode { .. } => "decode_error",
            Self::Geometry(_) => "geometry_error",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::Inference(_) => "inference_error",
            Self::Encode(_) => "encode_error",
        }
    }

    /// The stage the request was in when it failed. The model is acquired
    /// right after the request is accepted, before any payload is decoded.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::InvalidParameters(_) | Self::ModelUnavailable(_) => PipelineStage::Received,
            Self::Decode { .. } => PipelineStage::Decoded,
            Self::Geometry(_) => PipelineStage::Adapted,
            Self::Inference(_) => PipelineStage::Inferred,
            Self::Encode(_) => PipelineStage::Encoded,
        }
    }
}
