pub mod catalog;
pub mod remote;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use image::{GrayImage, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ComputeDevice {
    /// Let the collaborator pick (cuda, then mps, then cpu).
    #[default]
    Auto,
    Cuda,
    Mps,
    Cpu,
    Named(String),
}

impl ComputeDevice {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Auto => "auto",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
            Self::Named(name) => name.as_str(),
        }
    }

    /// Half precision on CUDA, full precision on other explicit devices.
    /// `None` for `Auto`: the worker picks once it has resolved the device.
    pub fn precision(&self) -> Option<Precision> {
        match self {
            Self::Auto => None,
            Self::Cuda => Some(Precision::Float16),
            Self::Named(name) if name.starts_with("cuda") => Some(Precision::Float16),
            _ => Some(Precision::Float32),
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeDevice {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "" | "auto" => Self::Auto,
            "cuda" => Self::Cuda,
            "mps" => Self::Mps,
            "cpu" => Self::Cpu,
            _ => Self::Named(normalized),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Float16,
    Float32,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Float16 => "float16",
            Self::Float32 => "float32",
        }
    }
}

/// Deterministic noise source handed to the model: a seed bound to the device
/// the sampler runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingGenerator {
    pub device: ComputeDevice,
    pub seed: u64,
}

/// Everything the model needs for one generation, already in working geometry.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    pub image: &'a RgbImage,
    pub mask: &'a GrayImage,
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub strength: f32,
    pub generator: Option<&'a SamplingGenerator>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model backend is not configured: {0}")]
    NotConfigured(String),
    #[error("model backend request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("model backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model backend returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("model generation failed: {0}")]
    Generation(String),
}

pub trait InpaintModel: Send + Sync + 'static {
    fn model_id(&self) -> &str;
    fn device(&self) -> &ComputeDevice;
    /// Runs one generation; the first image is the result.
    fn generate(&self, request: &InferenceRequest<'_>) -> Result<Vec<RgbImage>, ModelError>;
}

pub type SharedInpaintModel = Arc<dyn InpaintModel>;

pub trait ModelLoader: Send + Sync + 'static {
    fn model_id(&self) -> &str;
    fn load(&self) -> Result<SharedInpaintModel, ModelError>;
}

pub type SharedModelLoader = Arc<dyn ModelLoader>;

/// Process-wide model slot. The model is loaded on first use and shared
/// read-only afterwards; concurrent first uses wait on `init_guard` so the
/// loader runs once. A failed load leaves the slot empty.
pub struct ModelHandle {
    loader: SharedModelLoader,
    model: OnceLock<SharedInpaintModel>,
    init_guard: Mutex<()>,
}

impl ModelHandle {
    pub fn new(loader: SharedModelLoader) -> Self {
        Self {
            loader,
            model: OnceLock::new(),
            init_guard: Mutex::new(()),
        }
    }

    pub fn model_id(&self) -> &str {
        self.loader.model_id()
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Blocks while another caller is loading.
    pub fn get_or_load(&self) -> Result<SharedInpaintModel, ModelError> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        let _guard = self
            .init_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        let started = Instant::now();
        info!(model = %self.loader.model_id(), "loading inpainting model");
        match self.loader.load() {
            Ok(model) => {
                info!(
                    model = %model.model_id(),
                    device = %model.device(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "inpainting model loaded"
                );
                Ok(self.model.get_or_init(|| model).clone())
            }
            Err(err) => {
                error!(model = %self.loader.model_id(), error = %err, "failed to load model");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
