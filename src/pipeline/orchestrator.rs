use std::sync::{Arc, Mutex, PoisonError};

use image::{DynamicImage, RgbImage};
use tracing::{debug, error};

use crate::model::ModelHandle;
use crate::pipeline::codec::{self, OutputFormat, Payload};
use crate::pipeline::geometry::{self, GeometrySettings};
use crate::pipeline::mask::{self, DEFAULT_MASK_THRESHOLD};
use crate::pipeline::{inference, InpaintError, InpaintParameters, PayloadRole, PipelineStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub geometry: GeometrySettings,
    pub mask_threshold: u8,
    /// Run at most one inference at a time; later requests wait.
    pub serialize_inference: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            geometry: GeometrySettings::default(),
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            serialize_inference: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InpaintRequest<'a> {
    pub image: Payload<'a>,
    pub mask: Payload<'a>,
    pub params: &'a InpaintParameters,
}

/// Generated pixels at the client's original resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct InpaintResult {
    pub image: RgbImage,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedInpaint {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

impl EncodedInpaint {
    pub fn to_inline(&self) -> String {
        codec::inline_from_bytes(self.bytes.as_slice(), self.format)
    }
}

#[derive(Debug)]
pub struct InpaintOrchestrator {
    model: Arc<ModelHandle>,
    settings: OrchestratorSettings,
    inference_gate: Mutex<()>,
}

impl InpaintOrchestrator {
    pub fn new(model: Arc<ModelHandle>, settings: OrchestratorSettings) -> Self {
        Self {
            model,
            settings,
            inference_gate: Mutex::new(()),
        }
    }

    pub fn model(&self) -> &ModelHandle {
        self.model.as_ref()
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// Full pipeline, ending with the encoded payload.
    pub fn inpaint(
        &self,
        request: InpaintRequest<'_>,
        format: OutputFormat,
    ) -> Result<EncodedInpaint, InpaintError> {
        let result = self.run_pipeline(request)?;
        let bytes = codec::encode(&DynamicImage::ImageRgb8(result.image), format).map_err(|e| {
            let err = InpaintError::Encode(e);
            log_failure(&err, None);
            err
        })?;
        advance(PipelineStage::Encoded);
        advance(PipelineStage::Done);
        Ok(EncodedInpaint {
            bytes,
            format,
            width: result.width,
            height: result.height,
        })
    }

    /// Everything up to (not including) encoding.
    pub fn run_pipeline(&self, request: InpaintRequest<'_>) -> Result<InpaintResult, InpaintError> {
        let params = request.params;
        advance(PipelineStage::Received);
        params.validate().inspect_err(|err| log_failure(err, None))?;

        // An unavailable model fails the request before any payload work.
        let model = self.model.get_or_load().map_err(|e| {
            let err = InpaintError::ModelUnavailable(e);
            log_failure(&err, None);
            err
        })?;

        let source = codec::decode_color(request.image).map_err(|source| {
            let err = InpaintError::Decode {
                role: PayloadRole::Image,
                source,
            };
            log_failure(&err, None);
            err
        })?;
        let dims = Some(source.dimensions());
        let raw_mask = codec::decode_grayscale(request.mask).map_err(|source| {
            let err = InpaintError::Decode {
                role: PayloadRole::Mask,
                source,
            };
            log_failure(&err, dims);
            err
        })?;
        advance(PipelineStage::Decoded);

        let (working_image, transform) = geometry::adapt(&source, self.settings.geometry)
            .map_err(|e| {
                let err = InpaintError::from(e);
                log_failure(&err, dims);
                err
            })?;
        let working_mask = geometry::adapt_mask(&raw_mask, &transform);
        debug!(
            original_width = transform.original_width,
            original_height = transform.original_height,
            working_width = transform.working_width,
            working_height = transform.working_height,
            mask_width = raw_mask.width(),
            mask_height = raw_mask.height(),
            "adapted geometry"
        );
        advance(PipelineStage::Adapted);

        let working_mask = mask::binarize(&working_mask, self.settings.mask_threshold);
        debug!(
            coverage = mask::coverage(&working_mask),
            threshold = self.settings.mask_threshold,
            "normalized mask"
        );
        advance(PipelineStage::Normalized);

        let generated = {
            let _gate = self
                .settings
                .serialize_inference
                .then(|| self.inference_gate.lock().unwrap_or_else(PoisonError::into_inner));
            inference::run(model.as_ref(), &working_image, &working_mask, params)
                .inspect_err(|err| log_failure(err, dims))?
        };
        advance(PipelineStage::Inferred);

        let restored = geometry::restore(&generated, &transform);
        advance(PipelineStage::Restored);

        Ok(InpaintResult {
            width: transform.original_width,
            height: transform.original_height,
            image: restored,
        })
    }
}

fn advance(stage: PipelineStage) {
    debug!(stage = stage.as_str(), "inpaint stage reached");
}

fn log_failure(err: &InpaintError, dims: Option<(u32, u32)>) {
    let (width, height) = dims.unwrap_or((0, 0));
    error!(
        stage = err.stage().as_str(),
        kind = err.kind(),
        width,
        height,
        error = %err,
        "inpaint request failed"
    );
}
