use std::time::Instant;

use image::{GrayImage, RgbImage};
use tracing::{error, info};

use crate::model::{ComputeDevice, InferenceRequest, InpaintModel, ModelError, SamplingGenerator};
use crate::pipeline::{InpaintError, InpaintParameters, Seed, DEFAULT_FILL_PROMPT};

/// Blank prompts give poor fills, so they are replaced with a generic one.
pub fn effective_prompt(prompt: &str) -> &str {
    if prompt.trim().is_empty() {
        DEFAULT_FILL_PROMPT
    } else {
        prompt
    }
}

pub fn sampling_generator(seed: Seed, device: &ComputeDevice) -> Option<SamplingGenerator> {
    match seed {
        Seed::Seeded(seed) => Some(SamplingGenerator {
            device: device.clone(),
            seed,
        }),
        Seed::Unseeded => None,
    }
}

/// Calls the model exactly once with working-size inputs.
pub fn run(
    model: &dyn InpaintModel,
    image: &RgbImage,
    mask: &GrayImage,
    params: &InpaintParameters,
) -> Result<RgbImage, InpaintError> {
    let generator = sampling_generator(params.seed, model.device());
    let request = InferenceRequest {
        image,
        mask,
        prompt: effective_prompt(params.prompt.as_str()),
        negative_prompt: params.negative_prompt.as_str(),
        num_inference_steps: params.num_inference_steps,
        guidance_scale: params.guidance_scale,
        strength: params.strength,
        generator: generator.as_ref(),
    };

    info!(
        model = %model.model_id(),
        width = image.width(),
        height = image.height(),
        steps = params.num_inference_steps,
        guidance_scale = params.guidance_scale,
        strength = params.strength,
        seeded = generator.is_some(),
        "running inpainting"
    );
    let started = Instant::now();

    let outputs = model.generate(&request).map_err(|err| {
        error!(
            model = %model.model_id(),
            width = image.width(),
            height = image.height(),
            steps = params.num_inference_steps,
            error = %err,
            "model generation failed"
        );
        InpaintError::Inference(err)
    })?;
    let result = outputs.into_iter().next().ok_or_else(|| {
        InpaintError::Inference(ModelError::Generation(String::from(
            "model returned no images",
        )))
    })?;

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        out_width = result.width(),
        out_height = result.height(),
        "inpainting finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use image::{Luma, Rgb};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        prompt: String,
        negative_prompt: String,
        generator: Option<SamplingGenerator>,
    }

    struct RecordingModel {
        device: ComputeDevice,
        seen: Mutex<Vec<Seen>>,
        outputs: usize,
    }

    impl RecordingModel {
        fn new(outputs: usize) -> Self {
            Self {
                device: ComputeDevice::Cuda,
                seen: Mutex::new(Vec::new()),
                outputs,
            }
        }
    }

    impl InpaintModel for RecordingModel {
        fn model_id(&self) -> &str {
            "recording"
        }

        fn device(&self) -> &ComputeDevice {
            &self.device
        }

        fn generate(&self, request: &InferenceRequest<'_>) -> Result<Vec<RgbImage>, ModelError> {
            self.seen.lock().expect("seen lock").push(Seen {
                prompt: request.prompt.to_string(),
                negative_prompt: request.negative_prompt.to_string(),
                generator: request.generator.cloned(),
            });
            Ok((0..self.outputs)
                .map(|i| RgbImage::from_pixel(8, 8, Rgb([i as u8, 0, 0])))
                .collect())
        }
    }

    static CPU: ComputeDevice = ComputeDevice::Cpu;

    struct FailingModel;

    impl InpaintModel for FailingModel {
        fn model_id(&self) -> &str {
            "failing"
        }

        fn device(&self) -> &ComputeDevice {
            &CPU
        }

        fn generate(&self, _request: &InferenceRequest<'_>) -> Result<Vec<RgbImage>, ModelError> {
            Err(ModelError::Generation(String::from("out of memory")))
        }
    }

    fn inputs() -> (RgbImage, GrayImage) {
        (
            RgbImage::from_pixel(8, 8, Rgb([9, 9, 9])),
            GrayImage::from_pixel(8, 8, Luma([255])),
        )
    }

    #[test]
    fn empty_prompt_is_replaced_with_fill_prompt() {
        assert_eq!(effective_prompt(""), DEFAULT_FILL_PROMPT);
        assert_eq!(effective_prompt("   "), DEFAULT_FILL_PROMPT);
        assert_eq!(effective_prompt("red ball"), "red ball");
    }

    #[test]
    fn seed_is_threaded_with_model_device() {
        let model = RecordingModel::new(1);
        let (image, mask) = inputs();
        let params = InpaintParameters {
            seed: Seed::Seeded(1234),
            ..InpaintParameters::default()
        };
        run(&model, &image, &mask, &params).expect("run should succeed");

        let seen = model.seen.lock().expect("seen lock");
        assert_eq!(
            seen[0].generator,
            Some(SamplingGenerator {
                device: ComputeDevice::Cuda,
                seed: 1234
            })
        );
        assert_eq!(seen[0].prompt, DEFAULT_FILL_PROMPT);
        assert_eq!(seen[0].negative_prompt, crate::pipeline::DEFAULT_NEGATIVE_PROMPT);
    }

    #[test]
    fn unseeded_run_passes_no_generator() {
        let model = RecordingModel::new(1);
        let (image, mask) = inputs();
        run(&model, &image, &mask, &InpaintParameters::default()).expect("run");
        assert_eq!(model.seen.lock().expect("seen lock")[0].generator, None);
    }

    #[test]
    fn first_output_is_returned() {
        let model = RecordingModel::new(3);
        let (image, mask) = inputs();
        let out = run(&model, &image, &mask, &InpaintParameters::default()).expect("run");
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(model.seen.lock().expect("seen lock").len(), 1);
    }

    #[test]
    fn empty_output_is_an_inference_error() {
        let model = RecordingModel::new(0);
        let (image, mask) = inputs();
        let err = run(&model, &image, &mask, &InpaintParameters::default())
            .expect_err("no images should fail");
        assert_eq!(err.kind(), "inference_error");
    }

    #[test]
    fn model_failures_keep_their_cause() {
        let (image, mask) = inputs();
        let err = run(&FailingModel, &image, &mask, &InpaintParameters::default())
            .expect_err("model failure should surface");
        assert!(matches!(err, InpaintError::Inference(ModelError::Generation(_))));
        assert!(err.to_string().contains("out of memory"));
    }
}
