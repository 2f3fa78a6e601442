use std::time::Duration;

use image::{DynamicImage, RgbImage};
use reqwest::blocking::{multipart, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::ServiceConfig;
use crate::model::{
    ComputeDevice, InferenceRequest, InpaintModel, ModelError, ModelLoader, Precision,
    SharedInpaintModel,
};
use crate::pipeline::codec::{self, OutputFormat, Payload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteModelConfig {
    pub model_id: String,
    pub device: ComputeDevice,
    pub endpoint: Option<Url>,
    pub timeout: Duration,
}

impl RemoteModelConfig {
    pub fn from_service_config(config: &ServiceConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            device: config.device.clone(),
            endpoint: config.model_endpoint.clone(),
            timeout: config.model_timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct LoadRequest<'a> {
    model: &'a str,
    device: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    precision: Option<Precision>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LoadResponse {
    #[serde(default)]
    device: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// Loads a model inside an HTTP diffusion worker.
#[derive(Debug, Clone)]
pub struct RemoteModelLoader {
    config: RemoteModelConfig,
}

impl RemoteModelLoader {
    pub fn new(config: RemoteModelConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for RemoteModelLoader {
    fn model_id(&self) -> &str {
        self.config.model_id.as_str()
    }

    fn load(&self) -> Result<SharedInpaintModel, ModelError> {
        let endpoint = self.config.endpoint.as_ref().ok_or_else(|| {
            ModelError::NotConfigured(String::from(
                "INPAINT_MODEL_ENDPOINT is not set; no inference worker to load the model into",
            ))
        })?;
        let client = build_client(self.config.timeout)?;
        let url = endpoint_url(endpoint, "load");
        debug!(%url, model = %self.config.model_id, "requesting model load");

        let resp = client
            .post(url.as_str())
            .json(&LoadRequest {
                model: self.config.model_id.as_str(),
                device: self.config.device.as_str(),
                precision: self.config.device.precision(),
            })
            .send()
            .map_err(ModelError::Transport)?;
        let resp = ensure_success(resp)?;
        let loaded: LoadResponse = resp
            .json()
            .map_err(|e| ModelError::InvalidResponse(format!("load response JSON: {e}")))?;

        // The worker reports the device it picked when asked for `auto`.
        let device = loaded
            .device
            .map(|name| name.parse::<ComputeDevice>().unwrap_or_default())
            .unwrap_or_else(|| self.config.device.clone());

        Ok(std::sync::Arc::new(RemoteInpaintModel {
            model_id: self.config.model_id.clone(),
            device,
            endpoint: endpoint.clone(),
            timeout: self.config.timeout,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct RemoteInpaintModel {
    model_id: String,
    device: ComputeDevice,
    endpoint: Url,
    timeout: Duration,
}

impl InpaintModel for RemoteInpaintModel {
    fn model_id(&self) -> &str {
        self.model_id.as_str()
    }

    fn device(&self) -> &ComputeDevice {
        &self.device
    }

    fn generate(&self, request: &InferenceRequest<'_>) -> Result<Vec<RgbImage>, ModelError> {
        let image_png = png_part(DynamicImage::ImageRgb8(request.image.clone()), "image.png")?;
        let mask_png = png_part(DynamicImage::ImageLuma8(request.mask.clone()), "mask.png")?;

        let mut form = multipart::Form::new()
            .text("model", self.model_id.clone())
            .text("device", self.device.as_str().to_string())
            .text("prompt", request.prompt.to_string())
            .text("negative_prompt", request.negative_prompt.to_string())
            .text(
                "num_inference_steps",
                request.num_inference_steps.to_string(),
            )
            .text("guidance_scale", request.guidance_scale.to_string())
            .text("strength", request.strength.to_string())
            .part("image", image_png)
            .part("mask", mask_png);
        if let Some(generator) = request.generator {
            form = form
                .text("seed", generator.seed.to_string())
                .text("generator_device", generator.device.as_str().to_string());
        }

        let client = build_client(self.timeout)?;
        let resp = client
            .post(endpoint_url(&self.endpoint, "generate").as_str())
            .multipart(form)
            .send()
            .map_err(ModelError::Transport)?;
        let resp = ensure_success(resp)?;
        let payload: GenerateResponse = resp
            .json()
            .map_err(|e| ModelError::InvalidResponse(format!("generate response JSON: {e}")))?;

        payload
            .images
            .iter()
            .map(|encoded| {
                codec::decode_color(Payload::Inline(encoded.as_str()))
                    .map_err(|e| ModelError::InvalidResponse(format!("generated image: {e}")))
            })
            .collect()
    }
}

fn png_part(image: DynamicImage, file_name: &str) -> Result<multipart::Part, ModelError> {
    let bytes = codec::encode(&image, OutputFormat::Png)
        .map_err(|e| ModelError::Generation(format!("encode {file_name}: {e}")))?;
    multipart::Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str(OutputFormat::Png.mime())
        .map_err(ModelError::Transport)
}

fn build_client(timeout: Duration) -> Result<Client, ModelError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ModelError::Transport)
}

fn ensure_success(
    resp: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, ModelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(ModelError::Status {
        status: status.as_u16(),
        body,
    })
}

fn endpoint_url(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>) -> RemoteModelConfig {
        RemoteModelConfig {
            model_id: String::from("runwayml/stable-diffusion-inpainting"),
            device: ComputeDevice::Auto,
            endpoint: endpoint.map(|raw| Url::parse(raw).expect("test url")),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn endpoint_paths_join_with_single_slash() {
        let base = Url::parse("http://worker:9000/").expect("url");
        assert_eq!(endpoint_url(&base, "load"), "http://worker:9000/load");
        let nested = Url::parse("http://worker:9000/sd/v1").expect("url");
        assert_eq!(endpoint_url(&nested, "generate"), "http://worker:9000/sd/v1/generate");
    }

    #[test]
    fn load_without_endpoint_is_not_configured() {
        let loader = RemoteModelLoader::new(config(None));
        let err = loader.load().err().expect("load should fail");
        assert!(matches!(err, ModelError::NotConfigured(_)));
    }

    #[test]
    fn load_response_device_is_optional() {
        let parsed: LoadResponse = serde_json::from_str("{}").expect("parse");
        assert!(parsed.device.is_none());
        let parsed: LoadResponse =
            serde_json::from_str(r#"{"device":"cuda","model":"x"}"#).expect("parse");
        assert_eq!(parsed.device.as_deref(), Some("cuda"));
    }
}
