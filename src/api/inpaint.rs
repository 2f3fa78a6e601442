use std::str::FromStr;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};
use uuid::Uuid;

use crate::api::error::{
    error_response, internal_error, into_response, json_rejection_error, map_inpaint_error,
    validation_error, ApiError, ErrorKind,
};
use crate::api::server::AppState;
use crate::pipeline::codec::{OutputFormat, Payload};
use crate::pipeline::orchestrator::InpaintRequest;
use crate::pipeline::{
    InpaintParameters, Seed, DEFAULT_GUIDANCE_SCALE, DEFAULT_INFERENCE_STEPS,
    DEFAULT_NEGATIVE_PROMPT, DEFAULT_STRENGTH,
};

#[derive(Debug, Clone, Deserialize)]
pub struct InpaintJsonRequest {
    pub image: String,
    pub mask: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub num_inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl InpaintJsonRequest {
    pub fn parameters(&self) -> InpaintParameters {
        InpaintParameters {
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            num_inference_steps: self.num_inference_steps,
            guidance_scale: self.guidance_scale,
            strength: self.strength,
            seed: Seed::from(self.seed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InpaintJsonResponse {
    /// Data URI of the encoded result.
    pub result: String,
    pub width: u32,
    pub height: u32,
}

fn default_negative_prompt() -> String {
    String::from(DEFAULT_NEGATIVE_PROMPT)
}

fn default_steps() -> u32 {
    DEFAULT_INFERENCE_STEPS
}

fn default_guidance_scale() -> f32 {
    DEFAULT_GUIDANCE_SCALE
}

fn default_strength() -> f32 {
    DEFAULT_STRENGTH
}

pub async fn inpaint_json_handler(
    State(state): State<AppState>,
    payload: Result<Json<InpaintJsonRequest>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            info!(reason = %rejection.body_text(), "inpaint request body rejected");
            return into_response(json_rejection_error(&rejection));
        }
    };
    let request_id = Uuid::new_v4();
    let span = info_span!("inpaint", %request_id, endpoint = "json");
    let orchestrator = state.orchestrator.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        span.in_scope(|| {
            let params = payload.parameters();
            info!(
                prompt = %params.prompt,
                image_len = payload.image.len(),
                mask_len = payload.mask.len(),
                format = payload.output_format.as_str(),
                "inpaint request received"
            );
            orchestrator.inpaint(
                InpaintRequest {
                    image: Payload::Inline(payload.image.as_str()),
                    mask: Payload::Inline(payload.mask.as_str()),
                    params: &params,
                },
                payload.output_format,
            )
        })
    })
    .await;

    match outcome {
        Ok(Ok(encoded)) => (
            StatusCode::OK,
            Json(InpaintJsonResponse {
                result: encoded.to_inline(),
                width: encoded.width,
                height: encoded.height,
            }),
        )
            .into_response(),
        Ok(Err(err)) => into_response(map_inpaint_error(&err)),
        Err(join_error) => into_response(internal_error(format!(
            "inpaint task failed: {join_error}"
        ))),
    }
}

/// Multipart counterpart of the JSON endpoint; the result is returned as a
/// raw PNG body.
pub async fn inpaint_upload_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Response {
    let form = match UploadForm::read(multipart).await {
        Ok(form) => form,
        Err(err) => return into_response(err),
    };
    let (image, mask, params) = match form.into_parts() {
        Ok(parts) => parts,
        Err(err) => return into_response(err),
    };

    let request_id = Uuid::new_v4();
    let span = info_span!("inpaint", %request_id, endpoint = "upload");
    let orchestrator = state.orchestrator.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        span.in_scope(|| {
            info!(
                prompt = %params.prompt,
                image_len = image.len(),
                mask_len = mask.len(),
                "inpaint upload received"
            );
            orchestrator.inpaint(
                InpaintRequest {
                    image: Payload::Binary(image.as_slice()),
                    mask: Payload::Binary(mask.as_slice()),
                    params: &params,
                },
                OutputFormat::Png,
            )
        })
    })
    .await;

    match outcome {
        Ok(Ok(encoded)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoded.format.mime())],
            encoded.bytes,
        )
            .into_response(),
        Ok(Err(err)) => into_response(map_inpaint_error(&err)),
        Err(join_error) => into_response(internal_error(format!(
            "inpaint upload task failed: {join_error}"
        ))),
    }
}

#[derive(Debug, Default)]
struct UploadForm {
    image: Option<Vec<u8>>,
    mask: Option<Vec<u8>>,
    prompt: Option<String>,
    negative_prompt: Option<String>,
    num_inference_steps: Option<String>,
    guidance_scale: Option<String>,
    strength: Option<String>,
    seed: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" => form.image = Some(field_bytes(field).await?),
                "mask" => form.mask = Some(field_bytes(field).await?),
                "prompt" => form.prompt = Some(field_text(field).await?),
                "negative_prompt" => form.negative_prompt = Some(field_text(field).await?),
                "num_inference_steps" => {
                    form.num_inference_steps = Some(field_text(field).await?)
                }
                "guidance_scale" => form.guidance_scale = Some(field_text(field).await?),
                "strength" => form.strength = Some(field_text(field).await?),
                "seed" => form.seed = Some(field_text(field).await?),
                // Unknown parts are drained and ignored.
                _ => {
                    field_bytes(field).await?;
                }
            }
        }
        Ok(form)
    }

    fn into_parts(self) -> Result<(Vec<u8>, Vec<u8>, InpaintParameters), ApiError> {
        let image = self
            .image
            .ok_or_else(|| validation_error("Missing multipart file 'image'"))?;
        let mask = self
            .mask
            .ok_or_else(|| validation_error("Missing multipart file 'mask'"))?;

        let defaults = InpaintParameters::default();
        let params = InpaintParameters {
            prompt: self.prompt.unwrap_or(defaults.prompt),
            negative_prompt: self.negative_prompt.unwrap_or(defaults.negative_prompt),
            num_inference_steps: parse_field(
                "num_inference_steps",
                self.num_inference_steps,
                defaults.num_inference_steps,
            )?,
            guidance_scale: parse_field(
                "guidance_scale",
                self.guidance_scale,
                defaults.guidance_scale,
            )?,
            strength: parse_field("strength", self.strength, defaults.strength)?,
            seed: match self.seed.as_deref().map(str::trim) {
                None | Some("") => Seed::Unseeded,
                Some(raw) => Seed::Seeded(parse_value("seed", raw)?),
            },
        };
        Ok((image, mask, params))
    }
}

/// Blank form values fall back to the default.
fn parse_field<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, ApiError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => parse_value(name, value),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse::<T>()
        .map_err(|_| validation_error(format!("Field '{name}' has an invalid value '{raw}'")))
}

async fn field_bytes(field: Field<'_>) -> Result<Vec<u8>, ApiError> {
    field
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(multipart_error)
}

async fn field_text(field: Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(multipart_error)
}

fn multipart_error(err: MultipartError) -> ApiError {
    error_response(
        err.status(),
        ErrorKind::Validation,
        "invalid_multipart",
        format!("Invalid multipart body: {}", err.body_text()),
    )
}
