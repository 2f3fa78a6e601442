use std::borrow::Cow;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client-supplied image bytes, either inline text or a raw upload.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// Base64 text, optionally prefixed with a scheme marker such as
    /// `data:image/png;base64,`.
    Inline(&'a str),
    Binary(&'a [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Color,
    Grayscale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    InvalidBase64(#[source] base64::DecodeError),
    #[error("payload is empty")]
    Empty,
    #[error("payload is not a decodable image: {0}")]
    InvalidImage(#[source] image::ImageError),
    #[error("image encoding as {format} failed: {source}")]
    Encode {
        format: &'static str,
        #[source]
        source: image::ImageError,
    },
}

pub fn decode(payload: Payload<'_>, mode: ChannelMode) -> Result<DynamicImage, CodecError> {
    Ok(match mode {
        ChannelMode::Color => DynamicImage::ImageRgb8(decode_color(payload)?),
        ChannelMode::Grayscale => DynamicImage::ImageLuma8(decode_grayscale(payload)?),
    })
}

pub fn decode_color(payload: Payload<'_>) -> Result<RgbImage, CodecError> {
    decode_any(payload).map(DynamicImage::into_rgb8)
}

pub fn decode_grayscale(payload: Payload<'_>) -> Result<GrayImage, CodecError> {
    decode_any(payload).map(DynamicImage::into_luma8)
}

/// Decodes in the payload's own pixel layout; callers convert once.
fn decode_any(payload: Payload<'_>) -> Result<DynamicImage, CodecError> {
    let bytes = match payload {
        Payload::Inline(text) => Cow::Owned(decode_inline_bytes(text)?),
        Payload::Binary(bytes) => Cow::Borrowed(bytes),
    };
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    image::load_from_memory(&bytes).map_err(CodecError::InvalidImage)
}

pub fn encode(image: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, CodecError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, format.image_format())
        .map_err(|source| CodecError::Encode {
            format: format.as_str(),
            source,
        })?;
    Ok(buf.into_inner())
}

pub fn encode_inline(image: &DynamicImage, format: OutputFormat) -> Result<String, CodecError> {
    let bytes = encode(image, format)?;
    Ok(inline_from_bytes(bytes.as_slice(), format))
}

pub fn inline_from_bytes(bytes: &[u8], format: OutputFormat) -> String {
    format!(
        "data:{};base64,{}",
        format.mime(),
        BASE64_STANDARD.encode(bytes)
    )
}

fn decode_inline_bytes(text: &str) -> Result<Vec<u8>, CodecError> {
    // Everything up to the first comma is the scheme marker.
    let body = match text.split_once(',') {
        Some((_, rest)) => rest,
        None => text,
    };
    let compact = body
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect::<String>();
    BASE64_STANDARD
        .decode(compact.as_bytes())
        .map_err(CodecError::InvalidBase64)
}
