use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use thiserror::Error;

pub const DEFAULT_ALIGNMENT: u32 = 8;
pub const DEFAULT_TARGET_SIZE: u32 = 512;

const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometrySettings {
    pub alignment: u32,
    pub target_size: u32,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            target_size: DEFAULT_TARGET_SIZE,
        }
    }
}

/// Original and working sizes of one request, used to undo [`adapt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryTransform {
    pub original_width: u32,
    pub original_height: u32,
    pub working_width: u32,
    pub working_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("alignment and target size must be positive (alignment={alignment}, target={target_size})")]
    InvalidSettings { alignment: u32, target_size: u32 },
    #[error("source image has no pixels ({width}x{height})")]
    EmptySource { width: u32, height: u32 },
    #[error(
        "image {width}x{height} adapts to degenerate size {working_width}x{working_height} \
         (alignment={alignment}, target={target_size})"
    )]
    Degenerate {
        width: u32,
        height: u32,
        working_width: u32,
        working_height: u32,
        alignment: u32,
        target_size: u32,
    },
}

/// Fits `width`x`height` into a `target_size` square and rounds each side down
/// to a multiple of `alignment`.
pub fn working_dimensions(
    width: u32,
    height: u32,
    settings: GeometrySettings,
) -> Result<(u32, u32), GeometryError> {
    let GeometrySettings {
        alignment,
        target_size,
    } = settings;
    if alignment == 0 || target_size == 0 {
        return Err(GeometryError::InvalidSettings {
            alignment,
            target_size,
        });
    }
    if width == 0 || height == 0 {
        return Err(GeometryError::EmptySource { width, height });
    }

    // min(t/w, t/h) == t/max(w, h), so `side * ratio` is exact in integers.
    let longest = u64::from(width.max(height));
    let scale = |side: u32| -> u32 {
        let scaled = u64::from(side) * u64::from(target_size) / longest;
        let aligned = scaled / u64::from(alignment) * u64::from(alignment);
        u32::try_from(aligned).unwrap_or(u32::MAX)
    };
    let working_width = scale(width);
    let working_height = scale(height);

    if working_width == 0 || working_height == 0 {
        return Err(GeometryError::Degenerate {
            width,
            height,
            working_width,
            working_height,
            alignment,
            target_size,
        });
    }
    Ok((working_width, working_height))
}

pub fn adapt(
    image: &RgbImage,
    settings: GeometrySettings,
) -> Result<(RgbImage, GeometryTransform), GeometryError> {
    let (width, height) = image.dimensions();
    let (working_width, working_height) = working_dimensions(width, height, settings)?;
    let transform = GeometryTransform {
        original_width: width,
        original_height: height,
        working_width,
        working_height,
    };
    Ok((resize_rgb(image, working_width, working_height), transform))
}

/// Resizes a mask to the working size already chosen for its image.
pub fn adapt_mask(mask: &GrayImage, transform: &GeometryTransform) -> GrayImage {
    if mask.dimensions() == (transform.working_width, transform.working_height) {
        return mask.clone();
    }
    imageops::resize(
        mask,
        transform.working_width,
        transform.working_height,
        RESAMPLE_FILTER,
    )
}

pub fn restore(image: &RgbImage, transform: &GeometryTransform) -> RgbImage {
    resize_rgb(image, transform.original_width, transform.original_height)
}

fn resize_rgb(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, RESAMPLE_FILTER)
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb};

    use super::*;

    fn dims(width: u32, height: u32) -> Result<(u32, u32), GeometryError> {
        working_dimensions(width, height, GeometrySettings::default())
    }

    #[test]
    fn square_input_scales_to_target() {
        assert_eq!(dims(500, 500), Ok((512, 512)));
        assert_eq!(dims(1024, 1024), Ok((512, 512)));
    }

    #[test]
    fn landscape_input_keeps_long_side_at_target() {
        assert_eq!(dims(1920, 1080), Ok((512, 288)));
        assert_eq!(dims(800, 600), Ok((512, 384)));
    }

    #[test]
    fn short_side_rounds_down_not_to_nearest() {
        // 700 * 512 / 1000 = 358.4 -> 352, although 360 is the nearer multiple.
        assert_eq!(dims(1000, 700), Ok((512, 352)));
        // 95 * 512 / 100 = 486.4 -> 480
        assert_eq!(dims(100, 95), Ok((512, 480)));
    }

    #[test]
    fn dimensions_stay_within_target_and_aligned() {
        let settings = GeometrySettings {
            alignment: 8,
            target_size: 512,
        };
        for width in [1u32, 7, 8, 9, 63, 300, 511, 512, 513, 999, 4096] {
            for height in [1u32, 5, 64, 333, 512, 777, 2048] {
                match working_dimensions(width, height, settings) {
                    Ok((w, h)) => {
                        assert!(w <= 512 && h <= 512, "{width}x{height} -> {w}x{h}");
                        assert_eq!(w % 8, 0);
                        assert_eq!(h % 8, 0);
                        assert!(w > 0 && h > 0);
                    }
                    Err(err) => {
                        assert!(matches!(err, GeometryError::Degenerate { .. }), "{err}");
                    }
                }
            }
        }
    }

    #[test]
    fn thin_image_is_a_geometry_error() {
        let err = dims(4000, 3).expect_err("thin strip should be rejected");
        assert!(matches!(
            err,
            GeometryError::Degenerate {
                working_height: 0,
                ..
            }
        ));
    }

    #[test]
    fn invalid_settings_and_empty_sources_are_rejected() {
        let zero_alignment = GeometrySettings {
            alignment: 0,
            target_size: 512,
        };
        assert!(matches!(
            working_dimensions(10, 10, zero_alignment),
            Err(GeometryError::InvalidSettings { .. })
        ));
        assert!(matches!(
            dims(0, 10),
            Err(GeometryError::EmptySource { .. })
        ));
    }

    #[test]
    fn mask_follows_image_working_size() {
        let image = RgbImage::from_pixel(300, 200, Rgb([10, 20, 30]));
        let mask = GrayImage::from_pixel(150, 100, Luma([255]));
        let (adapted, transform) = adapt(&image, GeometrySettings::default()).expect("adapt");
        let adapted_mask = adapt_mask(&mask, &transform);
        assert_eq!(adapted.dimensions(), (512, 336));
        assert_eq!(adapted_mask.dimensions(), adapted.dimensions());
    }

    #[test]
    fn restore_returns_original_size() {
        let image = RgbImage::from_pixel(333, 217, Rgb([90, 90, 90]));
        let (adapted, transform) = adapt(&image, GeometrySettings::default()).expect("adapt");
        let restored = restore(&adapted, &transform);
        assert_eq!(restored.dimensions(), (333, 217));
    }

    #[test]
    fn restore_accepts_output_at_unexpected_size() {
        let transform = GeometryTransform {
            original_width: 40,
            original_height: 30,
            working_width: 512,
            working_height: 384,
        };
        let generated = RgbImage::from_pixel(256, 256, Rgb([1, 2, 3]));
        assert_eq!(restore(&generated, &transform).dimensions(), (40, 30));
    }
}
