use image::{GrayImage, Luma};

/// Pixels strictly above this intensity are regenerated.
pub const DEFAULT_MASK_THRESHOLD: u8 = 128;
pub const MASK_ON: u8 = u8::MAX;
pub const MASK_OFF: u8 = 0;

pub fn binarize(mask: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = mask.clone();
    for Luma([value]) in out.pixels_mut() {
        *value = if *value > threshold { MASK_ON } else { MASK_OFF };
    }
    out
}

pub fn is_binary(mask: &GrayImage) -> bool {
    mask.pixels()
        .all(|Luma([value])| *value == MASK_ON || *value == MASK_OFF)
}

/// Fraction of pixels marked for regeneration.
pub fn coverage(mask: &GrayImage) -> f64 {
    let total = u64::from(mask.width()) * u64::from(mask.height());
    if total == 0 {
        return 0.0;
    }
    let on = mask
        .pixels()
        .filter(|Luma([value])| *value > DEFAULT_MASK_THRESHOLD)
        .count() as f64;
    on / total as f64
}
