use serde::Serialize;

pub const DEFAULT_MODEL_ID: &str = "runwayml/stable-diffusion-inpainting";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

const KNOWN_MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: DEFAULT_MODEL_ID,
        name: "Stable Diffusion Inpainting v1.5",
        description: "Standard inpainting model, good quality/speed balance",
    },
    ModelDescriptor {
        id: "stabilityai/stable-diffusion-2-inpainting",
        name: "Stable Diffusion Inpainting v2",
        description: "Improved quality, requires more VRAM",
    },
    ModelDescriptor {
        id: "diffusers/stable-diffusion-xl-1.0-inpainting-0.1",
        name: "Stable Diffusion XL Inpainting",
        description: "Highest quality, requires significant VRAM (8GB+)",
    },
];

pub fn known_models() -> &'static [ModelDescriptor] {
    KNOWN_MODELS
}

pub fn find_model(id: &str) -> Option<&'static ModelDescriptor> {
    KNOWN_MODELS.iter().find(|model| model.id == id)
}
