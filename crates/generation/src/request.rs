//! Choosing what kind of workflow a generate call submits.

use easel_comfyui::{workflow, ComfyWorkflow, WorkflowSettings};
use easel_core::{Bounds, Extent, Image, Mask};

use crate::error::GenerationError;

/// The three request shapes the workflow layer can build.
#[derive(Debug, Clone)]
pub enum GenerationRequest {
    /// Text-to-image over `extent`.
    Generate { extent: Extent, prompt: String },
    /// Image-to-image over the whole canvas.
    Refine {
        image: Image,
        prompt: String,
        strength: f64,
    },
    /// Image-to-image inside the selection mask.
    RefineRegion {
        image: Image,
        mask: Mask,
        prompt: String,
        strength: f64,
    },
}

impl GenerationRequest {
    /// Pick the request shape from the selection and strength.
    ///
    /// | mask | strength | shape                  |
    /// |------|----------|------------------------|
    /// | no   | `1`      | [`Generate`]           |
    /// | no   | `< 1`    | [`Refine`]             |
    /// | yes  | `< 1`    | [`RefineRegion`]       |
    /// | yes  | `1`      | `Unsupported` (error)  |
    ///
    /// `image` must be present whenever a mask is present or
    /// `strength < 1`.
    ///
    /// [`Generate`]: Self::Generate
    /// [`Refine`]: Self::Refine
    /// [`RefineRegion`]: Self::RefineRegion
    pub fn select(
        prompt: &str,
        strength: f64,
        bounds: Bounds,
        image: Option<Image>,
        mask: Option<Mask>,
    ) -> Result<Self, GenerationError> {
        let prompt = prompt.to_string();
        let partial = strength < 1.0;

        match (mask, partial) {
            (None, false) => Ok(Self::Generate {
                extent: bounds.extent(),
                prompt,
            }),
            (None, true) => Ok(Self::Refine {
                image: require_image(image)?,
                prompt,
                strength,
            }),
            (Some(_), false) => Err(GenerationError::Unsupported(
                "inpainting a selection at full strength",
            )),
            (Some(mask), true) => Ok(Self::RefineRegion {
                image: require_image(image)?,
                mask,
                prompt,
                strength,
            }),
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            Self::Generate { prompt, .. }
            | Self::Refine { prompt, .. }
            | Self::RefineRegion { prompt, .. } => prompt,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generate { .. } => "generate",
            Self::Refine { .. } => "refine",
            Self::RefineRegion { .. } => "refine_region",
        }
    }

    pub fn build(&self, settings: &WorkflowSettings) -> Result<ComfyWorkflow, GenerationError> {
        let workflow = match self {
            Self::Generate { extent, prompt } => workflow::generate(settings, *extent, prompt),
            Self::Refine {
                image,
                prompt,
                strength,
            } => workflow::refine(settings, image, prompt, *strength)?,
            Self::RefineRegion {
                image,
                mask,
                prompt,
                strength,
            } => workflow::refine_region(settings, image, mask, prompt, *strength)?,
        };
        Ok(workflow)
    }
}

fn require_image(image: Option<Image>) -> Result<Image, GenerationError> {
    image.ok_or_else(|| {
        GenerationError::Invariant("image-to-image request without a source image".to_string())
    })
}
