//! ComfyUI workflow graphs in API format.
//!
//! A workflow is a JSON object mapping node ids to
//! `{"class_type": ..., "inputs": {...}}`; links between nodes are
//! `[node_id, output_index]` pairs. The three builders at the bottom
//! produce the request shapes the generation core submits:
//! [`generate`], [`refine`] and [`refine_region`].
//!
//! Input images are embedded as base64 PNG and results are sent back over
//! the WebSocket, which relies on the `ETN_*` tooling nodes being
//! installed on the server.

use serde_json::{json, Map, Value};

use easel_core::{Bounds, CoreError, Extent, Image, Mask};

/// Sampler and model configuration shared by all request shapes.
///
/// | Env Var                | Default                              |
/// |------------------------|--------------------------------------|
/// | `EASEL_CHECKPOINT`     | `v1-5-pruned-emaonly.safetensors`    |
/// | `EASEL_STYLE_PROMPT`   | `best quality, highly detailed`      |
/// | `EASEL_NEGATIVE_PROMPT`| `bad quality, blurry, watermark`     |
/// | `EASEL_STEPS`          | `20`                                 |
/// | `EASEL_CFG_SCALE`      | `7.0`                                |
/// | `EASEL_SAMPLER`        | `dpmpp_2m`                           |
/// | `EASEL_SCHEDULER`      | `karras`                             |
/// | `EASEL_BATCH_SIZE`     | `2`                                  |
/// | `EASEL_SEED`           | random per job                       |
///
/// Loading from the environment lives in the worker's config module.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    pub checkpoint: String,
    /// Appended to every prompt; a `{prompt}` placeholder is substituted instead.
    pub style_prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub sampler: String,
    pub scheduler: String,
    /// Images generated per job.
    pub batch_size: u32,
    /// Fixed seed; `None` draws a fresh one per workflow.
    pub seed: Option<u64>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            checkpoint: "v1-5-pruned-emaonly.safetensors".to_string(),
            style_prompt: "best quality, highly detailed".to_string(),
            negative_prompt: "bad quality, blurry, watermark".to_string(),
            steps: 20,
            cfg_scale: 7.0,
            sampler: "dpmpp_2m".to_string(),
            scheduler: "karras".to_string(),
            batch_size: 2,
            seed: None,
        }
    }
}

impl WorkflowSettings {
    /// Combine the user prompt with the style prompt.
    pub fn merge_prompt(&self, prompt: &str) -> String {
        let style = self.style_prompt.trim();
        if style.contains("{prompt}") {
            return style.replace("{prompt}", prompt.trim());
        }
        [prompt.trim(), style]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| u64::from(rand::random::<u32>()))
    }
}

/// Reference to one output slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    node: usize,
    index: usize,
}

impl Output {
    fn link(self) -> Value {
        json!([self.node.to_string(), self.index])
    }
}

/// A workflow under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComfyWorkflow {
    nodes: Map<String, Value>,
}

impl ComfyWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its id.
    pub fn add(&mut self, class_type: &str, inputs: Value) -> usize {
        let id = self.nodes.len() + 1;
        self.nodes.insert(
            id.to_string(),
            json!({ "class_type": class_type, "inputs": inputs }),
        );
        id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Class types of all nodes, in id order.
    pub fn class_types(&self) -> Vec<&str> {
        let mut nodes: Vec<(usize, &str)> = self
            .nodes
            .iter()
            .filter_map(|(id, node)| Some((id.parse().ok()?, node["class_type"].as_str()?)))
            .collect();
        nodes.sort_unstable_by_key(|(id, _)| *id);
        nodes.into_iter().map(|(_, class)| class).collect()
    }

    /// First node of the given class, if any.
    pub fn find_node(&self, class_type: &str) -> Option<&Value> {
        self.nodes
            .values()
            .find(|node| node["class_type"] == class_type)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.nodes.clone())
    }

    // ---- typed node helpers ----

    fn load_checkpoint(&mut self, name: &str) -> (Output, Output, Output) {
        let node = self.add("CheckpointLoaderSimple", json!({ "ckpt_name": name }));
        (out(node, 0), out(node, 1), out(node, 2))
    }

    fn clip_text_encode(&mut self, clip: Output, text: &str) -> Output {
        let node = self.add(
            "CLIPTextEncode",
            json!({ "clip": clip.link(), "text": text }),
        );
        out(node, 0)
    }

    fn empty_latent_image(&mut self, extent: Extent, batch_size: u32) -> Output {
        let node = self.add(
            "EmptyLatentImage",
            json!({
                "width": extent.width,
                "height": extent.height,
                "batch_size": batch_size,
            }),
        );
        out(node, 0)
    }

    fn repeat_latent_batch(&mut self, latent: Output, amount: u32) -> Output {
        let node = self.add(
            "RepeatLatentBatch",
            json!({ "samples": latent.link(), "amount": amount }),
        );
        out(node, 0)
    }

    fn ksampler(
        &mut self,
        settings: &WorkflowSettings,
        model: Output,
        positive: Output,
        negative: Output,
        latent: Output,
        denoise: f64,
    ) -> Output {
        let node = self.add(
            "KSampler",
            json!({
                "seed": settings.seed(),
                "steps": settings.steps,
                "cfg": settings.cfg_scale,
                "sampler_name": settings.sampler,
                "scheduler": settings.scheduler,
                "denoise": denoise,
                "model": model.link(),
                "positive": positive.link(),
                "negative": negative.link(),
                "latent_image": latent.link(),
            }),
        );
        out(node, 0)
    }

    fn vae_encode(&mut self, vae: Output, image: Output) -> Output {
        let node = self.add(
            "VAEEncode",
            json!({ "vae": vae.link(), "pixels": image.link() }),
        );
        out(node, 0)
    }

    fn vae_decode(&mut self, vae: Output, latent: Output) -> Output {
        let node = self.add(
            "VAEDecode",
            json!({ "vae": vae.link(), "samples": latent.link() }),
        );
        out(node, 0)
    }

    fn set_latent_noise_mask(&mut self, latent: Output, mask: Output) -> Output {
        let node = self.add(
            "SetLatentNoiseMask",
            json!({ "samples": latent.link(), "mask": mask.link() }),
        );
        out(node, 0)
    }

    fn load_image(&mut self, image: &Image) -> Result<Output, CoreError> {
        let node = self.add(
            "ETN_LoadImageBase64",
            json!({ "image": image.to_base64_png()? }),
        );
        Ok(out(node, 0))
    }

    fn load_mask(&mut self, mask: &Mask) -> Result<Output, CoreError> {
        let node = self.add(
            "ETN_LoadMaskBase64",
            json!({ "mask": mask.to_base64_png()? }),
        );
        Ok(out(node, 0))
    }

    fn send_image(&mut self, image: Output) {
        self.add("ETN_SendImageWebSocket", json!({ "images": image.link() }));
    }
}

fn out(node: usize, index: usize) -> Output {
    Output { node, index }
}

/// Text-to-image over the whole `extent`.
pub fn generate(settings: &WorkflowSettings, extent: Extent, prompt: &str) -> ComfyWorkflow {
    let mut w = ComfyWorkflow::new();
    let (model, clip, vae) = w.load_checkpoint(&settings.checkpoint);
    let positive = w.clip_text_encode(clip, &settings.merge_prompt(prompt));
    let negative = w.clip_text_encode(clip, &settings.negative_prompt);
    let latent = w.empty_latent_image(extent.multiple_of(8), settings.batch_size);
    let sampled = w.ksampler(settings, model, positive, negative, latent, 1.0);
    let decoded = w.vae_decode(vae, sampled);
    w.send_image(decoded);
    w
}

/// Image-to-image: re-noise `image` by `strength` and sample it again.
pub fn refine(
    settings: &WorkflowSettings,
    image: &Image,
    prompt: &str,
    strength: f64,
) -> Result<ComfyWorkflow, CoreError> {
    let mut w = ComfyWorkflow::new();
    let (model, clip, vae) = w.load_checkpoint(&settings.checkpoint);
    let pixels = w.load_image(image)?;
    let encoded = w.vae_encode(vae, pixels);
    let latent = batched(&mut w, encoded, settings.batch_size);
    let positive = w.clip_text_encode(clip, &settings.merge_prompt(prompt));
    let negative = w.clip_text_encode(clip, &settings.negative_prompt);
    let sampled = w.ksampler(settings, model, positive, negative, latent, strength);
    let decoded = w.vae_decode(vae, sampled);
    w.send_image(decoded);
    Ok(w)
}

/// Image-to-image restricted to the masked region.
///
/// `image` is the full canvas; it is cropped to the mask bounds so the
/// results line up with the region the mask covers. The mask must lie
/// entirely inside the image.
pub fn refine_region(
    settings: &WorkflowSettings,
    image: &Image,
    mask: &Mask,
    prompt: &str,
    strength: f64,
) -> Result<ComfyWorkflow, CoreError> {
    let canvas = Bounds::from_extent(image.extent());
    if canvas.intersection(&mask.bounds()) != Some(mask.bounds()) {
        return Err(CoreError::Validation(format!(
            "Mask bounds {:?} exceed the {}x{} image",
            mask.bounds(),
            canvas.width,
            canvas.height
        )));
    }
    let region = if image.extent() == mask.bounds().extent() {
        image.clone()
    } else {
        image.crop(mask.bounds())?
    };

    let mut w = ComfyWorkflow::new();
    let (model, clip, vae) = w.load_checkpoint(&settings.checkpoint);
    let pixels = w.load_image(&region)?;
    let mask_out = w.load_mask(mask)?;
    let encoded = w.vae_encode(vae, pixels);
    let masked = w.set_latent_noise_mask(encoded, mask_out);
    let latent = batched(&mut w, masked, settings.batch_size);
    let positive = w.clip_text_encode(clip, &settings.merge_prompt(prompt));
    let negative = w.clip_text_encode(clip, &settings.negative_prompt);
    let sampled = w.ksampler(settings, model, positive, negative, latent, strength);
    let decoded = w.vae_decode(vae, sampled);
    w.send_image(decoded);
    Ok(w)
}

fn batched(w: &mut ComfyWorkflow, latent: Output, batch_size: u32) -> Output {
    if batch_size > 1 {
        w.repeat_latent_batch(latent, batch_size)
    } else {
        latent
    }
}
