use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use easel_comfyui::reconnect::ReconnectConfig;
use easel_comfyui::{ClientConfig, WorkflowSettings};
use easel_core::{Bounds, Extent};
use easel_generation::RouterConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local ComfyUI install.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub client: ClientConfig,
    pub workflow: WorkflowSettings,
    pub router: RouterConfig,
    pub reconnect: ReconnectConfig,
    /// Initial strength of the coordinator.
    pub strength: f64,
    /// Canvas size when no source image is given.
    pub canvas: Extent,
    /// PNG/JPEG to start from instead of a blank canvas.
    pub source_image: Option<PathBuf>,
    /// Rectangular selection restricting refinement; clipped to the canvas.
    pub selection: Option<Bounds>,
    /// Where generated layers are written.
    pub output_dir: PathBuf,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `COMFYUI_URL`          | `http://127.0.0.1:8188`    |
    /// | `EASEL_STRENGTH`       | `1.0`                      |
    /// | `EASEL_WIDTH`          | `512`                      |
    /// | `EASEL_HEIGHT`         | `512`                      |
    /// | `EASEL_SOURCE_IMAGE`   | none                       |
    /// | `EASEL_SELECTION`      | none (`x,y,width,height`)  |
    /// | `EASEL_OUTPUT_DIR`     | `output`                   |
    /// | `EASEL_BACKOFF_SECS`   | `5`                        |
    ///
    /// Workflow settings are read from the `EASEL_*` variables listed on
    /// [`WorkflowSettings`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let api_url = env
            .string("COMFYUI_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8188".into());

        let defaults = WorkflowSettings::default();
        let workflow = WorkflowSettings {
            checkpoint: env.string("EASEL_CHECKPOINT").unwrap_or(defaults.checkpoint),
            style_prompt: env
                .string("EASEL_STYLE_PROMPT")
                .unwrap_or(defaults.style_prompt),
            negative_prompt: env
                .string("EASEL_NEGATIVE_PROMPT")
                .unwrap_or(defaults.negative_prompt),
            steps: env.parse("EASEL_STEPS", "a positive integer")?.unwrap_or(defaults.steps),
            cfg_scale: env
                .parse("EASEL_CFG_SCALE", "a number")?
                .unwrap_or(defaults.cfg_scale),
            sampler: env.string("EASEL_SAMPLER").unwrap_or(defaults.sampler),
            scheduler: env.string("EASEL_SCHEDULER").unwrap_or(defaults.scheduler),
            batch_size: env
                .parse("EASEL_BATCH_SIZE", "a positive integer")?
                .unwrap_or(defaults.batch_size),
            seed: env.parse("EASEL_SEED", "an unsigned integer")?,
        };
        if workflow.batch_size == 0 {
            return Err(invalid("EASEL_BATCH_SIZE", "a positive integer", "0"));
        }

        let strength: f64 = env
            .parse("EASEL_STRENGTH", "a number between 0 and 1")?
            .unwrap_or(1.0);
        if !(0.0..=1.0).contains(&strength) {
            return Err(invalid(
                "EASEL_STRENGTH",
                "a number between 0 and 1",
                &strength.to_string(),
            ));
        }

        let width = env.parse("EASEL_WIDTH", "a pixel count")?.unwrap_or(512);
        let height = env.parse("EASEL_HEIGHT", "a pixel count")?.unwrap_or(512);

        let selection = match env.string("EASEL_SELECTION") {
            Some(raw) => Some(parse_bounds(&raw).ok_or_else(|| {
                invalid("EASEL_SELECTION", "x,y,width,height", &raw)
            })?),
            None => None,
        };

        let backoff_secs: u64 = env
            .parse("EASEL_BACKOFF_SECS", "a number of seconds")?
            .unwrap_or(5);

        Ok(Self {
            client: ClientConfig::from_api_url(&api_url),
            workflow,
            router: RouterConfig {
                backoff: Duration::from_secs(backoff_secs),
                ..Default::default()
            },
            reconnect: ReconnectConfig::default(),
            strength,
            canvas: Extent::new(width, height),
            source_image: env.string("EASEL_SOURCE_IMAGE").map(PathBuf::from),
            selection,
            output_dir: env
                .string("EASEL_OUTPUT_DIR")
                .map_or_else(|| PathBuf::from("output"), PathBuf::from),
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Non-empty, trimmed value of `var`.
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(
        &self,
        var: &'static str,
        expected: &'static str,
    ) -> Result<Option<T>, ConfigError> {
        match self.string(var) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| invalid(var, expected, &raw)),
            None => Ok(None),
        }
    }
}

fn invalid(var: &'static str, expected: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        expected,
        value: value.to_string(),
    }
}

fn parse_bounds(raw: &str) -> Option<Bounds> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let [x, y, width, height] = parts.as_slice() else {
        return None;
    };
    let bounds = Bounds::new(
        x.parse().ok()?,
        y.parse().ok()?,
        width.parse().ok()?,
        height.parse().ok()?,
    );
    (!bounds.is_empty()).then_some(bounds)
}
