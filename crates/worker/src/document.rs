//! Headless document for the worker binary.
//!
//! [`CanvasDocument`] keeps the canvas and its layers in memory and writes
//! layers to PNG files on request. [`WorkerHost`] exposes it as the only,
//! always active, document.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use easel_core::{Bounds, CoreError, Extent, Image, Mask};
use easel_generation::{Document, Host, Layer, LayerId};
use image::imageops::{self, FilterType};

use crate::error::WorkerError;

/// A layer held by a [`CanvasDocument`].
pub struct CanvasLayer {
    id: LayerId,
    name: Mutex<String>,
    image: Image,
    bounds: Bounds,
    visible: AtomicBool,
    locked: AtomicBool,
    removed: AtomicBool,
    exported: AtomicBool,
}

impl CanvasLayer {
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    fn is_shown(&self) -> bool {
        self.is_visible() && !self.is_removed()
    }
}

impl Layer for CanvasLayer {
    fn id(&self) -> LayerId {
        self.id
    }

    fn name(&self) -> String {
        self.name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name.to_string();
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    fn remove(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }
}

/// In-memory canvas with a stack of layers.
pub struct CanvasDocument {
    background: Image,
    selection: Option<Bounds>,
    output_dir: PathBuf,
    layers: Mutex<Vec<Arc<CanvasLayer>>>,
    next_id: AtomicU64,
}

impl CanvasDocument {
    pub fn new(background: Image, selection: Option<Bounds>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            background,
            selection,
            output_dir: output_dir.into(),
            layers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Layers that were not removed, bottom to top.
    pub fn layers(&self) -> Vec<Arc<CanvasLayer>> {
        self.lock_layers()
            .iter()
            .filter(|layer| !layer.is_removed())
            .cloned()
            .collect()
    }

    /// Write every unlocked layer not written before as a PNG file.
    ///
    /// Locked layers are previews; they are skipped until applied.
    pub fn export_layers(&self) -> Result<Vec<PathBuf>, WorkerError> {
        let mut written = Vec::new();
        for layer in self.layers() {
            if layer.is_locked() || layer.exported.load(Ordering::SeqCst) {
                continue;
            }
            let path = self
                .output_dir
                .join(format!("{:03}-{}.png", layer.id, slug(&layer.name())));
            let png = layer.image.to_png()?;
            std::fs::create_dir_all(&self.output_dir)?;
            std::fs::write(&path, png)?;
            layer.exported.store(true, Ordering::SeqCst);
            tracing::info!(path = %path.display(), "Layer written");
            written.push(path);
        }
        Ok(written)
    }

    fn lock_layers(&self) -> MutexGuard<'_, Vec<Arc<CanvasLayer>>> {
        self.layers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Document for CanvasDocument {
    fn extent(&self) -> Extent {
        self.background.extent()
    }

    /// The configured selection, clipped to the canvas.
    fn create_mask_from_selection(&self) -> Option<Mask> {
        let canvas = Bounds::from_extent(self.extent());
        self.selection
            .and_then(|selection| selection.intersection(&canvas))
            .map(Mask::rectangle)
    }

    fn get_image(&self, exclude_layer: Option<&dyn Layer>) -> Image {
        let excluded = exclude_layer.map(|layer| layer.id());
        let mut canvas = self.background.pixels().clone();
        for layer in self.layers() {
            if !layer.is_shown() || Some(layer.id) == excluded {
                continue;
            }
            let extent = layer.image.extent();
            let Bounds {
                x,
                y,
                width,
                height,
            } = layer.bounds;
            if extent.width == width && extent.height == height {
                imageops::overlay(&mut canvas, layer.image.pixels(), x.into(), y.into());
            } else {
                let scaled = imageops::resize(layer.image.pixels(), width, height, FilterType::Triangle);
                imageops::overlay(&mut canvas, &scaled, x.into(), y.into());
            }
        }
        Image::from_rgba(canvas)
    }

    fn insert_layer(
        &self,
        name: &str,
        image: &Image,
        bounds: Bounds,
    ) -> Result<Arc<dyn Layer>, CoreError> {
        if bounds.is_empty() {
            return Err(CoreError::Validation(format!(
                "Layer \"{name}\" has empty bounds"
            )));
        }
        let layer = Arc::new(CanvasLayer {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: Mutex::new(name.to_string()),
            image: image.clone(),
            bounds,
            visible: AtomicBool::new(true),
            locked: AtomicBool::new(true),
            removed: AtomicBool::new(false),
            exported: AtomicBool::new(false),
        });
        self.lock_layers().push(Arc::clone(&layer));
        tracing::debug!(layer_id = layer.id, name, "Layer inserted");
        Ok(layer)
    }

    fn is_active(&self) -> bool {
        true
    }

    fn is_valid(&self) -> bool {
        true
    }
}

/// Host with exactly one document.
pub struct WorkerHost {
    document: Arc<CanvasDocument>,
}

impl WorkerHost {
    pub fn new(document: Arc<CanvasDocument>) -> Self {
        Self { document }
    }
}

impl Host for WorkerHost {
    fn active_document(&self) -> Option<Arc<dyn Document>> {
        let document: Arc<dyn Document> = self.document.clone();
        Some(document)
    }
}

/// File-name friendly version of a layer name.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "layer".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn solid(extent: Extent, color: [u8; 4]) -> Image {
        Image::from_rgba(image::RgbaImage::from_pixel(
            extent.width,
            extent.height,
            Rgba(color),
        ))
    }

    fn document() -> CanvasDocument {
        CanvasDocument::new(Image::blank(Extent::new(16, 16)), None, "unused")
    }

    #[test]
    fn slug_keeps_words() {
        assert_eq!(slug("[Generated] a misty forest"), "generated-a-misty-forest");
        assert_eq!(slug("[]"), "layer");
    }

    #[test]
    fn selection_becomes_rectangular_mask() {
        let doc = CanvasDocument::new(
            Image::blank(Extent::new(16, 16)),
            Some(Bounds::new(2, 2, 4, 4)),
            "unused",
        );
        let mask = doc.create_mask_from_selection().unwrap();
        assert_eq!(mask.bounds(), Bounds::new(2, 2, 4, 4));
        assert!(document().create_mask_from_selection().is_none());
    }

    #[test]
    fn selection_is_clipped_to_canvas() {
        let doc = CanvasDocument::new(
            Image::blank(Extent::new(16, 16)),
            Some(Bounds::new(10, 12, 32, 32)),
            "unused",
        );
        let mask = doc.create_mask_from_selection().unwrap();
        assert_eq!(mask.bounds(), Bounds::new(10, 12, 6, 4));

        let outside = CanvasDocument::new(
            Image::blank(Extent::new(16, 16)),
            Some(Bounds::new(40, 40, 4, 4)),
            "unused",
        );
        assert!(outside.create_mask_from_selection().is_none());
    }

    #[test]
    fn visible_layers_are_composited() {
        let doc = document();
        let red = [255, 0, 0, 255];
        doc.insert_layer("red", &solid(Extent::new(4, 4), red), Bounds::new(4, 4, 4, 4))
            .unwrap();

        let image = doc.get_image(None);
        assert_eq!(image.pixels().get_pixel(5, 5).0, red);
        assert_eq!(image.pixels().get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn excluded_and_hidden_layers_are_skipped() {
        let doc = document();
        let shown = doc
            .insert_layer("a", &solid(Extent::new(2, 2), [9, 9, 9, 255]), Bounds::new(0, 0, 2, 2))
            .unwrap();
        let hidden = doc
            .insert_layer("b", &solid(Extent::new(2, 2), [7, 7, 7, 255]), Bounds::new(8, 8, 2, 2))
            .unwrap();
        hidden.set_visible(false);

        let image = doc.get_image(Some(shown.as_ref()));
        assert_eq!(image.pixels().get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(image.pixels().get_pixel(8, 8).0, [0, 0, 0, 0]);
    }

    #[test]
    fn results_are_scaled_to_their_bounds() {
        let doc = document();
        doc.insert_layer("big", &solid(Extent::new(8, 8), [1, 2, 3, 255]), Bounds::new(0, 0, 4, 4))
            .unwrap();

        let image = doc.get_image(None);
        assert_eq!(image.pixels().get_pixel(3, 3).0, [1, 2, 3, 255]);
        assert_eq!(image.pixels().get_pixel(4, 4).0, [0, 0, 0, 0]);
    }

    #[test]
    fn removed_layers_are_dropped_from_listing() {
        let doc = document();
        let layer = doc
            .insert_layer("x", &Image::blank(Extent::new(1, 1)), Bounds::new(0, 0, 1, 1))
            .unwrap();
        layer.remove();
        assert!(doc.layers().is_empty());
    }

    #[test]
    fn empty_bounds_are_rejected() {
        let doc = document();
        assert!(doc
            .insert_layer("x", &Image::blank(Extent::new(1, 1)), Bounds::new(0, 0, 0, 0))
            .is_err());
    }
}
