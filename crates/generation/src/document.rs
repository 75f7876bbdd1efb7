//! Seams to the host application's documents.
//!
//! The host owns pixels, selections and layers; the generation core only
//! reads canvas state and inserts result layers through these traits.

use std::sync::Arc;

use easel_core::{Bounds, CoreError, Extent, Image, Mask};

pub type LayerId = u64;

/// A layer inserted into a document.
pub trait Layer: Send + Sync {
    fn id(&self) -> LayerId;
    fn name(&self) -> String;
    fn set_name(&self, name: &str);
    fn is_visible(&self) -> bool;
    fn set_visible(&self, visible: bool);
    fn set_locked(&self, locked: bool);
    /// Remove the layer from its document.
    fn remove(&self);
}

/// One open document (the work context a coordinator belongs to).
pub trait Document: Send + Sync {
    /// Canvas size.
    fn extent(&self) -> Extent;

    /// Mask of the current selection, `None` when nothing is selected.
    fn create_mask_from_selection(&self) -> Option<Mask>;

    /// Flattened canvas, optionally leaving one layer out.
    fn get_image(&self, exclude_layer: Option<&dyn Layer>) -> Image;

    fn insert_layer(
        &self,
        name: &str,
        image: &Image,
        bounds: Bounds,
    ) -> Result<Arc<dyn Layer>, CoreError>;

    /// Whether this is the document the user is working on.
    fn is_active(&self) -> bool;

    /// False once the document has been closed.
    fn is_valid(&self) -> bool;
}

/// The application hosting documents.
pub trait Host: Send + Sync {
    fn active_document(&self) -> Option<Arc<dyn Document>>;
}
