//! Pixel containers passed between the document host, the workflow
//! builder and the transport.
//!
//! [`Image`] is reference-counted so that job results can be cloned into
//! history snapshots without copying pixel data.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{GrayImage, ImageFormat, RgbaImage};

use crate::error::CoreError;
use crate::geometry::{Bounds, Extent};

/// An RGBA raster, cheap to clone.
#[derive(Clone)]
pub struct Image {
    pixels: Arc<RgbaImage>,
}

impl Image {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// A fully transparent image of the given size.
    pub fn blank(extent: Extent) -> Self {
        Self::from_rgba(RgbaImage::new(extent.width, extent.height))
    }

    /// Decode PNG or JPEG bytes.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, CoreError> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::from_rgba(decoded.to_rgba8()))
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.pixels.width(), self.pixels.height())
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Copy out the part of the image covered by `bounds`.
    ///
    /// Bounds are clipped to the image; an empty intersection is a
    /// validation error.
    pub fn crop(&self, bounds: Bounds) -> Result<Image, CoreError> {
        let area = Bounds::from_extent(self.extent())
            .intersection(&bounds)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Crop bounds {bounds:?} do not overlap image of size {:?}",
                    self.extent()
                ))
            })?;
        let view = image::imageops::crop_imm(
            self.pixels.as_ref(),
            area.x as u32,
            area.y as u32,
            area.width,
            area.height,
        );
        Ok(Image::from_rgba(view.to_image()))
    }

    pub fn to_png(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Cursor::new(Vec::new());
        self.pixels.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }

    /// PNG-encode and base64 the image for embedding in a workflow.
    pub fn to_base64_png(&self) -> Result<String, CoreError> {
        Ok(BASE64.encode(self.to_png()?))
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels) || *self.pixels == *other.pixels
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extent = self.extent();
        write!(f, "Image({}x{})", extent.width, extent.height)
    }
}

/// A selection mask: one alpha byte per pixel of `bounds`.
#[derive(Clone, PartialEq)]
pub struct Mask {
    bounds: Bounds,
    alpha: Arc<GrayImage>,
}

impl Mask {
    /// Build a mask from raw row-major alpha values.
    pub fn new(bounds: Bounds, alpha: Vec<u8>) -> Result<Self, CoreError> {
        let expected = bounds.extent().pixel_count();
        if alpha.len() as u64 != expected {
            return Err(CoreError::Validation(format!(
                "Mask data has {} bytes, expected {expected} for {}x{}",
                alpha.len(),
                bounds.width,
                bounds.height
            )));
        }
        let alpha = GrayImage::from_raw(bounds.width, bounds.height, alpha).ok_or_else(|| {
            CoreError::Internal("mask buffer does not match its bounds".to_string())
        })?;
        Ok(Self {
            bounds,
            alpha: Arc::new(alpha),
        })
    }

    /// A fully opaque rectangular mask.
    pub fn rectangle(bounds: Bounds) -> Self {
        let alpha = GrayImage::from_pixel(bounds.width, bounds.height, image::Luma([255]));
        Self {
            bounds,
            alpha: Arc::new(alpha),
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn alpha(&self) -> &GrayImage {
        &self.alpha
    }

    /// The part of this mask that lies inside `area`.
    ///
    /// Fails with [`CoreError::Validation`] when the two do not overlap.
    pub fn clip(&self, area: Bounds) -> Result<Mask, CoreError> {
        let clipped = self.bounds.intersection(&area).ok_or_else(|| {
            CoreError::Validation(format!(
                "Mask bounds {:?} lie outside {area:?}",
                self.bounds
            ))
        })?;
        if clipped == self.bounds {
            return Ok(self.clone());
        }
        let alpha = image::imageops::crop_imm(
            self.alpha.as_ref(),
            (clipped.x - self.bounds.x) as u32,
            (clipped.y - self.bounds.y) as u32,
            clipped.width,
            clipped.height,
        )
        .to_image();
        Ok(Self {
            bounds: clipped,
            alpha: Arc::new(alpha),
        })
    }

    pub fn to_base64_png(&self) -> Result<String, CoreError> {
        let mut buf = Cursor::new(Vec::new());
        self.alpha.write_to(&mut buf, ImageFormat::Png)?;
        Ok(BASE64.encode(buf.into_inner()))
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask").field("bounds", &self.bounds).finish()
    }
}

/// Ordered set of images produced by one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageCollection {
    images: Vec<Image>,
}

impl ImageCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, image: Image) {
        self.images.push(image);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Image> {
        self.images.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Image> {
        self.images.iter()
    }
}

impl From<Vec<Image>> for ImageCollection {
    fn from(images: Vec<Image>) -> Self {
        Self { images }
    }
}

impl FromIterator<Image> for ImageCollection {
    fn from_iter<I: IntoIterator<Item = Image>>(iter: I) -> Self {
        Self {
            images: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ImageCollection {
    type Item = Image;
    type IntoIter = std::vec::IntoIter<Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}

impl<'a> IntoIterator for &'a ImageCollection {
    type Item = &'a Image;
    type IntoIter = std::slice::Iter<'a, Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}
