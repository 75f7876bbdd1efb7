//! Shared value types for the easel workspace.
//!
//! Geometry ([`Extent`], [`Bounds`]), pixel containers ([`Image`],
//! [`Mask`], [`ImageCollection`]) and the common [`CoreError`].

pub mod error;
pub mod geometry;
pub mod raster;
pub mod types;

pub use crate::error::CoreError;
pub use crate::geometry::{Bounds, Extent};
pub use crate::raster::{Image, ImageCollection, Mask};
