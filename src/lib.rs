#![forbid(unsafe_code)]
//! Layered document model over OpenEXR channel lists.
//!
//! Flat channel names are grouped into layers ([`layer::builder`]), loaded on demand through
//! a merged multi-part view ([`ReadDocument`]) and flattened back out, streaming when memory
//! is short ([`WriteDocument`]). File access goes through the [`ExrInput`] / [`ExrOutput`]
//! seam; [`MemoryImage`] implements both, and the `openexr` feature adds a file adapter.

pub mod channel;
pub mod doc;
pub mod foundation;
pub mod io;
pub mod layer;
pub mod rows;

pub use channel::{ChanTag, Channel, ChannelType, PixelSource};
pub use doc::{
    Document, DocumentStats, LayerPixels, ReadDocument, ReadOptions, WriteDocument, WriteOptions,
};
pub use foundation::core::{AbortHandle, Box2i, PixelType};
pub use foundation::error::{ExrLayersError, ExrLayersResult};
pub use io::{ExrInput, ExrOutput, Header, HybridInputFile, MemoryImage};
pub use layer::{BlendMode, ChannelId, Layer, LayerKind, LayerProps};
pub use rows::engine::RowEngine;
