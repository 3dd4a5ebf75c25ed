//! Boundary with the low-level EXR reader/writer.
//!
//! Everything above this module talks to files through [`ExrInput`] and [`ExrOutput`]:
//! per-part headers, a channel-to-slice [`FrameBuffer`] and blocking scanline transfers.
//! [`MemoryImage`] implements both traits in memory; the `openexr` feature adds a
//! file-backed adapter.

use std::collections::BTreeMap;

use crate::foundation::core::{Box2i, PixelType};
use crate::foundation::error::ExrLayersResult;

pub mod frame;
pub mod hybrid;
pub mod memory;
#[cfg(feature = "openexr")]
pub mod openexr;
pub mod rgba;

pub use frame::{
    FrameBuffer, FrameBufferEntry, SampleSlice, SamplesMut, Slice, WriteFrameBuffer, WriteSlice,
};
pub use hybrid::HybridInputFile;
pub use memory::{MemoryImage, PartSamples};
pub use rgba::RgbaBuffer;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub pixel_type: PixelType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TileDescription {
    pub x_size: u32,
    pub y_size: u32,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AttributeValue {
    String(String),
    Int(i32),
    Float(f32),
}

/// Header of one part.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    pub name: Option<String>,
    pub display_window: Box2i,
    pub data_window: Box2i,
    /// Kept sorted by name, the order EXR channel lists use.
    channels: Vec<ChannelInfo>,
    pub tiles: Option<TileDescription>,
    pub deep: bool,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Header {
    pub fn new(display_window: Box2i, data_window: Box2i) -> Self {
        Self {
            name: None,
            display_window,
            data_window,
            channels: Vec::new(),
            tiles: None,
            deep: false,
            attributes: BTreeMap::new(),
        }
    }

    /// Header whose data and display windows are both `width x height` at the origin.
    pub fn with_size(width: u32, height: u32) -> Self {
        let window = Box2i::from_size(width, height);
        Self::new(window, window)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, pixel_type: PixelType) -> Self {
        self.insert_channel(name, pixel_type);
        self
    }

    pub fn insert_channel(&mut self, name: impl Into<String>, pixel_type: PixelType) {
        let name = name.into();
        match self
            .channels
            .binary_search_by(|c| c.name.as_str().cmp(name.as_str()))
        {
            Ok(idx) => self.channels[idx].pixel_type = pixel_type,
            Err(idx) => self.channels.insert(idx, ChannelInfo { name, pixel_type }),
        }
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.channels[idx])
    }

    pub fn set_string_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .insert(key.into(), AttributeValue::String(value.into()));
    }

    pub fn string_attribute(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(AttributeValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn string_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().filter_map(|(k, v)| match v {
            AttributeValue::String(s) => Some((k.as_str(), s.as_str())),
            _ => None,
        })
    }
}

/// Read side of the low-level file collaborator.
pub trait ExrInput {
    fn parts(&self) -> usize;

    /// Header of `part`, `None` past the last part.
    fn header(&self, part: usize) -> Option<&Header>;

    /// Read scanlines `y0..=y1` of `part` into every slice of `frame_buffer`.
    ///
    /// Slices naming channels the part lacks are filled with their fill value. Rows that were
    /// transferred before an error stay in the destination buffers.
    fn read_part_pixels(
        &mut self,
        part: usize,
        frame_buffer: &mut FrameBuffer<'_>,
        y0: i32,
        y1: i32,
    ) -> ExrLayersResult<()>;

    fn part_complete(&self, part: usize) -> bool;

    /// Half-precision RGBA view of part 0, reconstructing RGB from luminance/chroma
    /// channels when the part stores Y/RY/BY instead of R/G/B.
    fn read_rgba(&mut self, y0: i32, y1: i32, out: &mut RgbaBuffer) -> ExrLayersResult<()> {
        rgba::read_rgba_from_part(self, y0, y1, out)
    }
}

/// Write side of the low-level file collaborator. One part, sequential scanlines.
pub trait ExrOutput {
    fn begin(&mut self, header: &Header) -> ExrLayersResult<()>;

    /// Next scanline [`ExrOutput::write_pixels`] will produce.
    fn current_scanline(&self) -> i32;

    /// Write the next `rows` scanlines, pulling each channel from `frame_buffer`.
    /// Channels missing from the frame buffer are written as zero.
    fn write_pixels(&mut self, frame_buffer: &WriteFrameBuffer<'_>, rows: usize)
    -> ExrLayersResult<()>;

    fn finish(&mut self) -> ExrLayersResult<()>;
}
