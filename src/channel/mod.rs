//! One named sample plane and the numeric fix-ups applied to it.

use std::fmt;

use half::f16;

use crate::foundation::core::{PixelType, try_alloc};
use crate::foundation::error::{ExrLayersError, ExrLayersResult};
use crate::io::{SampleSlice, SamplesMut, Slice, WriteSlice};
use crate::rows::engine::RowEngine;
use crate::rows::kernels;

pub mod classify;
pub mod palette;
pub mod source;

pub use classify::{ChanTag, ChannelType};
pub use source::PixelSource;

/// Canonical storage: FLOAT for HALF and FLOAT channels, UINT for UINT channels.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    Float(Vec<f32>),
    Uint(Vec<u32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Float(v) => v.len(),
            Samples::Uint(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A channel of a document.
///
/// Buffers are allocated on demand once the channel is bound to a document's size, and
/// stay until [`Channel::free_buffers`]. The HALF shadow only exists for the write path of
/// HALF channels; arithmetic always runs on the canonical buffer.
pub struct Channel {
    name: String,
    pixel_type: PixelType,
    width: usize,
    height: usize,
    bound: bool,
    samples: Option<Samples>,
    half: Option<Vec<f16>>,
    loaded: bool,
    premultiplied: bool,
    source: Option<Box<dyn PixelSource>>,
}

impl Channel {
    pub fn new(name: impl Into<String>, pixel_type: PixelType) -> Self {
        Self {
            name: name.into(),
            pixel_type,
            width: 0,
            height: 0,
            bound: false,
            samples: None,
            half: None,
            loaded: false,
            premultiplied: true,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl PixelSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn tag(&self) -> ChanTag {
        classify::channel_tag(&self.name)
    }

    pub fn channel_type(&self) -> ChannelType {
        classify::channel_type(&self.name)
    }

    pub fn is_alpha(&self) -> bool {
        self.tag() == ChanTag::A
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Bind to a document of `width x height`. Buffers of another size are released.
    pub fn assign_doc(&mut self, width: usize, height: usize) {
        if self.bound && (self.width != width || self.height != height) {
            self.free_buffers();
        }
        self.width = width;
        self.height = height;
        self.bound = true;
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn premultiplied(&self) -> bool {
        self.premultiplied
    }

    pub fn set_loaded(&mut self, loaded: bool, premultiplied: bool) {
        self.loaded = loaded;
        self.premultiplied = premultiplied;
    }

    pub fn pixels(&self) -> usize {
        self.width * self.height
    }

    /// Bytes of the canonical buffer.
    pub fn memory_size(&self) -> u64 {
        self.pixels() as u64 * 4
    }

    /// Bytes of the HALF shadow, zero for other pixel types.
    pub fn half_memory_size(&self) -> u64 {
        if self.pixel_type == PixelType::Half {
            self.pixels() as u64 * 2
        } else {
            0
        }
    }

    pub fn allocated_bytes(&self) -> u64 {
        let primary = self.samples.as_ref().map_or(0, |s| s.len() as u64 * 4);
        let half = self.half.as_ref().map_or(0, |h| h.len() as u64 * 2);
        primary + half
    }

    pub fn is_allocated(&self) -> bool {
        self.samples.is_some()
    }

    /// Allocate the canonical buffer (zeroed) if it does not exist yet.
    pub fn allocate(&mut self) -> ExrLayersResult<()> {
        if !self.bound {
            return Err(ExrLayersError::logic(format!(
                "channel '{}' is not bound to a document",
                self.name
            )));
        }
        if self.samples.is_none() {
            let len = self.pixels();
            self.samples = Some(match self.pixel_type {
                PixelType::Uint => Samples::Uint(try_alloc(len, 0)?),
                PixelType::Half | PixelType::Float => Samples::Float(try_alloc(len, 0.0)?),
            });
        }
        Ok(())
    }

    /// Release every buffer; the channel becomes unloaded.
    pub fn free_buffers(&mut self) {
        self.samples = None;
        self.half = None;
        self.loaded = false;
    }

    pub fn samples(&self) -> Option<&Samples> {
        self.samples.as_ref()
    }

    pub fn floats(&self) -> Option<&[f32]> {
        match &self.samples {
            Some(Samples::Float(v)) => Some(v),
            _ => None,
        }
    }

    pub fn floats_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.samples {
            Some(Samples::Float(v)) => Some(v),
            _ => None,
        }
    }

    pub fn uints(&self) -> Option<&[u32]> {
        match &self.samples {
            Some(Samples::Uint(v)) => Some(v),
            _ => None,
        }
    }

    pub fn uints_mut(&mut self) -> Option<&mut [u32]> {
        match &mut self.samples {
            Some(Samples::Uint(v)) => Some(v),
            _ => None,
        }
    }

    pub fn half(&self) -> Option<&[f16]> {
        self.half.as_deref()
    }

    /// Set every sample to `value`, allocating if needed.
    pub fn fill(&mut self, value: f32) -> ExrLayersResult<()> {
        self.allocate()?;
        match &mut self.samples {
            Some(Samples::Float(v)) => v.fill(value),
            Some(Samples::Uint(v)) => v.fill(value as u32),
            None => {}
        }
        Ok(())
    }

    /// Copy `values` into the canonical buffer and mark the channel loaded.
    pub fn store(&mut self, values: SampleSlice<'_>, premultiplied: bool) -> ExrLayersResult<()> {
        if values.len() != self.pixels() {
            return Err(ExrLayersError::logic(format!(
                "channel '{}' holds {} samples, got {}",
                self.name,
                self.pixels(),
                values.len()
            )));
        }
        self.allocate()?;
        let mut dst = match &mut self.samples {
            Some(Samples::Float(v)) => SamplesMut::Float(v),
            Some(Samples::Uint(v)) => SamplesMut::Uint(v),
            None => return Err(ExrLayersError::logic("channel buffer vanished")),
        };
        crate::io::frame::convert_into(&mut dst, values);
        self.set_loaded(true, premultiplied);
        Ok(())
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn set_source(&mut self, source: Box<dyn PixelSource>) {
        self.source = Some(source);
    }

    pub fn source_mut(&mut self) -> Option<&mut (dyn PixelSource + 'static)> {
        self.source.as_deref_mut()
    }

    /// Pull every row from the host source into the allocated canonical buffer.
    pub fn load_from_source(&mut self) -> ExrLayersResult<()> {
        let width = self.width;
        let Some(source) = self.source.as_deref_mut() else {
            return Err(ExrLayersError::logic(format!(
                "channel '{}' has no pixel source",
                self.name
            )));
        };
        match &mut self.samples {
            Some(Samples::Float(v)) => source.fill_rows(0, width, v)?,
            Some(Samples::Uint(v)) => source.fill_uint_rows(0, width, v)?,
            None => {
                return Err(ExrLayersError::logic(format!(
                    "channel '{}' has no buffer to load into",
                    self.name
                )));
            }
        }
        self.loaded = true;
        self.premultiplied = true;
        Ok(())
    }

    /// Destination slice over the whole canonical buffer for a scanline read.
    pub fn read_slice(&mut self, origin_x: i32, origin_y: i32, fill: f32) -> ExrLayersResult<Slice<'_>> {
        let width = self.width;
        let samples = match &mut self.samples {
            Some(Samples::Float(v)) => SamplesMut::Float(v),
            Some(Samples::Uint(v)) => SamplesMut::Uint(v),
            None => {
                return Err(ExrLayersError::logic(format!(
                    "channel '{}' has no buffer to read into",
                    self.name
                )));
            }
        };
        Ok(Slice::new(samples, origin_x, origin_y, width).with_fill(fill))
    }

    /// Source slice for a scanline write: the HALF shadow for HALF channels, the canonical
    /// buffer otherwise.
    pub fn write_slice(&self, origin_y: i32) -> ExrLayersResult<WriteSlice<'_>> {
        let samples = match (self.pixel_type, &self.samples, &self.half) {
            (PixelType::Half, _, Some(h)) => SampleSlice::Half(h),
            (PixelType::Half, _, None) => {
                return Err(ExrLayersError::logic(format!(
                    "channel '{}' has no half buffer; call copy_to_half first",
                    self.name
                )));
            }
            (_, Some(Samples::Float(v)), _) => SampleSlice::Float(v),
            (_, Some(Samples::Uint(v)), _) => SampleSlice::Uint(v),
            (_, None, _) => {
                return Err(ExrLayersError::logic(format!(
                    "channel '{}' has no buffer to write from",
                    self.name
                )));
            }
        };
        Ok(WriteSlice {
            samples,
            origin_y,
            width: self.width,
        })
    }

    fn check_alpha<'a>(&self, alpha: &'a Channel) -> ExrLayersResult<&'a [f32]> {
        if alpha.width != self.width || alpha.height != self.height {
            return Err(ExrLayersError::logic(format!(
                "alpha '{}' does not match the size of '{}'",
                alpha.name, self.name
            )));
        }
        alpha.floats().ok_or_else(|| {
            ExrLayersError::logic(format!("alpha '{}' has no float buffer", alpha.name))
        })
    }

    /// `color *= alpha` where `alpha < 1`. Skipped for UINT channels and for channels already
    /// premultiplied unless `force`.
    pub fn premultiply(
        &mut self,
        alpha: &Channel,
        force: bool,
        engine: &RowEngine,
    ) -> ExrLayersResult<()> {
        if self.pixel_type == PixelType::Uint || (self.premultiplied && !force) {
            return Ok(());
        }
        let a = self.check_alpha(alpha)?;
        let width = self.width;
        let name = self.name.clone();
        let color = self
            .floats_mut()
            .ok_or_else(|| ExrLayersError::logic(format!("channel '{name}' has no float buffer")))?;
        engine.map_rows_with(color, a, width, kernels::premultiply_row)?;
        self.premultiplied = true;
        Ok(())
    }

    /// `color /= alpha` where `0 < alpha < 1`. Only runs on premultiplied channels.
    pub fn unmult(&mut self, alpha: &Channel, engine: &RowEngine) -> ExrLayersResult<()> {
        if self.pixel_type == PixelType::Uint || !self.premultiplied {
            return Ok(());
        }
        let a = self.check_alpha(alpha)?;
        let width = self.width;
        let name = self.name.clone();
        let color = self
            .floats_mut()
            .ok_or_else(|| ExrLayersError::logic(format!("channel '{name}' has no float buffer")))?;
        engine.map_rows_with(color, a, width, kernels::unmult_row)?;
        self.premultiplied = false;
        Ok(())
    }

    pub fn alpha_clip(&mut self, engine: &RowEngine) -> ExrLayersResult<()> {
        let width = self.width;
        match self.floats_mut() {
            Some(a) => engine.map_rows(a, width, kernels::alpha_clip_row),
            None => Ok(()),
        }
    }

    pub fn kill_nan(&mut self, engine: &RowEngine) -> ExrLayersResult<()> {
        let width = self.width;
        match self.floats_mut() {
            Some(v) => engine.map_rows(v, width, kernels::kill_nan_row),
            None => Ok(()),
        }
    }

    /// Narrow the canonical buffer into the HALF shadow. No-op for other pixel types.
    pub fn copy_to_half(&mut self, engine: &RowEngine) -> ExrLayersResult<()> {
        if self.pixel_type != PixelType::Half {
            return Ok(());
        }
        let width = self.width;
        let Some(Samples::Float(src)) = &self.samples else {
            return Err(ExrLayersError::logic(format!(
                "channel '{}' has no float buffer to narrow",
                self.name
            )));
        };
        let mut half = match self.half.take() {
            Some(h) => h,
            None => try_alloc(src.len(), f16::ZERO)?,
        };
        engine.map_rows_with(&mut half, src, width, kernels::float_to_half_row)?;
        self.half = Some(half);
        Ok(())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("pixel_type", &self.pixel_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("allocated", &self.samples.is_some())
            .field("half", &self.half.is_some())
            .field("loaded", &self.loaded)
            .field("premultiplied", &self.premultiplied)
            .field("source", &self.source.is_some())
            .finish()
    }
}

/// `(&mut channels[target], &channels[other])` for two distinct indices.
pub fn split_pair(
    channels: &mut [Channel],
    target: usize,
    other: usize,
) -> Option<(&mut Channel, &Channel)> {
    if target == other || target >= channels.len() || other >= channels.len() {
        return None;
    }
    if target < other {
        let (lo, hi) = channels.split_at_mut(other);
        Some((&mut lo[target], &hi[0]))
    } else {
        let (lo, hi) = channels.split_at_mut(target);
        Some((&mut hi[0], &lo[other]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::AbortHandle;

    fn engine() -> RowEngine {
        RowEngine::new(Some(2), AbortHandle::never()).unwrap()
    }

    fn bound(name: &str, pixel_type: PixelType, values: &[f32]) -> Channel {
        let mut c = Channel::new(name, pixel_type);
        c.assign_doc(values.len(), 1);
        c.store(SampleSlice::Float(values), false).unwrap();
        c
    }

    #[test]
    fn unbound_allocation_is_a_logic_error() {
        let mut c = Channel::new("R", PixelType::Half);
        let err = c.allocate().unwrap_err();
        assert!(matches!(err, ExrLayersError::Logic(_)));
    }

    #[test]
    fn premultiply_is_guarded_by_the_flag() {
        let engine = engine();
        let alpha = bound("A", PixelType::Half, &[0.5, 1.0]);
        let mut r = bound("R", PixelType::Half, &[0.8, 0.8]);
        r.premultiply(&alpha, false, &engine).unwrap();
        assert_eq!(r.floats().unwrap(), &[0.4, 0.8]);
        r.premultiply(&alpha, false, &engine).unwrap();
        assert_eq!(r.floats().unwrap(), &[0.4, 0.8]);
        r.premultiply(&alpha, true, &engine).unwrap();
        assert_eq!(r.floats().unwrap(), &[0.2, 0.8]);
    }

    #[test]
    fn unmult_undoes_premultiply() {
        let engine = engine();
        let alpha = bound("A", PixelType::Float, &[0.25, 0.5, 0.0, 1.0]);
        let mut g = bound("G", PixelType::Float, &[0.5, 0.5, 0.5, 0.5]);
        g.premultiply(&alpha, false, &engine).unwrap();
        g.unmult(&alpha, &engine).unwrap();
        assert!(!g.premultiplied());
        for (got, want) in g.floats().unwrap().iter().zip([0.5, 0.5, 0.0, 0.5]) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
        g.unmult(&alpha, &engine).unwrap();
        assert_eq!(g.floats().unwrap()[0], 0.5);
    }

    #[test]
    fn uint_channels_skip_alpha_math() {
        let engine = engine();
        let alpha = bound("A", PixelType::Half, &[0.5, 0.5]);
        let mut id = Channel::new("id", PixelType::Uint);
        id.assign_doc(2, 1);
        id.store(SampleSlice::Uint(&[3, 9]), false).unwrap();
        id.premultiply(&alpha, true, &engine).unwrap();
        assert_eq!(id.uints().unwrap(), &[3, 9]);
    }

    #[test]
    fn half_shadow_only_for_half_channels() {
        let engine = engine();
        let mut h = bound("R", PixelType::Half, &[0.5, 2.0]);
        assert!(h.write_slice(0).is_err());
        h.copy_to_half(&engine).unwrap();
        assert_eq!(
            h.half().unwrap(),
            &[f16::from_f32(0.5), f16::from_f32(2.0)]
        );
        assert_eq!(h.allocated_bytes(), 2 * 4 + 2 * 2);
        let mut f = bound("Z", PixelType::Float, &[1.0]);
        f.copy_to_half(&engine).unwrap();
        assert!(f.half().is_none());
        assert!(f.write_slice(0).is_ok());
    }

    #[test]
    fn rebinding_to_a_new_size_frees_buffers() {
        let mut c = bound("R", PixelType::Half, &[1.0, 2.0]);
        assert!(c.loaded());
        c.assign_doc(2, 1);
        assert!(c.is_allocated());
        c.assign_doc(4, 4);
        assert!(!c.is_allocated());
        assert!(!c.loaded());
    }

    #[test]
    fn split_pair_rejects_same_index() {
        let mut chans = vec![
            Channel::new("R", PixelType::Half),
            Channel::new("A", PixelType::Half),
        ];
        assert!(split_pair(&mut chans, 1, 1).is_none());
        let (t, o) = split_pair(&mut chans, 1, 0).unwrap();
        assert_eq!((t.name(), o.name()), ("A", "R"));
    }
}
