//! The channel/layer graph of one image.
//!
//! [`Document`] owns every [`Channel`] in an arena; layers refer to them by [`ChannelId`].
//! [`ReadDocument`] fills a document from a file, [`WriteDocument`] flattens one into a file.

pub mod options;
pub mod read;
pub mod sink;
pub mod write;

pub use options::{ReadOptions, WriteOptions};
pub use read::ReadDocument;
pub use sink::LayerPixels;
pub use write::WriteDocument;

use crate::channel::{Channel, split_pair};
use crate::foundation::core::PixelType;
use crate::foundation::error::{ExrLayersError, ExrLayersResult};
use crate::layer::{ChannelId, Layer};
use crate::rows::engine::RowEngine;

/// Names tried, in order, when looking for the layer a host should show first.
const MAIN_LAYER_NAMES: [&str; 8] = [
    "RGB",
    "RGBA",
    "Y",
    "[Y]",
    "YA",
    "[Y][A]",
    "[Y][RY][BY]",
    "[Y][RY][BY][A]",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DocumentStats {
    /// Allocations refused by the allocator or the memory budget.
    pub alloc_failures: u64,
    /// Times every buffer was released to recover from an allocation failure.
    pub buffer_releases: u64,
    pub rows_read: u64,
    pub rows_written: u64,
}

#[derive(Debug)]
pub struct Document {
    width: usize,
    height: usize,
    pub(crate) channels: Vec<Channel>,
    pub(crate) layers: Vec<Layer>,
    pub(crate) crypto_layers: Vec<Layer>,
    black: Option<Channel>,
    white: Option<Channel>,
    pub(crate) engine: RowEngine,
    memory_limit: Option<u64>,
    pub(crate) stats: DocumentStats,
    pub(crate) used_layers_string: bool,
}

impl Document {
    pub fn new(width: usize, height: usize, engine: RowEngine, memory_limit: Option<u64>) -> Self {
        Self {
            width,
            height,
            channels: Vec::new(),
            layers: Vec::new(),
            crypto_layers: Vec::new(),
            black: None,
            white: None,
            engine,
            memory_limit,
            stats: DocumentStats::default(),
            used_layers_string: false,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.0)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id.0)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, idx: usize) -> Option<&Layer> {
        self.layers.get(idx)
    }

    pub fn layer_mut(&mut self, idx: usize) -> Option<&mut Layer> {
        self.layers.get_mut(idx)
    }

    pub fn crypto_layers(&self) -> &[Layer] {
        &self.crypto_layers
    }

    pub fn engine(&self) -> &RowEngine {
        &self.engine
    }

    pub fn stats(&self) -> DocumentStats {
        self.stats
    }

    pub fn memory_limit(&self) -> Option<u64> {
        self.memory_limit
    }

    /// Whether the layers were rebuilt from the stored layer string.
    pub fn used_layers_string(&self) -> bool {
        self.used_layers_string
    }

    pub fn layer_name(&self, idx: usize) -> Option<String> {
        self.layers.get(idx).map(|l| l.name(&self.channels))
    }

    pub fn find_channel(&self, name: &str) -> Option<ChannelId> {
        self.channels
            .iter()
            .position(|c| c.name() == name)
            .map(ChannelId)
    }

    /// Index of the first ordinary layer whose display name is `name`.
    pub fn find_layer(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.name(&self.channels) == name)
    }

    pub fn find_crypto_layer(&self, name: &str) -> Option<usize> {
        self.crypto_layers
            .iter()
            .position(|l| l.name(&self.channels) == name)
    }

    /// The layer a host should present first.
    ///
    /// Canonical colour layer names win. With `flexible`, the first layer holding a plain
    /// `R`, `G`, `B` or `A` channel (tried in that order) is next; with `force`, the first
    /// layer of all.
    pub fn find_main_layer(&self, flexible: bool, force: bool) -> Option<usize> {
        if let Some(idx) = MAIN_LAYER_NAMES.iter().find_map(|n| self.find_layer(n)) {
            return Some(idx);
        }
        if flexible {
            for wanted in ["R", "G", "B", "A"] {
                let hit = self.layers.iter().position(|l| {
                    l.channels()
                        .iter()
                        .any(|id| self.channels[id.0].name() == wanted)
                });
                if hit.is_some() {
                    return hit;
                }
            }
        }
        (force && !self.layers.is_empty()).then_some(0)
    }

    /// True when every channel is loaded.
    pub fn loaded(&self) -> bool {
        self.channels.iter().all(Channel::loaded)
    }

    /// Bytes the canonical buffers of every channel take once loaded.
    pub fn memory_size(&self) -> u64 {
        self.channels.iter().map(Channel::memory_size).sum()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.channels
            .iter()
            .chain(self.black.iter())
            .chain(self.white.iter())
            .map(Channel::allocated_bytes)
            .sum()
    }

    /// Release every channel buffer, the constant channels included.
    pub fn free_buffers(&mut self) {
        for chan in &mut self.channels {
            chan.free_buffers();
        }
        self.black = None;
        self.white = None;
    }

    /// Fail with [`ExrLayersError::OutOfMemory`] when `planned` more bytes would exceed the
    /// memory budget.
    pub fn reserve(&self, planned: u64) -> ExrLayersResult<()> {
        match self.memory_limit {
            Some(limit) if self.allocated_bytes().saturating_add(planned) > limit => {
                Err(ExrLayersError::out_of_memory(planned))
            }
            _ => Ok(()),
        }
    }

    /// Allocate the canonical buffers of `ids` within the budget.
    pub fn allocate_channels(&mut self, ids: &[ChannelId]) -> ExrLayersResult<()> {
        let planned = ids
            .iter()
            .filter_map(|id| self.channels.get(id.0))
            .filter(|c| !c.is_allocated())
            .map(Channel::memory_size)
            .sum();
        self.reserve(planned)?;
        for id in ids {
            self.channel_mut(*id)
                .ok_or_else(|| ExrLayersError::logic(format!("no channel with id {}", id.0)))?
                .allocate()?;
        }
        Ok(())
    }

    /// Count an allocation failure and release every buffer.
    pub(crate) fn recover_from_oom(&mut self, err: &ExrLayersError) {
        tracing::warn!(error = %err, "allocation failed; releasing all channel buffers");
        self.stats.alloc_failures += 1;
        self.stats.buffer_releases += 1;
        self.free_buffers();
    }

    /// Constant 0 channel standing in for missing colour planes.
    pub fn black(&mut self) -> ExrLayersResult<&Channel> {
        let (width, height) = (self.width, self.height);
        if self.black.is_none() {
            self.black = Some(constant_channel("black", 0.0, width, height)?);
        }
        self.black
            .as_ref()
            .ok_or_else(|| ExrLayersError::logic("black channel missing"))
    }

    /// Constant 1 channel standing in for a missing alpha.
    pub fn white(&mut self) -> ExrLayersResult<&Channel> {
        let (width, height) = (self.width, self.height);
        if self.white.is_none() {
            self.white = Some(constant_channel("white", 1.0, width, height)?);
        }
        self.white
            .as_ref()
            .ok_or_else(|| ExrLayersError::logic("white channel missing"))
    }

    /// Shared alpha for layers without one: the document's `A` channel, unless the layers
    /// came from the layer string.
    fn shared_alpha(&self) -> Option<ChannelId> {
        if self.used_layers_string {
            None
        } else {
            self.find_channel("A")
        }
    }

    /// Pairs `(color, alpha)` the colour math of layer `idx` applies to. Unloaded channels
    /// are left out.
    fn alpha_pairs(&self, idx: usize, shared: Option<ChannelId>) -> Vec<(ChannelId, ChannelId)> {
        let Some(layer) = self.layers.get(idx) else {
            return Vec::new();
        };
        let Some(alpha) = layer.alpha_channel(&self.channels).or(shared) else {
            return Vec::new();
        };
        if !self.channels[alpha.0].loaded() {
            return Vec::new();
        }
        layer
            .color_channels(&self.channels)
            .into_iter()
            .filter(|c| *c != alpha && self.channels[c.0].loaded())
            .map(|c| (c, alpha))
            .collect()
    }

    pub fn premultiply_layer(
        &mut self,
        idx: usize,
        shared: Option<ChannelId>,
        force: bool,
    ) -> ExrLayersResult<()> {
        for (color, alpha) in self.alpha_pairs(idx, shared) {
            if let Some((c, a)) = split_pair(&mut self.channels, color.0, alpha.0) {
                c.premultiply(a, force, &self.engine)?;
            }
        }
        Ok(())
    }

    pub fn unmult_layer(&mut self, idx: usize, shared: Option<ChannelId>) -> ExrLayersResult<()> {
        for (color, alpha) in self.alpha_pairs(idx, shared) {
            if let Some((c, a)) = split_pair(&mut self.channels, color.0, alpha.0) {
                c.unmult(a, &self.engine)?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(layers = self.layers.len()))]
    pub fn premultiply(&mut self, force: bool) -> ExrLayersResult<()> {
        let shared = self.shared_alpha();
        for idx in 0..self.layers.len() {
            self.premultiply_layer(idx, shared, force)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(layers = self.layers.len()))]
    pub fn unmult(&mut self) -> ExrLayersResult<()> {
        let shared = self.shared_alpha();
        for idx in 0..self.layers.len() {
            self.unmult_layer(idx, shared)?;
        }
        Ok(())
    }
}

fn constant_channel(name: &str, value: f32, width: usize, height: usize) -> ExrLayersResult<Channel> {
    let mut chan = Channel::new(name, PixelType::Float);
    chan.assign_doc(width, height);
    chan.fill(value)?;
    chan.set_loaded(true, true);
    Ok(chan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::AbortHandle;
    use crate::io::SampleSlice;

    fn doc_with(names: &[&str]) -> Document {
        let engine = RowEngine::new(Some(1), AbortHandle::never()).unwrap();
        let mut doc = Document::new(2, 1, engine, None);
        for name in names {
            let mut chan = Channel::new(*name, PixelType::Float);
            chan.assign_doc(2, 1);
            doc.channels.push(chan);
        }
        doc
    }

    fn layer(ids: &[usize]) -> Layer {
        let mut layer = Layer::new();
        for &i in ids {
            layer.add_channel(ChannelId(i));
        }
        layer
    }

    #[test]
    fn main_layer_prefers_canonical_names() {
        let mut doc = doc_with(&["a.R", "R", "G", "B"]);
        doc.layers = vec![layer(&[0]), layer(&[1, 2, 3])];
        assert_eq!(doc.find_main_layer(false, false), Some(1));

        doc.layers = vec![layer(&[0]), layer(&[2])];
        assert_eq!(doc.find_main_layer(false, false), None);
        assert_eq!(doc.find_main_layer(true, false), Some(1));

        doc.layers = vec![layer(&[0])];
        assert_eq!(doc.find_main_layer(true, false), None);
        assert_eq!(doc.find_main_layer(true, true), Some(0));
    }

    #[test]
    fn budget_refuses_oversized_allocations() {
        let mut doc = doc_with(&["R", "G"]);
        doc.memory_limit = Some(8);
        doc.allocate_channels(&[ChannelId(0)]).unwrap();
        let err = doc.allocate_channels(&[ChannelId(1)]).unwrap_err();
        assert!(err.is_out_of_memory());
        doc.free_buffers();
        assert_eq!(doc.allocated_bytes(), 0);
    }

    #[test]
    fn constants_are_loaded_planes() {
        let mut doc = doc_with(&[]);
        assert_eq!(doc.white().unwrap().floats(), Some(&[1.0, 1.0][..]));
        assert_eq!(doc.black().unwrap().floats(), Some(&[0.0, 0.0][..]));
        assert!(doc.white().unwrap().loaded());
        assert!(doc.loaded());
    }

    #[test]
    fn layers_without_alpha_use_the_shared_alpha() {
        let mut doc = doc_with(&["A", "Z"]);
        doc.channels[0]
            .store(SampleSlice::Float(&[0.5, 1.0]), true)
            .unwrap();
        doc.channels[1]
            .store(SampleSlice::Float(&[0.25, 0.75]), true)
            .unwrap();
        doc.layers = vec![layer(&[1]), layer(&[0])];

        doc.unmult().unwrap();
        assert_eq!(doc.channels[1].floats(), Some(&[0.5, 0.75][..]));
        doc.premultiply(false).unwrap();
        assert_eq!(doc.channels[1].floats(), Some(&[0.25, 0.75][..]));

        doc.used_layers_string = true;
        doc.unmult().unwrap();
        assert!(doc.channels[1].premultiplied());
    }
}
