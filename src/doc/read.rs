use half::f16;

use super::{Document, ReadOptions};
use crate::channel::{ChanTag, Channel};
use crate::foundation::core::{AbortHandle, Box2i, PixelType, plane_bytes};
use crate::foundation::error::{ExrLayersError, ExrLayersResult};
use crate::io::hybrid::DEFAULT_BLOCK_ROWS;
use crate::io::{ExrInput, FrameBuffer, HybridInputFile, RgbaBuffer};
use crate::layer::builder::{self, BuiltLayers};
use crate::layer::codec::{self, LAYERS_STRING_KEY};
use crate::layer::{ChannelId, Layer};
use crate::rows::engine::RowEngine;

/// A document bound to an open file, loading channels on demand.
#[derive(Debug)]
pub struct ReadDocument {
    doc: Document,
    file: HybridInputFile,
    options: ReadOptions,
}

impl ReadDocument {
    /// Open `input`, classify its channels and build the layer list. No pixels are read.
    #[tracing::instrument(skip_all, fields(parts = input.parts()))]
    pub fn open(
        input: Box<dyn ExrInput + Send>,
        options: ReadOptions,
        abort: AbortHandle,
    ) -> ExrLayersResult<Self> {
        options.validate()?;
        let file = HybridInputFile::new(input, options.rename_first_part)?;
        let dw = file.data_window();
        let engine = RowEngine::new(options.threads, abort)?;
        let doc = Document::new(dw.width(), dw.height(), engine, options.memory_limit);
        let mut this = Self { doc, file, options };
        this.setup();
        Ok(this)
    }

    #[tracing::instrument(skip_all)]
    fn setup(&mut self) {
        let (width, height) = (self.doc.width(), self.doc.height());
        self.doc.channels = self
            .file
            .channels()
            .iter()
            .map(|info| {
                let mut chan = Channel::new(info.name.clone(), info.pixel_type);
                chan.assign_doc(width, height);
                chan
            })
            .collect();

        if let Some(layers) = self.layers_from_string() {
            self.doc.layers = layers;
            self.doc.used_layers_string = true;
            return;
        }

        let crypto = builder::collect_crypto_manifests(
            (0..self.file.parts())
                .filter_map(|n| Some((self.file.part_prefix(n), self.file.header(n)?))),
        );
        let BuiltLayers {
            layers,
            crypto_layers,
        } = builder::build_layers(&self.doc.channels, &crypto, self.options.split_alpha);
        tracing::debug!(
            layers = layers.len(),
            crypto_layers = crypto_layers.len(),
            "built layers from channel names"
        );
        self.doc.layers = layers;
        self.doc.crypto_layers = crypto_layers;
    }

    /// Layers recorded in the layer-string attribute, or `None` to fall back to the channel
    /// names.
    fn layers_from_string(&self) -> Option<Vec<Layer>> {
        if !self.options.use_layers_string || self.options.split_alpha {
            return None;
        }
        let encoded = self.file.header(0)?.string_attribute(LAYERS_STRING_KEY)?;
        let records = match codec::decode_layers(encoded) {
            Ok(records) => records,
            Err(err) => {
                tracing::debug!(error = %err, "ignoring malformed layer string");
                return None;
            }
        };

        let chans = &self.doc.channels;
        let mut layers = Vec::with_capacity(records.len());
        for record in records {
            let mut layer = Layer::named(record.name);
            layer.props = record.props;
            for chan in &record.channels {
                if let Some(id) = self.doc.find_channel(&chan.name) {
                    layer.add_channel(id);
                }
            }
            if layer.is_empty() {
                continue;
            }
            layer.assign_alpha(chans, None, false);
            layers.push(layer);
        }
        if layers.is_empty() {
            tracing::debug!("layer string names no known channels");
            return None;
        }
        Some(layers)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    pub fn file(&self) -> &HybridInputFile {
        &self.file
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    pub fn data_window(&self) -> Box2i {
        self.file.data_window()
    }

    pub fn display_window(&self) -> Box2i {
        self.file.display_window()
    }

    /// Every part of the file holds all of its scanlines.
    pub fn is_complete(&self) -> bool {
        self.file.is_complete()
    }

    /// Load every channel not loaded yet.
    ///
    /// An allocation failure releases all buffers and still returns `Ok`; check
    /// [`Document::loaded`] afterwards.
    #[tracing::instrument(skip(self), fields(channels = self.doc.channels.len()))]
    pub fn load_from_file(&mut self) -> ExrLayersResult<()> {
        let result = self.load_everything();
        self.absorb_oom(result)
    }

    /// Load the channels of layer `idx`.
    #[tracing::instrument(skip(self))]
    pub fn load_layer(&mut self, idx: usize) -> ExrLayersResult<()> {
        let layer = self
            .doc
            .layers
            .get(idx)
            .ok_or_else(|| ExrLayersError::logic(format!("no layer at index {idx}")))?;
        let result = if layer.load_as_layer() {
            self.load_rgba_layer(idx)
        } else {
            let ids = layer.channels().to_vec();
            self.load_scanlines(&ids)
        };
        self.absorb_oom(result)
    }

    pub fn load_crypto_layer(&mut self, idx: usize) -> ExrLayersResult<()> {
        let ids = self
            .doc
            .crypto_layers
            .get(idx)
            .ok_or_else(|| ExrLayersError::logic(format!("no crypto layer at index {idx}")))?
            .channels()
            .to_vec();
        let result = self.load_scanlines(&ids);
        self.absorb_oom(result)
    }

    /// Load a single channel. Members of an RGBA-interface layer load with their layer.
    pub fn load_channel(&mut self, id: ChannelId) -> ExrLayersResult<()> {
        if self.doc.channel(id).is_none() {
            return Err(ExrLayersError::logic(format!("no channel with id {}", id.0)));
        }
        let owner = self
            .doc
            .layers
            .iter()
            .position(|l| l.load_as_layer() && l.contains(id));
        let result = match owner {
            Some(idx) => self.load_rgba_layer(idx),
            None => self.load_scanlines(&[id]),
        };
        self.absorb_oom(result)
    }

    fn absorb_oom(&mut self, result: ExrLayersResult<()>) -> ExrLayersResult<()> {
        match result {
            Err(err) if err.is_out_of_memory() => {
                self.doc.recover_from_oom(&err);
                Ok(())
            }
            other => other,
        }
    }

    fn load_everything(&mut self) -> ExrLayersResult<()> {
        let rgba_layers: Vec<usize> = (0..self.doc.layers.len())
            .filter(|&i| self.doc.layers[i].load_as_layer())
            .collect();
        let plain: Vec<ChannelId> = (0..self.doc.channels.len())
            .map(ChannelId)
            .filter(|id| {
                !rgba_layers
                    .iter()
                    .any(|&i| self.doc.layers[i].contains(*id))
            })
            .collect();
        self.load_scanlines(&plain)?;
        for idx in rgba_layers {
            self.load_rgba_layer(idx)?;
        }
        Ok(())
    }

    fn block_rows(&self) -> i32 {
        i32::try_from(self.file.scanline_block_size().max(1)).unwrap_or(i32::MAX)
    }

    /// Stream the unloaded channels among `ids` through the file in row blocks.
    fn load_scanlines(&mut self, ids: &[ChannelId]) -> ExrLayersResult<()> {
        let mut wanted: Vec<ChannelId> = ids
            .iter()
            .copied()
            .filter(|id| self.doc.channels.get(id.0).is_some_and(|c| !c.loaded()))
            .collect();
        wanted.sort_unstable();
        wanted.dedup();
        if wanted.is_empty() {
            return Ok(());
        }
        self.doc.allocate_channels(&wanted)?;

        let dw = self.file.data_window();
        let block = self.block_rows();
        let mut rows_read = 0u64;
        {
            let mut fb = FrameBuffer::new();
            for (idx, chan) in self.doc.channels.iter_mut().enumerate() {
                if wanted.binary_search(&ChannelId(idx)).is_err() {
                    continue;
                }
                let fill = if chan.tag() == ChanTag::A { 1.0 } else { 0.0 };
                let name = chan.name().to_owned();
                fb.insert(name, chan.read_slice(dw.min_x, dw.min_y, fill)?);
            }

            let mut y = dw.min_y;
            while y <= dw.max_y {
                self.doc.engine.query_abort()?;
                let end = y.saturating_add(block - 1).min(dw.max_y);
                match self.file.read_pixels(&mut fb, y, end) {
                    Ok(()) => rows_read += u64::from((end - y + 1).unsigned_abs()),
                    Err(err) if err.is_io() => {
                        tracing::warn!(error = %err, scanline = y, "stopped reading early");
                        break;
                    }
                    Err(err) => return Err(err),
                }
                if end == dw.max_y {
                    break;
                }
                y = end + 1;
            }
        }
        self.doc.stats.rows_read += rows_read;

        for id in &wanted {
            self.doc.channels[id.0].set_loaded(true, true);
        }
        self.fix_up(&wanted)
    }

    /// Sanitise freshly loaded channels, clipping alphas when asked to.
    fn fix_up(&mut self, ids: &[ChannelId]) -> ExrLayersResult<()> {
        let clip_alpha = self.options.clip_alpha;
        for id in ids {
            let chan = &mut self.doc.channels[id.0];
            if chan.pixel_type() == PixelType::Uint {
                continue;
            }
            chan.kill_nan(&self.doc.engine)?;
            if clip_alpha && chan.tag() == ChanTag::A {
                chan.alpha_clip(&self.doc.engine)?;
            }
        }
        Ok(())
    }

    /// Load a Y/RY/BY(/A) layer through the RGBA interface: its members receive the
    /// reconstructed R, G, B and A planes in order.
    #[tracing::instrument(skip(self))]
    fn load_rgba_layer(&mut self, idx: usize) -> ExrLayersResult<()> {
        let ids: Vec<ChannelId> = self.doc.layers[idx].channels().to_vec();
        if ids.iter().all(|id| self.doc.channels[id.0].loaded()) {
            return Ok(());
        }
        let dw = self.file.data_window();
        let staging = plane_bytes(dw.width(), dw.height(), 4, 2)?;
        let planned: u64 = ids
            .iter()
            .map(|id| &self.doc.channels[id.0])
            .filter(|c| !c.is_allocated())
            .map(Channel::memory_size)
            .sum();
        self.doc.reserve(planned + staging)?;
        self.doc.allocate_channels(&ids)?;
        let mut rgba = RgbaBuffer::new(dw)?;

        let block = i32::try_from(DEFAULT_BLOCK_ROWS).unwrap_or(i32::MAX);
        let mut y = dw.min_y;
        let mut rows_read = 0u64;
        while y <= dw.max_y {
            self.doc.engine.query_abort()?;
            let end = y.saturating_add(block - 1).min(dw.max_y);
            match self.file.read_rgba(y, end, &mut rgba) {
                Ok(()) => rows_read += u64::from((end - y + 1).unsigned_abs()),
                Err(err) if err.is_io() => {
                    tracing::warn!(error = %err, scanline = y, "stopped reading early");
                    break;
                }
                Err(err) => return Err(err),
            }
            if end == dw.max_y {
                break;
            }
            y = end + 1;
        }
        self.doc.stats.rows_read += rows_read;

        let planes: [&[f16]; 4] = [&rgba.r, &rgba.g, &rgba.b, &rgba.a];
        for (id, plane) in ids.iter().zip(planes) {
            let chan = &mut self.doc.channels[id.0];
            let name = chan.name().to_owned();
            let dst = chan
                .floats_mut()
                .ok_or_else(|| ExrLayersError::logic(format!("channel '{name}' is not FLOAT")))?;
            for (d, s) in dst.iter_mut().zip(plane) {
                *d = s.to_f32();
            }
            chan.set_loaded(true, true);
        }
        self.fix_up(&ids)
    }
}
