use half::f16;

use super::{Document, WriteOptions};
use crate::channel::classify::increment_name;
use crate::channel::Channel;
use crate::foundation::core::{AbortHandle, PixelType, plane_bytes, try_alloc};
use crate::foundation::error::{ExrLayersError, ExrLayersResult};
use crate::io::{ExrOutput, Header, SampleSlice, WriteFrameBuffer, WriteSlice};
use crate::layer::codec::{self, LAYERS_STRING_KEY};
use crate::layer::{ChannelId, Layer, LayerProps};
use crate::rows::engine::RowEngine;
use crate::rows::kernels;

/// Rows per block on the line path when there is no memory budget.
const DEFAULT_SAFE_LINES: usize = 64;
const MIN_SAFE_LINES: u64 = 4;
const MAX_SAFE_LINES: u64 = 256;

/// A document assembled from host layers and flattened into one file part.
#[derive(Debug)]
pub struct WriteDocument {
    doc: Document,
    header: Header,
    options: WriteOptions,
}

impl WriteDocument {
    /// The document takes its size from the data window of `header`.
    pub fn new(header: Header, options: WriteOptions, abort: AbortHandle) -> ExrLayersResult<Self> {
        options.validate()?;
        let dw = header.data_window;
        let engine = RowEngine::new(options.threads, abort)?;
        let doc = Document::new(dw.width(), dw.height(), engine, options.memory_limit);
        Ok(Self {
            doc,
            header,
            options,
        })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Register `channel`, renaming it until its name is unique in the document.
    pub fn add_channel(&mut self, mut channel: Channel) -> ChannelId {
        let original = channel.name().to_owned();
        let mut name = original.clone();
        while self.doc.find_channel(&name).is_some() {
            name = increment_name(&name);
        }
        if name != original {
            tracing::debug!(from = %original, to = %name, "renamed colliding channel");
            channel.set_name(name);
        }
        channel.assign_doc(self.doc.width(), self.doc.height());
        self.doc.channels.push(channel);
        ChannelId(self.doc.channels.len() - 1)
    }

    /// Register `channels` as one layer and return its index.
    pub fn add_layer(
        &mut self,
        name: Option<&str>,
        props: LayerProps,
        channels: Vec<Channel>,
    ) -> usize {
        let mut layer = name.map_or_else(Layer::new, Layer::named);
        layer.props = props;
        for chan in channels {
            let id = self.add_channel(chan);
            layer.add_channel(id);
        }
        layer.assign_alpha(&self.doc.channels, None, false);
        self.doc.layers.push(layer);
        self.doc.layers.len() - 1
    }

    /// Pull every unloaded channel from its source into full buffers.
    ///
    /// Skipped (returning `false`) when the buffers and their HALF shadows would not fit in
    /// the memory budget, unless `force`. An allocation failure releases all buffers and
    /// returns `false`.
    #[tracing::instrument(skip(self))]
    pub fn load_from_source(&mut self, force: bool) -> ExrLayersResult<bool> {
        let needed = self.doc.memory_size().saturating_mul(2);
        if !force && self.doc.memory_limit().is_some_and(|limit| needed > limit) {
            tracing::debug!(needed, "full buffers exceed the memory budget");
            return Ok(false);
        }
        let ids: Vec<ChannelId> = (0..self.doc.channels.len())
            .map(ChannelId)
            .filter(|id| {
                let chan = &self.doc.channels[id.0];
                !chan.loaded() && chan.has_source()
            })
            .collect();

        let result = self.doc.allocate_channels(&ids).and_then(|()| {
            for id in &ids {
                self.doc.engine.query_abort()?;
                self.doc.channels[id.0].load_from_source()?;
            }
            Ok(())
        });
        match result {
            Ok(()) => Ok(self.doc.loaded()),
            Err(err) if err.is_out_of_memory() => {
                self.doc.recover_from_oom(&err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Rows per block on the low-memory path.
    pub fn safe_lines(&self) -> usize {
        if let Some(lines) = self.options.safe_lines {
            return lines.max(1);
        }
        match self.doc.memory_limit() {
            Some(limit) => {
                let planes = 4 * self.doc.channels.len() as u64;
                let per_line = plane_bytes(self.doc.width(), 1, planes, 2).unwrap_or(u64::MAX);
                (limit / per_line.max(1)).clamp(MIN_SAFE_LINES, MAX_SAFE_LINES) as usize
            }
            None => DEFAULT_SAFE_LINES,
        }
    }

    /// The header that will be written: the caller's header plus the channel list and,
    /// when enabled, the layer string.
    pub fn file_header(&self) -> Header {
        let mut header = self.header.clone();
        for chan in &self.doc.channels {
            header.insert_channel(chan.name(), chan.pixel_type());
        }
        if self.options.write_layers_string && !self.doc.layers.is_empty() {
            header.set_string_attribute(
                LAYERS_STRING_KEY,
                codec::encode_layers(&self.doc.layers, &self.doc.channels),
            );
        }
        header
    }

    /// Write the document as one part of `out`.
    ///
    /// A fully loaded document goes out in a single transfer. Otherwise, or when that runs
    /// out of memory, rows are produced block by block from loaded buffers and sources.
    #[tracing::instrument(skip_all, fields(channels = self.doc.channels.len()))]
    pub fn write_file(&mut self, out: &mut dyn ExrOutput) -> ExrLayersResult<()> {
        let header = self.file_header();
        if self.doc.loaded() {
            match self.write_full(out, &header) {
                Err(err) if err.is_out_of_memory() => {
                    self.doc.recover_from_oom(&err);
                    self.write_lines(out, &header)
                }
                other => other,
            }
        } else {
            self.write_lines(out, &header)
        }
    }

    fn write_full(&mut self, out: &mut dyn ExrOutput, header: &Header) -> ExrLayersResult<()> {
        let planned = self.doc.channels.iter().map(Channel::half_memory_size).sum();
        self.doc.reserve(planned)?;
        for chan in &mut self.doc.channels {
            chan.copy_to_half(&self.doc.engine)?;
        }

        let origin_y = header.data_window.min_y;
        let height = self.doc.height();
        out.begin(header)?;
        {
            let mut fb = WriteFrameBuffer::new();
            for chan in &self.doc.channels {
                fb.insert(chan.name(), chan.write_slice(origin_y)?);
            }
            self.doc.engine.query_abort()?;
            out.write_pixels(&fb, height)?;
        }
        out.finish()?;
        self.doc.stats.rows_written += height as u64;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(lines = self.safe_lines()))]
    fn write_lines(&mut self, out: &mut dyn ExrOutput, header: &Header) -> ExrLayersResult<()> {
        let lines = self.safe_lines();
        let (width, height) = (self.doc.width(), self.doc.height());
        let block_len = lines
            .checked_mul(width)
            .ok_or_else(|| ExrLayersError::out_of_memory(u64::MAX))?;
        let planned = self
            .doc
            .channels
            .iter()
            .map(|c| {
                let bytes = LinePlane::bytes_per_sample(c.pixel_type());
                plane_bytes(width, lines, 1, bytes)
            })
            .sum::<ExrLayersResult<u64>>()?;
        self.doc.reserve(planned)?;
        let mut planes = self
            .doc
            .channels
            .iter()
            .map(|c| LinePlane::new(c.pixel_type(), block_len))
            .collect::<ExrLayersResult<Vec<_>>>()?;

        out.begin(header)?;
        let mut y = 0;
        while y < height {
            self.doc.engine.query_abort()?;
            let rows = lines.min(height - y);
            let len = rows * width;
            for (chan, plane) in self.doc.channels.iter_mut().zip(&mut planes) {
                plane.pull(chan, y, len)?;
            }
            let origin_y = header.data_window.min_y + y as i32;
            let mut fb = WriteFrameBuffer::new();
            for (chan, plane) in self.doc.channels.iter().zip(&planes) {
                fb.insert(
                    chan.name(),
                    WriteSlice {
                        samples: plane.samples(len),
                        origin_y,
                        width,
                    },
                );
            }
            out.write_pixels(&fb, rows)?;
            self.doc.stats.rows_written += rows as u64;
            y += rows;
        }
        out.finish()
    }
}

/// Staging rows for one channel on the line path.
enum LinePlane {
    Half { floats: Vec<f32>, half: Vec<f16> },
    Float(Vec<f32>),
    Uint(Vec<u32>),
}

impl LinePlane {
    fn bytes_per_sample(pixel_type: PixelType) -> u64 {
        match pixel_type {
            PixelType::Half => 4 + 2,
            PixelType::Float | PixelType::Uint => 4,
        }
    }

    fn new(pixel_type: PixelType, len: usize) -> ExrLayersResult<Self> {
        Ok(match pixel_type {
            PixelType::Half => LinePlane::Half {
                floats: try_alloc(len, 0.0)?,
                half: try_alloc(len, f16::ZERO)?,
            },
            PixelType::Float => LinePlane::Float(try_alloc(len, 0.0)?),
            PixelType::Uint => LinePlane::Uint(try_alloc(len, 0)?),
        })
    }

    /// Fill the first `len` samples with rows starting at `y`, from the loaded buffer when
    /// there is one and from the channel's source otherwise.
    fn pull(&mut self, chan: &mut Channel, y: usize, len: usize) -> ExrLayersResult<()> {
        let width = chan.width();
        let start = y * width;
        match self {
            LinePlane::Half { floats, half } => {
                pull_floats(chan, start, width, &mut floats[..len])?;
                kernels::float_to_half_row(&mut half[..len], &floats[..len]);
            }
            LinePlane::Float(floats) => pull_floats(chan, start, width, &mut floats[..len])?,
            LinePlane::Uint(uints) => {
                let out = &mut uints[..len];
                if chan.loaded()
                    && let Some(src) = chan.uints()
                {
                    out.copy_from_slice(&src[start..start + len]);
                    return Ok(());
                }
                source_of(chan)?.fill_uint_rows(y, width, out)?;
            }
        }
        Ok(())
    }

    fn samples(&self, len: usize) -> SampleSlice<'_> {
        match self {
            LinePlane::Half { half, .. } => SampleSlice::Half(&half[..len]),
            LinePlane::Float(v) => SampleSlice::Float(&v[..len]),
            LinePlane::Uint(v) => SampleSlice::Uint(&v[..len]),
        }
    }
}

fn pull_floats(chan: &mut Channel, start: usize, width: usize, out: &mut [f32]) -> ExrLayersResult<()> {
    if chan.loaded()
        && let Some(src) = chan.floats()
    {
        out.copy_from_slice(&src[start..start + out.len()]);
        return Ok(());
    }
    let y = if width == 0 { 0 } else { start / width };
    source_of(chan)?.fill_rows(y, width, out)
}

fn source_of(chan: &mut Channel) -> ExrLayersResult<&mut (dyn crate::channel::PixelSource + 'static)> {
    let name = chan.name().to_owned();
    chan.source_mut().ok_or_else(|| {
        ExrLayersError::logic(format!("channel '{name}' has neither pixels nor a source"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryImage;

    fn writer(width: u32, height: u32, options: WriteOptions) -> WriteDocument {
        WriteDocument::new(Header::with_size(width, height), options, AbortHandle::never()).unwrap()
    }

    #[test]
    fn colliding_channel_names_are_incremented() {
        let mut doc = writer(1, 1, WriteOptions::default());
        let a = doc.add_channel(Channel::new("beauty.R", PixelType::Half));
        let b = doc.add_channel(Channel::new("beauty.R", PixelType::Half));
        let c = doc.add_channel(Channel::new("R", PixelType::Half));
        let d = doc.add_channel(Channel::new("R", PixelType::Half));
        let names: Vec<_> = [a, b, c, d]
            .iter()
            .map(|id| doc.document().channel(*id).unwrap().name().to_owned())
            .collect();
        assert_eq!(names, vec!["beauty.R", "beauty2.R", "R", "layer1.R"]);
    }

    #[test]
    fn safe_lines_follow_the_budget() {
        let mut doc = writer(16, 8, WriteOptions::default());
        doc.add_channel(Channel::new("R", PixelType::Half));
        assert_eq!(doc.safe_lines(), DEFAULT_SAFE_LINES);

        let budget = |limit| WriteOptions {
            memory_limit: Some(limit),
            ..WriteOptions::default()
        };
        let mut tight = writer(16, 8, budget(10));
        tight.add_channel(Channel::new("R", PixelType::Half));
        assert_eq!(tight.safe_lines(), 4);

        let mut roomy = writer(16, 8, budget(1 << 30));
        roomy.add_channel(Channel::new("R", PixelType::Half));
        assert_eq!(roomy.safe_lines(), 256);

        let mut mid = writer(16, 8, budget(128 * 20));
        mid.add_channel(Channel::new("R", PixelType::Half));
        assert_eq!(mid.safe_lines(), 20);
    }

    #[test]
    fn header_lists_channels_and_layer_string() {
        let mut doc = writer(1, 1, WriteOptions::default());
        doc.add_layer(
            None,
            LayerProps::default(),
            vec![
                Channel::new("R", PixelType::Half),
                Channel::new("A", PixelType::Half),
            ],
        );
        let header = doc.file_header();
        let names: Vec<_> = header.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "R"]);
        assert!(header.string_attribute(LAYERS_STRING_KEY).is_some());
    }

    #[test]
    fn unloaded_channel_without_source_is_a_logic_error() {
        let mut doc = writer(2, 2, WriteOptions::default());
        doc.add_channel(Channel::new("R", PixelType::Float));
        let mut out = MemoryImage::new();
        let err = doc.write_file(&mut out).unwrap_err();
        assert!(matches!(err, ExrLayersError::Logic(_)));
    }
}
