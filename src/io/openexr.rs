//! File adapter over the `exr` crate.
//!
//! Reads keep only the file's metadata resident: every scanline request reopens the file,
//! filters the chunks overlapping the requested rows and decodes just those. Writes are
//! collected in memory and encoded when the part is finished.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use exr::block::reader::ChunksReader;
use exr::image::{AnyChannel, AnyChannels, Encoding, FlatSamples, Image, Layer};
use exr::math::Vec2;
use exr::meta::attribute::{AttributeValue as ExrAttribute, IntegerBounds, SampleType, Text};
use exr::meta::header::{Header as ExrHeader, LayerAttributes};
use exr::meta::{BlockDescription, MetaData};
use exr::prelude::WritableImage;
use half::f16;
use smallvec::SmallVec;

use super::{
    AttributeValue, ExrInput, ExrOutput, FrameBuffer, Header, MemoryImage, PartSamples,
    SampleSlice, SamplesMut, Slice, TileDescription, WriteFrameBuffer,
};
use crate::foundation::core::{Box2i, PixelType};
use crate::foundation::error::{ExrLayersError, ExrLayersResult};

fn exr_error(err: exr::error::Error) -> ExrLayersError {
    ExrLayersError::io(err.to_string())
}

fn text(value: &str) -> ExrLayersResult<Text> {
    Text::new_or_none(value)
        .ok_or_else(|| ExrLayersError::unsupported(format!("'{value}' is not valid EXR text")))
}

fn window_from_bounds(bounds: IntegerBounds) -> Box2i {
    Box2i::new(
        bounds.position.0,
        bounds.position.1,
        bounds.position.0 + bounds.size.0 as i32 - 1,
        bounds.position.1 + bounds.size.1 as i32 - 1,
    )
}

fn bounds_from_window(window: Box2i) -> IntegerBounds {
    IntegerBounds::new(
        Vec2(window.min_x, window.min_y),
        Vec2(window.width(), window.height()),
    )
}

fn pixel_type(sample_type: SampleType) -> PixelType {
    match sample_type {
        SampleType::F16 => PixelType::Half,
        SampleType::F32 => PixelType::Float,
        SampleType::U32 => PixelType::Uint,
    }
}

fn header_from_exr(src: &ExrHeader) -> Header {
    let data_window = window_from_bounds(IntegerBounds::new(
        src.own_attributes.layer_position,
        src.layer_size,
    ));
    let display_window = window_from_bounds(src.shared_attributes.display_window);
    let mut header = Header::new(display_window, data_window);
    header.name = src.own_attributes.layer_name.as_ref().map(|t| t.to_string());
    header.deep = src.deep;
    if let BlockDescription::Tiles(tiles) = src.blocks {
        header.tiles = Some(TileDescription {
            x_size: tiles.tile_size.0 as u32,
            y_size: tiles.tile_size.1 as u32,
        });
    }
    for (key, value) in src.shared_attributes.other.iter().chain(&src.own_attributes.other) {
        let value = match value {
            ExrAttribute::Text(t) => AttributeValue::String(t.to_string()),
            ExrAttribute::I32(v) => AttributeValue::Int(*v),
            ExrAttribute::F32(v) => AttributeValue::Float(*v),
            _ => continue,
        };
        header.attributes.insert(key.to_string(), value);
    }
    for channel in &src.channels.list {
        header.insert_channel(channel.name.to_string(), pixel_type(channel.sample_type));
    }
    header
}

/// Decode every non-deep part of the file at `path` into memory.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_file(path: impl AsRef<Path>) -> ExrLayersResult<MemoryImage> {
    let mut input = ExrFileInput::open(path)?;
    let mut memory = MemoryImage::new();
    for n in 0..input.parts() {
        let Some(header) = input.header(n).cloned() else {
            continue;
        };
        if header.deep {
            continue;
        }
        let dw = header.data_window;
        let len = dw.width() * dw.height();
        let mut planes: Vec<(String, PartSamples)> = header
            .channels()
            .iter()
            .map(|c| (c.name.clone(), PartSamples::zeroed(c.pixel_type, len)))
            .collect();
        if !dw.is_empty() {
            let mut fb = FrameBuffer::new();
            for (name, plane) in &mut planes {
                let samples = match plane {
                    PartSamples::Half(v) => SamplesMut::Half(v),
                    PartSamples::Float(v) => SamplesMut::Float(v),
                    PartSamples::Uint(v) => SamplesMut::Uint(v),
                };
                fb.insert(name.clone(), Slice::new(samples, dw.min_x, dw.min_y, dw.width()));
            }
            input.read_part_pixels(n, &mut fb, dw.min_y, dw.max_y)?;
        }
        let part = memory.add_part(header);
        for (name, plane) in &planes {
            memory.set_samples(part, name, plane.as_slice())?;
        }
    }
    tracing::debug!(parts = memory.parts(), "decoded exr file");
    Ok(memory)
}

/// Encode one part of `image` as a single-part file.
#[tracing::instrument(skip(image), fields(path = %path.as_ref().display()))]
pub fn write_part(path: impl AsRef<Path>, image: &MemoryImage, part: usize) -> ExrLayersResult<()> {
    let src = image
        .part(part)
        .ok_or_else(|| ExrLayersError::logic(format!("part {part} does not exist")))?;
    let header = &src.header;

    let mut list: SmallVec<[AnyChannel<FlatSamples>; 4]> = SmallVec::new();
    for info in header.channels() {
        let data = match src.samples(&info.name) {
            Some(PartSamples::Half(v)) => FlatSamples::F16(v.clone()),
            Some(PartSamples::Float(v)) => FlatSamples::F32(v.clone()),
            Some(PartSamples::Uint(v)) => FlatSamples::U32(v.clone()),
            None => continue,
        };
        list.push(AnyChannel::new(text(&info.name)?, data));
    }

    let mut attributes = LayerAttributes::default();
    attributes.layer_position = Vec2(header.data_window.min_x, header.data_window.min_y);
    if let Some(name) = &header.name {
        attributes.layer_name = Some(text(name)?);
    }
    for (key, value) in &header.attributes {
        let value = match value {
            AttributeValue::String(s) => ExrAttribute::Text(text(s)?),
            AttributeValue::Int(v) => ExrAttribute::I32(*v),
            AttributeValue::Float(v) => ExrAttribute::F32(*v),
        };
        attributes.other.insert(text(key)?, value);
    }

    let layer = Layer::new(
        Vec2(header.data_window.width(), header.data_window.height()),
        attributes,
        Encoding::FAST_LOSSLESS,
        AnyChannels::sort(list),
    );
    let mut out = Image::from_layer(layer);
    out.attributes.display_window = bounds_from_window(header.display_window);

    out.write().to_file(path.as_ref()).map_err(exr_error)
}

/// Scanline reader over a file on disk. Only headers are held in memory.
#[derive(Debug)]
pub struct ExrFileInput {
    path: PathBuf,
    headers: Vec<Header>,
    complete: Vec<bool>,
}

impl ExrFileInput {
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> ExrLayersResult<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = MetaData::read_from_file(&path, false).map_err(exr_error)?;
        let headers: Vec<Header> = meta.headers.iter().map(header_from_exr).collect();
        tracing::debug!(parts = headers.len(), "read exr headers");
        Ok(Self {
            path,
            complete: vec![true; headers.len()],
            headers,
        })
    }

    fn decode_rows(
        &self,
        part: usize,
        header: &Header,
        frame_buffer: &mut FrameBuffer<'_>,
        y0: i32,
        y1: i32,
    ) -> ExrLayersResult<()> {
        let dw = header.data_window;
        let first = (i64::from(y0) - i64::from(dw.min_y)) as usize;
        let last = (i64::from(y1) - i64::from(dw.min_y)) as usize;
        let names: Vec<&str> = header.channels().iter().map(|c| c.name.as_str()).collect();

        let file = File::open(&self.path)?;
        let reader = exr::block::read(BufReader::new(file), false).map_err(exr_error)?;
        let chunks = reader
            .filter_chunks(false, |_, _, block| {
                block.layer == part
                    && block.level == Vec2(0, 0)
                    && block.pixel_position.1 <= last
                    && block.pixel_position.1 + block.pixel_size.1 > first
            })
            .map_err(exr_error)?;

        let mut failure = None;
        let decoded = chunks.decompress_sequential(false, |meta, block| {
            let channels = &meta.headers[block.index.layer].channels;
            for line in block.lines(channels) {
                let row = line.location.position.1;
                if row < first || row > last {
                    continue;
                }
                let Some(slice) = names
                    .get(line.location.channel)
                    .and_then(|name| frame_buffer.get_mut(name))
                else {
                    continue;
                };
                let y = dw.min_y + row as i32;
                let x0 = dw.min_x + line.location.position.0 as i32;
                let stored = match channels.list[line.location.channel].sample_type {
                    SampleType::F16 => {
                        let v = line
                            .read_samples::<f16>()
                            .collect::<exr::error::Result<Vec<_>>>()?;
                        slice.store_row(y, x0, SampleSlice::Half(&v))
                    }
                    SampleType::F32 => {
                        let v = line
                            .read_samples::<f32>()
                            .collect::<exr::error::Result<Vec<_>>>()?;
                        slice.store_row(y, x0, SampleSlice::Float(&v))
                    }
                    SampleType::U32 => {
                        let v = line
                            .read_samples::<u32>()
                            .collect::<exr::error::Result<Vec<_>>>()?;
                        slice.store_row(y, x0, SampleSlice::Uint(&v))
                    }
                };
                if let Err(err) = stored {
                    failure = Some(err);
                    return Err(exr::error::Error::Aborted);
                }
            }
            Ok(())
        });
        if let Some(err) = failure {
            return Err(err);
        }
        decoded.map_err(exr_error)
    }
}

impl ExrInput for ExrFileInput {
    fn parts(&self) -> usize {
        self.headers.len()
    }

    fn header(&self, part: usize) -> Option<&Header> {
        self.headers.get(part)
    }

    fn read_part_pixels(
        &mut self,
        part: usize,
        frame_buffer: &mut FrameBuffer<'_>,
        y0: i32,
        y1: i32,
    ) -> ExrLayersResult<()> {
        let header = self
            .headers
            .get(part)
            .ok_or_else(|| ExrLayersError::logic(format!("part {part} does not exist")))?;
        let dw = header.data_window;
        if y0 < dw.min_y || y1 > dw.max_y {
            return Err(ExrLayersError::logic(format!(
                "scanlines {y0}..={y1} outside part data window {}..={}",
                dw.min_y, dw.max_y
            )));
        }
        let width = dw.width();
        for entry in frame_buffer.entries_mut() {
            if header.channel(&entry.name).is_none() {
                for y in y0..=y1 {
                    entry.slice.fill_row(y, dw.min_x, width)?;
                }
            }
        }

        let result = self.decode_rows(part, header, frame_buffer, y0, y1);
        if result.as_ref().is_err_and(ExrLayersError::is_io) {
            self.complete[part] = false;
        }
        result
    }

    fn part_complete(&self, part: usize) -> bool {
        self.complete.get(part).copied().unwrap_or(false)
    }
}

/// Writer that encodes to `path` when the part is finished.
#[derive(Debug)]
pub struct ExrFileOutput {
    path: PathBuf,
    image: MemoryImage,
}

impl ExrFileOutput {
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            image: MemoryImage::new(),
        }
    }
}

impl ExrOutput for ExrFileOutput {
    fn begin(&mut self, header: &Header) -> ExrLayersResult<()> {
        self.image = MemoryImage::new();
        self.image.begin(header)
    }

    fn current_scanline(&self) -> i32 {
        self.image.current_scanline()
    }

    fn write_pixels(
        &mut self,
        frame_buffer: &WriteFrameBuffer<'_>,
        rows: usize,
    ) -> ExrLayersResult<()> {
        self.image.write_pixels(frame_buffer, rows)
    }

    fn finish(&mut self) -> ExrLayersResult<()> {
        self.image.finish()?;
        write_part(&self.path, &self.image, 0)
    }
}
