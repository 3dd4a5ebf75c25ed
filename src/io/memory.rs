use std::collections::BTreeMap;

use half::f16;

use super::{ExrInput, ExrOutput, FrameBuffer, Header, SampleSlice, SamplesMut, WriteFrameBuffer};
use crate::foundation::core::PixelType;
use crate::foundation::error::{ExrLayersError, ExrLayersResult};

/// Samples of one channel of one part, row-major over the part's data window.
#[derive(Clone, Debug, PartialEq)]
pub enum PartSamples {
    Half(Vec<f16>),
    Float(Vec<f32>),
    Uint(Vec<u32>),
}

impl PartSamples {
    pub fn zeroed(pixel_type: PixelType, len: usize) -> Self {
        match pixel_type {
            PixelType::Half => PartSamples::Half(vec![f16::ZERO; len]),
            PixelType::Float => PartSamples::Float(vec![0.0; len]),
            PixelType::Uint => PartSamples::Uint(vec![0; len]),
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            PartSamples::Half(_) => PixelType::Half,
            PartSamples::Float(_) => PixelType::Float,
            PartSamples::Uint(_) => PixelType::Uint,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> SampleSlice<'_> {
        match self {
            PartSamples::Half(v) => SampleSlice::Half(v),
            PartSamples::Float(v) => SampleSlice::Float(v),
            PartSamples::Uint(v) => SampleSlice::Uint(v),
        }
    }

    fn as_mut(&mut self) -> SamplesMut<'_> {
        match self {
            PartSamples::Half(v) => SamplesMut::Half(v),
            PartSamples::Float(v) => SamplesMut::Float(v),
            PartSamples::Uint(v) => SamplesMut::Uint(v),
        }
    }

    /// Every sample widened to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            PartSamples::Half(v) => v.iter().map(|h| h.to_f32()).collect(),
            PartSamples::Float(v) => v.clone(),
            PartSamples::Uint(v) => v.iter().map(|&u| u as f32).collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MemoryPart {
    pub header: Header,
    channels: BTreeMap<String, PartSamples>,
    /// Rows available to readers; `None` means the part is complete.
    available_rows: Option<usize>,
}

impl MemoryPart {
    fn new(header: Header) -> Self {
        let len = header.data_window.width() * header.data_window.height();
        let channels = header
            .channels()
            .iter()
            .map(|c| (c.name.clone(), PartSamples::zeroed(c.pixel_type, len)))
            .collect();
        Self {
            header,
            channels,
            available_rows: None,
        }
    }

    pub fn samples(&self, name: &str) -> Option<&PartSamples> {
        self.channels.get(name)
    }
}

#[derive(Clone, Copy, Debug)]
struct WriteCursor {
    part: usize,
    next_row: i32,
}

/// In-memory multi-part image implementing both sides of the file collaborator.
#[derive(Clone, Debug, Default)]
pub struct MemoryImage {
    parts: Vec<MemoryPart>,
    cursor: Option<WriteCursor>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a part whose channels (taken from the header) start zeroed.
    pub fn add_part(&mut self, header: Header) -> usize {
        self.parts.push(MemoryPart::new(header));
        self.parts.len() - 1
    }

    pub fn part(&self, part: usize) -> Option<&MemoryPart> {
        self.parts.get(part)
    }

    fn part_mut(&mut self, part: usize) -> ExrLayersResult<&mut MemoryPart> {
        self.parts
            .get_mut(part)
            .ok_or_else(|| ExrLayersError::logic(format!("part {part} does not exist")))
    }

    /// Replace the samples of an existing channel. The stored type follows the header.
    pub fn set_samples(
        &mut self,
        part: usize,
        name: &str,
        samples: SampleSlice<'_>,
    ) -> ExrLayersResult<()> {
        let part = self.part_mut(part)?;
        let dst = part
            .channels
            .get_mut(name)
            .ok_or_else(|| ExrLayersError::logic(format!("channel '{name}' is not in the part")))?;
        if dst.len() != samples.len() {
            return Err(ExrLayersError::logic(format!(
                "channel '{name}' expects {} samples, got {}",
                dst.len(),
                samples.len()
            )));
        }
        super::frame::convert_into(&mut dst.as_mut(), samples);
        Ok(())
    }

    pub fn samples(&self, part: usize, name: &str) -> Option<&PartSamples> {
        self.parts.get(part).and_then(|p| p.samples(name))
    }

    /// Make only the first `rows` scanlines of `part` readable, as a file cut short would be.
    pub fn truncate_part(&mut self, part: usize, rows: usize) -> ExrLayersResult<()> {
        self.part_mut(part)?.available_rows = Some(rows);
        Ok(())
    }
}

impl ExrInput for MemoryImage {
    fn parts(&self) -> usize {
        self.parts.len()
    }

    fn header(&self, part: usize) -> Option<&Header> {
        self.parts.get(part).map(|p| &p.header)
    }

    fn read_part_pixels(
        &mut self,
        part: usize,
        frame_buffer: &mut FrameBuffer<'_>,
        y0: i32,
        y1: i32,
    ) -> ExrLayersResult<()> {
        let src = self
            .parts
            .get(part)
            .ok_or_else(|| ExrLayersError::logic(format!("part {part} does not exist")))?;
        let dw = src.header.data_window;
        if y0 < dw.min_y || y1 > dw.max_y {
            return Err(ExrLayersError::logic(format!(
                "scanlines {y0}..={y1} outside part data window {}..={}",
                dw.min_y, dw.max_y
            )));
        }
        let width = dw.width();
        for y in y0..=y1 {
            let row = (i64::from(y) - i64::from(dw.min_y)) as usize;
            if src.available_rows.is_some_and(|n| row >= n) {
                return Err(ExrLayersError::io(format!(
                    "unexpected end of data at scanline {y}"
                )));
            }
            for entry in frame_buffer.entries_mut() {
                match src.channels.get(&entry.name) {
                    Some(samples) => {
                        let line = samples.as_slice().sub(row * width, (row + 1) * width);
                        entry.slice.store_row(y, dw.min_x, line)?;
                    }
                    None => entry.slice.fill_row(y, dw.min_x, width)?,
                }
            }
        }
        Ok(())
    }

    fn part_complete(&self, part: usize) -> bool {
        self.parts
            .get(part)
            .is_some_and(|p| p.available_rows.is_none_or(|n| n >= p.header.data_window.height()))
    }
}

impl ExrOutput for MemoryImage {
    fn begin(&mut self, header: &Header) -> ExrLayersResult<()> {
        if self.cursor.is_some() {
            return Err(ExrLayersError::logic("a part is already being written"));
        }
        let part = self.add_part(header.clone());
        self.cursor = Some(WriteCursor {
            part,
            next_row: header.data_window.min_y,
        });
        Ok(())
    }

    fn current_scanline(&self) -> i32 {
        self.cursor.map_or(0, |c| c.next_row)
    }

    fn write_pixels(
        &mut self,
        frame_buffer: &WriteFrameBuffer<'_>,
        rows: usize,
    ) -> ExrLayersResult<()> {
        let cursor = self
            .cursor
            .ok_or_else(|| ExrLayersError::logic("write_pixels called before begin"))?;
        let part = &mut self.parts[cursor.part];
        let dw = part.header.data_window;
        let width = dw.width();
        let last = i64::from(cursor.next_row) + rows as i64 - 1;
        if last > i64::from(dw.max_y) {
            return Err(ExrLayersError::logic(format!(
                "writing {rows} rows from scanline {} overruns the data window",
                cursor.next_row
            )));
        }
        for r in 0..rows {
            let y = cursor.next_row + r as i32;
            let row = (i64::from(y) - i64::from(dw.min_y)) as usize;
            for (name, samples) in part.channels.iter_mut() {
                let Some(slice) = frame_buffer.get(name) else {
                    continue;
                };
                let line = slice.row(y)?;
                let mut dst = samples.as_mut();
                let mut dst_row = match &mut dst {
                    SamplesMut::Half(v) => SamplesMut::Half(&mut v[row * width..(row + 1) * width]),
                    SamplesMut::Float(v) => {
                        SamplesMut::Float(&mut v[row * width..(row + 1) * width])
                    }
                    SamplesMut::Uint(v) => SamplesMut::Uint(&mut v[row * width..(row + 1) * width]),
                };
                super::frame::convert_into(&mut dst_row, line);
            }
        }
        self.cursor = Some(WriteCursor {
            next_row: cursor.next_row + rows as i32,
            ..cursor
        });
        Ok(())
    }

    fn finish(&mut self) -> ExrLayersResult<()> {
        let cursor = self
            .cursor
            .take()
            .ok_or_else(|| ExrLayersError::logic("finish called before begin"))?;
        let part = &mut self.parts[cursor.part];
        let written = i64::from(cursor.next_row) - i64::from(part.header.data_window.min_y);
        if (written as usize) < part.header.data_window.height() {
            part.available_rows = Some(written.max(0) as usize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Box2i;
    use crate::io::{Slice, WriteSlice};

    fn gradient_part() -> MemoryImage {
        let mut img = MemoryImage::new();
        let header = Header::new(Box2i::from_size(4, 4), Box2i::new(1, 1, 2, 2))
            .with_channel("R", PixelType::Half)
            .with_channel("id", PixelType::Uint);
        let p = img.add_part(header);
        img.set_samples(p, "R", SampleSlice::Float(&[0.0, 1.0, 2.0, 3.0]))
            .unwrap();
        img.set_samples(p, "id", SampleSlice::Uint(&[7, 8, 9, 10]))
            .unwrap();
        img
    }

    #[test]
    fn reads_convert_to_slice_type_and_fill_missing() {
        let mut img = gradient_part();
        let mut r = vec![0.0f32; 4];
        let mut g = vec![5.0f32; 4];
        {
            let mut fb = FrameBuffer::new();
            fb.insert("R", Slice::new(SamplesMut::Float(&mut r), 1, 1, 2));
            fb.insert(
                "G",
                Slice::new(SamplesMut::Float(&mut g), 1, 1, 2).with_fill(0.25),
            );
            img.read_part_pixels(0, &mut fb, 1, 2).unwrap();
        }
        assert_eq!(r, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(g, vec![0.25; 4]);
    }

    #[test]
    fn header_lookup_stops_at_the_last_part() {
        let img = gradient_part();
        assert_eq!(img.header(0).map(|h| h.data_window), Some(Box2i::new(1, 1, 2, 2)));
        assert!(img.header(1).is_none());
    }

    #[test]
    fn truncated_part_keeps_rows_before_the_cut() {
        let mut img = gradient_part();
        img.truncate_part(0, 1).unwrap();
        assert!(!img.part_complete(0));
        let mut id = vec![0u32; 4];
        let err = {
            let mut fb = FrameBuffer::new();
            fb.insert("id", Slice::new(SamplesMut::Uint(&mut id), 1, 1, 2));
            img.read_part_pixels(0, &mut fb, 1, 2).unwrap_err()
        };
        assert!(err.is_io());
        assert_eq!(id, vec![7, 8, 0, 0]);
    }

    #[test]
    fn written_rows_land_in_a_new_part() {
        let mut img = MemoryImage::new();
        let header = Header::with_size(2, 2).with_channel("Z", PixelType::Float);
        img.begin(&header).unwrap();
        let first = [1.0f32, 2.0];
        let mut fb = WriteFrameBuffer::new();
        fb.insert(
            "Z",
            WriteSlice {
                samples: SampleSlice::Float(&first),
                origin_y: 0,
                width: 2,
            },
        );
        img.write_pixels(&fb, 1).unwrap();
        assert_eq!(img.current_scanline(), 1);
        let second = [3.0f32, 4.0];
        let mut fb = WriteFrameBuffer::new();
        fb.insert(
            "Z",
            WriteSlice {
                samples: SampleSlice::Float(&second),
                origin_y: 1,
                width: 2,
            },
        );
        img.write_pixels(&fb, 1).unwrap();
        assert!(img.write_pixels(&fb, 1).is_err());
        img.finish().unwrap();
        assert!(img.part_complete(0));
        assert_eq!(
            img.samples(0, "Z"),
            Some(&PartSamples::Float(vec![1.0, 2.0, 3.0, 4.0]))
        );
    }
}
