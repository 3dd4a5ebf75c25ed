use half::f16;

use crate::foundation::core::PixelType;
use crate::foundation::error::{ExrLayersError, ExrLayersResult};

/// Borrowed, read-only run of samples in any of the three storage types.
#[derive(Clone, Copy, Debug)]
pub enum SampleSlice<'a> {
    Half(&'a [f16]),
    Float(&'a [f32]),
    Uint(&'a [u32]),
}

impl<'a> SampleSlice<'a> {
    pub fn pixel_type(&self) -> PixelType {
        match self {
            SampleSlice::Half(_) => PixelType::Half,
            SampleSlice::Float(_) => PixelType::Float,
            SampleSlice::Uint(_) => PixelType::Uint,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleSlice::Half(s) => s.len(),
            SampleSlice::Float(s) => s.len(),
            SampleSlice::Uint(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sub(&self, start: usize, end: usize) -> SampleSlice<'a> {
        match *self {
            SampleSlice::Half(s) => SampleSlice::Half(&s[start..end]),
            SampleSlice::Float(s) => SampleSlice::Float(&s[start..end]),
            SampleSlice::Uint(s) => SampleSlice::Uint(&s[start..end]),
        }
    }
}

/// Borrowed, writable run of samples.
#[derive(Debug)]
pub enum SamplesMut<'a> {
    Half(&'a mut [f16]),
    Float(&'a mut [f32]),
    Uint(&'a mut [u32]),
}

impl SamplesMut<'_> {
    pub fn pixel_type(&self) -> PixelType {
        match self {
            SamplesMut::Half(_) => PixelType::Half,
            SamplesMut::Float(_) => PixelType::Float,
            SamplesMut::Uint(_) => PixelType::Uint,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SamplesMut::Half(s) => s.len(),
            SamplesMut::Float(s) => s.len(),
            SamplesMut::Uint(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Copy `src` into `dst`, converting between storage types.
///
/// Float to uint conversion saturates; NaN becomes 0.
pub fn convert_into(dst: &mut SamplesMut<'_>, src: SampleSlice<'_>) {
    match (dst, src) {
        (SamplesMut::Half(d), SampleSlice::Half(s)) => d.copy_from_slice(s),
        (SamplesMut::Half(d), SampleSlice::Float(s)) => {
            for (d, &s) in d.iter_mut().zip(s) {
                *d = f16::from_f32(s);
            }
        }
        (SamplesMut::Half(d), SampleSlice::Uint(s)) => {
            for (d, &s) in d.iter_mut().zip(s) {
                *d = f16::from_f32(s as f32);
            }
        }
        (SamplesMut::Float(d), SampleSlice::Half(s)) => {
            for (d, &s) in d.iter_mut().zip(s) {
                *d = s.to_f32();
            }
        }
        (SamplesMut::Float(d), SampleSlice::Float(s)) => d.copy_from_slice(s),
        (SamplesMut::Float(d), SampleSlice::Uint(s)) => {
            for (d, &s) in d.iter_mut().zip(s) {
                *d = s as f32;
            }
        }
        (SamplesMut::Uint(d), SampleSlice::Half(s)) => {
            for (d, &s) in d.iter_mut().zip(s) {
                *d = s.to_f32() as u32;
            }
        }
        (SamplesMut::Uint(d), SampleSlice::Float(s)) => {
            for (d, &s) in d.iter_mut().zip(s) {
                *d = s as u32;
            }
        }
        (SamplesMut::Uint(d), SampleSlice::Uint(s)) => d.copy_from_slice(s),
    }
}

/// Destination plane for one channel of a scanline read.
///
/// `samples` holds rows of `width` pixels; buffer row 0 is scanline `origin_y` and buffer
/// column 0 is pixel `origin_x`. Rows the file does not cover are left alone; channels the
/// file does not have are filled with `fill`.
#[derive(Debug)]
pub struct Slice<'a> {
    pub samples: SamplesMut<'a>,
    pub origin_x: i32,
    pub origin_y: i32,
    pub width: usize,
    pub fill: f32,
}

impl<'a> Slice<'a> {
    pub fn new(samples: SamplesMut<'a>, origin_x: i32, origin_y: i32, width: usize) -> Self {
        Self {
            samples,
            origin_x,
            origin_y,
            width,
            fill: 0.0,
        }
    }

    pub fn with_fill(mut self, fill: f32) -> Self {
        self.fill = fill;
        self
    }

    fn span(&self, y: i32, x0: i32, count: usize) -> ExrLayersResult<(usize, usize)> {
        let row = i64::from(y) - i64::from(self.origin_y);
        let col = i64::from(x0) - i64::from(self.origin_x);
        if row < 0 || col < 0 || col as usize + count > self.width {
            return Err(ExrLayersError::logic(format!(
                "scanline {y} (x {x0}, {count} px) lies outside the frame buffer slice"
            )));
        }
        let start = row as usize * self.width + col as usize;
        let end = start + count;
        if end > self.samples.len() {
            return Err(ExrLayersError::logic(format!(
                "scanline {y} lies past the end of the frame buffer slice"
            )));
        }
        Ok((start, end))
    }

    /// Store one file row beginning at pixel `x0` of scanline `y`.
    pub fn store_row(&mut self, y: i32, x0: i32, row: SampleSlice<'_>) -> ExrLayersResult<()> {
        let (start, end) = self.span(y, x0, row.len())?;
        let mut dst = match &mut self.samples {
            SamplesMut::Half(s) => SamplesMut::Half(&mut s[start..end]),
            SamplesMut::Float(s) => SamplesMut::Float(&mut s[start..end]),
            SamplesMut::Uint(s) => SamplesMut::Uint(&mut s[start..end]),
        };
        convert_into(&mut dst, row);
        Ok(())
    }

    pub fn fill_row(&mut self, y: i32, x0: i32, count: usize) -> ExrLayersResult<()> {
        let (start, end) = self.span(y, x0, count)?;
        let fill = self.fill;
        match &mut self.samples {
            SamplesMut::Half(s) => s[start..end].fill(f16::from_f32(fill)),
            SamplesMut::Float(s) => s[start..end].fill(fill),
            SamplesMut::Uint(s) => s[start..end].fill(fill as u32),
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FrameBufferEntry<'a> {
    pub name: String,
    pub slice: Slice<'a>,
}

/// Channel name to destination slice mapping handed to a scanline reader.
#[derive(Debug, Default)]
pub struct FrameBuffer<'a> {
    entries: Vec<FrameBufferEntry<'a>>,
}

impl<'a> FrameBuffer<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace the slice for `name`.
    pub fn insert(&mut self, name: impl Into<String>, slice: Slice<'a>) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.slice = slice;
        } else {
            self.entries.push(FrameBufferEntry { name, slice });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Slice<'a>> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .map(|e| &mut e.slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut FrameBufferEntry<'a>> {
        self.entries.iter_mut()
    }

    pub fn into_entries(self) -> Vec<FrameBufferEntry<'a>> {
        self.entries
    }

    pub fn from_entries(entries: Vec<FrameBufferEntry<'a>>) -> Self {
        Self { entries }
    }
}

/// Source plane for one channel of a scanline write. Buffer row 0 is scanline `origin_y`.
#[derive(Clone, Copy, Debug)]
pub struct WriteSlice<'a> {
    pub samples: SampleSlice<'a>,
    pub origin_y: i32,
    pub width: usize,
}

impl<'a> WriteSlice<'a> {
    pub fn row(&self, y: i32) -> ExrLayersResult<SampleSlice<'a>> {
        let row = i64::from(y) - i64::from(self.origin_y);
        let start = usize::try_from(row)
            .map_err(|_| ExrLayersError::logic(format!("scanline {y} precedes the write slice")))?
            * self.width;
        let end = start + self.width;
        if end > self.samples.len() {
            return Err(ExrLayersError::logic(format!(
                "scanline {y} lies past the end of the write slice"
            )));
        }
        Ok(self.samples.sub(start, end))
    }
}

#[derive(Clone, Debug, Default)]
pub struct WriteFrameBuffer<'a> {
    entries: Vec<(String, WriteSlice<'a>)>,
}

impl<'a> WriteFrameBuffer<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, slice: WriteSlice<'a>) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = slice;
        } else {
            self.entries.push((name, slice));
        }
    }

    pub fn get(&self, name: &str) -> Option<&WriteSlice<'a>> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
