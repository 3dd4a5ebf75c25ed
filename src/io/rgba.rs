use half::f16;

use super::{ExrInput, FrameBuffer, SamplesMut, Slice};
use crate::foundation::core::{Box2i, try_alloc};
use crate::foundation::error::{ExrLayersError, ExrLayersResult};

/// Rec.709 luminance weights.
const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

/// Four planar half-precision planes covering `data_window`.
#[derive(Clone, Debug)]
pub struct RgbaBuffer {
    pub data_window: Box2i,
    pub r: Vec<f16>,
    pub g: Vec<f16>,
    pub b: Vec<f16>,
    pub a: Vec<f16>,
}

impl RgbaBuffer {
    pub fn new(data_window: Box2i) -> ExrLayersResult<Self> {
        let len = data_window
            .width()
            .checked_mul(data_window.height())
            .ok_or_else(|| ExrLayersError::out_of_memory(u64::MAX))?;
        Ok(Self {
            data_window,
            r: try_alloc(len, f16::ZERO)?,
            g: try_alloc(len, f16::ZERO)?,
            b: try_alloc(len, f16::ZERO)?,
            a: try_alloc(len, f16::ONE)?,
        })
    }

    pub fn width(&self) -> usize {
        self.data_window.width()
    }

    pub fn height(&self) -> usize {
        self.data_window.height()
    }
}

/// Reconstruct RGB from luminance and the two chroma differences.
pub fn yca_to_rgb(y: f32, ry: f32, by: f32) -> (f32, f32, f32) {
    let r = (ry + 1.0) * y;
    let b = (by + 1.0) * y;
    let g = (y - r * LUMA_R - b * LUMA_B) / LUMA_G;
    (r, g, b)
}

pub(crate) fn read_rgba_from_part<I: ExrInput + ?Sized>(
    input: &mut I,
    y0: i32,
    y1: i32,
    out: &mut RgbaBuffer,
) -> ExrLayersResult<()> {
    let header = input
        .header(0)
        .ok_or_else(|| ExrLayersError::logic("file has no parts"))?;
    let part_window = header.data_window;
    let has = |name: &str| header.channel(name).is_some();
    let rgb = has("R") || has("G") || has("B");
    let luma = !rgb && (has("Y") || has("RY") || has("BY"));
    let chroma = luma && (has("RY") || has("BY"));

    let y0 = y0.max(part_window.min_y).max(out.data_window.min_y);
    let y1 = y1.min(part_window.max_y).min(out.data_window.max_y);
    if y1 < y0 {
        return Ok(());
    }

    let width = out.width();
    let rows = (i64::from(y1) - i64::from(y0) + 1) as usize;
    let len = width * rows;
    let mut p0 = try_alloc(len, f16::ZERO)?;
    let mut p1 = try_alloc(len, f16::ZERO)?;
    let mut p2 = try_alloc(len, f16::ZERO)?;
    let mut pa = try_alloc(len, f16::ONE)?;

    let names: [&str; 3] = if luma { ["Y", "RY", "BY"] } else { ["R", "G", "B"] };
    let origin_x = out.data_window.min_x;
    let result = {
        let mut fb = FrameBuffer::new();
        fb.insert(names[0], Slice::new(SamplesMut::Half(&mut p0), origin_x, y0, width));
        fb.insert(names[1], Slice::new(SamplesMut::Half(&mut p1), origin_x, y0, width));
        fb.insert(names[2], Slice::new(SamplesMut::Half(&mut p2), origin_x, y0, width));
        fb.insert(
            "A",
            Slice::new(SamplesMut::Half(&mut pa), origin_x, y0, width).with_fill(1.0),
        );
        input.read_part_pixels(0, &mut fb, y0, y1)
    };

    let first = (i64::from(y0) - i64::from(out.data_window.min_y)) as usize * width;
    for i in 0..len {
        let (r, g, b) = if chroma {
            let (r, g, b) = yca_to_rgb(p0[i].to_f32(), p1[i].to_f32(), p2[i].to_f32());
            (f16::from_f32(r), f16::from_f32(g), f16::from_f32(b))
        } else if luma {
            (p0[i], p0[i], p0[i])
        } else {
            (p0[i], p1[i], p2[i])
        };
        out.r[first + i] = r;
        out.g[first + i] = g;
        out.b[first + i] = b;
        out.a[first + i] = pa[i];
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_reconstructs_grey() {
        let (r, g, b) = yca_to_rgb(0.5, 0.0, 0.0);
        assert!((r - 0.5).abs() < 1e-6);
        assert!((g - 0.5).abs() < 1e-6);
        assert!((b - 0.5).abs() < 1e-6);
    }

    #[test]
    fn chroma_offsets_scale_luminance() {
        let (r, _, b) = yca_to_rgb(0.4, 0.5, -0.5);
        assert!((r - 0.6).abs() < 1e-6);
        assert!((b - 0.2).abs() < 1e-6);
    }

    #[test]
    fn new_buffer_is_opaque_black() {
        let buf = RgbaBuffer::new(Box2i::from_size(2, 3)).unwrap();
        assert_eq!(buf.r.len(), 6);
        assert!(buf.a.iter().all(|a| *a == f16::ONE));
        assert!(buf.g.iter().all(|g| *g == f16::ZERO));
    }
}
