use crate::foundation::core::try_alloc;
use crate::foundation::error::{ExrLayersError, ExrLayersResult};

/// Host callback producing scanlines for a channel on the write path.
///
/// `y0` is the first requested row, counted from the top of the data window; `out` holds
/// `out.len() / width` rows. Implementations must be able to produce the same rows again
/// after the document has released its buffers.
pub trait PixelSource: Send {
    fn fill_rows(&mut self, y0: usize, width: usize, out: &mut [f32]) -> ExrLayersResult<()>;

    /// UINT channels; the default routes through [`PixelSource::fill_rows`] and truncates.
    fn fill_uint_rows(&mut self, y0: usize, width: usize, out: &mut [u32]) -> ExrLayersResult<()> {
        let mut tmp = try_alloc(out.len(), 0.0f32)?;
        self.fill_rows(y0, width, &mut tmp)?;
        for (o, v) in out.iter_mut().zip(tmp) {
            *o = v as u32;
        }
        Ok(())
    }
}

impl<F> PixelSource for F
where
    F: FnMut(usize, usize, &mut [f32]) -> ExrLayersResult<()> + Send,
{
    fn fill_rows(&mut self, y0: usize, width: usize, out: &mut [f32]) -> ExrLayersResult<()> {
        self(y0, width, out)
    }
}

/// Source backed by a complete host-owned plane.
#[derive(Clone, Debug)]
pub struct PlaneSource {
    samples: Vec<f32>,
}

impl PlaneSource {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }
}

impl PixelSource for PlaneSource {
    fn fill_rows(&mut self, y0: usize, width: usize, out: &mut [f32]) -> ExrLayersResult<()> {
        let start = y0 * width;
        let end = start + out.len();
        let src = self.samples.get(start..end).ok_or_else(|| {
            ExrLayersError::logic(format!(
                "plane source has {} samples, rows {start}..{end} requested",
                self.samples.len()
            ))
        })?;
        out.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_sources() {
        let mut calls = 0;
        let mut src = |y0: usize, width: usize, out: &mut [f32]| -> ExrLayersResult<()> {
            calls += 1;
            for (i, v) in out.iter_mut().enumerate() {
                *v = (y0 * width + i) as f32;
            }
            Ok(())
        };
        let mut out = [0.0f32; 4];
        src.fill_rows(2, 2, &mut out).unwrap();
        assert_eq!(out, [4.0, 5.0, 6.0, 7.0]);
        let mut ids = [0u32; 2];
        src.fill_uint_rows(0, 2, &mut ids).unwrap();
        assert_eq!(ids, [0, 1]);
        drop(src);
        assert_eq!(calls, 2);
    }

    #[test]
    fn plane_source_rejects_rows_past_the_end() {
        let mut src = PlaneSource::new(vec![1.0; 4]);
        let mut out = [0.0f32; 2];
        src.fill_rows(1, 2, &mut out).unwrap();
        assert!(src.fill_rows(2, 2, &mut out).is_err());
    }
}
