use std::{fmt, sync::Arc};

use rayon::prelude::*;

use crate::foundation::core::AbortHandle;
use crate::foundation::error::{ExrLayersError, ExrLayersResult};

/// Thread-pool fan-out for per-row kernels over one buffer.
///
/// Rows are disjoint `width`-sized chunks, so kernels need no synchronisation. Every
/// dispatch blocks until all rows are done and polls the abort handle before and after.
#[derive(Clone)]
pub struct RowEngine {
    pool: Arc<rayon::ThreadPool>,
    abort: AbortHandle,
}

impl RowEngine {
    pub fn new(threads: Option<usize>, abort: AbortHandle) -> ExrLayersResult<Self> {
        Ok(Self {
            pool: Arc::new(build_thread_pool(threads)?),
            abort,
        })
    }

    pub fn abort(&self) -> &AbortHandle {
        &self.abort
    }

    pub fn query_abort(&self) -> ExrLayersResult<()> {
        self.abort.query()
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `kernel` to every row of `buf`.
    pub fn map_rows<T, K>(&self, buf: &mut [T], width: usize, kernel: K) -> ExrLayersResult<()>
    where
        T: Send,
        K: Fn(&mut [T]) + Send + Sync,
    {
        self.query_abort()?;
        if width == 0 {
            return Ok(());
        }
        self.pool
            .install(|| buf.par_chunks_mut(width).for_each(|row| kernel(row)));
        self.query_abort()
    }

    /// Apply `kernel` to every row of `buf` paired with the same row of `other`.
    pub fn map_rows_with<T, U, K>(
        &self,
        buf: &mut [T],
        other: &[U],
        width: usize,
        kernel: K,
    ) -> ExrLayersResult<()>
    where
        T: Send,
        U: Sync,
        K: Fn(&mut [T], &[U]) + Send + Sync,
    {
        if buf.len() != other.len() {
            return Err(ExrLayersError::logic(format!(
                "row kernel buffers differ in size ({} vs {})",
                buf.len(),
                other.len()
            )));
        }
        self.query_abort()?;
        if width == 0 {
            return Ok(());
        }
        self.pool.install(|| {
            buf.par_chunks_mut(width)
                .zip(other.par_chunks(width))
                .for_each(|(row, other_row)| kernel(row, other_row))
        });
        self.query_abort()
    }
}

impl fmt::Debug for RowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowEngine")
            .field("threads", &self.threads())
            .field("abort", &self.abort)
            .finish()
    }
}

fn build_thread_pool(threads: Option<usize>) -> ExrLayersResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(ExrLayersError::logic(
            "row engine 'threads' must be >= 1 when set",
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| ExrLayersError::logic(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;
    use crate::rows::kernels::premultiply_row;

    #[test]
    fn zero_threads_is_rejected() {
        assert!(RowEngine::new(Some(0), AbortHandle::never()).is_err());
    }

    #[test]
    fn map_rows_touches_every_row() {
        let engine = RowEngine::new(Some(2), AbortHandle::never()).unwrap();
        let mut buf: Vec<f32> = (0..12).map(|i| i as f32).collect();
        engine
            .map_rows(&mut buf, 4, |row| {
                for v in row {
                    *v *= 2.0;
                }
            })
            .unwrap();
        assert_eq!(buf[11], 22.0);
        assert_eq!(buf[0], 0.0);
    }

    #[test]
    fn map_rows_with_pairs_rows() {
        let engine = RowEngine::new(Some(3), AbortHandle::never()).unwrap();
        let mut color = vec![1.0f32; 6];
        let alpha = vec![0.5f32, 0.5, 0.5, 0.25, 0.25, 0.25];
        engine
            .map_rows_with(&mut color, &alpha, 3, premultiply_row)
            .unwrap();
        assert_eq!(color, vec![0.5, 0.5, 0.5, 0.25, 0.25, 0.25]);
    }

    #[test]
    fn mismatched_buffers_are_a_logic_error() {
        let engine = RowEngine::new(Some(1), AbortHandle::never()).unwrap();
        let mut color = vec![1.0f32; 6];
        let err = engine
            .map_rows_with(&mut color, &[1.0f32; 3], 3, premultiply_row)
            .unwrap_err();
        assert!(matches!(err, ExrLayersError::Logic(_)));
    }

    #[test]
    fn abort_is_polled_before_dispatch() {
        let flag = Arc::new(AtomicBool::new(true));
        let engine = RowEngine::new(Some(1), AbortHandle::from_flag(flag.clone())).unwrap();
        let mut buf = vec![1.0f32; 4];
        let err = engine.map_rows(&mut buf, 2, |row| row.fill(0.0)).unwrap_err();
        assert!(err.is_abort());
        assert_eq!(buf, vec![1.0; 4]);
        flag.store(false, Ordering::Relaxed);
        engine.map_rows(&mut buf, 2, |row| row.fill(0.0)).unwrap();
        assert_eq!(buf, vec![0.0; 4]);
    }
}
