use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::foundation::error::{ExrLayersError, ExrLayersResult};

/// Storage type of one channel as declared in an EXR channel list.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum PixelType {
    /// 32-bit unsigned integer (ID / index data).
    Uint,
    /// 16-bit float.
    #[default]
    Half,
    /// 32-bit float.
    Float,
}

impl PixelType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            PixelType::Uint | PixelType::Float => 4,
            PixelType::Half => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelType::Uint => "UINT",
            PixelType::Half => "HALF",
            PixelType::Float => "FLOAT",
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive integer box, the EXR data/display window convention.
///
/// The empty box has `min > max` on both axes; [`Box2i::extend_by`] treats it as the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Box2i {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Box2i {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Box anchored at the origin covering `width x height` pixels.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32 - 1, height as i32 - 1)
    }

    pub fn empty() -> Self {
        Self::new(i32::MAX, i32::MAX, i32::MIN, i32::MIN)
    }

    pub fn is_empty(self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    pub fn width(self) -> usize {
        if self.is_empty() {
            0
        } else {
            (i64::from(self.max_x) - i64::from(self.min_x) + 1) as usize
        }
    }

    pub fn height(self) -> usize {
        if self.is_empty() {
            0
        } else {
            (i64::from(self.max_y) - i64::from(self.min_y) + 1) as usize
        }
    }

    /// Smallest box holding both `self` and `other`.
    pub fn extend_by(self, other: Box2i) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        Self::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn contains_row(self, y: i32) -> bool {
        self.min_y <= y && y <= self.max_y
    }
}

/// Bytes of `planes` planes of `width x height` samples. A product that does not fit in
/// `u64` is reported as an allocation failure.
pub fn plane_bytes(
    width: usize,
    height: usize,
    planes: u64,
    bytes_per_sample: u64,
) -> ExrLayersResult<u64> {
    u64::try_from(width)
        .ok()
        .zip(u64::try_from(height).ok())
        .and_then(|(w, h)| w.checked_mul(h))
        .and_then(|n| n.checked_mul(planes))
        .and_then(|n| n.checked_mul(bytes_per_sample))
        .ok_or_else(|| ExrLayersError::out_of_memory(u64::MAX))
}

/// Allocate `len` copies of `value` without aborting the process on allocator refusal.
pub fn try_alloc<T: Clone>(len: usize, value: T) -> ExrLayersResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| {
        ExrLayersError::out_of_memory((len as u64).saturating_mul(std::mem::size_of::<T>() as u64))
    })?;
    v.resize(len, value);
    Ok(v)
}

/// Cooperative cancellation poller supplied by the host.
///
/// Documents poll it between row blocks of I/O and around every row-task dispatch.
#[derive(Clone, Default)]
pub struct AbortHandle {
    poll: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl AbortHandle {
    /// A handle that never requests an abort.
    pub fn never() -> Self {
        Self { poll: None }
    }

    pub fn new(poll: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            poll: Some(Arc::new(poll)),
        }
    }

    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self::new(move || flag.load(Ordering::Relaxed))
    }

    /// Return [`ExrLayersError::Aborted`] when the host asked to stop.
    pub fn query(&self) -> ExrLayersResult<()> {
        match &self.poll {
            Some(poll) if poll() => Err(ExrLayersError::Aborted),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("installed", &self.poll.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_dimensions_are_inclusive() {
        let b = Box2i::new(-2, 3, 5, 10);
        assert_eq!(b.width(), 8);
        assert_eq!(b.height(), 8);
        assert_eq!(Box2i::from_size(4, 2), Box2i::new(0, 0, 3, 1));
    }

    #[test]
    fn empty_box_is_identity_for_extend() {
        let b = Box2i::new(0, 0, 9, 9);
        assert!(Box2i::empty().is_empty());
        assert_eq!(Box2i::empty().width(), 0);
        assert_eq!(Box2i::empty().extend_by(b), b);
        assert_eq!(b.extend_by(Box2i::empty()), b);
        assert_eq!(
            b.extend_by(Box2i::new(5, -4, 20, 3)),
            Box2i::new(0, -4, 20, 9)
        );
    }

    #[test]
    fn abort_handle_reports_flag_state() {
        let flag = Arc::new(AtomicBool::new(false));
        let abort = AbortHandle::from_flag(flag.clone());
        assert!(abort.query().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(abort.query().unwrap_err().is_abort());
        assert!(AbortHandle::never().query().is_ok());
    }

    #[test]
    fn plane_bytes_reports_overflow_as_out_of_memory() {
        assert_eq!(plane_bytes(4, 3, 4, 2).unwrap(), 96);
        assert_eq!(plane_bytes(0, 3, 4, 2).unwrap(), 0);
        let err = plane_bytes(usize::MAX, usize::MAX, 4, 2).unwrap_err();
        assert!(err.is_out_of_memory());
        assert!(plane_bytes(1 << 31, 1 << 31, 4, 2).is_ok());
        assert!(plane_bytes(1 << 32, 1 << 32, 4, 2).is_err());
    }

    #[test]
    fn try_alloc_refuses_absurd_requests() {
        assert_eq!(try_alloc(3, 1.5f32).unwrap(), vec![1.5; 3]);
        let err = try_alloc(usize::MAX / 2, 0u32).unwrap_err();
        assert!(err.is_out_of_memory());
    }
}
