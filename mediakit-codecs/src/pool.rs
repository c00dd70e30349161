//! Recycling frame pools
//!
//! A [`FramePool`] keeps a bounded free-list of frames allocated to one shape.
//! `get` hands out a recycled frame when one is free and allocates a fresh one
//! otherwise, so it never fails. `put` takes a frame back only if it was handed
//! out by the same pool and the free-list has room; anything else is dropped.
//!
//! ```
//! use mediakit_codecs::{PixelFormat, VideoFramePool, VideoShape};
//!
//! let pool = VideoFramePool::new(VideoShape::new(640, 480, PixelFormat::I420), 4);
//! let mut frame = pool.get();
//! frame.timestamp = 3000;
//! assert!(pool.put(frame));
//! assert_eq!(pool.get().timestamp, 0);
//! ```
//!
//! The pool lock only guards the free-list; it is never held while a codec
//! runs.

use crate::frame::{AudioFrame, PixelFormat, SampleFormat, VideoFrame};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a pool, stamped on every frame it hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// A frame type a [`FramePool`] can allocate and recycle.
pub trait PoolFrame: Send + Sized {
    /// Parameters every frame of a pool is allocated to.
    type Shape: Clone + fmt::Debug + Send + Sync;

    fn allocate(shape: &Self::Shape) -> Self;

    fn pool_id(&self) -> Option<PoolId>;

    fn set_pool_id(&mut self, id: Option<PoolId>);

    /// Restore layout metadata to `shape` and clear timestamp/keyframe.
    /// Pixel or sample contents are left as they are.
    fn reset(&mut self, shape: &Self::Shape);
}

/// Statistics about pool usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Maximum frames kept on the free-list.
    pub capacity: usize,
    /// Frames currently on the free-list.
    pub available: usize,
    /// Total `get` calls.
    pub gets: u64,
    /// `get` calls served from the free-list.
    pub reused: u64,
    /// Frames allocated, including pre-warmed ones.
    pub allocated: u64,
    /// Frames accepted back by `put`.
    pub returned: u64,
    /// Frames `put` refused (foreign pool or full free-list).
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    reused: AtomicU64,
    allocated: AtomicU64,
    returned: AtomicU64,
    rejected: AtomicU64,
}

/// Bounded free-list of frames of one shape.
pub struct FramePool<F: PoolFrame> {
    id: PoolId,
    shape: F::Shape,
    capacity: usize,
    free: Mutex<Vec<F>>,
    counters: Counters,
}

impl<F: PoolFrame> FramePool<F> {
    /// Create a pool pre-warmed with `capacity` frames.
    pub fn new(shape: F::Shape, capacity: usize) -> Self {
        Self::with_prewarm(shape, capacity, capacity)
    }

    /// Create a pool pre-warmed with `min(prewarm, capacity)` frames.
    pub fn with_prewarm(shape: F::Shape, capacity: usize, prewarm: usize) -> Self {
        let pool = Self {
            id: PoolId::next(),
            shape,
            capacity,
            free: Mutex::new(Vec::with_capacity(capacity)),
            counters: Counters::default(),
        };
        {
            let mut free = pool.free.lock();
            for _ in 0..prewarm.min(capacity) {
                free.push(pool.allocate());
            }
        }
        tracing::debug!(
            pool = %pool.id,
            shape = ?pool.shape,
            capacity,
            "Frame pool created"
        );
        pool
    }

    fn allocate(&self) -> F {
        let mut frame = F::allocate(&self.shape);
        frame.set_pool_id(Some(self.id));
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        frame
    }

    /// Take a frame, recycled if possible. Timestamp and keyframe flag are reset.
    pub fn get(&self) -> F {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let recycled = self.free.lock().pop();
        match recycled {
            Some(mut frame) => {
                self.counters.reused.fetch_add(1, Ordering::Relaxed);
                frame.reset(&self.shape);
                frame
            }
            None => {
                tracing::trace!(pool = %self.id, "Frame pool exhausted, allocating");
                self.allocate()
            }
        }
    }

    /// Return a frame. Returns `true` if it was kept for reuse.
    pub fn put(&self, frame: F) -> bool {
        if frame.pool_id() != Some(self.id) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(pool = %self.id, owner = ?frame.pool_id(), "Rejected foreign frame");
            return false;
        }
        let mut free = self.free.lock();
        if free.len() >= self.capacity {
            drop(free);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        free.push(frame);
        self.counters.returned.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn shape(&self) -> &F::Shape {
        &self.shape
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently on the free-list.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            available: self.available(),
            gets: self.counters.gets.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            allocated: self.counters.allocated.load(Ordering::Relaxed),
            returned: self.counters.returned.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

impl<F: PoolFrame> fmt::Debug for FramePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// Shape of frames in a [`VideoFramePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoShape {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl VideoShape {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }
}

impl PoolFrame for VideoFrame {
    type Shape = VideoShape;

    fn allocate(shape: &VideoShape) -> Self {
        VideoFrame::new(shape.width, shape.height, shape.format)
    }

    fn pool_id(&self) -> Option<PoolId> {
        VideoFrame::pool_id(self)
    }

    fn set_pool_id(&mut self, id: Option<PoolId>) {
        VideoFrame::set_pool_id(self, id);
    }

    fn reset(&mut self, shape: &VideoShape) {
        // A decode may have rewritten the layout; buffers are still sized for
        // the pool shape because they were allocated to it.
        let count = shape.format.plane_count();
        self.width = shape.width;
        self.height = shape.height;
        self.format = shape.format;
        self.planes.truncate(count);
        self.strides.truncate(count);
        for (plane, stride) in self.strides.iter_mut().enumerate() {
            *stride = shape.format.row_bytes(plane, shape.width);
        }
        self.timestamp = 0;
        self.keyframe = false;
    }
}

/// Shape of frames in an [`AudioFramePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioShape {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub samples_per_channel: usize,
}

impl AudioShape {
    pub fn new(
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
        samples_per_channel: usize,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            format,
            samples_per_channel,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.samples_per_channel * usize::from(self.channels) * self.format.bytes_per_sample()
    }
}

impl PoolFrame for AudioFrame {
    type Shape = AudioShape;

    fn allocate(shape: &AudioShape) -> Self {
        AudioFrame::new(
            shape.sample_rate,
            shape.channels,
            shape.format,
            shape.samples_per_channel,
        )
    }

    fn pool_id(&self) -> Option<PoolId> {
        AudioFrame::pool_id(self)
    }

    fn set_pool_id(&mut self, id: Option<PoolId>) {
        AudioFrame::set_pool_id(self, id);
    }

    fn reset(&mut self, shape: &AudioShape) {
        // Decoding truncates to the decoded sample count; capacity is kept, so
        // growing back to the shape does not reallocate.
        self.data.resize(shape.byte_len(), 0);
        self.sample_rate = shape.sample_rate;
        self.channels = shape.channels;
        self.format = shape.format;
        self.samples_per_channel = shape.samples_per_channel;
        self.timestamp = 0;
    }
}

/// Pool of raw video frames.
pub type VideoFramePool = FramePool<VideoFrame>;

/// Pool of raw audio frames.
pub type AudioFramePool = FramePool<AudioFrame>;
