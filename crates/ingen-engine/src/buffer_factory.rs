//! Pooled buffer allocation.
//!
//! The [`BufferFactory`] hands out [`BufferRef`]s keyed by
//! (type, capacity), reusing recycled buffers when one is available.
//! All allocation happens on the non-realtime side (events acquire their
//! buffers during pre-processing); the audio thread only ever touches
//! buffers that already exist.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferRef, BufferType, EventType};

/// Default byte capacity for sequence buffers.
pub const DEFAULT_SEQUENCE_CAPACITY: usize = 4096;

/// A pool of recyclable buffers keyed by (type, capacity).
pub struct BufferFactory {
    free: Mutex<HashMap<(BufferType, usize), Vec<BufferRef>>>,
    audio_capacity: AtomicUsize,
    sequence_capacity: usize,
}

impl BufferFactory {
    /// Creates a factory whose audio/CV buffers hold `block_size` frames.
    pub fn new(block_size: usize) -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
            audio_capacity: AtomicUsize::new(block_size),
            sequence_capacity: DEFAULT_SEQUENCE_CAPACITY,
        }
    }

    /// Frames per audio/CV buffer.
    pub fn audio_capacity(&self) -> usize {
        self.audio_capacity.load(Ordering::Acquire)
    }

    /// Changes the audio/CV frame capacity for buffers handed out from
    /// now on (engine activation with a new block size).
    pub fn set_audio_capacity(&self, block_size: usize) {
        self.audio_capacity.store(block_size, Ordering::Release);
    }

    /// The default capacity for `btype`: `block_size` frames for
    /// audio/CV, one scalar for control, the sequence byte budget
    /// otherwise.
    pub fn default_capacity(&self, btype: BufferType) -> usize {
        match btype {
            BufferType::Audio | BufferType::Cv => self.audio_capacity(),
            BufferType::Control => 1,
            BufferType::Sequence => self.sequence_capacity,
        }
    }

    /// Returns a buffer of the requested type and capacity, recycled if
    /// one is pooled, freshly allocated otherwise.
    pub fn get(
        &self,
        btype: BufferType,
        value_type: Option<EventType>,
        capacity: usize,
    ) -> BufferRef {
        let recycled = self.free.lock().get_mut(&(btype, capacity)).and_then(Vec::pop);
        match recycled {
            Some(buf) => {
                let b = buf.get_mut();
                *b = Buffer::new(btype, value_type, capacity);
                buf
            }
            None => BufferRef::new(Buffer::new(btype, value_type, capacity)),
        }
    }

    /// Returns a buffer with the factory's default capacity for `btype`.
    pub fn get_default(&self, btype: BufferType, value_type: Option<EventType>) -> BufferRef {
        self.get(btype, value_type, self.default_capacity(btype))
    }

    /// Returns a buffer to the pool.
    ///
    /// Only buffers whose last holder released them are pooled; refs that
    /// are still shared are simply dropped.
    pub fn recycle(&self, buf: BufferRef) {
        let key = {
            let b = buf.get();
            (b.buffer_type(), b.capacity())
        };
        match buf.try_unwrap() {
            Ok(mut buffer) => {
                buffer.clear();
                self.free
                    .lock()
                    .entry(key)
                    .or_default()
                    .push(BufferRef::new(buffer));
            }
            Err(_still_shared) => {}
        }
    }

    /// Number of pooled (free) buffers, across all keys.
    pub fn free_count(&self) -> usize {
        self.free.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_reuses_recycled_buffer() {
        let factory = BufferFactory::new(64);
        let a = factory.get(BufferType::Audio, None, 64);
        factory.recycle(a);
        assert_eq!(factory.free_count(), 1);
        let _b = factory.get(BufferType::Audio, None, 64);
        assert_eq!(factory.free_count(), 0);
    }

    #[test]
    fn recycle_keeps_shared_buffers_out_of_pool() {
        let factory = BufferFactory::new(64);
        let a = factory.get(BufferType::Audio, None, 64);
        let still_held = a.clone();
        factory.recycle(a);
        assert_eq!(factory.free_count(), 0);
        drop(still_held);
    }

    #[test]
    fn recycled_buffers_come_back_clean() {
        let factory = BufferFactory::new(8);
        let a = factory.get(BufferType::Audio, None, 8);
        a.get_mut().set_from(1.0, 0);
        factory.recycle(a);
        let b = factory.get(BufferType::Audio, None, 8);
        assert!(b.get().samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn capacity_mismatch_allocates_fresh() {
        let factory = BufferFactory::new(64);
        let a = factory.get(BufferType::Audio, None, 64);
        factory.recycle(a);
        let b = factory.get(BufferType::Audio, None, 128);
        assert_eq!(b.get().capacity(), 128);
        assert_eq!(factory.free_count(), 1);
    }

    #[test]
    fn default_capacities_per_type() {
        let factory = BufferFactory::new(256);
        assert_eq!(factory.default_capacity(BufferType::Audio), 256);
        assert_eq!(factory.default_capacity(BufferType::Cv), 256);
        assert_eq!(factory.default_capacity(BufferType::Control), 1);
        assert_eq!(
            factory.default_capacity(BufferType::Sequence),
            DEFAULT_SEQUENCE_CAPACITY
        );
    }
}
