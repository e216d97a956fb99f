//! Process-wide scratch pools for payload buffers and flate codecs.
//!
//! Pools are a throughput optimization only: every `get` behaves exactly like
//! a fresh allocation, and nothing observable depends on an object having
//! been pooled. All pools are safe for concurrent use and never suspend.

use std::sync::{Mutex, OnceLock};

use bytes::BytesMut;

use crate::deflate::{FlateDecoder, FlateEncoder};

/// Size classes for the fixed slice pool. Requests larger than the biggest
/// class bypass the pool.
const SLICE_CLASSES: [usize; 8] = [512, 1024, 2048, 4096, 8192, 16_384, 32_768, 65_536];

/// Retained entries per slice class / pool free list.
const PER_CLASS_CAP: usize = 32;
const CODEC_CAP: usize = 16;

/// Size-classed pool of fixed byte slices.
pub(crate) struct SlicePool {
    classes: [Mutex<Vec<Vec<u8>>>; SLICE_CLASSES.len()],
}

impl SlicePool {
    fn new() -> Self {
        Self {
            classes: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }

    /// A zero-filled slice of exactly `len` bytes with capacity from the
    /// smallest fitting class.
    pub(crate) fn get(&self, len: usize) -> Vec<u8> {
        let Some(class) = SLICE_CLASSES.iter().position(|&c| len <= c) else {
            return vec![0; len];
        };

        let mut slice = self.classes[class]
            .lock()
            .expect("slice pool lock")
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(SLICE_CLASSES[class]));
        slice.clear();
        slice.resize(len, 0);
        slice
    }

    /// Return a slice for reuse. Oversized or undersized slices are dropped.
    pub(crate) fn put(&self, mut slice: Vec<u8>) {
        let capacity = slice.capacity();
        let Some(class) = SLICE_CLASSES
            .iter()
            .rposition(|&c| capacity >= c)
        else {
            return;
        };

        slice.clear();
        let mut free = self.classes[class].lock().expect("slice pool lock");
        if free.len() < PER_CLASS_CAP {
            free.push(slice);
        }
    }
}

/// Pool of growable buffers handed out with length zero.
pub(crate) struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// An empty buffer with at least `hint` bytes of capacity.
    pub(crate) fn get(&self, hint: usize) -> BytesMut {
        let mut buf = self
            .free
            .lock()
            .expect("buffer pool lock")
            .pop()
            .unwrap_or_default();
        buf.clear();
        if buf.capacity() < hint {
            buf.reserve(hint - buf.capacity());
        }
        buf
    }

    /// Return a buffer for reuse.
    pub(crate) fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let mut free = self.free.lock().expect("buffer pool lock");
        if free.len() < PER_CLASS_CAP {
            free.push(buf);
        }
    }
}

/// Pool of inflaters. Decoders are parameterless, so one free list suffices.
pub(crate) struct DecoderPool {
    free: Mutex<Vec<FlateDecoder>>,
}

impl DecoderPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn get(&self) -> FlateDecoder {
        self.free
            .lock()
            .expect("decoder pool lock")
            .pop()
            .unwrap_or_default()
    }

    pub(crate) fn put(&self, mut decoder: FlateDecoder) {
        decoder.reset();
        let mut free = self.free.lock().expect("decoder pool lock");
        if free.len() < CODEC_CAP {
            free.push(decoder);
        }
    }
}

/// Pool of deflaters, matched on (level, window bits) at `get`.
pub(crate) struct EncoderPool {
    free: Mutex<Vec<FlateEncoder>>,
}

impl EncoderPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn get(&self, level: u32, window_bits: Option<u8>) -> FlateEncoder {
        let mut free = self.free.lock().expect("encoder pool lock");
        if let Some(index) = free
            .iter()
            .position(|e| e.level() == level && e.window_bits() == window_bits)
        {
            return free.swap_remove(index);
        }
        drop(free);

        match window_bits {
            Some(bits) => FlateEncoder::with_window_bits(level, bits),
            None => FlateEncoder::new(level),
        }
    }

    pub(crate) fn put(&self, mut encoder: FlateEncoder) {
        encoder.reset();
        let mut free = self.free.lock().expect("encoder pool lock");
        if free.len() < CODEC_CAP {
            free.push(encoder);
        }
    }
}

pub(crate) fn slices() -> &'static SlicePool {
    static POOL: OnceLock<SlicePool> = OnceLock::new();
    POOL.get_or_init(SlicePool::new)
}

pub(crate) fn buffers() -> &'static BufferPool {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(BufferPool::new)
}

pub(crate) fn decoders() -> &'static DecoderPool {
    static POOL: OnceLock<DecoderPool> = OnceLock::new();
    POOL.get_or_init(DecoderPool::new)
}

pub(crate) fn encoders() -> &'static EncoderPool {
    static POOL: OnceLock<EncoderPool> = OnceLock::new();
    POOL.get_or_init(EncoderPool::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_get_has_requested_length() {
        let pool = SlicePool::new();
        for len in [0, 1, 511, 512, 513, 70_000] {
            let slice = pool.get(len);
            assert_eq!(slice.len(), len);
            assert!(slice.iter().all(|&b| b == 0));
            pool.put(slice);
        }
    }

    #[test]
    fn slice_reuse_is_zeroed() {
        let pool = SlicePool::new();
        let mut slice = pool.get(100);
        slice.iter_mut().for_each(|b| *b = 0xAA);
        pool.put(slice);

        let again = pool.get(100);
        assert!(again.iter().all(|&b| b == 0));
    }

    #[test]
    fn buffer_get_is_empty_with_capacity() {
        let pool = BufferPool::new();
        let mut buf = pool.get(4096);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 4096);
        buf.extend_from_slice(b"scratch");
        pool.put(buf);

        let again = pool.get(16);
        assert!(again.is_empty());
    }

    #[test]
    fn encoder_pool_matches_parameters() {
        let pool = EncoderPool::new();
        let enc = pool.get(6, Some(12));
        assert_eq!(enc.level(), 6);
        assert_eq!(enc.window_bits(), Some(12));
        pool.put(enc);

        // A different parameter set gets a fresh encoder, not the pooled one.
        let other = pool.get(1, None);
        assert_eq!(other.level(), 1);
        assert_eq!(other.window_bits(), None);

        let reused = pool.get(6, Some(12));
        assert_eq!(reused.level(), 6);
        assert_eq!(reused.window_bits(), Some(12));
    }

    #[test]
    fn pooled_decoder_behaves_like_fresh() {
        let pool = DecoderPool::new();
        let mut enc = FlateEncoder::new(6);
        let mut wire = BytesMut::new();
        enc.compress(b"pooled codecs must be indistinguishable", &mut wire)
            .unwrap();

        // Dirty a decoder with one message, return it, take it again.
        let mut dec = pool.get();
        let mut out = BytesMut::new();
        dec.feed(&wire, &mut out).unwrap();
        dec.finish(&mut out).unwrap();
        pool.put(dec);

        enc.reset();
        let mut wire2 = BytesMut::new();
        enc.compress(b"second message, fresh window", &mut wire2)
            .unwrap();

        let mut dec2 = pool.get();
        let mut out2 = BytesMut::new();
        dec2.feed(&wire2, &mut out2).unwrap();
        dec2.finish(&mut out2).unwrap();
        assert_eq!(&out2[..], b"second message, fresh window");
    }

    #[test]
    fn pools_are_shared_statics() {
        let a = slices() as *const _;
        let b = slices() as *const _;
        assert_eq!(a, b);
        let _ = buffers();
        let _ = decoders();
        let _ = encoders();
    }
}
