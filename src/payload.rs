//! Synthetic file generation for load testing.
//!
//! Names are timestamped, sizes are drawn from a fixed range of multiples of
//! 1040 bytes, and content is random 63-bit words.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::Local;
use rand::Rng;

/// Number of distinct size steps.
const SIZE_STEPS: i64 = 1000;

/// Offset added to the drawn step so files are never tiny.
const SIZE_OFFSET: i64 = 100;

/// Granularity of generated sizes in bytes.
const SIZE_UNIT: i64 = 1040;

/// Name for transfer `id`, unique within a run as long as ids are.
pub fn generate_name(id: u64) -> String {
    format!("{}_{}", Local::now().format("%Y_%m_%d_%H_%M_%S.dat"), id)
}

/// Random size in `[104_000, 1_144_000)`, always a multiple of 1040.
pub fn generate_size() -> i64 {
    let step = rand::rng().random_range(0..SIZE_STEPS);
    (step + SIZE_OFFSET) * SIZE_UNIT
}

/// Exactly `size` bytes of random content; empty for non-positive sizes.
///
/// Content is filled a little-endian word at a time from the thread-local
/// CSPRNG. A trailing partial word is cut so the length always matches the
/// declared size.
pub fn generate_payload(size: i64) -> Bytes {
    let len = usize::try_from(size).unwrap_or(0);
    let words = len.div_ceil(8);

    let mut rng = rand::rng();
    let mut buf = BytesMut::with_capacity(words * 8);
    for _ in 0..words {
        buf.put_i64_le(rng.random_range(0..i64::MAX));
    }
    buf.truncate(len);
    buf.freeze()
}
