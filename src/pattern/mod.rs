//! Source-data buffer for writers
//!
//! Each writer owns one `PatternBuffer`: a fixed block of bytes generated once
//! at startup and then served cyclically. Serving from memory keeps the write
//! path free of any generation cost, and giving every worker its own buffer
//! avoids contention on the fill step.
//!
//! The random fill is seeded from the clock; the goal is uniqueness across
//! runs (defeating dedup/compression on the storage side), not security.

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

/// Minimum size of the internal buffer. Requests below this are rounded up.
pub const MIN_BUFFER_SIZE: usize = 64 * 1024;

/// Byte pattern used to fill the buffer at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FillPattern {
    /// All zeros
    Zeros,
    /// Alternating bits, 0x55
    #[serde(rename = "0x55")]
    #[value(name = "0x55")]
    Fill55,
    /// Alternating bits, 0xAA
    #[serde(rename = "0xaa")]
    #[value(name = "0xaa")]
    FillAa,
    /// All ones, 0xFF
    #[serde(rename = "0xff")]
    #[value(name = "0xff")]
    FillFf,
    /// Pseudo-random bytes, time-seeded
    Random,
}

impl FillPattern {
    /// The constant byte for non-random patterns.
    pub fn constant_byte(self) -> Option<u8> {
        match self {
            FillPattern::Zeros => Some(0x00),
            FillPattern::Fill55 => Some(0x55),
            FillPattern::FillAa => Some(0xAA),
            FillPattern::FillFf => Some(0xFF),
            FillPattern::Random => None,
        }
    }
}

/// Fixed byte buffer served cyclically.
///
/// `fill()` always produces exactly the requested number of bytes, wrapping
/// to offset 0 when the internal buffer is exhausted. The content is never
/// mutated after construction; only the cursor moves.
pub struct PatternBuffer {
    data: Vec<u8>,
    position: usize,
}

impl PatternBuffer {
    /// Allocate and fill a buffer of at least [`MIN_BUFFER_SIZE`] bytes.
    ///
    /// The initial cursor starts at a random position so that workers created
    /// in the same instant do not emit identical streams.
    pub fn new(size: usize, pattern: FillPattern) -> Self {
        let size = size.max(MIN_BUFFER_SIZE);
        let mut rng = clock_seeded_rng();

        let mut data = vec![0u8; size];
        match pattern.constant_byte() {
            Some(b) => data.fill(b),
            None => rng.fill_bytes(&mut data),
        }

        let position = rng.gen_range(0..data.len());
        Self { data, position }
    }

    /// Length of the internal buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw view of the buffer content (cursor-independent).
    pub fn content(&self) -> &[u8] {
        &self.data
    }

    /// Copy exactly `dst.len()` bytes into `dst`, cycling over the internal
    /// buffer. Cannot fail and cannot come up short: the source is in-memory.
    pub fn fill(&mut self, dst: &mut [u8]) {
        let mut total = 0;
        while total < dst.len() {
            let src = &self.data[self.position..];
            let n = src.len().min(dst.len() - total);
            dst[total..total + n].copy_from_slice(&src[..n]);
            total += n;
            self.position += n;
            if self.position >= self.data.len() {
                self.position = 0;
            }
        }
    }
}

impl Read for PatternBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.fill(buf);
        Ok(buf.len())
    }
}

fn clock_seeded_rng() -> Xoshiro256PlusPlus {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed);
    Xoshiro256PlusPlus::seed_from_u64(nanos)
}
