//! FNV-1a state hashing for topology fingerprints and determinism checks.

use crate::layout::LayoutSnapshot;

/// FNV-1a hash accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Feed the exact bit pattern of an `f64`.
    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint of what the segment grouping depends on: grid shape plus each
/// placement's cell, part and activation.
///
/// Heat values, rates and fuel ticks are deliberately left out.
pub fn topology_hash(layout: &LayoutSnapshot) -> u64 {
    let mut h = StateHash::new();
    h.write_u32(layout.dims.rows);
    h.write_u32(layout.dims.cols);
    h.write_u32(layout.dims.stride);
    for p in &layout.placements {
        h.write_u32(p.row);
        h.write_u32(p.col);
        h.write_u32(p.part_index.0);
        h.write(&[p.activated as u8]);
    }
    h.finish()
}

/// Bit-exact hash of a heat buffer and the reactor scalar.
pub fn heat_hash(heat: &[f64], reactor_heat: f64) -> u64 {
    let mut h = StateHash::new();
    h.write_u64(heat.len() as u64);
    for &v in heat {
        h.write_f64(v);
    }
    h.write_f64(reactor_heat);
    h.finish()
}
