//! Deterministic randomness for world generation.
//!
//! Two sources, both seedable and platform-independent:
//! - [`XorShift32`]: sequential stream for features that walk (rivers, ponds)
//! - [`TileHasher`]: stateless per-tile hash for features sampled per cell
//!   (rocks, flowers) and the smooth value-noise tree layer

/// xorshift32 stream yielding values in [0, 1).
#[derive(Debug, Clone)]
pub struct XorShift32(u32);

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        // Zero is a fixed point of xorshift.
        Self(if seed == 0 { 0x9E37_79B9 } else { seed })
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut s = self.0;
        s ^= s << 13;
        s ^= s >> 17;
        s ^= s << 5;
        self.0 = s;
        s
    }

    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Uniform integer in `[0, n)`.
    pub fn below(&mut self, n: usize) -> usize {
        ((self.next_f64() * n as f64) as usize).min(n.saturating_sub(1))
    }

    pub fn coin(&mut self) -> bool {
        self.next_f64() < 0.5
    }
}

/// Seeded coordinate hash.
#[derive(Debug, Clone, Copy)]
pub struct TileHasher {
    salt: u32,
}

impl TileHasher {
    pub fn new(seed: u64) -> Self {
        let folded = (seed ^ (seed >> 32)) as u32;
        Self { salt: folded.wrapping_mul(2_246_822_519) }
    }

    /// Hash of integer coordinates into [0, 1).
    pub fn hash2(&self, x: i64, y: i64) -> f64 {
        let mut h = (x as u32)
            .wrapping_mul(374_761_393)
            .wrapping_add((y as u32).wrapping_mul(668_265_263))
            .wrapping_add(self.salt);
        h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
        h ^= h >> 16;
        h as f64 / 4_294_967_296.0
    }

    /// Independent per-tile channel `i`.
    pub fn tile(&self, x: i64, y: i64, i: i64) -> f64 {
        self.hash2(x * 7 + i, y * 13 + i * 3)
    }

    /// Bilinear value noise with smoothstep easing, lattice spacing `scale`.
    pub fn value_noise(&self, x: i64, y: i64, scale: f64) -> f64 {
        let (sx, sy) = (x as f64 / scale, y as f64 / scale);
        let (ix, iy) = (sx.floor(), sy.floor());
        let tx = smoothstep(sx - ix);
        let ty = smoothstep(sy - iy);
        let (ix, iy) = (ix as i64, iy as i64);
        let top = lerp(self.hash2(ix, iy), self.hash2(ix + 1, iy), tx);
        let bottom = lerp(self.hash2(ix, iy + 1), self.hash2(ix + 1, iy + 1), tx);
        lerp(top, bottom, ty)
    }
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
