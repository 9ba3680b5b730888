//! Arithmetic modulo p = 2^255 - 19.
//!
//! Elements are ten unsigned limbs of alternating 26 and 25 bits (radix 2^25.5). Limb `i`
//! starts at bit `ceil(25.5 * i)`. Every operation returns a carried element whose limbs fit
//! their width (limb 1 may exceed it by a few bits after the final fold), which keeps all
//! intermediate products of `mul` and `square` inside a `u64`.

/// Field element mod 2^255 - 19.
#[derive(Clone, Copy, Debug)]
pub struct Fe(pub(crate) [u32; 10]);

const MASK26: u64 = 0x3ff_ffff;
const MASK25: u64 = 0x1ff_ffff;

/// Per-limb bias of 4p, added before subtracting so limbs never go negative.
const FOUR_P: [u64; 10] = [
    0xfff_ffb4, 0x7ff_fffc, 0xfff_fffc, 0x7ff_fffc, 0xfff_fffc, 0x7ff_fffc, 0xfff_fffc,
    0x7ff_fffc, 0xfff_fffc, 0x7ff_fffc,
];

#[inline]
fn width(i: usize) -> u32 {
    if i % 2 == 0 {
        26
    } else {
        25
    }
}

#[inline]
fn mask(i: usize) -> u64 {
    if i % 2 == 0 {
        MASK26
    } else {
        MASK25
    }
}

/// Propagate carries through wide limbs, folding the overflow past bit 255 back in times 19.
fn carry(mut h: [u64; 10]) -> Fe {
    for i in 0..9 {
        let c = h[i] >> width(i);
        h[i] &= mask(i);
        h[i + 1] += c;
    }
    let c = h[9] >> 25;
    h[9] &= MASK25;
    h[0] += c * 19;
    let c = h[0] >> 26;
    h[0] &= MASK26;
    h[1] += c;

    let mut out = [0u32; 10];
    for (o, v) in out.iter_mut().zip(h.iter()) {
        *o = *v as u32;
    }
    Fe(out)
}

/// Exponents supported by [`Fe::pow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exponent {
    /// p - 2 = 2^255 - 21; raising to it inverts a non-zero element.
    Invert,
    /// (p - 5) / 8 = 2^252 - 3; used for square roots during point decompression.
    Pow22523,
}

impl Fe {
    pub const ZERO: Fe = Fe([0; 10]);
    pub const ONE: Fe = Fe([1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

    pub fn from_u32(v: u32) -> Fe {
        let mut h = [0u64; 10];
        h[0] = v as u64;
        carry(h)
    }

    /// Load 32 little-endian bytes. Bit 255 is ignored; non-canonical values are accepted.
    pub fn from_bytes(bytes: &[u8; 32]) -> Fe {
        let mut h = [0u32; 10];
        let mut acc: u64 = 0;
        let mut acc_bits = 0u32;
        let mut k = 0usize;
        for (i, limb) in h.iter_mut().enumerate() {
            while acc_bits < width(i) {
                acc |= (bytes[k] as u64) << acc_bits;
                k += 1;
                acc_bits += 8;
            }
            *limb = (acc & mask(i)) as u32;
            acc >>= width(i);
            acc_bits -= width(i);
        }
        Fe(h)
    }

    /// Canonical 32-byte little-endian encoding (fully reduced, bit 255 clear).
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut h = [0u64; 10];
        for (o, v) in h.iter_mut().zip(self.0.iter()) {
            *o = *v as u64;
        }
        let Fe(carried) = carry(h);
        for (o, v) in h.iter_mut().zip(carried.iter()) {
            *o = *v as u64;
        }

        // q = 1 exactly when h >= p, found by carrying h + 19 past bit 255.
        let mut q = (h[0] + 19) >> 26;
        for (i, limb) in h.iter().enumerate().skip(1) {
            q = (limb + q) >> width(i);
        }
        h[0] += 19 * q;
        for i in 0..9 {
            let c = h[i] >> width(i);
            h[i] &= mask(i);
            h[i + 1] += c;
        }
        h[9] &= MASK25;

        let mut out = [0u8; 32];
        let mut acc: u64 = 0;
        let mut acc_bits = 0u32;
        let mut k = 0usize;
        for (i, limb) in h.iter().enumerate() {
            acc |= limb << acc_bits;
            acc_bits += width(i);
            while acc_bits >= 8 {
                out[k] = acc as u8;
                k += 1;
                acc >>= 8;
                acc_bits -= 8;
            }
        }
        if acc_bits > 0 {
            out[k] = acc as u8;
        }
        out
    }

    pub fn add(&self, g: &Fe) -> Fe {
        let mut h = [0u64; 10];
        for (i, o) in h.iter_mut().enumerate() {
            *o = self.0[i] as u64 + g.0[i] as u64;
        }
        carry(h)
    }

    pub fn sub(&self, g: &Fe) -> Fe {
        let mut h = [0u64; 10];
        for (i, o) in h.iter_mut().enumerate() {
            *o = self.0[i] as u64 + FOUR_P[i] - g.0[i] as u64;
        }
        carry(h)
    }

    pub fn neg(&self) -> Fe {
        Fe::ZERO.sub(self)
    }

    pub fn mul(&self, g: &Fe) -> Fe {
        let f = &self.0;
        let g = &g.0;
        let mut h = [0u64; 10];
        for i in 0..10 {
            for j in 0..10 {
                let mut p = f[i] as u64 * g[j] as u64;
                // Two odd limbs each sit half a bit above their nominal position.
                if i & j & 1 == 1 {
                    p <<= 1;
                }
                if i + j >= 10 {
                    h[i + j - 10] += 19 * p;
                } else {
                    h[i + j] += p;
                }
            }
        }
        carry(h)
    }

    pub fn square(&self) -> Fe {
        let f = &self.0;
        let mut h = [0u64; 10];
        for i in 0..10 {
            for j in i..10 {
                let mut p = f[i] as u64 * f[j] as u64;
                if i != j {
                    p <<= 1;
                }
                if i & j & 1 == 1 {
                    p <<= 1;
                }
                if i + j >= 10 {
                    h[i + j - 10] += 19 * p;
                } else {
                    h[i + j] += p;
                }
            }
        }
        carry(h)
    }

    /// Square `n` times.
    pub fn square_n(&self, n: usize) -> Fe {
        let mut r = *self;
        for _ in 0..n {
            r = r.square();
        }
        r
    }

    pub fn mul_small(&self, c: u32) -> Fe {
        let mut h = [0u64; 10];
        for (o, v) in h.iter_mut().zip(self.0.iter()) {
            *o = *v as u64 * c as u64;
        }
        carry(h)
    }

    /// Raise to one of the two fixed exponents. Both share the chain up to z^(2^250 - 1).
    pub fn pow(&self, e: Exponent) -> Fe {
        let z = self;
        let z2 = z.square();
        let z9 = z2.square_n(2).mul(z);
        let z11 = z2.mul(&z9);
        let z_5_0 = z11.square().mul(&z9);
        let z_10_0 = z_5_0.square_n(5).mul(&z_5_0);
        let z_20_0 = z_10_0.square_n(10).mul(&z_10_0);
        let z_40_0 = z_20_0.square_n(20).mul(&z_20_0);
        let z_50_0 = z_40_0.square_n(10).mul(&z_10_0);
        let z_100_0 = z_50_0.square_n(50).mul(&z_50_0);
        let z_200_0 = z_100_0.square_n(100).mul(&z_100_0);
        let z_250_0 = z_200_0.square_n(50).mul(&z_50_0);
        match e {
            Exponent::Invert => z_250_0.square_n(5).mul(&z11),
            Exponent::Pow22523 => z_250_0.square_n(2).mul(z),
        }
    }

    pub fn invert(&self) -> Fe {
        self.pow(Exponent::Invert)
    }

    pub fn pow22523(&self) -> Fe {
        self.pow(Exponent::Pow22523)
    }

    /// Returns `b` when `choice == 1`, `a` when `choice == 0`, without branching.
    pub fn select(a: &Fe, b: &Fe, choice: u32) -> Fe {
        let m = 0u32.wrapping_sub(choice);
        let mut r = [0u32; 10];
        for (i, o) in r.iter_mut().enumerate() {
            *o = a.0[i] ^ (m & (a.0[i] ^ b.0[i]));
        }
        Fe(r)
    }

    /// Swap `a` and `b` when `choice == 1`, without branching.
    pub fn swap(a: &mut Fe, b: &mut Fe, choice: u32) {
        let m = 0u32.wrapping_sub(choice);
        for i in 0..10 {
            let t = m & (a.0[i] ^ b.0[i]);
            a.0[i] ^= t;
            b.0[i] ^= t;
        }
    }

    /// Low bit of the canonical encoding.
    pub fn is_negative(&self) -> bool {
        self.to_bytes()[0] & 1 == 1
    }

    pub fn is_zero(&self) -> bool {
        self.to_bytes() == [0u8; 32]
    }

    /// Equality of reduced values.
    pub fn ct_eq(&self, other: &Fe) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}
