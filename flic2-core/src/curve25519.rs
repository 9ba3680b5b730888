//! X25519 scalar multiplication (Montgomery ladder) for the full-verify key exchange.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::field::Fe;

/// u-coordinate of the standard base point.
const BASE_POINT: [u8; 32] = {
    let mut b = [0u8; 32];
    b[0] = 9;
    b
};

/// Clear the low three bits and bit 255, set bit 254.
pub fn clamp(scalar: &[u8; 32]) -> [u8; 32] {
    let mut s = *scalar;
    s[0] &= 248;
    s[31] = (s[31] & 127) | 64;
    s
}

/// Multiply the point with u-coordinate `point` by the clamped `scalar`.
pub fn scalar_mult(scalar: &[u8; 32], point: &[u8; 32]) -> [u8; 32] {
    let k = clamp(scalar);
    let x1 = Fe::from_bytes(point);
    let mut x2 = Fe::ONE;
    let mut z2 = Fe::ZERO;
    let mut x3 = x1;
    let mut z3 = Fe::ONE;
    let mut swap = 0u32;

    for t in (0..255).rev() {
        let bit = ((k[t / 8] >> (t % 8)) & 1) as u32;
        swap ^= bit;
        Fe::swap(&mut x2, &mut x3, swap);
        Fe::swap(&mut z2, &mut z3, swap);
        swap = bit;

        let a = x2.add(&z2);
        let aa = a.square();
        let b = x2.sub(&z2);
        let bb = b.square();
        let e = aa.sub(&bb);
        let c = x3.add(&z3);
        let d = x3.sub(&z3);
        let da = d.mul(&a);
        let cb = c.mul(&b);
        x3 = da.add(&cb).square();
        z3 = x1.mul(&da.sub(&cb).square());
        x2 = aa.mul(&bb);
        z2 = e.mul(&bb.add(&e.mul_small(121666)));
    }
    Fe::swap(&mut x2, &mut x3, swap);
    Fe::swap(&mut z2, &mut z3, swap);

    x2.mul(&z2.invert()).to_bytes()
}

/// Public key for `scalar`.
pub fn scalar_mult_base(scalar: &[u8; 32]) -> [u8; 32] {
    scalar_mult(scalar, &BASE_POINT)
}

/// Ephemeral key pair for one handshake. The secret is dropped with the value.
pub struct EphemeralKey {
    secret: [u8; 32],
    public: [u8; 32],
}

impl EphemeralKey {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        let public = scalar_mult_base(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn shared_secret(&self, peer_public: &[u8; 32]) -> [u8; 32] {
        scalar_mult(&self.secret, peer_public)
    }
}
