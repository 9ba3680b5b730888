//! Ed25519 signature verification against a fixed public key.
//!
//! Verification computes `R' = [S]B - [h]A` with two 4-bit signed windows, one over a table of
//! multiples of -A and one over a table of multiples of the base point, and compares the
//! encoding of `R'` with the `R` half of the signature. Nothing here is secret, so table
//! lookups and the double-and-add loop are variable time.

use std::sync::OnceLock;

use sha2::{Digest, Sha512};

use crate::field::Fe;

/// Public key that signs device certificates.
pub const VENDOR_PUBLIC_KEY: [u8; 32] = [
    211, 63, 36, 64, 221, 84, 179, 27, 46, 29, 207, 64, 19, 46, 250, 65, 216, 248, 167, 71, 65,
    104, 223, 64, 8, 245, 169, 95, 179, 176, 208, 34,
];

/// Group order L, little-endian 64-bit limbs.
const L: [u64; 4] = [
    0x5812_631a_5cf5_d3ed,
    0x14de_f9de_a2f7_9cd6,
    0x0000_0000_0000_0000,
    0x1000_0000_0000_0000,
];

struct Constants {
    d: Fe,
    d2: Fe,
    sqrt_m1: Fe,
}

fn constants() -> &'static Constants {
    static CONSTANTS: OnceLock<Constants> = OnceLock::new();
    CONSTANTS.get_or_init(|| {
        let d = Fe::from_u32(121665)
            .neg()
            .mul(&Fe::from_u32(121666).invert());
        let two = Fe::from_u32(2);
        let sqrt_m1 = two.pow22523().square().mul(&two);
        Constants {
            d,
            d2: d.add(&d),
            sqrt_m1,
        }
    })
}

#[derive(Clone, Copy)]
struct P2 {
    x: Fe,
    y: Fe,
    z: Fe,
}

#[derive(Clone, Copy)]
struct P3 {
    x: Fe,
    y: Fe,
    z: Fe,
    t: Fe,
}

#[derive(Clone, Copy)]
struct P1P1 {
    x: Fe,
    y: Fe,
    z: Fe,
    t: Fe,
}

/// Affine point as (y + x, y - x, 2dxy).
#[derive(Clone, Copy)]
struct Precomp {
    y_plus_x: Fe,
    y_minus_x: Fe,
    xy2d: Fe,
}

impl P3 {
    fn identity() -> P3 {
        P3 {
            x: Fe::ZERO,
            y: Fe::ONE,
            z: Fe::ONE,
            t: Fe::ZERO,
        }
    }

    fn from_affine(x: Fe, y: Fe) -> P3 {
        P3 {
            x,
            y,
            z: Fe::ONE,
            t: x.mul(&y),
        }
    }

    fn to_p2(self) -> P2 {
        P2 {
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }

    fn to_precomp(self) -> Precomp {
        let recip = self.z.invert();
        let x = self.x.mul(&recip);
        let y = self.y.mul(&recip);
        Precomp {
            y_plus_x: y.add(&x),
            y_minus_x: y.sub(&x),
            xy2d: x.mul(&y).mul(&constants().d2),
        }
    }

    /// Mixed addition with an affine point.
    fn madd(&self, q: &Precomp) -> P1P1 {
        let a = self.y.add(&self.x).mul(&q.y_plus_x);
        let b = self.y.sub(&self.x).mul(&q.y_minus_x);
        let c = q.xy2d.mul(&self.t);
        let d = self.z.add(&self.z);
        P1P1 {
            x: a.sub(&b),
            y: a.add(&b),
            z: d.add(&c),
            t: d.sub(&c),
        }
    }
}

impl P2 {
    fn dbl(&self) -> P1P1 {
        let xx = self.x.square();
        let yy = self.y.square();
        let b = self.z.square();
        let b = b.add(&b);
        let aa = self.x.add(&self.y).square();
        let y = yy.add(&xx);
        let z = yy.sub(&xx);
        P1P1 {
            x: aa.sub(&y),
            y,
            z,
            t: b.sub(&z),
        }
    }

    fn to_bytes(self) -> [u8; 32] {
        let recip = self.z.invert();
        let x = self.x.mul(&recip);
        let y = self.y.mul(&recip);
        let mut s = y.to_bytes();
        s[31] ^= (x.is_negative() as u8) << 7;
        s
    }
}

impl P1P1 {
    fn to_p2(self) -> P2 {
        P2 {
            x: self.x.mul(&self.t),
            y: self.y.mul(&self.z),
            z: self.z.mul(&self.t),
        }
    }

    fn to_p3(self) -> P3 {
        P3 {
            x: self.x.mul(&self.t),
            y: self.y.mul(&self.z),
            z: self.z.mul(&self.t),
            t: self.x.mul(&self.y),
        }
    }
}

impl Precomp {
    fn negate(&self) -> Precomp {
        Precomp {
            y_plus_x: self.y_minus_x,
            y_minus_x: self.y_plus_x,
            xy2d: self.xy2d.neg(),
        }
    }
}

/// Recover the affine point encoded in `s`. Returns `None` if no x satisfies the curve equation.
fn decompress(s: &[u8; 32]) -> Option<(Fe, Fe)> {
    let c = constants();
    let y = Fe::from_bytes(s);
    let yy = y.square();
    let u = yy.sub(&Fe::ONE);
    let v = yy.mul(&c.d).add(&Fe::ONE);

    // x = u v^3 (u v^7)^((p-5)/8)
    let v3 = v.square().mul(&v);
    let mut x = v3.square().mul(&v).mul(&u).pow22523().mul(&v3).mul(&u);

    let vxx = x.square().mul(&v);
    if !vxx.sub(&u).is_zero() {
        if !vxx.add(&u).is_zero() {
            return None;
        }
        x = x.mul(&c.sqrt_m1);
    }
    if x.is_negative() != (s[31] >> 7 == 1) {
        x = x.neg();
    }
    Some((x, y))
}

/// Multiples 1..=8 of the affine point (x, y).
fn table_for(x: Fe, y: Fe) -> [Precomp; 8] {
    let first = P3::from_affine(x, y).to_precomp();
    let mut table = [first; 8];
    let mut acc = P3::from_affine(x, y);
    for entry in table.iter_mut().skip(1) {
        acc = acc.madd(&first).to_p3();
        *entry = acc.to_precomp();
    }
    table
}

fn base_table() -> &'static [Precomp; 8] {
    static BASE: OnceLock<[Precomp; 8]> = OnceLock::new();
    BASE.get_or_init(|| {
        let mut b = [0x66u8; 32];
        b[0] = 0x58;
        decompress(&b)
            .map(|(x, y)| table_for(x, y))
            .unwrap_or([P3::identity().to_precomp(); 8])
    })
}

/// Signed radix-16 digits of a scalar below 2^255: 64 digits in -8..=8.
fn radix16(a: &[u8; 32]) -> [i8; 64] {
    let mut e = [0i8; 64];
    for i in 0..32 {
        e[2 * i] = (a[i] & 15) as i8;
        e[2 * i + 1] = ((a[i] >> 4) & 15) as i8;
    }
    let mut carry = 0i8;
    for digit in e.iter_mut().take(63) {
        *digit += carry;
        carry = (*digit + 8) >> 4;
        *digit -= carry << 4;
    }
    e[63] += carry;
    e
}

fn add_digit(r: &P3, table: &[Precomp; 8], digit: i8) -> P3 {
    match digit {
        0 => *r,
        d if d > 0 => r.madd(&table[(d - 1) as usize]).to_p3(),
        d => r.madd(&table[(-d - 1) as usize].negate()).to_p3(),
    }
}

fn geq_l(r: &[u64; 4]) -> bool {
    for i in (0..4).rev() {
        if r[i] != L[i] {
            return r[i] > L[i];
        }
    }
    true
}

/// Reduce a 512-bit little-endian number modulo L by shift-and-subtract.
fn reduce512(h: &[u8; 64]) -> [u8; 32] {
    let mut r = [0u64; 4];
    for i in (0..512).rev() {
        let mut carry = ((h[i / 8] >> (i % 8)) & 1) as u64;
        for limb in r.iter_mut() {
            let top = *limb >> 63;
            *limb = (*limb << 1) | carry;
            carry = top;
        }
        if geq_l(&r) {
            let mut borrow = 0u64;
            for (limb, l) in r.iter_mut().zip(L.iter()) {
                let (d1, b1) = limb.overflowing_sub(*l);
                let (d2, b2) = d1.overflowing_sub(borrow);
                *limb = d2;
                borrow = (b1 | b2) as u64;
            }
        }
    }
    let mut out = [0u8; 32];
    for (i, limb) in r.iter().enumerate() {
        out[8 * i..8 * i + 8].copy_from_slice(&limb.to_le_bytes());
    }
    out
}

/// Public key with its precomputed table of negated multiples.
pub struct VerifyingKey {
    bytes: [u8; 32],
    neg_table: [Precomp; 8],
}

impl VerifyingKey {
    /// Returns `None` if `bytes` is not a valid point encoding.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        let (x, y) = decompress(bytes)?;
        Some(Self {
            bytes: *bytes,
            neg_table: table_for(x.neg(), y),
        })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn verify(&self, signature: &[u8; 64], message: &[u8]) -> bool {
        if signature[63] & 0xe0 != 0 {
            return false;
        }
        let mut hasher = Sha512::new();
        hasher.update(&signature[..32]);
        hasher.update(self.bytes);
        hasher.update(message);
        let digest: [u8; 64] = hasher.finalize().into();
        let h = reduce512(&digest);

        let mut s = [0u8; 32];
        s.copy_from_slice(&signature[32..]);

        let h_digits = radix16(&h);
        let s_digits = radix16(&s);
        let base = base_table();

        let mut r = P3::identity();
        for i in (0..64).rev() {
            let mut p2 = r.to_p2();
            for _ in 0..3 {
                p2 = p2.dbl().to_p2();
            }
            r = p2.dbl().to_p3();
            r = add_digit(&r, &self.neg_table, h_digits[i]);
            r = add_digit(&r, base, s_digits[i]);
        }
        r.to_p2().to_bytes()[..] == signature[..32]
    }

    /// Verify a device certificate over `address ‖ address type ‖ device public key`.
    ///
    /// The two low bits of signature byte 32 are not covered by the device's encoding, so all
    /// four values are tried. Returns the accepted value.
    pub fn verify_certificate(
        &self,
        signature: &[u8; 64],
        address: &[u8; 6],
        address_type_random: bool,
        device_public_key: &[u8; 32],
    ) -> Option<u8> {
        let mut msg = [0u8; 39];
        msg[..6].copy_from_slice(address);
        msg[6] = address_type_random as u8;
        msg[7..].copy_from_slice(device_public_key);
        let mut sig = *signature;
        (0u8..4).find(|&i| {
            sig[32] = (sig[32] & !3) | i;
            self.verify(&sig, &msg)
        })
    }
}

/// The certificate key, decoded once.
pub fn vendor_key() -> Option<&'static VerifyingKey> {
    static VENDOR: OnceLock<Option<VerifyingKey>> = OnceLock::new();
    VENDOR
        .get_or_init(|| VerifyingKey::from_bytes(&VENDOR_PUBLIC_KEY))
        .as_ref()
}
