//! Chaskey-based packet signatures.
//!
//! The tag is truncated to five bytes and bound to a per-direction counter. It only makes
//! sense inside the link's fixed framing and must not be reused as a general MAC.

/// Tag length appended to every signed packet.
pub const TAG_LEN: usize = 5;

/// Direction of a signed packet, xored into the initial state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    FromDevice = 0,
    ToDevice = 1,
}

/// Key K followed by K·2 and K·4 in GF(2^128).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subkeys([u32; 12]);

fn load_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn times_two(v: [u32; 4]) -> [u32; 4] {
    let c = (v[3] >> 31) * 0x87;
    [
        (v[0] << 1) ^ c,
        (v[1] << 1) | (v[0] >> 31),
        (v[2] << 1) | (v[1] >> 31),
        (v[3] << 1) | (v[2] >> 31),
    ]
}

fn permute(v: &mut [u32; 4]) {
    v[2] = v[2].rotate_left(16);
    for _ in 0..16 {
        v[0] = v[0].wrapping_add(v[1]);
        v[1] = v[0] ^ v[1].rotate_left(5);
        v[2] = v[3].wrapping_add(v[2].rotate_left(16));
        v[3] = v[2] ^ v[3].rotate_left(8);
        v[2] = v[2].wrapping_add(v[1]);
        v[0] = v[3].wrapping_add(v[0].rotate_left(16));
        v[1] = v[2] ^ v[1].rotate_left(7);
        v[3] = v[0] ^ v[3].rotate_left(13);
    }
    v[2] = v[2].rotate_left(16);
}

fn xor_block(v: &mut [u32; 4], block: &[u8; 16]) {
    for (i, word) in v.iter_mut().enumerate() {
        *word ^= load_u32(&block[4 * i..]);
    }
}

impl Subkeys {
    pub fn generate(key: &[u8; 16]) -> Self {
        let mut k = [0u32; 12];
        for (i, word) in k.iter_mut().take(4).enumerate() {
            *word = load_u32(&key[4 * i..]);
        }
        let mut v = [k[0], k[1], k[2], k[3]];
        for s in 1..3 {
            v = times_two(v);
            k[4 * s..4 * s + 4].copy_from_slice(&v);
        }
        Subkeys(k)
    }

    fn part(&self, offset: usize) -> [u32; 4] {
        [
            self.0[offset],
            self.0[offset + 1],
            self.0[offset + 2],
            self.0[offset + 3],
        ]
    }

    /// Five-byte tag over `data`, bound to `direction` and `counter`.
    ///
    /// The state starts as K xored with the counter words and the direction, and is permuted
    /// once before any data is absorbed. A full final block is finished with K·2, a padded
    /// one (0x01 then zeros) with K·4. Empty input is treated as a single padded block.
    pub fn mac(&self, direction: Direction, counter: u64, data: &[u8]) -> [u8; TAG_LEN] {
        let mut v = [
            self.0[0] ^ counter as u32,
            self.0[1] ^ (counter >> 32) as u32,
            self.0[2] ^ direction as u32,
            self.0[3],
        ];
        permute(&mut v);

        let mut rest = data;
        let key_offset = loop {
            if rest.len() >= 16 {
                let mut block = [0u8; 16];
                block.copy_from_slice(&rest[..16]);
                xor_block(&mut v, &block);
                rest = &rest[16..];
                if rest.is_empty() {
                    break 4;
                }
                permute(&mut v);
            } else {
                let mut block = [0u8; 16];
                block[..rest.len()].copy_from_slice(rest);
                block[rest.len()] = 0x01;
                xor_block(&mut v, &block);
                break 8;
            }
        };

        let k = self.part(key_offset);
        for (word, key) in v.iter_mut().zip(k.iter()) {
            *word ^= key;
        }
        permute(&mut v);
        v[0] ^= k[0];
        v[1] ^= k[1];

        let lo = v[0].to_le_bytes();
        [lo[0], lo[1], lo[2], lo[3], v[1] as u8]
    }

    /// Single-block keyed permutation, used to derive the quick-verify session key.
    pub fn mac16(&self, data: &[u8; 16]) -> [u8; 16] {
        let k1 = self.part(4);
        let mut v = self.part(0);
        for (word, key) in v.iter_mut().zip(k1.iter()) {
            *word ^= key;
        }
        xor_block(&mut v, data);
        permute(&mut v);
        let mut out = [0u8; 16];
        for (i, word) in v.iter().enumerate() {
            out[4 * i..4 * i + 4].copy_from_slice(&(word ^ k1[i]).to_le_bytes());
        }
        out
    }
}
