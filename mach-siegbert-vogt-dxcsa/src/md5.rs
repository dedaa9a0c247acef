//! The MD5 block function shared by the plain digest and the DXBC checksum.

pub(crate) const INITIAL_STATE: [u32; 4] = [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476];

pub(crate) const PADDING: [u8; 64] = {
    let mut padding = [0u8; 64];
    padding[0] = 0x80;
    padding
};

const SHIFTS: [[u32; 4]; 4] = [[7, 12, 17, 22], [5, 9, 14, 20], [4, 11, 16, 23], [6, 10, 15, 21]];

const SINES: [u32; 64] = [
    0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501,
    0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821,
    0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa, 0xd62f105d, 0x02441453, 0xd8a1e681, 0xe7d3fbc8,
    0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed, 0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a,
    0xfffa3942, 0x8771f681, 0x6d9d6122, 0xfde5380c, 0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70,
    0x289b7ec6, 0xeaa127fa, 0xd4ef3085, 0x04881d05, 0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665,
    0xf4292244, 0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
    0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb, 0xeb86d391,
];

/// Runs one 64-byte block through the compression function.
pub(crate) fn transform(state: &mut [u32; 4], words: &[u32; 16]) {
    let [mut a, mut b, mut c, mut d] = *state;

    for step in 0..64 {
        let round = step / 16;
        let (mix, index) = match round {
            0 => ((b & c) | (!b & d), step),
            1 => ((d & b) | (!d & c), (5 * step + 1) % 16),
            2 => (b ^ c ^ d, (3 * step + 5) % 16),
            _ => (c ^ (b | !d), (7 * step) % 16),
        };

        let rotated = a
            .wrapping_add(mix)
            .wrapping_add(SINES[step])
            .wrapping_add(words[index])
            .rotate_left(SHIFTS[round][step % 4]);

        a = d;
        d = c;
        c = b;
        b = b.wrapping_add(rotated);
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
}

/// Decodes a little-endian block into message words.
pub(crate) fn block_words(block: &[u8; 64]) -> [u32; 16] {
    let mut words = [0u32; 16];
    for (word, bytes) in words.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    words
}

/// Streaming block buffer over [`transform`].
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) block: [u8; 64],
    pub(crate) filled: usize,
    pub(crate) length: u64,
    pub(crate) state: [u32; 4],
}

impl Context {
    pub(crate) fn new() -> Self {
        Self {
            block: [0; 64],
            filled: 0,
            length: 0,
            state: INITIAL_STATE,
        }
    }

    pub(crate) fn update(&mut self, mut data: &[u8]) {
        self.length = self.length.wrapping_add(data.len() as u64);

        while !data.is_empty() {
            let take = (64 - self.filled).min(data.len());
            self.block[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == 64 {
                let words = block_words(&self.block);
                transform(&mut self.state, &words);
                self.filled = 0;
            }
        }
    }
}

/// A standard MD5 hasher.
///
/// DXC stores the MD5 of the program part in the `HASH` container part, so the plain
/// digest lives next to the container checksum.
#[derive(Clone)]
pub struct Md5 {
    context: Context,
}

impl Default for Md5 {
    fn default() -> Self {
        Self::new()
    }
}

impl Md5 {
    pub fn new() -> Self {
        Self {
            context: Context::new(),
        }
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.context.update(data.as_ref());
    }

    pub fn finalize(mut self) -> [u8; 16] {
        let bit_length = self.context.length.wrapping_mul(8);
        let pad_len = if self.context.filled < 56 {
            56 - self.context.filled
        } else {
            120 - self.context.filled
        };

        self.context.update(&PADDING[..pad_len]);
        self.context.update(&bit_length.to_le_bytes());
        debug_assert_eq!(self.context.filled, 0);

        let mut digest = [0u8; 16];
        digest.copy_from_slice(bytemuck::cast_slice(&self.context.state.map(u32::to_le)));
        digest
    }

    /// One-shot digest.
    pub fn digest(data: impl AsRef<[u8]>) -> [u8; 16] {
        let mut hasher = Md5::new();
        hasher.update(data);
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::Md5;

    fn hex(digest: [u8; 16]) -> String {
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn empty_digest() {
        assert_eq!(hex(Md5::digest(b"")), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn short_digest() {
        assert_eq!(hex(Md5::digest(b"abc")), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn multi_block_digest() {
        let input = b"12345678901234567890123456789012345678901234567890123456789012345678901234567890";
        assert_eq!(hex(Md5::digest(input)), "57edf4a22be3c955ac49da2e2107b67a");
    }

    #[test]
    fn streaming_matches_one_shot() {
        let input = b"The quick brown fox jumps over the lazy dog";
        let mut hasher = Md5::new();
        for chunk in input.chunks(7) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize(), Md5::digest(input));
        assert_eq!(hex(Md5::digest(input)), "9e107d9d372bb6826bd81d3542a419d6");
    }
}
