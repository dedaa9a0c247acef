//! The DXBC container checksum.
//!
//! A DXBC container starts with the `DXBC` magic followed by a 16-byte digest. The digest
//! covers everything after it and is an MD5 with a non-standard finalization step: the bit
//! count is written in front of the tail block instead of after it, and the last word is
//! `(bits >> 2) | 1`.

mod md5;

pub use md5::Md5;

use md5::{block_words, transform, Context, PADDING};

/// Byte offset of the first checksummed byte: magic (4) + digest (16).
pub const DIGEST_END: usize = 20;

/// Byte range of the digest inside a container header.
pub const DIGEST_RANGE: core::ops::Range<usize> = 4..DIGEST_END;

/// Computes the container checksum of `blob` into `out`.
///
/// # Panics
/// If `blob` is shorter than the container header prefix.
pub fn sign(blob: &[u8], out: &mut [u32; 4]) {
    let body = &blob[DIGEST_END..];

    let num_bits = (body.len() as u32).wrapping_mul(8);
    let full_len = body.len() & !0x3f;

    let mut context = Context::new();
    context.update(&body[..full_len]);

    let tail = &body[full_len..];
    let mut words = if tail.len() >= 56 {
        context.update(tail);
        context.update(&PADDING[..64 - tail.len()]);

        let mut words = [0u32; 16];
        words[0] = num_bits;
        words
    } else {
        let mut block = [0u8; 64];
        block[..4].copy_from_slice(&num_bits.to_le_bytes());
        block[4..4 + tail.len()].copy_from_slice(tail);
        let pad_start = 4 + tail.len();
        block[pad_start..].copy_from_slice(&PADDING[..64 - pad_start]);
        block_words(&block)
    };

    words[15] = (num_bits >> 2) | 1;
    transform(&mut context.state, &words);

    *out = context.state;
}

/// Computes the container checksum and writes it into the header digest.
pub fn sign_in_place(blob: &mut [u8]) {
    let mut signature = [0u32; 4];
    sign(blob, &mut signature);
    blob[DIGEST_RANGE].copy_from_slice(bytemuck::cast_slice(&signature.map(u32::to_le)));
}

/// Checks that the header digest matches the container contents.
pub fn verify(blob: &[u8]) -> bool {
    if blob.len() < DIGEST_END {
        return false;
    }

    let mut signature = [0u32; 4];
    sign(blob, &mut signature);
    blob[DIGEST_RANGE] == *bytemuck::cast_slice::<u32, u8>(&signature.map(u32::to_le))
}

#[cfg(test)]
mod test {
    use super::*;

    fn container(body_len: usize) -> Vec<u8> {
        let mut blob = b"DXBC".to_vec();
        blob.extend_from_slice(&[0u8; 16]);
        blob.extend((0..body_len).map(|i| (i * 31 % 251) as u8));
        blob
    }

    #[test]
    fn signs_short_tail() {
        let mut blob = container(100);
        sign_in_place(&mut blob);
        assert_eq!(&blob[..4], b"DXBC");
        assert_ne!(&blob[DIGEST_RANGE], &[0u8; 16]);
        assert!(verify(&blob));
    }

    #[test]
    fn signs_long_tail() {
        // 60 bytes past the last full block takes the two-transform path.
        let mut blob = container(64 + 60);
        sign_in_place(&mut blob);
        assert!(verify(&blob));
    }

    #[test]
    fn signature_tracks_contents() {
        let mut first = container(77);
        let mut second = container(77);
        second[50] ^= 0xff;

        sign_in_place(&mut first);
        sign_in_place(&mut second);
        assert_ne!(first[DIGEST_RANGE], second[DIGEST_RANGE]);

        first[60] ^= 1;
        assert!(!verify(&first));
    }

    #[test]
    fn signature_ignores_existing_digest() {
        let mut blob = container(32);
        let mut out_a = [0u32; 4];
        sign(&blob, &mut out_a);

        blob[DIGEST_RANGE].fill(0xaa);
        let mut out_b = [0u32; 4];
        sign(&blob, &mut out_b);
        assert_eq!(out_a, out_b);
    }

    fn hex(digest: &[u8]) -> String {
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    // Digests from DXC's retail container hash (DxilHash.h) over the same bodies.
    const KNOWN_DIGESTS: &[(usize, &str)] = &[
        (0, "140d60f6b775e2ba4e4abed401b2e9a1"),
        (13, "5521da64787ca31541b62633f72e2e84"),
        (55, "50a83bc3587e8adaf44f62423438c641"),
        (56, "ba1f9af11e31b93e144dbe788f2b3a9b"),
        (63, "50e91ef29f228627775a7e895e6e22b2"),
        (64, "22e2379a0d8a56f66e96f7dffbe4dba8"),
        (100, "08b633b41534e0169bced77561df9d30"),
        (124, "27e3008759228b7c775507f0cbe62e55"),
        (200, "26f85dcc1c2ef10e3072b1ba03df9e1f"),
    ];

    #[test]
    fn matches_dxc_digests() {
        for &(body_len, expected) in KNOWN_DIGESTS {
            let mut blob = container(body_len);
            sign_in_place(&mut blob);
            assert_eq!(hex(&blob[DIGEST_RANGE]), expected, "body of {body_len} bytes");
        }
    }

    #[test]
    fn length_word_is_the_last_word_of_the_tail_block() {
        // Short tails keep their bytes at 4.. of the final block; the length word must not
        // land on top of them.
        let mut blob = container(20);
        let mut changed = blob.clone();
        changed[DIGEST_END + 12] ^= 0x55;

        sign_in_place(&mut blob);
        sign_in_place(&mut changed);
        assert_ne!(blob[DIGEST_RANGE], changed[DIGEST_RANGE]);
    }

    #[test]
    fn header_only_container() {
        let mut blob = container(0);
        sign_in_place(&mut blob);
        assert!(verify(&blob));
        assert!(!verify(b"DXBC"));
    }
}
