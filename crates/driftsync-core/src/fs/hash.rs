//! Content hashing for comparison fast-paths.

use std::io::Read;

use eyre::Result;

const HASH_BUF_BYTES: usize = 256 * 1024;

/// Available content hash algorithms. The digest only has to be stable
/// within a run, so the faster xxh3 is a valid choice for local trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Blake3,
    Xxh3,
}

impl Default for HashKind {
    fn default() -> Self {
        Self::Blake3
    }
}

/// Hash an entire stream, returning a lowercase hex digest.
pub fn hash_reader(reader: &mut dyn Read, kind: HashKind) -> Result<String> {
    let mut buf = vec![0u8; HASH_BUF_BYTES];
    match kind {
        HashKind::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
        HashKind::Xxh3 => {
            let mut state = xxhash_rust::xxh3::Xxh3::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                state.update(&buf[..n]);
            }
            Ok(format!("{:016x}", state.digest()))
        }
    }
}

/// Short digest prefix used in diagnostics.
pub fn digest_prefix(digest: &str) -> &str {
    &digest[..digest.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn blake3_digest_is_stable() {
        let a = hash_reader(&mut Cursor::new(b"hello world"), HashKind::Blake3).unwrap();
        let b = hash_reader(&mut Cursor::new(b"hello world"), HashKind::Blake3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn xxh3_digest_is_stable_and_short() {
        let a = hash_reader(&mut Cursor::new(b"hello world"), HashKind::Xxh3).unwrap();
        let b = hash_reader(&mut Cursor::new(b"hello world"), HashKind::Xxh3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn different_content_differs() {
        let a = hash_reader(&mut Cursor::new(b"aaa"), HashKind::Blake3).unwrap();
        let b = hash_reader(&mut Cursor::new(b"bbb"), HashKind::Blake3).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn prefix_handles_short_digests() {
        assert_eq!(digest_prefix("abcd"), "abcd");
        assert_eq!(digest_prefix("0123456789abcdef"), "01234567");
    }
}
