//! SHA-256 digest engine for release artifacts.
//!
//! Inputs are hashed in fixed-size chunks so that artifacts of any size
//! can be digested without holding them in memory.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use serde::{Serialize, Serializer};
use sha2::{Digest as _, Sha256};

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Length of a SHA-256 digest rendered as hex.
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

const CHUNK_SIZE: usize = 8192;

/// A SHA-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wrap raw digest bytes.
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Parse a 64-character hex digest. Upper- and lowercase are accepted.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != DIGEST_HEX_LEN {
            return None;
        }
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Digest everything readable from `reader`, 8 KiB at a time.
///
/// Fails only if the reader fails; content never causes an error.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(Digest(hasher.finalize().into()))
}

/// Digest an in-memory byte slice.
pub fn digest_bytes(data: &[u8]) -> Digest {
    Digest(Sha256::digest(data).into())
}

/// Digest a file on disk without loading it into memory.
pub fn digest_file(path: &Path) -> io::Result<Digest> {
    let file = std::fs::File::open(path)?;
    digest_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn sha256_known_value() {
        assert_eq!(digest_bytes(b"").to_hex(), EMPTY_SHA256);
    }

    #[test]
    fn sha256_hello() {
        assert_eq!(
            digest_bytes(b"hello").to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn empty_reader_matches_empty_bytes() {
        let d = digest_reader(std::io::empty()).expect("empty reader");
        assert_eq!(d.to_hex(), EMPTY_SHA256);
    }

    #[test]
    fn reader_spanning_many_chunks() {
        let data = vec![0xabu8; CHUNK_SIZE * 3 + 17];
        let streamed = digest_reader(data.as_slice()).expect("read");
        assert_eq!(streamed, digest_bytes(&data));
    }

    #[test]
    fn file_digest_matches_bytes() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(tmp.path(), b"hello").expect("write");
        assert_eq!(digest_file(tmp.path()).expect("digest"), digest_bytes(b"hello"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = digest_file(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn hex_parsing_accepts_either_case() {
        let upper = EMPTY_SHA256.to_uppercase();
        let parsed = Digest::from_hex(&upper).expect("uppercase hex");
        assert_eq!(parsed.to_hex(), EMPTY_SHA256);
    }

    #[test]
    fn hex_parsing_rejects_bad_input() {
        assert!(Digest::from_hex("abc").is_none());
        assert!(Digest::from_hex(&"g".repeat(DIGEST_HEX_LEN)).is_none());
        assert!(Digest::from_hex(&format!("{EMPTY_SHA256}00")).is_none());
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }
    }

    #[test]
    fn reader_errors_propagate() {
        assert!(digest_reader(FailingReader).is_err());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Repeated digests of the same bytes agree.
            #[test]
            fn digest_is_deterministic(data in prop::collection::vec(any::<u8>(), 0..4096)) {
                prop_assert_eq!(digest_bytes(&data), digest_bytes(&data));
            }

            /// Streaming and one-shot hashing agree regardless of how reads are split.
            #[test]
            fn chunked_reads_match_one_shot(
                data in prop::collection::vec(any::<u8>(), 0..20_000),
                split in 1usize..64,
            ) {
                let reader = std::io::Read::chain(&data[..data.len() / split], &data[data.len() / split..]);
                prop_assert_eq!(digest_reader(reader).unwrap(), digest_bytes(&data));
            }
        }
    }
}
