//! Content digest checks against a signed manifest.

use std::io::Read;

use redoubt_attest::{Digest, digest_bytes, digest_reader};

use crate::error::{Rejection, VerificationError};

fn compare(artifact: &str, expected: &Digest, actual: Digest) -> Result<Digest, Rejection> {
    if actual == *expected {
        tracing::debug!(artifact, digest = %actual, "digest match");
        Ok(actual)
    } else {
        Err(Rejection::DigestMismatch {
            artifact: artifact.to_owned(),
            expected: expected.to_hex(),
            actual: actual.to_hex(),
        })
    }
}

/// Hash `reader` and compare against `expected`.
///
/// I/O errors are reported as errors, not as a mismatch.
pub fn check_reader_digest<R: Read>(
    artifact: &str,
    expected: &Digest,
    reader: R,
) -> Result<Digest, VerificationError> {
    let actual = digest_reader(reader)?;
    Ok(compare(artifact, expected, actual)?)
}

/// Check in-memory content against `expected`.
pub fn check_bytes_digest(
    artifact: &str,
    expected: &Digest,
    data: &[u8],
) -> Result<Digest, Rejection> {
    compare(artifact, expected, digest_bytes(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_check_hashes_whole_stream() {
        let data = vec![7u8; 100_000];
        let expected = digest_bytes(&data);
        assert_eq!(check_reader_digest("big", &expected, data.as_slice()).ok(), Some(expected));

        let err = check_reader_digest("big", &digest_bytes(b""), data.as_slice()).unwrap_err();
        assert!(matches!(err.rejection(), Some(Rejection::DigestMismatch { .. })));
    }

    #[test]
    fn read_failure_is_io_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk gone"))
            }
        }
        assert!(matches!(
            check_reader_digest("x", &digest_bytes(b""), Broken),
            Err(VerificationError::IoError(_))
        ));
    }

    #[test]
    fn matching_bytes() {
        let expected = digest_bytes(b"payload");
        assert_eq!(check_bytes_digest("a", &expected, b"payload"), Ok(expected));
    }

    #[test]
    fn mismatch_reports_both_digests() {
        let expected = digest_bytes(b"payload");
        let err = check_bytes_digest("a.bin", &expected, b"payloaD").unwrap_err();
        match err {
            Rejection::DigestMismatch {
                artifact,
                expected: e,
                actual,
            } => {
                assert_eq!(artifact, "a.bin");
                assert_eq!(e, expected.to_hex());
                assert_eq!(actual, digest_bytes(b"payloaD").to_hex());
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any single-byte change to the content is detected.
            #[test]
            fn single_byte_tamper_detected(
                data in prop::collection::vec(any::<u8>(), 1..4096),
                flip_idx in any::<prop::sample::Index>(),
                mask in 1u8..=255,
            ) {
                let expected = digest_bytes(&data);
                let mut tampered = data;
                let idx = flip_idx.index(tampered.len());
                tampered[idx] ^= mask;
                let is_mismatch = matches!(
                    check_bytes_digest("x", &expected, &tampered),
                    Err(Rejection::DigestMismatch { .. })
                );
                prop_assert!(is_mismatch);
            }
        }
    }
}
