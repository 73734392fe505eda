//! Helper utilities for integration tests.

use rand::Rng as _;

/// Generates `len` random bytes.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    rand::rng().fill(&mut buf[..]);
    buf
}
