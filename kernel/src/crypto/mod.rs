//! Crypto primitives (spec.md §6, §8): SHA-256 and HMAC for password
//! hashing and module signature checks, AES-128 for at-rest secrets,
//! big-integer modexp for RSA-style signature verification, and a
//! timer-jitter random byte source for the module VM's `CRYPTO_RANDOM`
//! API.

pub mod aes128;
pub mod bigint;
pub mod hmac;
pub mod sha256;

use core::sync::atomic::{AtomicU64, Ordering};

/// Minimal xorshift64* PRNG seeded from the tick counter. Not
/// cryptographically secure — there is no hardware RNG abstraction in
/// this kernel — but good enough for module-facing "random bytes" and
/// documented as such rather than dressed up as a CSPRNG.
static RNG_STATE: AtomicU64 = AtomicU64::new(0x9E3779B97F4A7C15);

pub fn init() {
    let seed = crate::timer::ticks().wrapping_mul(0x2545_F491_4F6C_DD1D) | 1;
    RNG_STATE.store(seed, Ordering::Relaxed);
    log::info!("crypto subsystem initialized");
}

fn next_u64() -> u64 {
    let mut x = RNG_STATE.load(Ordering::Relaxed);
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    RNG_STATE.store(x, Ordering::Relaxed);
    x.wrapping_mul(0x2545_F491_4F6C_DD1D)
}

/// Fill `buf` with pseudo-random bytes (spec.md §4.8 `CRYPTO_RANDOM`).
pub fn fill_random(buf: &mut [u8]) {
    let mut i = 0;
    while i < buf.len() {
        let word = next_u64().to_le_bytes();
        let n = (buf.len() - i).min(8);
        buf[i..i + n].copy_from_slice(&word[..n]);
        i += n;
    }
}

/// Hash a password for the user database (spec.md §6 persisted state):
/// SHA-256 over a per-entry salt concatenated with the password, so two
/// users with the same password don't produce identical stored hashes.
pub fn hash_password(salt: &[u8], password: &[u8]) -> [u8; sha256::DIGEST_LEN] {
    let mut input = alloc::vec::Vec::with_capacity(salt.len() + password.len());
    input.extend_from_slice(salt);
    input.extend_from_slice(password);
    sha256::hash(&input)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn same_password_different_salt_differs() {
        let a = hash_password(b"salt1", b"hunter2");
        let b = hash_password(b"salt2", b"hunter2");
        assert_ne!(a, b);
    }

    #[test]
    fn fill_random_fills_entire_buffer() {
        let mut buf = [0u8; 37];
        fill_random(&mut buf);
        assert!(buf.iter().any(|&b| b != 0), "astronomically unlikely to be all zero");
    }
}
